//! Sonar relay daemon
//!
//! Receives error reports over HTTP and from a supervised child's stderr,
//! batches them, and hands each batch to the remediation agent.

use anyhow::{Context, Result};
use clap::Parser;
use sonar_common::config::DEFAULT_CONFIG_FILE;
use sonar_common::parsers::registry_from_names;
use sonar_common::{ErrorBuffer, FileSessionStore, RemediationClient, Segmenter, SonarConfig};
use sonard::server::{self, AppState};
use sonard::supervise;
use std::path::PathBuf;
use std::sync::Arc;
use tokio::net::TcpListener;
use tracing::{error, info, warn};
use tracing_subscriber::EnvFilter;

#[derive(Parser)]
#[command(name = "sonard")]
#[command(about = "Error relay that dispatches runtime failures to a remediation agent", long_about = None)]
#[command(version)]
struct Args {
    /// Config file (defaults to ./sonar.toml when present)
    #[arg(long)]
    config: Option<PathBuf>,

    /// Listen address, overrides [relay] listen
    #[arg(long)]
    listen: Option<String>,

    /// Source label for reports from the supervised command
    #[arg(long)]
    source: Option<String>,

    /// Do not echo the supervised command's stderr
    #[arg(long)]
    quiet: bool,

    /// Command to supervise
    #[arg(last = true)]
    command: Vec<String>,
}

#[tokio::main]
async fn main() -> Result<()> {
    let args = Args::parse();

    // Env overrides wait for the subscriber so their warnings are logged
    let config_path = SonarConfig::config_path(args.config.as_deref());
    let mut config = SonarConfig::from_file_or_default(config_path.as_deref())
        .context("Failed to load configuration")?;

    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(&config.log.level)),
        )
        .init();

    info!("Sonar relay v{} starting", sonar_common::VERSION);
    match &config_path {
        Some(path) => info!("Loaded config from {}", path.display()),
        None => info!("No {} found, using defaults", DEFAULT_CONFIG_FILE),
    }
    config.apply_env();
    if let Some(listen) = args.listen {
        config.relay.listen = listen;
    }

    let sessions = Arc::new(FileSessionStore::open(config.remediation.session_path()));
    let client = RemediationClient::from_settings(&config.remediation, sessions);
    info!(
        "Remediation via {} transport in {}",
        client.transport_name(),
        config.remediation.project_dir.display()
    );

    let buffer = ErrorBuffer::new(
        Arc::new(client),
        config.buffer.debounce(),
        config.buffer.effective_max_size(),
    );

    let listener = TcpListener::bind(&config.relay.listen)
        .await
        .with_context(|| format!("Failed to bind {}", config.relay.listen))?;

    if !args.command.is_empty() {
        let source = args
            .source
            .clone()
            .unwrap_or_else(|| supervise::default_source(&args.command));
        let segmenter = Segmenter::new(registry_from_names(&config.segmenter.languages));
        let command = args.command.clone();
        let buffer = buffer.clone();
        let echo = !args.quiet;

        tokio::spawn(async move {
            if let Err(e) = supervise::supervise(&command, &source, segmenter, buffer, echo).await {
                error!("Supervision of {} failed: {:#}", source, e);
            }
        });
    }

    server::run(listener, AppState::new(buffer.clone()), shutdown_signal()).await?;

    if let Some(dispatch) = buffer.flush() {
        info!("Flushing pending errors before exit");
        if let Err(e) = dispatch.await {
            warn!("Final dispatch did not complete: {}", e);
        }
    }

    info!("Shutting down gracefully");
    Ok(())
}

async fn shutdown_signal() {
    if let Err(e) = tokio::signal::ctrl_c().await {
        error!("Failed to listen for Ctrl-C: {}", e);
        std::future::pending::<()>().await;
    }
    info!("Shutdown requested");
}
