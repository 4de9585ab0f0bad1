//! Sonar Control - CLI client for the sonar relay
//!
//! Sends manual reports, pipes another program's stderr to the relay, and
//! shows relay health.

mod commands;

use anyhow::Result;
use clap::{Parser, Subcommand};
use std::path::PathBuf;
use tracing_subscriber::EnvFilter;

#[derive(Parser)]
#[command(name = "sonarctl")]
#[command(about = "Sonar - report runtime errors to the remediation relay", long_about = None)]
#[command(version = sonar_common::VERSION)]
struct Cli {
    /// Config file (defaults to ./sonar.toml when present)
    #[arg(long, global = true)]
    config: Option<PathBuf>,

    /// Relay base URL, overrides [reporter] relay_url
    #[arg(long, global = true)]
    url: Option<String>,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Send one error report
    Report {
        /// Error message
        message: String,

        /// Stack trace text
        #[arg(long)]
        stack: Option<String>,

        /// Origin label, e.g. "POST /api/todos"
        #[arg(long)]
        source: Option<String>,

        /// Extra context as KEY=VALUE (VALUE may be JSON), repeatable
        #[arg(long = "context", value_name = "KEY=VALUE")]
        context: Vec<String>,
    },

    /// Segment stdin and report every detected error
    Pipe {
        /// Source label for the reports
        #[arg(long, default_value = "stdin")]
        source: String,

        /// Do not echo input lines to stderr
        #[arg(long)]
        quiet: bool,
    },

    /// Show relay health and in-flight errors
    Status,
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    tracing_subscriber::fmt()
        .with_writer(std::io::stderr)
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("warn")))
        .init();

    let config = commands::load_config(cli.config.as_deref(), cli.url)?;

    match cli.command {
        Commands::Report {
            message,
            stack,
            source,
            context,
        } => commands::report(&config, message, stack, source, &context).await,
        Commands::Pipe { source, quiet } => commands::pipe(&config, &source, !quiet).await,
        Commands::Status => commands::status(&config).await,
    }
}
