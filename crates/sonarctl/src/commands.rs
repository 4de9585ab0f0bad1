//! Command implementations for sonarctl

use anyhow::{bail, Context, Result};
use owo_colors::OwoColorize;
use serde::Deserialize;
use serde_json::Value;
use sonar_common::parsers::registry_from_names;
use sonar_common::segmenter::drain_stream;
use sonar_common::{ErrorReport, InFlightEntry, Reporter, Segmenter, SonarConfig};
use std::path::Path;
use tokio::io::BufReader;

/// Subset of the relay's GET /health body
#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct RelayHealth {
    status: String,
    version: String,
    pending: usize,
    in_flight: usize,
    #[serde(default)]
    uptime_secs: u64,
}

pub fn load_config(path: Option<&Path>, url: Option<String>) -> Result<SonarConfig> {
    let mut config = SonarConfig::load(path).context("Failed to load configuration")?;
    if let Some(url) = url {
        config.reporter.relay_url = url;
    }
    Ok(config)
}

/// Split KEY=VALUE; VALUE is kept as JSON when it parses as JSON
fn parse_context(pairs: &[String]) -> Result<Vec<(String, Value)>> {
    pairs
        .iter()
        .map(|pair| {
            let (key, raw) = pair
                .split_once('=')
                .with_context(|| format!("Context '{}' is not KEY=VALUE", pair))?;
            if key.is_empty() {
                bail!("Context '{}' has an empty key", pair);
            }
            let value = serde_json::from_str(raw).unwrap_or_else(|_| Value::from(raw));
            Ok((key.to_string(), value))
        })
        .collect()
}

fn base_url(config: &SonarConfig) -> &str {
    config.reporter.relay_url.trim_end_matches('/')
}

pub async fn report(
    config: &SonarConfig,
    message: String,
    stack: Option<String>,
    source: Option<String>,
    context: &[String],
) -> Result<()> {
    if !config.reporter.enabled {
        println!("[WARNING] {}", "Reporting is disabled (SONAR_ENABLED)".yellow());
        return Ok(());
    }

    let mut report = ErrorReport::new(message);
    if let Some(stack) = stack {
        report = report.with_stack(sonar_common::report::truncate_stack(
            &stack,
            config.reporter.max_stack_length,
        ));
    }
    report.source = source;
    for (key, value) in parse_context(context)? {
        report = report.with_context(key, value);
    }

    // Sent directly so a rejected report is visible
    let client = reqwest::Client::builder()
        .timeout(config.reporter.timeout())
        .build()?;
    let url = format!("{}/errors", base_url(config));
    let response = client
        .post(&url)
        .json(&report)
        .send()
        .await
        .with_context(|| format!("Relay unreachable at {}", url))?;

    if !response.status().is_success() {
        eprintln!("[ERROR] {}", format!("Relay answered {}", response.status()).red());
        bail!("Report rejected by relay");
    }

    let body: Value = response.json().await.unwrap_or(Value::Null);
    let status = body["status"].as_str().unwrap_or("accepted");
    println!("[OK] Report {} by {}", status.green(), base_url(config));
    Ok(())
}

pub async fn pipe(config: &SonarConfig, source: &str, echo: bool) -> Result<()> {
    let reporter = Reporter::new(&config.reporter)?;
    reporter.install_panic_hook();

    let mut segmenter = Segmenter::new(registry_from_names(&config.segmenter.languages));
    let stdin = BufReader::new(tokio::io::stdin());

    let detected = drain_stream(stdin, &mut segmenter, echo, |parsed| {
        reporter.report(parsed.into_report(Some(source)));
    })
    .await
    .context("Failed reading stdin")?;

    reporter.drain().await;

    if detected > 0 {
        eprintln!(
            "[INFO] Reported {} error(s) from {} to {}",
            detected.to_string().red(),
            source,
            reporter.endpoint()
        );
    }
    Ok(())
}

pub async fn status(config: &SonarConfig) -> Result<()> {
    let client = reqwest::Client::builder()
        .timeout(config.reporter.timeout())
        .build()?;
    let base = base_url(config);

    let health: RelayHealth = match client.get(format!("{}/health", base)).send().await {
        Ok(resp) => resp.error_for_status()?.json().await?,
        Err(e) => {
            eprintln!("[ERROR] {}", format!("Relay not reachable at {}: {}", base, e).red());
            bail!("Relay down");
        }
    };

    println!(
        "[OK] Relay {} is {} (v{}, up {}s)",
        base,
        health.status.green(),
        health.version,
        health.uptime_secs
    );
    println!("  Pending:   {}", health.pending);
    println!("  In flight: {}", health.in_flight);

    if health.in_flight > 0 {
        let entries: Vec<InFlightEntry> = client
            .get(format!("{}/in-flight", base))
            .send()
            .await?
            .error_for_status()?
            .json()
            .await?;
        println!();
        for entry in entries {
            println!(
                "  * {} {}",
                entry.message.yellow(),
                format!(
                    "(since {}, {} duplicate(s) skipped)",
                    entry.sent_at.format("%H:%M:%S"),
                    entry.skipped_count
                )
                .dimmed()
            );
        }
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_context() {
        let pairs = vec![
            "path=/api/todos".to_string(),
            "status=500".to_string(),
            "body={\"id\":1}".to_string(),
        ];
        let parsed = parse_context(&pairs).unwrap();
        assert_eq!(parsed[0], ("path".to_string(), Value::from("/api/todos")));
        assert_eq!(parsed[1].1, Value::from(500));
        assert_eq!(parsed[2].1["id"], 1);
    }

    #[test]
    fn test_parse_context_rejects_bad_pairs() {
        assert!(parse_context(&["novalue".to_string()]).is_err());
        assert!(parse_context(&["=x".to_string()]).is_err());
    }

    #[test]
    fn test_load_config_url_override() {
        let config = load_config(None, Some("http://relay:9300/".to_string())).unwrap();
        assert_eq!(base_url(&config), "http://relay:9300");
    }
}
