//! Subprocess supervision: a child's stderr goes through the segmenter and
//! every recognized block lands in the error buffer.

use anyhow::{Context, Result};
use sonar_common::segmenter::drain_stream;
use sonar_common::{ErrorBuffer, Segmenter};
use std::path::Path;
use std::process::{ExitStatus, Stdio};
use tokio::io::{AsyncBufRead, BufReader};
use tokio::process::Command;
use tracing::{info, warn};

/// Label for reports from `command` when none was configured
pub fn default_source(command: &[String]) -> String {
    command
        .first()
        .and_then(|program| Path::new(program).file_name())
        .map(|name| name.to_string_lossy().into_owned())
        .unwrap_or_else(|| "process".to_string())
}

/// Segment `reader` to EOF, adding each block to `buffer` as a report
pub async fn ingest_stream<R>(
    reader: R,
    segmenter: &mut Segmenter,
    buffer: &ErrorBuffer,
    source: &str,
    echo: bool,
) -> std::io::Result<usize>
where
    R: AsyncBufRead + Unpin,
{
    drain_stream(reader, segmenter, echo, |parsed| {
        info!(
            "Detected {} {} in {}: {}",
            parsed.language, parsed.error_type, source, parsed.message
        );
        buffer.add(parsed.into_report(Some(source)));
    })
    .await
}

/// Run `command` to completion while segmenting its stderr
pub async fn supervise(
    command: &[String],
    source: &str,
    mut segmenter: Segmenter,
    buffer: ErrorBuffer,
    echo: bool,
) -> Result<ExitStatus> {
    let (program, args) = command
        .split_first()
        .context("No command given to supervise")?;

    let mut child = Command::new(program)
        .args(args)
        .stdin(Stdio::inherit())
        .stdout(Stdio::inherit())
        .stderr(Stdio::piped())
        .kill_on_drop(true)
        .spawn()
        .with_context(|| format!("Failed to start {}", program))?;
    info!("Supervising {} (pid {})", source, child.id().unwrap_or_default());

    let stderr = child
        .stderr
        .take()
        .context("Child stderr was not captured")?;

    // A read failure ends segmentation but the child keeps running
    let reader = BufReader::new(stderr);
    let detected = match ingest_stream(reader, &mut segmenter, &buffer, source, echo).await {
        Ok(detected) => detected,
        Err(e) => {
            warn!("Stopped reading {} stderr: {}", source, e);
            0
        }
    };

    let status = child.wait().await?;
    if status.success() {
        info!("{} exited cleanly ({} error(s) detected)", source, detected);
    } else {
        warn!("{} exited with {} ({} error(s) detected)", source, status, detected);
    }
    Ok(status)
}

#[cfg(test)]
mod tests {
    use super::*;
    use async_trait::async_trait;
    use sonar_common::{BatchSink, ErrorReport};
    use std::sync::Arc;
    use std::time::Duration;

    struct NullSink;

    #[async_trait]
    impl BatchSink for NullSink {
        async fn deliver(&self, _batch: Vec<ErrorReport>) -> sonar_common::Result<()> {
            Ok(())
        }
    }

    fn buffer() -> ErrorBuffer {
        ErrorBuffer::new(Arc::new(NullSink), Duration::from_secs(3600), 100)
    }

    #[test]
    fn test_default_source() {
        assert_eq!(default_source(&["/usr/bin/go".into(), "run".into()]), "go");
        assert_eq!(default_source(&[]), "process");
    }

    #[tokio::test]
    async fn test_ingest_stream_feeds_buffer() {
        let stderr = "listening on :8080\n\
                      panic: assignment to entry in nil map\n\
                      \n\
                      goroutine 1 [running]:\n\
                      main.main()\n\
                      \t/app/main.go:9 +0x1d\n\
                      exit status 2\n";
        let buffer = buffer();
        let mut segmenter = Segmenter::default();

        let detected = ingest_stream(stderr.as_bytes(), &mut segmenter, &buffer, "api", false)
            .await
            .unwrap();

        assert_eq!(detected, 1);
        assert_eq!(buffer.pending_len(), 1);
    }

    #[cfg(unix)]
    #[tokio::test]
    async fn test_supervise_reports_child_stderr() {
        let buffer = buffer();
        let command: Vec<String> = vec![
            "sh".into(),
            "-c".into(),
            "echo 'panic: boom' >&2; exit 2".into(),
        ];

        let status = supervise(&command, "worker", Segmenter::default(), buffer.clone(), false)
            .await
            .unwrap();

        assert_eq!(status.code(), Some(2));
        assert_eq!(buffer.pending_len(), 1);
    }

    #[cfg(unix)]
    #[tokio::test]
    async fn test_supervise_survives_invalid_utf8_stderr() {
        let dir = tempfile::TempDir::new().unwrap();
        let marker = dir.path().join("finished");
        let buffer = buffer();
        let command: Vec<String> = vec![
            "sh".into(),
            "-c".into(),
            format!(
                "printf 'warn \\377\\n' >&2; echo 'panic: boom' >&2; touch {}",
                marker.display()
            ),
        ];

        let status = supervise(&command, "worker", Segmenter::default(), buffer.clone(), false)
            .await
            .unwrap();

        assert!(status.success());
        assert!(marker.exists());
        assert_eq!(buffer.pending_len(), 1);
    }

    #[tokio::test]
    async fn test_supervise_empty_command_fails() {
        let result = supervise(&[], "x", Segmenter::default(), buffer(), false).await;
        assert!(result.is_err());
    }
}
