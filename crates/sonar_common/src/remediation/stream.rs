//! Streaming transport: runs the agent in print mode with stream-json output
//! and follows its event stream line by line.

use super::Transport;
use crate::error::{Result, SonarError};
use crate::segmenter::read_line_lossy;
use crate::session::SessionStore;
use async_trait::async_trait;
use serde::Deserialize;
use serde_json::Value;
use std::path::{Path, PathBuf};
use std::process::Stdio;
use tokio::io::{AsyncReadExt, AsyncWriteExt, BufReader};
use tokio::process::Command;
use tracing::{debug, info, warn};

/// One line of stream-json output; unknown event types are ignored
#[derive(Debug, Deserialize)]
#[serde(tag = "type", rename_all = "lowercase")]
enum StreamEvent {
    System {
        #[serde(default)]
        subtype: Option<String>,
        #[serde(default)]
        session_id: Option<String>,
    },
    Assistant {
        #[serde(default)]
        message: Value,
    },
    Result {
        #[serde(default)]
        result: Option<String>,
        #[serde(default)]
        is_error: bool,
    },
    #[serde(other)]
    Other,
}

/// Final outcome reported by the agent
#[derive(Debug, Clone, PartialEq)]
struct AgentResult {
    text: String,
    is_error: bool,
}

#[derive(Debug, Default)]
struct StreamState {
    session_recorded: bool,
    responses: usize,
    result: Option<AgentResult>,
}

impl StreamState {
    fn handle_line(&mut self, line: &str, sessions: &dyn SessionStore) -> Result<()> {
        let line = line.trim();
        if line.is_empty() {
            return Ok(());
        }

        let event: StreamEvent = match serde_json::from_str(line) {
            Ok(event) => event,
            Err(e) => {
                debug!("Skipping non-event agent output ({}): {}", e, line);
                return Ok(());
            }
        };

        match event {
            StreamEvent::System {
                subtype,
                session_id,
            } => {
                debug!("Agent event: type=system subtype={}", subtype.as_deref().unwrap_or("-"));
                if subtype.as_deref() == Some("init") && !self.session_recorded {
                    if let Some(id) = session_id.filter(|id| !id.is_empty()) {
                        sessions.save(&id)?;
                        self.session_recorded = true;
                    }
                }
            }
            StreamEvent::Assistant { message } => {
                self.responses += 1;
                let text = assistant_text(&message);
                if !text.is_empty() {
                    info!("=== AI Response ===\n{}\n=== End AI Response ===", text);
                }
            }
            StreamEvent::Result { result, is_error } => {
                let text = result.unwrap_or_default();
                info!("=== Result ===\n{}\n=== End Result ===", text);
                self.result = Some(AgentResult { text, is_error });
            }
            StreamEvent::Other => {}
        }
        Ok(())
    }
}

/// Concatenate the text blocks of an assistant message
fn assistant_text(message: &Value) -> String {
    match message.get("content") {
        Some(Value::Array(blocks)) => blocks
            .iter()
            .filter_map(|b| b.get("text").and_then(Value::as_str))
            .collect::<Vec<_>>()
            .join(""),
        Some(Value::String(text)) => text.clone(),
        _ => String::new(),
    }
}

pub struct StreamingTransport {
    agent_command: String,
    project_dir: PathBuf,
    max_turns: u32,
}

impl StreamingTransport {
    pub fn new(agent_command: &str, project_dir: &Path, max_turns: u32) -> Self {
        Self {
            agent_command: agent_command.to_string(),
            project_dir: project_dir.to_path_buf(),
            max_turns,
        }
    }

    fn args(&self, resume: Option<&str>) -> Vec<String> {
        let mut args: Vec<String> = [
            "-p",
            "--output-format",
            "stream-json",
            "--verbose",
            "--permission-mode",
            "bypassPermissions",
            "--max-turns",
        ]
        .iter()
        .map(|s| s.to_string())
        .collect();
        args.push(self.max_turns.to_string());
        if let Some(id) = resume {
            args.push("--resume".to_string());
            args.push(id.to_string());
        }
        args
    }
}

#[async_trait]
impl Transport for StreamingTransport {
    fn name(&self) -> &'static str {
        "stream"
    }

    async fn dispatch(
        &self,
        prompt: &str,
        resume: Option<&str>,
        sessions: &dyn SessionStore,
    ) -> Result<()> {
        info!("Sending via agent stream...");

        let mut child = Command::new(&self.agent_command)
            .args(self.args(resume))
            .current_dir(&self.project_dir)
            .stdin(Stdio::piped())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .kill_on_drop(true)
            .spawn()
            .map_err(|e| {
                SonarError::Dispatch(format!("failed to start {}: {}", self.agent_command, e))
            })?;

        let (mut stdin, stdout, mut stderr) =
            match (child.stdin.take(), child.stdout.take(), child.stderr.take()) {
                (Some(i), Some(o), Some(e)) => (i, o, e),
                _ => return Err(SonarError::Dispatch("agent stdio unavailable".to_string())),
            };

        let input = prompt.to_string();
        let writer = tokio::spawn(async move {
            stdin.write_all(input.as_bytes()).await?;
            stdin.shutdown().await
        });
        let stderr_reader = tokio::spawn(async move {
            let mut buf = Vec::new();
            stderr
                .read_to_end(&mut buf)
                .await
                .map(|_| String::from_utf8_lossy(&buf).into_owned())
        });

        let mut state = StreamState::default();
        let mut stdout = BufReader::new(stdout);
        let mut buf = Vec::new();
        while let Some(line) = read_line_lossy(&mut stdout, &mut buf).await? {
            state.handle_line(&line, sessions)?;
        }

        let status = child.wait().await?;

        if let Ok(Err(e)) = writer.await {
            // The agent may exit before reading everything
            debug!("Agent stdin closed early: {}", e);
        }
        let stderr_text = match stderr_reader.await {
            Ok(Ok(text)) => text,
            _ => String::new(),
        };
        if !stderr_text.trim().is_empty() {
            warn!("Agent stderr: {}", stderr_text.trim());
        }

        if !status.success() {
            return Err(SonarError::AgentExit {
                code: status.code(),
                stderr: stderr_text,
            });
        }

        match state.result {
            Some(AgentResult { is_error: true, text }) => Err(SonarError::Dispatch(format!(
                "agent reported an error: {}",
                text
            ))),
            _ => {
                info!("Agent stream finished ({} response message(s))", state.responses);
                Ok(())
            }
        }
    }
}
