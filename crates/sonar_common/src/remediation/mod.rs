//! Remediation client - turns a batch of reports into one agent dispatch.
//!
//! Two interchangeable transports share the session contract: the streaming
//! transport talks stream-json to the agent and records the session id it
//! announces, the cli transport pipes the prompt through a shell. Either way,
//! a failed dispatch that resumed a stored session is retried exactly once
//! on a fresh session.

pub mod cli;
pub mod prompt;
pub mod stream;

pub use cli::CliTransport;
pub use prompt::build_prompt;
pub use stream::StreamingTransport;

use crate::buffer::BatchSink;
use crate::config::RemediationSettings;
use crate::error::Result;
use crate::report::ErrorReport;
use crate::session::SessionStore;
use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::str::FromStr;
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, info, warn};

/// Which transport carries the prompt
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "lowercase")]
pub enum ClaudeMode {
    #[default]
    Sdk,
    Cli,
}

impl ClaudeMode {
    pub fn as_str(&self) -> &'static str {
        match self {
            ClaudeMode::Sdk => "sdk",
            ClaudeMode::Cli => "cli",
        }
    }
}

impl FromStr for ClaudeMode {
    type Err = String;

    fn from_str(s: &str) -> std::result::Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "sdk" => Ok(ClaudeMode::Sdk),
            "cli" => Ok(ClaudeMode::Cli),
            other => Err(format!("unknown mode '{}', expected sdk or cli", other)),
        }
    }
}

/// One way of getting a prompt to the agent
#[async_trait]
pub trait Transport: Send + Sync {
    fn name(&self) -> &'static str;

    /// Run the prompt, resuming `resume` when given. Transports that learn a
    /// new session id record it in `sessions` themselves.
    async fn dispatch(
        &self,
        prompt: &str,
        resume: Option<&str>,
        sessions: &dyn SessionStore,
    ) -> Result<()>;
}

pub struct RemediationClient {
    transport: Box<dyn Transport>,
    sessions: Arc<dyn SessionStore>,
    max_stack_length: usize,
}

impl RemediationClient {
    pub fn new(
        transport: Box<dyn Transport>,
        sessions: Arc<dyn SessionStore>,
        max_stack_length: usize,
    ) -> Self {
        Self {
            transport,
            sessions,
            max_stack_length,
        }
    }

    /// Build the transport selected by `settings.mode`
    pub fn from_settings(settings: &RemediationSettings, sessions: Arc<dyn SessionStore>) -> Self {
        let transport: Box<dyn Transport> = match settings.mode {
            ClaudeMode::Sdk => Box::new(StreamingTransport::new(
                &settings.agent_command,
                &settings.project_dir,
                settings.max_turns,
            )),
            ClaudeMode::Cli => Box::new(CliTransport::new(
                &settings.agent_command,
                &settings.project_dir,
                Duration::from_secs(settings.cli_timeout_secs),
                settings.cli_max_buffer_bytes,
            )),
        };
        Self::new(transport, sessions, settings.max_stack_length)
    }

    pub fn transport_name(&self) -> &'static str {
        self.transport.name()
    }

    pub async fn send(&self, errors: &[ErrorReport]) -> Result<()> {
        let prompt = build_prompt(errors, self.max_stack_length);
        debug!("=== Prompt ===\n{}\n=== End Prompt ===", prompt);

        let session = self.sessions.get();
        info!(
            "Sending {} error(s) via {} | session: {}",
            errors.len(),
            self.transport.name(),
            session.as_deref().unwrap_or("new session")
        );

        let first = self
            .transport
            .dispatch(&prompt, session.as_deref(), self.sessions.as_ref())
            .await;

        match (first, session) {
            (Ok(()), _) => {
                info!("Remediation dispatch via {} succeeded", self.transport.name());
                Ok(())
            }
            (Err(e), Some(stale)) => {
                warn!(
                    "Resume failed for session {} ({}), retrying with new session...",
                    stale, e
                );
                self.sessions.reset()?;
                self.transport
                    .dispatch(&prompt, None, self.sessions.as_ref())
                    .await?;
                info!("Remediation dispatch via {} succeeded on fresh session", self.transport.name());
                Ok(())
            }
            (Err(e), None) => Err(e),
        }
    }
}

#[async_trait]
impl BatchSink for RemediationClient {
    async fn deliver(&self, batch: Vec<ErrorReport>) -> Result<()> {
        self.send(&batch).await
    }
}
