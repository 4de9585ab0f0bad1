//! Shell transport: pipes the prompt into the agent in print mode.

use super::Transport;
use crate::error::{Result, SonarError};
use crate::session::SessionStore;
use async_trait::async_trait;
use std::path::{Path, PathBuf};
use std::process::Stdio;
use std::time::Duration;
use tokio::io::{AsyncRead, AsyncReadExt};
use tokio::process::{Child, Command};
use tracing::{info, warn};

/// Single-quote `value` for sh
pub fn shell_quote(value: &str) -> String {
    format!("'{}'", value.replace('\'', "'\\''"))
}

/// Full shell pipeline for one dispatch. `agent_command` is inserted as-is.
pub fn build_command_line(agent_command: &str, prompt: &str, resume: Option<&str>) -> String {
    let mut line = format!(
        "printf '%s' {} | {} -p --dangerously-skip-permissions",
        shell_quote(prompt),
        agent_command
    );
    if let Some(id) = resume {
        line.push_str(" --resume ");
        line.push_str(&shell_quote(id));
    }
    line
}

async fn read_capped<R: AsyncRead + Unpin>(reader: R, limit: usize) -> Result<String> {
    let mut buf = Vec::new();
    reader.take(limit as u64 + 1).read_to_end(&mut buf).await?;
    if buf.len() > limit {
        return Err(SonarError::OutputLimit(limit));
    }
    Ok(String::from_utf8_lossy(&buf).into_owned())
}

/// Kill the shell and everything it started.
///
/// The agent runs in its own process group, so signalling the group reaches
/// the pipeline's grandchildren too.
async fn kill_tree(child: &mut Child) {
    #[cfg(unix)]
    if let Some(pid) = child.id() {
        use nix::sys::signal::{killpg, Signal};
        use nix::unistd::Pid;

        if let Err(e) = killpg(Pid::from_raw(pid as i32), Signal::SIGKILL) {
            warn!("Failed to kill agent process group {}: {}", pid, e);
        }
    }
    let _ = child.kill().await;
}

pub struct CliTransport {
    agent_command: String,
    project_dir: PathBuf,
    timeout: Duration,
    max_buffer: usize,
}

impl CliTransport {
    pub fn new(agent_command: &str, project_dir: &Path, timeout: Duration, max_buffer: usize) -> Self {
        Self {
            agent_command: agent_command.to_string(),
            project_dir: project_dir.to_path_buf(),
            timeout,
            max_buffer,
        }
    }
}

#[async_trait]
impl Transport for CliTransport {
    fn name(&self) -> &'static str {
        "cli"
    }

    async fn dispatch(
        &self,
        prompt: &str,
        resume: Option<&str>,
        _sessions: &dyn SessionStore,
    ) -> Result<()> {
        info!("Sending to agent CLI...");

        let mut command = Command::new("sh");
        command
            .arg("-c")
            .arg(build_command_line(&self.agent_command, prompt, resume))
            .current_dir(&self.project_dir)
            .stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .kill_on_drop(true);
        #[cfg(unix)]
        command.process_group(0);

        let mut child = command
            .spawn()
            .map_err(|e| SonarError::Dispatch(format!("failed to start shell: {}", e)))?;

        let (stdout, stderr) = match (child.stdout.take(), child.stderr.take()) {
            (Some(o), Some(e)) => (o, e),
            _ => return Err(SonarError::Dispatch("agent stdio unavailable".to_string())),
        };

        let limit = self.max_buffer;
        let run = async {
            let (out, err) =
                tokio::try_join!(read_capped(stdout, limit), read_capped(stderr, limit))?;
            let status = child.wait().await?;
            Ok::<_, SonarError>((status, out, err))
        };
        let outcome = tokio::time::timeout(self.timeout, run).await;

        let (status, out, err) = match outcome {
            Ok(Ok(done)) => done,
            Ok(Err(e)) => {
                kill_tree(&mut child).await;
                return Err(e);
            }
            Err(_) => {
                kill_tree(&mut child).await;
                return Err(SonarError::AgentTimeout(self.timeout));
            }
        };

        if !err.trim().is_empty() {
            warn!("Agent stderr: {}", err.trim());
        }
        if !status.success() {
            return Err(SonarError::AgentExit {
                code: status.code(),
                stderr: err,
            });
        }
        if !out.is_empty() {
            info!("=== AI Response ===\n{}\n=== End AI Response ===", out);
        }
        info!("Successfully sent to agent CLI");
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::session::MemorySessionStore;

    #[test]
    fn test_shell_quote_escapes_single_quotes() {
        assert_eq!(shell_quote("plain"), "'plain'");
        assert_eq!(shell_quote("it's"), "'it'\\''s'");
    }

    #[test]
    fn test_command_line_shape() {
        let fresh = build_command_line("claude", "fix it", None);
        assert_eq!(fresh, "printf '%s' 'fix it' | claude -p --dangerously-skip-permissions");

        let resumed = build_command_line("claude", "x", Some("abc"));
        assert!(resumed.ends_with("--dangerously-skip-permissions --resume 'abc'"));
    }

    #[cfg(unix)]
    #[tokio::test]
    async fn test_prompt_reaches_agent_verbatim() {
        let dir = tempfile::TempDir::new().unwrap();
        let out = dir.path().join("prompt.txt");
        // The "agent" writes its stdin to a file and ignores its flags
        let agent = format!("sh -c 'cat > {}' sh", out.display());
        let transport = CliTransport::new(&agent, dir.path(), Duration::from_secs(10), 1024);

        let prompt = "it's `quoted` $HOME \\n \"text\"";
        transport
            .dispatch(prompt, None, &MemorySessionStore::new())
            .await
            .unwrap();

        assert_eq!(std::fs::read_to_string(&out).unwrap(), prompt);
    }

    #[cfg(unix)]
    #[tokio::test]
    async fn test_non_zero_exit_is_an_error() {
        let transport = CliTransport::new(
            "sh -c 'echo broken >&2; exit 3' sh",
            Path::new("."),
            Duration::from_secs(10),
            1024,
        );
        let result = transport.dispatch("x", None, &MemorySessionStore::new()).await;
        match result {
            Err(SonarError::AgentExit { code, stderr }) => {
                assert_eq!(code, Some(3));
                assert!(stderr.contains("broken"));
            }
            other => panic!("expected AgentExit, got {:?}", other),
        }
    }

    #[cfg(unix)]
    #[tokio::test]
    async fn test_timeout_kills_whole_pipeline() {
        let dir = tempfile::TempDir::new().unwrap();
        let marker = dir.path().join("survived");
        // The agent is a grandchild of the shell; it must die with it
        let agent = format!("sh -c 'sleep 1; touch {}' sh", marker.display());
        let transport =
            CliTransport::new(&agent, dir.path(), Duration::from_millis(200), 1024);

        let result = transport.dispatch("x", None, &MemorySessionStore::new()).await;
        assert!(matches!(result, Err(SonarError::AgentTimeout(_))));

        tokio::time::sleep(Duration::from_millis(1500)).await;
        assert!(!marker.exists());
    }

    #[cfg(unix)]
    #[tokio::test]
    async fn test_output_over_limit_fails() {
        let transport = CliTransport::new(
            "sh -c 'yes' sh",
            Path::new("."),
            Duration::from_secs(10),
            1024,
        );
        let result = transport.dispatch("x", None, &MemorySessionStore::new()).await;
        assert!(matches!(result, Err(SonarError::OutputLimit(1024))));
    }
}
