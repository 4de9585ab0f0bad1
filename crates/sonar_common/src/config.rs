//! Sonar configuration.
//!
//! Loaded from TOML (`--config`, else ./sonar.toml, else defaults), then
//! overridden from SONAR_* environment variables.

use crate::error::Result;
use crate::parsers::DEFAULT_LANGUAGES;
use crate::remediation::ClaudeMode;
use serde::{Deserialize, Serialize};
use std::fs;
use std::path::{Path, PathBuf};
use std::time::Duration;
use tracing::{info, warn};

/// Config file looked up in the working directory
pub const DEFAULT_CONFIG_FILE: &str = "sonar.toml";

/// Relay HTTP listener
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RelaySettings {
    #[serde(default = "default_listen")]
    pub listen: String,
}

fn default_listen() -> String {
    "127.0.0.1:9100".to_string()
}

impl Default for RelaySettings {
    fn default() -> Self {
        Self {
            listen: default_listen(),
        }
    }
}

/// Error buffer batching
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BufferSettings {
    /// Quiet period before a batch is flushed
    #[serde(default = "default_debounce_ms")]
    pub debounce_ms: u64,

    /// Pending reports that force an immediate flush
    #[serde(default = "default_max_size")]
    pub max_size: usize,
}

fn default_debounce_ms() -> u64 {
    3_000
}

fn default_max_size() -> usize {
    10
}

impl BufferSettings {
    pub fn debounce(&self) -> Duration {
        Duration::from_millis(self.debounce_ms)
    }

    pub fn effective_max_size(&self) -> usize {
        self.max_size.max(1)
    }
}

impl Default for BufferSettings {
    fn default() -> Self {
        Self {
            debounce_ms: default_debounce_ms(),
            max_size: default_max_size(),
        }
    }
}

/// Remediation agent dispatch
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RemediationSettings {
    #[serde(default)]
    pub mode: ClaudeMode,

    /// Working directory the agent inspects and edits
    #[serde(default = "default_project_dir")]
    pub project_dir: PathBuf,

    /// Stack traces longer than this are cut in the prompt
    #[serde(default = "default_max_stack_length")]
    pub max_stack_length: usize,

    /// Agent executable
    #[serde(default = "default_agent_command")]
    pub agent_command: String,

    #[serde(default = "default_max_turns")]
    pub max_turns: u32,

    /// Wall clock limit for the cli transport
    #[serde(default = "default_cli_timeout")]
    pub cli_timeout_secs: u64,

    /// Per-stream output cap for the cli transport
    #[serde(default = "default_cli_max_buffer")]
    pub cli_max_buffer_bytes: usize,

    /// Session file, relative to project_dir unless absolute
    #[serde(default = "default_session_file")]
    pub session_file: PathBuf,
}

fn default_project_dir() -> PathBuf {
    PathBuf::from(".")
}

fn default_max_stack_length() -> usize {
    2_000
}

fn default_agent_command() -> String {
    "claude".to_string()
}

fn default_max_turns() -> u32 {
    30
}

fn default_cli_timeout() -> u64 {
    300 // 5 minutes
}

fn default_cli_max_buffer() -> usize {
    20 * 1024 * 1024
}

fn default_session_file() -> PathBuf {
    PathBuf::from(".sonar/session.json")
}

impl RemediationSettings {
    pub fn session_path(&self) -> PathBuf {
        if self.session_file.is_absolute() {
            self.session_file.clone()
        } else {
            self.project_dir.join(&self.session_file)
        }
    }
}

impl Default for RemediationSettings {
    fn default() -> Self {
        Self {
            mode: ClaudeMode::default(),
            project_dir: default_project_dir(),
            max_stack_length: default_max_stack_length(),
            agent_command: default_agent_command(),
            max_turns: default_max_turns(),
            cli_timeout_secs: default_cli_timeout(),
            cli_max_buffer_bytes: default_cli_max_buffer(),
            session_file: default_session_file(),
        }
    }
}

/// Sender side of POST /errors
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ReporterSettings {
    #[serde(default = "default_relay_url")]
    pub relay_url: String,

    #[serde(default = "default_true")]
    pub enabled: bool,

    /// Per-send abort timeout
    #[serde(default = "default_reporter_timeout")]
    pub timeout_ms: u64,

    #[serde(default = "default_max_stack_length")]
    pub max_stack_length: usize,

    /// Log failed sends instead of dropping them silently
    #[serde(default)]
    pub debug: bool,
}

fn default_relay_url() -> String {
    "http://localhost:9100".to_string()
}

fn default_true() -> bool {
    true
}

fn default_reporter_timeout() -> u64 {
    1_000
}

impl ReporterSettings {
    pub fn timeout(&self) -> Duration {
        Duration::from_millis(self.timeout_ms)
    }
}

impl Default for ReporterSettings {
    fn default() -> Self {
        Self {
            relay_url: default_relay_url(),
            enabled: true,
            timeout_ms: default_reporter_timeout(),
            max_stack_length: default_max_stack_length(),
            debug: false,
        }
    }
}

/// Stderr segmentation
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SegmenterSettings {
    /// Parsers to register, in order
    #[serde(default = "default_languages")]
    pub languages: Vec<String>,
}

fn default_languages() -> Vec<String> {
    DEFAULT_LANGUAGES.iter().map(|l| l.to_string()).collect()
}

impl Default for SegmenterSettings {
    fn default() -> Self {
        Self {
            languages: default_languages(),
        }
    }
}

/// Logging configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LogSettings {
    /// Log level (trace, debug, info, warn, error); RUST_LOG wins
    #[serde(default = "default_log_level")]
    pub level: String,
}

fn default_log_level() -> String {
    "info".to_string()
}

impl Default for LogSettings {
    fn default() -> Self {
        Self {
            level: default_log_level(),
        }
    }
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct SonarConfig {
    #[serde(default)]
    pub relay: RelaySettings,
    #[serde(default)]
    pub buffer: BufferSettings,
    #[serde(default)]
    pub remediation: RemediationSettings,
    #[serde(default)]
    pub reporter: ReporterSettings,
    #[serde(default)]
    pub segmenter: SegmenterSettings,
    #[serde(default)]
    pub log: LogSettings,
}

impl SonarConfig {
    /// Load from an explicit path, ./sonar.toml, or defaults; then apply env
    pub fn load(path: Option<&Path>) -> Result<Self> {
        let path = Self::config_path(path);
        let mut config = Self::from_file_or_default(path.as_deref())?;
        match &path {
            Some(path) => info!("Loaded config from {}", path.display()),
            None => info!("No {} found, using defaults", DEFAULT_CONFIG_FILE),
        }
        config.apply_env();
        Ok(config)
    }

    /// The explicit path if given, else ./sonar.toml when it exists
    pub fn config_path(explicit: Option<&Path>) -> Option<PathBuf> {
        match explicit {
            Some(path) => Some(path.to_path_buf()),
            None if Path::new(DEFAULT_CONFIG_FILE).exists() => Some(PathBuf::from(DEFAULT_CONFIG_FILE)),
            None => None,
        }
    }

    /// File contents or defaults, without environment overrides or logging
    pub fn from_file_or_default(path: Option<&Path>) -> Result<Self> {
        match path {
            Some(path) => Self::load_from_path(path),
            None => Ok(SonarConfig::default()),
        }
    }

    pub fn load_from_path(path: &Path) -> Result<Self> {
        let content = fs::read_to_string(path)?;
        Self::from_toml(&content)
    }

    pub fn from_toml(content: &str) -> Result<Self> {
        Ok(toml::from_str(content)?)
    }

    /// Apply SONAR_* overrides from the process environment
    pub fn apply_env(&mut self) {
        self.apply_overrides(|key| std::env::var(key).ok());
    }

    /// Apply SONAR_* overrides from `lookup`; bad values are ignored
    pub fn apply_overrides<F>(&mut self, lookup: F)
    where
        F: Fn(&str) -> Option<String>,
    {
        if let Some(url) = lookup("SONAR_URL") {
            self.reporter.relay_url = url;
        }
        if let Some(listen) = lookup("SONAR_LISTEN") {
            self.relay.listen = listen;
        }
        if let Some(dir) = lookup("SONAR_PROJECT_DIR") {
            self.remediation.project_dir = PathBuf::from(dir);
        }
        if let Some(raw) = lookup("SONAR_DEBUG") {
            match parse_bool(&raw) {
                Some(v) => self.reporter.debug = v,
                None => warn!("Ignoring invalid SONAR_DEBUG value '{}'", raw),
            }
        }
        if let Some(raw) = lookup("SONAR_ENABLED") {
            match parse_bool(&raw) {
                Some(v) => self.reporter.enabled = v,
                None => warn!("Ignoring invalid SONAR_ENABLED value '{}'", raw),
            }
        }
        if let Some(mode) = lookup("SONAR_MODE") {
            match mode.parse::<ClaudeMode>() {
                Ok(m) => self.remediation.mode = m,
                Err(e) => warn!("Ignoring SONAR_MODE: {}", e),
            }
        }
    }
}

fn parse_bool(value: &str) -> Option<bool> {
    match value.trim().to_ascii_lowercase().as_str() {
        "1" | "true" | "yes" | "on" => Some(true),
        "0" | "false" | "no" | "off" => Some(false),
        _ => None,
    }
}
