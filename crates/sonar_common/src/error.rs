//! Error types for sonar.

use thiserror::Error;

#[derive(Error, Debug)]
pub enum SonarError {
    #[error("Config error: {0}")]
    Config(String),

    #[error("Session store error: {0}")]
    Session(String),

    #[error("Dispatch error: {0}")]
    Dispatch(String),

    #[error("Agent exited with status {code:?}: {stderr}")]
    AgentExit { code: Option<i32>, stderr: String },

    #[error("Agent timed out after {0:?}")]
    AgentTimeout(std::time::Duration),

    #[error("Agent output exceeded {0} bytes")]
    OutputLimit(usize),

    #[error("HTTP error: {0}")]
    Http(#[from] reqwest::Error),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    #[error("TOML error: {0}")]
    Toml(#[from] toml::de::Error),
}

pub type Result<T> = std::result::Result<T, SonarError>;
