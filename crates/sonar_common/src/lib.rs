//! Sonar Common - shared pipeline for the sonar error relay
//!
//! Reports arrive either over the network or from supervised stderr, get
//! batched by the error buffer, and end up in a remediation prompt.

pub mod buffer;
pub mod config;
pub mod error;
pub mod parsers;
pub mod remediation;
pub mod report;
pub mod reporter;
pub mod segmenter;
pub mod session;

pub use buffer::{AddOutcome, BatchSink, ErrorBuffer, InFlightEntry, InFlightStatus};
pub use config::SonarConfig;
pub use error::{Result, SonarError};
pub use parsers::{LanguageParser, ParsedError};
pub use remediation::{ClaudeMode, RemediationClient, Transport};
pub use report::ErrorReport;
pub use reporter::Reporter;
pub use segmenter::Segmenter;
pub use session::{FileSessionStore, MemorySessionStore, SessionStore};

/// Crate version, reported by the relay health endpoint
pub const VERSION: &str = env!("CARGO_PKG_VERSION");
