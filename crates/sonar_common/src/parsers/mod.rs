//! Language parsers for unstructured stderr.
//!
//! Each parser is a small line-oriented recognizer: it decides whether a line
//! opens a block, whether a line extends the block seen so far, and how to
//! turn a finished block into a ParsedError. Parsers never look ahead.

pub mod dart;
pub mod go;
pub mod python;
pub mod rust;

pub use dart::DartParser;
pub use go::GoParser;
pub use python::PythonParser;
pub use rust::RustParser;

use crate::report::ErrorReport;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use tracing::warn;

/// Classification used when a block cannot be understood
pub const UNKNOWN_ERROR: &str = "UnknownError";

/// Structured output of the segmentation engine
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ParsedError {
    pub language: String,
    pub error_type: String,
    pub message: String,
    /// Raw lines joined by newline
    pub stack: String,
    pub raw_lines: Vec<String>,
}

impl ParsedError {
    pub fn new(language: &str, error_type: String, message: String, lines: &[String]) -> Self {
        Self {
            language: language.to_string(),
            error_type,
            message,
            stack: lines.join("\n"),
            raw_lines: lines.to_vec(),
        }
    }

    /// Normalize into the shape the error buffer consumes
    pub fn into_report(self, source: Option<&str>) -> ErrorReport {
        let message = if self.message.is_empty() {
            self.error_type.clone()
        } else {
            format!("{}: {}", self.error_type, self.message)
        };

        let mut report = ErrorReport::new(message)
            .with_stack(self.stack)
            .with_context("language", Value::from(self.language))
            .with_context("errorType", Value::from(self.error_type));
        report.source = source.map(String::from);
        report
    }
}

/// A per-language recognizer
pub trait LanguageParser: Send + Sync {
    /// Parser identity, copied into `ParsedError::language`
    fn language(&self) -> &'static str;

    /// Could this single line open a new block?
    fn is_error_start(&self, line: &str) -> bool;

    /// Does `line` extend the block accumulated so far?
    fn is_continuation(&self, line: &str, lines_so_far: &[String]) -> bool;

    /// Turn a non-empty block into a ParsedError. Must never fail.
    fn parse(&self, lines: &[String]) -> ParsedError;
}

/// Names accepted by `parser_by_name`, in default registration order
pub const DEFAULT_LANGUAGES: &[&str] = &["go", "dart", "rust", "python"];

/// Look up a parser by its language name
pub fn parser_by_name(name: &str) -> Option<Box<dyn LanguageParser>> {
    match name.to_ascii_lowercase().as_str() {
        "go" => Some(Box::new(GoParser)),
        "dart" | "flutter" => Some(Box::new(DartParser)),
        "rust" => Some(Box::new(RustParser)),
        "python" => Some(Box::new(PythonParser)),
        _ => None,
    }
}

/// Build an ordered registry from configured names, skipping unknown ones
pub fn registry_from_names<S: AsRef<str>>(names: &[S]) -> Vec<Box<dyn LanguageParser>> {
    names
        .iter()
        .filter_map(|name| {
            let parser = parser_by_name(name.as_ref());
            if parser.is_none() {
                warn!("Unknown parser language '{}', skipping", name.as_ref());
            }
            parser
        })
        .collect()
}

/// Registry with every built-in parser
pub fn default_registry() -> Vec<Box<dyn LanguageParser>> {
    registry_from_names(DEFAULT_LANGUAGES)
}

#[cfg(test)]
pub(crate) fn lines(raw: &[&str]) -> Vec<String> {
    raw.iter().map(|l| l.to_string()).collect()
}
