//! ErrorReport - the normalized unit every ingress path produces.

use chrono::{SecondsFormat, Utc};
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

/// Marker appended when a stack trace is cut to fit
pub const TRUNCATION_MARKER: &str = "\n... (truncated)";

/// A normalized error report.
///
/// `message` doubles as the deduplication key in the error buffer, so two
/// different failures that render the same text share one signature.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ErrorReport {
    pub message: String,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub stack: Option<String>,

    /// Origin label, e.g. "POST /api/todos" or a supervised process name
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub source: Option<String>,

    /// ISO-8601, set when the report is normalized
    #[serde(default = "now_iso8601")]
    pub timestamp: String,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub context: Option<Map<String, Value>>,
}

impl ErrorReport {
    pub fn new(message: impl Into<String>) -> Self {
        Self {
            message: message.into(),
            stack: None,
            source: None,
            timestamp: now_iso8601(),
            context: None,
        }
    }

    pub fn with_stack(mut self, stack: impl Into<String>) -> Self {
        self.stack = Some(stack.into());
        self
    }

    pub fn with_source(mut self, source: impl Into<String>) -> Self {
        self.source = Some(source.into());
        self
    }

    /// Add one context entry, keeping insertion order
    pub fn with_context(mut self, key: impl Into<String>, value: Value) -> Self {
        self.context
            .get_or_insert_with(Map::new)
            .insert(key.into(), value);
        self
    }

    /// Normalize a Rust error: Display for the message, the source chain as stack
    pub fn from_error(
        err: &(dyn std::error::Error + 'static),
        source: Option<&str>,
        max_stack_length: usize,
    ) -> Self {
        let mut chain = Vec::new();
        let mut cause = err.source();
        while let Some(c) = cause {
            chain.push(format!("caused by: {}", c));
            cause = c.source();
        }

        let mut report = ErrorReport::new(err.to_string());
        if !chain.is_empty() {
            report.stack = Some(truncate_stack(&chain.join("\n"), max_stack_length));
        }
        report.source = source.map(String::from);
        report
    }
}

/// Current UTC time in the same shape JavaScript's toISOString produces
pub fn now_iso8601() -> String {
    Utc::now().to_rfc3339_opts(SecondsFormat::Millis, true)
}

/// Cut a stack trace to `max_len` characters, appending the truncation marker
pub fn truncate_stack(stack: &str, max_len: usize) -> String {
    match stack.char_indices().nth(max_len) {
        None => stack.to_string(),
        Some((cut, _)) => format!("{}{}", &stack[..cut], TRUNCATION_MARKER),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_truncate_stack_short_is_untouched() {
        assert_eq!(truncate_stack("abc", 3), "abc");
    }

    #[test]
    fn test_truncate_stack_cuts_on_char_boundary() {
        let cut = truncate_stack("ééééé", 2);
        assert_eq!(cut, format!("éé{}", TRUNCATION_MARKER));
    }

    #[test]
    fn test_deserialize_without_timestamp() {
        let report: ErrorReport =
            serde_json::from_str(r#"{"message":"boom","source":"GET /"}"#).unwrap();
        assert_eq!(report.message, "boom");
        assert_eq!(report.source.as_deref(), Some("GET /"));
        assert!(report.timestamp.ends_with('Z'));
        assert!(report.stack.is_none());
    }

    #[test]
    fn test_context_keeps_insertion_order() {
        let report = ErrorReport::new("x")
            .with_context("zeta", Value::from(1))
            .with_context("alpha", Value::from(2));
        let keys: Vec<_> = report.context.unwrap().keys().cloned().collect();
        assert_eq!(keys, vec!["zeta", "alpha"]);
    }

    #[test]
    fn test_from_error_collects_chain() {
        #[derive(Debug, thiserror::Error)]
        #[error("outer failure")]
        struct Outer(#[source] std::io::Error);

        let err = Outer(std::io::Error::new(std::io::ErrorKind::Other, "disk gone"));
        let report = ErrorReport::from_error(&err, Some("worker"), 2000);
        assert_eq!(report.message, "outer failure");
        assert_eq!(report.stack.as_deref(), Some("caused by: disk gone"));
        assert_eq!(report.source.as_deref(), Some("worker"));
    }
}
