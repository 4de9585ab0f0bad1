//! Rust panics from the default panic hook.

use super::{LanguageParser, ParsedError};
use regex::Regex;
use std::sync::LazyLock;

static PANIC_START: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"^thread '[^']*' panicked at").unwrap());
// Before 1.73 the message was quoted inline: panicked at 'msg', src/main.rs:4:5
static LEGACY_MESSAGE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"panicked at '(.*)', \S+$").unwrap());

pub struct RustParser;

impl LanguageParser for RustParser {
    fn language(&self) -> &'static str {
        "rust"
    }

    fn is_error_start(&self, line: &str) -> bool {
        PANIC_START.is_match(line)
    }

    fn is_continuation(&self, line: &str, lines_so_far: &[String]) -> bool {
        let header_open = lines_so_far.len() == 1
            && lines_so_far.first().is_some_and(|l| l.ends_with(':'));

        header_open
            || line.starts_with("note: ")
            || line == "stack backtrace:"
            || line.starts_with(' ')
            || line.starts_with('\t')
    }

    fn parse(&self, lines: &[String]) -> ParsedError {
        let first = lines.first().map(String::as_str).unwrap_or("");

        let message = if let Some(caps) = LEGACY_MESSAGE.captures(first) {
            caps[1].to_string()
        } else if first.ends_with(':') && lines.len() > 1 {
            lines[1].trim().to_string()
        } else {
            first
                .split_once("panicked at ")
                .map(|(_, rest)| rest.to_string())
                .unwrap_or_else(|| first.to_string())
        };

        ParsedError::new(self.language(), "panic".to_string(), message, lines)
    }
}
