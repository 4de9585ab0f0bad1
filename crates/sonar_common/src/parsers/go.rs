//! Go runtime panics, including net/http's recovered handler panics.

use super::{LanguageParser, ParsedError};
use regex::Regex;
use std::sync::LazyLock;

// "2026/01/01 12:00:00 http: panic serving [::1]:8080: runtime error: ..."
static HTTP_PANIC_START: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"http: panic serving .+: ").unwrap());
static HTTP_PANIC_MESSAGE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"http: panic serving .+?: (.+)").unwrap());
// "main.main()", "net/http.(*conn).serve(...)"
static CALL_FRAME: LazyLock<Regex> = LazyLock::new(|| Regex::new(r"^\S+\.\S+\(").unwrap());

pub struct GoParser;

impl LanguageParser for GoParser {
    fn language(&self) -> &'static str {
        "go"
    }

    fn is_error_start(&self, line: &str) -> bool {
        line.starts_with("panic:") || HTTP_PANIC_START.is_match(line)
    }

    fn is_continuation(&self, line: &str, _lines_so_far: &[String]) -> bool {
        line.is_empty()
            || line.starts_with('\t')
            || line.starts_with("goroutine ")
            || line.starts_with("created by ")
            || CALL_FRAME.is_match(line)
    }

    fn parse(&self, lines: &[String]) -> ParsedError {
        let first = lines.first().map(String::as_str).unwrap_or("");

        let message = if let Some(caps) = HTTP_PANIC_MESSAGE.captures(first) {
            caps[1].to_string()
        } else if let Some(rest) = first.strip_prefix("panic: ") {
            rest.to_string()
        } else {
            first.to_string()
        };

        ParsedError::new(self.language(), "panic".to_string(), message, lines)
    }
}
