//! Dart VM and Flutter diagnostics.
//!
//! Four block shapes are recognized, each with its own continuation rule:
//! - `Unhandled exception:` from the Dart VM
//! - Flutter's `═══ Exception caught by <library> ═══` banner dumps
//! - compiler errors (`lib/main.dart:10:5: Error: ...`)
//! - `Hot reload was rejected:`

use super::{LanguageParser, ParsedError, UNKNOWN_ERROR};
use regex::Regex;
use std::sync::LazyLock;

const UNHANDLED: &str = "Unhandled exception:";
const HOT_RELOAD: &str = "Hot reload was rejected:";

static BANNER_START: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"^═+ Exception caught by .+ ═+$").unwrap());
static BANNER_OPEN: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"^═+ Exception caught by").unwrap());
static BANNER_LIBRARY: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"Exception caught by (.+?) ═").unwrap());
static SEPARATOR: LazyLock<Regex> = LazyLock::new(|| Regex::new(r"^═{10,}$").unwrap());
static COMPILE_ERROR: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"^\S+\.dart:\d+:\d+: Error:").unwrap());
static COMPILE_MESSAGE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"^\S+\.dart:\d+:\d+: Error: (.+)").unwrap());
static FRAME: LazyLock<Regex> = LazyLock::new(|| Regex::new(r"^#\d+\s+").unwrap());
static DETAIL: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"^(Receiver|Tried calling):").unwrap());
static INDENTED: LazyLock<Regex> = LazyLock::new(|| Regex::new(r"^\s{2,}").unwrap());
static CARET: LazyLock<Regex> = LazyLock::new(|| Regex::new(r"^\s*\^+\s*$").unwrap());

pub struct DartParser;

impl LanguageParser for DartParser {
    fn language(&self) -> &'static str {
        "dart"
    }

    fn is_error_start(&self, line: &str) -> bool {
        line == UNHANDLED
            || BANNER_START.is_match(line)
            || COMPILE_ERROR.is_match(line)
            || line == HOT_RELOAD
    }

    fn is_continuation(&self, line: &str, lines_so_far: &[String]) -> bool {
        let first = lines_so_far.first().map(String::as_str).unwrap_or("");
        let last = lines_so_far.last().map(String::as_str).unwrap_or("");

        if BANNER_OPEN.is_match(first) {
            // Closed once the first separator-only line has been consumed
            return !lines_so_far.iter().skip(1).any(|l| SEPARATOR.is_match(l));
        }

        if first == UNHANDLED {
            if FRAME.is_match(line) || DETAIL.is_match(line) {
                return true;
            }
            if lines_so_far.len() < 3 {
                return true;
            }
            return line.is_empty() && FRAME.is_match(last);
        }

        if COMPILE_ERROR.is_match(first) || first == HOT_RELOAD {
            if INDENTED.is_match(line) || CARET.is_match(line) {
                return true;
            }
            return line.is_empty() && !last.trim().is_empty();
        }

        false
    }

    fn parse(&self, lines: &[String]) -> ParsedError {
        let first = lines.first().map(String::as_str).unwrap_or("");

        let (error_type, message) = if BANNER_OPEN.is_match(first) {
            let library = BANNER_LIBRARY
                .captures(first)
                .map(|c| c[1].to_string())
                .unwrap_or_else(|| "unknown library".to_string());

            let message = lines
                .iter()
                .skip(1)
                .take_while(|l| !SEPARATOR.is_match(l) && !FRAME.is_match(l))
                .map(|l| l.trim())
                .filter(|l| !l.is_empty())
                .collect::<Vec<_>>()
                .join(" ");

            (format!("FlutterError ({})", library), message)
        } else if first == UNHANDLED {
            let error_line = lines.get(1).map(|l| l.trim()).unwrap_or("");
            match error_line.split_once(": ") {
                Some((kind, msg)) => (kind.to_string(), msg.to_string()),
                None if error_line.is_empty() => (UNKNOWN_ERROR.to_string(), String::new()),
                None => (error_line.to_string(), String::new()),
            }
        } else if COMPILE_ERROR.is_match(first) {
            let message = COMPILE_MESSAGE
                .captures(first)
                .map(|c| c[1].to_string())
                .unwrap_or_else(|| first.to_string());
            ("CompileError".to_string(), message)
        } else if first == HOT_RELOAD {
            let message = lines
                .iter()
                .skip(1)
                .map(|l| l.trim())
                .filter(|l| !l.is_empty())
                .collect::<Vec<_>>()
                .join(" ");
            ("HotReloadRejected".to_string(), message)
        } else {
            (UNKNOWN_ERROR.to_string(), String::new())
        };

        ParsedError::new(self.language(), error_type, message, lines)
    }
}
