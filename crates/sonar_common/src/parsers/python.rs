//! CPython tracebacks.

use super::{LanguageParser, ParsedError, UNKNOWN_ERROR};

const TRACEBACK: &str = "Traceback (most recent call last):";

fn is_indented(line: &str) -> bool {
    line.starts_with(' ') || line.starts_with('\t')
}

pub struct PythonParser;

impl LanguageParser for PythonParser {
    fn language(&self) -> &'static str {
        "python"
    }

    fn is_error_start(&self, line: &str) -> bool {
        line == TRACEBACK
    }

    fn is_continuation(&self, line: &str, lines_so_far: &[String]) -> bool {
        if is_indented(line) {
            return true;
        }
        // The exception line directly follows the last indented frame line
        let last = lines_so_far.last().map(String::as_str).unwrap_or("");
        !line.is_empty() && is_indented(last)
    }

    fn parse(&self, lines: &[String]) -> ParsedError {
        let exception_line = lines
            .iter()
            .skip(1)
            .rev()
            .map(|l| l.trim_end())
            .find(|l| !l.is_empty() && !is_indented(l))
            .unwrap_or("");

        let (error_type, message) = match exception_line.split_once(": ") {
            Some((kind, msg)) => (kind.to_string(), msg.to_string()),
            None if exception_line.is_empty() => (UNKNOWN_ERROR.to_string(), String::new()),
            None => (exception_line.to_string(), String::new()),
        };

        ParsedError::new(self.language(), error_type, message, lines)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::parsers::lines;

    #[test]
    fn test_traceback_block() {
        let p = PythonParser;
        let stream = [
            TRACEBACK,
            "  File \"/app/main.py\", line 3, in <module>",
            "    print(1 / 0)",
            "ZeroDivisionError: division by zero",
            "next output line",
        ];
        assert!(p.is_error_start(stream[0]));

        let mut acc = vec![stream[0].to_string()];
        for line in &stream[1..] {
            if !p.is_continuation(line, &acc) {
                break;
            }
            acc.push(line.to_string());
        }
        assert_eq!(acc.len(), 4);

        let parsed = p.parse(&acc);
        assert_eq!(parsed.error_type, "ZeroDivisionError");
        assert_eq!(parsed.message, "division by zero");
    }

    #[test]
    fn test_bare_exception_name() {
        let parsed = PythonParser.parse(&lines(&[TRACEBACK, "  File \"x.py\", line 1", "KeyboardInterrupt"]));
        assert_eq!(parsed.error_type, "KeyboardInterrupt");
        assert_eq!(parsed.message, "");
    }

    #[test]
    fn test_truncated_traceback_is_unknown() {
        let parsed = PythonParser.parse(&lines(&[TRACEBACK]));
        assert_eq!(parsed.error_type, UNKNOWN_ERROR);
    }
}
