//! Segmentation engine - reconstructs error blocks from a line stream.
//!
//! The engine is either idle or has exactly one active parser with the lines
//! accumulated so far. A line that fails to continue the active block closes
//! it and is then evaluated again as a possible start, so one line can close
//! a block and open the next. Lines that start nothing while idle are dropped.

use crate::parsers::{default_registry, LanguageParser, ParsedError};
use tokio::io::{AsyncBufRead, AsyncBufReadExt};
use tracing::debug;

struct ActiveBlock {
    parser: usize,
    lines: Vec<String>,
}

pub struct Segmenter {
    parsers: Vec<Box<dyn LanguageParser>>,
    active: Option<ActiveBlock>,
}

impl Segmenter {
    /// Create an engine over parsers, tried in registration order
    pub fn new(parsers: Vec<Box<dyn LanguageParser>>) -> Self {
        Self {
            parsers,
            active: None,
        }
    }

    pub fn is_idle(&self) -> bool {
        self.active.is_none()
    }

    /// Feed one line; returns the block this line closed, if any
    pub fn push_line(&mut self, line: &str) -> Option<ParsedError> {
        let mut closed = None;

        if let Some(mut block) = self.active.take() {
            let parser = &self.parsers[block.parser];
            if parser.is_continuation(line, &block.lines) {
                block.lines.push(line.to_string());
                self.active = Some(block);
                return None;
            }
            closed = Some(parser.parse(&block.lines));
        }

        if let Some(index) = self.parsers.iter().position(|p| p.is_error_start(line)) {
            debug!("{} error block opened", self.parsers[index].language());
            self.active = Some(ActiveBlock {
                parser: index,
                lines: vec![line.to_string()],
            });
        }

        closed
    }

    /// End of stream: finalize whatever block is still open
    pub fn finish(&mut self) -> Option<ParsedError> {
        self.active
            .take()
            .map(|block| self.parsers[block.parser].parse(&block.lines))
    }

    /// Segment a finite set of lines, including the end-of-stream flush
    pub fn segment_all<'a, I>(&mut self, lines: I) -> Vec<ParsedError>
    where
        I: IntoIterator<Item = &'a str>,
    {
        let mut out: Vec<ParsedError> = lines
            .into_iter()
            .filter_map(|line| self.push_line(line))
            .collect();
        out.extend(self.finish());
        out
    }
}

impl Default for Segmenter {
    fn default() -> Self {
        Self::new(default_registry())
    }
}

/// Read one line, dropping the `\n` or `\r\n` terminator.
///
/// Invalid UTF-8 is replaced rather than reported, so binary noise on a
/// stream never ends it. Returns `None` at EOF.
pub async fn read_line_lossy<R>(reader: &mut R, buf: &mut Vec<u8>) -> std::io::Result<Option<String>>
where
    R: AsyncBufRead + Unpin,
{
    buf.clear();
    if reader.read_until(b'\n', buf).await? == 0 {
        return Ok(None);
    }
    if buf.last() == Some(&b'\n') {
        buf.pop();
        if buf.last() == Some(&b'\r') {
            buf.pop();
        }
    }
    Ok(Some(String::from_utf8_lossy(buf).into_owned()))
}

/// Drive a segmenter over an async line stream until EOF.
///
/// With `echo` set, every line is written to our own stderr so that
/// supervising a process does not swallow its diagnostics.
pub async fn drain_stream<R, F>(
    mut reader: R,
    segmenter: &mut Segmenter,
    echo: bool,
    mut emit: F,
) -> std::io::Result<usize>
where
    R: AsyncBufRead + Unpin,
    F: FnMut(ParsedError),
{
    let mut buf = Vec::new();
    let mut emitted = 0;

    while let Some(line) = read_line_lossy(&mut reader, &mut buf).await? {
        if echo {
            eprintln!("{}", line);
        }
        if let Some(parsed) = segmenter.push_line(&line) {
            emitted += 1;
            emit(parsed);
        }
    }

    if let Some(parsed) = segmenter.finish() {
        emitted += 1;
        emit(parsed);
    }

    Ok(emitted)
}
