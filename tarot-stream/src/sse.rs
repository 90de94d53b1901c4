//! Server-Sent Events (SSE) line and frame handling.
//!
//! The chat-completions stream is line oriented: every `data: ` line carries
//! one complete JSON payload, and a `data: [DONE]` line marks the logical end
//! of content. This module turns decoded text into lines and lines into
//! [`Frame`]s; it knows nothing about the transport or JSON payloads.

use crate::error::{StreamError, StreamResult};
use serde::Serialize;

/// Prefix of an event-data line.
pub const DATA_PREFIX: &str = "data: ";

/// Payload marking the end of the content stream.
pub const DONE_SENTINEL: &str = "[DONE]";

/// Default upper bound for the unterminated tail of the decode buffer.
pub const DEFAULT_MAX_BUFFER_SIZE: usize = 10 * 1024 * 1024;

/// One `data: ` line of the stream.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Frame {
    /// A payload, with the `data: ` prefix removed.
    Data(String),
    /// The `[DONE]` sentinel.
    Done,
}

impl Frame {
    /// Check if this is the termination sentinel.
    pub fn is_done(&self) -> bool {
        matches!(self, Self::Done)
    }

    /// Payload of a data frame.
    pub fn payload(&self) -> Option<&str> {
        match self {
            Self::Data(data) => Some(data),
            Self::Done => None,
        }
    }
}

/// Classify a single line.
///
/// Returns `None` for blank lines, `:` comments and any line that is not a
/// `data: ` line. The line is trimmed first, so `\r\n` terminators are fine.
pub fn parse_line(line: &str) -> Option<Frame> {
    let line = line.trim();
    if line.is_empty() || line.starts_with(':') {
        return None;
    }

    let payload = line.strip_prefix(DATA_PREFIX)?;
    if payload == DONE_SENTINEL {
        Some(Frame::Done)
    } else {
        Some(Frame::Data(payload.to_string()))
    }
}

/// Accumulates decoded text and hands out complete lines.
///
/// Holds exactly the text that has not yet been seen to end in `\n`.
#[derive(Debug)]
pub struct LineBuffer {
    buffer: String,
    max_size: usize,
}

impl Default for LineBuffer {
    fn default() -> Self {
        Self::new()
    }
}

impl LineBuffer {
    /// Create an empty buffer with the default size limit.
    #[must_use]
    pub fn new() -> Self {
        Self::with_max_size(DEFAULT_MAX_BUFFER_SIZE)
    }

    /// Create an empty buffer with a custom size limit.
    #[must_use]
    pub fn with_max_size(max_size: usize) -> Self {
        Self {
            buffer: String::new(),
            max_size,
        }
    }

    /// Append text and return every line it completed, in order.
    ///
    /// Fails if the unterminated remainder grows past the size limit.
    pub fn push(&mut self, text: &str) -> StreamResult<Vec<String>> {
        // The buffered part never contains '\n', so only the new text is scanned.
        let start = self.buffer.len();
        self.buffer.push_str(text);

        let lines = match text.rfind('\n') {
            Some(pos) => {
                let last = start + pos;
                let rest = self.buffer.split_off(last + 1);
                let complete = std::mem::replace(&mut self.buffer, rest);
                complete[..last].split('\n').map(str::to_owned).collect()
            }
            None => Vec::new(),
        };

        if self.buffer.len() > self.max_size {
            return Err(StreamError::BufferOverflow {
                limit: self.max_size,
            });
        }

        Ok(lines)
    }

    /// Take whatever is left, for the end-of-stream pass.
    pub fn take_remainder(&mut self) -> String {
        std::mem::take(&mut self.buffer)
    }

    /// Length of the buffered partial line in bytes.
    pub fn len(&self) -> usize {
        self.buffer.len()
    }

    /// Check if no partial line is buffered.
    pub fn is_empty(&self) -> bool {
        self.buffer.is_empty()
    }

    /// Clear the buffer.
    pub fn clear(&mut self) {
        self.buffer.clear();
    }
}

/// Encode a payload as one SSE frame (`data: <json>\n\n`).
pub fn format_sse<T: Serialize + ?Sized>(payload: &T) -> StreamResult<String> {
    Ok(format!("{DATA_PREFIX}{}\n\n", serde_json::to_string(payload)?))
}

/// The encoded termination frame.
pub fn format_done() -> String {
    format!("{DATA_PREFIX}{DONE_SENTINEL}\n\n")
}

#[cfg(test)]
mod tests {
    use super::*;
    use rstest::rstest;

    #[rstest]
    #[case("", None)]
    #[case("   ", None)]
    #[case(": keep-alive", None)]
    #[case("event: message", None)]
    #[case("data:{\"a\":1}", None)]
    #[case("data: [DONE]", Some(Frame::Done))]
    #[case("data: [DONE]\r", Some(Frame::Done))]
    #[case("  data: {\"a\":1}  ", Some(Frame::Data("{\"a\":1}".into())))]
    #[case("data: hello", Some(Frame::Data("hello".into())))]
    fn test_parse_line(#[case] line: &str, #[case] expected: Option<Frame>) {
        assert_eq!(parse_line(line), expected);
    }

    #[test]
    fn test_line_buffer_keeps_partial_line() {
        let mut buffer = LineBuffer::new();
        assert!(buffer.push("data: hel").unwrap().is_empty());
        assert_eq!(buffer.len(), 9);

        let lines = buffer.push("lo\n\ndata: wor").unwrap();
        assert_eq!(lines, vec!["data: hello".to_string(), String::new()]);
        assert_eq!(buffer.take_remainder(), "data: wor");
        assert!(buffer.is_empty());
    }

    #[test]
    fn test_line_buffer_long_line_in_small_pieces() {
        let mut buffer = LineBuffer::new();
        for _ in 0..10_000 {
            assert!(buffer.push("abcdefgh").unwrap().is_empty());
        }
        assert_eq!(buffer.len(), 80_000);

        let lines = buffer.push("ij\nnext\npart").unwrap();
        assert_eq!(lines.len(), 2);
        assert_eq!(lines[0].len(), 80_002);
        assert!(lines[0].ends_with("hij"));
        assert_eq!(lines[1], "next");
        assert_eq!(buffer.take_remainder(), "part");
    }

    #[test]
    fn test_line_buffer_overflow() {
        let mut buffer = LineBuffer::with_max_size(8);
        // Complete lines do not count against the limit.
        assert_eq!(buffer.push("0123456789abcdef\n").unwrap().len(), 1);

        let err = buffer.push("0123456789").unwrap_err();
        assert!(matches!(err, StreamError::BufferOverflow { limit: 8 }));
    }

    #[test]
    fn test_format_sse() {
        let frame = format_sse(&serde_json::json!({"content": "hi"})).unwrap();
        assert_eq!(frame, "data: {\"content\":\"hi\"}\n\n");

        let line = frame.lines().next().unwrap();
        assert_eq!(parse_line(line).unwrap().payload(), Some("{\"content\":\"hi\"}"));
        assert!(parse_line(format_done().trim()).unwrap().is_done());
    }
}
