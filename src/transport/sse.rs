//! Incremental `data:` line decoding for `text/event-stream` bodies
//!
//! Bytes are buffered until a `\n` boundary before being decoded as UTF-8,
//! so frames and multi-byte characters split across network chunks are
//! reassembled correctly.

/// Prefix marking a frame line.
pub const DATA_PREFIX: &str = "data:";

/// Splits a byte stream into complete text lines.
///
/// # Examples
///
/// ```
/// use chatstream::transport::sse::SseLineDecoder;
///
/// let mut decoder = SseLineDecoder::default();
/// assert!(decoder.push(b"data: {\"type\"").is_empty());
/// let lines = decoder.push(b":\"text\"}\n\n");
/// assert_eq!(lines, vec!["data: {\"type\":\"text\"}".to_string(), String::new()]);
/// ```
#[derive(Debug, Default)]
pub struct SseLineDecoder {
    buffer: Vec<u8>,
}

impl SseLineDecoder {
    /// Feed a chunk and return every line it completed, without the
    /// trailing `\n` / `\r\n`.
    pub fn push(&mut self, chunk: &[u8]) -> Vec<String> {
        self.buffer.extend_from_slice(chunk);

        let mut lines = Vec::new();
        while let Some(pos) = self.buffer.iter().position(|b| *b == b'\n') {
            let mut line: Vec<u8> = self.buffer.drain(..=pos).collect();
            line.pop();
            if line.last() == Some(&b'\r') {
                line.pop();
            }
            lines.push(String::from_utf8_lossy(&line).into_owned());
        }
        lines
    }

    /// Flush a trailing line that was not newline-terminated.
    pub fn finish(&mut self) -> Option<String> {
        if self.buffer.is_empty() {
            return None;
        }
        let rest = std::mem::take(&mut self.buffer);
        let text = String::from_utf8_lossy(&rest);
        let text = text.strip_suffix('\r').unwrap_or(&text);
        Some(text.to_string())
    }

    /// Bytes buffered but not yet returned as a line.
    pub fn pending_len(&self) -> usize {
        self.buffer.len()
    }
}

/// Extract the JSON payload of a frame line.
///
/// Returns `None` for lines that do not carry the `data:` marker
/// (comments, `event:`/`id:` fields, blank separators).
///
/// # Examples
///
/// ```
/// use chatstream::transport::sse::frame_payload;
///
/// assert_eq!(frame_payload("data: {}"), Some("{}"));
/// assert_eq!(frame_payload(": keep-alive"), None);
/// ```
pub fn frame_payload(line: &str) -> Option<&str> {
    line.strip_prefix(DATA_PREFIX).map(str::trim_start)
}
