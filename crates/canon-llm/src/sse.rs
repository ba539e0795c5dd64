//! Decoding of the generation service's SSE-framed token stream.
//!
//! The upstream body arrives as arbitrary byte chunks containing
//! newline-terminated frames of the form `data: <json>`. Frames that are
//! blank, non-data, `[DONE]` markers, unparseable, or carry a non-text event
//! type are skipped; only `content_block_delta` / `text_delta` frames yield
//! text fragments.

/// Incremental line-oriented decoder for the upstream stream.
///
/// Bytes are buffered until a full line is available, so frames split across
/// chunk boundaries are handled transparently.
#[derive(Debug, Default)]
pub struct SseDecoder {
    buffer: Vec<u8>,
}

impl SseDecoder {
    pub fn new() -> Self {
        Self::default()
    }

    /// Feed one chunk of upstream bytes, returning any text fragments that
    /// completed with this chunk.
    pub fn feed(&mut self, chunk: &[u8]) -> Vec<String> {
        self.buffer.extend_from_slice(chunk);

        let mut fragments = Vec::new();
        while let Some(pos) = self.buffer.iter().position(|&b| b == b'\n') {
            let line: Vec<u8> = self.buffer.drain(..=pos).collect();
            let line = String::from_utf8_lossy(&line);
            if let Some(text) = parse_frame(line.trim_end()) {
                fragments.push(text);
            }
        }
        fragments
    }
}

/// Parse a single upstream frame into a text fragment.
///
/// Returns `None` for anything that should be skipped; malformed frames are
/// never an error (favor resilience over strictness for a chunked wire
/// format).
pub fn parse_frame(line: &str) -> Option<String> {
    let payload = line.strip_prefix("data: ")?.trim();
    if payload == "[DONE]" {
        return None;
    }

    let event: serde_json::Value = serde_json::from_str(payload).ok()?;
    if event["type"] == "content_block_delta" && event["delta"]["type"] == "text_delta" {
        event["delta"]["text"].as_str().map(String::from)
    } else {
        None
    }
}
