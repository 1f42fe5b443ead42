//! Incremental decoder for server-sent completion chunks.
//!
//! Network reads can end anywhere: inside a `data:` line, inside a JSON
//! object, or in the middle of a multi-byte UTF-8 character. The decoder
//! keeps raw bytes until a full line is available and only then decodes it,
//! so the fragments produced do not depend on where the reads were split.
//!
//! Providers normally put each JSON chunk on a single `data:` line. An event
//! whose payload is spread over several `data:` lines is joined with `\n`
//! until the payload parses or the blank line closing the event arrives.

use memchr::memchr;
use tracing::{debug, trace};

use crate::api::{extract_error_summary, format_api_error, ChatCompletionChunk};
use crate::core::error::CompletionError;

pub const DONE_SENTINEL: &str = "[DONE]";

/// One decoded piece of model output.
///
/// The final fragment has empty text and `is_final == true`; it is the only
/// authoritative end-of-response signal.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Fragment {
    pub text: String,
    pub is_final: bool,
}

impl Fragment {
    pub fn text(text: impl Into<String>) -> Self {
        Self {
            text: text.into(),
            is_final: false,
        }
    }

    pub fn terminal() -> Self {
        Self {
            text: String::new(),
            is_final: true,
        }
    }
}

pub type DecodeResult = Result<Fragment, CompletionError>;

#[derive(Debug, Default)]
pub struct StreamDecoder {
    buffer: Vec<u8>,
    event_data: String,
    at_eof: bool,
    full_text: String,
    finished: bool,
    fragments: usize,
}

impl StreamDecoder {
    pub fn new() -> Self {
        Self::default()
    }

    /// Feed one network read. Returns every fragment (or decode error)
    /// completed by this read, in order. After the terminal fragment or an
    /// error the decoder is closed and further input is ignored.
    pub fn feed(&mut self, chunk: &[u8]) -> Vec<DecodeResult> {
        if self.finished {
            return Vec::new();
        }
        self.buffer.extend_from_slice(chunk);

        let mut results = Vec::new();
        while !self.finished {
            let Some(newline_pos) = memchr(b'\n', &self.buffer) else {
                break;
            };
            let line: Vec<u8> = self.buffer.drain(..=newline_pos).collect();
            if let Some(result) = self.decode_line(&line[..newline_pos]) {
                results.push(result);
            }
        }
        if self.finished {
            self.buffer.clear();
        }
        results
    }

    /// Flush input left over at EOF. Does not invent a terminal fragment:
    /// reaching EOF is not the same as completion. A trailing line that
    /// does not decode on its own, or an event still waiting for more
    /// `data:` lines, means the body was cut off and is reported as
    /// `Network`.
    pub fn finish(&mut self) -> Vec<DecodeResult> {
        if self.finished {
            self.buffer.clear();
            return Vec::new();
        }
        let line = std::mem::take(&mut self.buffer);
        self.at_eof = true;
        let mut results: Vec<DecodeResult> = self.decode_line(&line).into_iter().collect();
        if !self.finished && !self.event_data.is_empty() {
            results.push(self.truncated());
        }
        results
    }

    pub fn is_finished(&self) -> bool {
        self.finished
    }

    pub fn full_text(&self) -> &str {
        &self.full_text
    }

    /// Text fragments decoded so far, the terminal fragment excluded.
    pub fn fragment_count(&self) -> usize {
        self.fragments
    }

    fn decode_line(&mut self, raw: &[u8]) -> Option<DecodeResult> {
        let line = match std::str::from_utf8(raw) {
            Ok(line) => line.trim(),
            Err(_) if self.at_eof => return Some(self.truncated()),
            Err(err) => {
                return Some(self.fail(CompletionError::InvalidResponse(format!(
                    "invalid UTF-8 in stream: {err}"
                ))));
            }
        };

        if line.is_empty() {
            if self.at_eof {
                return None;
            }
            return self.end_event();
        }
        if line.starts_with(':') {
            return None;
        }
        let Some(payload) = extract_data_payload(line) else {
            trace!(line, "Ignoring non-data stream line");
            return None;
        };

        if self.event_data.is_empty() {
            if payload == DONE_SENTINEL {
                debug!(fragments = self.fragments, "Stream completion marker received");
                self.finished = true;
                return Some(Ok(Fragment::terminal()));
            }
            if payload.is_empty() {
                return None;
            }
        } else {
            self.event_data.push('\n');
        }
        self.event_data.push_str(payload);

        match serde_json::from_str::<serde_json::Value>(&self.event_data) {
            Ok(value) => {
                let payload = std::mem::take(&mut self.event_data);
                self.decode_payload(&payload, value)
            }
            // Incomplete JSON: wait for another data line of the same event.
            Err(err) if err.is_eof() => None,
            Err(_) => Some(self.malformed()),
        }
    }

    /// A blank line closes the event; any payload still pending never parsed.
    fn end_event(&mut self) -> Option<DecodeResult> {
        if self.event_data.is_empty() {
            None
        } else {
            Some(self.malformed())
        }
    }

    fn decode_payload(&mut self, payload: &str, value: serde_json::Value) -> Option<DecodeResult> {
        if let Some(summary) = value.get("error").and_then(|_| extract_error_summary(&value)) {
            return Some(self.fail(CompletionError::InvalidResponse(format!(
                "API error in stream: {summary}"
            ))));
        }
        match serde_json::from_value::<ChatCompletionChunk>(value) {
            Ok(chunk) => {
                let content = chunk.first_delta().filter(|content| !content.is_empty())?;
                self.full_text.push_str(content);
                self.fragments += 1;
                Some(Ok(Fragment::text(content)))
            }
            Err(_) => Some(self.fail(CompletionError::InvalidResponse(format!(
                "malformed stream chunk: {}",
                format_api_error(payload)
            )))),
        }
    }

    fn malformed(&mut self) -> DecodeResult {
        if self.at_eof {
            return self.truncated();
        }
        let payload = std::mem::take(&mut self.event_data);
        self.fail(CompletionError::InvalidResponse(format!(
            "malformed stream chunk: {}",
            format_api_error(&payload)
        )))
    }

    fn truncated(&mut self) -> DecodeResult {
        self.event_data.clear();
        debug!(fragments = self.fragments, "Stream body ended mid-event");
        self.fail(CompletionError::Network("stream ended mid-event".to_string()))
    }

    fn fail(&mut self, err: CompletionError) -> DecodeResult {
        self.finished = true;
        Err(err)
    }
}

fn extract_data_payload(line: &str) -> Option<&str> {
    line.strip_prefix("data:").map(str::trim)
}
