//! Server-Sent Events framing, both directions.
//!
//! Outbound, every [`StreamEvent`] becomes one `data: <json>\n\n` frame and
//! the body ends with `data: [DONE]\n\n`. Inbound, [`SseDecoder`] turns an
//! arbitrary chunking of such a body back into frames. The same decoder reads
//! model provider streams.

use bytes::Bytes;

use super::protocol::StreamEvent;
use crate::error::{RelayError, Result};

/// Trailer sent after the last event.
pub const DONE_FRAME: &[u8] = b"data: [DONE]\n\n";

const DONE_MARKER: &str = "[DONE]";

/// Encode one event as an SSE frame.
pub fn encode_event(event: &StreamEvent) -> Result<Bytes> {
    let json = serde_json::to_string(event)?;
    Ok(Bytes::from(format!("data: {json}\n\n")))
}

pub fn done_frame() -> Bytes {
    Bytes::from_static(DONE_FRAME)
}

/// One dispatched SSE event.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SseFrame {
    Data(String),
    /// The `[DONE]` trailer.
    Done,
}

impl SseFrame {
    /// Parse the payload as a [`StreamEvent`]; `None` for the trailer.
    pub fn into_event(self) -> Result<Option<StreamEvent>> {
        match self {
            Self::Done => Ok(None),
            Self::Data(data) => serde_json::from_str(&data)
                .map(Some)
                .map_err(|e| RelayError::Stream(format!("undecodable event {data:?}: {e}"))),
        }
    }
}

/// Incremental SSE parser.
///
/// Bytes are buffered until a full line is present, so frames and multi-byte
/// characters split across chunks decode correctly.
#[derive(Debug, Default)]
pub struct SseDecoder {
    buffer: Vec<u8>,
    data_lines: Vec<String>,
}

impl SseDecoder {
    pub fn new() -> Self {
        Self::default()
    }

    /// Feed a chunk and collect every frame it completes.
    pub fn push(&mut self, chunk: &[u8]) -> Vec<SseFrame> {
        self.buffer.extend_from_slice(chunk);
        let mut frames = Vec::new();
        while let Some(pos) = self.buffer.iter().position(|b| *b == b'\n') {
            let line: Vec<u8> = self.buffer.drain(..=pos).collect();
            let line = String::from_utf8_lossy(&line);
            let line = line.trim_end_matches(['\n', '\r']);
            if let Some(frame) = self.process_line(line) {
                frames.push(frame);
            }
        }
        frames
    }

    /// Flush whatever is pending when the body ends without a blank line.
    pub fn finish(&mut self) -> Option<SseFrame> {
        if !self.buffer.is_empty() {
            let rest = std::mem::take(&mut self.buffer);
            let rest = String::from_utf8_lossy(&rest).trim_end_matches('\r').to_string();
            if let Some(frame) = self.process_line(&rest) {
                return Some(frame);
            }
        }
        self.dispatch()
    }

    fn process_line(&mut self, line: &str) -> Option<SseFrame> {
        if line.is_empty() {
            return self.dispatch();
        }
        if line.starts_with(':') {
            return None;
        }
        if let Some(value) = line.strip_prefix("data:") {
            self.data_lines
                .push(value.strip_prefix(' ').unwrap_or(value).to_string());
        }
        None
    }

    fn dispatch(&mut self) -> Option<SseFrame> {
        if self.data_lines.is_empty() {
            return None;
        }
        let data = self.data_lines.join("\n");
        self.data_lines.clear();
        if data == DONE_MARKER {
            Some(SseFrame::Done)
        } else {
            Some(SseFrame::Data(data))
        }
    }
}

/// Decode a complete body into events, stopping at the trailer.
pub fn decode_body(body: &[u8]) -> Result<Vec<StreamEvent>> {
    let mut decoder = SseDecoder::new();
    let mut frames = decoder.push(body);
    frames.extend(decoder.finish());

    let mut events = Vec::new();
    for frame in frames {
        match frame.into_event()? {
            Some(event) => events.push(event),
            None => break,
        }
    }
    Ok(events)
}
