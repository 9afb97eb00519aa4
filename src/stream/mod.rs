//! Client-facing event stream: protocol, per-message multiplexing, SSE
//! framing, and the backpressured relay loop.

pub mod multiplexer;
pub mod protocol;
pub mod relay;
pub mod sse;

pub use multiplexer::StreamMultiplexer;
pub use protocol::StreamEvent;
pub use relay::{pump, spawn_relay, RelayOutcome, RelaySettings};
pub use sse::{decode_body, encode_event, SseDecoder, SseFrame};
