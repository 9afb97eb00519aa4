//! Convenience re-exports for common use.

pub use crate::agent::{AgentEvent, AgentEventStream, AgentInvoker, AgentRegistry, AgentRuntime, LoopAgent};
pub use crate::client::{ChatClient, ChatStatus, Reassembler};
pub use crate::config::{RelayConfig, RunConfig};
pub use crate::error::{RelayError, Result};
pub use crate::memory::{InMemoryMemoryStore, MemoryStore};
pub use crate::stream::{StreamEvent, StreamMultiplexer};
pub use crate::thread::{Principal, ThreadId, ThreadIdResolver};
pub use crate::tools::{AgentTool, AgentToolParameters, Tool, ToolArguments};
pub use crate::types::{FinishReason, ModelMessage, Role, UiMessage, UiPart, ToolState};
