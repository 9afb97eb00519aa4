//! Thread-keyed, append-only conversation memory.
//!
//! The relay never writes here directly: the agent runtime reads a bounded
//! window before each invocation and appends what the invocation produced.
//! Older turns leave the active window but are never deleted.

mod file;
mod in_memory;

pub use file::FileMemoryStore;
pub use in_memory::InMemoryMemoryStore;

use std::collections::HashSet;

use async_trait::async_trait;

use crate::error::Result;
use crate::thread::ThreadId;
use crate::types::{ModelMessage, Role};

/// Storage contract for thread history.
///
/// Implementations serialize reads and writes for the same thread; distinct
/// threads may proceed concurrently.
#[async_trait]
pub trait MemoryStore: Send + Sync {
    /// The `window` most recent messages of a thread, oldest first.
    async fn recent(&self, thread_id: &ThreadId, window: usize) -> Result<Vec<ModelMessage>>;

    /// Append messages atomically, preserving their order.
    async fn append(&self, thread_id: &ThreadId, messages: Vec<ModelMessage>) -> Result<()>;

    /// Total number of stored messages for a thread.
    async fn len(&self, thread_id: &ThreadId) -> Result<usize>;
}

/// Make a truncated window safe to hand to a model.
///
/// A window cut can separate tool results from the assistant message that
/// requested them. Orphan results are dropped, and calls whose results fell
/// outside the window get a synthetic error result.
pub fn sanitize_window(messages: Vec<ModelMessage>) -> Vec<ModelMessage> {
    let mut out: Vec<ModelMessage> = Vec::with_capacity(messages.len());
    let mut open_calls: HashSet<String> = HashSet::new();

    let mut iter = messages.into_iter().peekable();
    while let Some(message) = iter.next() {
        match message.role {
            Role::Tool => {
                let Some(id) = message.tool_result_id() else {
                    continue;
                };
                if open_calls.remove(id) {
                    out.push(message);
                }
            }
            Role::Assistant => {
                close_open_calls(&mut out, &mut open_calls);
                open_calls.extend(message.tool_calls().into_iter().map(|c| c.id.clone()));
                out.push(message);
            }
            Role::User | Role::System => {
                close_open_calls(&mut out, &mut open_calls);
                out.push(message);
            }
        }
        if iter.peek().is_none() {
            close_open_calls(&mut out, &mut open_calls);
        }
    }

    out
}

fn close_open_calls(out: &mut Vec<ModelMessage>, open_calls: &mut HashSet<String>) {
    if open_calls.is_empty() {
        return;
    }
    let mut ids: Vec<String> = open_calls.drain().collect();
    ids.sort();
    for id in ids {
        out.push(ModelMessage::tool_result(
            id,
            serde_json::json!({ "error": "tool result missing from history" }),
            true,
        ));
    }
}

/// Start index of the last `window` items of a list of length `len`.
pub(crate) fn window_start(len: usize, window: usize) -> usize {
    len.saturating_sub(window)
}
