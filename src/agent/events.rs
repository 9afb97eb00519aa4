//! Native events produced by an agent run.

use futures::stream::BoxStream;
use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::error::Result;
use crate::types::FinishReason;

/// One event of a run, in production order.
///
/// An `Err` item on an [`AgentEventStream`] is fatal to the run; tool
/// failures are reported as [`AgentEvent::ToolError`] and the run continues.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum AgentEvent {
    StepStart,
    TextDelta {
        delta: String,
    },
    ToolCallStarted {
        call_id: String,
        tool_name: String,
    },
    ToolCallDelta {
        call_id: String,
        args_delta: String,
    },
    /// Arguments are complete and parsed.
    ToolCallReady {
        call_id: String,
        tool_name: String,
        input: Value,
    },
    ToolResult {
        call_id: String,
        output: Value,
    },
    ToolError {
        call_id: String,
        error: String,
    },
    StepFinish {
        reason: FinishReason,
    },
    Finish {
        reason: FinishReason,
    },
}

impl AgentEvent {
    pub fn text(delta: impl Into<String>) -> Self {
        Self::TextDelta {
            delta: delta.into(),
        }
    }

    pub fn tool_started(call_id: impl Into<String>, tool_name: impl Into<String>) -> Self {
        Self::ToolCallStarted {
            call_id: call_id.into(),
            tool_name: tool_name.into(),
        }
    }

    pub fn tool_delta(call_id: impl Into<String>, args_delta: impl Into<String>) -> Self {
        Self::ToolCallDelta {
            call_id: call_id.into(),
            args_delta: args_delta.into(),
        }
    }

    pub fn tool_result(call_id: impl Into<String>, output: Value) -> Self {
        Self::ToolResult {
            call_id: call_id.into(),
            output,
        }
    }

    pub fn tool_error(call_id: impl Into<String>, error: impl Into<String>) -> Self {
        Self::ToolError {
            call_id: call_id.into(),
            error: error.into(),
        }
    }

    pub fn finish(reason: FinishReason) -> Self {
        Self::Finish { reason }
    }
}

/// Lazy, forward-only, single-use event source of one run.
pub type AgentEventStream = BoxStream<'static, Result<AgentEvent>>;
