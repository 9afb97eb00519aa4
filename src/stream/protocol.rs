//! Client-facing stream events (UI message stream protocol, v1).
//!
//! Each event describes one mutation of the client's message state. Events
//! for a message arrive in application order; clients never reorder.

use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::types::FinishReason;

/// Response header announcing the protocol version.
pub const PROTOCOL_HEADER: &str = "x-vercel-ai-ui-message-stream";
pub const PROTOCOL_VERSION: &str = "v1";

/// One wire-level event.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "kebab-case")]
pub enum StreamEvent {
    /// Opens a new assistant message.
    #[serde(rename = "start", alias = "message-start")]
    MessageStart {
        #[serde(rename = "messageId", default, skip_serializing_if = "Option::is_none")]
        message_id: Option<String>,
    },

    TextStart {
        id: String,
    },

    /// Only the new fragment; clients concatenate.
    TextDelta {
        id: String,
        delta: String,
    },

    TextEnd {
        id: String,
    },

    ToolInputStart {
        #[serde(rename = "toolCallId")]
        tool_call_id: String,
        #[serde(rename = "toolName")]
        tool_name: String,
    },

    ToolInputDelta {
        #[serde(rename = "toolCallId")]
        tool_call_id: String,
        #[serde(rename = "inputTextDelta")]
        input_text_delta: String,
    },

    ToolInputAvailable {
        #[serde(rename = "toolCallId")]
        tool_call_id: String,
        #[serde(rename = "toolName")]
        tool_name: String,
        input: Value,
    },

    ToolOutputAvailable {
        #[serde(rename = "toolCallId")]
        tool_call_id: String,
        output: Value,
    },

    ToolOutputError {
        #[serde(rename = "toolCallId")]
        tool_call_id: String,
        #[serde(rename = "errorText")]
        error_text: String,
    },

    StartStep,

    FinishStep,

    /// Closes the message.
    #[serde(rename = "finish", alias = "message-end")]
    MessageEnd {
        #[serde(rename = "finishReason", default, skip_serializing_if = "Option::is_none")]
        finish_reason: Option<FinishReason>,
    },

    /// The run failed as a whole.
    Error {
        #[serde(rename = "errorText")]
        error_text: String,
    },
}

impl StreamEvent {
    pub fn message_start(message_id: impl Into<String>) -> Self {
        Self::MessageStart {
            message_id: Some(message_id.into()),
        }
    }

    pub fn text_start(id: impl Into<String>) -> Self {
        Self::TextStart { id: id.into() }
    }

    pub fn text_delta(id: impl Into<String>, delta: impl Into<String>) -> Self {
        Self::TextDelta {
            id: id.into(),
            delta: delta.into(),
        }
    }

    pub fn text_end(id: impl Into<String>) -> Self {
        Self::TextEnd { id: id.into() }
    }

    pub fn tool_input_start(tool_call_id: impl Into<String>, tool_name: impl Into<String>) -> Self {
        Self::ToolInputStart {
            tool_call_id: tool_call_id.into(),
            tool_name: tool_name.into(),
        }
    }

    pub fn tool_input_delta(tool_call_id: impl Into<String>, delta: impl Into<String>) -> Self {
        Self::ToolInputDelta {
            tool_call_id: tool_call_id.into(),
            input_text_delta: delta.into(),
        }
    }

    pub fn tool_input_available(
        tool_call_id: impl Into<String>,
        tool_name: impl Into<String>,
        input: Value,
    ) -> Self {
        Self::ToolInputAvailable {
            tool_call_id: tool_call_id.into(),
            tool_name: tool_name.into(),
            input,
        }
    }

    pub fn tool_output_available(tool_call_id: impl Into<String>, output: Value) -> Self {
        Self::ToolOutputAvailable {
            tool_call_id: tool_call_id.into(),
            output,
        }
    }

    pub fn tool_output_error(tool_call_id: impl Into<String>, error_text: impl Into<String>) -> Self {
        Self::ToolOutputError {
            tool_call_id: tool_call_id.into(),
            error_text: error_text.into(),
        }
    }

    pub fn message_end(finish_reason: Option<FinishReason>) -> Self {
        Self::MessageEnd { finish_reason }
    }

    pub fn error(error_text: impl Into<String>) -> Self {
        Self::Error {
            error_text: error_text.into(),
        }
    }

    /// `finish` and `error` close the stream; nothing may follow them.
    pub fn is_terminal(&self) -> bool {
        matches!(self, Self::MessageEnd { .. } | Self::Error { .. })
    }

    /// Wire name of the event type.
    pub fn kind(&self) -> &'static str {
        match self {
            Self::MessageStart { .. } => "start",
            Self::TextStart { .. } => "text-start",
            Self::TextDelta { .. } => "text-delta",
            Self::TextEnd { .. } => "text-end",
            Self::ToolInputStart { .. } => "tool-input-start",
            Self::ToolInputDelta { .. } => "tool-input-delta",
            Self::ToolInputAvailable { .. } => "tool-input-available",
            Self::ToolOutputAvailable { .. } => "tool-output-available",
            Self::ToolOutputError { .. } => "tool-output-error",
            Self::StartStep => "start-step",
            Self::FinishStep => "finish-step",
            Self::MessageEnd { .. } => "finish",
            Self::Error { .. } => "error",
        }
    }
}
