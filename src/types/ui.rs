//! Client-facing message model: what a chat UI renders.
//!
//! A [`UiMessage`] is an ordered list of [`UiPart`]s. Text parts grow as deltas
//! arrive; tool-invocation parts move through [`ToolState`].

use serde::{Deserialize, Serialize};
use serde_json::Value;
use strum::{Display, EnumString};

use super::message::{ContentPart, ModelMessage, Role};

/// Role of a rendered message.
#[derive(
    Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, Display, EnumString,
)]
#[serde(rename_all = "lowercase")]
#[strum(serialize_all = "lowercase")]
pub enum UiRole {
    System,
    User,
    Assistant,
    Tool,
}

/// Streaming state of a text part.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum TextState {
    Streaming,
    Done,
}

/// Lifecycle of a tool-invocation part.
///
/// `input-streaming → input-available → output-available | output-error`.
/// The last two are terminal.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Display, EnumString)]
#[serde(rename_all = "kebab-case")]
#[strum(serialize_all = "kebab-case")]
pub enum ToolState {
    InputStreaming,
    InputAvailable,
    OutputAvailable,
    OutputError,
}

impl ToolState {
    pub fn is_terminal(self) -> bool {
        matches!(self, Self::OutputAvailable | Self::OutputError)
    }
}

/// One renderable unit within a message.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "kebab-case")]
pub enum UiPart {
    Text {
        text: String,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        state: Option<TextState>,
    },

    #[serde(rename = "tool-invocation")]
    Tool {
        #[serde(rename = "toolCallId")]
        tool_call_id: String,
        #[serde(rename = "toolName")]
        tool_name: String,
        state: ToolState,
        /// Raw input text accumulated while the input is still streaming.
        #[serde(rename = "inputText", default, skip_serializing_if = "String::is_empty")]
        input_text: String,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        input: Option<Value>,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        output: Option<Value>,
        #[serde(rename = "errorText", default, skip_serializing_if = "Option::is_none")]
        error_text: Option<String>,
    },

    StepStart,
}

impl UiPart {
    /// A finished text part.
    pub fn text(text: impl Into<String>) -> Self {
        Self::Text {
            text: text.into(),
            state: Some(TextState::Done),
        }
    }

    /// Text content if this is a text part.
    pub fn as_text(&self) -> Option<&str> {
        match self {
            Self::Text { text, .. } => Some(text),
            _ => None,
        }
    }
}

/// A message as exchanged with and rendered by the client.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct UiMessage {
    #[serde(default)]
    pub id: String,
    pub role: UiRole,
    #[serde(default)]
    pub parts: Vec<UiPart>,
    /// Legacy flat content some clients still send instead of parts.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub content: Option<String>,
}

impl UiMessage {
    pub fn new(id: impl Into<String>, role: UiRole) -> Self {
        Self {
            id: id.into(),
            role,
            parts: Vec::new(),
            content: None,
        }
    }

    /// Create a user message with a single text part.
    pub fn user(id: impl Into<String>, text: impl Into<String>) -> Self {
        let mut message = Self::new(id, UiRole::User);
        message.parts.push(UiPart::text(text));
        message
    }

    /// All text parts concatenated.
    pub fn text_content(&self) -> String {
        self.parts
            .iter()
            .filter_map(UiPart::as_text)
            .collect::<Vec<_>>()
            .join("")
    }

    /// Find a tool part by call id.
    pub fn tool_part(&self, tool_call_id: &str) -> Option<&UiPart> {
        self.parts.iter().find(|part| {
            matches!(part, UiPart::Tool { tool_call_id: id, .. } if id == tool_call_id)
        })
    }
}

/// Render stored history the way a live stream would have assembled it.
///
/// Consecutive assistant and tool messages belong to one run and fold into a
/// single assistant message; tool results settle the matching tool part.
/// System messages are not rendered.
pub fn ui_messages_from_history(history: &[ModelMessage]) -> Vec<UiMessage> {
    let mut out: Vec<UiMessage> = Vec::new();
    let mut in_run = false;

    for (index, message) in history.iter().enumerate() {
        match message.role {
            Role::System => {}
            Role::User => {
                out.push(UiMessage::user(format!("hist_{index}"), message.text()));
                in_run = false;
            }
            Role::Assistant | Role::Tool => {
                if !in_run {
                    out.push(UiMessage::new(format!("hist_{index}"), UiRole::Assistant));
                    in_run = true;
                }
                let Some(current) = out.last_mut() else { continue };
                for part in &message.content {
                    apply_history_part(current, part);
                }
            }
        }
    }
    out
}

fn apply_history_part(message: &mut UiMessage, part: &ContentPart) {
    match part {
        ContentPart::Text { text } if !text.is_empty() => message.parts.push(UiPart::text(text.clone())),
        ContentPart::Text { .. } => {}
        ContentPart::ToolCall(call) => message.parts.push(UiPart::Tool {
            tool_call_id: call.id.clone(),
            tool_name: call.name.clone(),
            state: ToolState::InputAvailable,
            input_text: String::new(),
            input: Some(call.arguments.clone()),
            output: None,
            error_text: None,
        }),
        ContentPart::ToolResult(result) => {
            let target = message.parts.iter_mut().find(|part| {
                matches!(part, UiPart::Tool { tool_call_id, .. } if *tool_call_id == result.tool_call_id)
            });
            let Some(UiPart::Tool {
                state,
                output,
                error_text,
                ..
            }) = target
            else {
                return;
            };
            if result.is_error {
                *state = ToolState::OutputError;
                *error_text = Some(
                    result
                        .result
                        .get("error")
                        .and_then(Value::as_str)
                        .map(str::to_string)
                        .unwrap_or_else(|| result.result.to_string()),
                );
            } else {
                *state = ToolState::OutputAvailable;
                *output = Some(result.result.clone());
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::AgentToolCall;
    use pretty_assertions::assert_eq;
    use serde_json::json;

    #[test]
    fn tool_part_serializes_with_camel_case_fields() {
        let part = UiPart::Tool {
            tool_call_id: "c1".into(),
            tool_name: "weatherTool".into(),
            state: ToolState::OutputAvailable,
            input_text: String::new(),
            input: Some(json!({"location": "Oslo"})),
            output: Some(json!({"temperature": 3})),
            error_text: None,
        };
        assert_eq!(
            serde_json::to_value(&part).unwrap(),
            json!({
                "type": "tool-invocation",
                "toolCallId": "c1",
                "toolName": "weatherTool",
                "state": "output-available",
                "input": {"location": "Oslo"},
                "output": {"temperature": 3}
            })
        );
    }

    #[test]
    fn history_run_folds_into_one_assistant_message() {
        let history = vec![
            ModelMessage::system("be nice"),
            ModelMessage::user("weather in Oslo?"),
            ModelMessage::assistant_with_tool_calls(
                "",
                vec![AgentToolCall {
                    id: "c1".into(),
                    name: "weatherTool".into(),
                    arguments: json!({"location": "Oslo"}),
                }],
            ),
            ModelMessage::tool_result("c1", json!({"temperature": 3}), false),
            ModelMessage::assistant("It is 3 degrees."),
            ModelMessage::user("thanks"),
        ];

        let ui = ui_messages_from_history(&history);
        assert_eq!(ui.len(), 3);
        assert_eq!(ui[1].role, UiRole::Assistant);
        assert_eq!(ui[1].parts.len(), 2);
        assert!(matches!(
            ui[1].tool_part("c1"),
            Some(UiPart::Tool { state: ToolState::OutputAvailable, .. })
        ));
        assert_eq!(ui[1].text_content(), "It is 3 degrees.");
        assert_eq!(ui[2].text_content(), "thanks");
    }

    #[test]
    fn error_result_settles_part_as_output_error() {
        let history = vec![
            ModelMessage::assistant_with_tool_calls(
                "",
                vec![AgentToolCall {
                    id: "c1".into(),
                    name: "weatherTool".into(),
                    arguments: json!({}),
                }],
            ),
            ModelMessage::tool_result("c1", json!({"error": "Location 'Atlantis' not found"}), true),
        ];
        let ui = ui_messages_from_history(&history);
        match ui[0].tool_part("c1") {
            Some(UiPart::Tool { state, error_text, .. }) => {
                assert_eq!(*state, ToolState::OutputError);
                assert_eq!(error_text.as_deref(), Some("Location 'Atlantis' not found"));
            }
            other => panic!("unexpected part {other:?}"),
        }
    }
}
