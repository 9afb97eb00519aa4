//! Folding stream events into a renderable transcript.
//!
//! [`Reassembler::apply`] is a reducer: every [`StreamEvent`] variant maps to
//! one state transition on the message currently being assembled. Events that
//! address a closed message are dropped.

use std::collections::HashMap;

use serde_json::Value;
use tracing::debug;

use crate::stream::StreamEvent;
use crate::types::{TextState, ToolState, UiMessage, UiPart, UiRole};

/// Where the transcript stands relative to the current stream.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ChatStatus {
    /// No stream in flight; the last one (if any) finished normally.
    Ready,
    Streaming,
    /// The transport closed before `finish`; the partial message stays.
    Truncated,
    /// The run failed as a whole.
    Failed { error: String },
}

/// Client-side transcript state.
#[derive(Debug)]
pub struct Reassembler {
    messages: Vec<UiMessage>,
    status: ChatStatus,
    active: Option<usize>,
    text_parts: HashMap<String, usize>,
}

impl Default for Reassembler {
    fn default() -> Self {
        Self::new()
    }
}

impl Reassembler {
    pub fn new() -> Self {
        Self {
            messages: Vec::new(),
            status: ChatStatus::Ready,
            active: None,
            text_parts: HashMap::new(),
        }
    }

    /// Resume from previously rendered messages.
    pub fn with_messages(messages: Vec<UiMessage>) -> Self {
        Self {
            messages,
            ..Self::new()
        }
    }

    pub fn messages(&self) -> &[UiMessage] {
        &self.messages
    }

    pub fn into_messages(self) -> Vec<UiMessage> {
        self.messages
    }

    pub fn status(&self) -> &ChatStatus {
        &self.status
    }

    /// The message currently receiving events.
    pub fn active_message(&self) -> Option<&UiMessage> {
        self.active.and_then(|idx| self.messages.get(idx))
    }

    /// Record a locally authored user message.
    pub fn push_user_message(&mut self, text: impl Into<String>) -> &UiMessage {
        let id = format!("user_{}", uuid::Uuid::new_v4().simple());
        let idx = self.messages.len();
        self.messages.push(UiMessage::user(id, text));
        &self.messages[idx]
    }

    pub fn last_user_message(&self) -> Option<&UiMessage> {
        self.messages.iter().rev().find(|m| m.role == UiRole::User)
    }

    /// A request went out; events may now open a message implicitly.
    pub fn begin_stream(&mut self) {
        self.close_active();
        self.status = ChatStatus::Streaming;
    }

    /// Apply one event.
    pub fn apply(&mut self, event: StreamEvent) {
        match event {
            StreamEvent::MessageStart { message_id } => self.start_message(message_id),
            StreamEvent::TextStart { id } => {
                if let Some(idx) = self.current() {
                    self.open_text(idx, id);
                }
            }
            StreamEvent::TextDelta { id, delta } => {
                let Some(idx) = self.current() else { return };
                let part_idx = match self.text_parts.get(&id) {
                    Some(part_idx) => *part_idx,
                    None => self.open_text(idx, id),
                };
                if let Some(UiPart::Text { text, .. }) = self.messages[idx].parts.get_mut(part_idx) {
                    text.push_str(&delta);
                }
            }
            StreamEvent::TextEnd { id } => {
                let Some(idx) = self.current() else { return };
                if let Some(part_idx) = self.text_parts.remove(&id) {
                    if let Some(UiPart::Text { state, .. }) = self.messages[idx].parts.get_mut(part_idx) {
                        *state = Some(TextState::Done);
                    }
                }
            }
            StreamEvent::ToolInputStart {
                tool_call_id,
                tool_name,
            } => {
                if let Some(idx) = self.current() {
                    self.tool_part(idx, &tool_call_id, &tool_name);
                }
            }
            StreamEvent::ToolInputDelta {
                tool_call_id,
                input_text_delta,
            } => {
                let Some(idx) = self.current() else { return };
                if let Some(UiPart::Tool { state, input_text, .. }) = self.tool_part(idx, &tool_call_id, "") {
                    if *state == ToolState::InputStreaming {
                        input_text.push_str(&input_text_delta);
                    }
                }
            }
            StreamEvent::ToolInputAvailable {
                tool_call_id,
                tool_name,
                input,
            } => {
                let Some(idx) = self.current() else { return };
                if let Some(UiPart::Tool { state, input: slot, .. }) = self.tool_part(idx, &tool_call_id, &tool_name) {
                    if !state.is_terminal() {
                        *state = ToolState::InputAvailable;
                        *slot = Some(input);
                    }
                }
            }
            StreamEvent::ToolOutputAvailable { tool_call_id, output } => {
                self.finish_tool(&tool_call_id, ToolOutcome::Output(output));
            }
            StreamEvent::ToolOutputError {
                tool_call_id,
                error_text,
            } => {
                self.finish_tool(&tool_call_id, ToolOutcome::Error(error_text));
            }
            StreamEvent::StartStep | StreamEvent::FinishStep => {}
            StreamEvent::MessageEnd { .. } => {
                if self.active.is_none() && self.status != ChatStatus::Streaming {
                    debug!("ignoring finish without an open stream");
                    return;
                }
                self.close_active();
                self.status = ChatStatus::Ready;
            }
            StreamEvent::Error { error_text } => {
                if self.active.is_none() && self.status != ChatStatus::Streaming {
                    debug!("ignoring error without an open stream");
                    return;
                }
                self.close_active();
                self.status = ChatStatus::Failed { error: error_text };
            }
        }
    }

    /// The transport closed. Without a prior `finish` this is a truncation.
    ///
    /// Partial text is settled as done, the same as after `finish`; only the
    /// status records that the message was cut short.
    pub fn on_transport_closed(&mut self) {
        if self.status == ChatStatus::Streaming {
            self.close_active();
            self.status = ChatStatus::Truncated;
        }
    }

    fn start_message(&mut self, message_id: Option<String>) {
        let id = message_id.unwrap_or_else(|| format!("msg_{}", uuid::Uuid::new_v4().simple()));
        if self.messages.iter().any(|m| m.id == id) {
            debug!(message_id = %id, "ignoring start for a known message");
            return;
        }
        self.close_active();
        self.messages.push(UiMessage::new(id, UiRole::Assistant));
        self.active = Some(self.messages.len() - 1);
        self.status = ChatStatus::Streaming;
    }

    /// Index of the message to mutate, opening one if a stream is in flight.
    fn current(&mut self) -> Option<usize> {
        if self.active.is_none() {
            if self.status != ChatStatus::Streaming {
                debug!("ignoring event outside an open stream");
                return None;
            }
            self.start_message(None);
        }
        self.active
    }

    fn close_active(&mut self) {
        if let Some(idx) = self.active.take() {
            for part in &mut self.messages[idx].parts {
                if let UiPart::Text { state, .. } = part {
                    *state = Some(TextState::Done);
                }
            }
        }
        self.text_parts.clear();
    }

    fn open_text(&mut self, idx: usize, id: String) -> usize {
        if let Some(existing) = self.text_parts.get(&id) {
            return *existing;
        }
        let parts = &mut self.messages[idx].parts;
        parts.push(UiPart::Text {
            text: String::new(),
            state: Some(TextState::Streaming),
        });
        let part_idx = parts.len() - 1;
        self.text_parts.insert(id, part_idx);
        part_idx
    }

    fn tool_part(&mut self, idx: usize, tool_call_id: &str, tool_name: &str) -> Option<&mut UiPart> {
        let parts = &mut self.messages[idx].parts;
        let position = parts.iter().position(
            |part| matches!(part, UiPart::Tool { tool_call_id: id, .. } if id == tool_call_id),
        );
        let position = match position {
            Some(position) => position,
            None => {
                parts.push(UiPart::Tool {
                    tool_call_id: tool_call_id.to_string(),
                    tool_name: tool_name.to_string(),
                    state: ToolState::InputStreaming,
                    input_text: String::new(),
                    input: None,
                    output: None,
                    error_text: None,
                });
                parts.len() - 1
            }
        };
        let part = &mut parts[position];
        if let UiPart::Tool { tool_name: name, .. } = part {
            if name.is_empty() && !tool_name.is_empty() {
                *name = tool_name.to_string();
            }
        }
        Some(part)
    }

    fn finish_tool(&mut self, tool_call_id: &str, outcome: ToolOutcome) {
        let Some(idx) = self.current() else { return };
        let Some(UiPart::Tool {
            state,
            output,
            error_text,
            ..
        }) = self.tool_part(idx, tool_call_id, "")
        else {
            return;
        };
        if state.is_terminal() {
            debug!(tool_call_id, "ignoring result for a settled tool part");
            return;
        }
        match outcome {
            ToolOutcome::Output(value) => {
                *state = ToolState::OutputAvailable;
                *output = Some(value);
            }
            ToolOutcome::Error(text) => {
                *state = ToolState::OutputError;
                *error_text = Some(text);
            }
        }
    }
}

enum ToolOutcome {
    Output(Value),
    Error(String),
}
