//! Translation of native agent events into client stream events.
//!
//! One [`StreamMultiplexer`] owns the assembly state of exactly one output
//! message. It emits events in the order the agent produced them and keeps
//! only what one part needs: the id of the open text part and the raw input
//! text of each tool call.

use std::collections::HashMap;

use serde_json::Value;
use tracing::debug;

use super::protocol::StreamEvent;
use crate::agent::AgentEvent;
use crate::types::FinishReason;

#[derive(Debug, Default)]
struct ToolPart {
    tool_name: String,
    input_text: String,
    input_available: bool,
    terminal: bool,
}

/// Per-message state machine.
#[derive(Debug)]
pub struct StreamMultiplexer {
    message_id: String,
    started: bool,
    finished: bool,
    open_text: Option<String>,
    text_parts: usize,
    tools: HashMap<String, ToolPart>,
}

impl Default for StreamMultiplexer {
    fn default() -> Self {
        Self::new(format!("msg_{}", uuid::Uuid::new_v4().simple()))
    }
}

impl StreamMultiplexer {
    pub fn new(message_id: impl Into<String>) -> Self {
        Self {
            message_id: message_id.into(),
            started: false,
            finished: false,
            open_text: None,
            text_parts: 0,
            tools: HashMap::new(),
        }
    }

    pub fn message_id(&self) -> &str {
        &self.message_id
    }

    /// Whether a terminal event has been emitted.
    pub fn is_finished(&self) -> bool {
        self.finished
    }

    /// Translate one native event.
    pub fn on_event(&mut self, event: AgentEvent) -> Vec<StreamEvent> {
        if self.finished {
            debug!(message_id = %self.message_id, ?event, "ignoring event after stream end");
            return Vec::new();
        }

        let mut out = Vec::new();
        match event {
            AgentEvent::StepStart => {
                self.ensure_started(&mut out);
                out.push(StreamEvent::StartStep);
            }
            AgentEvent::TextDelta { delta } => {
                if delta.is_empty() {
                    return out;
                }
                self.ensure_started(&mut out);
                let id = self.open_text_part(&mut out);
                out.push(StreamEvent::text_delta(id, delta));
            }
            AgentEvent::ToolCallStarted { call_id, tool_name } => {
                self.ensure_started(&mut out);
                self.close_text(&mut out);
                if self.tools.contains_key(&call_id) {
                    debug!(call_id = %call_id, "duplicate tool call start");
                    return out;
                }
                self.tools.insert(
                    call_id.clone(),
                    ToolPart {
                        tool_name: tool_name.clone(),
                        ..ToolPart::default()
                    },
                );
                out.push(StreamEvent::tool_input_start(call_id, tool_name));
            }
            AgentEvent::ToolCallDelta { call_id, args_delta } => {
                let Some(part) = self.tools.get_mut(&call_id) else {
                    debug!(call_id = %call_id, "input delta for unknown tool call");
                    return out;
                };
                if part.input_available || part.terminal {
                    return out;
                }
                part.input_text.push_str(&args_delta);
                out.push(StreamEvent::tool_input_delta(&call_id, args_delta));
                if let Some(input) = complete_input(&part.input_text) {
                    part.input_available = true;
                    out.push(StreamEvent::tool_input_available(call_id, part.tool_name.clone(), input));
                }
            }
            AgentEvent::ToolCallReady {
                call_id,
                tool_name,
                input,
            } => {
                self.ensure_started(&mut out);
                self.close_text(&mut out);
                if !self.tools.contains_key(&call_id) {
                    out.push(StreamEvent::tool_input_start(&call_id, &tool_name));
                }
                let part = self.tools.entry(call_id.clone()).or_insert_with(|| ToolPart {
                    tool_name: tool_name.clone(),
                    ..ToolPart::default()
                });
                if !part.input_available && !part.terminal {
                    part.input_available = true;
                    out.push(StreamEvent::tool_input_available(call_id, tool_name, input));
                }
            }
            AgentEvent::ToolResult { call_id, output } => {
                if let Some(part) = self.terminal_part(&call_id) {
                    part.terminal = true;
                    out.push(StreamEvent::tool_output_available(call_id, output));
                }
            }
            AgentEvent::ToolError { call_id, error } => {
                if let Some(part) = self.terminal_part(&call_id) {
                    part.terminal = true;
                    out.push(StreamEvent::tool_output_error(call_id, error));
                }
            }
            AgentEvent::StepFinish { .. } => {
                if self.started {
                    self.close_text(&mut out);
                    out.push(StreamEvent::FinishStep);
                }
            }
            AgentEvent::Finish { reason } => {
                out.extend(self.finish(Some(reason)));
            }
        }
        out
    }

    /// End of the agent stream; emits `finish` unless already terminated.
    pub fn finish(&mut self, reason: Option<FinishReason>) -> Vec<StreamEvent> {
        if self.finished {
            return Vec::new();
        }
        let mut out = Vec::new();
        self.ensure_started(&mut out);
        self.close_text(&mut out);
        out.push(StreamEvent::message_end(reason));
        self.finished = true;
        out
    }

    /// Fatal failure; emits a terminal `error` event.
    ///
    /// Before any content this yields the error alone, so a run that never
    /// started produces no partial message.
    pub fn fail(&mut self, error_text: impl Into<String>) -> Vec<StreamEvent> {
        if self.finished {
            return Vec::new();
        }
        let mut out = Vec::new();
        self.close_text(&mut out);
        out.push(StreamEvent::error(error_text));
        self.finished = true;
        out
    }

    fn ensure_started(&mut self, out: &mut Vec<StreamEvent>) {
        if !self.started {
            self.started = true;
            out.push(StreamEvent::message_start(&self.message_id));
        }
    }

    fn open_text_part(&mut self, out: &mut Vec<StreamEvent>) -> String {
        if let Some(id) = &self.open_text {
            return id.clone();
        }
        let id = format!("txt_{}", self.text_parts);
        self.text_parts += 1;
        out.push(StreamEvent::text_start(&id));
        self.open_text = Some(id.clone());
        id
    }

    fn close_text(&mut self, out: &mut Vec<StreamEvent>) {
        if let Some(id) = self.open_text.take() {
            out.push(StreamEvent::text_end(id));
        }
    }

    fn terminal_part(&mut self, call_id: &str) -> Option<&mut ToolPart> {
        match self.tools.get_mut(call_id) {
            Some(part) if !part.terminal => Some(part),
            Some(_) => {
                debug!(call_id, "ignoring second result for tool call");
                None
            }
            None => {
                debug!(call_id, "ignoring result for unknown tool call");
                None
            }
        }
    }
}

/// Tool input is complete once the accumulated text parses as an object or
/// array; a bare scalar may still be the prefix of a longer value.
fn complete_input(text: &str) -> Option<Value> {
    match serde_json::from_str::<Value>(text) {
        Ok(value @ (Value::Object(_) | Value::Array(_))) => Some(value),
        _ => None,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;
    use serde_json::json;

    fn run(events: Vec<AgentEvent>) -> Vec<StreamEvent> {
        let mut mux = StreamMultiplexer::new("msg_1");
        let mut out: Vec<StreamEvent> = events.into_iter().flat_map(|e| mux.on_event(e)).collect();
        out.extend(mux.finish(None));
        out
    }

    #[test]
    fn text_fragments_share_one_part_and_carry_only_the_delta() {
        let out = run(vec![AgentEvent::text("Hel"), AgentEvent::text("lo")]);
        assert_eq!(
            out,
            vec![
                StreamEvent::message_start("msg_1"),
                StreamEvent::text_start("txt_0"),
                StreamEvent::text_delta("txt_0", "Hel"),
                StreamEvent::text_delta("txt_0", "lo"),
                StreamEvent::text_end("txt_0"),
                StreamEvent::message_end(None),
            ]
        );
    }

    #[test]
    fn tool_start_closes_text_and_input_completes_on_valid_json() {
        let out = run(vec![
            AgentEvent::text("Checking"),
            AgentEvent::tool_started("c1", "weatherTool"),
            AgentEvent::tool_delta("c1", "{\"location\":"),
            AgentEvent::tool_delta("c1", "\"Oslo\"}"),
            AgentEvent::ToolCallReady {
                call_id: "c1".into(),
                tool_name: "weatherTool".into(),
                input: json!({"location": "Oslo"}),
            },
            AgentEvent::tool_result("c1", json!({"temperature": 4})),
            AgentEvent::text("It is 4 degrees"),
        ]);
        assert_eq!(
            out,
            vec![
                StreamEvent::message_start("msg_1"),
                StreamEvent::text_start("txt_0"),
                StreamEvent::text_delta("txt_0", "Checking"),
                StreamEvent::text_end("txt_0"),
                StreamEvent::tool_input_start("c1", "weatherTool"),
                StreamEvent::tool_input_delta("c1", "{\"location\":"),
                StreamEvent::tool_input_delta("c1", "\"Oslo\"}"),
                StreamEvent::tool_input_available("c1", "weatherTool", json!({"location": "Oslo"})),
                StreamEvent::tool_output_available("c1", json!({"temperature": 4})),
                StreamEvent::text_start("txt_1"),
                StreamEvent::text_delta("txt_1", "It is 4 degrees"),
                StreamEvent::text_end("txt_1"),
                StreamEvent::message_end(None),
            ]
        );
    }

    #[test]
    fn scalar_prefix_does_not_complete_tool_input() {
        let mut mux = StreamMultiplexer::new("msg_1");
        mux.on_event(AgentEvent::tool_started("c1", "counter"));
        let first = mux.on_event(AgentEvent::tool_delta("c1", "1"));
        assert_eq!(first, vec![StreamEvent::tool_input_delta("c1", "1")]);
        mux.on_event(AgentEvent::tool_delta("c1", "2"));

        let ready = mux.on_event(AgentEvent::ToolCallReady {
            call_id: "c1".into(),
            tool_name: "counter".into(),
            input: json!(12),
        });
        assert_eq!(ready, vec![StreamEvent::tool_input_available("c1", "counter", json!(12))]);
    }

    #[test]
    fn tool_error_is_contained_to_its_part() {
        let out = run(vec![
            AgentEvent::tool_started("c1", "weatherTool"),
            AgentEvent::tool_error("c1", "Location 'Atlantis' not found"),
            AgentEvent::text("Sorry"),
        ]);
        assert!(out.contains(&StreamEvent::tool_output_error("c1", "Location 'Atlantis' not found")));
        assert!(out.contains(&StreamEvent::text_delta("txt_0", "Sorry")));
        assert_eq!(out.last(), Some(&StreamEvent::message_end(None)));
    }

    #[test]
    fn events_after_finish_are_ignored() {
        let mut mux = StreamMultiplexer::new("msg_1");
        mux.on_event(AgentEvent::tool_started("c1", "weatherTool"));
        let end = mux.on_event(AgentEvent::finish(FinishReason::Stop));
        assert_eq!(end.last(), Some(&StreamEvent::message_end(Some(FinishReason::Stop))));
        assert!(mux.on_event(AgentEvent::tool_result("c1", json!({}))).is_empty());
        assert!(mux.finish(None).is_empty());
        assert!(mux.fail("late").is_empty());
    }

    #[test]
    fn second_result_for_a_call_is_dropped() {
        let mut mux = StreamMultiplexer::new("msg_1");
        mux.on_event(AgentEvent::tool_started("c1", "t"));
        assert_eq!(mux.on_event(AgentEvent::tool_result("c1", json!(1))).len(), 1);
        assert!(mux.on_event(AgentEvent::tool_error("c1", "again")).is_empty());
        assert!(mux.on_event(AgentEvent::tool_result("unknown", json!(1))).is_empty());
    }

    #[test]
    fn failure_before_content_emits_only_error() {
        let mut mux = StreamMultiplexer::new("msg_1");
        assert_eq!(mux.fail("Agent unavailable: no key"), vec![StreamEvent::error("Agent unavailable: no key")]);
        assert!(mux.is_finished());
    }
}
