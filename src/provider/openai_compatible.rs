//! OpenAI-compatible Chat Completions streaming (OpenRouter, vLLM, ...).

use std::collections::HashMap;

use async_trait::async_trait;
use futures::StreamExt;
use serde::Deserialize;
use serde_json::{json, Value};
use tracing::debug;

use super::http::{bearer_headers, shared_client, status_to_error};
use super::{ModelDelta, ModelDeltaStream, ModelProvider, ProviderRequest};
use crate::error::{RelayError, Result};
use crate::stream::sse::{SseDecoder, SseFrame};
use crate::types::{ContentPart, FinishReason, ModelMessage, Role};

pub struct OpenAiCompatibleProvider {
    model_id: String,
    api_key: String,
    base_url: String,
}

impl OpenAiCompatibleProvider {
    pub fn new(model_id: String, api_key: String, base_url: String) -> Self {
        Self {
            model_id,
            api_key,
            base_url: base_url.trim_end_matches('/').to_string(),
        }
    }

    fn build_request_body(&self, request: &ProviderRequest) -> Value {
        let messages: Vec<Value> = request.messages.iter().map(message_to_openai).collect();
        let mut body = json!({
            "model": self.model_id,
            "messages": messages,
            "stream": true,
        });
        if !request.tools.is_empty() {
            let tools: Vec<Value> = request
                .tools
                .iter()
                .map(|tool| {
                    json!({
                        "type": "function",
                        "function": {
                            "name": tool.name,
                            "description": tool.description,
                            "parameters": tool.parameters,
                        }
                    })
                })
                .collect();
            body["tools"] = Value::Array(tools);
        }
        body
    }
}

impl std::fmt::Debug for OpenAiCompatibleProvider {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("OpenAiCompatibleProvider")
            .field("model_id", &self.model_id)
            .field("base_url", &self.base_url)
            .finish_non_exhaustive()
    }
}

#[async_trait]
impl ModelProvider for OpenAiCompatibleProvider {
    fn provider_name(&self) -> &str {
        "openai-compatible"
    }

    fn model_id(&self) -> &str {
        &self.model_id
    }

    async fn stream(&self, request: &ProviderRequest) -> Result<ModelDeltaStream> {
        let url = format!("{}/chat/completions", self.base_url);
        debug!(model = %self.model_id, messages = request.messages.len(), "chat completion stream");

        let resp = shared_client()
            .post(&url)
            .headers(bearer_headers(&self.api_key))
            .json(&self.build_request_body(request))
            .send()
            .await?;

        let status = resp.status().as_u16();
        if !resp.status().is_success() {
            let body = resp.text().await.unwrap_or_default();
            return Err(status_to_error(status, &body));
        }

        let byte_stream = resp.bytes_stream();
        let stream = async_stream::stream! {
            let mut decoder = SseDecoder::new();
            let mut calls = ToolCallTracker::default();
            let mut finished = false;
            futures::pin_mut!(byte_stream);

            'read: while let Some(chunk) = byte_stream.next().await {
                let chunk = match chunk {
                    Ok(chunk) => chunk,
                    Err(err) => {
                        yield Err(RelayError::Network(err));
                        return;
                    }
                };
                for frame in decoder.push(&chunk) {
                    let data = match frame {
                        SseFrame::Done => break 'read,
                        SseFrame::Data(data) => data,
                    };
                    let parsed: StreamChunk = match serde_json::from_str(&data) {
                        Ok(parsed) => parsed,
                        Err(err) => {
                            debug!(error = %err, "skipping unparseable chunk");
                            continue;
                        }
                    };
                    if let Some(error) = parsed.error {
                        yield Err(RelayError::Stream(error.message));
                        return;
                    }
                    for delta in calls.translate(parsed) {
                        if matches!(delta, ModelDelta::Finish(_)) {
                            finished = true;
                        }
                        yield Ok(delta);
                    }
                }
            }

            if !finished {
                yield Ok(ModelDelta::Finish(calls.implied_finish()));
            }
        };

        Ok(Box::pin(stream))
    }
}

/// Assigns stable ids to tool calls that providers address by index.
#[derive(Debug, Default)]
struct ToolCallTracker {
    ids: HashMap<u32, String>,
}

impl ToolCallTracker {
    fn translate(&mut self, chunk: StreamChunk) -> Vec<ModelDelta> {
        let mut out = Vec::new();
        for choice in chunk.choices {
            if let Some(text) = choice.delta.content.filter(|t| !t.is_empty()) {
                out.push(ModelDelta::Text(text));
            }
            for call in choice.delta.tool_calls.unwrap_or_default() {
                let function = call.function.unwrap_or_default();
                let id = match self.ids.get(&call.index) {
                    Some(id) => id.clone(),
                    None => {
                        let id = call.id.unwrap_or_else(|| format!("call_{}", call.index));
                        self.ids.insert(call.index, id.clone());
                        out.push(ModelDelta::ToolCallStart {
                            id: id.clone(),
                            name: function.name.clone().unwrap_or_default(),
                        });
                        id
                    }
                };
                if let Some(args) = function.arguments.filter(|a| !a.is_empty()) {
                    out.push(ModelDelta::ToolCallArgs { id, delta: args });
                }
            }
            if let Some(reason) = choice.finish_reason {
                out.push(ModelDelta::Finish(FinishReason::from_openai(&reason)));
            }
        }
        out
    }

    fn implied_finish(&self) -> FinishReason {
        if self.ids.is_empty() {
            FinishReason::Stop
        } else {
            FinishReason::ToolCalls
        }
    }
}

fn message_to_openai(message: &ModelMessage) -> Value {
    match message.role {
        Role::Tool => {
            let result = message.content.iter().find_map(|part| match part {
                ContentPart::ToolResult(result) => Some(result),
                _ => None,
            });
            match result {
                Some(result) => json!({
                    "role": "tool",
                    "tool_call_id": result.tool_call_id,
                    "content": result.result.to_string(),
                }),
                None => json!({ "role": "tool", "content": message.text() }),
            }
        }
        Role::Assistant if !message.tool_calls().is_empty() => {
            let calls: Vec<Value> = message
                .tool_calls()
                .into_iter()
                .map(|call| {
                    json!({
                        "id": call.id,
                        "type": "function",
                        "function": {
                            "name": call.name,
                            "arguments": call.arguments.to_string(),
                        }
                    })
                })
                .collect();
            let text = message.text();
            json!({
                "role": "assistant",
                "content": if text.is_empty() { Value::Null } else { Value::String(text) },
                "tool_calls": calls,
            })
        }
        role => json!({ "role": role.to_string(), "content": message.text() }),
    }
}

#[derive(Deserialize)]
struct StreamChunk {
    #[serde(default)]
    choices: Vec<StreamChoice>,
    error: Option<StreamError>,
}

#[derive(Deserialize)]
struct StreamError {
    message: String,
}

#[derive(Deserialize)]
struct StreamChoice {
    #[serde(default)]
    delta: StreamDelta,
    finish_reason: Option<String>,
}

#[derive(Deserialize, Default)]
struct StreamDelta {
    content: Option<String>,
    tool_calls: Option<Vec<StreamToolCall>>,
}

#[derive(Deserialize)]
struct StreamToolCall {
    #[serde(default)]
    index: u32,
    id: Option<String>,
    function: Option<StreamFunction>,
}

#[derive(Deserialize, Default, Clone)]
struct StreamFunction {
    name: Option<String>,
    arguments: Option<String>,
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::AgentToolCall;
    use futures::TryStreamExt;
    use pretty_assertions::assert_eq;
    use wiremock::matchers::{header, method, path};
    use wiremock::{Mock, MockServer, ResponseTemplate};

    fn sse(chunks: &[Value]) -> String {
        let mut body: String = chunks.iter().map(|c| format!("data: {c}\n\n")).collect();
        body.push_str("data: [DONE]\n\n");
        body
    }

    #[tokio::test]
    async fn streams_text_and_indexed_tool_calls() {
        let server = MockServer::start().await;
        let body = sse(&[
            json!({"choices":[{"delta":{"content":"Let me check"}}]}),
            json!({"choices":[{"delta":{"tool_calls":[{"index":0,"id":"call_a","function":{"name":"weatherTool","arguments":""}}]}}]}),
            json!({"choices":[{"delta":{"tool_calls":[{"index":0,"function":{"arguments":"{\"location\":"}}]}}]}),
            json!({"choices":[{"delta":{"tool_calls":[{"index":0,"function":{"arguments":"\"Oslo\"}"}}]}}]}),
            json!({"choices":[{"delta":{},"finish_reason":"tool_calls"}]}),
        ]);
        Mock::given(method("POST"))
            .and(path("/v1/chat/completions"))
            .and(header("authorization", "Bearer sk-test"))
            .respond_with(ResponseTemplate::new(200).set_body_raw(body, "text/event-stream"))
            .mount(&server)
            .await;

        let provider = OpenAiCompatibleProvider::new(
            "deepseek/deepseek-v3.2".into(),
            "sk-test".into(),
            format!("{}/v1/", server.uri()),
        );
        let deltas: Vec<ModelDelta> = provider
            .stream(&ProviderRequest::default())
            .await
            .unwrap()
            .try_collect()
            .await
            .unwrap();

        assert_eq!(
            deltas,
            vec![
                ModelDelta::Text("Let me check".into()),
                ModelDelta::ToolCallStart {
                    id: "call_a".into(),
                    name: "weatherTool".into()
                },
                ModelDelta::ToolCallArgs {
                    id: "call_a".into(),
                    delta: "{\"location\":".into()
                },
                ModelDelta::ToolCallArgs {
                    id: "call_a".into(),
                    delta: "\"Oslo\"}".into()
                },
                ModelDelta::Finish(FinishReason::ToolCalls),
            ]
        );
    }

    #[tokio::test]
    async fn missing_finish_reason_is_implied() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .respond_with(ResponseTemplate::new(200).set_body_raw(
                sse(&[json!({"choices":[{"delta":{"content":"hi"}}]})]),
                "text/event-stream",
            ))
            .mount(&server)
            .await;
        let provider = OpenAiCompatibleProvider::new("m".into(), "k".into(), server.uri());
        let deltas: Vec<ModelDelta> = provider
            .stream(&ProviderRequest::default())
            .await
            .unwrap()
            .try_collect()
            .await
            .unwrap();
        assert_eq!(deltas.last(), Some(&ModelDelta::Finish(FinishReason::Stop)));
    }

    #[tokio::test]
    async fn upstream_rejection_surfaces_before_streaming() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .respond_with(
                ResponseTemplate::new(401).set_body_string(r#"{"error":{"message":"No auth"}}"#),
            )
            .mount(&server)
            .await;
        let provider = OpenAiCompatibleProvider::new("m".into(), "bad".into(), server.uri());
        let err = provider.stream(&ProviderRequest::default()).await.err().unwrap();
        assert!(matches!(err, RelayError::Authentication(_)));
    }

    #[test]
    fn tool_history_maps_to_openai_shapes() {
        let call = AgentToolCall {
            id: "c1".into(),
            name: "weatherTool".into(),
            arguments: json!({"location": "Oslo"}),
        };
        let assistant = message_to_openai(&ModelMessage::assistant_with_tool_calls("", vec![call]));
        assert_eq!(assistant["content"], Value::Null);
        assert_eq!(assistant["tool_calls"][0]["function"]["arguments"], "{\"location\":\"Oslo\"}");

        let tool = message_to_openai(&ModelMessage::tool_result("c1", json!({"t": 3}), false));
        assert_eq!(tool, json!({"role": "tool", "tool_call_id": "c1", "content": "{\"t\":3}"}));

        let user = message_to_openai(&ModelMessage::user("hi"));
        assert_eq!(user, json!({"role": "user", "content": "hi"}));
    }
}
