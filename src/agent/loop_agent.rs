//! Default agent: a model/tool loop over thread memory.

use std::sync::Arc;

use async_trait::async_trait;
use futures::StreamExt;
use serde_json::{json, Value};
use tracing::{debug, info, warn};

use super::events::{AgentEvent, AgentEventStream};
use super::runtime::{AgentRequest, AgentRuntime};
use crate::config::DEFAULT_MAX_STEPS;
use crate::error::{RelayError, Result};
use crate::memory::{sanitize_window, MemoryStore};
use crate::provider::{ModelDelta, OpenAiCompatibleFactory, ProviderFactory, ProviderRequest};
use crate::tools::{Tool, ToolArguments, ToolExecutionContext};
use crate::types::{AgentToolCall, FinishReason, ModelMessage};

/// Instructions of the default weather assistant.
pub const WEATHER_INSTRUCTIONS: &str = "\
You are a helpful weather assistant that provides accurate weather information and can help planning activities based on the weather.

Your primary function is to help users get weather details for specific locations. When responding:
- Always ask for a location if none is provided
- If the location name isn't in English, please translate it
- If giving a location with multiple parts (e.g. \"New York, NY\"), use the most relevant part (e.g. \"New York\")
- Include relevant details like humidity, wind conditions, and precipitation
- Keep responses concise but informative
- If the user asks for activities and provides the weather forecast, suggest activities based on the weather forecast.
- If the user asks for activities, respond in the format they request.

Use the weatherTool to fetch current weather data.";

/// An agent that alternates model steps and tool execution until the model
/// stops calling tools.
///
/// Per run it loads the thread's memory window, records the user turn, and
/// appends each completed step. A dropped event stream stops the loop at
/// its next suspension point.
pub struct LoopAgent {
    name: String,
    instructions: String,
    tools: Vec<Arc<dyn Tool>>,
    memory: Arc<dyn MemoryStore>,
    providers: Arc<dyn ProviderFactory>,
    max_steps: usize,
}

impl LoopAgent {
    pub fn new(name: impl Into<String>, memory: Arc<dyn MemoryStore>) -> Self {
        Self {
            name: name.into(),
            instructions: String::new(),
            tools: Vec::new(),
            memory,
            providers: Arc::new(OpenAiCompatibleFactory),
            max_steps: DEFAULT_MAX_STEPS,
        }
    }

    pub fn with_instructions(mut self, instructions: impl Into<String>) -> Self {
        self.instructions = instructions.into();
        self
    }

    pub fn with_tool(mut self, tool: Arc<dyn Tool>) -> Self {
        self.tools.push(tool);
        self
    }

    pub fn with_provider_factory(mut self, providers: Arc<dyn ProviderFactory>) -> Self {
        self.providers = providers;
        self
    }

    pub fn with_max_steps(mut self, max_steps: usize) -> Self {
        self.max_steps = max_steps.max(1);
        self
    }
}

impl std::fmt::Debug for LoopAgent {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("LoopAgent")
            .field("name", &self.name)
            .field("tools", &self.tools.iter().map(|t| t.name()).collect::<Vec<_>>())
            .field("max_steps", &self.max_steps)
            .finish_non_exhaustive()
    }
}

#[derive(Debug)]
struct PendingCall {
    id: String,
    name: String,
    args: String,
}

#[async_trait]
impl AgentRuntime for LoopAgent {
    fn name(&self) -> &str {
        &self.name
    }

    async fn start(&self, request: AgentRequest) -> Result<AgentEventStream> {
        let provider = self.providers.create(&request.run_config)?;
        let thread_id = request.thread_id.clone();

        let history = self
            .memory
            .recent(&thread_id, request.memory_window)
            .await?;
        let user_message = request.turn.to_model_message();
        self.memory
            .append(&thread_id, vec![user_message.clone()])
            .await?;

        let mut messages = Vec::with_capacity(history.len() + 2);
        if !self.instructions.is_empty() {
            messages.push(ModelMessage::system(self.instructions.clone()));
        }
        messages.extend(sanitize_window(history));
        messages.push(user_message);

        info!(
            agent = %self.name,
            thread_id = %thread_id,
            model = %provider.model_id(),
            context = messages.len(),
            "agent run started"
        );

        let tools = self.tools.clone();
        let definitions: Vec<_> = tools.iter().map(|t| t.definition()).collect();
        let memory = Arc::clone(&self.memory);
        let max_steps = self.max_steps;
        let principal_id = request.principal_id;

        let stream = async_stream::stream! {
            let mut completed = false;
            for step in 1..=max_steps {
                yield Ok(AgentEvent::StepStart);

                let step_request = ProviderRequest {
                    messages: messages.clone(),
                    tools: definitions.clone(),
                };
                let mut deltas = match provider.stream(&step_request).await {
                    Ok(deltas) => deltas,
                    Err(err) => {
                        yield Err(err);
                        return;
                    }
                };
                let mut text = String::new();
                let mut calls: Vec<PendingCall> = Vec::new();
                let mut reason = FinishReason::Stop;

                while let Some(delta) = deltas.next().await {
                    let delta = match delta {
                        Ok(delta) => delta,
                        Err(err) => {
                            yield Err(err);
                            return;
                        }
                    };
                    match delta {
                        ModelDelta::Text(fragment) => {
                            text.push_str(&fragment);
                            yield Ok(AgentEvent::text(fragment));
                        }
                        ModelDelta::ToolCallStart { id, name } => {
                            calls.push(PendingCall {
                                id: id.clone(),
                                name: name.clone(),
                                args: String::new(),
                            });
                            yield Ok(AgentEvent::tool_started(id, name));
                        }
                        ModelDelta::ToolCallArgs { id, delta } => {
                            if let Some(call) = calls.iter_mut().find(|c| c.id == id) {
                                call.args.push_str(&delta);
                            }
                            yield Ok(AgentEvent::tool_delta(id, delta));
                        }
                        ModelDelta::Finish(finish) => {
                            reason = finish;
                            break;
                        }
                    }
                }
                debug!(step, calls = calls.len(), text_len = text.len(), "model step complete");

                if calls.is_empty() {
                    if !text.is_empty() {
                        if let Err(err) = memory.append(&thread_id, vec![ModelMessage::assistant(text)]).await {
                            yield Err(err);
                            return;
                        }
                    }
                    yield Ok(AgentEvent::StepFinish { reason });
                    yield Ok(AgentEvent::finish(reason));
                    completed = true;
                    break;
                }

                let mut requested = Vec::with_capacity(calls.len());
                let mut results = Vec::with_capacity(calls.len());
                for call in calls {
                    let parsed = ToolArguments::from_raw(&call.args);
                    let input = parsed
                        .as_ref()
                        .map(|args| args.raw().clone())
                        .unwrap_or_else(|_| Value::String(call.args.clone()));
                    yield Ok(AgentEvent::ToolCallReady {
                        call_id: call.id.clone(),
                        tool_name: call.name.clone(),
                        input: input.clone(),
                    });

                    let ctx = ToolExecutionContext {
                        thread_id: thread_id.to_string(),
                        principal_id: principal_id.clone(),
                        call_id: call.id.clone(),
                    };
                    let outcome = match parsed {
                        Ok(args) => execute_tool(&tools, &call.name, &args, &ctx).await,
                        Err(err) => Err(RelayError::tool(&call.name, err.to_string())),
                    };
                    match outcome {
                        Ok(output) => {
                            results.push(ModelMessage::tool_result(&call.id, output.clone(), false));
                            yield Ok(AgentEvent::tool_result(&call.id, output));
                        }
                        Err(err) => {
                            warn!(tool = %call.name, call_id = %call.id, error = %err, "tool call failed");
                            let message = err.to_string();
                            results.push(ModelMessage::tool_result(
                                &call.id,
                                json!({ "error": message }),
                                true,
                            ));
                            yield Ok(AgentEvent::tool_error(&call.id, message));
                        }
                    }
                    requested.push(AgentToolCall {
                        id: call.id,
                        name: call.name,
                        arguments: input,
                    });
                }

                let mut step_messages = vec![ModelMessage::assistant_with_tool_calls(text, requested)];
                step_messages.extend(results);
                if let Err(err) = memory.append(&thread_id, step_messages.clone()).await {
                    yield Err(err);
                    return;
                }
                messages.extend(step_messages);
                yield Ok(AgentEvent::StepFinish { reason: FinishReason::ToolCalls });
            }

            if !completed {
                yield Err(RelayError::Stream(format!("tool loop exceeded {max_steps} steps")));
            }
        };

        Ok(Box::pin(stream))
    }
}

async fn execute_tool(
    tools: &[Arc<dyn Tool>],
    name: &str,
    args: &ToolArguments,
    ctx: &ToolExecutionContext,
) -> Result<Value> {
    let tool = tools
        .iter()
        .find(|t| t.name() == name)
        .ok_or_else(|| RelayError::tool(name, "unknown tool"))?;
    tool.parameters()
        .validate(args.raw())
        .map_err(|msg| RelayError::tool(name, msg))?;
    match tool.execute(args, ctx).await {
        Ok(output) => Ok(output),
        Err(err @ RelayError::ToolExecution { .. }) => Err(err),
        Err(err) => Err(RelayError::tool(name, err.to_string())),
    }
}
