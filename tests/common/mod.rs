//! Shared test helpers: a scripted agent runtime and a scripted model provider.
#![allow(dead_code)]

use std::collections::VecDeque;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};

use async_trait::async_trait;
use futures::StreamExt;

use threadrelay::agent::{AgentEvent, AgentEventStream, AgentInvoker, AgentRegistry, AgentRequest, AgentRuntime};
use threadrelay::config::{RelayConfig, RunConfig};
use threadrelay::error::Result;
use threadrelay::memory::{InMemoryMemoryStore, MemoryStore};
use threadrelay::provider::{ModelDelta, ModelDeltaStream, ModelProvider, ProviderFactory, ProviderRequest};
use threadrelay::server::AppState;
use threadrelay::types::{FinishReason, Role};

/// One canned run.
pub struct Script {
    pub events: Vec<Result<AgentEvent>>,
    /// Never end the stream after the events.
    pub hang: bool,
}

impl Script {
    pub fn completes(events: Vec<AgentEvent>) -> Self {
        Self {
            events: events.into_iter().map(Ok).collect(),
            hang: false,
        }
    }

    pub fn hangs(events: Vec<AgentEvent>) -> Self {
        Self {
            events: events.into_iter().map(Ok).collect(),
            hang: true,
        }
    }
}

/// An agent that replays queued scripts and records what it was asked.
pub struct ScriptedAgent {
    name: String,
    scripts: Mutex<VecDeque<Script>>,
    invocations: AtomicUsize,
    requests: Mutex<Vec<AgentRequest>>,
}

impl ScriptedAgent {
    pub fn new(name: &str) -> Self {
        Self {
            name: name.to_string(),
            scripts: Mutex::new(VecDeque::new()),
            invocations: AtomicUsize::new(0),
            requests: Mutex::new(Vec::new()),
        }
    }

    pub fn queue(&self, script: Script) {
        self.scripts.lock().unwrap().push_back(script);
    }

    pub fn invocations(&self) -> usize {
        self.invocations.load(Ordering::SeqCst)
    }

    pub fn requests(&self) -> Vec<AgentRequest> {
        self.requests.lock().unwrap().clone()
    }
}

#[async_trait]
impl AgentRuntime for ScriptedAgent {
    fn name(&self) -> &str {
        &self.name
    }

    async fn start(&self, request: AgentRequest) -> Result<AgentEventStream> {
        self.invocations.fetch_add(1, Ordering::SeqCst);
        self.requests.lock().unwrap().push(request);
        let script = self.scripts.lock().unwrap().pop_front().unwrap_or_else(|| {
            Script::completes(vec![AgentEvent::text("ok"), AgentEvent::finish(FinishReason::Stop)])
        });
        let events = futures::stream::iter(script.events);
        if script.hang {
            Ok(Box::pin(events.chain(futures::stream::pending())))
        } else {
            Ok(Box::pin(events))
        }
    }
}

/// A provider that replays queued steps and echoes the last user message
/// once the queue is empty.
#[derive(Default)]
pub struct ScriptedProvider {
    steps: Mutex<VecDeque<Vec<ModelDelta>>>,
    requests: Mutex<Vec<ProviderRequest>>,
}

impl ScriptedProvider {
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    pub fn queue_step(&self, deltas: Vec<ModelDelta>) {
        self.steps.lock().unwrap().push_back(deltas);
    }

    /// Queue a step that calls one tool with the given JSON arguments.
    pub fn queue_tool_call(&self, id: &str, name: &str, args: &str) {
        self.queue_step(vec![
            ModelDelta::ToolCallStart {
                id: id.into(),
                name: name.into(),
            },
            ModelDelta::ToolCallArgs {
                id: id.into(),
                delta: args.into(),
            },
            ModelDelta::Finish(FinishReason::ToolCalls),
        ]);
    }

    pub fn queue_text(&self, text: &str) {
        self.queue_step(vec![ModelDelta::Text(text.into()), ModelDelta::Finish(FinishReason::Stop)]);
    }

    pub fn requests(&self) -> Vec<ProviderRequest> {
        self.requests.lock().unwrap().clone()
    }
}

#[async_trait]
impl ModelProvider for ScriptedProvider {
    fn provider_name(&self) -> &str {
        "scripted"
    }

    fn model_id(&self) -> &str {
        "scripted-model"
    }

    async fn stream(&self, request: &ProviderRequest) -> Result<ModelDeltaStream> {
        self.requests.lock().unwrap().push(request.clone());
        let deltas = self.steps.lock().unwrap().pop_front().unwrap_or_else(|| {
            let last_user = request
                .messages
                .iter()
                .rev()
                .find(|m| m.role == Role::User)
                .map(|m| m.text())
                .unwrap_or_default();
            vec![
                ModelDelta::Text(format!("echo: {last_user}")),
                ModelDelta::Finish(FinishReason::Stop),
            ]
        });
        Ok(Box::pin(futures::stream::iter(deltas.into_iter().map(Ok))))
    }
}

/// Hands out the same scripted provider for every run.
pub struct ScriptedProviderFactory(pub Arc<ScriptedProvider>);

impl ProviderFactory for ScriptedProviderFactory {
    fn create(&self, _run_config: &RunConfig) -> Result<Arc<dyn ModelProvider>> {
        Ok(self.0.clone())
    }
}

pub fn run_config() -> RunConfig {
    RunConfig::builder().model_id("scripted-model").api_key("test-key".to_string()).build()
}

/// Server state around a single registered agent.
pub fn state_with_agent(agent: Arc<dyn AgentRuntime>, memory: Arc<dyn MemoryStore>) -> AppState {
    let config = RelayConfig {
        agent_name: agent.name().to_string(),
        api_key: Some("test-key".into()),
        ..RelayConfig::default()
    };
    let registry = AgentRegistry::new().with(agent);
    let invoker = AgentInvoker::new(Arc::new(registry), config.agent_name.clone(), config.memory_window);
    AppState::new(invoker, memory, config)
}

pub fn scripted_state(agent: Arc<ScriptedAgent>) -> AppState {
    state_with_agent(agent, Arc::new(InMemoryMemoryStore::new()))
}
