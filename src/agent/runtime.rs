//! The agent runtime seam and the name → runtime registry.

use std::collections::BTreeMap;
use std::sync::Arc;

use async_trait::async_trait;

use super::events::AgentEventStream;
use crate::config::RunConfig;
use crate::error::{RelayError, Result};
use crate::thread::ThreadId;
use crate::turn::Turn;

/// Everything one invocation is bound to.
#[derive(Debug, Clone)]
pub struct AgentRequest {
    pub turn: Turn,
    /// Memory scope of the run.
    pub thread_id: ThreadId,
    pub principal_id: String,
    pub run_config: RunConfig,
    /// Most-recent stored messages to load as context.
    pub memory_window: usize,
}

/// A tool-augmented agent that can be started per turn.
#[async_trait]
pub trait AgentRuntime: Send + Sync {
    fn name(&self) -> &str;

    /// Validate the request and return the run's event stream.
    ///
    /// Errors returned here mean the run never started. The returned stream
    /// produces nothing until polled.
    async fn start(&self, request: AgentRequest) -> Result<AgentEventStream>;
}

/// Agents addressable by name.
#[derive(Default, Clone)]
pub struct AgentRegistry {
    agents: BTreeMap<String, Arc<dyn AgentRuntime>>,
}

impl AgentRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register an agent under its own name, replacing any previous entry.
    pub fn register(&mut self, agent: Arc<dyn AgentRuntime>) -> &mut Self {
        self.agents.insert(agent.name().to_string(), agent);
        self
    }

    pub fn with(mut self, agent: Arc<dyn AgentRuntime>) -> Self {
        self.register(agent);
        self
    }

    pub fn get(&self, name: &str) -> Result<Arc<dyn AgentRuntime>> {
        self.agents
            .get(name)
            .cloned()
            .ok_or_else(|| RelayError::AgentUnavailable(format!("no agent registered as '{name}'")))
    }

    pub fn names(&self) -> Vec<&str> {
        self.agents.keys().map(String::as_str).collect()
    }
}

impl std::fmt::Debug for AgentRegistry {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("AgentRegistry")
            .field("agents", &self.names())
            .finish()
    }
}
