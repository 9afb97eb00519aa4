//! Binding a turn, a thread, and run configuration into one agent run.

use std::sync::Arc;

use tracing::{info, warn};

use super::events::AgentEventStream;
use super::runtime::{AgentRegistry, AgentRequest};
use crate::config::RunConfig;
use crate::error::{RelayError, Result};
use crate::thread::{Principal, ThreadId};
use crate::turn::Turn;

/// Starts runs of one named agent.
#[derive(Debug, Clone)]
pub struct AgentInvoker {
    registry: Arc<AgentRegistry>,
    agent_name: String,
    memory_window: usize,
}

impl AgentInvoker {
    pub fn new(registry: Arc<AgentRegistry>, agent_name: impl Into<String>, memory_window: usize) -> Self {
        Self {
            registry,
            agent_name: agent_name.into(),
            memory_window,
        }
    }

    pub fn agent_name(&self) -> &str {
        &self.agent_name
    }

    pub fn memory_window(&self) -> usize {
        self.memory_window
    }

    /// Start a run scoped to `thread_id`.
    ///
    /// `run_config` applies to this run only. Any failure to start is
    /// reported as [`RelayError::AgentUnavailable`] so callers can surface it
    /// as a terminal stream error.
    pub async fn invoke(
        &self,
        turn: Turn,
        thread_id: ThreadId,
        principal: &Principal,
        run_config: RunConfig,
    ) -> Result<AgentEventStream> {
        let agent = self.registry.get(&self.agent_name)?;
        info!(
            agent = %self.agent_name,
            thread_id = %thread_id,
            message_id = %turn.message_id,
            anonymous = principal.is_anonymous(),
            "invoking agent"
        );

        let request = AgentRequest {
            turn,
            thread_id: thread_id.clone(),
            principal_id: principal.id().to_string(),
            run_config,
            memory_window: self.memory_window,
        };
        agent.start(request).await.map_err(|err| {
            warn!(agent = %self.agent_name, thread_id = %thread_id, error = %err, "agent rejected invocation");
            match err {
                RelayError::AgentUnavailable(_) => err,
                other => RelayError::AgentUnavailable(other.to_string()),
            }
        })
    }
}
