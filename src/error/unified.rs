//! Error classification and recovery hints.

use serde::{Deserialize, Serialize};

/// Broad error category for routing recovery logic.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ErrorCategory {
    /// The client sent a payload the relay cannot act on.
    ClientContract,
    /// The agent runtime could not be started.
    AgentUnavailable,
    Authentication,
    /// The caller is known but may not touch the resource.
    Authorization,
    RateLimit,
    Network,
    Timeout,
    Server,
    Api,
    Configuration,
    Serialization,
    Storage,
    ToolExecution,
    Transport,
    Unknown,
}

/// Suggested recovery action.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RecoverySuggestion {
    /// Fix the request payload; retrying unchanged will fail again.
    FixRequest,
    /// Send a fresh request; nothing is retried automatically.
    ResendRequest,
    CheckCredentials,
    CheckConfiguration,
    IncreaseTimeout,
    CheckToolImplementation,
    ContactSupport,
}
