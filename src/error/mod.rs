//! Error types for threadrelay.

pub mod unified;

pub use unified::{ErrorCategory, RecoverySuggestion};

use thiserror::Error;

/// Primary error type for all relay operations.
#[derive(Error, Debug)]
pub enum RelayError {
    /// The submitted message list has no user-authored entry.
    #[error("Invalid turn: {0}")]
    InvalidTurn(String),

    /// The agent runtime rejected the invocation (unknown agent, bad credential).
    #[error("Agent unavailable: {0}")]
    AgentUnavailable(String),

    #[error("Tool execution error: {tool_name}: {message}")]
    ToolExecution { tool_name: String, message: String },

    /// The client or network dropped the response stream.
    #[error("Transport interrupted: {0}")]
    TransportInterrupted(String),

    #[error("Configuration error: {0}")]
    Configuration(String),

    #[error("API error (status {status}): {message}")]
    Api { status: u16, message: String },

    #[error("Authentication error: {0}")]
    Authentication(String),

    /// The thread belongs to another principal.
    #[error("Thread not found: {0}")]
    ThreadAccessDenied(String),

    #[error("Network error: {0}")]
    Network(#[from] reqwest::Error),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    #[error("Memory store error: {0}")]
    Memory(String),

    #[error("Invalid argument: {0}")]
    InvalidArgument(String),

    #[error("Timeout after {0}ms")]
    Timeout(u64),

    #[error("Stream error: {0}")]
    Stream(String),
}

impl RelayError {
    /// Create an API error.
    pub fn api(status: u16, message: impl Into<String>) -> Self {
        Self::Api {
            status,
            message: message.into(),
        }
    }

    /// Create a tool execution error.
    pub fn tool(tool_name: impl Into<String>, message: impl Into<String>) -> Self {
        Self::ToolExecution {
            tool_name: tool_name.into(),
            message: message.into(),
        }
    }

    /// Classify this error into a category.
    pub fn category(&self) -> ErrorCategory {
        match self {
            Self::InvalidTurn(_) | Self::InvalidArgument(_) => ErrorCategory::ClientContract,
            Self::AgentUnavailable(_) => ErrorCategory::AgentUnavailable,
            Self::ToolExecution { .. } => ErrorCategory::ToolExecution,
            Self::TransportInterrupted(_) => ErrorCategory::Transport,
            Self::Configuration(_) => ErrorCategory::Configuration,
            Self::Authentication(_) => ErrorCategory::Authentication,
            Self::ThreadAccessDenied(_) => ErrorCategory::Authorization,
            Self::Network(_) => ErrorCategory::Network,
            Self::Timeout(_) => ErrorCategory::Timeout,
            Self::Serialization(_) => ErrorCategory::Serialization,
            Self::Io(_) | Self::Memory(_) => ErrorCategory::Storage,
            Self::Api { status, .. } => match status {
                401 | 403 => ErrorCategory::Authentication,
                429 => ErrorCategory::RateLimit,
                500..=599 => ErrorCategory::Server,
                _ => ErrorCategory::Api,
            },
            Self::Stream(_) => ErrorCategory::Unknown,
        }
    }

    /// HTTP status the relay answers with when this error is raised before streaming.
    pub fn http_status(&self) -> u16 {
        match self.category() {
            ErrorCategory::ClientContract => 400,
            // Indistinguishable from an unknown thread.
            ErrorCategory::Authorization => 404,
            ErrorCategory::AgentUnavailable => 503,
            ErrorCategory::Timeout => 504,
            _ => 500,
        }
    }

    /// Whether this error terminates the whole stream rather than a single part.
    pub fn is_fatal_to_stream(&self) -> bool {
        !matches!(self, Self::ToolExecution { .. })
    }

    /// Suggest recovery actions.
    pub fn recovery_suggestion(&self) -> RecoverySuggestion {
        match self.category() {
            ErrorCategory::ClientContract => RecoverySuggestion::FixRequest,
            ErrorCategory::Authentication | ErrorCategory::Authorization => {
                RecoverySuggestion::CheckCredentials
            }
            ErrorCategory::AgentUnavailable | ErrorCategory::Configuration => {
                RecoverySuggestion::CheckConfiguration
            }
            ErrorCategory::Timeout => RecoverySuggestion::IncreaseTimeout,
            ErrorCategory::ToolExecution => RecoverySuggestion::CheckToolImplementation,
            ErrorCategory::Transport
            | ErrorCategory::Network
            | ErrorCategory::RateLimit
            | ErrorCategory::Server => RecoverySuggestion::ResendRequest,
            _ => RecoverySuggestion::ContactSupport,
        }
    }
}

/// Convenience alias.
pub type Result<T> = std::result::Result<T, RelayError>;
