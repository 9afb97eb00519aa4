//! Streaming model providers.
//!
//! A provider turns a message window plus tool definitions into a stream of
//! [`ModelDelta`]s for one model step. Providers are built per invocation
//! from a [`RunConfig`], never from ambient state.

pub mod http;
pub mod openai_compatible;

use std::sync::Arc;

use async_trait::async_trait;
use futures::stream::BoxStream;

use crate::config::RunConfig;
use crate::error::{RelayError, Result};
use crate::tools::ToolDefinition;
use crate::types::{FinishReason, ModelMessage};

pub use openai_compatible::OpenAiCompatibleProvider;

/// Input for one model step.
#[derive(Debug, Clone, Default)]
pub struct ProviderRequest {
    pub messages: Vec<ModelMessage>,
    pub tools: Vec<ToolDefinition>,
}

/// Incremental output of a model step.
#[derive(Debug, Clone, PartialEq)]
pub enum ModelDelta {
    Text(String),
    /// A tool call began; its arguments follow as [`ModelDelta::ToolCallArgs`].
    ToolCallStart { id: String, name: String },
    ToolCallArgs { id: String, delta: String },
    Finish(FinishReason),
}

pub type ModelDeltaStream = BoxStream<'static, Result<ModelDelta>>;

/// A streaming chat model.
#[async_trait]
pub trait ModelProvider: Send + Sync {
    fn provider_name(&self) -> &str;

    fn model_id(&self) -> &str;

    /// Start one model step. Errors before the first delta fail the step.
    async fn stream(&self, request: &ProviderRequest) -> Result<ModelDeltaStream>;
}

/// Builds a provider for each invocation.
pub trait ProviderFactory: Send + Sync {
    fn create(&self, run_config: &RunConfig) -> Result<Arc<dyn ModelProvider>>;
}

/// Factory for OpenAI-compatible endpoints (OpenRouter by default).
#[derive(Debug, Clone, Copy, Default)]
pub struct OpenAiCompatibleFactory;

impl ProviderFactory for OpenAiCompatibleFactory {
    fn create(&self, run_config: &RunConfig) -> Result<Arc<dyn ModelProvider>> {
        Ok(Arc::new(create_provider(run_config)?))
    }
}

/// Build the default provider, failing fast on a missing credential.
pub fn create_provider(run_config: &RunConfig) -> Result<OpenAiCompatibleProvider> {
    let api_key = run_config
        .api_key
        .as_deref()
        .filter(|key| !key.trim().is_empty())
        .ok_or_else(|| RelayError::AgentUnavailable("missing OPENROUTER_API_KEY".into()))?;
    if run_config.model_id.trim().is_empty() {
        return Err(RelayError::AgentUnavailable("no model configured".into()));
    }
    Ok(OpenAiCompatibleProvider::new(
        run_config.model_id.clone(),
        api_key.to_string(),
        run_config.base_url.clone(),
    ))
}
