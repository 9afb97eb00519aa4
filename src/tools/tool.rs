//! The [`Tool`] trait and its closure-backed implementation.

use std::fmt;
use std::future::Future;
use std::pin::Pin;
use std::sync::Arc;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use serde_json::Value;

use super::arguments::ToolArguments;
use super::schema::AgentToolParameters;
use crate::error::Result;

/// Request-scoped data a tool may consult.
#[derive(Debug, Clone, Default)]
pub struct ToolExecutionContext {
    pub thread_id: String,
    pub principal_id: String,
    pub call_id: String,
}

/// A capability the agent can invoke mid-run.
#[async_trait]
pub trait Tool: Send + Sync {
    /// Name the model uses to call the tool.
    fn name(&self) -> &str;

    fn description(&self) -> &str;

    fn parameters(&self) -> &AgentToolParameters;

    async fn execute(&self, args: &ToolArguments, ctx: &ToolExecutionContext) -> Result<Value>;

    /// Provider-facing definition of this tool.
    fn definition(&self) -> ToolDefinition {
        ToolDefinition {
            name: self.name().to_string(),
            description: self.description().to_string(),
            parameters: self.parameters().schema.clone(),
        }
    }
}

/// Name, description and input schema sent to the model.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ToolDefinition {
    pub name: String,
    pub description: String,
    pub parameters: Value,
}

type BoxedHandler = dyn Fn(ToolArguments, ToolExecutionContext) -> Pin<Box<dyn Future<Output = Result<Value>> + Send>>
    + Send
    + Sync;

/// Tool backed by an async closure.
pub struct AgentTool {
    name: String,
    description: String,
    parameters: AgentToolParameters,
    handler: Arc<BoxedHandler>,
}

impl AgentTool {
    pub fn new<F, Fut>(
        name: impl Into<String>,
        description: impl Into<String>,
        parameters: AgentToolParameters,
        handler: F,
    ) -> Self
    where
        F: Fn(ToolArguments, ToolExecutionContext) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = Result<Value>> + Send + 'static,
    {
        Self {
            name: name.into(),
            description: description.into(),
            parameters,
            handler: Arc::new(move |args, ctx| Box::pin(handler(args, ctx))),
        }
    }
}

#[async_trait]
impl Tool for AgentTool {
    fn name(&self) -> &str {
        &self.name
    }

    fn description(&self) -> &str {
        &self.description
    }

    fn parameters(&self) -> &AgentToolParameters {
        &self.parameters
    }

    async fn execute(&self, args: &ToolArguments, ctx: &ToolExecutionContext) -> Result<Value> {
        (self.handler)(args.clone(), ctx.clone()).await
    }
}

impl fmt::Debug for AgentTool {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("AgentTool")
            .field("name", &self.name)
            .finish_non_exhaustive()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::RelayError;
    use serde_json::json;

    #[tokio::test]
    async fn closure_tool_receives_arguments_and_context() {
        let tool = AgentTool::new(
            "echo",
            "Echo the input",
            AgentToolParameters::object().string("text", "Text", true).build(),
            |args, ctx| async move {
                Ok(json!({ "text": args.get_str("text")?, "thread": ctx.thread_id }))
            },
        );
        let ctx = ToolExecutionContext {
            thread_id: "thread-1".into(),
            ..Default::default()
        };
        let out = tool
            .execute(&ToolArguments::new(json!({ "text": "hi" })), &ctx)
            .await
            .unwrap();
        assert_eq!(out, json!({ "text": "hi", "thread": "thread-1" }));
        assert_eq!(tool.definition().name, "echo");
    }

    #[tokio::test]
    async fn handler_errors_propagate() {
        let tool = AgentTool::new("fail", "Always fails", AgentToolParameters::empty(), |_, _| async {
            Err(RelayError::tool("fail", "boom"))
        });
        let err = tool
            .execute(&ToolArguments::new(json!({})), &ToolExecutionContext::default())
            .await
            .unwrap_err();
        assert!(matches!(err, RelayError::ToolExecution { .. }));
    }
}
