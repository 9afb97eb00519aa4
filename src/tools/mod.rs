//! Tools the agent can call mid-run.

pub mod arguments;
pub mod schema;
pub mod tool;
pub mod weather;

pub use arguments::ToolArguments;
pub use schema::{AgentToolParameters, ParameterBuilder};
pub use tool::{AgentTool, Tool, ToolDefinition, ToolExecutionContext};
pub use weather::{WeatherTool, WEATHER_TOOL_NAME};
