//! Agent runtime: native events, the invocation adapter, and the default
//! tool-loop agent.

pub mod events;
pub mod invoke;
pub mod loop_agent;
pub mod runtime;

pub use events::{AgentEvent, AgentEventStream};
pub use invoke::AgentInvoker;
pub use loop_agent::{LoopAgent, WEATHER_INSTRUCTIONS};
pub use runtime::{AgentRegistry, AgentRequest, AgentRuntime};
