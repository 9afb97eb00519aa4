//! threadrelay: a thread-scoped streaming relay for tool-augmented agents.
//!
//! A client submits its newest user turn together with a stable thread id.
//! The relay binds the turn to the thread's memory, starts an agent run, and
//! streams the run back as incremental UI events that the client folds into
//! messages.
//!
//! # Quick Start
//!
//! ```no_run
//! use threadrelay::config::RelayConfig;
//! use threadrelay::server::{self, AppState};
//!
//! # async fn example() -> threadrelay::error::Result<()> {
//! let config = RelayConfig::from_env()?;
//! server::serve(AppState::from_config(config)?).await?;
//! # Ok(())
//! # }
//! ```

pub mod agent;
pub mod client;
pub mod config;
pub mod error;
pub mod memory;
pub mod prelude;
pub mod provider;
pub mod server;
pub mod stream;
pub mod thread;
pub mod tools;
pub mod turn;
pub mod types;

#[cfg(feature = "cli")]
pub mod cli;
