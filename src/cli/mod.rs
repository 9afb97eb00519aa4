//! CLI entry point for threadrelay.

use std::path::PathBuf;

use clap::{Parser, Subcommand};

use crate::config::RelayConfig;
use crate::error::Result;

/// threadrelay CLI
#[derive(Parser, Debug)]
#[command(name = "threadrelay", version, about = "Thread-scoped streaming relay for tool-augmented agents")]
pub struct Cli {
    #[command(subcommand)]
    pub command: Commands,
}

/// Top-level CLI commands.
#[derive(Subcommand, Debug)]
pub enum Commands {
    /// Run the relay server
    Serve(ServeArgs),
    /// Send one prompt to a running relay and print the reply
    Chat(ChatArgs),
}

/// Arguments for `threadrelay serve`.
#[derive(Parser, Debug, Default)]
pub struct ServeArgs {
    /// TOML configuration file
    #[arg(short, long)]
    pub config: Option<PathBuf>,

    /// Address to bind (e.g. 127.0.0.1:3456)
    #[arg(short, long)]
    pub bind: Option<String>,

    /// Model id passed to the provider
    #[arg(short, long)]
    pub model: Option<String>,

    /// Name of the agent to invoke
    #[arg(short, long)]
    pub agent: Option<String>,

    /// Persist thread memory under this directory
    #[arg(long)]
    pub memory_dir: Option<PathBuf>,

    /// Emit logs as JSON
    #[arg(long)]
    pub log_json: bool,
}

impl ServeArgs {
    /// Layer flags over file and environment configuration.
    pub fn load_config(&self) -> Result<RelayConfig> {
        let mut config = match &self.config {
            Some(path) => RelayConfig::from_file(path)?,
            None => RelayConfig::from_env()?,
        };
        self.apply(&mut config);
        config.validate()?;
        Ok(config)
    }

    fn apply(&self, config: &mut RelayConfig) {
        if let Some(bind) = &self.bind {
            config.bind_addr = bind.clone();
        }
        if let Some(model) = &self.model {
            config.model_id = model.clone();
        }
        if let Some(agent) = &self.agent {
            config.agent_name = agent.clone();
        }
        if let Some(dir) = &self.memory_dir {
            config.memory_dir = Some(dir.clone());
        }
    }
}

/// Arguments for `threadrelay chat`.
#[derive(Parser, Debug)]
pub struct ChatArgs {
    /// Relay base URL
    #[arg(short, long, default_value = "http://127.0.0.1:3456")]
    pub url: String,

    /// Thread id; defaults to the id stored for this machine
    #[arg(short, long)]
    pub thread: Option<String>,

    /// Identify as this user (sent as x-user-id)
    #[arg(long, env = "THREADRELAY_USER")]
    pub user: Option<String>,

    /// User prompt (positional)
    pub prompt: String,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parse_serve_with_overrides() {
        let cli = Cli::try_parse_from([
            "threadrelay",
            "serve",
            "--bind",
            "0.0.0.0:8080",
            "--model",
            "openai/gpt-4o-mini",
            "--memory-dir",
            "/tmp/threads",
            "--log-json",
        ])
        .unwrap();
        match cli.command {
            Commands::Serve(args) => {
                assert_eq!(args.bind.as_deref(), Some("0.0.0.0:8080"));
                assert!(args.log_json);
                let mut config = RelayConfig::default();
                args.apply(&mut config);
                assert_eq!(config.model_id, "openai/gpt-4o-mini");
                assert_eq!(config.memory_dir, Some(PathBuf::from("/tmp/threads")));
                assert_eq!(config.agent_name, "weather-agent");
            }
            other => panic!("expected Serve, got {other:?}"),
        }
    }

    #[test]
    fn parse_chat_requires_prompt() {
        assert!(Cli::try_parse_from(["threadrelay", "chat"]).is_err());
        let cli = Cli::try_parse_from(["threadrelay", "chat", "-t", "thread-1", "hello"]).unwrap();
        match cli.command {
            Commands::Chat(args) => {
                assert_eq!(args.url, "http://127.0.0.1:3456");
                assert_eq!(args.thread.as_deref(), Some("thread-1"));
                assert_eq!(args.prompt, "hello");
            }
            other => panic!("expected Chat, got {other:?}"),
        }
    }

    #[test]
    fn parse_missing_subcommand_is_error() {
        assert!(Cli::try_parse_from(["threadrelay"]).is_err());
    }
}
