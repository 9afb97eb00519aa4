//! Configuration system (layered: defaults < TOML file < env < explicit overrides).

use std::fmt;
use std::net::SocketAddr;
use std::path::{Path, PathBuf};
use std::time::Duration;

use bon::Builder;
use serde::{Deserialize, Serialize};

use crate::error::{RelayError, Result};

pub const DEFAULT_BIND_ADDR: &str = "127.0.0.1:3456";
pub const DEFAULT_AGENT_NAME: &str = "weather-agent";
pub const DEFAULT_MODEL_ID: &str = "deepseek/deepseek-v3.2";
pub const DEFAULT_BASE_URL: &str = "https://openrouter.ai/api/v1";
pub const DEFAULT_MEMORY_WINDOW: usize = 10;
pub const DEFAULT_IDLE_TIMEOUT_MS: u64 = 120_000;
pub const DEFAULT_CHANNEL_CAPACITY: usize = 16;
pub const DEFAULT_MAX_STEPS: usize = 20;

/// Per-invocation model selection and credential.
///
/// Built fresh for every request and handed to the agent explicitly, so two
/// concurrent invocations never observe each other's settings.
#[derive(Clone, Builder, PartialEq, Eq)]
pub struct RunConfig {
    #[builder(into)]
    pub model_id: String,
    #[builder(into)]
    pub api_key: Option<String>,
    #[builder(into, default = DEFAULT_BASE_URL.to_string())]
    pub base_url: String,
}

impl fmt::Debug for RunConfig {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("RunConfig")
            .field("model_id", &self.model_id)
            .field("api_key", &self.api_key.as_ref().map(|_| "<redacted>"))
            .field("base_url", &self.base_url)
            .finish()
    }
}

/// Server-wide configuration.
#[derive(Clone, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct RelayConfig {
    pub bind_addr: String,
    pub agent_name: String,
    pub model_id: String,
    #[serde(skip_serializing)]
    pub api_key: Option<String>,
    pub base_url: String,
    /// Number of most-recent stored messages handed to the agent per invocation.
    pub memory_window: usize,
    /// Maximum silence from the agent before the stream is failed; 0 disables.
    pub idle_timeout_ms: u64,
    /// Outbound event buffer between the agent reader and the HTTP body.
    pub channel_capacity: usize,
    pub max_steps: usize,
    /// Directory for file-backed thread memory; in-memory when unset.
    pub memory_dir: Option<PathBuf>,
    /// Static bearer tokens mapped to principal ids.
    pub tokens: std::collections::HashMap<String, String>,
}

impl fmt::Debug for RelayConfig {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("RelayConfig")
            .field("bind_addr", &self.bind_addr)
            .field("agent_name", &self.agent_name)
            .field("model_id", &self.model_id)
            .field("api_key", &self.api_key.as_ref().map(|_| "<redacted>"))
            .field("base_url", &self.base_url)
            .field("memory_window", &self.memory_window)
            .field("idle_timeout_ms", &self.idle_timeout_ms)
            .field("channel_capacity", &self.channel_capacity)
            .field("max_steps", &self.max_steps)
            .field("memory_dir", &self.memory_dir)
            .field("tokens", &self.tokens.len())
            .finish()
    }
}

impl Default for RelayConfig {
    fn default() -> Self {
        Self {
            bind_addr: DEFAULT_BIND_ADDR.to_string(),
            agent_name: DEFAULT_AGENT_NAME.to_string(),
            model_id: DEFAULT_MODEL_ID.to_string(),
            api_key: None,
            base_url: DEFAULT_BASE_URL.to_string(),
            memory_window: DEFAULT_MEMORY_WINDOW,
            idle_timeout_ms: DEFAULT_IDLE_TIMEOUT_MS,
            channel_capacity: DEFAULT_CHANNEL_CAPACITY,
            max_steps: DEFAULT_MAX_STEPS,
            memory_dir: None,
            tokens: Default::default(),
        }
    }
}

impl RelayConfig {
    /// Load defaults overlaid with environment variables (loads `.env` if present).
    pub fn from_env() -> Result<Self> {
        let _ = dotenvy::dotenv();
        let mut config = Self::default();
        config.apply_env(|key| std::env::var(key).ok())?;
        Ok(config)
    }

    /// Load a TOML file, then overlay environment variables.
    pub fn from_file(path: &Path) -> Result<Self> {
        let _ = dotenvy::dotenv();
        let mut config = Self::parse_toml(&std::fs::read_to_string(path)?)?;
        config.apply_env(|key| std::env::var(key).ok())?;
        Ok(config)
    }

    /// Parse a TOML document; missing keys keep their defaults.
    pub fn parse_toml(raw: &str) -> Result<Self> {
        toml::from_str(raw).map_err(|e| RelayError::Configuration(format!("invalid TOML: {e}")))
    }

    /// Overlay values from an environment lookup.
    pub fn apply_env<F>(&mut self, lookup: F) -> Result<()>
    where
        F: Fn(&str) -> Option<String>,
    {
        if let Some(v) = lookup("THREADRELAY_BIND") {
            self.bind_addr = v;
        }
        if let Some(v) = lookup("THREADRELAY_AGENT") {
            self.agent_name = v;
        }
        if let Some(v) = lookup("THREADRELAY_MODEL") {
            self.model_id = v;
        }
        if let Some(v) = lookup("OPENROUTER_API_KEY").filter(|v| !v.is_empty()) {
            self.api_key = Some(v);
        }
        if let Some(v) = lookup("THREADRELAY_BASE_URL") {
            self.base_url = v;
        }
        if let Some(v) = lookup("THREADRELAY_MEMORY_WINDOW") {
            self.memory_window = parse_number("THREADRELAY_MEMORY_WINDOW", &v)?;
        }
        if let Some(v) = lookup("THREADRELAY_IDLE_TIMEOUT_MS") {
            self.idle_timeout_ms = parse_number("THREADRELAY_IDLE_TIMEOUT_MS", &v)?;
        }
        if let Some(v) = lookup("THREADRELAY_MEMORY_DIR") {
            self.memory_dir = Some(PathBuf::from(v));
        }
        Ok(())
    }

    /// Check invariants the server depends on.
    pub fn validate(&self) -> Result<()> {
        self.socket_addr()?;
        if self.memory_window == 0 {
            return Err(RelayError::Configuration(
                "memory_window must be at least 1".into(),
            ));
        }
        if self.channel_capacity == 0 {
            return Err(RelayError::Configuration(
                "channel_capacity must be at least 1".into(),
            ));
        }
        if self.max_steps == 0 {
            return Err(RelayError::Configuration(
                "max_steps must be at least 1".into(),
            ));
        }
        Ok(())
    }

    pub fn socket_addr(&self) -> Result<SocketAddr> {
        self.bind_addr.parse().map_err(|e| {
            RelayError::Configuration(format!("invalid bind address {}: {e}", self.bind_addr))
        })
    }

    /// Idle timeout, or `None` when disabled.
    pub fn idle_timeout(&self) -> Option<Duration> {
        (self.idle_timeout_ms > 0).then(|| Duration::from_millis(self.idle_timeout_ms))
    }

    /// Snapshot the model settings for a single invocation.
    pub fn run_config(&self) -> RunConfig {
        RunConfig {
            model_id: self.model_id.clone(),
            api_key: self.api_key.clone(),
            base_url: self.base_url.clone(),
        }
    }
}

fn parse_number<T: std::str::FromStr>(key: &str, value: &str) -> Result<T>
where
    T::Err: fmt::Display,
{
    value
        .trim()
        .parse()
        .map_err(|e| RelayError::Configuration(format!("{key}: {e}")))
}
