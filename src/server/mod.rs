//! HTTP surface of the relay.
//!
//! ```text
//! POST /api/agents/stream                 newest turn in, SSE event stream out
//! GET  /api/threads/{thread_id}/messages  persisted history for reload
//! GET  /                                  liveness
//! ```

pub mod identity;
mod routes;

use std::sync::Arc;
use std::time::Duration;

use axum::http::{header, HeaderName, Method, StatusCode};
use axum::response::{IntoResponse, Response};
use axum::routing::{get, post};
use axum::{Json, Router};
use thiserror::Error;
use tokio_util::sync::CancellationToken;
use tower_http::cors::{Any, CorsLayer};
use tracing::info;

pub use identity::{HeaderPrincipalResolver, PrincipalResolver};
pub use routes::{HistoryQuery, StreamRequest};

use crate::agent::{AgentInvoker, AgentRegistry, LoopAgent, WEATHER_INSTRUCTIONS};
use crate::config::RelayConfig;
use crate::error::{RelayError, Result};
use crate::memory::{FileMemoryStore, InMemoryMemoryStore, MemoryStore};
use crate::stream::RelaySettings;
use crate::thread::{FileThreadOwnerStore, InMemoryThreadOwnerStore, ThreadOwnerStore};
use crate::tools::WeatherTool;

pub const STREAM_PATH: &str = "/api/agents/stream";
pub const THREAD_MESSAGES_PATH: &str = "/api/threads/{thread_id}/messages";
pub const USER_ID_HEADER: &str = "x-user-id";
pub const THREAD_ID_HEADER: &str = "x-thread-id";

const CORS_MAX_AGE: Duration = Duration::from_secs(600);

/// Errors answered synchronously, before any stream opens.
#[derive(Debug, Error)]
pub enum ApiError {
    #[error("{0}")]
    BadRequest(String),

    #[error("{0}")]
    NotFound(String),

    #[error("{0}")]
    Unavailable(String),

    #[error("{0}")]
    Internal(String),
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let code = match &self {
            ApiError::BadRequest(_) => StatusCode::BAD_REQUEST,
            ApiError::NotFound(_) => StatusCode::NOT_FOUND,
            ApiError::Unavailable(_) => StatusCode::SERVICE_UNAVAILABLE,
            ApiError::Internal(_) => StatusCode::INTERNAL_SERVER_ERROR,
        };
        let body = Json(serde_json::json!({ "error": self.to_string() }));
        (code, body).into_response()
    }
}

impl From<RelayError> for ApiError {
    fn from(err: RelayError) -> Self {
        match (err.http_status(), err) {
            (_, RelayError::InvalidTurn(msg)) | (_, RelayError::InvalidArgument(msg)) => {
                ApiError::BadRequest(msg)
            }
            (404, other) => ApiError::NotFound(other.to_string()),
            (503, other) => ApiError::Unavailable(other.to_string()),
            (_, other) => ApiError::Internal(other.to_string()),
        }
    }
}

/// Shared, cheaply cloneable server state.
#[derive(Clone)]
pub struct AppState {
    pub invoker: AgentInvoker,
    pub memory: Arc<dyn MemoryStore>,
    pub principals: Arc<dyn PrincipalResolver>,
    pub owners: Arc<dyn ThreadOwnerStore>,
    pub config: Arc<RelayConfig>,
    /// Cancelled on shutdown; every relay holds a child token.
    pub shutdown: CancellationToken,
}

impl AppState {
    pub fn new(invoker: AgentInvoker, memory: Arc<dyn MemoryStore>, config: RelayConfig) -> Self {
        let principals = HeaderPrincipalResolver::new().with_tokens(config.tokens.clone());
        Self {
            invoker,
            memory,
            principals: Arc::new(principals),
            owners: Arc::new(InMemoryThreadOwnerStore::new()),
            config: Arc::new(config),
            shutdown: CancellationToken::new(),
        }
    }

    pub fn with_principal_resolver(mut self, principals: Arc<dyn PrincipalResolver>) -> Self {
        self.principals = principals;
        self
    }

    pub fn with_thread_owners(mut self, owners: Arc<dyn ThreadOwnerStore>) -> Self {
        self.owners = owners;
        self
    }

    pub fn with_shutdown(mut self, shutdown: CancellationToken) -> Self {
        self.shutdown = shutdown;
        self
    }

    /// Wire the default weather agent over the configured memory store.
    pub fn from_config(config: RelayConfig) -> Result<Self> {
        config.validate()?;
        let (memory, owners): (Arc<dyn MemoryStore>, Arc<dyn ThreadOwnerStore>) =
            match &config.memory_dir {
                Some(dir) => (
                    Arc::new(FileMemoryStore::new(dir)),
                    Arc::new(FileThreadOwnerStore::new(dir.join("owners"))),
                ),
                None => (
                    Arc::new(InMemoryMemoryStore::new()),
                    Arc::new(InMemoryThreadOwnerStore::new()),
                ),
            };
        let agent = LoopAgent::new(config.agent_name.clone(), Arc::clone(&memory))
            .with_instructions(WEATHER_INSTRUCTIONS)
            .with_tool(Arc::new(WeatherTool::new()))
            .with_max_steps(config.max_steps);
        let registry = AgentRegistry::new().with(Arc::new(agent));
        let invoker = AgentInvoker::new(Arc::new(registry), config.agent_name.clone(), config.memory_window);
        Ok(Self::new(invoker, memory, config).with_thread_owners(owners))
    }

    pub fn relay_settings(&self) -> RelaySettings {
        RelaySettings {
            idle_timeout: self.config.idle_timeout(),
            channel_capacity: self.config.channel_capacity,
        }
    }
}

impl std::fmt::Debug for AppState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("AppState")
            .field("invoker", &self.invoker)
            .field("config", &self.config)
            .finish_non_exhaustive()
    }
}

fn cors_layer() -> CorsLayer {
    CorsLayer::new()
        .allow_origin(Any)
        .allow_methods([Method::POST, Method::GET, Method::OPTIONS])
        .allow_headers([header::CONTENT_TYPE, header::AUTHORIZATION])
        .expose_headers([header::CONTENT_LENGTH, HeaderName::from_static(THREAD_ID_HEADER)])
        .max_age(CORS_MAX_AGE)
}

/// Build the application router.
pub fn router(state: AppState) -> Router {
    Router::new()
        .route("/", get(routes::health))
        .route(STREAM_PATH, post(routes::stream))
        .route(THREAD_MESSAGES_PATH, get(routes::thread_messages))
        .layer(cors_layer())
        .with_state(state)
}

/// Bind and serve until ctrl-c, then cancel in-flight relays.
pub async fn serve(state: AppState) -> Result<()> {
    let addr = state.config.socket_addr()?;
    let shutdown = state.shutdown.clone();
    let listener = tokio::net::TcpListener::bind(addr).await?;
    info!(%addr, agent = %state.invoker.agent_name(), "relay listening");

    axum::serve(listener, router(state))
        .with_graceful_shutdown(async move {
            let _ = tokio::signal::ctrl_c().await;
            info!("shutting down");
            shutdown.cancel();
        })
        .await?;
    Ok(())
}
