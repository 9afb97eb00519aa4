//! Resolving the caller of a request.

use std::collections::HashMap;

use axum::http::header::AUTHORIZATION;
use axum::http::HeaderMap;
use tracing::debug;

use super::USER_ID_HEADER;
use crate::thread::Principal;

/// Maps request headers to a principal.
pub trait PrincipalResolver: Send + Sync {
    fn resolve(&self, headers: &HeaderMap) -> Principal;
}

/// Bearer tokens from a static table, then `x-user-id`, else anonymous.
#[derive(Debug, Clone, Default)]
pub struct HeaderPrincipalResolver {
    tokens: HashMap<String, String>,
}

impl HeaderPrincipalResolver {
    pub fn new() -> Self {
        Self::default()
    }

    /// Accept `Authorization: Bearer <token>` for every token in `tokens`,
    /// resolving to the mapped principal id.
    pub fn with_tokens(mut self, tokens: HashMap<String, String>) -> Self {
        self.tokens = tokens;
        self
    }

    fn from_bearer(&self, headers: &HeaderMap) -> Option<Principal> {
        let raw = headers.get(AUTHORIZATION)?.to_str().ok()?;
        let token = raw.strip_prefix("Bearer ")?.trim();
        match self.tokens.get(token) {
            Some(id) => Some(Principal::Authenticated(id.clone())),
            None => {
                debug!("unknown bearer token");
                None
            }
        }
    }
}

impl PrincipalResolver for HeaderPrincipalResolver {
    fn resolve(&self, headers: &HeaderMap) -> Principal {
        if let Some(principal) = self.from_bearer(headers) {
            return principal;
        }
        headers
            .get(USER_ID_HEADER)
            .and_then(|v| v.to_str().ok())
            .map(str::trim)
            .filter(|id| !id.is_empty())
            .map(|id| Principal::Authenticated(id.to_string()))
            .unwrap_or(Principal::Anonymous)
    }
}
