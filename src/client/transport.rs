//! HTTP transport for the chat client.

use futures::StreamExt;
use reqwest::header::{HeaderValue, AUTHORIZATION};
use serde_json::json;
use tracing::{debug, warn};

use super::reassembler::{ChatStatus, Reassembler};
use crate::error::{RelayError, Result};
use crate::provider::http::{shared_client, status_to_error};
use crate::server::{STREAM_PATH, USER_ID_HEADER};
use crate::stream::SseDecoder;
use crate::thread::{Principal, ThreadId, ThreadIdResolver, ThreadIdStorage};

/// A chat session against a relay server.
///
/// Holds one thread id for its whole life and a transcript that every
/// response stream is folded into.
#[derive(Debug)]
pub struct ChatClient {
    http: reqwest::Client,
    base_url: String,
    thread_id: ThreadId,
    user_id: Option<String>,
    bearer_token: Option<String>,
    transcript: Reassembler,
}

impl ChatClient {
    pub fn new(base_url: impl Into<String>, thread_id: ThreadId) -> Self {
        Self {
            http: shared_client().clone(),
            base_url: base_url.into().trim_end_matches('/').to_string(),
            thread_id,
            user_id: None,
            bearer_token: None,
            transcript: Reassembler::new(),
        }
    }

    /// Resume the thread id kept in `storage`, creating one on first use.
    pub fn from_storage(
        base_url: impl Into<String>,
        storage: &dyn ThreadIdStorage,
        principal: &Principal,
    ) -> Result<Self> {
        let thread_id = ThreadIdResolver::resolve_persisted(storage, principal)?;
        let mut client = Self::new(base_url, thread_id);
        if let Principal::Authenticated(id) = principal {
            client.user_id = Some(id.clone());
        }
        Ok(client)
    }

    pub fn with_user_id(mut self, user_id: impl Into<String>) -> Self {
        self.user_id = Some(user_id.into());
        self
    }

    pub fn with_bearer_token(mut self, token: impl Into<String>) -> Self {
        self.bearer_token = Some(token.into());
        self
    }

    pub fn with_http_client(mut self, http: reqwest::Client) -> Self {
        self.http = http;
        self
    }

    pub fn thread_id(&self) -> &ThreadId {
        &self.thread_id
    }

    pub fn transcript(&self) -> &Reassembler {
        &self.transcript
    }

    pub fn status(&self) -> &ChatStatus {
        self.transcript.status()
    }

    /// Send one user turn and fold the response into the transcript.
    pub async fn send(&mut self, text: &str) -> Result<ChatStatus> {
        self.send_with(text, |_| {}).await
    }

    /// Like [`send`](Self::send), calling `on_update` after every applied event.
    ///
    /// Errors are returned only when no stream was opened (rejected turn,
    /// unreachable server). A stream that ends early is reported through
    /// [`ChatStatus::Truncated`].
    pub async fn send_with<F>(&mut self, text: &str, mut on_update: F) -> Result<ChatStatus>
    where
        F: FnMut(&Reassembler),
    {
        let user = self.transcript.push_user_message(text).clone();
        let body = json!({
            "threadId": self.thread_id,
            "messages": [user],
        });

        let mut request = self
            .http
            .post(format!("{}{}", self.base_url, STREAM_PATH))
            .json(&body);
        if let Some(user_id) = &self.user_id {
            request = request.header(USER_ID_HEADER, user_id);
        }
        if let Some(token) = &self.bearer_token {
            if let Ok(value) = HeaderValue::from_str(&format!("Bearer {token}")) {
                request = request.header(AUTHORIZATION, value);
            }
        }

        self.transcript.begin_stream();
        let response = match request.send().await {
            Ok(response) => response,
            Err(err) => {
                self.transcript.on_transport_closed();
                return Err(RelayError::Network(err));
            }
        };

        let status = response.status().as_u16();
        if !response.status().is_success() {
            let body = response.text().await.unwrap_or_default();
            self.transcript.on_transport_closed();
            return Err(match status {
                400 => RelayError::InvalidTurn(error_field(&body).unwrap_or(body)),
                _ => status_to_error(status, &body),
            });
        }

        let mut decoder = SseDecoder::new();
        let mut bytes = response.bytes_stream();
        'read: while let Some(chunk) = bytes.next().await {
            let chunk = match chunk {
                Ok(chunk) => chunk,
                Err(err) => {
                    warn!(thread_id = %self.thread_id, error = %err, "response stream broke");
                    break;
                }
            };
            for frame in decoder.push(&chunk) {
                match frame.into_event() {
                    Ok(Some(event)) => {
                        self.transcript.apply(event);
                        on_update(&self.transcript);
                    }
                    Ok(None) => break 'read,
                    Err(err) => debug!(error = %err, "skipping undecodable frame"),
                }
            }
        }
        if let Some(frame) = decoder.finish() {
            if let Ok(Some(event)) = frame.into_event() {
                self.transcript.apply(event);
                on_update(&self.transcript);
            }
        }

        self.transcript.on_transport_closed();
        Ok(self.transcript.status().clone())
    }
}

fn error_field(body: &str) -> Option<String> {
    let value: serde_json::Value = serde_json::from_str(body).ok()?;
    value.get("error")?.as_str().map(str::to_string)
}
