use std::convert::Infallible;

use axum::body::Body;
use axum::extract::rejection::JsonRejection;
use axum::extract::{Path, Query, State};
use axum::http::{header, HeaderMap, HeaderName, HeaderValue};
use axum::response::{IntoResponse, Response};
use axum::Json;
use bytes::Bytes;
use serde::Deserialize;
use serde_json::json;
use tracing::{info, warn};

use super::{ApiError, AppState, THREAD_ID_HEADER};
use crate::stream::protocol::{PROTOCOL_HEADER, PROTOCOL_VERSION};
use crate::stream::relay::frames_body;
use crate::stream::{spawn_relay, StreamMultiplexer};
use crate::thread::{authorize, ThreadAccess, ThreadId, ThreadIdResolver};
use crate::turn::extract_latest_user_turn;
use crate::types::{ui_messages_from_history, UiMessage};

/// Body of a stream request: the client's thread id and its newest turn.
#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct StreamRequest {
    #[serde(default)]
    pub thread_id: Option<String>,
    #[serde(default)]
    pub messages: Vec<UiMessage>,
}

#[derive(Debug, Deserialize)]
pub struct HistoryQuery {
    pub limit: Option<usize>,
}

pub(super) async fn health() -> &'static str {
    "ok"
}

pub(super) async fn stream(
    State(st): State<AppState>,
    headers: HeaderMap,
    payload: Result<Json<StreamRequest>, JsonRejection>,
) -> Result<Response, ApiError> {
    let Json(req) = payload.map_err(|e| ApiError::BadRequest(e.body_text()))?;

    let turn = extract_latest_user_turn(&req.messages)?;
    let principal = st.principals.resolve(&headers);
    let thread_id = ThreadIdResolver::resolve(req.thread_id.as_deref(), &principal);
    authorize(st.owners.as_ref(), &thread_id, &principal, ThreadAccess::Write)
        .await
        .inspect_err(|_| warn!(thread_id = %thread_id, "stream refused for foreign thread"))?;

    let mut mux = StreamMultiplexer::default();
    info!(
        thread_id = %thread_id,
        message_id = %mux.message_id(),
        history_sent = req.messages.len(),
        "stream request"
    );

    let events = match st
        .invoker
        .invoke(turn, thread_id.clone(), &principal, st.config.run_config())
        .await
    {
        Ok(events) => events,
        Err(err) => {
            warn!(thread_id = %thread_id, error = %err, "invocation failed");
            return Ok(sse_response(frames_body(mux.fail(err.to_string())), &thread_id));
        }
    };

    let (body, _relay) = spawn_relay(events, mux, st.relay_settings(), st.shutdown.child_token());
    Ok(sse_response(body, &thread_id))
}

pub(super) async fn thread_messages(
    State(st): State<AppState>,
    headers: HeaderMap,
    Path(raw_id): Path<String>,
    Query(query): Query<HistoryQuery>,
) -> Result<impl IntoResponse, ApiError> {
    let thread_id =
        ThreadId::parse(&raw_id).ok_or_else(|| ApiError::BadRequest("thread id cannot be empty".into()))?;
    let principal = st.principals.resolve(&headers);
    authorize(st.owners.as_ref(), &thread_id, &principal, ThreadAccess::Read).await?;
    let limit = query.limit.unwrap_or(st.config.memory_window);
    let history = st.memory.recent(&thread_id, limit).await?;
    Ok(Json(json!({
        "threadId": thread_id,
        "messages": ui_messages_from_history(&history),
    })))
}

fn sse_response<S>(stream: S, thread_id: &ThreadId) -> Response
where
    S: futures::Stream<Item = Result<Bytes, Infallible>> + Send + 'static,
{
    let mut response = Body::from_stream(stream).into_response();
    let headers = response.headers_mut();
    headers.insert(header::CONTENT_TYPE, HeaderValue::from_static("text/event-stream"));
    headers.insert(header::CACHE_CONTROL, HeaderValue::from_static("no-cache"));
    headers.insert(header::CONNECTION, HeaderValue::from_static("keep-alive"));
    headers.insert(
        HeaderName::from_static(PROTOCOL_HEADER),
        HeaderValue::from_static(PROTOCOL_VERSION),
    );
    if let Ok(value) = HeaderValue::from_str(thread_id.as_str()) {
        headers.insert(HeaderName::from_static(THREAD_ID_HEADER), value);
    }
    response
}
