//! Driving an agent event stream into an outbound byte channel.
//!
//! The pump reads one native event at a time, translates it, and awaits
//! channel capacity before reading the next, so a slow client slows the
//! agent instead of growing a buffer. A closed channel, a cancellation or an
//! idle timeout ends the pump and drops the agent stream.

use std::convert::Infallible;
use std::time::Duration;

use bytes::Bytes;
use futures::StreamExt;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tokio::time::{self, Instant};
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use super::multiplexer::StreamMultiplexer;
use super::protocol::StreamEvent;
use super::sse::{done_frame, encode_event};
use crate::agent::AgentEventStream;
use crate::error::RelayError;

/// How a relay ended.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RelayOutcome {
    /// `finish` was delivered.
    Completed,
    /// A terminal `error` was delivered.
    Failed(String),
    /// The agent produced nothing for the idle timeout.
    TimedOut,
    /// The client went away.
    Interrupted,
    /// The server cancelled the relay.
    Cancelled,
}

/// Limits applied to one relay.
#[derive(Debug, Clone, Copy)]
pub struct RelaySettings {
    pub idle_timeout: Option<Duration>,
    pub channel_capacity: usize,
}

impl Default for RelaySettings {
    fn default() -> Self {
        Self {
            idle_timeout: Some(Duration::from_millis(crate::config::DEFAULT_IDLE_TIMEOUT_MS)),
            channel_capacity: crate::config::DEFAULT_CHANNEL_CAPACITY,
        }
    }
}

/// Pump `events` through `mux` into `tx` until a terminal event is sent.
pub async fn pump(
    mut events: AgentEventStream,
    mut mux: StreamMultiplexer,
    tx: mpsc::Sender<Bytes>,
    cancel: CancellationToken,
    idle_timeout: Option<Duration>,
) -> RelayOutcome {
    let message_id = mux.message_id().to_string();
    let far_future = Duration::from_secs(86_400 * 365);
    let idle = time::sleep(idle_timeout.unwrap_or(far_future));
    tokio::pin!(idle);

    let outcome = loop {
        let batch = tokio::select! {
            biased;
            _ = cancel.cancelled() => break RelayOutcome::Cancelled,
            _ = tx.closed() => break RelayOutcome::Interrupted,
            _ = &mut idle, if idle_timeout.is_some() => {
                let ms = idle_timeout.map(|d| d.as_millis() as u64).unwrap_or_default();
                warn!(message_id = %message_id, timeout_ms = ms, "agent stream idle timeout");
                let _ = send_all(&tx, mux.fail(RelayError::Timeout(ms).to_string())).await;
                break RelayOutcome::TimedOut;
            }
            next = events.next() => match next {
                Some(Ok(event)) => mux.on_event(event),
                Some(Err(err)) => {
                    warn!(message_id = %message_id, error = %err, "agent run failed");
                    mux.fail(err.to_string())
                }
                None => mux.finish(None),
            },
        };

        if let Err(outcome) = send_all(&tx, batch).await {
            break outcome;
        }
        // Time spent waiting on the client does not count as agent silence.
        if let Some(timeout) = idle_timeout {
            idle.as_mut().reset(Instant::now() + timeout);
        }
        if mux.is_finished() {
            let _ = tx.send(done_frame()).await;
            break RelayOutcome::Completed;
        }
    };
    drop(events);

    match &outcome {
        RelayOutcome::Interrupted => info!(message_id = %message_id, "client disconnected; agent stream released"),
        RelayOutcome::Cancelled => info!(message_id = %message_id, "relay cancelled"),
        other => debug!(message_id = %message_id, outcome = ?other, "relay finished"),
    }
    outcome
}

/// Send every event of a batch, returning the final outcome once a terminal
/// event goes out or the channel closes.
async fn send_all(tx: &mpsc::Sender<Bytes>, batch: Vec<StreamEvent>) -> Result<(), RelayOutcome> {
    for event in batch {
        let terminal = match &event {
            StreamEvent::Error { error_text } => Some(RelayOutcome::Failed(error_text.clone())),
            _ => None,
        };
        let frame = match encode_event(&event) {
            Ok(frame) => frame,
            Err(err) => {
                warn!(error = %err, kind = event.kind(), "dropping unencodable event");
                continue;
            }
        };
        if tx.send(frame).await.is_err() {
            return Err(RelayOutcome::Interrupted);
        }
        if let Some(outcome) = terminal {
            let _ = tx.send(done_frame()).await;
            return Err(outcome);
        }
    }
    Ok(())
}

/// Spawn a relay and return the SSE body stream plus the pump's handle.
pub fn spawn_relay(
    events: AgentEventStream,
    mux: StreamMultiplexer,
    settings: RelaySettings,
    cancel: CancellationToken,
) -> (
    impl futures::Stream<Item = Result<Bytes, Infallible>> + Send + 'static,
    JoinHandle<RelayOutcome>,
) {
    let (tx, rx) = mpsc::channel(settings.channel_capacity.max(1));
    let handle = tokio::spawn(pump(events, mux, tx, cancel, settings.idle_timeout));
    (sse_body_stream(rx), handle)
}

/// A body carrying pre-encoded frames, for responses that never reach an agent.
pub fn frames_body(events: Vec<StreamEvent>) -> impl futures::Stream<Item = Result<Bytes, Infallible>> + Send + 'static {
    let mut frames: Vec<Bytes> = events
        .iter()
        .filter_map(|event| encode_event(event).ok())
        .collect();
    frames.push(done_frame());
    futures::stream::iter(frames.into_iter().map(Ok::<Bytes, Infallible>))
}

fn sse_body_stream(
    mut rx: mpsc::Receiver<Bytes>,
) -> impl futures::Stream<Item = Result<Bytes, Infallible>> + Send + 'static {
    async_stream::stream! {
        while let Some(chunk) = rx.recv().await {
            yield Ok::<Bytes, Infallible>(chunk);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::agent::AgentEvent;
    use crate::stream::sse::decode_body;
    use crate::types::FinishReason;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::Arc;

    fn scripted(events: Vec<crate::error::Result<AgentEvent>>) -> AgentEventStream {
        Box::pin(futures::stream::iter(events))
    }

    async fn collect(mut rx: mpsc::Receiver<Bytes>) -> Vec<u8> {
        let mut body = Vec::new();
        while let Some(chunk) = rx.recv().await {
            body.extend_from_slice(&chunk);
        }
        body
    }

    #[tokio::test]
    async fn completed_run_ends_with_finish_and_trailer() {
        let (tx, rx) = mpsc::channel(4);
        let events = scripted(vec![
            Ok(AgentEvent::text("hi")),
            Ok(AgentEvent::finish(FinishReason::Stop)),
        ]);
        let handle = tokio::spawn(pump(events, StreamMultiplexer::new("m"), tx, CancellationToken::new(), None));
        let body = collect(rx).await;
        assert_eq!(handle.await.unwrap(), RelayOutcome::Completed);
        assert!(body.ends_with(b"data: [DONE]\n\n"));
        let events = decode_body(&body).unwrap();
        assert_eq!(events.last(), Some(&StreamEvent::message_end(Some(FinishReason::Stop))));
    }

    #[tokio::test]
    async fn mid_run_error_is_terminal() {
        let (tx, rx) = mpsc::channel(64);
        let events = scripted(vec![
            Ok(AgentEvent::text("partial")),
            Err(RelayError::Stream("provider closed".into())),
            Ok(AgentEvent::text("never")),
        ]);
        let outcome = pump(events, StreamMultiplexer::new("m"), tx, CancellationToken::new(), None).await;
        assert!(matches!(outcome, RelayOutcome::Failed(ref e) if e.contains("provider closed")));
        let events = decode_body(&collect(rx).await).unwrap();
        assert!(matches!(events.last(), Some(StreamEvent::Error { .. })));
        assert!(!events.contains(&StreamEvent::text_delta("txt_0", "never")));
    }

    #[tokio::test(start_paused = true)]
    async fn idle_agent_times_out() {
        let (tx, rx) = mpsc::channel(64);
        let events: AgentEventStream = Box::pin(
            futures::stream::iter(vec![Ok(AgentEvent::text("thinking"))]).chain(futures::stream::pending()),
        );
        let outcome = pump(
            events,
            StreamMultiplexer::new("m"),
            tx,
            CancellationToken::new(),
            Some(Duration::from_secs(5)),
        )
        .await;
        assert_eq!(outcome, RelayOutcome::TimedOut);
        let events = decode_body(&collect(rx).await).unwrap();
        assert!(matches!(events.last(), Some(StreamEvent::Error { error_text }) if error_text.contains("Timeout")));
    }

    #[tokio::test(start_paused = true)]
    async fn slow_reader_does_not_trip_the_idle_timeout() {
        let events: AgentEventStream = Box::pin(futures::stream::iter(
            (0..20).map(|i| Ok(AgentEvent::text(format!("t{i}")))),
        ));
        let (tx, mut rx) = mpsc::channel(1);
        let handle = tokio::spawn(pump(
            events,
            StreamMultiplexer::new("m"),
            tx,
            CancellationToken::new(),
            Some(Duration::from_secs(5)),
        ));

        let mut body = Vec::new();
        while let Some(chunk) = rx.recv().await {
            body.extend_from_slice(&chunk);
            tokio::time::sleep(Duration::from_secs(6)).await;
        }

        assert_eq!(handle.await.unwrap(), RelayOutcome::Completed);
        let events = decode_body(&body).unwrap();
        assert_eq!(events.last(), Some(&StreamEvent::message_end(None)));
        assert!(events.contains(&StreamEvent::text_delta("txt_0", "t19")));
    }

    #[tokio::test]
    async fn dropped_receiver_stops_reading_the_agent() {
        let polled = Arc::new(AtomicUsize::new(0));
        let counter = Arc::clone(&polled);
        let events: AgentEventStream = Box::pin(
            futures::stream::iter(0..1_000)
                .map(move |i| {
                    counter.fetch_add(1, Ordering::SeqCst);
                    Ok(AgentEvent::text(format!("t{i}")))
                }),
        );
        let (tx, rx) = mpsc::channel(1);
        drop(rx);
        let outcome = pump(events, StreamMultiplexer::new("m"), tx, CancellationToken::new(), None).await;
        assert_eq!(outcome, RelayOutcome::Interrupted);
        assert!(polled.load(Ordering::SeqCst) <= 1);
    }

    #[tokio::test]
    async fn slow_reader_applies_backpressure() {
        let polled = Arc::new(AtomicUsize::new(0));
        let counter = Arc::clone(&polled);
        let events: AgentEventStream = Box::pin(futures::stream::iter(0..100).map(move |i| {
            counter.fetch_add(1, Ordering::SeqCst);
            Ok(AgentEvent::text(format!("t{i}")))
        }));
        let (tx, mut rx) = mpsc::channel(2);
        let handle = tokio::spawn(pump(events, StreamMultiplexer::new("m"), tx, CancellationToken::new(), None));

        let _ = rx.recv().await;
        tokio::task::yield_now().await;
        tokio::time::sleep(Duration::from_millis(20)).await;
        assert!(polled.load(Ordering::SeqCst) < 10, "agent ran ahead of the client");

        drop(rx);
        assert_eq!(handle.await.unwrap(), RelayOutcome::Interrupted);
    }

    #[tokio::test]
    async fn cancellation_ends_relay() {
        let (tx, _rx) = mpsc::channel(4);
        let cancel = CancellationToken::new();
        cancel.cancel();
        let outcome = pump(
            Box::pin(futures::stream::pending()),
            StreamMultiplexer::new("m"),
            tx,
            cancel,
            None,
        )
        .await;
        assert_eq!(outcome, RelayOutcome::Cancelled);
    }
}
