// ABOUTME: Server-Sent Events helpers for live log and session streams
// ABOUTME: Keep-alive response builder, JSON event helpers and a stream that owns a guard

use axum::response::sse::{Event, KeepAlive, Sse};
use futures::stream::Stream;
use std::convert::Infallible;
use std::pin::Pin;
use std::task::{Context, Poll};
use std::time::Duration;

/// Interval between keep-alive comments on idle streams
pub const KEEP_ALIVE_INTERVAL: Duration = Duration::from_secs(15);

/// Stream wrapper that keeps `guard` alive exactly as long as the client stays connected
pub struct GuardedSseStream<S, G> {
    stream: Pin<Box<S>>,
    _guard: G,
}

impl<S, G> GuardedSseStream<S, G> {
    pub fn new(stream: S, guard: G) -> Self {
        Self {
            stream: Box::pin(stream),
            _guard: guard,
        }
    }
}

impl<S, G, T, E> Stream for GuardedSseStream<S, G>
where
    S: Stream<Item = Result<T, E>>,
    G: Unpin,
{
    type Item = Result<T, E>;

    fn poll_next(mut self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Option<Self::Item>> {
        self.stream.as_mut().poll_next(cx)
    }
}

/// Helper to create SSE response with standard keep-alive settings
pub fn create_sse_response<S>(stream: S) -> Sse<impl Stream<Item = Result<Event, Infallible>>>
where
    S: Stream<Item = Result<Event, Infallible>> + Send + 'static,
{
    Sse::new(stream).keep_alive(
        KeepAlive::new()
            .interval(KEEP_ALIVE_INTERVAL)
            .text("keep-alive"),
    )
}

/// Helper to create an SSE event from JSON-serializable data
pub fn create_sse_event<T: serde::Serialize>(
    event_type: &str,
    data: &T,
) -> Result<Event, serde_json::Error> {
    let json_data = serde_json::to_string(data)?;

    Ok(Event::default().event(event_type).data(json_data))
}

/// Helper to create an error SSE event
pub fn create_error_event(error_message: &str) -> Event {
    let payload = serde_json::json!({ "error": error_message });
    Event::default().event("error").data(payload.to_string())
}
