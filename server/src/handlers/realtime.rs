//! `POST /realtime`: a single multiplexed SSE stream carrying every topic
//! the client asked for in the request body.

use std::convert::Infallible;
use std::time::Duration;

use axum::extract::State;
use axum::response::sse::{Event, KeepAlive, Sse};
use axum::Json;
use futures::stream::Stream;
use headway_core::{SseEvent, Topic};
use tokio_stream::wrappers::UnboundedReceiverStream;
use tokio_stream::StreamExt;

use crate::AppState;

pub async fn subscribe(
    State(state): State<AppState>,
    Json(topics): Json<Vec<Topic>>,
) -> Sse<impl Stream<Item = Result<Event, Infallible>>> {
    let (conn_id, rx) = state.realtime.subscribe(topics);
    let dispatcher = state.realtime.clone();

    let stream = UnboundedReceiverStream::new(rx).map(|event| {
        let data = serde_json::to_string(&event).unwrap_or_default();
        Ok(Event::default().event(event_name(&event)).data(data))
    });

    let guarded = GuardedStream {
        inner: stream,
        conn_id,
        dispatcher,
    };

    Sse::new(guarded).keep_alive(
        KeepAlive::new()
            .interval(Duration::from_secs(state.config.realtime.ping_interval_seconds)),
    )
}

fn event_name(event: &SseEvent) -> &'static str {
    match event {
        SseEvent::Snapshot { .. } => "snapshot",
        SseEvent::Error { .. } => "error",
        SseEvent::Ping { .. } => "ping",
    }
}

/// Wraps the per-connection event stream so that when the client
/// disconnects (the stream is dropped), the connection's topic
/// subscriptions are removed from the dispatcher's registry.
struct GuardedStream<S> {
    inner: S,
    conn_id: String,
    dispatcher: std::sync::Arc<crate::realtime::RealtimeDispatcher>,
}

impl<S> Stream for GuardedStream<S>
where
    S: Stream<Item = Result<Event, Infallible>> + Unpin,
{
    type Item = Result<Event, Infallible>;

    fn poll_next(
        mut self: std::pin::Pin<&mut Self>,
        cx: &mut std::task::Context<'_>,
    ) -> std::task::Poll<Option<Self::Item>> {
        std::pin::Pin::new(&mut self.inner).poll_next(cx)
    }
}

impl<S> Drop for GuardedStream<S> {
    fn drop(&mut self) {
        self.dispatcher.unsubscribe(&self.conn_id);
    }
}
