//! Engine event stream over Server-Sent Events.
//!
//! The engine has a single subscriber slot, so opening a new stream closes
//! the previous one.

use std::convert::Infallible;
use std::time::Duration;

use axum::extract::State;
use axum::response::sse::{Event, KeepAlive, Sse};
use beacon_core::{EngineEvent, EventReceiver};
use futures::stream::{self, Stream};
use tracing::{info, warn};

use crate::state::SharedState;

const KEEP_ALIVE_INTERVAL: Duration = Duration::from_secs(15);

/// Render one engine event as an SSE frame named after the event.
pub fn to_sse_event(event: &EngineEvent) -> Event {
    Event::default()
        .event(event.name())
        .json_data(event)
        .unwrap_or_else(|e| {
            warn!(event = event.name(), error = %e, "Event serialization failed");
            Event::default().event("error").data(e.to_string())
        })
}

fn event_stream(rx: EventReceiver) -> impl Stream<Item = Result<Event, Infallible>> {
    stream::unfold(rx, |mut rx| async move {
        let event = rx.recv().await?;
        Some((Ok(to_sse_event(&event)), rx))
    })
}

/// Stream engine events.
#[utoipa::path(
    get,
    path = "/api/events",
    tag = "events",
    operation_id = "streamEvents",
    summary = "Stream engine events",
    description = "Server-Sent Events stream of engine events. Each frame's event name \
        is the event type (beaconRanged, beaconDetected, outsideShiftDetection, \
        offlineDetection, beaconLost, regionEnter, regionExit, monitoringStarted, \
        monitoringStopped) and its data is the JSON-encoded event. Only one stream \
        is served at a time; opening another ends this one.",
    responses(
        (status = 200, description = "Event stream", content_type = "text/event-stream", body = EngineEvent)
    )
)]
pub async fn stream_events(
    State(state): State<SharedState>,
) -> Sse<impl Stream<Item = Result<Event, Infallible>>> {
    info!("Event subscriber attached");
    let rx = state.engine.subscribe_events();
    Sse::new(event_stream(rx)).keep_alive(KeepAlive::new().interval(KEEP_ALIVE_INTERVAL))
}

#[cfg(test)]
mod tests {
    use super::*;
    use futures::StreamExt;
    use tokio::sync::mpsc;

    #[tokio::test]
    async fn test_stream_ends_when_sender_drops() {
        let (tx, rx) = mpsc::unbounded_channel();
        tokio_test::assert_ok!(tx.send(EngineEvent::MonitoringStopped {}));
        drop(tx);

        let frames: Vec<_> = event_stream(rx).collect().await;
        assert_eq!(frames.len(), 1);
    }
}
