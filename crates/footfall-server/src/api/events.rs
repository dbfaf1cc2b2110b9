//! Server-sent stream of link transition events.

use std::convert::Infallible;
use std::time::Duration;

use axum::extract::State;
use axum::response::sse::{Event as SseEvent, KeepAlive, Sse};
use footfall_core::LinkEvent;
use futures::stream::{self, Stream};
use tokio::sync::broadcast::error::RecvError;

use crate::state::SharedState;

const KEEP_ALIVE_INTERVAL: Duration = Duration::from_secs(15);

/// SSE event name for a link event.
#[must_use]
pub const fn event_name(event: &LinkEvent) -> &'static str {
    match event {
        LinkEvent::Connecting => "connecting",
        LinkEvent::Connected { .. } => "connected",
        LinkEvent::ConnectFailed { .. } => "connect_failed",
        LinkEvent::Disconnected { .. } => "disconnected",
        LinkEvent::RemoteDisconnected { .. } => "remote_disconnected",
        LinkEvent::WriteFailed { .. } => "write_failed",
    }
}

fn to_sse(event: &LinkEvent) -> SseEvent {
    let data = serde_json::to_string(event).unwrap_or_else(|_| "{}".to_string());
    SseEvent::default().event(event_name(event)).data(data)
}

/// Stream link events.
#[utoipa::path(
    get,
    path = "/api/events",
    tag = "link",
    operation_id = "streamLinkEvents",
    summary = "Stream link events",
    description = "Server-sent events, one per link transition: `connecting`, \
        `connected`, `connect_failed`, `disconnected`, `remote_disconnected` and \
        `write_failed`. The data field carries the event as JSON. Slow readers \
        skip events they fell behind on.",
    responses(
        (status = 200, description = "Event stream", content_type = "text/event-stream", body = LinkEvent)
    )
)]
pub async fn stream_events(
    State(state): State<SharedState>,
) -> Sse<impl Stream<Item = Result<SseEvent, Infallible>>> {
    let receiver = state.tracker.subscribe();

    let events = stream::unfold(receiver, |mut receiver| async move {
        loop {
            match receiver.recv().await {
                Ok(event) => return Some((Ok(to_sse(&event)), receiver)),
                Err(RecvError::Lagged(skipped)) => {
                    tracing::debug!(skipped, "Event stream reader lagged");
                }
                Err(RecvError::Closed) => return None,
            }
        }
    });

    Sse::new(events).keep_alive(KeepAlive::new().interval(KEEP_ALIVE_INTERVAL))
}

#[cfg(test)]
mod tests {
    use axum::body::Body;
    use axum::http::{header, Request, StatusCode};
    use footfall_core::DeviceIdentity;
    use futures::StreamExt;
    use tower::ServiceExt;

    use super::*;
    use crate::api::create_router;
    use crate::api::test_support::test_state;

    #[test]
    fn test_event_names() {
        assert_eq!(event_name(&LinkEvent::Connecting), "connecting");
        assert_eq!(
            event_name(&LinkEvent::RemoteDisconnected {
                device: DeviceIdentity {
                    id: "id".into(),
                    name: None,
                },
            }),
            "remote_disconnected"
        );
        assert_eq!(
            event_name(&LinkEvent::WriteFailed {
                reason: "x".into()
            }),
            "write_failed"
        );
    }

    #[tokio::test]
    async fn test_stream_carries_connect_events() {
        let (state, _transport) = test_state();
        let app = create_router(state.clone());

        let response = app
            .oneshot(
                Request::builder()
                    .uri("/api/events")
                    .body(Body::empty())
                    .unwrap(),
            )
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::OK);
        assert_eq!(response.headers()[header::CONTENT_TYPE], "text/event-stream");

        state.tracker.connect().await.unwrap();

        let mut body = response.into_body().into_data_stream();
        let mut text = String::new();
        while !text.contains("event: connected\n") {
            let chunk = tokio::time::timeout(Duration::from_secs(5), body.next())
                .await
                .unwrap()
                .unwrap()
                .unwrap();
            text.push_str(std::str::from_utf8(&chunk).unwrap());
        }

        assert!(text.contains("event: connecting\n"));
        assert!(text.contains("\"event\":\"connected\""));
    }
}
