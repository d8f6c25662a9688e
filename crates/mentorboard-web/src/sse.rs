//! Server-Sent Events for refresh activity

use axum::response::sse::{Event, KeepAlive, Sse};
use futures::stream::Stream;
use mentorboard_core::{DataEvent, EventBus};
use serde_json::json;
use std::convert::Infallible;
use tokio_stream::wrappers::BroadcastStream;
use tokio_stream::StreamExt;

/// Create an SSE stream from the event bus
/// Takes EventBus by value (cheap clone, Arc internally)
pub fn create_sse_stream(
    event_bus: EventBus,
) -> Sse<impl Stream<Item = Result<Event, Infallible>>> {
    let rx = event_bus.subscribe();
    let stream = BroadcastStream::new(rx);

    // Lagged receivers skip the missed events
    let sse_stream = stream.filter_map(|result: Result<DataEvent, _>| {
        result
            .ok()
            .map(|event| Ok(Event::default().event(event.name()).data(payload(&event).to_string())))
    });

    Sse::new(sse_stream).keep_alive(KeepAlive::default())
}

fn payload(event: &DataEvent) -> serde_json::Value {
    match event {
        DataEvent::Enqueued { key, reason } => json!({ "subject": key, "reason": reason }),
        DataEvent::RecordRefreshed(key) | DataEvent::SubjectPurged(key) => {
            json!({ "subject": key })
        }
        DataEvent::RefreshFailed { key, kind, message } => {
            json!({ "subject": key, "kind": kind, "message": message })
        }
        DataEvent::TickCompleted(summary) => json!(summary),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use mentorboard_types::SubjectKey;

    #[test]
    fn test_payload_shapes() {
        let value = payload(&DataEvent::RefreshFailed {
            key: SubjectKey::director("director_7"),
            kind: "source_unavailable",
            message: "timed out".to_string(),
        });
        assert_eq!(value["subject"]["subject_id"], "director_7");
        assert_eq!(value["subject"]["subject_type"], "director");
        assert_eq!(value["kind"], "source_unavailable");
    }
}
