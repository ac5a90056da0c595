use std::convert::Infallible;

use axum::{
    extract::{Query, State},
    http::{HeaderMap, HeaderName, StatusCode, header},
    response::{
        IntoResponse,
        sse::{Event, KeepAlive, Sse},
    },
};
use futures_util::{StreamExt, future};
use serde::Deserialize;
use tracing::{error, info, warn};

use murmur_types::events::StreamEvent;

use crate::state::AppState;

const LAST_EVENT_ID: &str = "last-event-id";

#[derive(Debug, Deserialize)]
pub struct StreamQuery {
    /// Fallback for clients that cannot set `Last-Event-ID` on the first connect.
    pub last_event_id: Option<String>,
}

/// GET /api/stream — SSE feed of messages and typing signals.
///
/// Reconnecting clients send the id of the last message they saw and get
/// everything after it before the live feed resumes.
pub async fn stream_messages(
    State(state): State<AppState>,
    Query(query): Query<StreamQuery>,
    headers: HeaderMap,
) -> Result<impl IntoResponse, StatusCode> {
    let watermark = resolve_watermark(&headers, query.last_event_id.as_deref());
    info!("New stream connection (Last-Event-ID: {:?})", watermark);

    let session = state.dispatcher.open_session(watermark).map_err(|e| {
        error!("Cannot open stream session: {}", e);
        StatusCode::SERVICE_UNAVAILABLE
    })?;

    let events = session
        .into_stream()
        .filter_map(|event| future::ready(to_sse_event(&event).map(Ok::<_, Infallible>)));

    Ok((
        [
            (header::CACHE_CONTROL, "no-cache"),
            (HeaderName::from_static("x-accel-buffering"), "no"),
        ],
        Sse::new(events).keep_alive(KeepAlive::new().interval(state.keep_alive)),
    ))
}

/// `Last-Event-ID` header first, then the query parameter. Anything that is
/// not an integer is ignored and the client gets a live-only stream.
fn resolve_watermark(headers: &HeaderMap, query: Option<&str>) -> Option<i64> {
    let raw = headers
        .get(LAST_EVENT_ID)
        .and_then(|v| v.to_str().ok())
        .or(query)?;

    match raw.trim().parse::<i64>() {
        Ok(id) => Some(id),
        Err(_) => {
            warn!("Ignoring invalid Last-Event-ID '{}'", raw);
            None
        }
    }
}

fn to_sse_event(event: &StreamEvent) -> Option<Event> {
    let data = match event.data() {
        Ok(data) => data,
        Err(e) => {
            warn!("Failed to encode {} event: {}", event.name(), e);
            return None;
        }
    };

    let mut sse = Event::default().event(event.name()).data(data);
    if let Some(id) = event.id() {
        sse = sse.id(id);
    }
    Some(sse)
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;

    use axum::body::Body;
    use axum::http::{Request, Response};
    use http_body_util::BodyExt;
    use tower::ServiceExt;

    use murmur_db::models::NewMessage;

    use crate::router;
    use crate::test_support::test_state;

    fn insert(state: &AppState, text: &str) -> i64 {
        state
            .db
            .insert_message(
                &NewMessage {
                    username: "alice",
                    avatar: "/fox.png",
                    message: text,
                    is_bot: false,
                },
                state.dispatcher.notifier().as_ref(),
            )
            .unwrap()
            .id
    }

    /// Read SSE frames until `needle` shows up or nothing arrives for a while.
    async fn read_until(body: &mut Body, buffer: &mut String, needle: &str) {
        while !buffer.contains(needle) {
            let frame = tokio::time::timeout(Duration::from_millis(500), body.frame())
                .await
                .expect("stream stalled")
                .expect("stream ended")
                .expect("body error");
            if let Ok(data) = frame.into_data() {
                buffer.push_str(std::str::from_utf8(&data).unwrap());
            }
        }
    }

    async fn open(state: &AppState, request: Request<Body>) -> Response<Body> {
        router(state.clone()).oneshot(request).await.unwrap()
    }

    #[tokio::test]
    async fn replays_after_last_event_id_then_streams_live() {
        let (state, _notifier) = test_state();
        for text in ["one", "two", "three"] {
            insert(&state, text);
        }

        let response = open(
            &state,
            Request::builder()
                .uri("/api/stream")
                .header("Last-Event-ID", "1")
                .body(Body::empty())
                .unwrap(),
        )
        .await;

        assert_eq!(response.status(), StatusCode::OK);
        let headers = response.headers();
        assert!(
            headers[header::CONTENT_TYPE]
                .to_str()
                .unwrap()
                .starts_with("text/event-stream")
        );
        assert_eq!(headers[header::CACHE_CONTROL], "no-cache");
        assert_eq!(headers["x-accel-buffering"], "no");

        let mut body = response.into_body();
        let mut seen = String::new();
        read_until(&mut body, &mut seen, "id: 3").await;
        assert!(!seen.contains("id: 1\n"));
        let two = seen.find("id: 2").unwrap();
        let three = seen.find("id: 3").unwrap();
        assert!(two < three);
        assert!(seen.contains("event: message"));
        assert!(seen.contains(r#""message":"three""#));

        insert(&state, "four");
        read_until(&mut body, &mut seen, "id: 4").await;

        state.dispatcher.publish_typing("bob", "/bob.png", true).unwrap();
        read_until(&mut body, &mut seen, "event: typing").await;
        assert!(seen.contains(r#"{"username":"bob","avatar":"/bob.png","is_typing":true}"#));
    }

    #[tokio::test]
    async fn query_parameter_is_accepted_as_watermark() {
        let (state, _notifier) = test_state();
        insert(&state, "one");
        insert(&state, "two");

        let response = open(
            &state,
            Request::builder()
                .uri("/api/stream?last_event_id=1")
                .body(Body::empty())
                .unwrap(),
        )
        .await;

        let mut body = response.into_body();
        let mut seen = String::new();
        read_until(&mut body, &mut seen, "id: 2").await;
        assert!(!seen.contains("id: 1\n"));
    }

    #[tokio::test]
    async fn client_disconnect_closes_the_session() {
        let (state, notifier) = test_state();

        let response = open(
            &state,
            Request::builder().uri("/api/stream").body(Body::empty()).unwrap(),
        )
        .await;
        assert_eq!(state.dispatcher.registry().active_count(), 1);
        assert_eq!(notifier.listener_count(), 1);

        drop(response);

        assert_eq!(state.dispatcher.registry().active_count(), 0);
        assert_eq!(notifier.listener_count(), 0);
    }

    #[tokio::test]
    async fn unavailable_once_transport_is_down() {
        let (state, notifier) = test_state();
        notifier.shutdown();

        let response = open(
            &state,
            Request::builder().uri("/api/stream").body(Body::empty()).unwrap(),
        )
        .await;
        assert_eq!(response.status(), StatusCode::SERVICE_UNAVAILABLE);
    }

    #[test]
    fn header_wins_over_query_and_garbage_is_ignored() {
        let mut headers = HeaderMap::new();
        assert_eq!(resolve_watermark(&headers, None), None);
        assert_eq!(resolve_watermark(&headers, Some("5")), Some(5));

        headers.insert(LAST_EVENT_ID, "9".parse().unwrap());
        assert_eq!(resolve_watermark(&headers, Some("5")), Some(9));

        headers.insert(LAST_EVENT_ID, "abc".parse().unwrap());
        assert_eq!(resolve_watermark(&headers, Some("5")), None);
    }
}
