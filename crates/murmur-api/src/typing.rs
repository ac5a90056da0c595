use axum::{Json, extract::State, http::StatusCode, response::IntoResponse};
use tracing::warn;

use murmur_db::notify::NotifyError;
use murmur_gateway::error::TypingError;
use murmur_types::api::{StatusResponse, TypingRequest};

use crate::messages::validate_sender;
use crate::state::AppState;

/// POST /api/typing — relay a typing signal to every open stream.
pub async fn send_typing(
    State(state): State<AppState>,
    Json(req): Json<TypingRequest>,
) -> impl IntoResponse {
    let username = req.username.trim();
    let avatar = req.avatar.trim();
    if let Err(status) = validate_sender(username, avatar) {
        return (status, Json(StatusResponse::error("invalid username or avatar")));
    }

    match state.dispatcher.publish_typing(username, avatar, req.is_typing) {
        Ok(()) => (StatusCode::OK, Json(StatusResponse::success())),
        Err(e) => {
            warn!("Typing signal from {} dropped: {}", username, e);
            (publish_failure_status(&e), Json(StatusResponse::error(e.to_string())))
        }
    }
}

/// Only a lost transport is worth retrying.
fn publish_failure_status(err: &TypingError) -> StatusCode {
    match err {
        TypingError::Publish(NotifyError::TransportLost | NotifyError::Lagged(_)) => {
            StatusCode::SERVICE_UNAVAILABLE
        }
        TypingError::Publish(NotifyError::PayloadTooLarge(_)) => StatusCode::BAD_REQUEST,
        TypingError::Publish(NotifyError::Unsubscribed) | TypingError::Encode(_) => {
            StatusCode::INTERNAL_SERVER_ERROR
        }
    }
}

#[cfg(test)]
mod tests {
    use serde_json::json;
    use tower::ServiceExt;

    use super::*;
    use murmur_db::notify::NotificationChannel;
    use murmur_types::events::TYPING_CHANNEL;

    use crate::router;
    use crate::test_support::{body_json, json_request, test_state};

    #[tokio::test]
    async fn relays_signal_to_listeners() {
        let (state, notifier) = test_state();
        let mut sub = notifier.subscribe(&[TYPING_CHANNEL]).unwrap();

        let response = router(state)
            .oneshot(json_request(
                "POST",
                "/api/typing",
                json!({"username": "bob", "avatar": "/bob.png", "is_typing": true}),
            ))
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::OK);
        assert_eq!(body_json(response).await, json!({"status": "success"}));

        let payload: serde_json::Value =
            serde_json::from_str(&sub.next().await.unwrap().payload).unwrap();
        assert_eq!(payload, json!({"username": "bob", "avatar": "/bob.png", "is_typing": true}));
    }

    #[tokio::test]
    async fn succeeds_with_nobody_listening() {
        let (state, _notifier) = test_state();

        let response = router(state)
            .oneshot(json_request(
                "POST",
                "/api/typing",
                json!({"username": "bob", "avatar": "/bob.png", "is_typing": false}),
            ))
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::OK);
    }

    #[tokio::test]
    async fn rejects_invalid_sender_without_publishing() {
        let (state, notifier) = test_state();
        let mut sub = notifier.subscribe(&[TYPING_CHANNEL]).unwrap();

        for body in [
            json!({"username": "b".repeat(9000), "avatar": "/bob.png", "is_typing": true}),
            json!({"username": "  ", "avatar": "/bob.png", "is_typing": true}),
            json!({"username": "bob", "avatar": "", "is_typing": false}),
        ] {
            let response = router(state.clone())
                .oneshot(json_request("POST", "/api/typing", body))
                .await
                .unwrap();
            assert_eq!(response.status(), StatusCode::BAD_REQUEST);
            assert_eq!(body_json(response).await["status"], "error");
        }

        let nothing = tokio::time::timeout(std::time::Duration::from_millis(50), sub.next()).await;
        assert!(nothing.is_err());
    }

    #[test]
    fn oversized_payload_is_not_retryable() {
        assert_eq!(
            publish_failure_status(&TypingError::Publish(NotifyError::PayloadTooLarge(9000))),
            StatusCode::BAD_REQUEST
        );
        assert_eq!(
            publish_failure_status(&TypingError::Publish(NotifyError::TransportLost)),
            StatusCode::SERVICE_UNAVAILABLE
        );
    }

    #[tokio::test]
    async fn reports_transport_failure() {
        let (state, notifier) = test_state();
        notifier.shutdown();

        let response = router(state)
            .oneshot(json_request(
                "POST",
                "/api/typing",
                json!({"username": "bob", "avatar": "/bob.png", "is_typing": true}),
            ))
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::SERVICE_UNAVAILABLE);

        let body = body_json(response).await;
        assert_eq!(body["status"], "error");
        assert!(body["message"].as_str().unwrap().contains("transport lost"));
    }
}
