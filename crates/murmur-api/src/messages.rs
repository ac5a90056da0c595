use axum::{
    Json,
    extract::{Query, State},
    http::StatusCode,
    response::IntoResponse,
};
use serde::Deserialize;
use tracing::{error, info};

use murmur_db::models::NewMessage;
use murmur_gateway::store::message_from_row;
use murmur_types::api::{SendMessageRequest, SendMessageResponse};
use murmur_types::models::ChatMessage;

use crate::state::AppState;

const MAX_USERNAME_CHARS: usize = 100;
const MAX_AVATAR_CHARS: usize = 255;

#[derive(Debug, Deserialize)]
pub struct HistoryQuery {
    #[serde(default = "default_limit")]
    pub limit: u32,
}

fn default_limit() -> u32 {
    50
}

/// POST /api/messages — store a message and fan it out to every open stream.
pub async fn send_message(
    State(state): State<AppState>,
    Json(req): Json<SendMessageRequest>,
) -> Result<impl IntoResponse, StatusCode> {
    // Stored trimmed, so the length checks see exactly what the row holds
    let username = req.username.trim().to_string();
    let avatar = req.avatar.trim().to_string();
    validate_sender(&username, &avatar)?;
    if req.message.trim().is_empty() {
        return Err(StatusCode::BAD_REQUEST);
    }

    // Run blocking DB insert off the async runtime
    let db = state.clone();
    let row = tokio::task::spawn_blocking(move || {
        db.db.insert_message(
            &NewMessage {
                username: &username,
                avatar: &avatar,
                message: &req.message,
                is_bot: req.is_bot,
            },
            db.dispatcher.notifier().as_ref(),
        )
    })
    .await
    .map_err(|e| {
        error!("spawn_blocking join error: {}", e);
        StatusCode::INTERNAL_SERVER_ERROR
    })?
    .map_err(|e| {
        error!("Failed to store message: {}", e);
        StatusCode::INTERNAL_SERVER_ERROR
    })?;

    info!("Message {} from {}", row.id, row.username);

    Ok((
        StatusCode::CREATED,
        Json(SendMessageResponse {
            status: "success",
            message: message_from_row(row),
        }),
    ))
}

/// GET /api/messages — most recent messages, oldest first.
pub async fn get_messages(
    State(state): State<AppState>,
    Query(query): Query<HistoryQuery>,
) -> Result<impl IntoResponse, StatusCode> {
    let db = state.clone();
    let limit = query.limit.min(200);

    let rows = tokio::task::spawn_blocking(move || db.db.get_recent_messages(limit))
        .await
        .map_err(|e| {
            error!("spawn_blocking join error: {}", e);
            StatusCode::INTERNAL_SERVER_ERROR
        })?
        .map_err(|e| {
            error!("Failed to load history: {}", e);
            StatusCode::INTERNAL_SERVER_ERROR
        })?;

    let messages: Vec<ChatMessage> = rows.into_iter().map(message_from_row).collect();
    Ok(Json(messages))
}

/// Non-empty and within the column limits. Callers pass the values they are
/// about to store or publish.
pub(crate) fn validate_sender(username: &str, avatar: &str) -> Result<(), StatusCode> {
    if username.is_empty() || username.chars().count() > MAX_USERNAME_CHARS {
        return Err(StatusCode::BAD_REQUEST);
    }
    if avatar.is_empty() || avatar.chars().count() > MAX_AVATAR_CHARS {
        return Err(StatusCode::BAD_REQUEST);
    }
    Ok(())
}
