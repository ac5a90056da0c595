pub mod health;
pub mod messages;
pub mod state;
pub mod stream;
pub mod typing;

use axum::{
    Router,
    routing::{get, post},
};

use crate::state::AppState;

/// All HTTP routes. Layers (CORS, tracing) are added by the binary.
pub fn router(state: AppState) -> Router {
    Router::new()
        .route("/api/stream", get(stream::stream_messages))
        .route("/api/messages", get(messages::get_messages).post(messages::send_message))
        .route("/api/typing", post(typing::send_typing))
        .route("/health", get(health::health))
        .with_state(state)
}
