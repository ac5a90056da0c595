use axum::{Json, extract::State};

use murmur_types::api::HealthResponse;

use crate::state::AppState;

/// GET /health — liveness check plus the number of open streams.
pub async fn health(State(state): State<AppState>) -> Json<HealthResponse> {
    Json(HealthResponse {
        status: "ok".into(),
        sessions: state.dispatcher.registry().active_count(),
    })
}
