use axum::{extract::State, http::StatusCode, response::IntoResponse, routing::get, Json, Router};
use serde_json::json;
use tracing::warn;

use super::AppState;

/// Health check endpoint
async fn health(State(state): State<AppState>) -> impl IntoResponse {
    let (status, database) = match state.storage.database().ping().await {
        Ok(()) => (StatusCode::OK, "ok".to_string()),
        Err(e) => {
            warn!("Health check database ping failed: {}", e);
            (StatusCode::SERVICE_UNAVAILABLE, e.to_string())
        }
    };
    let label = if status.is_success() {
        "healthy"
    } else {
        "degraded"
    };

    (
        status,
        Json(json!({
            "status": label,
            "database": database,
            "version": env!("CARGO_PKG_VERSION")
        })),
    )
}

pub fn routes() -> Router<AppState> {
    Router::new().route("/health", get(health))
}
