use axum::{Json, extract::State, http::StatusCode, response::IntoResponse};
use tracing::warn;

use parley_chat::ChatError;
use parley_types::api::HealthResponse;

use crate::AppState;

/// GET /health: Reports whether the conversation store answers a round-trip.
pub async fn health(State(state): State<AppState>) -> impl IntoResponse {
    let db = state.db.clone();
    let ping = match tokio::task::spawn_blocking(move || db.ping()).await {
        Ok(Ok(())) => Ok(()),
        Ok(Err(e)) => Err(ChatError::StoreUnavailable(format!("{:#}", e))),
        Err(e) => Err(ChatError::StoreUnavailable(e.to_string())),
    };

    match ping {
        Ok(()) => (
            StatusCode::OK,
            Json(HealthResponse {
                status: "ok".into(),
                store_state: "connected".into(),
            }),
        ),
        Err(err) => {
            warn!("Health probe failed: {}", err);
            (
                StatusCode::SERVICE_UNAVAILABLE,
                Json(HealthResponse {
                    status: "error".into(),
                    store_state: "disconnected".into(),
                }),
            )
        }
    }
}
