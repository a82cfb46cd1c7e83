use axum::{Json, extract::State, http::StatusCode, response::IntoResponse};

use parley_types::api::{LoginRequest, RegisterRequest};

use crate::AppState;
use crate::error::ApiResult;

pub async fn register(
    State(state): State<AppState>,
    Json(req): Json<RegisterRequest>,
) -> ApiResult<impl IntoResponse> {
    let response = state.accounts.register(req).await?;
    Ok((StatusCode::CREATED, Json(response)))
}

pub async fn login(
    State(state): State<AppState>,
    Json(req): Json<LoginRequest>,
) -> ApiResult<impl IntoResponse> {
    let response = state.accounts.login(req).await?;
    Ok(Json(response))
}
