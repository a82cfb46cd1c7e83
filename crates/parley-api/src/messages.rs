use axum::{
    Extension, Json,
    extract::{Path, State},
    http::StatusCode,
    response::IntoResponse,
};
use uuid::Uuid;

use parley_chat::Identity;
use parley_types::api::SendMessageRequest;

use crate::AppState;
use crate::error::ApiResult;

/// POST /message/{conversation_id}: Append and fan out in one step.
/// Responds with the stored message, sender resolved to a username.
pub async fn send_message(
    State(state): State<AppState>,
    Path(conversation_id): Path<Uuid>,
    Extension(identity): Extension<Identity>,
    Json(req): Json<SendMessageRequest>,
) -> ApiResult<impl IntoResponse> {
    let message = state
        .messages
        .append_message(
            conversation_id,
            &identity,
            &req.content,
            req.file_url.as_deref(),
        )
        .await?;

    Ok((StatusCode::CREATED, Json(message)))
}
