use axum::{
    Extension, Json,
    extract::{Path, State},
    response::IntoResponse,
};
use uuid::Uuid;

use parley_chat::Identity;
use parley_types::api::{ToggleReactionRequest, ToggleReactionResponse};

use crate::AppState;
use crate::error::ApiResult;

pub async fn toggle_reaction(
    State(state): State<AppState>,
    Path((conversation_id, message_id)): Path<(Uuid, Uuid)>,
    Extension(identity): Extension<Identity>,
    Json(req): Json<ToggleReactionRequest>,
) -> ApiResult<impl IntoResponse> {
    let added = state
        .messages
        .toggle_reaction(conversation_id, message_id, &identity, &req.emoji)
        .await?;

    Ok(Json(ToggleReactionResponse { added }))
}
