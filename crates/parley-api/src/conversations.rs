use axum::{Extension, Json, extract::State, http::StatusCode, response::IntoResponse};

use parley_chat::Identity;
use parley_types::api::{CreateGroupRequest, CreatePrivateRequest};

use crate::AppState;
use crate::error::ApiResult;

/// GET /conversations: Every conversation the caller takes part in.
/// Unpaginated; each entry carries its full message list.
pub async fn list_conversations(
    State(state): State<AppState>,
    Extension(identity): Extension<Identity>,
) -> ApiResult<impl IntoResponse> {
    let conversations = state.conversations.list_conversations(identity.id).await?;
    Ok(Json(conversations))
}

/// POST /conversations: Get or create the private conversation with another user.
pub async fn create_private(
    State(state): State<AppState>,
    Extension(identity): Extension<Identity>,
    Json(req): Json<CreatePrivateRequest>,
) -> ApiResult<impl IntoResponse> {
    let conversation = state
        .conversations
        .get_or_create_private(&identity, &req.participant_username)
        .await?;
    Ok(Json(conversation))
}

pub async fn create_group(
    State(state): State<AppState>,
    Extension(identity): Extension<Identity>,
    Json(req): Json<CreateGroupRequest>,
) -> ApiResult<impl IntoResponse> {
    let conversation = state
        .conversations
        .create_group(&identity, &req.name, &req.participant_usernames)
        .await?;
    Ok((StatusCode::CREATED, Json(conversation)))
}
