pub mod auth;
pub mod conversations;
pub mod error;
pub mod files;
pub mod health;
pub mod messages;
pub mod middleware;
pub mod reactions;

use std::sync::Arc;

use axum::{
    Router,
    extract::DefaultBodyLimit,
    middleware::from_fn_with_state,
    routing::{get, post},
};

use parley_chat::{AccountService, AuthGate, ContentStore, ConversationService, MessageService};
use parley_db::Database;

use crate::middleware::require_auth;

pub type AppState = Arc<AppStateInner>;

pub struct AppStateInner {
    pub db: Arc<Database>,
    pub gate: AuthGate,
    pub accounts: AccountService,
    pub conversations: ConversationService,
    pub messages: MessageService,
    pub files: ContentStore,
}

/// REST surface. Everything except auth and health sits behind the bearer gate.
pub fn router(state: AppState) -> Router {
    // Leave headroom above the upload cap so oversize files reach the content
    // store and come back as a structured payload_too_large error
    let body_limit = state.files.max_bytes() + 1024 * 1024;

    let public_routes = Router::new()
        .route("/auth/register", post(auth::register))
        .route("/auth/login", post(auth::login))
        .route("/health", get(health::health));

    let protected_routes = Router::new()
        .route(
            "/conversations",
            get(conversations::list_conversations).post(conversations::create_private),
        )
        .route("/conversations/group", post(conversations::create_group))
        .route("/message/{conversation_id}", post(messages::send_message))
        .route(
            "/message/{conversation_id}/{message_id}/reactions",
            post(reactions::toggle_reaction),
        )
        .route("/files", post(files::upload_file))
        .route("/files/{file_id}", get(files::download_file))
        .route_layer(from_fn_with_state(state.clone(), require_auth));

    Router::new()
        .merge(public_routes)
        .merge(protected_routes)
        .layer(DefaultBodyLimit::max(body_limit))
        .with_state(state)
}
