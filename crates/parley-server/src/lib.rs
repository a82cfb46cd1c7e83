pub mod config;

use std::sync::Arc;

use axum::Router;
use tower_http::cors::CorsLayer;
use tower_http::trace::TraceLayer;

use parley_api::{AppState, AppStateInner};
use parley_chat::{
    AccountService, AuthGate, ContentStore, ConversationService, FanOut, LocalRooms,
    MessageService,
};
use parley_db::Database;
use parley_gateway::{GatewayState, GatewayTimings};

use crate::config::Config;

/// Open the store and wire the REST and socket surfaces over one set of services.
pub async fn app(config: &Config) -> anyhow::Result<Router> {
    let db = Arc::new(Database::open(&config.db_path)?);
    let gate = AuthGate::new(
        &config.jwt_secret,
        chrono::Duration::hours(config.token_ttl_hours),
    );
    let fanout: Arc<dyn FanOut> = Arc::new(LocalRooms::new());

    let conversations = ConversationService::new(db.clone());
    let messages = MessageService::new(db.clone(), fanout.clone());
    let files =
        ContentStore::new(config.upload_dir.clone(), db.clone(), config.max_upload_bytes).await?;

    let gateway = GatewayState {
        gate: gate.clone(),
        conversations: conversations.clone(),
        messages: messages.clone(),
        fanout,
        timings: GatewayTimings::default(),
    };

    let state: AppState = Arc::new(AppStateInner {
        accounts: AccountService::new(db.clone(), gate.clone()),
        conversations,
        messages,
        files,
        gate,
        db,
    });

    Ok(Router::new()
        .merge(parley_api::router(state))
        .merge(parley_gateway::router(gateway))
        .layer(CorsLayer::permissive())
        .layer(TraceLayer::new_for_http()))
}
