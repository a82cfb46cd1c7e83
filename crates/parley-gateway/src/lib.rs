pub mod connection;

use std::sync::Arc;
use std::time::Duration;

use axum::{
    Router,
    extract::{State, WebSocketUpgrade},
    response::IntoResponse,
    routing::get,
};

use parley_chat::{AuthGate, ConversationService, FanOut, MessageService};

/// Everything a socket connection needs to serve `join-room` and `send-message`.
#[derive(Clone)]
pub struct GatewayState {
    pub gate: AuthGate,
    pub conversations: ConversationService,
    pub messages: MessageService,
    pub fanout: Arc<dyn FanOut>,
    pub timings: GatewayTimings,
}

/// Connection deadlines.
#[derive(Debug, Clone, Copy)]
pub struct GatewayTimings {
    /// A socket must identify within this window or it is closed.
    pub identify_timeout: Duration,
    /// The server pings this often; two missed pongs drop the connection.
    pub heartbeat_interval: Duration,
}

impl Default for GatewayTimings {
    fn default() -> Self {
        Self {
            identify_timeout: Duration::from_secs(10),
            heartbeat_interval: Duration::from_secs(15),
        }
    }
}

pub fn router(state: GatewayState) -> Router {
    Router::new()
        .route("/gateway", get(ws_upgrade))
        .with_state(state)
}

async fn ws_upgrade(State(state): State<GatewayState>, ws: WebSocketUpgrade) -> impl IntoResponse {
    ws.on_upgrade(move |socket| connection::handle_connection(socket, state))
}
