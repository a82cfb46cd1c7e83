//! Conversation and message-delivery core: the auth gate, accounts, the
//! conversation and message services, the room fan-out and the content store.

pub mod accounts;
pub mod auth;
pub mod conversations;
mod convert;
pub mod error;
pub mod files;
pub mod messages;
pub mod rooms;

use std::sync::Arc;

use parley_db::Database;
use tracing::error;

pub use accounts::AccountService;
pub use auth::{AuthGate, Identity};
pub use conversations::ConversationService;
pub use error::{ChatError, ChatResult};
pub use files::{ContentStore, StoredFile};
pub use messages::MessageService;
pub use rooms::{ConnectionId, FanOut, LocalRooms};

/// Run a store call on the blocking pool, off the async runtime.
pub(crate) async fn blocking<F, T>(db: &Arc<Database>, f: F) -> ChatResult<T>
where
    F: FnOnce(&Database) -> anyhow::Result<T> + Send + 'static,
    T: Send + 'static,
{
    let db = db.clone();
    tokio::task::spawn_blocking(move || f(&db))
        .await
        .map_err(|e| {
            error!("spawn_blocking join error: {}", e);
            ChatError::Internal(anyhow::anyhow!("blocking task failed: {}", e))
        })?
        .map_err(ChatError::Internal)
}
