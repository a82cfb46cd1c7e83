use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::api::MessageView;

/// Events sent from the server over the socket gateway.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(
    tag = "type",
    content = "data",
    rename_all = "kebab-case",
    rename_all_fields = "camelCase"
)]
pub enum GatewayEvent {
    /// Server confirms successful identification
    Ready { user_id: Uuid, username: String },

    /// The connection is now a member of the conversation's room
    RoomJoined { conversation_id: Uuid },

    /// A message was appended to a conversation
    NewMessage {
        conversation_id: Uuid,
        message: MessageView,
    },

    /// A reaction was added to a message
    ReactionAdd {
        conversation_id: Uuid,
        message_id: Uuid,
        user_id: Uuid,
        username: String,
        emoji: String,
    },

    /// A reaction was removed from a message
    ReactionRemove {
        conversation_id: Uuid,
        message_id: Uuid,
        user_id: Uuid,
        emoji: String,
    },

    /// A command from this connection failed
    Error { kind: String, message: String },
}

/// Commands sent from the client to the server over the socket gateway.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(
    tag = "type",
    content = "data",
    rename_all = "kebab-case",
    rename_all_fields = "camelCase"
)]
pub enum GatewayCommand {
    /// Authenticate the socket with a bearer token
    Identify { token: String },

    /// Subscribe this connection to a conversation's room
    JoinRoom { conversation_id: Uuid },

    /// Persist a message and fan it out to the room
    SendMessage {
        room_id: Uuid,
        #[serde(default)]
        content: String,
        #[serde(default)]
        file_url: Option<String>,
    },
}
