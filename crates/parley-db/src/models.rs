//! Database row types. These map directly to SQLite rows and stay independent
//! of the wire types in parley-types.

use chrono::{DateTime, Utc};

pub struct UserRow {
    pub id: String,
    pub username: String,
    pub email: String,
    pub password: String,
    pub role: String,
    pub created_at: DateTime<Utc>,
}

pub struct ConversationRow {
    pub id: String,
    pub kind: String,
    pub name: Option<String>,
    pub created_at: DateTime<Utc>,
}

pub struct ParticipantRow {
    pub conversation_id: String,
    pub user_id: String,
    pub username: String,
}

pub struct MessageRow {
    pub id: String,
    pub conversation_id: String,
    pub seq: i64,
    pub sender_id: String,
    pub sender_username: String,
    pub content: String,
    pub file_url: Option<String>,
    pub created_at: DateTime<Utc>,
}

/// Input for an append. The store assigns `seq` and the timestamp.
pub struct NewMessage<'a> {
    pub id: &'a str,
    pub conversation_id: &'a str,
    pub sender_id: &'a str,
    pub content: &'a str,
    pub file_url: Option<&'a str>,
}

pub struct ReactionRow {
    pub message_id: String,
    pub user_id: String,
    pub emoji: String,
}

pub struct FileRow {
    pub id: String,
    pub uploader_id: String,
    pub mime_type: String,
    pub size: i64,
    pub sha256: String,
    pub created_at: DateTime<Utc>,
}
