use std::collections::HashMap;

use tracing::warn;
use uuid::Uuid;

use parley_db::models::{ConversationRow, MessageRow, ParticipantRow, ReactionRow};
use parley_types::api::{ConversationView, MessageView, Participant, Reaction};
use parley_types::models::ConversationKind;

pub(crate) fn parse_id(raw: &str, what: &str) -> Uuid {
    raw.parse().unwrap_or_else(|e| {
        warn!("Corrupt {} '{}': {}", what, raw, e);
        Uuid::default()
    })
}

pub(crate) fn message_view(row: MessageRow, reactions: Vec<Reaction>) -> MessageView {
    MessageView {
        id: parse_id(&row.id, "message id"),
        conversation_id: parse_id(&row.conversation_id, "conversation id"),
        seq: row.seq,
        content: row.content,
        sender: Participant {
            id: parse_id(&row.sender_id, "sender id"),
            username: row.sender_username,
        },
        timestamp: row.created_at,
        file_url: row.file_url,
        reactions,
    }
}

/// Group reaction rows by message id.
pub(crate) fn reactions_by_message(rows: Vec<ReactionRow>) -> HashMap<String, Vec<Reaction>> {
    let mut map: HashMap<String, Vec<Reaction>> = HashMap::new();
    for r in rows {
        map.entry(r.message_id).or_default().push(Reaction {
            emoji: r.emoji,
            user_id: parse_id(&r.user_id, "reaction user id"),
        });
    }
    map
}

/// Stitch batch-fetched rows back into one view per conversation, keeping the
/// order of `conversations` and the append order of each message list.
pub(crate) fn conversation_views(
    conversations: Vec<ConversationRow>,
    participants: Vec<ParticipantRow>,
    messages: Vec<MessageRow>,
    reactions: Vec<ReactionRow>,
) -> Vec<ConversationView> {
    let mut participant_map: HashMap<String, Vec<Participant>> = HashMap::new();
    for p in participants {
        participant_map
            .entry(p.conversation_id)
            .or_default()
            .push(Participant {
                id: parse_id(&p.user_id, "participant id"),
                username: p.username,
            });
    }

    let mut reaction_map = reactions_by_message(reactions);
    let mut message_map: HashMap<String, Vec<MessageView>> = HashMap::new();
    for m in messages {
        let reactions = reaction_map.remove(&m.id).unwrap_or_default();
        message_map
            .entry(m.conversation_id.clone())
            .or_default()
            .push(message_view(m, reactions));
    }

    conversations
        .into_iter()
        .map(|c| {
            let kind = c.kind.parse().unwrap_or_else(|e| {
                warn!("Conversation {} has {}", c.id, e);
                ConversationKind::Group
            });
            ConversationView {
                id: parse_id(&c.id, "conversation id"),
                kind,
                name: c.name,
                participants: participant_map.remove(&c.id).unwrap_or_default(),
                messages: message_map.remove(&c.id).unwrap_or_default(),
                created_at: c.created_at,
            }
        })
        .collect()
}
