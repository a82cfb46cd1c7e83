use std::sync::{Arc, Mutex, PoisonError};

use tracing::{debug, info};
use uuid::Uuid;

use parley_db::Database;
use parley_db::models::NewMessage;
use parley_types::api::MessageView;
use parley_types::events::GatewayEvent;

use crate::auth::Identity;
use crate::blocking;
use crate::conversations::require_participant;
use crate::convert::{message_view, parse_id};
use crate::error::{ChatError, ChatResult};
use crate::files::file_id_from_url;
use crate::rooms::FanOut;

const MAX_CONTENT_CHARS: usize = 4000;
const MAX_EMOJI_CHARS: usize = 32;

/// The only write path for messages and reactions.
///
/// A successful append is published to the conversation's room before the
/// call returns, so persisting and broadcasting share one control path.
/// Appends and their publish are serialized, so live `new-message` events
/// arrive in `seq` order.
#[derive(Clone)]
pub struct MessageService {
    db: Arc<Database>,
    fanout: Arc<dyn FanOut>,
    append_order: Arc<Mutex<()>>,
}

impl MessageService {
    pub fn new(db: Arc<Database>, fanout: Arc<dyn FanOut>) -> Self {
        Self {
            db,
            fanout,
            append_order: Arc::new(Mutex::new(())),
        }
    }

    pub async fn append_message(
        &self,
        conversation_id: Uuid,
        sender: &Identity,
        content: &str,
        file_url: Option<&str>,
    ) -> ChatResult<MessageView> {
        let file_url = file_url.map(str::trim).filter(|u| !u.is_empty());
        if content.trim().is_empty() && file_url.is_none() {
            return Err(ChatError::Validation(
                "a message needs text content or an attached file".into(),
            ));
        }
        if content.chars().count() > MAX_CONTENT_CHARS {
            return Err(ChatError::Validation(format!(
                "message content must be at most {} characters",
                MAX_CONTENT_CHARS
            )));
        }

        require_participant(&self.db, conversation_id, sender.id).await?;
        if let Some(url) = file_url {
            self.require_readable_file(sender, url).await?;
        }

        let message_id = Uuid::new_v4().to_string();
        let cid = conversation_id.to_string();
        let sid = sender.id.to_string();
        let content = content.to_string();
        let file_url = file_url.map(str::to_string);
        let fanout = self.fanout.clone();
        let append_order = self.append_order.clone();
        let (message, delivered) = blocking(&self.db, move |db| {
            let _order = append_order.lock().unwrap_or_else(PoisonError::into_inner);
            let row = db.append_message(
                &NewMessage {
                    id: &message_id,
                    conversation_id: &cid,
                    sender_id: &sid,
                    content: &content,
                    file_url: file_url.as_deref(),
                },
                chrono::Utc::now(),
            )?;

            let message = message_view(row, vec![]);
            let delivered = fanout.publish(
                conversation_id,
                GatewayEvent::NewMessage {
                    conversation_id,
                    message: message.clone(),
                },
            );
            Ok((message, delivered))
        })
        .await?;

        debug!(
            "{} posted {} (seq {}) to {} ({} live receivers)",
            sender.username, message.id, message.seq, conversation_id, delivered
        );

        Ok(message)
    }

    /// A `/files/{id}` attachment must be a stored file the sender can already
    /// read. Other URLs are kept as given.
    async fn require_readable_file(&self, sender: &Identity, url: &str) -> ChatResult<()> {
        if !url.starts_with("/files/") {
            return Ok(());
        }
        let file_id = file_id_from_url(url)
            .ok_or_else(|| ChatError::NotFound(format!("file {}", url)))?;

        let (fid, url_owned, uid) = (file_id.to_string(), url.to_string(), sender.id.to_string());
        let (exists, readable) = blocking(&self.db, move |db| {
            let exists = db.get_file(&fid)?.is_some();
            let readable = exists && db.can_read_file(&fid, &url_owned, &uid)?;
            Ok((exists, readable))
        })
        .await?;

        if !exists {
            return Err(ChatError::NotFound(format!("file {}", file_id)));
        }
        if !readable {
            return Err(ChatError::Forbidden(
                "cannot attach a file you have no access to".into(),
            ));
        }
        Ok(())
    }

    /// Add or remove `emoji` from a message for `user`. Returns `true` when added.
    pub async fn toggle_reaction(
        &self,
        conversation_id: Uuid,
        message_id: Uuid,
        user: &Identity,
        emoji: &str,
    ) -> ChatResult<bool> {
        let emoji = emoji.trim().to_string();
        if emoji.is_empty() || emoji.chars().count() > MAX_EMOJI_CHARS {
            return Err(ChatError::Validation("reaction emoji is not valid".into()));
        }

        require_participant(&self.db, conversation_id, user.id).await?;

        let mid = message_id.to_string();
        let message = blocking(&self.db, move |db| db.get_message(&mid))
            .await?
            .filter(|m| parse_id(&m.conversation_id, "conversation id") == conversation_id)
            .ok_or_else(|| ChatError::NotFound(format!("message {}", message_id)))?;

        let uid = user.id.to_string();
        let reaction = emoji.clone();
        let added = blocking(&self.db, move |db| {
            db.toggle_reaction(&message.id, &uid, &reaction, chrono::Utc::now())
        })
        .await?;

        let event = if added {
            GatewayEvent::ReactionAdd {
                conversation_id,
                message_id,
                user_id: user.id,
                username: user.username.clone(),
                emoji,
            }
        } else {
            GatewayEvent::ReactionRemove {
                conversation_id,
                message_id,
                user_id: user.id,
                emoji,
            }
        };
        self.fanout.publish(conversation_id, event);

        info!(
            "{} {} a reaction on {}",
            user.username,
            if added { "added" } else { "removed" },
            message_id
        );
        Ok(added)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::conversations::ConversationService;
    use crate::rooms::LocalRooms;
    use parley_types::models::Role;

    struct Fixture {
        db: Arc<Database>,
        rooms: Arc<LocalRooms>,
        messages: MessageService,
        conversations: ConversationService,
        alice: Identity,
        bob: Identity,
        carol: Identity,
    }

    fn seed(db: &Database, username: &str) -> Identity {
        let id = Uuid::new_v4();
        db.create_user(
            &id.to_string(),
            username,
            &format!("{}@example.com", username),
            "hash",
            "user",
            chrono::Utc::now(),
        )
        .unwrap();
        Identity {
            id,
            username: username.into(),
            role: Role::User,
        }
    }

    fn fixture() -> Fixture {
        let db = Arc::new(Database::open_in_memory().unwrap());
        let rooms = Arc::new(LocalRooms::new());
        Fixture {
            db: db.clone(),
            messages: MessageService::new(db.clone(), rooms.clone()),
            conversations: ConversationService::new(db.clone()),
            alice: seed(&db, "alice"),
            bob: seed(&db, "bob"),
            carol: seed(&db, "carol"),
            rooms,
        }
    }

    #[tokio::test]
    async fn sequential_appends_are_listed_in_append_order() {
        let f = fixture();
        let conv = f.conversations.get_or_create_private(&f.alice, "bob").await.unwrap();

        for i in 0..10 {
            let sender = if i % 2 == 0 { &f.alice } else { &f.bob };
            f.messages
                .append_message(conv.id, sender, &format!("msg {}", i), None)
                .await
                .unwrap();
        }

        let listed = f.conversations.list_conversations(f.alice.id).await.unwrap();
        let messages = &listed[0].messages;
        let contents: Vec<String> = messages.iter().map(|m| m.content.clone()).collect();
        let expected: Vec<String> = (0..10).map(|i| format!("msg {}", i)).collect();
        assert_eq!(contents, expected);
        assert!(messages.windows(2).all(|w| w[0].timestamp <= w[1].timestamp));
        assert_eq!(messages[1].sender.username, "bob");
    }

    #[tokio::test]
    async fn empty_message_without_file_is_rejected() {
        let f = fixture();
        let conv = f.conversations.get_or_create_private(&f.alice, "bob").await.unwrap();

        let err = f
            .messages
            .append_message(conv.id, &f.alice, "   ", Some(" "))
            .await
            .unwrap_err();
        assert!(matches!(err, ChatError::Validation(_)));
    }

    fn stored_file(db: &Database, uploader: &Identity) -> String {
        let id = Uuid::new_v4();
        db.insert_file(&parley_db::models::FileRow {
            id: id.to_string(),
            uploader_id: uploader.id.to_string(),
            mime_type: "image/png".into(),
            size: 4,
            sha256: "00".into(),
            created_at: chrono::Utc::now(),
        })
        .unwrap();
        format!("/files/{}", id)
    }

    #[tokio::test]
    async fn file_only_message_is_accepted() {
        let f = fixture();
        let conv = f.conversations.get_or_create_private(&f.alice, "bob").await.unwrap();
        let url = stored_file(&f.db, &f.alice);

        let msg = f
            .messages
            .append_message(conv.id, &f.alice, "", Some(&url))
            .await
            .unwrap();
        assert_eq!(msg.content, "");
        assert_eq!(msg.file_url.as_deref(), Some(url.as_str()));
        assert_eq!(msg.sender.username, "alice");
        assert_eq!(msg.seq, 1);
    }

    #[tokio::test]
    async fn attachments_must_be_readable_by_the_sender() {
        let f = fixture();
        let alice_bob = f.conversations.get_or_create_private(&f.alice, "bob").await.unwrap();
        let bob_carol = f.conversations.get_or_create_private(&f.bob, "carol").await.unwrap();
        let alices_file = stored_file(&f.db, &f.alice);

        // Not shared with bob yet
        let err = f
            .messages
            .append_message(bob_carol.id, &f.bob, "", Some(&alices_file))
            .await
            .unwrap_err();
        assert!(matches!(err, ChatError::Forbidden(_)));

        let err = f
            .messages
            .append_message(alice_bob.id, &f.alice, "", Some("/files/abc"))
            .await
            .unwrap_err();
        assert!(matches!(err, ChatError::NotFound(_)));

        // Shared with bob, so bob may pass it on
        f.messages
            .append_message(alice_bob.id, &f.alice, "", Some(&alices_file))
            .await
            .unwrap();
        f.messages
            .append_message(bob_carol.id, &f.bob, "", Some(&alices_file))
            .await
            .unwrap();
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 4)]
    async fn concurrent_appends_reach_the_room_in_stored_order() {
        let f = fixture();
        let conv = f.conversations.get_or_create_private(&f.alice, "bob").await.unwrap();
        let (conn, mut rx) = f.rooms.register();
        f.rooms.join(conn, conv.id);

        let cid = conv.id;
        let mut handles = Vec::new();
        for i in 0..200 {
            let messages = f.messages.clone();
            let sender = if i % 2 == 0 { f.alice.clone() } else { f.bob.clone() };
            handles.push(tokio::spawn(async move {
                messages
                    .append_message(cid, &sender, &format!("msg {}", i), None)
                    .await
                    .unwrap();
            }));
        }
        for h in handles {
            h.await.unwrap();
        }

        let mut live = Vec::new();
        while let Ok(event) = rx.try_recv() {
            if let GatewayEvent::NewMessage { message, .. } = event {
                live.push((message.seq, message.id));
            }
        }

        let listed = f.conversations.list_conversations(f.alice.id).await.unwrap();
        let stored: Vec<(i64, Uuid)> = listed[0].messages.iter().map(|m| (m.seq, m.id)).collect();
        assert_eq!(live.len(), 200);
        assert_eq!(live, stored);
        assert!(stored.iter().enumerate().all(|(i, (seq, _))| *seq == i as i64 + 1));
    }

    #[tokio::test]
    async fn append_checks_conversation_and_membership() {
        let f = fixture();
        let conv = f.conversations.get_or_create_private(&f.alice, "bob").await.unwrap();

        let err = f
            .messages
            .append_message(Uuid::new_v4(), &f.alice, "hi", None)
            .await
            .unwrap_err();
        assert!(matches!(err, ChatError::NotFound(_)));

        let err = f
            .messages
            .append_message(conv.id, &f.carol, "let me in", None)
            .await
            .unwrap_err();
        assert!(matches!(err, ChatError::Forbidden(_)));
    }

    #[tokio::test]
    async fn append_publishes_to_every_room_member() {
        let f = fixture();
        let conv = f.conversations.get_or_create_private(&f.alice, "bob").await.unwrap();
        let (alice_conn, mut alice_rx) = f.rooms.register();
        let (bob_conn, mut bob_rx) = f.rooms.register();
        let (_idle, mut idle_rx) = f.rooms.register();
        f.rooms.join(alice_conn, conv.id);
        f.rooms.join(bob_conn, conv.id);

        let sent = f
            .messages
            .append_message(conv.id, &f.alice, "hi", None)
            .await
            .unwrap();

        for rx in [&mut alice_rx, &mut bob_rx] {
            match rx.try_recv().unwrap() {
                GatewayEvent::NewMessage {
                    conversation_id,
                    message,
                } => {
                    assert_eq!(conversation_id, conv.id);
                    assert_eq!(message.id, sent.id);
                    assert_eq!(message.content, "hi");
                }
                other => panic!("unexpected event {:?}", other),
            }
        }
        assert!(idle_rx.try_recv().is_err());
    }

    #[tokio::test]
    async fn reactions_toggle_and_are_broadcast() {
        let f = fixture();
        let conv = f.conversations.get_or_create_private(&f.alice, "bob").await.unwrap();
        let msg = f
            .messages
            .append_message(conv.id, &f.alice, "hi", None)
            .await
            .unwrap();
        let (conn, mut rx) = f.rooms.register();
        f.rooms.join(conn, conv.id);

        assert!(f.messages.toggle_reaction(conv.id, msg.id, &f.bob, "🎉").await.unwrap());
        assert!(matches!(rx.try_recv().unwrap(), GatewayEvent::ReactionAdd { .. }));

        let listed = f.conversations.list_conversations(f.bob.id).await.unwrap();
        assert_eq!(listed[0].messages[0].reactions.len(), 1);
        assert_eq!(listed[0].messages[0].reactions[0].user_id, f.bob.id);

        assert!(!f.messages.toggle_reaction(conv.id, msg.id, &f.bob, "🎉").await.unwrap());
        assert!(matches!(rx.try_recv().unwrap(), GatewayEvent::ReactionRemove { .. }));

        let err = f
            .messages
            .toggle_reaction(conv.id, Uuid::new_v4(), &f.bob, "🎉")
            .await
            .unwrap_err();
        assert!(matches!(err, ChatError::NotFound(_)));
    }
}
