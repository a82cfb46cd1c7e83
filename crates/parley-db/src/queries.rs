use crate::Database;
use crate::models::{
    ConversationRow, FileRow, MessageRow, NewMessage, ParticipantRow, ReactionRow, UserRow,
};
use anyhow::Result;
use chrono::{DateTime, Utc};
use rusqlite::{Connection, ErrorCode, OptionalExtension, Row, params, params_from_iter};

/// Order-independent key identifying the private conversation between two users.
pub fn pair_key(a: &str, b: &str) -> String {
    if a <= b {
        format!("{}:{}", a, b)
    } else {
        format!("{}:{}", b, a)
    }
}

impl Database {
    // -- Users --

    /// Returns `false` if the username or email is already taken.
    pub fn create_user(
        &self,
        id: &str,
        username: &str,
        email: &str,
        password_hash: &str,
        role: &str,
        now: DateTime<Utc>,
    ) -> Result<bool> {
        self.with_conn_mut(|conn| {
            let inserted = conn.execute(
                "INSERT INTO users (id, username, email, password, role, created_at)
                 VALUES (?1, ?2, ?3, ?4, ?5, ?6)",
                params![id, username, email, password_hash, role, now],
            );
            match inserted {
                Ok(_) => Ok(true),
                Err(rusqlite::Error::SqliteFailure(e, _))
                    if e.code == ErrorCode::ConstraintViolation =>
                {
                    Ok(false)
                }
                Err(e) => Err(e.into()),
            }
        })
    }

    pub fn get_user_by_username(&self, username: &str) -> Result<Option<UserRow>> {
        self.with_conn(|conn| query_user(conn, "username", username))
    }

    pub fn get_user_by_email(&self, email: &str) -> Result<Option<UserRow>> {
        self.with_conn(|conn| query_user(conn, "email", email))
    }

    // -- Conversations --

    /// Find the private conversation for the pair, creating it with `id` if absent.
    /// Returns the conversation id and whether it was created by this call.
    pub fn find_or_create_private(
        &self,
        id: &str,
        user_a: &str,
        user_b: &str,
        now: DateTime<Utc>,
    ) -> Result<(String, bool)> {
        let key = pair_key(user_a, user_b);
        self.with_conn_mut(|conn| {
            let existing: Option<String> = conn
                .query_row(
                    "SELECT id FROM conversations WHERE kind = 'private' AND pair_key = ?1",
                    [&key],
                    |row| row.get(0),
                )
                .optional()?;

            if let Some(existing_id) = existing {
                return Ok((existing_id, false));
            }

            conn.execute(
                "INSERT INTO conversations (id, kind, name, pair_key, created_at)
                 VALUES (?1, 'private', NULL, ?2, ?3)",
                params![id, key, now],
            )?;
            for user_id in [user_a, user_b] {
                conn.execute(
                    "INSERT INTO conversation_participants (conversation_id, user_id) VALUES (?1, ?2)",
                    params![id, user_id],
                )?;
            }
            Ok((id.to_string(), true))
        })
    }

    pub fn create_group(
        &self,
        id: &str,
        name: &str,
        participant_ids: &[String],
        now: DateTime<Utc>,
    ) -> Result<()> {
        self.with_conn_mut(|conn| {
            conn.execute(
                "INSERT INTO conversations (id, kind, name, pair_key, created_at)
                 VALUES (?1, 'group', ?2, NULL, ?3)",
                params![id, name, now],
            )?;
            for user_id in participant_ids {
                conn.execute(
                    "INSERT OR IGNORE INTO conversation_participants (conversation_id, user_id)
                     VALUES (?1, ?2)",
                    params![id, user_id],
                )?;
            }
            Ok(())
        })
    }

    pub fn get_conversation(&self, id: &str) -> Result<Option<ConversationRow>> {
        self.with_conn(|conn| {
            let row = conn
                .query_row(
                    "SELECT id, kind, name, created_at FROM conversations WHERE id = ?1",
                    [id],
                    map_conversation,
                )
                .optional()?;
            Ok(row)
        })
    }

    pub fn get_conversations_for_user(&self, user_id: &str) -> Result<Vec<ConversationRow>> {
        self.with_conn(|conn| {
            let mut stmt = conn.prepare(
                "SELECT c.id, c.kind, c.name, c.created_at
                 FROM conversations c
                 JOIN conversation_participants p ON p.conversation_id = c.id
                 WHERE p.user_id = ?1
                 ORDER BY c.created_at, c.id",
            )?;
            let rows = stmt
                .query_map([user_id], map_conversation)?
                .collect::<std::result::Result<Vec<_>, _>>()?;
            Ok(rows)
        })
    }

    /// Batch-fetch participants (with usernames) for a set of conversations.
    pub fn get_participants(&self, conversation_ids: &[String]) -> Result<Vec<ParticipantRow>> {
        if conversation_ids.is_empty() {
            return Ok(vec![]);
        }

        self.with_conn(|conn| {
            let sql = format!(
                "SELECT p.conversation_id, p.user_id, COALESCE(u.username, 'unknown')
                 FROM conversation_participants p
                 LEFT JOIN users u ON u.id = p.user_id
                 WHERE p.conversation_id IN ({})
                 ORDER BY u.username",
                placeholders(conversation_ids.len())
            );
            let mut stmt = conn.prepare(&sql)?;
            let rows = stmt
                .query_map(params_from_iter(conversation_ids.iter()), |row| {
                    Ok(ParticipantRow {
                        conversation_id: row.get(0)?,
                        user_id: row.get(1)?,
                        username: row.get(2)?,
                    })
                })?
                .collect::<std::result::Result<Vec<_>, _>>()?;
            Ok(rows)
        })
    }

    pub fn is_participant(&self, conversation_id: &str, user_id: &str) -> Result<bool> {
        self.with_conn(|conn| {
            let found: bool = conn.query_row(
                "SELECT EXISTS(
                    SELECT 1 FROM conversation_participants
                    WHERE conversation_id = ?1 AND user_id = ?2
                 )",
                params![conversation_id, user_id],
                |row| row.get(0),
            )?;
            Ok(found)
        })
    }

    // -- Messages --

    /// Append a message to the tail of its conversation.
    ///
    /// The next sequence number and the timestamp are derived from the current
    /// tail inside the same transaction, so the timestamp never goes backwards
    /// within a conversation even if the wall clock does.
    pub fn append_message(&self, msg: &NewMessage<'_>, now: DateTime<Utc>) -> Result<MessageRow> {
        self.with_conn_mut(|conn| {
            let tail: Option<(i64, DateTime<Utc>)> = conn
                .query_row(
                    "SELECT seq, created_at FROM messages
                     WHERE conversation_id = ?1
                     ORDER BY seq DESC LIMIT 1",
                    [msg.conversation_id],
                    |row| Ok((row.get(0)?, row.get(1)?)),
                )
                .optional()?;

            let (seq, created_at) = match tail {
                Some((last_seq, last_ts)) => (last_seq + 1, now.max(last_ts)),
                None => (1, now),
            };

            conn.execute(
                "INSERT INTO messages (id, conversation_id, seq, sender_id, content, file_url, created_at)
                 VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7)",
                params![
                    msg.id,
                    msg.conversation_id,
                    seq,
                    msg.sender_id,
                    msg.content,
                    msg.file_url,
                    created_at
                ],
            )?;

            let sender_username: String = conn
                .query_row(
                    "SELECT username FROM users WHERE id = ?1",
                    [msg.sender_id],
                    |row| row.get(0),
                )
                .optional()?
                .unwrap_or_else(|| "unknown".to_string());

            Ok(MessageRow {
                id: msg.id.to_string(),
                conversation_id: msg.conversation_id.to_string(),
                seq,
                sender_id: msg.sender_id.to_string(),
                sender_username,
                content: msg.content.to_string(),
                file_url: msg.file_url.map(str::to_string),
                created_at,
            })
        })
    }

    /// Batch-fetch messages for a set of conversations, in append order.
    pub fn get_messages(&self, conversation_ids: &[String]) -> Result<Vec<MessageRow>> {
        if conversation_ids.is_empty() {
            return Ok(vec![]);
        }

        self.with_conn(|conn| {
            // JOIN users to fetch the sender username in the same query
            let sql = format!(
                "SELECT m.id, m.conversation_id, m.seq, m.sender_id, u.username,
                        m.content, m.file_url, m.created_at
                 FROM messages m
                 LEFT JOIN users u ON m.sender_id = u.id
                 WHERE m.conversation_id IN ({})
                 ORDER BY m.conversation_id, m.seq",
                placeholders(conversation_ids.len())
            );
            let mut stmt = conn.prepare(&sql)?;
            let rows = stmt
                .query_map(params_from_iter(conversation_ids.iter()), map_message)?
                .collect::<std::result::Result<Vec<_>, _>>()?;
            Ok(rows)
        })
    }

    pub fn get_message(&self, id: &str) -> Result<Option<MessageRow>> {
        self.with_conn(|conn| {
            let row = conn
                .query_row(
                    "SELECT m.id, m.conversation_id, m.seq, m.sender_id, u.username,
                            m.content, m.file_url, m.created_at
                     FROM messages m
                     LEFT JOIN users u ON m.sender_id = u.id
                     WHERE m.id = ?1",
                    [id],
                    map_message,
                )
                .optional()?;
            Ok(row)
        })
    }

    // -- Reactions --

    /// Toggle a reaction: removes it if present, inserts it otherwise.
    /// Returns `true` when the reaction was added.
    pub fn toggle_reaction(
        &self,
        message_id: &str,
        user_id: &str,
        emoji: &str,
        now: DateTime<Utc>,
    ) -> Result<bool> {
        self.with_conn_mut(|conn| {
            let removed = conn.execute(
                "DELETE FROM reactions WHERE message_id = ?1 AND user_id = ?2 AND emoji = ?3",
                params![message_id, user_id, emoji],
            )?;
            if removed > 0 {
                return Ok(false);
            }

            conn.execute(
                "INSERT INTO reactions (message_id, user_id, emoji, created_at)
                 VALUES (?1, ?2, ?3, ?4)",
                params![message_id, user_id, emoji, now],
            )?;
            Ok(true)
        })
    }

    /// Batch-fetch reactions for a set of message ids.
    pub fn get_reactions_for_messages(&self, message_ids: &[String]) -> Result<Vec<ReactionRow>> {
        if message_ids.is_empty() {
            return Ok(vec![]);
        }

        self.with_conn(|conn| {
            let sql = format!(
                "SELECT message_id, user_id, emoji FROM reactions
                 WHERE message_id IN ({})
                 ORDER BY created_at",
                placeholders(message_ids.len())
            );
            let mut stmt = conn.prepare(&sql)?;
            let rows = stmt
                .query_map(params_from_iter(message_ids.iter()), |row| {
                    Ok(ReactionRow {
                        message_id: row.get(0)?,
                        user_id: row.get(1)?,
                        emoji: row.get(2)?,
                    })
                })?
                .collect::<std::result::Result<Vec<_>, _>>()?;
            Ok(rows)
        })
    }

    // -- Files --

    pub fn insert_file(&self, file: &FileRow) -> Result<()> {
        self.with_conn_mut(|conn| {
            conn.execute(
                "INSERT INTO files (id, uploader_id, mime_type, size, sha256, created_at)
                 VALUES (?1, ?2, ?3, ?4, ?5, ?6)",
                params![
                    file.id,
                    file.uploader_id,
                    file.mime_type,
                    file.size,
                    file.sha256,
                    file.created_at
                ],
            )?;
            Ok(())
        })
    }

    pub fn get_file(&self, id: &str) -> Result<Option<FileRow>> {
        self.with_conn(|conn| {
            let row = conn
                .query_row(
                    "SELECT id, uploader_id, mime_type, size, sha256, created_at
                     FROM files WHERE id = ?1",
                    [id],
                    |row| {
                        Ok(FileRow {
                            id: row.get(0)?,
                            uploader_id: row.get(1)?,
                            mime_type: row.get(2)?,
                            size: row.get(3)?,
                            sha256: row.get(4)?,
                            created_at: row.get(5)?,
                        })
                    },
                )
                .optional()?;
            Ok(row)
        })
    }

    /// A file is readable by its uploader and by every participant of a
    /// conversation holding a message that links to `file_url`.
    pub fn can_read_file(&self, file_id: &str, file_url: &str, user_id: &str) -> Result<bool> {
        self.with_conn(|conn| {
            let allowed: bool = conn.query_row(
                "SELECT EXISTS(SELECT 1 FROM files WHERE id = ?1 AND uploader_id = ?3)
                     OR EXISTS(
                        SELECT 1 FROM messages m
                        JOIN conversation_participants p ON p.conversation_id = m.conversation_id
                        WHERE m.file_url = ?2 AND p.user_id = ?3
                     )",
                params![file_id, file_url, user_id],
                |row| row.get(0),
            )?;
            Ok(allowed)
        })
    }
}

fn placeholders(n: usize) -> String {
    (1..=n)
        .map(|i| format!("?{}", i))
        .collect::<Vec<_>>()
        .join(", ")
}

fn query_user(conn: &Connection, column: &str, value: &str) -> Result<Option<UserRow>> {
    // `column` is always one of our own literals, never user input
    let sql = format!(
        "SELECT id, username, email, password, role, created_at FROM users WHERE {} = ?1",
        column
    );
    let mut stmt = conn.prepare(&sql)?;

    let row = stmt
        .query_row([value], |row| {
            Ok(UserRow {
                id: row.get(0)?,
                username: row.get(1)?,
                email: row.get(2)?,
                password: row.get(3)?,
                role: row.get(4)?,
                created_at: row.get(5)?,
            })
        })
        .optional()?;

    Ok(row)
}

fn map_conversation(row: &Row<'_>) -> rusqlite::Result<ConversationRow> {
    Ok(ConversationRow {
        id: row.get(0)?,
        kind: row.get(1)?,
        name: row.get(2)?,
        created_at: row.get(3)?,
    })
}

fn map_message(row: &Row<'_>) -> rusqlite::Result<MessageRow> {
    Ok(MessageRow {
        id: row.get(0)?,
        conversation_id: row.get(1)?,
        seq: row.get(2)?,
        sender_id: row.get(3)?,
        sender_username: row
            .get::<_, Option<String>>(4)?
            .unwrap_or_else(|| "unknown".to_string()),
        content: row.get(5)?,
        file_url: row.get(6)?,
        created_at: row.get(7)?,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Duration;
    use uuid::Uuid;

    fn new_id() -> String {
        Uuid::new_v4().to_string()
    }

    fn seed_user(db: &Database, username: &str) -> String {
        let id = new_id();
        let email = format!("{}@example.com", username);
        assert!(
            db.create_user(&id, username, &email, "hash", "user", Utc::now())
                .unwrap()
        );
        id
    }

    fn send(db: &Database, conv: &str, sender: &str, content: &str, now: DateTime<Utc>) -> MessageRow {
        let id = new_id();
        db.append_message(
            &NewMessage {
                id: &id,
                conversation_id: conv,
                sender_id: sender,
                content,
                file_url: None,
            },
            now,
        )
        .unwrap()
    }

    #[test]
    fn duplicate_username_or_email_is_rejected() {
        let db = Database::open_in_memory().unwrap();
        seed_user(&db, "alice");

        let again = db
            .create_user(&new_id(), "alice", "other@example.com", "h", "user", Utc::now())
            .unwrap();
        assert!(!again);

        let same_email = db
            .create_user(&new_id(), "alicia", "alice@example.com", "h", "user", Utc::now())
            .unwrap();
        assert!(!same_email);

        let user = db.get_user_by_email("alice@example.com").unwrap().unwrap();
        assert_eq!(user.username, "alice");
        assert_eq!(user.role, "user");
    }

    #[test]
    fn private_conversation_is_unique_per_unordered_pair() {
        let db = Database::open_in_memory().unwrap();
        let alice = seed_user(&db, "alice");
        let bob = seed_user(&db, "bob");

        let (first, created) = db
            .find_or_create_private(&new_id(), &alice, &bob, Utc::now())
            .unwrap();
        assert!(created);

        let (second, created) = db
            .find_or_create_private(&new_id(), &bob, &alice, Utc::now())
            .unwrap();
        assert!(!created);
        assert_eq!(first, second);

        assert_eq!(db.get_conversations_for_user(&alice).unwrap().len(), 1);
        assert_eq!(db.get_participants(&[first]).unwrap().len(), 2);
    }

    #[test]
    fn unique_index_rejects_a_second_private_row_for_the_pair() {
        let db = Database::open_in_memory().unwrap();
        let key = pair_key("a", "b");
        let result = db.with_conn_mut(|conn| {
            for _ in 0..2 {
                conn.execute(
                    "INSERT INTO conversations (id, kind, pair_key, created_at)
                     VALUES (?1, 'private', ?2, ?3)",
                    params![new_id(), key, Utc::now()],
                )?;
            }
            Ok(())
        });
        assert!(result.is_err());
    }

    #[test]
    fn appends_keep_order_and_non_decreasing_timestamps() {
        let db = Database::open_in_memory().unwrap();
        let alice = seed_user(&db, "alice");
        let bob = seed_user(&db, "bob");
        let (conv, _) = db
            .find_or_create_private(&new_id(), &alice, &bob, Utc::now())
            .unwrap();

        let start = Utc::now();
        send(&db, &conv, &alice, "one", start);
        // Clock stepped backwards between appends
        let second = send(&db, &conv, &bob, "two", start - Duration::seconds(30));
        send(&db, &conv, &alice, "three", start + Duration::seconds(1));

        assert_eq!(second.seq, 2);
        assert_eq!(second.created_at, start);
        assert_eq!(second.sender_username, "bob");

        let rows = db.get_messages(&[conv]).unwrap();
        let contents: Vec<&str> = rows.iter().map(|r| r.content.as_str()).collect();
        assert_eq!(contents, vec!["one", "two", "three"]);
        assert!(rows.windows(2).all(|w| w[0].created_at <= w[1].created_at));
    }

    #[test]
    fn toggle_reaction_adds_then_removes() {
        let db = Database::open_in_memory().unwrap();
        let alice = seed_user(&db, "alice");
        let bob = seed_user(&db, "bob");
        let (conv, _) = db
            .find_or_create_private(&new_id(), &alice, &bob, Utc::now())
            .unwrap();
        let msg = send(&db, &conv, &alice, "hi", Utc::now());

        assert!(db.toggle_reaction(&msg.id, &bob, "👍", Utc::now()).unwrap());
        let reactions = db.get_reactions_for_messages(&[msg.id.clone()]).unwrap();
        assert_eq!(reactions.len(), 1);
        assert_eq!(reactions[0].user_id, bob);

        assert!(!db.toggle_reaction(&msg.id, &bob, "👍", Utc::now()).unwrap());
        assert!(db.get_reactions_for_messages(&[msg.id]).unwrap().is_empty());
    }

    #[test]
    fn file_readable_by_uploader_and_conversation_participants() {
        let db = Database::open_in_memory().unwrap();
        let alice = seed_user(&db, "alice");
        let bob = seed_user(&db, "bob");
        let carol = seed_user(&db, "carol");
        let file_id = new_id();
        let url = format!("/files/{}", file_id);
        db.insert_file(&FileRow {
            id: file_id.clone(),
            uploader_id: alice.clone(),
            mime_type: "image/png".into(),
            size: 3,
            sha256: "abc".into(),
            created_at: Utc::now(),
        })
        .unwrap();

        assert!(db.can_read_file(&file_id, &url, &alice).unwrap());
        assert!(!db.can_read_file(&file_id, &url, &bob).unwrap());

        let (conv, _) = db
            .find_or_create_private(&new_id(), &alice, &bob, Utc::now())
            .unwrap();
        let msg_id = new_id();
        db.append_message(
            &NewMessage {
                id: &msg_id,
                conversation_id: &conv,
                sender_id: &alice,
                content: "",
                file_url: Some(&url),
            },
            Utc::now(),
        )
        .unwrap();

        assert!(db.can_read_file(&file_id, &url, &bob).unwrap());
        assert!(!db.can_read_file(&file_id, &url, &carol).unwrap());
    }

    #[test]
    fn ping_succeeds_on_open_store() {
        let db = Database::open_in_memory().unwrap();
        db.ping().unwrap();
    }

    #[test]
    fn ping_fails_without_schema() {
        let db = Database::open_in_memory().unwrap();
        db.with_conn(|conn| {
            conn.execute_batch("DROP TABLE schema_version")?;
            Ok(())
        })
        .unwrap();
        assert!(db.ping().is_err());
    }

    #[test]
    fn store_recovers_after_a_panicking_writer() {
        let db = std::sync::Arc::new(Database::open_in_memory().unwrap());

        let writer = db.clone();
        let result = std::thread::spawn(move || {
            writer
                .with_conn_mut::<_, ()>(|conn| {
                    conn.execute(
                        "INSERT INTO users (id, username, email, password, role, created_at)
                         VALUES ('u1', 'alice', 'alice@example.com', 'h', 'user', '2024-01-01T00:00:00Z')",
                        [],
                    )?;
                    panic!("writer died mid-transaction")
                })
                .unwrap();
        })
        .join();
        assert!(result.is_err());

        db.ping().unwrap();
        assert!(db.get_user_by_username("alice").unwrap().is_none());
        assert!(
            db.create_user("u2", "bob", "bob@example.com", "h", "user", Utc::now())
                .unwrap()
        );
    }
}
