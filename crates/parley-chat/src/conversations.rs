use std::collections::BTreeSet;
use std::sync::Arc;

use tracing::info;
use uuid::Uuid;

use parley_db::Database;
use parley_types::api::ConversationView;

use crate::auth::Identity;
use crate::blocking;
use crate::convert::conversation_views;
use crate::error::{ChatError, ChatResult};

const MAX_GROUP_NAME_LEN: usize = 64;

/// Finding, creating and listing conversations.
#[derive(Clone)]
pub struct ConversationService {
    db: Arc<Database>,
}

impl ConversationService {
    pub fn new(db: Arc<Database>) -> Self {
        Self { db }
    }

    /// All conversations `user_id` participates in, oldest first, with
    /// participants and message senders resolved to usernames.
    pub async fn list_conversations(&self, user_id: Uuid) -> ChatResult<Vec<ConversationView>> {
        blocking(&self.db, move |db| {
            let conversations = db.get_conversations_for_user(&user_id.to_string())?;
            load_views(db, conversations)
        })
        .await
    }

    /// Return the private conversation between the requester and
    /// `target_username`, creating it on first use.
    pub async fn get_or_create_private(
        &self,
        requester: &Identity,
        target_username: &str,
    ) -> ChatResult<ConversationView> {
        let target_username = target_username.trim().to_string();
        let lookup = target_username.clone();
        let target = blocking(&self.db, move |db| db.get_user_by_username(&lookup))
            .await?
            .ok_or_else(|| ChatError::NotFound(format!("user '{}'", target_username)))?;

        let requester_id = requester.id.to_string();
        if target.id == requester_id {
            return Err(ChatError::SelfChatNotAllowed);
        }

        let new_id = Uuid::new_v4().to_string();
        let target_id = target.id.clone();
        let (conversation_id, created) = blocking(&self.db, move |db| {
            db.find_or_create_private(&new_id, &requester_id, &target_id, chrono::Utc::now())
        })
        .await?;

        if created {
            info!(
                "{} opened private conversation {} with {}",
                requester.username, conversation_id, target.username
            );
        }

        self.load(conversation_id).await
    }

    /// Create a named group conversation. The creator is always a participant.
    pub async fn create_group(
        &self,
        creator: &Identity,
        name: &str,
        participant_usernames: &[String],
    ) -> ChatResult<ConversationView> {
        let name = name.trim().to_string();
        if name.is_empty() {
            return Err(ChatError::Validation("group name is required".into()));
        }
        if name.chars().count() > MAX_GROUP_NAME_LEN {
            return Err(ChatError::Validation(format!(
                "group name must be at most {} characters",
                MAX_GROUP_NAME_LEN
            )));
        }

        let usernames: BTreeSet<String> = participant_usernames
            .iter()
            .map(|u| u.trim().to_string())
            .filter(|u| !u.is_empty())
            .collect();

        let found = blocking(&self.db, move |db| {
            usernames
                .into_iter()
                .map(|username| Ok((db.get_user_by_username(&username)?, username)))
                .collect::<anyhow::Result<Vec<_>>>()
        })
        .await?;

        let mut members: BTreeSet<String> = BTreeSet::new();
        members.insert(creator.id.to_string());
        for (user, username) in found {
            let user = user.ok_or_else(|| ChatError::NotFound(format!("user '{}'", username)))?;
            members.insert(user.id);
        }
        if members.len() < 2 {
            return Err(ChatError::Validation(
                "a group needs at least one other participant".into(),
            ));
        }

        let id = Uuid::new_v4().to_string();
        let group_name = name.clone();
        let members: Vec<String> = members.into_iter().collect();
        let conversation_id = id.clone();
        blocking(&self.db, move |db| {
            db.create_group(&id, &group_name, &members, chrono::Utc::now())
        })
        .await?;

        info!(
            "{} created group '{}' ({})",
            creator.username, name, conversation_id
        );
        self.load(conversation_id).await
    }

    /// `NotFound` if the conversation does not exist, `Forbidden` if `user_id`
    /// is not one of its participants.
    pub async fn require_participant(&self, conversation_id: Uuid, user_id: Uuid) -> ChatResult<()> {
        require_participant(&self.db, conversation_id, user_id).await
    }

    async fn load(&self, conversation_id: String) -> ChatResult<ConversationView> {
        let id = conversation_id.clone();
        blocking(&self.db, move |db| {
            let rows = db.get_conversation(&id)?.into_iter().collect();
            load_views(db, rows)
        })
        .await?
        .into_iter()
        .next()
        .ok_or_else(|| ChatError::NotFound(format!("conversation {}", conversation_id)))
    }
}

pub(crate) async fn require_participant(
    db: &Arc<Database>,
    conversation_id: Uuid,
    user_id: Uuid,
) -> ChatResult<()> {
    let (cid, uid) = (conversation_id.to_string(), user_id.to_string());
    let (exists, member) = blocking(db, move |db| {
        let exists = db.get_conversation(&cid)?.is_some();
        let member = exists && db.is_participant(&cid, &uid)?;
        Ok((exists, member))
    })
    .await?;

    if !exists {
        return Err(ChatError::NotFound(format!("conversation {}", conversation_id)));
    }
    if !member {
        return Err(ChatError::Forbidden(
            "not a participant of this conversation".into(),
        ));
    }
    Ok(())
}

fn load_views(
    db: &Database,
    conversations: Vec<parley_db::models::ConversationRow>,
) -> anyhow::Result<Vec<ConversationView>> {
    let ids: Vec<String> = conversations.iter().map(|c| c.id.clone()).collect();
    let participants = db.get_participants(&ids)?;
    let messages = db.get_messages(&ids)?;
    let message_ids: Vec<String> = messages.iter().map(|m| m.id.clone()).collect();
    let reactions = db.get_reactions_for_messages(&message_ids)?;
    Ok(conversation_views(conversations, participants, messages, reactions))
}
