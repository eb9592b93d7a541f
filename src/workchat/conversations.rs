use std::fmt;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::workchat::{
    ids::{ConversationId, MessageId, UserId},
    messages::{Message, MessageKind, MessagePatch},
    users::User,
};

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ConversationKind {
    #[default]
    #[serde(alias = "direct", alias = "private")]
    Personal,
    Group,
}

impl fmt::Display for ConversationKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ConversationKind::Personal => write!(f, "personal"),
            ConversationKind::Group => write!(f, "group"),
        }
    }
}

/// Sidebar preview of a conversation's most recent message.
///
/// Deserializes straight from the message object the backend embeds as `lastMessage`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct MessagePreview {
    #[serde(rename = "id", alias = "_id")]
    pub message_id: MessageId,
    pub sender_id: UserId,
    #[serde(rename = "content", default)]
    pub text: Option<String>,
    #[serde(rename = "type", default)]
    pub kind: MessageKind,
    pub created_at: DateTime<Utc>,
    #[serde(default)]
    pub is_deleted: bool,
}

impl From<&Message> for MessagePreview {
    fn from(message: &Message) -> Self {
        Self {
            message_id: message.id.clone(),
            sender_id: message.sender_id.clone(),
            text: message.preview_text(),
            kind: message.kind,
            created_at: message.created_at,
            is_deleted: message.is_deleted,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Conversation {
    #[serde(alias = "_id")]
    pub id: ConversationId,
    #[serde(rename = "type", default)]
    pub kind: ConversationKind,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub name: Option<String>,
    #[serde(default)]
    pub participants: Vec<User>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub created_by: Option<UserId>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub last_message: Option<MessagePreview>,
    #[serde(default)]
    pub unread_count: u32,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub created_at: Option<DateTime<Utc>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub updated_at: Option<DateTime<Utc>>,
}

impl Conversation {
    pub fn is_group(&self) -> bool {
        self.kind == ConversationKind::Group
    }

    pub fn has_participant(&self, user_id: &UserId) -> bool {
        self.participants.iter().any(|u| &u.id == user_id)
    }

    /// The participant of a personal conversation who isn't `me`.
    pub fn other_participant(&self, me: &UserId) -> Option<&User> {
        if self.is_group() {
            return None;
        }
        self.participants.iter().find(|u| &u.id != me)
    }

    /// The group creator is the only one allowed to administer it.
    pub fn is_admin(&self, user_id: &UserId) -> bool {
        self.is_group() && self.created_by.as_ref() == Some(user_id)
    }

    /// Time used to order the sidebar: last message, then update, then creation.
    pub fn last_activity(&self) -> Option<DateTime<Utc>> {
        self.last_message
            .as_ref()
            .map(|m| m.created_at)
            .or(self.updated_at)
            .or(self.created_at)
    }

    /// Drops repeated participant ids, keeping the first occurrence.
    fn dedup_participants(&mut self) {
        let mut seen: Vec<UserId> = Vec::with_capacity(self.participants.len());
        self.participants.retain(|user| {
            if seen.contains(&user.id) {
                false
            } else {
                seen.push(user.id.clone());
                true
            }
        });
    }
}

/// Every conversation the user takes part in, plus which one is open.
#[derive(Debug, Clone, Default)]
pub struct ConversationStore {
    conversations: Vec<Conversation>,
    active: Option<ConversationId>,
}

impl ConversationStore {
    pub fn list(&self) -> &[Conversation] {
        &self.conversations
    }

    pub fn get(&self, id: &ConversationId) -> Option<&Conversation> {
        self.conversations.iter().find(|c| &c.id == id)
    }

    pub fn contains(&self, id: &ConversationId) -> bool {
        self.get(id).is_some()
    }

    pub fn len(&self) -> usize {
        self.conversations.len()
    }

    pub fn is_empty(&self) -> bool {
        self.conversations.is_empty()
    }

    /// Inserts or replaces by id. Replacement is whole-object: the server is authoritative.
    ///
    /// Returns the stored conversation.
    pub fn upsert(&mut self, mut conversation: Conversation) -> &Conversation {
        conversation.dedup_participants();
        if self.active.as_ref() == Some(&conversation.id) {
            conversation.unread_count = 0;
        }
        match self
            .conversations
            .iter()
            .position(|c| c.id == conversation.id)
        {
            Some(position) => {
                self.conversations[position] = conversation;
                &self.conversations[position]
            }
            None => {
                self.conversations.push(conversation);
                let last = self.conversations.len() - 1;
                &self.conversations[last]
            }
        }
    }

    /// Replaces the whole list (initial load). The active id survives only if still present.
    pub fn replace_all(&mut self, conversations: Vec<Conversation>) {
        self.conversations.clear();
        for conversation in conversations {
            self.upsert(conversation);
        }
        if self.active.as_ref().is_some_and(|id| !self.contains(id)) {
            self.active = None;
        }
    }

    /// Removes a conversation, clearing the active id if it pointed there. Unknown ids are ignored.
    pub fn remove(&mut self, id: &ConversationId) -> Option<Conversation> {
        let position = self.conversations.iter().position(|c| &c.id == id)?;
        if self.active.as_ref() == Some(id) {
            self.active = None;
        }
        Some(self.conversations.remove(position))
    }

    pub fn active_id(&self) -> Option<&ConversationId> {
        self.active.as_ref()
    }

    pub fn active(&self) -> Option<&Conversation> {
        self.active.as_ref().and_then(|id| self.get(id))
    }

    pub fn is_active(&self, id: &ConversationId) -> bool {
        self.active.as_ref() == Some(id)
    }

    /// Marks `id` as the open conversation and clears its unread counter.
    ///
    /// Returns `false` if nothing changed.
    pub fn set_active(&mut self, id: Option<ConversationId>) -> bool {
        if self.active == id {
            return false;
        }
        if let Some(id) = &id
            && let Some(conversation) = self.conversations.iter_mut().find(|c| &c.id == id)
        {
            conversation.unread_count = 0;
        }
        self.active = id;
        true
    }

    /// The personal conversation shared with `user_id`, if any.
    pub fn personal_with(&self, user_id: &UserId) -> Option<&Conversation> {
        self.conversations
            .iter()
            .find(|c| !c.is_group() && c.has_participant(user_id))
    }

    /// Moves the preview to `message`, the latest one to arrive.
    ///
    /// Arrival order is trusted here the same way the message log trusts it;
    /// timestamps are not compared.
    ///
    /// `count_unread` bumps the unread counter. Returns the updated conversation,
    /// or `None` if the conversation is unknown or already shows this message.
    pub fn record_message(
        &mut self,
        message: &Message,
        count_unread: bool,
    ) -> Option<&Conversation> {
        let conversation = self
            .conversations
            .iter_mut()
            .find(|c| c.id == message.conversation_id)?;

        if conversation
            .last_message
            .as_ref()
            .is_some_and(|preview| preview.message_id == message.id)
        {
            return None;
        }

        conversation.last_message = Some(MessagePreview::from(message));
        if count_unread {
            conversation.unread_count = conversation.unread_count.saturating_add(1);
        }
        Some(&*conversation)
    }

    /// Applies `patch` to every conversation whose preview shows `message_id`.
    ///
    /// When `scope` is given only that conversation is considered. Previews of
    /// deleted messages are left alone.
    pub fn patch_preview(
        &mut self,
        scope: Option<&ConversationId>,
        message_id: &MessageId,
        patch: &MessagePatch,
    ) -> Vec<Conversation> {
        let mut changed = Vec::new();
        for conversation in self.conversations.iter_mut() {
            if scope.is_some_and(|id| id != &conversation.id) {
                continue;
            }
            if let Some(preview) = conversation.last_message.as_mut()
                && &preview.message_id == message_id
                && !preview.is_deleted
            {
                if let Some(text) = &patch.content {
                    preview.text = text.clone();
                }
                if patch.is_deleted == Some(true) {
                    preview.is_deleted = true;
                }
                changed.push(conversation.clone());
            }
        }
        changed
    }
}
