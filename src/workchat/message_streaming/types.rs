//! Types for the update streaming feature.

use serde::{Deserialize, Serialize};
use tokio::sync::broadcast;
use uuid::Uuid;

use crate::connection::ConnectionState;
use crate::error::{ErrorCategory, WorkchatError};
use crate::workchat::{
    conversations::{Conversation, MessagePreview},
    ids::{ConversationId, UserId},
    messages::Message,
};

/// What triggered a message update.
///
/// The accompanying `message` field in [`MessageUpdate`] always contains
/// the complete, up-to-date state of the affected message.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum UpdateTrigger {
    /// A new message was appended to the open conversation.
    NewMessage,

    /// The sender edited the message.
    MessageEdited,

    /// The message was soft-deleted.
    MessageDeleted,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MessageUpdate {
    pub trigger: UpdateTrigger,

    /// The complete, current state of the affected message.
    pub message: Message,
}

/// A change to the message log of one conversation.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub enum ConversationUpdate {
    Message(MessageUpdate),

    /// The log was replaced by a freshly loaded first page.
    HistoryReplaced(Vec<Message>),

    /// Older messages were inserted in front of the log.
    HistoryPrepended(Vec<Message>),
}

/// User-visible notification for a failed command.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Notice {
    pub id: Uuid,
    pub category: ErrorCategory,
    /// The command that failed, e.g. `send_attachment`
    pub action: String,
    pub message: String,
}

impl Notice {
    pub fn from_error(action: &str, error: &WorkchatError) -> Self {
        Self {
            id: Uuid::new_v4(),
            category: error.category(),
            action: action.to_string(),
            message: error.to_string(),
        }
    }
}

/// Everything a UI needs to re-render, in the order the store changed.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub enum ChatUpdate {
    Conversation {
        conversation_id: ConversationId,
        update: ConversationUpdate,
    },
    PreviewChanged {
        conversation_id: ConversationId,
        preview: Option<MessagePreview>,
        unread_count: u32,
    },
    ConversationUpserted(Conversation),
    ConversationRemoved(ConversationId),
    ConversationsReplaced,
    /// The user directory was reloaded; potential chats may have changed.
    UsersReplaced,
    ActiveConversationChanged(Option<ConversationId>),
    Typing {
        user_id: UserId,
        conversation_id: Option<ConversationId>,
        is_typing: bool,
    },
    PresenceChanged {
        online_users: Vec<UserId>,
    },
    ConnectionChanged(ConnectionState),
    Notice(Notice),
}

impl ChatUpdate {
    pub(crate) fn preview_of(conversation: &Conversation) -> Self {
        ChatUpdate::PreviewChanged {
            conversation_id: conversation.id.clone(),
            preview: conversation.last_message.clone(),
            unread_count: conversation.unread_count,
        }
    }

    pub(crate) fn message(
        conversation_id: ConversationId,
        trigger: UpdateTrigger,
        message: Message,
    ) -> Self {
        ChatUpdate::Conversation {
            conversation_id,
            update: ConversationUpdate::Message(MessageUpdate { trigger, message }),
        }
    }
}

/// Result of subscribing to a conversation.
///
/// The snapshot and the receiver are taken under the same read lock, so no
/// update is missed or seen twice.
pub struct ConversationSubscription {
    /// The conversation's message log at subscription time. Empty unless it is the open one.
    pub initial_messages: Vec<Message>,

    /// Receiver for real-time updates after the initial snapshot.
    pub updates: broadcast::Receiver<ConversationUpdate>,
}
