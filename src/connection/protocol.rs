//! JSON frames exchanged over the chat socket.
//!
//! Every frame is `{"event": "<name>", "data": {..}}`.

use std::collections::HashMap;

use serde::{Deserialize, Deserializer, Serialize};

use crate::workchat::{
    ids::{ConversationId, MessageId, UserId},
    messages::{Message, MessageKind},
};

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SendMessagePayload {
    pub conversation_id: ConversationId,
    pub sender_id: UserId,
    pub content: Option<String>,
    #[serde(rename = "type")]
    pub kind: MessageKind,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub file_url: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub reply_to_id: Option<MessageId>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "event", content = "data", rename_all = "snake_case")]
pub enum OutboundCommand {
    #[serde(rename_all = "camelCase")]
    JoinConversation { conversation_id: ConversationId },
    SendMessage(SendMessagePayload),
    #[serde(rename_all = "camelCase")]
    EditMessage {
        message_id: MessageId,
        new_content: String,
        conversation_id: ConversationId,
    },
    #[serde(rename_all = "camelCase")]
    DeleteMessage {
        message_id: MessageId,
        conversation_id: ConversationId,
    },
    Typing {
        #[serde(rename = "conversationId")]
        conversation_id: ConversationId,
        is_typing: bool,
    },
}

impl OutboundCommand {
    pub fn event_name(&self) -> &'static str {
        match self {
            OutboundCommand::JoinConversation { .. } => "join_conversation",
            OutboundCommand::SendMessage(_) => "send_message",
            OutboundCommand::EditMessage { .. } => "edit_message",
            OutboundCommand::DeleteMessage { .. } => "delete_message",
            OutboundCommand::Typing { .. } => "typing",
        }
    }

    pub fn to_frame(&self) -> serde_json::Result<String> {
        serde_json::to_string(self)
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "event", content = "data", rename_all = "snake_case")]
pub enum InboundEvent {
    ChatMessage(Message),
    EditMessage {
        #[serde(alias = "_id", alias = "messageId")]
        id: MessageId,
        #[serde(alias = "newContent")]
        content: String,
        #[serde(rename = "conversationId", default)]
        conversation_id: Option<ConversationId>,
    },
    DeleteMessage {
        #[serde(alias = "_id", alias = "messageId")]
        id: MessageId,
        #[serde(rename = "conversationId", default)]
        conversation_id: Option<ConversationId>,
    },
    MessageHistory {
        #[serde(default)]
        messages: Vec<Message>,
        #[serde(rename = "conversationId", default)]
        conversation_id: Option<ConversationId>,
    },
    Typing {
        #[serde(deserialize_with = "user_ref")]
        user: UserId,
        is_typing: bool,
        #[serde(rename = "conversationId", default)]
        conversation_id: Option<ConversationId>,
    },
    OnlineStatus {
        #[serde(default)]
        group_online_users: Vec<UserId>,
        #[serde(default)]
        personal_online_users: HashMap<UserId, bool>,
    },
}

impl InboundEvent {
    /// Decodes one text frame. Unknown event names are an error.
    pub fn from_frame(text: &str) -> serde_json::Result<Self> {
        serde_json::from_str(text)
    }

    pub fn event_name(&self) -> &'static str {
        match self {
            InboundEvent::ChatMessage(_) => "chat_message",
            InboundEvent::EditMessage { .. } => "edit_message",
            InboundEvent::DeleteMessage { .. } => "delete_message",
            InboundEvent::MessageHistory { .. } => "message_history",
            InboundEvent::Typing { .. } => "typing",
            InboundEvent::OnlineStatus { .. } => "online_status",
        }
    }
}

/// Typing events name the user either by id or as an embedded user object.
fn user_ref<'de, D>(deserializer: D) -> Result<UserId, D::Error>
where
    D: Deserializer<'de>,
{
    #[derive(Deserialize)]
    struct Embedded {
        #[serde(alias = "_id")]
        id: UserId,
    }

    #[derive(Deserialize)]
    #[serde(untagged)]
    enum UserRef {
        Id(UserId),
        Embedded(Embedded),
    }

    Ok(match UserRef::deserialize(deserializer)? {
        UserRef::Id(id) => id,
        UserRef::Embedded(user) => user.id,
    })
}
