use crate::connection::protocol::{OutboundCommand, SendMessagePayload};
use crate::error::{Result, WorkchatError};
use crate::workchat::{
    Workchat,
    ids::{ConversationId, MessageId},
    messages::MessageKind,
};

impl Workchat {
    /// Sends a text message to the open conversation.
    ///
    /// Nothing is added to the message log here; the message appears when the
    /// server echoes it back.
    pub async fn send_text(&self, content: &str, reply_to_id: Option<MessageId>) -> Result<()> {
        let result = self.send_text_inner(content, reply_to_id).await;
        self.surface("send_text", result)
    }

    async fn send_text_inner(&self, content: &str, reply_to_id: Option<MessageId>) -> Result<()> {
        if content.trim().is_empty() {
            return Err(WorkchatError::EmptyMessage);
        }
        let conversation_id = self.require_active_conversation().await?;

        self.emit(OutboundCommand::SendMessage(SendMessagePayload {
            conversation_id,
            sender_id: self.session.user_id.clone(),
            content: Some(content.to_string()),
            kind: MessageKind::Text,
            file_url: None,
            reply_to_id,
        }))
        .await
    }

    /// Asks the server to replace the content of one of the user's own messages.
    pub async fn edit_message(&self, message_id: &MessageId, new_content: &str) -> Result<()> {
        let result = self.edit_message_inner(message_id, new_content).await;
        self.surface("edit_message", result)
    }

    async fn edit_message_inner(&self, message_id: &MessageId, new_content: &str) -> Result<()> {
        if new_content.trim().is_empty() {
            return Err(WorkchatError::EmptyMessage);
        }
        let conversation_id = self.own_message_conversation(message_id).await?;

        self.emit(OutboundCommand::EditMessage {
            message_id: message_id.clone(),
            new_content: new_content.to_string(),
            conversation_id,
        })
        .await
    }

    /// Asks the server to soft-delete one of the user's own messages.
    pub async fn delete_message(&self, message_id: &MessageId) -> Result<()> {
        let result = async {
            let conversation_id = self.own_message_conversation(message_id).await?;
            self.emit(OutboundCommand::DeleteMessage {
                message_id: message_id.clone(),
                conversation_id,
            })
            .await
        }
        .await;
        self.surface("delete_message", result)
    }

    /// Tells the open conversation whether the user is typing.
    ///
    /// Failures are logged only; a lost typing flag is not worth a notice.
    pub async fn set_typing(&self, is_typing: bool) -> Result<()> {
        let conversation_id = self.require_active_conversation().await?;
        let result = self
            .emit(OutboundCommand::Typing {
                conversation_id,
                is_typing,
            })
            .await;
        if let Err(e) = &result {
            tracing::debug!(
                target: "workchat::dispatcher::set_typing",
                "Typing flag not sent: {}",
                e
            );
        }
        result
    }

    /// The conversation of `message_id`, provided the current user sent it.
    async fn own_message_conversation(&self, message_id: &MessageId) -> Result<ConversationId> {
        let state = self.state.read().await;
        let message = state
            .messages
            .get(message_id)
            .ok_or_else(|| WorkchatError::MessageNotFound(message_id.clone()))?;
        if message.sender_id != self.session.user_id {
            return Err(WorkchatError::NotMessageSender(message_id.clone()));
        }
        Ok(message.conversation_id.clone())
    }
}
