//! Maps inbound push events onto store mutations.
//!
//! `reconcile` is a plain function over [`ChatState`] so it can be tested
//! without a socket. Every mutation it makes is reported as a [`ChatUpdate`].

use crate::connection::protocol::InboundEvent;
use crate::workchat::{
    ids::{ConversationId, MessageId},
    message_streaming::{ChatUpdate, UpdateTrigger},
    messages::{Message, MessagePatch},
    state::ChatState,
};

pub fn reconcile(state: &mut ChatState, event: InboundEvent) -> Vec<ChatUpdate> {
    match event {
        InboundEvent::ChatMessage(message) => message_created(state, message),
        InboundEvent::EditMessage {
            id,
            content,
            conversation_id,
        } => message_patched(
            state,
            &id,
            conversation_id.as_ref(),
            &MessagePatch::edited(content),
            UpdateTrigger::MessageEdited,
        ),
        InboundEvent::DeleteMessage {
            id,
            conversation_id,
        } => message_patched(
            state,
            &id,
            conversation_id.as_ref(),
            &MessagePatch::deleted(),
            UpdateTrigger::MessageDeleted,
        ),
        InboundEvent::MessageHistory {
            messages,
            conversation_id,
        } => history_received(state, messages, conversation_id),
        InboundEvent::Typing {
            user,
            is_typing,
            conversation_id,
        } => {
            if user == state.current_user {
                return Vec::new();
            }
            if !state
                .presence
                .set_typing(user.clone(), conversation_id.clone(), is_typing)
            {
                return Vec::new();
            }
            vec![ChatUpdate::Typing {
                user_id: user,
                conversation_id,
                is_typing,
            }]
        }
        InboundEvent::OnlineStatus {
            group_online_users,
            personal_online_users,
        } => {
            state
                .presence
                .replace_online(group_online_users, personal_online_users);
            vec![ChatUpdate::PresenceChanged {
                online_users: state.presence.online_users(),
            }]
        }
    }
}

fn message_created(state: &mut ChatState, message: Message) -> Vec<ChatUpdate> {
    let conversation_id = message.conversation_id.clone();
    if !state.conversations.contains(&conversation_id) {
        tracing::debug!(
            target: "workchat::event_processor::reconcile",
            "Message {} for unknown conversation {}, ignoring",
            message.id,
            conversation_id
        );
        return Vec::new();
    }

    let is_open = state.conversations.is_active(&conversation_id)
        && state.messages.conversation_id() == Some(&conversation_id);
    let mut updates = Vec::new();

    // Only the open conversation's log is touched; others just get a new preview.
    if is_open && state.messages.append(message.clone()) {
        updates.push(ChatUpdate::message(
            conversation_id,
            UpdateTrigger::NewMessage,
            message.clone(),
        ));
    }

    let count_unread = !is_open && message.sender_id != state.current_user;
    if let Some(conversation) = state.conversations.record_message(&message, count_unread) {
        updates.push(ChatUpdate::preview_of(conversation));
    }
    updates
}

fn message_patched(
    state: &mut ChatState,
    message_id: &MessageId,
    conversation_id: Option<&ConversationId>,
    patch: &MessagePatch,
    trigger: UpdateTrigger,
) -> Vec<ChatUpdate> {
    let mut updates = Vec::new();

    let targets_log = conversation_id.is_none_or(|id| state.messages.conversation_id() == Some(id));
    if targets_log && let Some(message) = state.messages.patch(message_id, patch) {
        updates.push(ChatUpdate::message(
            message.conversation_id.clone(),
            trigger,
            message.clone(),
        ));
    }

    for conversation in state
        .conversations
        .patch_preview(conversation_id, message_id, patch)
    {
        updates.push(ChatUpdate::preview_of(&conversation));
    }

    if updates.is_empty() {
        tracing::debug!(
            target: "workchat::event_processor::reconcile",
            "Patch for message {} matched nothing, ignoring",
            message_id
        );
    }
    updates
}

fn history_received(
    state: &mut ChatState,
    messages: Vec<Message>,
    conversation_id: Option<ConversationId>,
) -> Vec<ChatUpdate> {
    let Some(target) =
        conversation_id.or_else(|| messages.first().map(|m| m.conversation_id.clone()))
    else {
        tracing::debug!(
            target: "workchat::event_processor::reconcile",
            "History without a conversation, ignoring"
        );
        return Vec::new();
    };

    match state.apply_history(&target, messages) {
        Some(updates) => updates,
        None => {
            tracing::debug!(
                target: "workchat::event_processor::reconcile",
                "Discarding history for {}, it is no longer open",
                target
            );
            Vec::new()
        }
    }
}
