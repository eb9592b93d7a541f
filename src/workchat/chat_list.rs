use std::collections::HashSet;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::workchat::{
    Workchat,
    conversations::{Conversation, ConversationKind, MessagePreview},
    ids::{ConversationId, UserId},
    state::ChatState,
    users::User,
};

/// A conversation row in the sidebar.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ConversationSummary {
    pub id: ConversationId,
    pub kind: ConversationKind,
    /// Display name for this chat:
    /// - Groups: the group name, or the members' names if it has none
    /// - Personal: the other participant's display name
    pub name: String,
    /// Avatar of the other participant (personal chats only)
    pub avatar: Option<String>,
    pub last_message: Option<MessagePreview>,
    /// Display name of whoever sent `last_message`
    pub last_sender_name: Option<String>,
    pub last_activity: Option<DateTime<Utc>>,
    pub unread_count: u32,
    /// Personal: the other participant is online. Groups: any other member is.
    pub online: bool,
    pub is_active: bool,
    /// Whether the current user may rename, re-member or delete this group
    pub can_administer: bool,
}

/// One row of the sidebar.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum ChatListItem {
    Conversation(ConversationSummary),
    /// A known user without a personal conversation yet. Starting a chat materializes it.
    PotentialChat { user: User, online: bool },
}

impl ChatListItem {
    pub fn name(&self) -> String {
        match self {
            ChatListItem::Conversation(summary) => summary.name.clone(),
            ChatListItem::PotentialChat { user, .. } => user.display_name(),
        }
    }
}

/// Resolves a participant against the directory, which carries fuller profiles.
fn resolve_user<'a>(state: &'a ChatState, participant: &'a User) -> &'a User {
    state.users.get(&participant.id).unwrap_or(participant)
}

/// Resolves the chat name based on conversation kind.
fn resolve_chat_name(state: &ChatState, conversation: &Conversation) -> String {
    let me = &state.current_user;
    match conversation.kind {
        ConversationKind::Group => match conversation.name.as_deref().map(str::trim) {
            Some(name) if !name.is_empty() => name.to_string(),
            _ => {
                let members: Vec<String> = conversation
                    .participants
                    .iter()
                    .filter(|u| &u.id != me)
                    .map(|u| resolve_user(state, u).display_name())
                    .collect();
                if members.is_empty() {
                    "Empty group".to_string()
                } else {
                    members.join(", ")
                }
            }
        },
        ConversationKind::Personal => conversation
            .other_participant(me)
            .map(|u| resolve_user(state, u).display_name())
            .unwrap_or_else(|| "Unknown user".to_string()),
    }
}

fn summarize(state: &ChatState, conversation: &Conversation) -> ConversationSummary {
    let me = &state.current_user;
    let other = conversation
        .other_participant(me)
        .map(|u| resolve_user(state, u));

    let online = match conversation.kind {
        ConversationKind::Personal => other.is_some_and(|u| state.presence.is_online(&u.id)),
        ConversationKind::Group => conversation
            .participants
            .iter()
            .any(|u| &u.id != me && state.presence.is_online(&u.id)),
    };

    let last_sender_name = conversation.last_message.as_ref().map(|preview| {
        if &preview.sender_id == me {
            "You".to_string()
        } else {
            conversation
                .participants
                .iter()
                .find(|u| u.id == preview.sender_id)
                .map(|u| resolve_user(state, u).display_name())
                .or_else(|| state.users.get(&preview.sender_id).map(User::display_name))
                .unwrap_or_else(|| preview.sender_id.to_string())
        }
    });

    ConversationSummary {
        id: conversation.id.clone(),
        kind: conversation.kind,
        name: resolve_chat_name(state, conversation),
        avatar: other.and_then(|u| u.avatar.clone()),
        last_message: conversation.last_message.clone(),
        last_sender_name,
        last_activity: conversation.last_activity(),
        unread_count: conversation.unread_count,
        online,
        is_active: state.conversations.is_active(&conversation.id),
        can_administer: conversation.is_admin(me),
    }
}

fn conversation_matches(state: &ChatState, summary: &ConversationSummary, needle: &str) -> bool {
    if summary.name.to_lowercase().contains(needle) {
        return true;
    }
    state
        .conversations
        .get(&summary.id)
        .and_then(|c| c.other_participant(&state.current_user))
        .is_some_and(|u| resolve_user(state, u).matches(needle))
}

/// Sorts conversations by last activity (most recent first), then by name.
/// Conversations with no activity at all go last.
fn sort_conversations(items: &mut [ConversationSummary]) {
    items.sort_by(|a, b| {
        b.last_activity
            .cmp(&a.last_activity)
            .then_with(|| a.name.to_lowercase().cmp(&b.name.to_lowercase()))
    });
}

/// Builds the sidebar: every conversation plus a potential chat for each known
/// user who has no personal conversation with the current user yet.
pub fn build_chat_list(state: &ChatState, search: Option<&str>) -> Vec<ChatListItem> {
    let needle = search
        .map(|s| s.trim().to_lowercase())
        .filter(|s| !s.is_empty());

    let mut conversations: Vec<ConversationSummary> = state
        .conversations
        .list()
        .iter()
        .map(|c| summarize(state, c))
        .filter(|summary| {
            needle
                .as_deref()
                .is_none_or(|n| conversation_matches(state, summary, n))
        })
        .collect();
    sort_conversations(&mut conversations);

    let in_personal_chat: HashSet<&UserId> = state
        .conversations
        .list()
        .iter()
        .filter(|c| !c.is_group())
        .filter_map(|c| c.other_participant(&state.current_user))
        .map(|u| &u.id)
        .collect();

    let mut potential: Vec<&User> = state
        .users
        .all()
        .iter()
        .filter(|u| u.id != state.current_user && !in_personal_chat.contains(&u.id))
        .filter(|u| needle.as_deref().is_none_or(|n| u.matches(n)))
        .collect();
    potential.sort_by_key(|u| u.display_name().to_lowercase());

    conversations
        .into_iter()
        .map(ChatListItem::Conversation)
        .chain(potential.into_iter().map(|user| ChatListItem::PotentialChat {
            user: user.clone(),
            online: state.presence.is_online(&user.id),
        }))
        .collect()
}

impl Workchat {
    /// Retrieves the sidebar, optionally filtered by a case-insensitive search.
    pub async fn chat_list(&self, search: Option<&str>) -> Vec<ChatListItem> {
        let state = self.state.read().await;
        build_chat_list(&state, search)
    }
}
