//! Ephemeral typing and online flags.
//!
//! Nothing here is persisted; every event overwrites what was there before.

use std::collections::{HashMap, HashSet};

use crate::workchat::ids::{ConversationId, UserId};

#[derive(Debug, Clone, Default)]
pub struct Presence {
    /// Users currently typing, with the conversation they type in when the server says.
    typing: HashMap<UserId, Option<ConversationId>>,
    group_online: HashSet<UserId>,
    personal_online: HashMap<UserId, bool>,
}

impl Presence {
    /// Returns `true` if the flag changed.
    pub fn set_typing(
        &mut self,
        user_id: UserId,
        conversation_id: Option<ConversationId>,
        is_typing: bool,
    ) -> bool {
        if is_typing {
            self.typing.insert(user_id, conversation_id.clone()) != Some(conversation_id)
        } else {
            self.typing.remove(&user_id).is_some()
        }
    }

    pub fn clear_typing(&mut self) {
        self.typing.clear();
    }

    pub fn is_typing(&self, user_id: &UserId) -> bool {
        self.typing.contains_key(user_id)
    }

    /// Users typing in `conversation_id`, excluding `me`.
    ///
    /// Typing events without a conversation count for whatever is open.
    pub fn typing_in(&self, conversation_id: &ConversationId, me: &UserId) -> Vec<UserId> {
        let mut users: Vec<UserId> = self
            .typing
            .iter()
            .filter(|(user, scope)| {
                *user != me && scope.as_ref().is_none_or(|id| id == conversation_id)
            })
            .map(|(user, _)| user.clone())
            .collect();
        users.sort();
        users
    }

    /// Replaces both online maps wholesale.
    pub fn replace_online(
        &mut self,
        group_online: Vec<UserId>,
        personal_online: HashMap<UserId, bool>,
    ) {
        self.group_online = group_online.into_iter().collect();
        self.personal_online = personal_online;
    }

    pub fn is_online(&self, user_id: &UserId) -> bool {
        self.group_online.contains(user_id)
            || self.personal_online.get(user_id).copied().unwrap_or(false)
    }

    pub fn online_users(&self) -> Vec<UserId> {
        let mut users: Vec<UserId> = self
            .group_online
            .iter()
            .cloned()
            .chain(
                self.personal_online
                    .iter()
                    .filter(|(_, online)| **online)
                    .map(|(user, _)| user.clone()),
            )
            .collect::<HashSet<_>>()
            .into_iter()
            .collect();
        users.sort();
        users
    }
}
