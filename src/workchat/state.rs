use std::collections::HashSet;

use crate::workchat::{
    conversations::{Conversation, ConversationStore},
    ids::{ConversationId, MessageId, UserId},
    message_streaming::{ChatUpdate, ConversationUpdate},
    messages::{Message, MessageStore},
    presence::Presence,
    users::UserDirectory,
};

/// Everything the chat core owns, guarded by a single lock in [`Workchat`].
///
/// Only the event reconciler and the dispatcher's success paths write to it.
///
/// [`Workchat`]: crate::workchat::Workchat
#[derive(Debug, Clone)]
pub struct ChatState {
    pub current_user: UserId,
    pub conversations: ConversationStore,
    pub messages: MessageStore,
    pub presence: Presence,
    pub users: UserDirectory,
}

impl ChatState {
    pub fn new(current_user: UserId) -> Self {
        Self {
            current_user,
            conversations: ConversationStore::default(),
            messages: MessageStore::default(),
            presence: Presence::default(),
            users: UserDirectory::default(),
        }
    }

    /// Switches the open conversation.
    ///
    /// The message log is emptied right away so that nothing from the previous
    /// conversation is visible while the new history loads.
    pub fn set_active(&mut self, conversation_id: Option<ConversationId>) -> Vec<ChatUpdate> {
        if !self.conversations.set_active(conversation_id.clone())
            && self.messages.conversation_id() == conversation_id.as_ref()
        {
            return Vec::new();
        }

        self.messages.reset(conversation_id.clone());
        self.presence.clear_typing();

        let mut updates = vec![ChatUpdate::ActiveConversationChanged(conversation_id)];
        if let Some(active) = self.conversations.active() {
            updates.push(ChatUpdate::preview_of(active));
        }
        updates
    }

    /// Installs the first history page of `conversation_id`.
    ///
    /// Returns `None` when the conversation is no longer open, which is how
    /// stale fetch responses get dropped.
    ///
    /// Entries the page does not carry are kept on the side of it they belong to:
    /// older pages loaded earlier stay in front, messages that arrived live while
    /// the page was in flight stay at the end.
    pub fn apply_history(
        &mut self,
        conversation_id: &ConversationId,
        history: Vec<Message>,
    ) -> Option<Vec<ChatUpdate>> {
        if !self.is_open(conversation_id) {
            return None;
        }

        let history: Vec<Message> = history
            .into_iter()
            .filter(|m| &m.conversation_id == conversation_id)
            .collect();
        let (older, newer) = split_around_page(self.messages.messages(), &history);

        self.messages.set_all(older);
        for message in history.into_iter().chain(newer) {
            self.messages.append(message);
        }

        Some(vec![ChatUpdate::Conversation {
            conversation_id: conversation_id.clone(),
            update: ConversationUpdate::HistoryReplaced(self.messages.messages().to_vec()),
        }])
    }

    /// Inserts an older page in front of the log, with the same staleness rule as
    /// [`ChatState::apply_history`].
    pub fn prepend_history(
        &mut self,
        conversation_id: &ConversationId,
        older: Vec<Message>,
    ) -> Option<Vec<ChatUpdate>> {
        if !self.is_open(conversation_id) {
            return None;
        }

        let inserted = self.messages.prepend_history(
            older
                .into_iter()
                .filter(|m| &m.conversation_id == conversation_id)
                .collect(),
        );
        if inserted.is_empty() {
            return Some(Vec::new());
        }
        Some(vec![ChatUpdate::Conversation {
            conversation_id: conversation_id.clone(),
            update: ConversationUpdate::HistoryPrepended(inserted),
        }])
    }

    pub fn upsert_conversation(&mut self, conversation: Conversation) -> Vec<ChatUpdate> {
        let stored = self.conversations.upsert(conversation);
        vec![ChatUpdate::ConversationUpserted(stored.clone())]
    }

    /// Replaces the conversation list, closing the open conversation if it vanished.
    pub fn replace_conversations(&mut self, conversations: Vec<Conversation>) -> Vec<ChatUpdate> {
        let previously_active = self.conversations.active_id().cloned();
        self.conversations.replace_all(conversations);

        let mut updates = vec![ChatUpdate::ConversationsReplaced];
        if previously_active.is_some() && self.conversations.active_id().is_none() {
            self.messages.reset(None);
            self.presence.clear_typing();
            updates.push(ChatUpdate::ActiveConversationChanged(None));
        }
        updates
    }

    /// Drops a conversation. If it was open the message log is cleared with it.
    pub fn remove_conversation(&mut self, conversation_id: &ConversationId) -> Vec<ChatUpdate> {
        let was_active = self.conversations.is_active(conversation_id);
        if self.conversations.remove(conversation_id).is_none() {
            return Vec::new();
        }

        let mut updates = vec![ChatUpdate::ConversationRemoved(conversation_id.clone())];
        if was_active {
            self.messages.reset(None);
            self.presence.clear_typing();
            updates.push(ChatUpdate::ActiveConversationChanged(None));
        }
        updates
    }

    fn is_open(&self, conversation_id: &ConversationId) -> bool {
        self.conversations.is_active(conversation_id)
            && self.messages.conversation_id() == Some(conversation_id)
    }
}

/// Splits the current log into the entries that sit before and after `page`,
/// leaving out the ones `page` itself carries.
///
/// The first log entry the page also carries anchors the split. Without any
/// overlap, entries created before the page's first message count as older.
fn split_around_page(log: &[Message], page: &[Message]) -> (Vec<Message>, Vec<Message>) {
    let in_page: HashSet<&MessageId> = page.iter().map(|m| &m.id).collect();
    let anchor = log
        .iter()
        .position(|m| in_page.contains(&m.id))
        .unwrap_or_else(|| match page.first() {
            Some(first) => log
                .iter()
                .position(|m| m.created_at >= first.created_at)
                .unwrap_or(log.len()),
            None => log.len(),
        });

    let keep = |messages: &[Message]| -> Vec<Message> {
        messages
            .iter()
            .filter(|m| !in_page.contains(&m.id))
            .cloned()
            .collect()
    };
    (keep(&log[..anchor]), keep(&log[anchor..]))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::workchat::conversations::test_fixtures::*;
    use crate::workchat::messages::test_fixtures::make_message;

    fn state_with(conversations: Vec<Conversation>) -> ChatState {
        let mut state = ChatState::new(UserId::from("me"));
        state.conversations.replace_all(conversations);
        state
    }

    fn log_ids(state: &ChatState) -> Vec<&str> {
        state
            .messages
            .messages()
            .iter()
            .map(|m| m.id.as_str())
            .collect()
    }

    #[test]
    fn test_switch_clears_log_and_typing() {
        let mut state = state_with(vec![
            make_personal("a", "me", "alice"),
            make_personal("b", "me", "bob"),
        ]);
        state.set_active(Some(ConversationId::from("a")));
        state.messages.append(make_message("1", "a", "alice"));
        state
            .presence
            .set_typing(UserId::from("alice"), None, true);

        let updates = state.set_active(Some(ConversationId::from("b")));

        assert!(state.messages.is_empty());
        assert_eq!(
            state.messages.conversation_id(),
            Some(&ConversationId::from("b"))
        );
        assert!(!state.presence.is_typing(&UserId::from("alice")));
        assert!(matches!(
            updates.first(),
            Some(ChatUpdate::ActiveConversationChanged(Some(id))) if id.as_str() == "b"
        ));
    }

    #[test]
    fn test_reselecting_active_is_noop() {
        let mut state = state_with(vec![make_personal("a", "me", "alice")]);
        state.set_active(Some(ConversationId::from("a")));
        state.messages.append(make_message("1", "a", "alice"));

        assert!(state.set_active(Some(ConversationId::from("a"))).is_empty());
        assert_eq!(state.messages.len(), 1);
    }

    #[test]
    fn test_stale_history_is_discarded() {
        let mut state = state_with(vec![
            make_personal("a", "me", "alice"),
            make_personal("b", "me", "bob"),
        ]);
        state.set_active(Some(ConversationId::from("a")));
        state.set_active(Some(ConversationId::from("b")));

        assert!(
            state
                .apply_history(&ConversationId::from("b"), vec![make_message("b1", "b", "bob")])
                .is_some()
        );
        assert!(
            state
                .apply_history(&ConversationId::from("a"), vec![make_message("a1", "a", "alice")])
                .is_none()
        );

        assert_eq!(log_ids(&state), vec!["b1"]);
    }

    #[test]
    fn test_history_keeps_live_messages_that_raced_the_fetch() {
        let mut state = state_with(vec![make_personal("a", "me", "alice")]);
        state.set_active(Some(ConversationId::from("a")));
        state.messages.append(make_message("3", "a", "alice"));

        state.apply_history(
            &ConversationId::from("a"),
            vec![
                make_message("1", "a", "alice"),
                make_message("2", "a", "me"),
                make_message("3", "a", "alice"),
            ],
        );

        assert_eq!(log_ids(&state), vec!["1", "2", "3"]);
    }

    #[test]
    fn test_history_keeps_older_pages_in_front() {
        let mut state = state_with(vec![make_personal("a", "me", "alice")]);
        state.set_active(Some(ConversationId::from("a")));
        state.apply_history(
            &ConversationId::from("a"),
            vec![make_message("3", "a", "alice"), make_message("4", "a", "me")],
        );
        state.prepend_history(
            &ConversationId::from("a"),
            vec![make_message("1", "a", "alice"), make_message("2", "a", "me")],
        );

        // Rejoining after a reconnect sends the newest page again
        state.apply_history(
            &ConversationId::from("a"),
            vec![make_message("3", "a", "alice"), make_message("4", "a", "me")],
        );

        assert_eq!(log_ids(&state), vec!["1", "2", "3", "4"]);
    }

    #[test]
    fn test_history_without_overlap_sorts_log_around_page() {
        let mut state = state_with(vec![make_personal("a", "me", "alice")]);
        state.set_active(Some(ConversationId::from("a")));
        state.messages.append(make_message("1", "a", "alice"));
        state.messages.append(make_message("5", "a", "alice"));

        state.apply_history(
            &ConversationId::from("a"),
            vec![make_message("3", "a", "alice"), make_message("4", "a", "me")],
        );

        assert_eq!(log_ids(&state), vec!["1", "3", "4", "5"]);
    }

    #[test]
    fn test_history_drops_foreign_messages() {
        let mut state = state_with(vec![make_personal("a", "me", "alice")]);
        state.set_active(Some(ConversationId::from("a")));

        state.apply_history(
            &ConversationId::from("a"),
            vec![make_message("1", "a", "alice"), make_message("x", "z", "eve")],
        );

        assert_eq!(log_ids(&state), vec!["1"]);
    }

    #[test]
    fn test_prepend_history_inserts_older_page() {
        let mut state = state_with(vec![make_personal("a", "me", "alice")]);
        state.set_active(Some(ConversationId::from("a")));
        state.apply_history(&ConversationId::from("a"), vec![make_message("3", "a", "me")]);

        let updates = state
            .prepend_history(
                &ConversationId::from("a"),
                vec![make_message("1", "a", "me"), make_message("2", "a", "me")],
            )
            .unwrap();

        assert_eq!(updates.len(), 1);
        assert_eq!(log_ids(&state), vec!["1", "2", "3"]);
    }

    #[test]
    fn test_remove_active_conversation_cascades() {
        let mut state = state_with(vec![make_group("g1", "Ops", "me", &["me", "a"])]);
        state.set_active(Some(ConversationId::from("g1")));
        state.messages.append(make_message("1", "g1", "a"));

        let updates = state.remove_conversation(&ConversationId::from("g1"));

        assert_eq!(updates.len(), 2);
        assert!(state.messages.is_empty());
        assert!(state.messages.conversation_id().is_none());
        assert!(state.conversations.active_id().is_none());
        assert!(
            state
                .remove_conversation(&ConversationId::from("g1"))
                .is_empty()
        );
    }

    #[test]
    fn test_replace_conversations_closes_vanished_active() {
        let mut state = state_with(vec![make_personal("a", "me", "alice")]);
        state.set_active(Some(ConversationId::from("a")));
        state.messages.append(make_message("1", "a", "alice"));

        let updates = state.replace_conversations(vec![make_personal("b", "me", "bob")]);

        assert!(state.messages.is_empty());
        assert!(matches!(
            updates.last(),
            Some(ChatUpdate::ActiveConversationChanged(None))
        ));
    }
}
