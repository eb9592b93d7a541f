//! Stream manager for per-conversation broadcast channels.
//!
//! Conversation streams are created lazily on subscribe and cleaned up once
//! all of their receivers are dropped.

use dashmap::DashMap;
use tokio::sync::broadcast;

use super::types::{ChatUpdate, ConversationUpdate};
use crate::workchat::ids::ConversationId;

const BUFFER_SIZE: usize = 100;
const GLOBAL_BUFFER_SIZE: usize = 256;

pub struct UpdateStreamManager {
    global: broadcast::Sender<ChatUpdate>,
    streams: DashMap<ConversationId, broadcast::Sender<ConversationUpdate>>,
}

impl UpdateStreamManager {
    pub fn new() -> Self {
        Self {
            global: broadcast::channel(GLOBAL_BUFFER_SIZE).0,
            streams: DashMap::new(),
        }
    }

    /// Every update, for every conversation.
    pub fn subscribe(&self) -> broadcast::Receiver<ChatUpdate> {
        self.global.subscribe()
    }

    pub fn subscribe_conversation(
        &self,
        conversation_id: &ConversationId,
    ) -> broadcast::Receiver<ConversationUpdate> {
        self.streams
            .entry(conversation_id.clone())
            .or_insert_with(|| broadcast::channel(BUFFER_SIZE).0)
            .subscribe()
    }

    /// Sends `update` to global subscribers and, for log changes, to that conversation's stream.
    pub fn publish(&self, update: ChatUpdate) {
        if let ChatUpdate::Conversation {
            conversation_id,
            update: conversation_update,
        } = &update
        {
            self.emit_conversation(conversation_id, conversation_update.clone());
        }
        // No global subscribers is normal for a headless client.
        let _ = self.global.send(update);
    }

    pub fn publish_all(&self, updates: impl IntoIterator<Item = ChatUpdate>) {
        for update in updates {
            self.publish(update);
        }
    }

    fn emit_conversation(&self, conversation_id: &ConversationId, update: ConversationUpdate) {
        if let Some(sender) = self.streams.get(conversation_id) {
            // Attempt to send; if all receivers dropped, clean up
            if sender.send(update).is_err() && sender.receiver_count() == 0 {
                drop(sender);
                self.streams.remove(conversation_id);
            }
        }
    }
}

impl Default for UpdateStreamManager {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::workchat::messages::test_fixtures::make_message;
    use crate::workchat::message_streaming::UpdateTrigger;

    fn make_test_update(conversation_id: &str, id: &str) -> ChatUpdate {
        ChatUpdate::message(
            ConversationId::from(conversation_id),
            UpdateTrigger::NewMessage,
            make_message(id, conversation_id, "u1"),
        )
    }

    #[test]
    fn subscribe_creates_new_stream() {
        let manager = UpdateStreamManager::new();
        let conversation_id = ConversationId::from("c1");

        assert!(!manager.streams.contains_key(&conversation_id));

        let _rx = manager.subscribe_conversation(&conversation_id);

        assert!(manager.streams.contains_key(&conversation_id));
    }

    #[test]
    fn multiple_subscribes_share_sender() {
        let manager = UpdateStreamManager::new();
        let conversation_id = ConversationId::from("c2");

        let _rx1 = manager.subscribe_conversation(&conversation_id);
        let _rx2 = manager.subscribe_conversation(&conversation_id);

        assert_eq!(manager.streams.len(), 1);
        let sender = manager.streams.get(&conversation_id).unwrap();
        assert_eq!(sender.receiver_count(), 2);
    }

    #[tokio::test]
    async fn publish_delivers_to_conversation_and_global() {
        let manager = UpdateStreamManager::new();
        let conversation_id = ConversationId::from("c3");

        let mut conversation_rx = manager.subscribe_conversation(&conversation_id);
        let mut global_rx = manager.subscribe();

        manager.publish(make_test_update("c3", "msg1"));

        match conversation_rx.try_recv().expect("should receive update") {
            ConversationUpdate::Message(update) => {
                assert_eq!(update.message.id.as_str(), "msg1");
                assert_eq!(update.trigger, UpdateTrigger::NewMessage);
            }
            other => panic!("unexpected update: {:?}", other),
        }
        assert!(matches!(
            global_rx.try_recv().expect("should receive global update"),
            ChatUpdate::Conversation { .. }
        ));
    }

    #[test]
    fn publish_without_subscribers_is_noop() {
        let manager = UpdateStreamManager::new();

        manager.publish(make_test_update("c4", "msg2"));

        assert!(!manager.streams.contains_key(&ConversationId::from("c4")));
    }

    #[test]
    fn publish_cleans_up_when_all_receivers_dropped() {
        let manager = UpdateStreamManager::new();
        let conversation_id = ConversationId::from("c5");

        let rx = manager.subscribe_conversation(&conversation_id);
        drop(rx);

        // Cleanup happens on the next publish
        assert!(manager.streams.contains_key(&conversation_id));

        manager.publish(make_test_update("c5", "msg3"));

        assert!(!manager.streams.contains_key(&conversation_id));
    }

    #[test]
    fn other_conversations_do_not_leak_into_stream() {
        let manager = UpdateStreamManager::new();
        let mut rx = manager.subscribe_conversation(&ConversationId::from("c6"));

        manager.publish(make_test_update("c7", "msg4"));

        assert!(rx.try_recv().is_err());
    }

    #[test]
    fn default_creates_empty_manager() {
        let manager = UpdateStreamManager::default();
        assert!(manager.streams.is_empty());
    }
}
