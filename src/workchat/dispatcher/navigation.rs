use crate::connection::protocol::OutboundCommand;
use crate::error::{Result, WorkchatError};
use crate::workchat::{
    Workchat,
    conversations::Conversation,
    ids::{ConversationId, UserId},
    messages::Message,
};

impl Workchat {
    /// Makes `conversation_id` the open conversation and loads its newest page.
    ///
    /// The message log is cleared before the fetch starts. If the user has
    /// switched elsewhere by the time the page arrives, the page is dropped.
    pub async fn open_conversation(&self, conversation_id: &ConversationId) -> Result<()> {
        let result = self.open_conversation_inner(conversation_id).await;
        self.surface("open_conversation", result)
    }

    async fn open_conversation_inner(&self, conversation_id: &ConversationId) -> Result<()> {
        {
            let mut state = self.state.write().await;
            if !state.conversations.contains(conversation_id) {
                return Err(WorkchatError::ConversationNotFound(conversation_id.clone()));
            }
            let updates = state.set_active(Some(conversation_id.clone()));
            self.streams.publish_all(updates);
        }

        // Room membership is re-sent on every reconnect, so a miss here is not fatal.
        if let Err(e) = self
            .emit(OutboundCommand::JoinConversation {
                conversation_id: conversation_id.clone(),
            })
            .await
        {
            tracing::debug!(
                target: "workchat::dispatcher::open_conversation",
                "Join for {} not sent: {}",
                conversation_id,
                e
            );
        }

        let history = self.api.fetch_messages(conversation_id, 1).await?;
        self.install_history(conversation_id, 1, history).await;
        Ok(())
    }

    /// Closes the open conversation, emptying the message log.
    pub async fn close_conversation(&self) {
        let mut state = self.state.write().await;
        let updates = state.set_active(None);
        self.streams.publish_all(updates);
    }

    /// Fetches an older history page of the open conversation and puts it in front of the log.
    ///
    /// Returns how many messages were new.
    pub async fn load_older_messages(&self, page: u32) -> Result<usize> {
        let result = async {
            let conversation_id = self.require_active_conversation().await?;
            let older = self.api.fetch_messages(&conversation_id, page).await?;
            let before = self.state.read().await.messages.len();
            if !self.install_history(&conversation_id, page, older).await {
                return Ok(0);
            }
            Ok(self.state.read().await.messages.len().saturating_sub(before))
        }
        .await;
        self.surface("load_older_messages", result)
    }

    /// Applies a fetched page unless its conversation is no longer open.
    ///
    /// Page 1 replaces the log, later pages are prepended. Returns `false` for a stale page.
    pub(crate) async fn install_history(
        &self,
        conversation_id: &ConversationId,
        page: u32,
        messages: Vec<Message>,
    ) -> bool {
        let mut state = self.state.write().await;
        let updates = if page <= 1 {
            state.apply_history(conversation_id, messages)
        } else {
            state.prepend_history(conversation_id, messages)
        };

        match updates {
            Some(updates) => {
                self.streams.publish_all(updates);
                true
            }
            None => {
                tracing::debug!(
                    target: "workchat::dispatcher::install_history",
                    "Discarding page {} of {}, the conversation is no longer open",
                    page,
                    conversation_id
                );
                false
            }
        }
    }

    /// Reloads the conversation list from `GET /chat/conversations`.
    pub async fn refresh_conversations(&self) -> Result<Vec<Conversation>> {
        let result = self
            .api
            .list_conversations()
            .await
            .map_err(WorkchatError::from);
        let conversations = self.surface("refresh_conversations", result)?;

        let mut state = self.state.write().await;
        let updates = state.replace_conversations(conversations);
        self.streams.publish_all(updates);

        tracing::debug!(
            target: "workchat::dispatcher::refresh_conversations",
            "Loaded {} conversations",
            state.conversations.len()
        );
        Ok(state.conversations.list().to_vec())
    }

    /// Starts (or resumes) the personal conversation with `user_id`.
    ///
    /// The backend returns the existing conversation when there is one, and the
    /// upsert by id keeps the sidebar free of duplicates.
    pub async fn start_chat(&self, user_id: &UserId) -> Result<Conversation> {
        let result = async {
            if user_id == &self.session.user_id {
                return Err(WorkchatError::InvalidRecipient(user_id.clone()));
            }
            let conversation = self.api.start_conversation(user_id).await?;
            Ok(self.store_conversation(conversation).await)
        }
        .await;
        self.surface("start_chat", result)
    }

    /// Upserts a server-returned conversation and returns the stored copy.
    pub(crate) async fn store_conversation(&self, conversation: Conversation) -> Conversation {
        let mut state = self.state.write().await;
        let returned = conversation.clone();
        let updates = state.upsert_conversation(conversation);
        self.streams.publish_all(updates);
        state
            .conversations
            .get(&returned.id)
            .cloned()
            .unwrap_or(returned)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::workchat::conversations::test_fixtures::make_personal;
    use crate::workchat::message_streaming::ChatUpdate;
    use crate::workchat::messages::test_fixtures::make_message;
    use crate::workchat::test_utils::*;
    use mockito::{Matcher, Server};
    use serde_json::json;

    fn message_json(id: &str, conversation_id: &str, sender_id: &str) -> serde_json::Value {
        serde_json::to_value(make_message(id, conversation_id, sender_id)).unwrap()
    }

    fn personal_json(id: &str, other: &str) -> serde_json::Value {
        serde_json::to_value(make_personal(id, "me", other)).unwrap()
    }

    #[tokio::test]
    async fn test_open_conversation_joins_and_loads_history() {
        let mut server = Server::new_async().await;
        let mock = server
            .mock("GET", "/chat/c1/messages")
            .match_query(Matcher::UrlEncoded("page".into(), "1".into()))
            .with_status(200)
            .with_body(
                json!([message_json("1", "c1", "alice"), message_json("2", "c1", "me")])
                    .to_string(),
            )
            .create_async()
            .await;
        let (workchat, mut outbound, _logs) = create_mock_workchat(&server.url()).await;
        seed_conversations(&workchat, vec![make_personal("c1", "me", "alice")]).await;

        workchat
            .open_conversation(&ConversationId::from("c1"))
            .await
            .unwrap();

        mock.assert_async().await;
        assert_eq!(
            outbound.try_recv().unwrap(),
            OutboundCommand::JoinConversation {
                conversation_id: ConversationId::from("c1")
            }
        );
        assert_eq!(workchat.messages().await.len(), 2);
        assert_eq!(
            workchat.active_conversation().await.map(|c| c.id),
            Some(ConversationId::from("c1"))
        );
    }

    #[tokio::test]
    async fn test_open_unknown_conversation_fails_without_fetch() {
        let mut server = Server::new_async().await;
        let mock = server
            .mock("GET", Matcher::Any)
            .expect(0)
            .create_async()
            .await;
        let (workchat, _outbound, _logs) = create_mock_workchat(&server.url()).await;

        let result = workchat.open_conversation(&ConversationId::from("nope")).await;

        assert!(matches!(result, Err(WorkchatError::ConversationNotFound(_))));
        mock.assert_async().await;
    }

    #[tokio::test]
    async fn test_failed_history_fetch_publishes_notice() {
        let mut server = Server::new_async().await;
        let _mock = server
            .mock("GET", "/chat/c1/messages")
            .match_query(Matcher::Any)
            .with_status(500)
            .create_async()
            .await;
        let (workchat, _outbound, _logs) = create_mock_workchat(&server.url()).await;
        seed_conversations(&workchat, vec![make_personal("c1", "me", "alice")]).await;
        let mut updates = workchat.subscribe();

        let result = workchat.open_conversation(&ConversationId::from("c1")).await;

        assert!(result.is_err());
        let mut saw_notice = false;
        while let Ok(update) = updates.try_recv() {
            if let ChatUpdate::Notice(notice) = update {
                assert_eq!(notice.action, "open_conversation");
                saw_notice = true;
            }
        }
        assert!(saw_notice);
    }

    #[tokio::test]
    async fn test_stale_page_after_switch_is_discarded() {
        let (workchat, _outbound, _logs) = create_mock_workchat("http://127.0.0.1:1").await;
        open_locally(
            &workchat,
            vec![make_personal("a", "me", "alice"), make_personal("b", "me", "bob")],
            "a",
        )
        .await;
        // User switches to B while A's fetch is in flight
        {
            let mut state = workchat.state.write().await;
            state.set_active(Some(ConversationId::from("b")));
        }
        assert!(
            workchat
                .install_history(
                    &ConversationId::from("b"),
                    1,
                    vec![make_message("b1", "b", "bob")]
                )
                .await
        );

        let applied = workchat
            .install_history(
                &ConversationId::from("a"),
                1,
                vec![make_message("a1", "a", "alice")],
            )
            .await;

        assert!(!applied);
        let ids: Vec<String> = workchat
            .messages()
            .await
            .iter()
            .map(|m| m.id.to_string())
            .collect();
        assert_eq!(ids, vec!["b1"]);
    }

    #[tokio::test]
    async fn test_load_older_messages_prepends() {
        let mut server = Server::new_async().await;
        let _mock = server
            .mock("GET", "/chat/c1/messages")
            .match_query(Matcher::UrlEncoded("page".into(), "2".into()))
            .with_status(200)
            .with_body(
                json!([message_json("1", "c1", "alice"), message_json("2", "c1", "me")])
                    .to_string(),
            )
            .create_async()
            .await;
        let (workchat, _outbound, _logs) = create_mock_workchat(&server.url()).await;
        open_locally(&workchat, vec![make_personal("c1", "me", "alice")], "c1").await;
        append_locally(&workchat, make_message("2", "c1", "me")).await;
        append_locally(&workchat, make_message("3", "c1", "alice")).await;

        let added = workchat.load_older_messages(2).await.unwrap();

        assert_eq!(added, 1);
        let ids: Vec<String> = workchat
            .messages()
            .await
            .iter()
            .map(|m| m.id.to_string())
            .collect();
        assert_eq!(ids, vec!["1", "2", "3"]);
    }

    #[tokio::test]
    async fn test_refresh_conversations_replaces_list() {
        let mut server = Server::new_async().await;
        let _mock = server
            .mock("GET", "/chat/conversations")
            .with_status(200)
            .with_body(
                json!([personal_json("c1", "alice"), personal_json("c2", "bob")]).to_string(),
            )
            .create_async()
            .await;
        let (workchat, _outbound, _logs) = create_mock_workchat(&server.url()).await;
        seed_conversations(&workchat, vec![make_personal("old", "me", "carol")]).await;

        let conversations = workchat.refresh_conversations().await.unwrap();

        assert_eq!(conversations.len(), 2);
        assert_eq!(workchat.conversations().await.len(), 2);
    }

    #[tokio::test]
    async fn test_start_chat_twice_keeps_one_entry() {
        let mut server = Server::new_async().await;
        let mock = server
            .mock("POST", "/chat/start")
            .match_body(Matcher::Json(json!({"receiverId": "alice"})))
            .with_status(200)
            .with_body(personal_json("c1", "alice").to_string())
            .expect(2)
            .create_async()
            .await;
        let (workchat, _outbound, _logs) = create_mock_workchat(&server.url()).await;

        let first = workchat.start_chat(&UserId::from("alice")).await.unwrap();
        let second = workchat.start_chat(&UserId::from("alice")).await.unwrap();

        mock.assert_async().await;
        assert_eq!(first.id, second.id);
        assert_eq!(workchat.conversations().await.len(), 1);
    }

    #[tokio::test]
    async fn test_start_chat_with_self_is_rejected() {
        let (workchat, _outbound, _logs) = create_mock_workchat("http://127.0.0.1:1").await;

        let result = workchat.start_chat(&UserId::from("me")).await;

        assert!(matches!(result, Err(WorkchatError::InvalidRecipient(_))));
    }
}
