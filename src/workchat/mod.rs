use std::sync::Arc;

use anyhow::Context;
use dashmap::DashSet;
use tokio::sync::{
    RwLock, broadcast,
    mpsc::{self, Sender},
    watch,
};

pub mod chat_list;
pub mod config;
pub mod conversations;
pub mod dispatcher;
mod event_processor;
pub mod ids;
pub mod message_streaming;
pub mod messages;
pub mod presence;
pub mod state;
pub mod users;

use crate::api::ApiClient;
use crate::connection::{ConnectionManager, ConnectionState};
use crate::error::{Result, WorkchatError};
use crate::init_tracing;
use crate::types::ProcessableEvent;
use config::{Session, WorkchatConfig};
use conversations::Conversation;
use dispatcher::location::LocationProvider;
use ids::{ConversationId, UserId};
use message_streaming::{ChatUpdate, ConversationSubscription, UpdateStreamManager};
use messages::Message;
use state::ChatState;
use users::User;

/// The chat client: one socket, one REST client and the in-memory stores they feed.
///
/// Built with [`Workchat::new`] and shared as `Arc<Workchat>`. Several instances
/// may coexist (one per signed-in session, or one per test).
pub struct Workchat {
    pub config: WorkchatConfig,
    session: Session,
    api: ApiClient,
    connection: ConnectionManager,
    state: RwLock<ChatState>,
    streams: UpdateStreamManager,
    location: Option<Arc<dyn LocationProvider>>,
    /// Fingerprints of uploads and group mutations that have not finished yet
    in_flight: DashSet<String>,
    event_sender: Sender<ProcessableEvent>,
    shutdown_sender: Sender<()>,
}

impl std::fmt::Debug for Workchat {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Workchat")
            .field("config", &self.config)
            .field("session", &self.session)
            .field("api", &"<REDACTED>")
            .field("connection", &self.connection.state())
            .field("location", &self.location.is_some())
            .finish()
    }
}

impl Workchat {
    /// Sets up logging, the REST client and the socket manager, and starts the
    /// event processing loop. Does not connect; call [`Workchat::connect`].
    pub async fn new(config: WorkchatConfig, session: Session) -> Result<Arc<Self>> {
        Self::build(config, session, None).await
    }

    /// Same as [`Workchat::new`], with a device position source for location messages.
    pub async fn with_location_provider(
        config: WorkchatConfig,
        session: Session,
        provider: Arc<dyn LocationProvider>,
    ) -> Result<Arc<Self>> {
        Self::build(config, session, Some(provider)).await
    }

    async fn build(
        config: WorkchatConfig,
        session: Session,
        location: Option<Arc<dyn LocationProvider>>,
    ) -> Result<Arc<Self>> {
        let logs_dir = &config.logs_dir;
        std::fs::create_dir_all(logs_dir)
            .with_context(|| format!("Failed to create logs directory: {:?}", logs_dir))
            .map_err(WorkchatError::from)?;

        init_tracing(logs_dir)?;

        tracing::debug!(
            target: "workchat::new",
            "Logging initialized in directory: {:?}",
            logs_dir
        );

        // Create event processing channels
        let (event_sender, event_receiver) = mpsc::channel(config.event_channel_capacity);
        let (shutdown_sender, shutdown_receiver) = mpsc::channel(1);

        let api = ApiClient::new(&config.api_base_url, &session.token, config.request_timeout)?;
        let connection = ConnectionManager::new(
            config.socket_url.clone(),
            config.reconnect.clone(),
            event_sender.clone(),
        );

        let workchat = Arc::new(Self {
            state: RwLock::new(ChatState::new(session.user_id.clone())),
            config,
            session,
            api,
            connection,
            streams: UpdateStreamManager::new(),
            location,
            in_flight: DashSet::new(),
            event_sender,
            shutdown_sender,
        });

        Self::start_event_processing_loop(
            Arc::downgrade(&workchat),
            event_receiver,
            shutdown_receiver,
        );

        tracing::info!(
            target: "workchat::new",
            "Chat client ready for user {}",
            workchat.session.user_id
        );
        Ok(workchat)
    }

    /// Opens the socket. Failures are logged and reported through the connection
    /// state; the socket task retries on its own.
    pub async fn connect(&self) {
        if let Err(e) = self.connection.connect(&self.session.token).await {
            tracing::error!(
                target: "workchat::connect",
                "Failed to connect to {}: {}",
                self.config.socket_url,
                e
            );
        }
    }

    pub async fn disconnect(&self) {
        self.connection.disconnect().await;
    }

    /// Closes the socket and stops event processing after the queued events.
    pub async fn shutdown(&self) -> Result<()> {
        self.disconnect().await;
        self.shutdown_event_processing().await
    }

    pub fn connection_state(&self) -> ConnectionState {
        self.connection.state()
    }

    pub fn watch_connection(&self) -> watch::Receiver<ConnectionState> {
        self.connection.watch_state()
    }

    /// Sidebar, presence, connection and notice updates.
    pub fn subscribe(&self) -> broadcast::Receiver<ChatUpdate> {
        self.streams.subscribe()
    }

    /// Live updates for one conversation's message log.
    ///
    /// `initial_messages` is the current log if the conversation is open, otherwise
    /// empty. Both are taken under the same lock, so no update falls in between.
    pub async fn subscribe_to_conversation(
        &self,
        conversation_id: &ConversationId,
    ) -> ConversationSubscription {
        let state = self.state.read().await;
        let updates = self.streams.subscribe_conversation(conversation_id);
        let initial_messages = if state.messages.conversation_id() == Some(conversation_id) {
            state.messages.messages().to_vec()
        } else {
            Vec::new()
        };
        ConversationSubscription {
            initial_messages,
            updates,
        }
    }

    /// The open conversation's message log, in arrival order.
    pub async fn messages(&self) -> Vec<Message> {
        self.state.read().await.messages.messages().to_vec()
    }

    pub async fn conversations(&self) -> Vec<Conversation> {
        self.state.read().await.conversations.list().to_vec()
    }

    pub async fn active_conversation(&self) -> Option<Conversation> {
        self.state.read().await.conversations.active().cloned()
    }

    /// Users currently typing in the open conversation, excluding the current user.
    pub async fn typing_users(&self) -> Vec<UserId> {
        let state = self.state.read().await;
        match state.conversations.active_id() {
            Some(active) => state.presence.typing_in(active, &state.current_user),
            None => Vec::new(),
        }
    }

    pub async fn is_online(&self, user_id: &UserId) -> bool {
        self.state.read().await.presence.is_online(user_id)
    }

    pub async fn users(&self) -> Vec<User> {
        self.state.read().await.users.all().to_vec()
    }

    pub fn current_user(&self) -> &UserId {
        &self.session.user_id
    }

    /// Largest attachment [`Workchat::send_attachment`] accepts, in bytes.
    pub fn max_upload_bytes(&self) -> u64 {
        self.config.max_upload_bytes
    }
}


#[cfg(test)]
mod tests {
    use super::test_utils::*;
    use super::*;
    use crate::workchat::conversations::test_fixtures::make_personal;
    use crate::workchat::messages::test_fixtures::make_message;

    #[tokio::test]
    async fn test_new_creates_logs_dir_and_starts_disconnected() {
        let (config, _logs_temp) = create_test_config("http://127.0.0.1:1");
        let logs_dir = config.logs_dir.clone();

        let workchat = Workchat::new(config, Session::new("u1", "secret-token"))
            .await
            .unwrap();

        assert!(logs_dir.exists());
        assert_eq!(workchat.connection_state(), ConnectionState::Disconnected);
        assert_eq!(workchat.current_user(), &UserId::from("u1"));
        assert!(workchat.conversations().await.is_empty());
    }

    #[tokio::test]
    async fn test_debug_output_redacts_token() {
        let (config, _logs_temp) = create_test_config("http://127.0.0.1:1");
        let workchat = Workchat::new(config, Session::new("u1", "secret-token"))
            .await
            .unwrap();

        let debug = format!("{:?}", workchat);

        assert!(!debug.contains("secret-token"));
        assert!(debug.contains("u1"));
    }

    #[tokio::test]
    async fn test_instances_are_independent() {
        let (first, _first_out, _first_logs) = create_mock_workchat("http://127.0.0.1:1").await;
        let (second, _second_out, _second_logs) = create_mock_workchat("http://127.0.0.1:1").await;

        open_locally(&first, vec![make_personal("c1", "me", "alice")], "c1").await;

        assert!(first.active_conversation().await.is_some());
        assert!(second.active_conversation().await.is_none());
    }

    #[tokio::test]
    async fn test_subscription_snapshot_only_for_open_conversation() {
        let (workchat, _outbound, _logs) = create_mock_workchat("http://127.0.0.1:1").await;
        open_locally(
            &workchat,
            vec![make_personal("c1", "me", "alice"), make_personal("c2", "me", "bob")],
            "c1",
        )
        .await;
        append_locally(&workchat, make_message("1", "c1", "alice")).await;

        let open = workchat
            .subscribe_to_conversation(&ConversationId::from("c1"))
            .await;
        let other = workchat
            .subscribe_to_conversation(&ConversationId::from("c2"))
            .await;

        assert_eq!(open.initial_messages.len(), 1);
        assert!(other.initial_messages.is_empty());
    }

    #[tokio::test]
    async fn test_typing_users_scoped_to_open_conversation() {
        let (workchat, _outbound, _logs) = create_mock_workchat("http://127.0.0.1:1").await;
        open_locally(&workchat, vec![make_personal("c1", "me", "alice")], "c1").await;
        {
            let mut state = workchat.state.write().await;
            state.presence.set_typing(
                UserId::from("alice"),
                Some(ConversationId::from("c1")),
                true,
            );
            state.presence.set_typing(
                UserId::from("bob"),
                Some(ConversationId::from("c9")),
                true,
            );
        }

        assert_eq!(workchat.typing_users().await, vec![UserId::from("alice")]);
    }

    #[tokio::test]
    async fn test_shutdown_is_repeatable() {
        let (workchat, _outbound, _logs) = create_mock_workchat("http://127.0.0.1:1").await;

        workchat.shutdown().await.unwrap();
        workchat.shutdown().await.unwrap();

        assert_eq!(workchat.connection_state(), ConnectionState::Disconnected);
    }
}
