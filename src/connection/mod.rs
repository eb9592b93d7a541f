//! The single chat socket.
//!
//! Owns connection lifecycle and transport-level reconnection. Decoded frames
//! and state changes are forwarded on the event channel handed in at
//! construction; nothing in here knows about conversations or messages.

use std::sync::Arc;
use std::time::Duration;

use futures::{SinkExt, StreamExt};
use serde::{Deserialize, Serialize};
use thiserror::Error;
use tokio::io::{AsyncRead, AsyncWrite};
use tokio::sync::{Mutex, mpsc, watch};
use tokio::task::JoinHandle;
use tokio_tungstenite::tungstenite::{
    self, Message,
    client::IntoClientRequest,
    handshake::client::Request,
    http::{HeaderValue, header::AUTHORIZATION},
};
use tokio_tungstenite::{WebSocketStream, connect_async};

pub mod protocol;

use crate::types::ProcessableEvent;
use crate::workchat::config::ReconnectPolicy;
use protocol::{InboundEvent, OutboundCommand};

const DISCONNECT_TIMEOUT: Duration = Duration::from_secs(1);

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum ConnectionState {
    Disconnected,
    /// Handshaking, or waiting out a reconnect delay.
    Connecting,
    Connected,
}

#[derive(Error, Debug)]
pub enum ConnectionError {
    #[error("Socket is not connected")]
    NotConnected,

    #[error("Invalid socket URL {url}: {reason}")]
    InvalidUrl { url: String, reason: String },

    #[error("Auth token cannot be sent as a header")]
    InvalidToken,

    #[error("WebSocket error: {0}")]
    WebSocket(#[from] tungstenite::Error),
}

struct SocketSession {
    outbound: mpsc::UnboundedSender<OutboundCommand>,
    task: JoinHandle<()>,
}

pub struct ConnectionManager {
    url: String,
    policy: ReconnectPolicy,
    event_sender: mpsc::Sender<ProcessableEvent>,
    state: Arc<watch::Sender<ConnectionState>>,
    session: Mutex<Option<SocketSession>>,
}

impl ConnectionManager {
    pub fn new(
        url: impl Into<String>,
        policy: ReconnectPolicy,
        event_sender: mpsc::Sender<ProcessableEvent>,
    ) -> Self {
        let (state, _) = watch::channel(ConnectionState::Disconnected);
        Self {
            url: url.into(),
            policy,
            event_sender,
            state: Arc::new(state),
            session: Mutex::new(None),
        }
    }

    pub fn state(&self) -> ConnectionState {
        *self.state.borrow()
    }

    pub fn watch_state(&self) -> watch::Receiver<ConnectionState> {
        self.state.subscribe()
    }

    /// Opens the socket in a background task. A no-op while a session is running.
    ///
    /// Only a malformed URL or token is reported here. Handshake and network
    /// failures are logged and retried by the socket task per the reconnect policy.
    pub async fn connect(&self, token: &str) -> Result<(), ConnectionError> {
        let mut session = self.session.lock().await;
        if session.as_ref().is_some_and(|s| !s.task.is_finished()) {
            tracing::debug!(
                target: "workchat::connection::connect",
                "Socket session already running, ignoring connect"
            );
            return Ok(());
        }

        // Validate once up front so that the task never fails on its own input.
        build_request(&self.url, token)?;

        let (outbound, outbound_receiver) = mpsc::unbounded_channel();
        publish_state(&self.state, &self.event_sender, ConnectionState::Connecting).await;

        let task = tokio::spawn(run_socket(
            self.url.clone(),
            token.to_string(),
            self.policy.clone(),
            outbound_receiver,
            self.event_sender.clone(),
            self.state.clone(),
        ));
        *session = Some(SocketSession { outbound, task });

        tracing::info!(
            target: "workchat::connection::connect",
            "Connecting to {}",
            self.url
        );
        Ok(())
    }

    /// Closes the socket. Safe to call when already disconnected.
    pub async fn disconnect(&self) {
        let session = self.session.lock().await.take();
        if let Some(SocketSession { outbound, mut task }) = session {
            // Closing the outbound channel tells the socket task to send a close frame and exit.
            drop(outbound);
            if tokio::time::timeout(DISCONNECT_TIMEOUT, &mut task)
                .await
                .is_err()
            {
                tracing::warn!(
                    target: "workchat::connection::disconnect",
                    "Socket task did not stop in time, aborting it"
                );
                task.abort();
            }
        }
        publish_state(
            &self.state,
            &self.event_sender,
            ConnectionState::Disconnected,
        )
        .await;
    }

    /// Queues one command on the socket.
    pub async fn emit(&self, command: OutboundCommand) -> Result<(), ConnectionError> {
        if self.state() != ConnectionState::Connected {
            return Err(ConnectionError::NotConnected);
        }
        let session = self.session.lock().await;
        let session = session.as_ref().ok_or(ConnectionError::NotConnected)?;

        tracing::debug!(
            target: "workchat::connection::emit",
            "Emitting {}",
            command.event_name()
        );
        session
            .outbound
            .send(command)
            .map_err(|_| ConnectionError::NotConnected)
    }

    /// Installs a fake session whose outbound commands land on the returned receiver.
    #[cfg(test)]
    pub(crate) async fn attach_test_session(&self) -> mpsc::UnboundedReceiver<OutboundCommand> {
        let (outbound, receiver) = mpsc::unbounded_channel();
        let task = tokio::spawn(std::future::pending::<()>());
        *self.session.lock().await = Some(SocketSession { outbound, task });
        self.state.send_replace(ConnectionState::Connected);
        receiver
    }
}

fn build_request(url: &str, token: &str) -> Result<Request, ConnectionError> {
    let mut request =
        url.into_client_request()
            .map_err(|e| ConnectionError::InvalidUrl {
                url: url.to_string(),
                reason: e.to_string(),
            })?;
    let header = HeaderValue::from_str(&format!("Bearer {}", token))
        .map_err(|_| ConnectionError::InvalidToken)?;
    request.headers_mut().insert(AUTHORIZATION, header);
    Ok(request)
}

async fn publish_state(
    state: &watch::Sender<ConnectionState>,
    events: &mpsc::Sender<ProcessableEvent>,
    next: ConnectionState,
) {
    let previous = state.send_replace(next);
    if previous == next {
        return;
    }
    tracing::debug!(
        target: "workchat::connection::publish_state",
        "Connection state {:?} -> {:?}",
        previous,
        next
    );
    // The processing loop is gone during shutdown; nobody is left to tell.
    let _ = events.send(ProcessableEvent::ConnectionState(next)).await;
}

enum PumpExit {
    /// The local side asked to disconnect.
    Closed,
    /// The server or the network ended the connection.
    Dropped,
}

async fn run_socket(
    url: String,
    token: String,
    policy: ReconnectPolicy,
    mut outbound: mpsc::UnboundedReceiver<OutboundCommand>,
    events: mpsc::Sender<ProcessableEvent>,
    state: Arc<watch::Sender<ConnectionState>>,
) {
    let mut attempt: u32 = 0;

    'session: loop {
        publish_state(&state, &events, ConnectionState::Connecting).await;

        let request = match build_request(&url, &token) {
            Ok(request) => request,
            Err(e) => {
                tracing::error!(
                    target: "workchat::connection::run_socket",
                    "Cannot build socket request: {}",
                    e
                );
                break;
            }
        };

        match connect_async(request).await {
            Ok((stream, _response)) => {
                attempt = 0;
                publish_state(&state, &events, ConnectionState::Connected).await;
                tracing::info!(
                    target: "workchat::connection::run_socket",
                    "Socket connected"
                );
                match pump(stream, &mut outbound, &events).await {
                    PumpExit::Closed => break,
                    PumpExit::Dropped => {
                        tracing::warn!(
                            target: "workchat::connection::run_socket",
                            "Socket connection dropped"
                        );
                    }
                }
            }
            Err(e) => {
                tracing::warn!(
                    target: "workchat::connection::run_socket",
                    "Socket handshake failed: {}",
                    e
                );
            }
        }

        if attempt >= policy.max_attempts {
            tracing::warn!(
                target: "workchat::connection::run_socket",
                "Giving up after {} reconnect attempts",
                attempt
            );
            break;
        }

        let delay = policy.delay_for(attempt);
        attempt += 1;
        publish_state(&state, &events, ConnectionState::Connecting).await;
        tracing::debug!(
            target: "workchat::connection::run_socket",
            "Reconnecting in {:?} (attempt {}/{})",
            delay,
            attempt,
            policy.max_attempts
        );

        let sleep = tokio::time::sleep(delay);
        tokio::pin!(sleep);
        loop {
            tokio::select! {
                _ = &mut sleep => break,
                command = outbound.recv() => match command {
                    Some(command) => {
                        tracing::debug!(
                            target: "workchat::connection::run_socket",
                            "Dropping {} emitted while reconnecting",
                            command.event_name()
                        );
                    }
                    None => break 'session,
                },
            }
        }
    }

    publish_state(&state, &events, ConnectionState::Disconnected).await;
}

async fn pump<S>(
    stream: WebSocketStream<S>,
    outbound: &mut mpsc::UnboundedReceiver<OutboundCommand>,
    events: &mpsc::Sender<ProcessableEvent>,
) -> PumpExit
where
    S: AsyncRead + AsyncWrite + Unpin,
{
    let (mut write, mut read) = stream.split();

    loop {
        tokio::select! {
            command = outbound.recv() => match command {
                Some(command) => {
                    let frame = match command.to_frame() {
                        Ok(frame) => frame,
                        Err(e) => {
                            tracing::error!(
                                target: "workchat::connection::pump",
                                "Failed to encode {}: {}",
                                command.event_name(),
                                e
                            );
                            continue;
                        }
                    };
                    if let Err(e) = write.send(Message::Text(frame)).await {
                        tracing::warn!(
                            target: "workchat::connection::pump",
                            "Failed to send frame: {}",
                            e
                        );
                        return PumpExit::Dropped;
                    }
                }
                None => {
                    let _ = write.send(Message::Close(None)).await;
                    return PumpExit::Closed;
                }
            },
            frame = read.next() => match frame {
                Some(Ok(Message::Text(text))) => {
                    if !forward_frame(&text, events).await {
                        return PumpExit::Closed;
                    }
                }
                Some(Ok(Message::Close(_))) | None => return PumpExit::Dropped,
                // Pings are answered by tungstenite itself. Binary frames are not part
                // of the protocol.
                Some(Ok(_)) => {}
                Some(Err(e)) => {
                    tracing::warn!(
                        target: "workchat::connection::pump",
                        "Socket read error: {}",
                        e
                    );
                    return PumpExit::Dropped;
                }
            },
        }
    }
}

/// Returns `false` once the event channel is closed.
async fn forward_frame(text: &str, events: &mpsc::Sender<ProcessableEvent>) -> bool {
    match InboundEvent::from_frame(text) {
        Ok(event) => {
            tracing::debug!(
                target: "workchat::connection::forward_frame",
                "Received {}",
                event.event_name()
            );
            events.send(ProcessableEvent::Inbound(event)).await.is_ok()
        }
        Err(e) => {
            tracing::warn!(
                target: "workchat::connection::forward_frame",
                "Skipping undecodable frame: {}",
                e
            );
            true
        }
    }
}
