use std::sync::{Arc, Weak};

use tokio::sync::mpsc::Receiver;

use crate::connection::{ConnectionState, protocol::OutboundCommand};
use crate::error::Result;
use crate::types::ProcessableEvent;
use crate::workchat::{Workchat, message_streaming::ChatUpdate};

pub mod reconciler;

impl Workchat {
    /// Start the event processing loop in a background task
    ///
    /// The loop only holds a weak reference, so dropping the last `Arc<Workchat>`
    /// closes the event channel and ends it.
    pub(crate) fn start_event_processing_loop(
        workchat: Weak<Workchat>,
        receiver: Receiver<ProcessableEvent>,
        shutdown_receiver: Receiver<()>,
    ) {
        tokio::spawn(async move {
            Self::process_events(workchat, receiver, shutdown_receiver).await;
        });
    }

    /// Shutdown event processing gracefully
    pub(crate) async fn shutdown_event_processing(&self) -> Result<()> {
        match self.shutdown_sender.send(()).await {
            Ok(_) => Ok(()),
            Err(_) => Ok(()), // Expected if processor already shut down
        }
    }

    /// Main event processing loop
    async fn process_events(
        workchat: Weak<Workchat>,
        mut receiver: Receiver<ProcessableEvent>,
        mut shutdown: Receiver<()>,
    ) {
        tracing::debug!(
            target: "workchat::event_processor::process_events",
            "Starting event processing loop"
        );

        loop {
            tokio::select! {
                Some(event) = receiver.recv() => {
                    let Some(workchat) = workchat.upgrade() else {
                        break;
                    };
                    workchat.process_event(event).await;
                }
                Some(_) = shutdown.recv() => {
                    tracing::info!(
                        target: "workchat::event_processor::process_events",
                        "Received shutdown signal, finishing current queue..."
                    );
                    while let Ok(event) = receiver.try_recv() {
                        let Some(workchat) = workchat.upgrade() else {
                            break;
                        };
                        workchat.process_event(event).await;
                    }
                    tracing::debug!(
                        target: "workchat::event_processor::process_events",
                        "Queue flushed, shutting down event processor"
                    );
                    break;
                }
                else => {
                    tracing::debug!(
                        target: "workchat::event_processor::process_events",
                        "All channels closed, exiting event processing loop"
                    );
                    break;
                }
            }
        }
    }

    async fn process_event(self: &Arc<Self>, event: ProcessableEvent) {
        match event {
            ProcessableEvent::Inbound(event) => {
                let event_name = event.event_name();
                let mut state = self.state.write().await;
                let updates = reconciler::reconcile(&mut state, event);
                tracing::debug!(
                    target: "workchat::event_processor::process_event",
                    "{} produced {} updates",
                    event_name,
                    updates.len()
                );
                self.streams.publish_all(updates);
            }
            ProcessableEvent::ConnectionState(connection_state) => {
                tracing::info!(
                    target: "workchat::event_processor::process_event",
                    "Connection is now {:?}",
                    connection_state
                );
                self.streams
                    .publish(ChatUpdate::ConnectionChanged(connection_state));

                // Room membership is per socket. The connection manager may still be
                // holding its session lock while this event is queued, so the emit
                // runs on its own task.
                if connection_state == ConnectionState::Connected {
                    let workchat = Arc::clone(self);
                    tokio::spawn(async move {
                        workchat.rejoin_active_conversation().await;
                    });
                }
            }
        }
    }

    async fn rejoin_active_conversation(&self) {
        let active = self.state.read().await.conversations.active_id().cloned();
        let Some(conversation_id) = active else {
            return;
        };

        if let Err(e) = self
            .emit(OutboundCommand::JoinConversation {
                conversation_id: conversation_id.clone(),
            })
            .await
        {
            tracing::warn!(
                target: "workchat::event_processor::rejoin_active_conversation",
                "Failed to rejoin {}: {}",
                conversation_id,
                e
            );
        }
    }
}
