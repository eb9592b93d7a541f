//! User intents.
//!
//! Message operations go out over the socket and are never echoed locally:
//! a sent, edited or deleted message changes the store only once the server
//! pushes the corresponding event back. Administrative operations are REST
//! calls whose returned conversation replaces the local copy.
//!
//! Every failure is published as a [`Notice`] and also returned to the caller.
//! Uploads and group mutations run at most once per fingerprint at a time.

use dashmap::DashSet;

use crate::connection::protocol::OutboundCommand;
use crate::error::{Result, WorkchatError};
use crate::workchat::{
    Workchat,
    ids::ConversationId,
    message_streaming::{ChatUpdate, Notice},
};

pub mod attachments;
pub mod groups;
pub mod location;
mod messaging;
mod navigation;

/// Marks a fingerprinted command as running until dropped.
pub(crate) struct InFlight<'a> {
    registry: &'a DashSet<String>,
    fingerprint: String,
}

impl Drop for InFlight<'_> {
    fn drop(&mut self) {
        self.registry.remove(&self.fingerprint);
    }
}

impl Workchat {
    /// Claims `fingerprint`, failing if an identical command has not finished yet.
    pub(crate) fn begin_in_flight(&self, fingerprint: String) -> Result<InFlight<'_>> {
        if !self.in_flight.insert(fingerprint.clone()) {
            return Err(WorkchatError::DuplicateRequest(fingerprint));
        }
        Ok(InFlight {
            registry: &self.in_flight,
            fingerprint,
        })
    }

    /// Publishes a notice for a failed command and hands the result back unchanged.
    pub(crate) fn surface<T>(&self, action: &str, result: Result<T>) -> Result<T> {
        if let Err(e) = &result {
            tracing::warn!(
                target: "workchat::dispatcher::surface",
                "{} failed: {}",
                action,
                e
            );
            self.streams
                .publish(ChatUpdate::Notice(Notice::from_error(action, e)));
        }
        result
    }

    pub(crate) async fn emit(&self, command: OutboundCommand) -> Result<()> {
        self.connection
            .emit(command)
            .await
            .map_err(WorkchatError::from)
    }

    pub(crate) async fn require_active_conversation(&self) -> Result<ConversationId> {
        self.state
            .read()
            .await
            .conversations
            .active_id()
            .cloned()
            .ok_or(WorkchatError::NoActiveConversation)
    }
}
