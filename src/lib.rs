use std::path::Path;
use std::sync::{Mutex, OnceLock};

use tracing_appender::non_blocking::WorkerGuard;
use tracing_subscriber::{filter::EnvFilter, fmt::Layer, prelude::*, registry::Registry};

pub mod api;
pub mod connection;
mod error;
mod types;
pub mod workchat;

pub use crate::connection::protocol::{InboundEvent, OutboundCommand};
pub use crate::connection::{ConnectionManager, ConnectionState};
pub use crate::error::{ErrorCategory, Result, WorkchatError};
pub use crate::types::ProcessableEvent;
pub use crate::workchat::{
    Workchat,
    chat_list::{ChatListItem, ConversationSummary},
    config::{ReconnectPolicy, Session, WorkchatConfig},
    conversations::{Conversation, ConversationKind, MessagePreview},
    dispatcher::{
        attachments::Attachment,
        location::{GeoPosition, LocationError, LocationProvider},
    },
    ids::{ConversationId, MessageId, UserId},
    message_streaming::{
        ChatUpdate, ConversationSubscription, ConversationUpdate, MessageUpdate, Notice,
        UpdateTrigger,
    },
    messages::{DELETED_MESSAGE_MARKER, Message, MessageKind},
    users::User,
};

static TRACING_GUARDS: OnceLock<Mutex<Option<(WorkerGuard, WorkerGuard)>>> = OnceLock::new();

/// Installs the global tracing subscriber: a non-blocking stdout layer plus a daily rolling
/// file in `logs_dir`. Only the first call has any effect.
pub fn init_tracing(logs_dir: &Path) -> Result<()> {
    if TRACING_GUARDS.get().is_some() {
        return Ok(());
    }

    let file_appender = tracing_appender::rolling::RollingFileAppender::builder()
        .rotation(tracing_appender::rolling::Rotation::DAILY)
        .filename_prefix("workchat")
        .filename_suffix("log")
        .build(logs_dir)
        .map_err(|e| WorkchatError::LoggingSetup(e.to_string()))?;

    let (non_blocking_file, file_guard) = tracing_appender::non_blocking(file_appender);
    let (non_blocking_stdout, stdout_guard) = tracing_appender::non_blocking(std::io::stdout());

    if TRACING_GUARDS
        .set(Mutex::new(Some((file_guard, stdout_guard))))
        .is_err()
    {
        // Another caller finished first; its subscriber stays in place.
        return Ok(());
    }

    let stdout_layer = Layer::new()
        .with_writer(non_blocking_stdout)
        .with_ansi(true)
        .with_target(true);

    let file_layer = Layer::new()
        .with_writer(non_blocking_file)
        .with_ansi(false)
        .with_target(true);

    if let Err(e) = Registry::default()
        .with(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")))
        .with(stdout_layer)
        .with(file_layer)
        .try_init()
    {
        // A subscriber installed by the host application wins.
        tracing::debug!(target: "workchat::init_tracing", "Tracing already initialized: {}", e);
    }

    Ok(())
}
