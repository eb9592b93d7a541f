use thiserror::Error;

use crate::api::ApiError;
use crate::connection::ConnectionError;
use crate::workchat::dispatcher::location::LocationError;
use crate::workchat::ids::{ConversationId, MessageId, UserId};

pub type Result<T> = core::result::Result<T, WorkchatError>;

/// How a failure should be presented to the user.
#[derive(Debug, Clone, Copy, PartialEq, Eq, serde::Serialize, serde::Deserialize)]
pub enum ErrorCategory {
    /// Network or socket failure. Never fatal, never retried by the application.
    Transport,
    /// The current user may not perform the action.
    Permission,
    /// Rejected locally before anything was sent.
    Validation,
    /// Local setup problems (configuration, logging, filesystem).
    Internal,
}

#[derive(Error, Debug)]
pub enum WorkchatError {
    #[error("Filesystem error: {0}")]
    Filesystem(#[from] std::io::Error),

    #[error("Logging setup error: {0}")]
    LoggingSetup(String),

    #[error("Configuration error: {0}")]
    Configuration(String),

    #[error("API error: {0}")]
    Api(#[from] ApiError),

    #[error("Connection error: {0}")]
    Connection(#[from] ConnectionError),

    #[error("Location error: {0}")]
    Location(#[from] LocationError),

    #[error("Message content is empty")]
    EmptyMessage,

    #[error("Attachment is {size} bytes, the limit is {max} bytes")]
    AttachmentTooLarge { size: u64, max: u64 },

    #[error("No conversation is open")]
    NoActiveConversation,

    #[error("Conversation not found: {0}")]
    ConversationNotFound(ConversationId),

    #[error("Message not found: {0}")]
    MessageNotFound(MessageId),

    #[error("Only the sender can change message {0}")]
    NotMessageSender(MessageId),

    #[error("Cannot start a chat with {0}")]
    InvalidRecipient(UserId),

    #[error("Invalid group request: {0}")]
    InvalidGroup(String),

    #[error("An identical request is already in progress: {0}")]
    DuplicateRequest(String),

    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    #[error("Other error: {0}")]
    Other(#[from] anyhow::Error),
}

impl WorkchatError {
    pub fn category(&self) -> ErrorCategory {
        match self {
            WorkchatError::Api(e) if e.is_forbidden() => ErrorCategory::Permission,
            WorkchatError::Api(_) | WorkchatError::Connection(_) => ErrorCategory::Transport,
            WorkchatError::Location(LocationError::PermissionDenied) => ErrorCategory::Permission,
            WorkchatError::Location(LocationError::Unsupported) => ErrorCategory::Validation,
            WorkchatError::Location(_) => ErrorCategory::Transport,
            WorkchatError::NotMessageSender(_) => ErrorCategory::Permission,
            WorkchatError::EmptyMessage
            | WorkchatError::AttachmentTooLarge { .. }
            | WorkchatError::NoActiveConversation
            | WorkchatError::ConversationNotFound(_)
            | WorkchatError::MessageNotFound(_)
            | WorkchatError::InvalidRecipient(_)
            | WorkchatError::InvalidGroup(_)
            | WorkchatError::DuplicateRequest(_) => ErrorCategory::Validation,
            WorkchatError::Filesystem(_)
            | WorkchatError::LoggingSetup(_)
            | WorkchatError::Configuration(_)
            | WorkchatError::Serialization(_)
            | WorkchatError::Other(_) => ErrorCategory::Internal,
        }
    }
}

impl From<Box<dyn std::error::Error + Send + Sync>> for WorkchatError {
    fn from(err: Box<dyn std::error::Error + Send + Sync>) -> Self {
        WorkchatError::Other(anyhow::anyhow!(err.to_string()))
    }
}
