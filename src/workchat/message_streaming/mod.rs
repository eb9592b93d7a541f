//! Update streaming.
//!
//! Pushes store changes to subscribers as inbound events are reconciled, so
//! a UI never has to poll. Each open conversation gets its own broadcast
//! channel; sidebar, presence, connection and notice updates go out on one
//! global channel.

mod manager;
mod types;

pub use manager::UpdateStreamManager;
pub use types::{
    ChatUpdate, ConversationSubscription, ConversationUpdate, MessageUpdate, Notice,
    UpdateTrigger,
};
