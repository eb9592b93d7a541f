use crate::connection::ConnectionState;
use crate::connection::protocol::InboundEvent;

/// Events that can be processed by the Workchat event processing loop
#[derive(Debug, Clone)]
pub enum ProcessableEvent {
    /// A decoded push event from the chat socket
    Inbound(InboundEvent),
    /// The socket changed state (connected, dropped, retrying)
    ConnectionState(ConnectionState),
}

impl From<InboundEvent> for ProcessableEvent {
    fn from(event: InboundEvent) -> Self {
        Self::Inbound(event)
    }
}
