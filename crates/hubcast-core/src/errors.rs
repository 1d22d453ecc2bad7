//! Error hierarchy for hub operations.
//!
//! Every variant is local to a single connection: the hub never propagates
//! one connection's failure to another.

use crate::ids::ConnectionId;

/// Errors raised by transports, queues and the membership registry.
#[derive(Clone, Debug, PartialEq, Eq, thiserror::Error)]
pub enum HubError {
    // Transport faults, recovered by tearing down the connection
    /// Reading from the peer failed (network fault or protocol violation).
    #[error("transport receive failed: {0}")]
    TransportReceive(String),
    /// Writing to the peer failed.
    #[error("transport send failed: {0}")]
    TransportSend(String),
    /// The transport was already closed.
    #[error("transport closed")]
    TransportClosed,

    // Queue outcomes
    /// The outbound queue was full and the configured policy rejected the payload.
    #[error("outbound queue for {connection} is full (capacity {capacity})")]
    QueueOverflow {
        /// Connection whose queue overflowed.
        connection: ConnectionId,
        /// Configured queue capacity.
        capacity: usize,
    },
    /// The outbound queue has been released; the connection is gone.
    #[error("outbound queue for {0} is closed")]
    QueueClosed(ConnectionId),

    // Contract violations
    /// A live connection id was registered twice.
    #[error("connection {0} is already registered")]
    RegistrationInconsistency(ConnectionId),
    /// The hub is shutting down and accepts no new members.
    #[error("hub is shutting down")]
    ShuttingDown,
}

impl HubError {
    /// Whether the error ends the affected connection.
    pub fn is_fatal_to_connection(&self) -> bool {
        matches!(
            self,
            Self::TransportReceive(_)
                | Self::TransportSend(_)
                | Self::TransportClosed
                | Self::QueueClosed(_)
                | Self::ShuttingDown
        )
    }

    /// Short classification string for logging/metrics.
    pub fn error_kind(&self) -> &'static str {
        match self {
            Self::TransportReceive(_) => "transport_receive",
            Self::TransportSend(_) => "transport_send",
            Self::TransportClosed => "transport_closed",
            Self::QueueOverflow { .. } => "queue_overflow",
            Self::QueueClosed(_) => "queue_closed",
            Self::RegistrationInconsistency(_) => "registration_inconsistency",
            Self::ShuttingDown => "shutting_down",
        }
    }
}

/// Result alias for hub operations.
pub type Result<T> = std::result::Result<T, HubError>;
