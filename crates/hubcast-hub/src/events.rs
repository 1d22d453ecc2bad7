//! Diagnostic events emitted by the hub.
//!
//! Every event is also logged and counted; subscribers get the typed form
//! through [`BroadcastHub::subscribe`](crate::BroadcastHub::subscribe).

use hubcast_core::ConnectionId;
use serde::Serialize;

/// Why a connection was torn down.
#[derive(Clone, Debug, PartialEq, Eq, Serialize)]
#[serde(tag = "kind", content = "detail", rename_all = "snake_case")]
pub enum CloseReason {
    /// The peer closed the channel cleanly.
    ClientClosed,
    /// Reading from the transport failed.
    ReceiveError(String),
    /// Writing to the transport failed.
    SendError(String),
    /// The outbound queue overflowed under the reject-newest policy.
    SlowConsumer,
    /// No liveness signal within the heartbeat timeout.
    HeartbeatTimeout,
    /// Disconnected on request.
    Kicked,
    /// The hub is shutting down.
    Shutdown,
}

impl CloseReason {
    /// Stable label for logs and metrics.
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::ClientClosed => "client_closed",
            Self::ReceiveError(_) => "receive_error",
            Self::SendError(_) => "send_error",
            Self::SlowConsumer => "slow_consumer",
            Self::HeartbeatTimeout => "heartbeat_timeout",
            Self::Kicked => "kicked",
            Self::Shutdown => "shutdown",
        }
    }
}

impl std::fmt::Display for CloseReason {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::ReceiveError(msg) | Self::SendError(msg) => {
                write!(f, "{}: {msg}", self.as_str())
            }
            _ => f.write_str(self.as_str()),
        }
    }
}

/// Why a payload did not reach a connection.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum DropReason {
    /// The oldest queued payload was evicted to make room.
    QueueFullDroppedOldest,
    /// The new payload was refused by a full queue.
    QueueFullRejected,
}

impl DropReason {
    /// Stable label for logs and metrics.
    pub fn as_str(self) -> &'static str {
        match self {
            Self::QueueFullDroppedOldest => "dropped_oldest",
            Self::QueueFullRejected => "rejected",
        }
    }
}

/// Something observable happened in the hub.
#[derive(Clone, Debug, PartialEq, Eq, Serialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum HubEvent {
    /// A connection was registered.
    ConnectionOpened {
        /// The new connection.
        id: ConnectionId,
        /// Remote endpoint, if the transport knows it.
        remote: Option<String>,
        /// RFC 3339 timestamp.
        timestamp: String,
    },
    /// A connection was torn down.
    ConnectionClosed {
        /// The departed connection.
        id: ConnectionId,
        /// Why it left.
        reason: CloseReason,
        /// RFC 3339 timestamp.
        timestamp: String,
    },
    /// One inbound payload was fanned out.
    MessageBroadcast {
        /// Originating connection.
        sender: ConnectionId,
        /// Queues the payload was accepted into.
        recipients: usize,
        /// RFC 3339 timestamp.
        timestamp: String,
    },
    /// A payload was lost for one connection.
    MessageDropped {
        /// Affected connection.
        connection: ConnectionId,
        /// How it was lost.
        reason: DropReason,
        /// RFC 3339 timestamp.
        timestamp: String,
    },
}

impl HubEvent {
    pub(crate) fn opened(id: ConnectionId, remote: Option<String>) -> Self {
        Self::ConnectionOpened {
            id,
            remote,
            timestamp: now(),
        }
    }

    pub(crate) fn closed(id: ConnectionId, reason: CloseReason) -> Self {
        Self::ConnectionClosed {
            id,
            reason,
            timestamp: now(),
        }
    }

    pub(crate) fn broadcast(sender: ConnectionId, recipients: usize) -> Self {
        Self::MessageBroadcast {
            sender,
            recipients,
            timestamp: now(),
        }
    }

    pub(crate) fn dropped(connection: ConnectionId, reason: DropReason) -> Self {
        Self::MessageDropped {
            connection,
            reason,
            timestamp: now(),
        }
    }

    /// The `type` tag this event serializes with.
    pub fn event_type(&self) -> &'static str {
        match self {
            Self::ConnectionOpened { .. } => "connection_opened",
            Self::ConnectionClosed { .. } => "connection_closed",
            Self::MessageBroadcast { .. } => "message_broadcast",
            Self::MessageDropped { .. } => "message_dropped",
        }
    }
}

fn now() -> String {
    chrono::Utc::now().to_rfc3339()
}
