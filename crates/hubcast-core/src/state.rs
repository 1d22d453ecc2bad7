//! Connection lifecycle state.

use std::fmt;
use std::sync::atomic::{AtomicU8, Ordering};

use serde::Serialize;

/// Observable lifecycle of a connection.
///
/// Transitions only move forward: `Connecting → Open → Closing → Closed`.
#[derive(Clone, Copy, Debug, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize)]
#[serde(rename_all = "lowercase")]
#[repr(u8)]
pub enum ConnectionState {
    /// Accepted but not yet registered with the hub.
    Connecting = 0,
    /// Registered and exchanging messages.
    Open = 1,
    /// Teardown started; no new payloads are accepted.
    Closing = 2,
    /// Transport closed and resources released.
    Closed = 3,
}

impl ConnectionState {
    fn from_u8(v: u8) -> Self {
        match v {
            0 => Self::Connecting,
            1 => Self::Open,
            2 => Self::Closing,
            _ => Self::Closed,
        }
    }

    /// Lowercase name for logs.
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Connecting => "connecting",
            Self::Open => "open",
            Self::Closing => "closing",
            Self::Closed => "closed",
        }
    }
}

impl fmt::Display for ConnectionState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Lock-free holder for a [`ConnectionState`] that only advances.
#[derive(Debug)]
pub struct StateCell(AtomicU8);

impl StateCell {
    /// Start in `state`.
    pub fn new(state: ConnectionState) -> Self {
        Self(AtomicU8::new(state as u8))
    }

    /// Current state.
    pub fn get(&self) -> ConnectionState {
        ConnectionState::from_u8(self.0.load(Ordering::Acquire))
    }

    /// Advance to `next` if it is later than the current state.
    ///
    /// Returns `true` if the state changed.
    pub fn advance(&self, next: ConnectionState) -> bool {
        let prev = self.0.fetch_max(next as u8, Ordering::AcqRel);
        prev < next as u8
    }
}
