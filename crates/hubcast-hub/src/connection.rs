//! Hub-side state for one client connection.

use std::sync::Arc;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::time::{Duration, Instant};

use hubcast_core::{ConnectionId, ConnectionState, OverflowPolicy, StateCell};
use parking_lot::Mutex;
use tokio_util::sync::CancellationToken;

use crate::events::CloseReason;
use crate::queue::OutboundQueue;
use crate::registry::RegistrationToken;

/// A connected client as seen by the hub.
///
/// Shared between the registry, the hub's dispatch loop and the
/// connection's supervisor. The transport itself stays with the supervisor.
pub struct Connection {
    /// Unique connection ID.
    pub id: ConnectionId,
    /// Remote endpoint descriptor, for diagnostics only.
    pub remote: Option<String>,
    state: StateCell,
    queue: OutboundQueue,
    /// Cancelled when the connection is torn down; stops every duty.
    cancel: CancellationToken,
    /// When this connection was established.
    pub connected_at: Instant,
    /// Whether the client has shown activity since the last heartbeat check.
    is_alive: AtomicBool,
    /// When the last pong (or any activity) was received.
    last_pong: Mutex<Instant>,
    /// Payloads lost to the overflow policy.
    dropped_messages: AtomicU64,
    registration: Mutex<Option<RegistrationToken>>,
    torn_down: AtomicBool,
    close_reason: Mutex<Option<CloseReason>>,
}

impl Connection {
    /// Create a connection in the `Connecting` state.
    ///
    /// `cancel` is the connection's own token, usually a child of the hub's
    /// shutdown token.
    pub fn new(
        id: ConnectionId,
        remote: Option<String>,
        queue_capacity: usize,
        policy: OverflowPolicy,
        cancel: CancellationToken,
    ) -> Arc<Self> {
        let now = Instant::now();
        Arc::new(Self {
            queue: OutboundQueue::new(id.clone(), queue_capacity, policy),
            id,
            remote,
            state: StateCell::new(ConnectionState::Connecting),
            cancel,
            connected_at: now,
            is_alive: AtomicBool::new(true),
            last_pong: Mutex::new(now),
            dropped_messages: AtomicU64::new(0),
            registration: Mutex::new(None),
            torn_down: AtomicBool::new(false),
            close_reason: Mutex::new(None),
        })
    }

    /// Current lifecycle state.
    pub fn state(&self) -> ConnectionState {
        self.state.get()
    }

    /// Move the state forward. Backward transitions are ignored.
    pub fn advance(&self, next: ConnectionState) -> bool {
        self.state.advance(next)
    }

    /// The outbound queue drained by this connection's writer duty.
    pub fn queue(&self) -> &OutboundQueue {
        &self.queue
    }

    /// Token cancelled on teardown.
    pub fn cancel_token(&self) -> &CancellationToken {
        &self.cancel
    }

    pub(crate) fn set_registration(&self, token: RegistrationToken) {
        *self.registration.lock() = Some(token);
    }

    /// Hand out the registration token once, for deregistration.
    pub(crate) fn take_registration(&self) -> Option<RegistrationToken> {
        self.registration.lock().take()
    }

    /// Whether teardown has started.
    pub fn is_torn_down(&self) -> bool {
        self.torn_down.load(Ordering::Acquire)
    }

    /// Claim the right to tear this connection down.
    ///
    /// Returns `true` for exactly one caller; the reason of that caller is
    /// recorded.
    pub(crate) fn begin_teardown(&self, reason: &CloseReason) -> bool {
        if self.torn_down.swap(true, Ordering::AcqRel) {
            return false;
        }
        *self.close_reason.lock() = Some(reason.clone());
        true
    }

    /// Why the connection closed, once it has.
    pub fn close_reason(&self) -> Option<CloseReason> {
        self.close_reason.lock().clone()
    }

    /// Mark the connection as alive (pong or any inbound traffic).
    pub fn mark_alive(&self) {
        self.is_alive.store(true, Ordering::Relaxed);
        *self.last_pong.lock() = Instant::now();
    }

    /// Check and reset the alive flag for heartbeat.
    ///
    /// Returns `true` if the connection was alive since the last check.
    pub fn check_alive(&self) -> bool {
        self.is_alive.swap(false, Ordering::Relaxed)
    }

    /// Duration since the last pong (or connection establishment).
    pub fn last_pong_elapsed(&self) -> Duration {
        self.last_pong.lock().elapsed()
    }

    /// Connection age.
    pub fn age(&self) -> Duration {
        self.connected_at.elapsed()
    }

    pub(crate) fn record_drop(&self) -> u64 {
        self.dropped_messages.fetch_add(1, Ordering::Relaxed) + 1
    }

    /// Total payloads dropped for this connection.
    pub fn drop_count(&self) -> u64 {
        self.dropped_messages.load(Ordering::Relaxed)
    }
}

impl std::fmt::Debug for Connection {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Connection")
            .field("id", &self.id)
            .field("remote", &self.remote)
            .field("state", &self.state())
            .field("queued", &self.queue.len())
            .finish_non_exhaustive()
    }
}
