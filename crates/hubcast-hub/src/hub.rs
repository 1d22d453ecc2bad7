//! The broadcast hub: membership plus fan-out.
//!
//! Inbound messages from every connection funnel through one bounded channel
//! into a single dispatch loop ([`HubDispatcher::run`]). That loop is the
//! only place broadcasts happen, so all recipients observe one global order
//! of messages, and per-sender FIFO follows from it.

use std::sync::Arc;
use std::time::Duration;

use bytes::{BufMut, Bytes, BytesMut};
use hubcast_core::{ConnectionId, ConnectionState, HubError, OverflowPolicy, Result};
use metrics::{counter, gauge, histogram};
use tokio::sync::{broadcast, mpsc};
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use crate::connection::Connection;
use crate::events::{CloseReason, DropReason, HubEvent};
use crate::metrics::{
    HUB_CONNECTION_DURATION_SECONDS, HUB_CONNECTIONS_ACTIVE, HUB_CONNECTIONS_TOTAL,
    HUB_DISCONNECTIONS_TOTAL, HUB_MESSAGES_BROADCAST_TOTAL, HUB_MESSAGES_DROPPED_TOTAL,
};
use crate::queue::EnqueueOutcome;
use crate::registry::{MembershipRegistry, RegistrationToken};

/// Buffered hub events per subscriber before the slowest one lags.
const EVENT_CHANNEL_CAPACITY: usize = 1024;

/// Liveness probing parameters.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct HeartbeatConfig {
    /// Ping interval.
    pub interval: Duration,
    /// Silence longer than this tears the connection down.
    pub timeout: Duration,
}

impl Default for HeartbeatConfig {
    fn default() -> Self {
        Self {
            interval: Duration::from_secs(30),
            timeout: Duration::from_secs(90),
        }
    }
}

/// Hub configuration.
#[derive(Clone, Debug)]
pub struct HubConfig {
    /// Per-connection outbound queue capacity (minimum 1).
    pub queue_capacity: usize,
    /// What a full queue does with a new payload.
    pub overflow_policy: OverflowPolicy,
    /// Bytes prepended to every broadcast payload.
    pub envelope_prefix: Bytes,
    /// Whether the sender receives its own broadcast.
    pub echo_to_sender: bool,
    /// Capacity of the inbound channel feeding the dispatch loop.
    pub inbound_capacity: usize,
    /// Heartbeat duty parameters; `None` disables probing.
    pub heartbeat: Option<HeartbeatConfig>,
    /// Upper bound on waiting for a transport to close.
    pub close_timeout: Duration,
}

impl Default for HubConfig {
    fn default() -> Self {
        Self {
            queue_capacity: 256,
            overflow_policy: OverflowPolicy::RejectNewest,
            envelope_prefix: Bytes::from_static(b"Server broadcasted: "),
            echo_to_sender: true,
            inbound_capacity: 1024,
            heartbeat: Some(HeartbeatConfig::default()),
            close_timeout: Duration::from_secs(5),
        }
    }
}

/// One payload received from a connection.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct InboundMessage {
    /// Originating connection.
    pub sender: ConnectionId,
    /// Raw payload as read from the transport.
    pub payload: Bytes,
}

/// Owns the membership registry and fans inbound messages out to every
/// member's outbound queue.
pub struct BroadcastHub {
    config: HubConfig,
    registry: MembershipRegistry,
    inbound_tx: mpsc::Sender<InboundMessage>,
    events: broadcast::Sender<HubEvent>,
    shutdown: CancellationToken,
}

/// The receiving half of the hub: runs the single dispatch loop.
pub struct HubDispatcher {
    hub: Arc<BroadcastHub>,
    inbound_rx: mpsc::Receiver<InboundMessage>,
}

impl BroadcastHub {
    /// Create a hub and its dispatcher. Nothing is broadcast until the
    /// dispatcher runs.
    pub fn new(mut config: HubConfig) -> (Arc<Self>, HubDispatcher) {
        config.queue_capacity = config.queue_capacity.max(1);
        config.inbound_capacity = config.inbound_capacity.max(1);
        let (inbound_tx, inbound_rx) = mpsc::channel(config.inbound_capacity);
        let (events, _) = broadcast::channel(EVENT_CHANNEL_CAPACITY);
        let hub = Arc::new(Self {
            config,
            registry: MembershipRegistry::new(),
            inbound_tx,
            events,
            shutdown: CancellationToken::new(),
        });
        let dispatcher = HubDispatcher {
            hub: Arc::clone(&hub),
            inbound_rx,
        };
        (hub, dispatcher)
    }

    /// Create a hub and spawn its dispatch loop on the current runtime.
    pub fn start(config: HubConfig) -> (Arc<Self>, JoinHandle<()>) {
        let (hub, dispatcher) = Self::new(config);
        let cancel = hub.shutdown.clone();
        (hub, dispatcher.spawn(cancel))
    }

    /// Active configuration.
    pub fn config(&self) -> &HubConfig {
        &self.config
    }

    /// The membership registry.
    pub fn registry(&self) -> &MembershipRegistry {
        &self.registry
    }

    /// Number of registered connections.
    pub fn connection_count(&self) -> usize {
        self.registry.len()
    }

    /// Channel readers use to hand inbound payloads to the dispatch loop.
    pub fn inbound_sender(&self) -> mpsc::Sender<InboundMessage> {
        self.inbound_tx.clone()
    }

    /// Subscribe to hub events.
    pub fn subscribe(&self) -> broadcast::Receiver<HubEvent> {
        self.events.subscribe()
    }

    /// Whether [`shutdown`](Self::shutdown) has been called.
    pub fn is_shutting_down(&self) -> bool {
        self.shutdown.is_cancelled()
    }

    /// Build an unregistered connection using this hub's queue settings.
    pub fn new_connection(&self, remote: Option<String>) -> Arc<Connection> {
        Connection::new(
            ConnectionId::new(),
            remote,
            self.config.queue_capacity,
            self.config.overflow_policy,
            self.shutdown.child_token(),
        )
    }

    /// Add a connection to the membership and mark it open.
    pub fn register(&self, connection: Arc<Connection>) -> Result<RegistrationToken> {
        if self.is_shutting_down() {
            return Err(HubError::ShuttingDown);
        }
        let token = self.registry.register(Arc::clone(&connection))?;

        counter!(HUB_CONNECTIONS_TOTAL).increment(1);
        gauge!(HUB_CONNECTIONS_ACTIVE).increment(1.0);
        info!(conn_id = %connection.id, remote = ?connection.remote, "connection opened");
        self.emit(HubEvent::opened(
            connection.id.clone(),
            connection.remote.clone(),
        ));
        Ok(token)
    }

    /// Tear a connection down by id. Returns `false` if it is not a member
    /// or is already being torn down.
    pub fn disconnect(&self, id: &ConnectionId, reason: CloseReason) -> bool {
        match self.registry.get(id) {
            Some(connection) => self.teardown(&connection, reason),
            None => false,
        }
    }

    /// Tear down every member with [`CloseReason::Shutdown`] and refuse new
    /// registrations. Stops the dispatch loop started by [`start`](Self::start).
    pub fn shutdown(&self) {
        self.shutdown.cancel();
        let members = self.registry.snapshot();
        let count = members.len();
        for connection in members {
            let _ = self.teardown(&connection, CloseReason::Shutdown);
        }
        info!(connections = count, "hub shut down");
    }

    /// Idempotent teardown.
    ///
    /// The first caller deregisters the connection, releases its queue,
    /// cancels its duties and records `reason`. Later callers get `false`.
    /// Closing the transport is left to the connection's supervisor.
    pub fn teardown(&self, connection: &Arc<Connection>, reason: CloseReason) -> bool {
        if !connection.begin_teardown(&reason) {
            return false;
        }
        let _ = connection.advance(ConnectionState::Closing);
        let was_member = connection
            .take_registration()
            .and_then(|token| self.registry.deregister(&token))
            .is_some();
        connection.queue().close();
        connection.cancel_token().cancel();

        if was_member {
            counter!(HUB_DISCONNECTIONS_TOTAL, "reason" => reason.as_str()).increment(1);
            gauge!(HUB_CONNECTIONS_ACTIVE).decrement(1.0);
            histogram!(HUB_CONNECTION_DURATION_SECONDS).record(connection.age().as_secs_f64());
        }
        info!(
            conn_id = %connection.id,
            reason = %reason,
            dropped = connection.drop_count(),
            "connection closed"
        );
        self.emit(HubEvent::closed(connection.id.clone(), reason));
        true
    }

    /// Fan one inbound message out to every member.
    ///
    /// Returns the number of queues the payload was accepted into. Failures
    /// are confined to the affected member: a full queue under
    /// reject-newest disconnects that member, a released queue is skipped.
    pub fn on_inbound_message(&self, message: InboundMessage) -> usize {
        let envelope = self.envelope(&message.payload);
        let mut recipients = 0usize;

        for connection in self.registry.snapshot() {
            if !self.config.echo_to_sender && connection.id == message.sender {
                continue;
            }
            match connection.queue().enqueue(envelope.clone()) {
                Ok(EnqueueOutcome::Accepted) => recipients += 1,
                Ok(EnqueueOutcome::DroppedOldest) => {
                    recipients += 1;
                    let drops = connection.record_drop();
                    self.record_dropped(&connection, DropReason::QueueFullDroppedOldest);
                    debug!(conn_id = %connection.id, total_drops = drops, "queue full, dropped oldest");
                }
                Ok(EnqueueOutcome::Rejected) => {
                    let drops = connection.record_drop();
                    self.record_dropped(&connection, DropReason::QueueFullRejected);
                    let err = connection.queue().overflow_error();
                    warn!(
                        conn_id = %connection.id,
                        error = %err,
                        kind = err.error_kind(),
                        total_drops = drops,
                        "disconnecting slow client"
                    );
                    let _ = self.teardown(&connection, CloseReason::SlowConsumer);
                }
                Err(e) => {
                    // Torn down after the snapshot was taken
                    debug!(conn_id = %connection.id, error = %e, "skipping released connection");
                }
            }
        }

        counter!(HUB_MESSAGES_BROADCAST_TOTAL).increment(1);
        debug!(sender = %message.sender, recipients, "broadcast message");
        self.emit(HubEvent::broadcast(message.sender, recipients));
        recipients
    }

    fn envelope(&self, payload: &Bytes) -> Bytes {
        if self.config.envelope_prefix.is_empty() {
            return payload.clone();
        }
        let mut buf = BytesMut::with_capacity(self.config.envelope_prefix.len() + payload.len());
        buf.put_slice(&self.config.envelope_prefix);
        buf.put_slice(payload);
        buf.freeze()
    }

    fn record_dropped(&self, connection: &Connection, reason: DropReason) {
        counter!(HUB_MESSAGES_DROPPED_TOTAL, "reason" => reason.as_str()).increment(1);
        self.emit(HubEvent::dropped(connection.id.clone(), reason));
    }

    fn emit(&self, event: HubEvent) {
        // No subscribers is not an error
        let _ = self.events.send(event);
    }
}

impl HubDispatcher {
    /// Drain the inbound channel until `cancel` fires, broadcasting each
    /// message in arrival order.
    pub async fn run(mut self, cancel: CancellationToken) {
        debug!("hub dispatch loop started");
        loop {
            tokio::select! {
                biased;
                () = cancel.cancelled() => break,
                message = self.inbound_rx.recv() => match message {
                    Some(message) => {
                        let _ = self.hub.on_inbound_message(message);
                    }
                    None => break,
                },
            }
        }
        debug!("hub dispatch loop stopped");
    }

    /// Spawn [`run`](Self::run) on the current runtime.
    pub fn spawn(self, cancel: CancellationToken) -> JoinHandle<()> {
        tokio::spawn(self.run(cancel))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use assert_matches::assert_matches;

    fn config(capacity: usize, policy: OverflowPolicy) -> HubConfig {
        HubConfig {
            queue_capacity: capacity,
            overflow_policy: policy,
            heartbeat: None,
            ..HubConfig::default()
        }
    }

    fn member(hub: &BroadcastHub) -> Arc<Connection> {
        let conn = hub.new_connection(None);
        let _ = hub.register(Arc::clone(&conn)).unwrap();
        conn
    }

    fn inbound(sender: &Connection, text: &'static str) -> InboundMessage {
        InboundMessage {
            sender: sender.id.clone(),
            payload: Bytes::from_static(text.as_bytes()),
        }
    }

    #[test]
    fn register_opens_connection() {
        let (hub, _dispatcher) = BroadcastHub::new(HubConfig::default());
        let conn = member(&hub);
        assert_eq!(conn.state(), ConnectionState::Open);
        assert_eq!(hub.connection_count(), 1);
        assert!(hub.registry().contains(&conn.id));
    }

    #[test]
    fn broadcast_reaches_everyone_including_sender() {
        let (hub, _dispatcher) = BroadcastHub::new(HubConfig::default());
        let a = member(&hub);
        let b = member(&hub);
        let c = member(&hub);

        assert_eq!(hub.on_inbound_message(inbound(&a, "hello")), 3);
        for conn in [&a, &b, &c] {
            assert_eq!(
                conn.queue().contents(),
                vec![Bytes::from_static(b"Server broadcasted: hello")]
            );
        }
    }

    #[test]
    fn sender_excluded_when_echo_disabled() {
        let (hub, _dispatcher) = BroadcastHub::new(HubConfig {
            echo_to_sender: false,
            ..config(4, OverflowPolicy::RejectNewest)
        });
        let a = member(&hub);
        let b = member(&hub);
        assert_eq!(hub.on_inbound_message(inbound(&a, "x")), 1);
        assert!(a.queue().is_empty());
        assert_eq!(b.queue().len(), 1);
    }

    #[test]
    fn empty_prefix_forwards_raw_payload() {
        let (hub, _dispatcher) = BroadcastHub::new(HubConfig {
            envelope_prefix: Bytes::new(),
            ..config(4, OverflowPolicy::RejectNewest)
        });
        let a = member(&hub);
        let _ = hub.on_inbound_message(inbound(&a, "raw"));
        assert_eq!(a.queue().contents(), vec![Bytes::from_static(b"raw")]);
    }

    #[test]
    fn reject_newest_disconnects_slow_member_only() {
        let (hub, _dispatcher) = BroadcastHub::new(config(2, OverflowPolicy::RejectNewest));
        let mut events = hub.subscribe();
        let fast = member(&hub);
        let slow = member(&hub);

        for _ in 0..2 {
            let _ = hub.on_inbound_message(inbound(&fast, "m"));
            // Fast member keeps draining
            while !fast.queue().is_empty() {
                let _ = futures::executor::block_on(fast.queue().dequeue());
            }
        }
        let recipients = hub.on_inbound_message(inbound(&fast, "overflow"));

        assert_eq!(recipients, 1);
        assert!(slow.is_torn_down());
        assert_eq!(slow.close_reason(), Some(CloseReason::SlowConsumer));
        assert!(slow.queue().is_closed());
        assert!(slow.cancel_token().is_cancelled());
        assert!(!hub.registry().contains(&slow.id));
        assert!(hub.registry().contains(&fast.id));
        assert_eq!(slow.drop_count(), 1);

        let mut saw_drop = false;
        let mut saw_close = false;
        while let Ok(event) = events.try_recv() {
            match event {
                HubEvent::MessageDropped { connection, reason, .. } => {
                    assert_eq!(connection, slow.id);
                    assert_eq!(reason, DropReason::QueueFullRejected);
                    saw_drop = true;
                }
                HubEvent::ConnectionClosed { id, reason, .. } => {
                    assert_eq!(id, slow.id);
                    assert_eq!(reason, CloseReason::SlowConsumer);
                    saw_close = true;
                }
                _ => {}
            }
        }
        assert!(saw_drop && saw_close);
    }

    #[test]
    fn drop_oldest_keeps_member_and_reports_drop() {
        let (hub, _dispatcher) = BroadcastHub::new(HubConfig {
            envelope_prefix: Bytes::new(),
            ..config(2, OverflowPolicy::DropOldest)
        });
        let a = member(&hub);
        for text in ["1", "2", "3"] {
            let _ = hub.on_inbound_message(inbound(&a, text));
        }
        assert!(!a.is_torn_down());
        assert_eq!(
            a.queue().contents(),
            vec![Bytes::from_static(b"2"), Bytes::from_static(b"3")]
        );
        assert_eq!(a.drop_count(), 1);
    }

    #[test]
    fn teardown_is_idempotent() {
        let (hub, _dispatcher) = BroadcastHub::new(HubConfig::default());
        let mut events = hub.subscribe();
        let a = member(&hub);
        assert!(hub.teardown(&a, CloseReason::Kicked));
        assert!(!hub.teardown(&a, CloseReason::ClientClosed));
        assert!(!hub.disconnect(&a.id, CloseReason::Kicked));
        assert_eq!(a.close_reason(), Some(CloseReason::Kicked));
        assert_eq!(a.state(), ConnectionState::Closing);

        let closed = std::iter::from_fn(|| events.try_recv().ok())
            .filter(|e| matches!(e, HubEvent::ConnectionClosed { .. }))
            .count();
        assert_eq!(closed, 1);
    }

    #[test]
    fn disconnect_by_id() {
        let (hub, _dispatcher) = BroadcastHub::new(HubConfig::default());
        let a = member(&hub);
        assert!(hub.disconnect(&a.id, CloseReason::Kicked));
        assert!(!hub.disconnect(&ConnectionId::from_raw("conn_missing"), CloseReason::Kicked));
        assert_eq!(hub.connection_count(), 0);
    }

    #[test]
    fn shutdown_tears_everyone_down_and_refuses_new_members() {
        let (hub, _dispatcher) = BroadcastHub::new(HubConfig::default());
        let a = member(&hub);
        let b = member(&hub);
        hub.shutdown();
        for conn in [&a, &b] {
            assert_eq!(conn.close_reason(), Some(CloseReason::Shutdown));
        }
        assert_eq!(hub.connection_count(), 0);
        let late = hub.new_connection(None);
        assert!(late.cancel_token().is_cancelled());
        assert_matches!(hub.register(late), Err(HubError::ShuttingDown));
    }

    #[test]
    fn torn_down_member_in_snapshot_is_skipped() {
        let (hub, _dispatcher) = BroadcastHub::new(HubConfig::default());
        let a = member(&hub);
        let b = member(&hub);
        // Simulate teardown racing a broadcast: queue released, still listed
        b.queue().close();
        assert_eq!(hub.on_inbound_message(inbound(&a, "x")), 1);
        assert!(!b.is_torn_down());
    }

    #[test]
    fn opened_and_broadcast_events() {
        let (hub, _dispatcher) = BroadcastHub::new(HubConfig::default());
        let mut events = hub.subscribe();
        let a = member(&hub);
        let _ = hub.on_inbound_message(inbound(&a, "x"));

        assert_matches!(events.try_recv(), Ok(HubEvent::ConnectionOpened { id, .. }) if id == a.id);
        assert_matches!(
            events.try_recv(),
            Ok(HubEvent::MessageBroadcast { sender, recipients: 1, .. }) if sender == a.id
        );
    }

    #[test]
    fn zero_capacities_are_raised() {
        let (hub, _dispatcher) = BroadcastHub::new(HubConfig {
            queue_capacity: 0,
            inbound_capacity: 0,
            ..HubConfig::default()
        });
        assert_eq!(hub.config().queue_capacity, 1);
        assert_eq!(hub.config().inbound_capacity, 1);
    }

    #[tokio::test]
    async fn dispatcher_broadcasts_in_arrival_order() {
        let (hub, dispatcher) = BroadcastHub::new(HubConfig {
            envelope_prefix: Bytes::new(),
            ..config(64, OverflowPolicy::RejectNewest)
        });
        let cancel = CancellationToken::new();
        let task = dispatcher.spawn(cancel.clone());
        let a = member(&hub);

        let tx = hub.inbound_sender();
        for i in 0..10 {
            tx.send(InboundMessage {
                sender: a.id.clone(),
                payload: Bytes::from(i.to_string()),
            })
            .await
            .unwrap();
        }
        for i in 0..10 {
            assert_eq!(a.queue().dequeue().await.unwrap(), Bytes::from(i.to_string()));
        }
        cancel.cancel();
        task.await.unwrap();
    }
}
