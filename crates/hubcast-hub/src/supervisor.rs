//! Per-connection supervision.
//!
//! A supervisor drives one transport with up to three concurrent duties:
//!
//! 1. **Reader**: forwards inbound payloads to the hub's dispatch loop
//! 2. **Writer**: drains the connection's outbound queue to the transport
//! 3. **Heartbeat** (optional): pings the client and gives up after a timeout
//!
//! The first duty to finish decides the close reason. Teardown then runs
//! once through [`BroadcastHub::teardown`], and the transport is closed
//! under a timeout so a hung peer cannot pin the task.

use std::sync::Arc;

use hubcast_core::{ConnectionId, ConnectionState, Result, Transport, TransportEvent};
use tokio::task::JoinHandle;
use tracing::{debug, instrument, warn};

use crate::connection::Connection;
use crate::events::CloseReason;
use crate::heartbeat::{HeartbeatResult, run_heartbeat};
use crate::hub::{BroadcastHub, InboundMessage};

/// A registered connection whose duties have not started yet.
pub struct Supervisor<T: Transport> {
    hub: Arc<BroadcastHub>,
    connection: Arc<Connection>,
    transport: Arc<T>,
}

impl<T: Transport> Supervisor<T> {
    /// Register a new connection for `transport` with the hub.
    ///
    /// On failure the transport is closed in the background.
    pub fn attach(hub: &Arc<BroadcastHub>, transport: T) -> Result<Self> {
        let transport = Arc::new(transport);
        let connection = hub.new_connection(transport.remote());
        if let Err(e) = hub.register(Arc::clone(&connection)) {
            warn!(conn_id = %connection.id, error = %e, "registration refused");
            drop(tokio::spawn(async move {
                let _ = transport.close().await;
            }));
            return Err(e);
        }
        Ok(Self {
            hub: Arc::clone(hub),
            connection,
            transport,
        })
    }

    /// The supervised connection.
    pub fn connection(&self) -> &Arc<Connection> {
        &self.connection
    }

    /// Run every duty until the connection ends. Returns the close reason.
    #[instrument(skip_all, fields(conn_id = %self.connection.id))]
    pub async fn run(self) -> CloseReason {
        let Self {
            hub,
            connection,
            transport,
        } = self;
        let cancel = connection.cancel_token().clone();

        let finished = tokio::select! {
            biased;
            () = cancel.cancelled() => None,
            reason = read_duty(&hub, &connection, transport.as_ref()) => Some(reason),
            reason = write_duty(&connection, transport.as_ref()) => Some(reason),
            reason = heartbeat_duty(&hub, &connection, transport.as_ref()) => reason,
        };

        // Cancellation without a prior teardown means the hub shut down
        let reason = finished.unwrap_or(CloseReason::Shutdown);
        let _ = hub.teardown(&connection, reason);

        match tokio::time::timeout(hub.config().close_timeout, transport.close()).await {
            Ok(Ok(())) => {}
            Ok(Err(e)) => debug!(error = %e, "transport close failed"),
            Err(_) => warn!(
                timeout = ?hub.config().close_timeout,
                "transport close timed out"
            ),
        }
        let _ = connection.advance(ConnectionState::Closed);
        connection.close_reason().unwrap_or(CloseReason::Shutdown)
    }

    /// Run on a new task.
    pub fn spawn(self) -> SupervisorHandle {
        let connection = Arc::clone(&self.connection);
        let task = tokio::spawn(self.run());
        SupervisorHandle { connection, task }
    }
}

/// Register `transport` with the hub and supervise it on a new task.
pub fn spawn<T: Transport>(hub: &Arc<BroadcastHub>, transport: T) -> Result<SupervisorHandle> {
    Supervisor::attach(hub, transport).map(Supervisor::spawn)
}

/// Handle to a spawned supervisor.
pub struct SupervisorHandle {
    connection: Arc<Connection>,
    task: JoinHandle<CloseReason>,
}

impl SupervisorHandle {
    /// The supervised connection's id.
    pub fn id(&self) -> &ConnectionId {
        &self.connection.id
    }

    /// The supervised connection.
    pub fn connection(&self) -> &Arc<Connection> {
        &self.connection
    }

    /// Whether the supervisor task has exited.
    pub fn is_finished(&self) -> bool {
        self.task.is_finished()
    }

    /// Wait for the supervisor to exit and return why the connection closed.
    pub async fn join(self) -> CloseReason {
        match self.task.await {
            Ok(reason) => reason,
            Err(e) => {
                warn!(conn_id = %self.connection.id, error = %e, "supervisor task failed");
                self.connection
                    .close_reason()
                    .unwrap_or(CloseReason::Shutdown)
            }
        }
    }
}

async fn read_duty<T: Transport + ?Sized>(
    hub: &BroadcastHub,
    connection: &Connection,
    transport: &T,
) -> CloseReason {
    let inbound = hub.inbound_sender();
    loop {
        match transport.recv().await {
            Ok(Some(TransportEvent::Payload(payload))) => {
                connection.mark_alive();
                let message = InboundMessage {
                    sender: connection.id.clone(),
                    payload,
                };
                if inbound.send(message).await.is_err() {
                    return CloseReason::Shutdown;
                }
            }
            Ok(Some(TransportEvent::Pong)) => connection.mark_alive(),
            Ok(None) => {
                debug!("peer closed");
                return CloseReason::ClientClosed;
            }
            Err(e) if e.is_fatal_to_connection() => {
                debug!(error = %e, kind = e.error_kind(), "receive failed");
                return CloseReason::ReceiveError(e.to_string());
            }
            Err(e) => warn!(error = %e, kind = e.error_kind(), "ignoring receive error"),
        }
    }
}

async fn write_duty<T: Transport + ?Sized>(connection: &Connection, transport: &T) -> CloseReason {
    while let Some(payload) = connection.queue().dequeue().await {
        match transport.send(payload).await {
            Ok(()) => {}
            Err(e) if e.is_fatal_to_connection() => {
                debug!(error = %e, kind = e.error_kind(), "send failed");
                return CloseReason::SendError(e.to_string());
            }
            Err(e) => warn!(error = %e, kind = e.error_kind(), "payload not delivered"),
        }
    }
    // Queue released by a teardown that already recorded its reason
    connection.close_reason().unwrap_or(CloseReason::Shutdown)
}

async fn heartbeat_duty<T: Transport + ?Sized>(
    hub: &BroadcastHub,
    connection: &Connection,
    transport: &T,
) -> Option<CloseReason> {
    let Some(heartbeat) = hub.config().heartbeat else {
        return std::future::pending().await;
    };
    match run_heartbeat(
        connection,
        transport,
        heartbeat.interval,
        heartbeat.timeout,
        connection.cancel_token(),
    )
    .await
    {
        HeartbeatResult::TimedOut => Some(CloseReason::HeartbeatTimeout),
        HeartbeatResult::PingFailed(e) => Some(CloseReason::SendError(e.to_string())),
        HeartbeatResult::Cancelled => None,
    }
}
