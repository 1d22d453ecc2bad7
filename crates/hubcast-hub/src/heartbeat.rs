//! Heartbeat ping/pong liveness monitoring.

use std::time::Duration;

use hubcast_core::{HubError, Transport};
use tokio::time::{self, MissedTickBehavior};
use tokio_util::sync::CancellationToken;
use tracing::{debug, warn};

use crate::connection::Connection;

/// Outcome of the heartbeat loop.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum HeartbeatResult {
    /// The client stopped responding within the timeout window.
    TimedOut,
    /// Sending a ping failed.
    PingFailed(HubError),
    /// The heartbeat was cancelled externally.
    Cancelled,
}

/// Consecutive misses tolerated before giving up: `timeout / interval`,
/// at least 1.
pub fn max_missed(interval: Duration, timeout: Duration) -> u32 {
    let interval_ms = interval.as_millis().max(1);
    u32::try_from(timeout.as_millis() / interval_ms)
        .unwrap_or(u32::MAX)
        .max(1)
}

/// Run heartbeat pings for a connection.
///
/// At each `interval` tick the alive flag is checked. If the client has not
/// shown activity since the last tick the missed counter increments. Once
/// [`max_missed`] consecutive misses are reached the connection is
/// considered dead and `HeartbeatResult::TimedOut` is returned. Otherwise a
/// ping is sent through the transport.
pub async fn run_heartbeat<T: Transport + ?Sized>(
    connection: &Connection,
    transport: &T,
    interval: Duration,
    timeout: Duration,
    cancel: &CancellationToken,
) -> HeartbeatResult {
    let mut check_interval = time::interval(interval);
    // A stalled ping must not be followed by a burst of back-to-back misses
    check_interval.set_missed_tick_behavior(MissedTickBehavior::Delay);
    let mut missed: u32 = 0;
    let max_missed = max_missed(interval, timeout);

    loop {
        tokio::select! {
            _ = check_interval.tick() => {
                if connection.check_alive() {
                    missed = 0;
                } else {
                    missed += 1;
                    debug!(conn_id = %connection.id, missed, max_missed, "missed heartbeat");
                    if missed >= max_missed {
                        warn!(
                            conn_id = %connection.id,
                            silent_for = ?connection.last_pong_elapsed(),
                            "client unresponsive, disconnecting"
                        );
                        return HeartbeatResult::TimedOut;
                    }
                }
                if let Err(e) = transport.ping().await {
                    return HeartbeatResult::PingFailed(e);
                }
            }
            () = cancel.cancelled() => {
                return HeartbeatResult::Cancelled;
            }
        }
    }
}
