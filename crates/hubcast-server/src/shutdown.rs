//! Server-wide stop signal.
//!
//! Cancelling the coordinator's token stops the listener, which in turn shuts
//! the hub down and closes every connection with reason `shutdown`.

use std::time::Duration;

use tokio::task::{AbortHandle, JoinHandle};
use tokio_util::sync::CancellationToken;
use tracing::{info, warn};

/// How long [`ShutdownCoordinator::graceful_shutdown`] waits by default.
pub const DEFAULT_SHUTDOWN_TIMEOUT: Duration = Duration::from_secs(10);

/// How a graceful shutdown ended.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum ShutdownOutcome {
    /// Every task finished inside the timeout.
    Drained,
    /// The timeout elapsed; this many stragglers were aborted.
    TimedOut {
        /// Tasks still running when the timeout fired.
        aborted: usize,
    },
}

impl ShutdownOutcome {
    /// Whether every task finished on its own.
    pub fn is_drained(self) -> bool {
        matches!(self, Self::Drained)
    }
}

/// Owns the server's stop signal.
pub struct ShutdownCoordinator {
    token: CancellationToken,
}

impl ShutdownCoordinator {
    /// Create a coordinator that has not fired yet.
    pub fn new() -> Self {
        Self {
            token: CancellationToken::new(),
        }
    }

    /// A handle that observes the stop signal.
    pub fn token(&self) -> CancellationToken {
        self.token.clone()
    }

    /// Fire the stop signal. Firing twice is a no-op.
    pub fn shutdown(&self) {
        self.token.cancel();
    }

    /// Whether the stop signal has fired.
    pub fn is_shutting_down(&self) -> bool {
        self.token.is_cancelled()
    }

    /// Fire the stop signal and drain `handles`.
    ///
    /// Tasks still running after `timeout` (default
    /// [`DEFAULT_SHUTDOWN_TIMEOUT`]) are aborted.
    pub async fn graceful_shutdown(
        &self,
        handles: Vec<JoinHandle<()>>,
        timeout: Option<Duration>,
    ) -> ShutdownOutcome {
        let timeout = timeout.unwrap_or(DEFAULT_SHUTDOWN_TIMEOUT);
        self.shutdown();

        let aborts: Vec<AbortHandle> = handles.iter().map(JoinHandle::abort_handle).collect();
        info!(tasks = handles.len(), ?timeout, "draining server tasks");

        match tokio::time::timeout(timeout, futures::future::join_all(handles)).await {
            Ok(results) => {
                for e in results.into_iter().filter_map(Result::err) {
                    warn!(error = %e, "server task failed during shutdown");
                }
                ShutdownOutcome::Drained
            }
            Err(_) => {
                let aborted = aborts
                    .iter()
                    .filter(|handle| !handle.is_finished())
                    .inspect(|handle| handle.abort())
                    .count();
                warn!(aborted, ?timeout, "shutdown timed out, aborting remaining tasks");
                ShutdownOutcome::TimedOut { aborted }
            }
        }
    }
}

impl Default for ShutdownCoordinator {
    fn default() -> Self {
        Self::new()
    }
}
