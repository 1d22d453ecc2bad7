//! Per-connection bounded outbound queue.
//!
//! The hub enqueues without ever suspending; the connection's writer duty is
//! the only consumer and suspends in [`OutboundQueue::dequeue`] while the
//! queue is empty. Closing the queue discards pending payloads and wakes the
//! writer with `None`.

use std::collections::VecDeque;

use bytes::Bytes;
use hubcast_core::{ConnectionId, HubError, OverflowPolicy, Result};
use parking_lot::Mutex;
use tokio::sync::Notify;

/// Result of a successful [`OutboundQueue::enqueue`] call.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum EnqueueOutcome {
    /// The payload was appended.
    Accepted,
    /// The queue was full; the head was evicted and the payload appended.
    DroppedOldest,
    /// The queue was full; the payload was discarded and the queue unchanged.
    Rejected,
}

struct Inner {
    items: VecDeque<Bytes>,
    closed: bool,
}

/// Bounded FIFO of payloads awaiting delivery to one connection.
pub struct OutboundQueue {
    owner: ConnectionId,
    capacity: usize,
    policy: OverflowPolicy,
    inner: Mutex<Inner>,
    ready: Notify,
}

impl OutboundQueue {
    /// Create a queue. A capacity of zero is raised to one.
    pub fn new(owner: ConnectionId, capacity: usize, policy: OverflowPolicy) -> Self {
        let capacity = capacity.max(1);
        Self {
            owner,
            capacity,
            policy,
            inner: Mutex::new(Inner {
                items: VecDeque::with_capacity(capacity.min(64)),
                closed: false,
            }),
            ready: Notify::new(),
        }
    }

    /// Append a payload, applying the overflow policy when full.
    ///
    /// Never suspends. Fails with [`HubError::QueueClosed`] once the queue
    /// has been released.
    pub fn enqueue(&self, payload: Bytes) -> Result<EnqueueOutcome> {
        let outcome = {
            let mut inner = self.inner.lock();
            if inner.closed {
                return Err(HubError::QueueClosed(self.owner.clone()));
            }
            if inner.items.len() < self.capacity {
                inner.items.push_back(payload);
                EnqueueOutcome::Accepted
            } else {
                match self.policy {
                    OverflowPolicy::RejectNewest => return Ok(EnqueueOutcome::Rejected),
                    OverflowPolicy::DropOldest => {
                        let _ = inner.items.pop_front();
                        inner.items.push_back(payload);
                        EnqueueOutcome::DroppedOldest
                    }
                }
            }
        };
        self.ready.notify_one();
        Ok(outcome)
    }

    /// Take the next payload, suspending while the queue is empty.
    ///
    /// Returns `None` once the queue is closed.
    pub async fn dequeue(&self) -> Option<Bytes> {
        loop {
            let notified = self.ready.notified();
            tokio::pin!(notified);
            // Register before checking so a concurrent enqueue cannot be missed
            let _ = notified.as_mut().enable();
            {
                let mut inner = self.inner.lock();
                if inner.closed {
                    return None;
                }
                if let Some(payload) = inner.items.pop_front() {
                    return Some(payload);
                }
            }
            notified.await;
        }
    }

    /// Release the queue: drop pending payloads, fail future enqueues and
    /// wake the consumer.
    pub fn close(&self) {
        {
            let mut inner = self.inner.lock();
            inner.closed = true;
            inner.items.clear();
        }
        self.ready.notify_waiters();
    }

    /// Whether [`close`](Self::close) has been called.
    pub fn is_closed(&self) -> bool {
        self.inner.lock().closed
    }

    /// Pending payload count.
    pub fn len(&self) -> usize {
        self.inner.lock().items.len()
    }

    /// Whether no payload is pending.
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Configured capacity.
    pub fn capacity(&self) -> usize {
        self.capacity
    }

    /// The error describing a rejected enqueue on this full queue.
    pub fn overflow_error(&self) -> HubError {
        HubError::QueueOverflow {
            connection: self.owner.clone(),
            capacity: self.capacity,
        }
    }

    /// Configured overflow policy.
    pub fn policy(&self) -> OverflowPolicy {
        self.policy
    }

    /// Copy of the pending payloads, head first.
    pub fn contents(&self) -> Vec<Bytes> {
        self.inner.lock().items.iter().cloned().collect()
    }
}

impl std::fmt::Debug for OutboundQueue {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("OutboundQueue")
            .field("owner", &self.owner)
            .field("capacity", &self.capacity)
            .field("policy", &self.policy)
            .field("len", &self.len())
            .finish_non_exhaustive()
    }
}
