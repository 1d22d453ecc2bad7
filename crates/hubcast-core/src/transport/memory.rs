//! In-process transport pair.
//!
//! [`pair`] returns the hub-facing [`MemoryTransport`] and the client-facing
//! [`MemoryPeer`]. The peer can inject payloads, pongs and receive faults, and
//! can stall or fail the transport's writes.

use std::sync::Arc;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};

use async_trait::async_trait;
use bytes::Bytes;
use parking_lot::Mutex;
use tokio::sync::{mpsc, watch};
use tracing::debug;

use super::{Transport, TransportEvent};
use crate::errors::{HubError, Result};

enum PeerFrame {
    Payload(Bytes),
    Pong,
    Fail(HubError),
}

struct Controls {
    stalled: watch::Sender<bool>,
    closed: watch::Sender<bool>,
    fail_sends: AtomicBool,
    pings: AtomicU64,
}

/// Hub side of an in-memory connection.
pub struct MemoryTransport {
    inbound: tokio::sync::Mutex<mpsc::UnboundedReceiver<PeerFrame>>,
    outbound: Mutex<Option<mpsc::UnboundedSender<Bytes>>>,
    controls: Arc<Controls>,
    remote: String,
}

/// Client side of an in-memory connection.
pub struct MemoryPeer {
    inbound: Option<mpsc::UnboundedSender<PeerFrame>>,
    outbound: mpsc::UnboundedReceiver<Bytes>,
    controls: Arc<Controls>,
}

/// Create a connected transport/peer pair.
pub fn pair(remote: impl Into<String>) -> (MemoryTransport, MemoryPeer) {
    let (in_tx, in_rx) = mpsc::unbounded_channel();
    let (out_tx, out_rx) = mpsc::unbounded_channel();
    let controls = Arc::new(Controls {
        stalled: watch::Sender::new(false),
        closed: watch::Sender::new(false),
        fail_sends: AtomicBool::new(false),
        pings: AtomicU64::new(0),
    });
    let transport = MemoryTransport {
        inbound: tokio::sync::Mutex::new(in_rx),
        outbound: Mutex::new(Some(out_tx)),
        controls: Arc::clone(&controls),
        remote: remote.into(),
    };
    let peer = MemoryPeer {
        inbound: Some(in_tx),
        outbound: out_rx,
        controls,
    };
    (transport, peer)
}

#[async_trait]
impl Transport for MemoryTransport {
    async fn send(&self, payload: Bytes) -> Result<()> {
        let mut stalled = self.controls.stalled.subscribe();
        let mut closed = self.controls.closed.subscribe();
        tokio::select! {
            res = stalled.wait_for(|s| !*s) => {
                if res.is_err() {
                    return Err(HubError::TransportClosed);
                }
            }
            _ = closed.wait_for(|c| *c) => return Err(HubError::TransportClosed),
        }
        if self.controls.fail_sends.load(Ordering::Acquire) {
            return Err(HubError::TransportSend("injected write failure".into()));
        }
        let tx = self.outbound.lock().clone();
        match tx {
            Some(tx) => tx
                .send(payload)
                .map_err(|_| HubError::TransportSend("peer dropped".into())),
            None => Err(HubError::TransportClosed),
        }
    }

    async fn recv(&self) -> Result<Option<TransportEvent>> {
        let mut closed = self.controls.closed.subscribe();
        let mut rx = self.inbound.lock().await;
        tokio::select! {
            frame = rx.recv() => match frame {
                Some(PeerFrame::Payload(bytes)) => Ok(Some(TransportEvent::Payload(bytes))),
                Some(PeerFrame::Pong) => Ok(Some(TransportEvent::Pong)),
                Some(PeerFrame::Fail(err)) => Err(err),
                None => Ok(None),
            },
            _ = closed.wait_for(|c| *c) => Ok(None),
        }
    }

    async fn ping(&self) -> Result<()> {
        if *self.controls.closed.borrow() {
            return Err(HubError::TransportClosed);
        }
        let _ = self.controls.pings.fetch_add(1, Ordering::Relaxed);
        Ok(())
    }

    async fn close(&self) -> Result<()> {
        let was_closed = self.controls.closed.send_replace(true);
        let _ = self.outbound.lock().take();
        if !was_closed {
            debug!(remote = %self.remote, "memory transport closed");
        }
        Ok(())
    }

    fn remote(&self) -> Option<String> {
        Some(self.remote.clone())
    }
}

impl MemoryPeer {
    /// Send a payload to the hub. Returns `false` once the peer has closed.
    pub fn send(&self, payload: impl Into<Bytes>) -> bool {
        self.inbound
            .as_ref()
            .is_some_and(|tx| tx.send(PeerFrame::Payload(payload.into())).is_ok())
    }

    /// Answer a liveness ping.
    pub fn pong(&self) -> bool {
        self.inbound
            .as_ref()
            .is_some_and(|tx| tx.send(PeerFrame::Pong).is_ok())
    }

    /// Make the transport's next read fail with a receive error.
    pub fn fail_receive(&self, reason: impl Into<String>) -> bool {
        self.inject_receive_error(HubError::TransportReceive(reason.into()))
    }

    /// Make the transport's next read return `err` as is.
    pub fn inject_receive_error(&self, err: HubError) -> bool {
        self.inbound
            .as_ref()
            .is_some_and(|tx| tx.send(PeerFrame::Fail(err)).is_ok())
    }

    /// Close the client side. The transport reads end-of-stream.
    pub fn close(&mut self) {
        let _ = self.inbound.take();
    }

    /// Next payload written by the hub, or `None` once the transport closed.
    pub async fn recv(&mut self) -> Option<Bytes> {
        self.outbound.recv().await
    }

    /// Next payload if one is already buffered.
    pub fn try_recv(&mut self) -> Option<Bytes> {
        self.outbound.try_recv().ok()
    }

    /// Make every transport write hang until [`resume_writes`](Self::resume_writes).
    pub fn stall_writes(&self) {
        let _ = self.controls.stalled.send_replace(true);
    }

    /// Release stalled writes.
    pub fn resume_writes(&self) {
        let _ = self.controls.stalled.send_replace(false);
    }

    /// Make transport writes fail (or succeed again).
    pub fn fail_writes(&self, fail: bool) {
        self.controls.fail_sends.store(fail, Ordering::Release);
    }

    /// Whether the hub side closed the transport.
    pub fn is_closed(&self) -> bool {
        *self.controls.closed.borrow()
    }

    /// Number of liveness pings the hub has sent.
    pub fn pings(&self) -> u64 {
        self.controls.pings.load(Ordering::Relaxed)
    }
}
