//! `WebSocket` adapter for the hub's [`Transport`] contract.
//!
//! The socket is split so the reader and writer duties never contend. Text
//! frames and binary frames both arrive as payloads. Outbound payloads that
//! are valid UTF-8 go out as text, anything else as binary.

use std::net::SocketAddr;
use std::sync::atomic::{AtomicBool, Ordering};

use async_trait::async_trait;
use axum::extract::ws::{Message, WebSocket};
use bytes::Bytes;
use futures::stream::{SplitSink, SplitStream};
use futures::{SinkExt, StreamExt};
use hubcast_core::{HubError, Result, Transport, TransportEvent};
use tokio::sync::Mutex;
use tracing::debug;

/// A client connection accepted on `/ws`.
pub struct WsTransport {
    sink: Mutex<SplitSink<WebSocket, Message>>,
    stream: Mutex<SplitStream<WebSocket>>,
    remote: SocketAddr,
    closed: AtomicBool,
}

impl WsTransport {
    /// Wrap an upgraded socket.
    pub fn new(socket: WebSocket, remote: SocketAddr) -> Self {
        let (sink, stream) = socket.split();
        Self {
            sink: Mutex::new(sink),
            stream: Mutex::new(stream),
            remote,
            closed: AtomicBool::new(false),
        }
    }
}

/// Frame an outbound payload.
fn to_message(payload: Bytes) -> Message {
    match String::from_utf8(payload.to_vec()) {
        Ok(text) => Message::Text(text.into()),
        Err(_) => Message::Binary(payload),
    }
}

/// Map an inbound frame. `None` means the peer sent a close frame.
fn from_message(message: Message) -> Option<TransportEvent> {
    match message {
        Message::Text(text) => Some(TransportEvent::Payload(Bytes::copy_from_slice(
            text.as_str().as_bytes(),
        ))),
        Message::Binary(data) => Some(TransportEvent::Payload(data)),
        // A client-initiated ping proves liveness as well as a pong does
        Message::Ping(_) | Message::Pong(_) => Some(TransportEvent::Pong),
        Message::Close(_) => None,
    }
}

#[async_trait]
impl Transport for WsTransport {
    async fn send(&self, payload: Bytes) -> Result<()> {
        if self.closed.load(Ordering::Acquire) {
            return Err(HubError::TransportClosed);
        }
        self.sink
            .lock()
            .await
            .send(to_message(payload))
            .await
            .map_err(|e| HubError::TransportSend(e.to_string()))
    }

    async fn recv(&self) -> Result<Option<TransportEvent>> {
        let mut stream = self.stream.lock().await;
        match stream.next().await {
            Some(Ok(message)) => Ok(from_message(message)),
            Some(Err(e)) => Err(HubError::TransportReceive(e.to_string())),
            None => Ok(None),
        }
    }

    async fn ping(&self) -> Result<()> {
        self.sink
            .lock()
            .await
            .send(Message::Ping(Bytes::new()))
            .await
            .map_err(|e| HubError::TransportSend(e.to_string()))
    }

    async fn close(&self) -> Result<()> {
        if self.closed.swap(true, Ordering::AcqRel) {
            return Ok(());
        }
        if let Err(e) = self.sink.lock().await.close().await {
            // Peer already gone; nothing left to flush
            debug!(remote = %self.remote, error = %e, "websocket close failed");
        }
        Ok(())
    }

    fn remote(&self) -> Option<String> {
        Some(self.remote.to_string())
    }
}
