//! The bidirectional connection contract consumed by the hub.
//!
//! Handshake and framing live below this trait. The hub only sees whole
//! payloads going in and out, plus liveness pings.

pub mod memory;

use async_trait::async_trait;
use bytes::Bytes;

use crate::errors::Result;
#[cfg(doc)]
use crate::errors::HubError;

/// One inbound item read from a transport.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum TransportEvent {
    /// An application payload.
    Payload(Bytes),
    /// A reply to a liveness ping.
    Pong,
}

/// A client's bidirectional channel.
///
/// All methods take `&self` so a reader and a writer can drive the same
/// transport concurrently. Implementations serialise each direction
/// internally.
///
/// An error for which [`HubError::is_fatal_to_connection`] is `false` is
/// logged by the caller and the duty carries on; any other error ends the
/// connection.
#[async_trait]
pub trait Transport: Send + Sync + 'static {
    /// Write one payload to the peer.
    async fn send(&self, payload: Bytes) -> Result<()>;

    /// Read the next inbound item. `Ok(None)` means the peer closed cleanly.
    async fn recv(&self) -> Result<Option<TransportEvent>>;

    /// Send a liveness ping. Transports without pings succeed trivially.
    async fn ping(&self) -> Result<()> {
        Ok(())
    }

    /// Close the channel. Closing twice is not an error.
    async fn close(&self) -> Result<()>;

    /// Remote endpoint descriptor, for diagnostics only.
    fn remote(&self) -> Option<String> {
        None
    }
}
