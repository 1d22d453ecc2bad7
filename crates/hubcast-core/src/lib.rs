//! # hubcast-core
//!
//! Shared vocabulary for the hubcast workspace:
//!
//! - **Connection ids**: [`ConnectionId`], a branded newtype unique per connection lifetime
//! - **Connection state**: [`ConnectionState`] and its lock-free cell
//! - **Overflow policy**: [`OverflowPolicy`] for bounded outbound queues
//! - **Errors**: [`HubError`] hierarchy via `thiserror`
//! - **Transport contract**: the [`Transport`] trait the hub drives, plus an
//!   in-process [`transport::memory`] implementation
//! - **Logging**: `tracing` subscriber setup

#![deny(unsafe_code)]

pub mod errors;
pub mod ids;
pub mod logging;
pub mod policy;
pub mod state;
pub mod transport;

pub use errors::{HubError, Result};
pub use ids::ConnectionId;
pub use policy::OverflowPolicy;
pub use state::{ConnectionState, StateCell};
pub use transport::{Transport, TransportEvent};
