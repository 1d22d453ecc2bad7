//! # hubcast-hub
//!
//! The connection hub:
//!
//! - [`OutboundQueue`]: bounded per-connection buffer with an explicit overflow policy
//! - [`MembershipRegistry`]: live connections, snapshot-iterated during fan-out
//! - [`BroadcastHub`]: single dispatch loop fanning every inbound message out
//! - [`Supervisor`]: reader, writer and heartbeat duties for one transport
//! - [`HubEvent`]: diagnostic events, also logged and counted as metrics
//!
//! The hub only sees the [`Transport`](hubcast_core::Transport) contract;
//! framing and sockets live in adapters.

#![deny(unsafe_code)]

pub mod connection;
pub mod events;
pub mod heartbeat;
pub mod hub;
pub mod metrics;
pub mod queue;
pub mod registry;
pub mod supervisor;

pub use connection::Connection;
pub use events::{CloseReason, DropReason, HubEvent};
pub use hub::{BroadcastHub, HeartbeatConfig, HubConfig, HubDispatcher, InboundMessage};
pub use queue::{EnqueueOutcome, OutboundQueue};
pub use registry::{MembershipRegistry, RegistrationToken};
pub use supervisor::{Supervisor, SupervisorHandle, spawn};
