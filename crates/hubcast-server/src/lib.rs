//! # hubcast-server
//!
//! Axum HTTP + `WebSocket` front end for the broadcast hub.
//!
//! - `/ws`: upgrade, then hand the socket to a hub supervisor
//! - `/health`: uptime and live connection count
//! - `/metrics`: Prometheus text exposition
//! - Graceful shutdown via `CancellationToken`

#![deny(unsafe_code)]

pub mod config;
pub mod errors;
pub mod health;
pub mod metrics;
pub mod server;
pub mod shutdown;
pub mod websocket;

pub use config::{ServerConfig, hub_config};
pub use errors::{Result, ServerError};
pub use server::HubServer;
pub use shutdown::{ShutdownCoordinator, ShutdownOutcome};
pub use websocket::WsTransport;
