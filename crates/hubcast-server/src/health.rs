//! `/health` endpoint body.

use std::time::Instant;

use hubcast_hub::BroadcastHub;
use serde::Serialize;

/// Hub status as reported to health checks.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum HealthStatus {
    /// Accepting connections.
    Ok,
    /// Draining; new upgrades get `503`.
    ShuttingDown,
}

/// Body served on `GET /health`.
#[derive(Debug, Clone, Serialize)]
pub struct HealthResponse {
    /// `ok` or `shutting_down`.
    pub status: HealthStatus,
    /// Whole seconds since the server was created.
    pub uptime_secs: u64,
    /// Registered connections right now.
    pub connections: usize,
}

/// Sample the hub.
pub fn health_check(start_time: Instant, hub: &BroadcastHub) -> HealthResponse {
    let status = if hub.is_shutting_down() {
        HealthStatus::ShuttingDown
    } else {
        HealthStatus::Ok
    };
    HealthResponse {
        status,
        uptime_secs: start_time.elapsed().as_secs(),
        connections: hub.connection_count(),
    }
}
