//! Metric names recorded by the hub.

/// Connections registered total (counter).
pub const HUB_CONNECTIONS_TOTAL: &str = "hub_connections_total";
/// Live connections (gauge).
pub const HUB_CONNECTIONS_ACTIVE: &str = "hub_connections_active";
/// Connections torn down total (counter, labels: reason).
pub const HUB_DISCONNECTIONS_TOTAL: &str = "hub_disconnections_total";
/// Inbound payloads fanned out total (counter).
pub const HUB_MESSAGES_BROADCAST_TOTAL: &str = "hub_messages_broadcast_total";
/// Payloads lost for one recipient total (counter, labels: reason).
pub const HUB_MESSAGES_DROPPED_TOTAL: &str = "hub_messages_dropped_total";
/// Connection lifetime in seconds (histogram).
pub const HUB_CONNECTION_DURATION_SECONDS: &str = "hub_connection_duration_seconds";
