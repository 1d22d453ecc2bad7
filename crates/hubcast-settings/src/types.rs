//! Settings types.
//!
//! Every struct uses `#[serde(default)]` so a partial settings file fills the
//! gaps from compiled defaults.

use hubcast_core::OverflowPolicy;
use hubcast_core::logging::LogFormat;
use serde::{Deserialize, Serialize};

use crate::errors::{Result, SettingsError};

/// Root settings object.
#[derive(Clone, Debug, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct HubcastSettings {
    /// Listener and transport limits.
    pub server: ServerSettings,
    /// Fan-out behaviour.
    pub hub: HubSettings,
    /// Liveness probing.
    pub heartbeat: HeartbeatSettings,
    /// Log output.
    pub logging: LoggingSettings,
}

impl HubcastSettings {
    /// Check cross-field constraints the type system cannot express.
    pub fn validate(&self) -> Result<()> {
        if self.hub.queue_capacity == 0 {
            return Err(SettingsError::InvalidValue(
                "hub.queueCapacity must be at least 1".into(),
            ));
        }
        if self.hub.inbound_capacity == 0 {
            return Err(SettingsError::InvalidValue(
                "hub.inboundCapacity must be at least 1".into(),
            ));
        }
        if self.heartbeat.interval_ms == 0 {
            return Err(SettingsError::InvalidValue(
                "heartbeat.intervalMs must be at least 1".into(),
            ));
        }
        if self.heartbeat.timeout_ms < self.heartbeat.interval_ms {
            return Err(SettingsError::InvalidValue(format!(
                "heartbeat.timeoutMs ({}) must not be shorter than heartbeat.intervalMs ({})",
                self.heartbeat.timeout_ms, self.heartbeat.interval_ms
            )));
        }
        if self.server.max_connections == 0 {
            return Err(SettingsError::InvalidValue(
                "server.maxConnections must be at least 1".into(),
            ));
        }
        if self.server.max_message_size == 0 {
            return Err(SettingsError::InvalidValue(
                "server.maxMessageSize must be at least 1".into(),
            ));
        }
        Ok(())
    }
}

/// Listener and transport limits.
#[derive(Clone, Debug, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct ServerSettings {
    /// Bind address.
    pub host: String,
    /// Bind port (`0` picks a free port).
    pub port: u16,
    /// Upgrades beyond this many live connections are refused.
    pub max_connections: usize,
    /// Largest accepted inbound frame, in bytes.
    pub max_message_size: usize,
}

impl Default for ServerSettings {
    fn default() -> Self {
        Self {
            host: "127.0.0.1".to_string(),
            port: 8765,
            max_connections: 1024,
            max_message_size: 1024 * 1024,
        }
    }
}

/// Fan-out behaviour.
#[derive(Clone, Debug, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct HubSettings {
    /// Per-connection outbound queue capacity.
    pub queue_capacity: usize,
    /// What a full outbound queue does with a new payload.
    pub overflow_policy: OverflowPolicy,
    /// Text prepended to every broadcast payload.
    pub envelope_prefix: String,
    /// Whether the sender receives its own broadcast.
    pub echo_to_sender: bool,
    /// Capacity of the channel feeding the hub's dispatch loop.
    pub inbound_capacity: usize,
}

impl Default for HubSettings {
    fn default() -> Self {
        Self {
            queue_capacity: 256,
            overflow_policy: OverflowPolicy::RejectNewest,
            envelope_prefix: "Server broadcasted: ".to_string(),
            echo_to_sender: true,
            inbound_capacity: 1024,
        }
    }
}

/// Liveness probing.
#[derive(Clone, Debug, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct HeartbeatSettings {
    /// Whether pings are sent at all.
    pub enabled: bool,
    /// Ping interval in milliseconds.
    pub interval_ms: u64,
    /// Silence longer than this tears the connection down.
    pub timeout_ms: u64,
}

impl Default for HeartbeatSettings {
    fn default() -> Self {
        Self {
            enabled: true,
            interval_ms: 30_000,
            timeout_ms: 90_000,
        }
    }
}

/// Log output.
#[derive(Clone, Debug, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct LoggingSettings {
    /// Filter directive used when `RUST_LOG` is unset.
    pub level: String,
    /// Emit JSON lines instead of compact text.
    pub json: bool,
}

impl LoggingSettings {
    /// Output format for the subscriber.
    pub fn format(&self) -> LogFormat {
        if self.json {
            LogFormat::Json
        } else {
            LogFormat::Compact
        }
    }
}

impl Default for LoggingSettings {
    fn default() -> Self {
        Self {
            level: "info".to_string(),
            json: false,
        }
    }
}
