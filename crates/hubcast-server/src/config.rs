//! Server configuration.

use std::time::Duration;

use bytes::Bytes;
use hubcast_hub::{HeartbeatConfig, HubConfig};
use hubcast_settings::{HubcastSettings, ServerSettings};
use serde::{Deserialize, Serialize};

/// Configuration for the HTTP/WebSocket listener.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct ServerConfig {
    /// Host to bind (default `"127.0.0.1"`).
    pub host: String,
    /// Port to bind (default `0` for auto-assign).
    pub port: u16,
    /// Upgrades beyond this many live connections get `503`.
    pub max_connections: usize,
    /// Max WebSocket message size in bytes.
    pub max_message_size: usize,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            host: "127.0.0.1".into(),
            port: 0,
            max_connections: 1024,
            max_message_size: 1024 * 1024, // 1 MiB
        }
    }
}

impl ServerConfig {
    /// Listener settings from the loaded settings file.
    pub fn from_settings(settings: &ServerSettings) -> Self {
        Self {
            host: settings.host.clone(),
            port: settings.port,
            max_connections: settings.max_connections,
            max_message_size: settings.max_message_size,
        }
    }

    /// `host:port` bind address.
    pub fn bind_addr(&self) -> String {
        format!("{}:{}", self.host, self.port)
    }
}

/// Hub configuration from the loaded settings.
pub fn hub_config(settings: &HubcastSettings) -> HubConfig {
    let heartbeat = settings.heartbeat.enabled.then(|| HeartbeatConfig {
        interval: Duration::from_millis(settings.heartbeat.interval_ms),
        timeout: Duration::from_millis(settings.heartbeat.timeout_ms),
    });
    HubConfig {
        queue_capacity: settings.hub.queue_capacity,
        overflow_policy: settings.hub.overflow_policy,
        envelope_prefix: Bytes::from(settings.hub.envelope_prefix.clone()),
        echo_to_sender: settings.hub.echo_to_sender,
        inbound_capacity: settings.hub.inbound_capacity,
        heartbeat,
        ..HubConfig::default()
    }
}
