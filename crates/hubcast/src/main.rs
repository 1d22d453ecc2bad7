//! # hubcast
//!
//! Broadcast hub server binary. Loads settings, applies CLI flags, and
//! serves `/ws`, `/health` and `/metrics` until ctrl-c.

#![deny(unsafe_code)]

use std::path::{Path, PathBuf};
use std::time::Duration;

use anyhow::{Context, Result};
use clap::Parser;
use hubcast_core::OverflowPolicy;
use hubcast_core::logging::init_subscriber;
use hubcast_server::{HubServer, ServerConfig, hub_config};
use hubcast_settings::HubcastSettings;

/// How long connections get to close after ctrl-c.
const SHUTDOWN_TIMEOUT: Duration = Duration::from_secs(10);

/// Real-time message broadcast hub.
#[derive(Parser, Debug)]
#[command(name = "hubcast", about = "Real-time message broadcast hub")]
struct Cli {
    /// Settings file (defaults to `~/.hubcast/settings.json`).
    #[arg(long)]
    config: Option<PathBuf>,

    /// Host to bind (overrides settings).
    #[arg(long)]
    host: Option<String>,

    /// Port to bind, 0 for auto-assign (overrides settings).
    #[arg(long)]
    port: Option<u16>,

    /// Per-connection outbound queue capacity (overrides settings).
    #[arg(long)]
    queue_capacity: Option<usize>,

    /// `reject-newest` or `drop-oldest` (overrides settings).
    #[arg(long)]
    overflow_policy: Option<OverflowPolicy>,
}

impl Cli {
    /// Layer flags over the loaded settings.
    fn apply(&self, settings: &mut HubcastSettings) {
        if let Some(ref host) = self.host {
            settings.server.host.clone_from(host);
        }
        if let Some(port) = self.port {
            settings.server.port = port;
        }
        if let Some(capacity) = self.queue_capacity {
            settings.hub.queue_capacity = capacity;
        }
        if let Some(policy) = self.overflow_policy {
            settings.hub.overflow_policy = policy;
        }
    }
}

/// Load settings from `--config` when given, otherwise from the default path.
fn load_settings(config: Option<&Path>) -> Result<HubcastSettings> {
    match config {
        Some(path) => hubcast_settings::load_settings_from_path(path)
            .with_context(|| format!("Failed to load settings from {}", path.display())),
        None => hubcast_settings::load_settings().with_context(|| {
            format!(
                "Failed to load settings from {}",
                hubcast_settings::settings_path().display()
            )
        }),
    }
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    let mut settings = load_settings(cli.config.as_deref())?;
    cli.apply(&mut settings);
    settings.validate().context("Invalid settings")?;

    init_subscriber(&settings.logging.level, settings.logging.format());

    let metrics = hubcast_server::metrics::install_recorder()
        .context("Failed to install metrics recorder")?;

    let server = HubServer::new(
        ServerConfig::from_settings(&settings.server),
        hub_config(&settings),
        Some(metrics),
    );

    let (addr, handle) = server
        .listen()
        .await
        .context("Failed to bind server")?;

    tracing::info!(
        queue_capacity = settings.hub.queue_capacity,
        overflow_policy = %settings.hub.overflow_policy,
        "hubcast listening on ws://{addr}/ws"
    );

    // Wait for shutdown signal
    tokio::signal::ctrl_c()
        .await
        .context("Failed to listen for ctrl-c")?;

    tracing::info!("Shutting down...");
    let outcome = server
        .shutdown()
        .graceful_shutdown(vec![handle], Some(SHUTDOWN_TIMEOUT))
        .await;
    if !outcome.is_drained() {
        tracing::warn!(?outcome, "server did not stop within {SHUTDOWN_TIMEOUT:?}");
    }

    tracing::info!("Shutdown complete");
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn cli_defaults_are_empty() {
        let cli = Cli::parse_from(["hubcast"]);
        assert!(cli.config.is_none());
        assert!(cli.host.is_none());
        assert!(cli.port.is_none());
        assert!(cli.queue_capacity.is_none());
        assert!(cli.overflow_policy.is_none());
    }

    #[test]
    fn cli_custom_port() {
        let cli = Cli::parse_from(["hubcast", "--port", "8080"]);
        assert_eq!(cli.port, Some(8080));
    }

    #[test]
    fn cli_config_path() {
        let cli = Cli::parse_from(["hubcast", "--config", "/tmp/hubcast.json"]);
        assert_eq!(cli.config, Some(PathBuf::from("/tmp/hubcast.json")));
    }

    #[test]
    fn cli_overflow_policy() {
        let cli = Cli::parse_from(["hubcast", "--overflow-policy", "drop-oldest"]);
        assert_eq!(cli.overflow_policy, Some(OverflowPolicy::DropOldest));
    }

    #[test]
    fn cli_rejects_unknown_policy() {
        assert!(Cli::try_parse_from(["hubcast", "--overflow-policy", "block"]).is_err());
    }

    #[test]
    fn flags_override_settings() {
        let cli = Cli::parse_from([
            "hubcast",
            "--host",
            "0.0.0.0",
            "--port",
            "9000",
            "--queue-capacity",
            "4",
            "--overflow-policy",
            "drop-oldest",
        ]);
        let mut settings = HubcastSettings::default();
        cli.apply(&mut settings);
        assert_eq!(settings.server.host, "0.0.0.0");
        assert_eq!(settings.server.port, 9000);
        assert_eq!(settings.hub.queue_capacity, 4);
        assert_eq!(settings.hub.overflow_policy, OverflowPolicy::DropOldest);
    }

    #[test]
    fn absent_flags_keep_settings() {
        let cli = Cli::parse_from(["hubcast"]);
        let mut settings = HubcastSettings::default();
        cli.apply(&mut settings);
        assert_eq!(settings.server.port, 8765);
        assert_eq!(settings.hub.queue_capacity, 256);
    }

    #[test]
    fn config_file_is_loaded() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("settings.json");
        std::fs::write(&path, r#"{"server": {"port": 9100}, "hub": {"queueCapacity": 8}}"#)
            .unwrap();
        let settings = load_settings(Some(&path)).unwrap();
        assert_eq!(settings.server.port, 9100);
        assert_eq!(settings.hub.queue_capacity, 8);
        assert_eq!(settings.server.host, "127.0.0.1");
    }

    #[test]
    fn missing_config_file_uses_defaults() {
        let dir = tempfile::tempdir().unwrap();
        let settings = load_settings(Some(&dir.path().join("absent.json"))).unwrap();
        assert_eq!(settings.hub.queue_capacity, 256);
    }

    #[test]
    fn invalid_config_file_names_the_path() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("settings.json");
        std::fs::write(&path, "{not json").unwrap();
        let err = load_settings(Some(&path)).unwrap_err();
        assert!(err.to_string().contains("settings.json"));
    }

    #[test]
    fn zero_capacity_flag_fails_validation() {
        let cli = Cli::parse_from(["hubcast", "--queue-capacity", "0"]);
        let mut settings = HubcastSettings::default();
        cli.apply(&mut settings);
        assert!(settings.validate().is_err());
    }
}
