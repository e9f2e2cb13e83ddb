//! Configuration shared by the client and server components.

use std::net::Ipv4Addr;
use std::path::Path;
use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::discovery::DEFAULT_DISCOVERY_PORT;

/// Deployment configuration, loaded from a TOML file.
///
/// `service_identity` and `discovery_port` must match between the
/// client and server of one deployment; everything else tunes one side.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct LinkConfig {
    /// Shared service identity both discovery sides must match.
    pub service_identity: String,
    /// Well-known UDP port for discovery requests.
    pub discovery_port: u16,
    /// Address discovery requests are broadcast to.
    pub broadcast_addr: Ipv4Addr,
    /// TCP port the server listens on and advertises.
    pub tcp_port: u16,
    /// Maximum concurrent client connections on the server.
    pub max_clients: usize,
    /// Seconds of inactivity before a server connection is evicted.
    pub client_timeout_secs: f64,
    /// Send-loop iterations per second for both component loops.
    pub send_rate: u32,
    /// Outbound queue capacity; the oldest entry is dropped on overflow.
    pub outbound_capacity: usize,
    /// Descriptive payload carried in discovery responses.
    pub beacon_payload: String,
    /// Default log filter for the binaries.
    pub log_level: String,
}

impl Default for LinkConfig {
    fn default() -> Self {
        Self {
            service_identity: "lanlink".into(),
            discovery_port: DEFAULT_DISCOVERY_PORT,
            broadcast_addr: Ipv4Addr::BROADCAST,
            tcp_port: 7713,
            max_clients: 100,
            client_timeout_secs: 5.0,
            send_rate: 100,
            outbound_capacity: 20,
            beacon_payload: "lanlink server".into(),
            log_level: "info".into(),
        }
    }
}

impl LinkConfig {
    /// Load configuration from a TOML file, falling back to defaults.
    pub fn load(path: &Path) -> Self {
        match std::fs::read_to_string(path) {
            Ok(contents) => toml::from_str(&contents).unwrap_or_else(|e| {
                tracing::warn!("invalid config {}: {e}; using defaults", path.display());
                Self::default()
            }),
            Err(_) => {
                tracing::info!("no config at {}; using defaults", path.display());
                Self::default()
            }
        }
    }

    /// Write the default configuration to a file (for bootstrapping).
    pub fn write_default(path: &Path) -> std::io::Result<()> {
        let text = toml::to_string_pretty(&Self::default())
            .map_err(|e| std::io::Error::other(e))?;
        std::fs::write(path, text)
    }

    /// Idle eviction window for server connections.
    pub fn client_timeout(&self) -> Duration {
        Duration::from_secs_f64(self.client_timeout_secs.max(0.0))
    }

    /// Pause between component loop iterations (`1 / send_rate`).
    pub fn send_interval(&self) -> Duration {
        Duration::from_secs_f64(1.0 / self.send_rate.max(1) as f64)
    }
}

// ── Tests ────────────────────────────────────────────────────────

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn default_config_serializes() {
        let text = toml::to_string_pretty(&LinkConfig::default()).unwrap();
        assert!(text.contains("service_identity"));
        assert!(text.contains("discovery_port"));
    }

    #[test]
    fn roundtrip_config() {
        let cfg = LinkConfig::default();
        let text = toml::to_string_pretty(&cfg).unwrap();
        let parsed: LinkConfig = toml::from_str(&text).unwrap();
        assert_eq!(parsed.tcp_port, 7713);
        assert_eq!(parsed.discovery_port, DEFAULT_DISCOVERY_PORT);
        assert_eq!(parsed.broadcast_addr, Ipv4Addr::BROADCAST);
    }

    #[test]
    fn partial_config_fills_defaults() {
        let parsed: LinkConfig = toml::from_str("tcp_port = 9000\n").unwrap();
        assert_eq!(parsed.tcp_port, 9000);
        assert_eq!(parsed.max_clients, 100);
    }

    #[test]
    fn send_interval_guards_zero_rate() {
        let cfg = LinkConfig {
            send_rate: 0,
            ..Default::default()
        };
        assert_eq!(cfg.send_interval(), Duration::from_secs(1));
    }
}
