use std::net::{Ipv4Addr, SocketAddr};
use std::path::Path;
use std::time::Duration;

use anyhow::{Context, Result};
use serde::Deserialize;

use shared::protocol;

#[derive(Debug, Clone, Deserialize)]
pub struct Config {
    #[serde(default)]
    pub api: ApiConfig,
    #[serde(default)]
    pub discovery: DiscoveryConfig,
}

#[derive(Debug, Clone, Deserialize)]
pub struct ApiConfig {
    #[serde(default = "default_listen")]
    pub listen: String,
}

#[derive(Debug, Clone, Deserialize)]
pub struct DiscoveryConfig {
    #[serde(default = "default_enabled")]
    pub enabled: bool,

    /// Destination for beacons: a multicast group or a broadcast address.
    #[serde(default = "default_group")]
    pub group: Ipv4Addr,

    #[serde(default = "default_port")]
    pub port: u16,

    #[serde(default = "default_interval")]
    pub interval_secs: u64,
}

fn default_listen() -> String {
    "0.0.0.0:3000".to_string()
}

fn default_enabled() -> bool {
    true
}

fn default_group() -> Ipv4Addr {
    protocol::MULTICAST_GROUP
}

fn default_port() -> u16 {
    protocol::DISCOVERY_PORT
}

fn default_interval() -> u64 {
    protocol::ANNOUNCE_INTERVAL.as_secs()
}

impl Default for ApiConfig {
    fn default() -> Self {
        Self {
            listen: default_listen(),
        }
    }
}

impl Default for DiscoveryConfig {
    fn default() -> Self {
        Self {
            enabled: default_enabled(),
            group: default_group(),
            port: default_port(),
            interval_secs: default_interval(),
        }
    }
}

impl DiscoveryConfig {
    pub fn target(&self) -> SocketAddr {
        SocketAddr::from((self.group, self.port))
    }

    pub fn interval(&self) -> Duration {
        // A zero interval would busy-spin the send timer.
        Duration::from_secs(self.interval_secs.max(1))
    }
}

impl Config {
    /// Load configuration from a TOML file
    pub fn load(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();
        let contents = std::fs::read_to_string(path)
            .with_context(|| format!("Failed to read config file: {}", path.display()))?;

        let config: Config = toml::from_str(&contents)
            .with_context(|| format!("Failed to parse config file: {}", path.display()))?;

        Ok(config)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn empty_file_yields_defaults() {
        let config: Config = toml::from_str("").unwrap();
        assert_eq!(config.api.listen, "0.0.0.0:3000");
        assert!(config.discovery.enabled);
        assert_eq!(config.discovery.port, protocol::DISCOVERY_PORT);
        assert_eq!(config.discovery.interval_secs, 5);
    }

    #[test]
    fn discovery_section_overrides() {
        let config: Config = toml::from_str(
            r#"
            [discovery]
            enabled = false
            group = "255.255.255.255"
            port = 50000
            interval_secs = 10
            "#,
        )
        .unwrap();

        assert!(!config.discovery.enabled);
        assert_eq!(config.discovery.target().to_string(), "255.255.255.255:50000");
        assert_eq!(config.discovery.interval(), Duration::from_secs(10));
    }
}
