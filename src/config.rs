//! Configuration management for the CS2 gateway
//!
//! Loaded from an optional YAML file. Every field has a default, so an empty
//! or missing file yields a working local setup; CLI flags override the file.

use anyhow::{bail, Context, Result};
use serde::{Deserialize, Serialize};
use std::net::{IpAddr, SocketAddr, ToSocketAddrs};
use std::path::{Path, PathBuf};
use std::time::Duration;

use crate::bus::DEFAULT_QUEUE_CAPACITY;

/// Root configuration structure
#[derive(Debug, Clone, Default, PartialEq, Deserialize, Serialize)]
#[serde(default)]
pub struct GatewayConfig {
    pub udp: UdpConfig,
    pub catalog: CatalogConfig,
    pub events: EventsConfig,
}

/// Device link configuration
#[derive(Debug, Clone, PartialEq, Deserialize, Serialize)]
#[serde(default)]
pub struct UdpConfig {
    /// Device host for outbound frames
    pub target_host: String,
    /// Device receive port
    pub tx_port: u16,
    /// Local port the device sends status frames to
    pub rx_port: u16,
    /// Local listen address
    pub bind_host: String,
    /// Uid hashed into outbound identifiers
    pub device_uid: u32,
    /// Listener receive timeout
    pub recv_timeout_ms: u64,
}

/// Device catalog location
#[derive(Debug, Clone, PartialEq, Deserialize, Serialize)]
#[serde(default)]
pub struct CatalogConfig {
    /// Directory holding `config/lokomotive.cs2` and `config/magnetartikel.cs2`
    pub path: PathBuf,
    /// Watcher poll interval
    pub poll_interval_ms: u64,
}

/// Subscriber queue settings
#[derive(Debug, Clone, PartialEq, Deserialize, Serialize)]
#[serde(default)]
pub struct EventsConfig {
    /// Per-subscriber queue bound
    pub queue_capacity: usize,
}

impl Default for UdpConfig {
    fn default() -> Self {
        Self {
            target_host: "127.0.0.1".to_string(),
            tx_port: 15731,
            rx_port: 15730,
            bind_host: "0.0.0.0".to_string(),
            device_uid: 0,
            recv_timeout_ms: 1000,
        }
    }
}

impl Default for CatalogConfig {
    fn default() -> Self {
        Self {
            path: PathBuf::from("var"),
            poll_interval_ms: 1000,
        }
    }
}

impl Default for EventsConfig {
    fn default() -> Self {
        Self {
            queue_capacity: DEFAULT_QUEUE_CAPACITY,
        }
    }
}

impl GatewayConfig {
    /// Load configuration from a YAML file
    pub fn load(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();
        let contents = std::fs::read_to_string(path)
            .with_context(|| format!("Failed to read config file: {}", path.display()))?;

        let config: GatewayConfig = if contents.trim().is_empty() {
            GatewayConfig::default()
        } else {
            serde_yaml::from_str(&contents)
                .with_context(|| format!("Failed to parse YAML config: {}", path.display()))?
        };

        config.validate()?;
        Ok(config)
    }

    /// Load the file if it exists, defaults otherwise
    pub fn load_or_default(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();
        if path.exists() {
            Self::load(path)
        } else {
            Ok(Self::default())
        }
    }

    /// Reject values the runtime cannot work with
    pub fn validate(&self) -> Result<()> {
        if self.udp.tx_port == 0 {
            bail!("udp.tx_port must not be 0");
        }
        if self.udp.recv_timeout_ms == 0 {
            bail!("udp.recv_timeout_ms must be greater than 0");
        }
        if self.catalog.poll_interval_ms == 0 {
            bail!("catalog.poll_interval_ms must be greater than 0");
        }
        if self.events.queue_capacity == 0 {
            bail!("events.queue_capacity must be greater than 0");
        }
        Ok(())
    }

    /// Resolve the device address (IP literal or host name)
    pub fn target_addr(&self) -> Result<SocketAddr> {
        let host = self.udp.target_host.trim();
        if let Ok(ip) = host.parse::<IpAddr>() {
            return Ok(SocketAddr::new(ip, self.udp.tx_port));
        }
        let mut addrs: Vec<SocketAddr> = (host, self.udp.tx_port)
            .to_socket_addrs()
            .with_context(|| format!("Failed to resolve UDP target: {}", host))?
            .collect();
        addrs.sort_by_key(|a| !a.is_ipv4());
        addrs
            .into_iter()
            .next()
            .with_context(|| format!("UDP target resolved to no address: {}", host))
    }

    /// Local listen address
    pub fn bind_addr(&self) -> Result<SocketAddr> {
        let ip: IpAddr = self
            .udp
            .bind_host
            .trim()
            .parse()
            .with_context(|| format!("Invalid udp.bind_host: {}", self.udp.bind_host))?;
        Ok(SocketAddr::new(ip, self.udp.rx_port))
    }

    /// `host:port` of the device, as configured (unresolved)
    pub fn target_display(&self) -> String {
        format!("{}:{}", self.udp.target_host, self.udp.tx_port)
    }

    pub fn recv_timeout(&self) -> Duration {
        Duration::from_millis(self.udp.recv_timeout_ms)
    }

    pub fn poll_interval(&self) -> Duration {
        Duration::from_millis(self.catalog.poll_interval_ms)
    }

    /// Path of the loco catalog file
    pub fn loco_file(&self) -> PathBuf {
        self.catalog.path.join("config").join("lokomotive.cs2")
    }

    /// Path of the switch article file
    pub fn article_file(&self) -> PathBuf {
        self.catalog.path.join("config").join("magnetartikel.cs2")
    }
}
