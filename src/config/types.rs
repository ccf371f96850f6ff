//! Configuration Types

use anyhow::{anyhow, bail};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::net::SocketAddr;
use std::str::FromStr;
use std::time::Duration;

/// Main configuration structure
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct Config {
    pub server: ServerConfig,
    pub forward: ForwardConfig,
    pub monitoring: MonitoringConfig,
}

/// Server configuration
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct ServerConfig {
    pub bind_addr: SocketAddr,
    /// Upper bound on concurrent forwarding sessions. Connections beyond
    /// the cap are accepted and immediately dropped.
    pub max_sessions: usize,
    pub buffer_size: usize,
    #[serde(with = "humantime_serde")]
    pub connect_timeout: Duration,
    #[serde(with = "humantime_serde")]
    pub shutdown_timeout: Duration,
}

/// Forwarding configuration
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct ForwardConfig {
    /// Destination every accepted connection is forwarded to
    pub destination: DestinationConfig,
    /// Destination pool for future selection/failover support. Parsed and
    /// validated, not yet consulted when dialing.
    #[serde(default)]
    pub destinations: Vec<DestinationConfig>,
    /// Future least-loaded selection toggle; not yet implemented
    #[serde(default)]
    pub load_balancing: bool,
    /// Interval at which dead destinations would be re-checked; not yet
    /// implemented
    #[serde(with = "humantime_serde", default = "default_check_alive_interval")]
    pub check_alive_interval: Duration,
}

fn default_check_alive_interval() -> Duration {
    Duration::from_secs(10)
}

/// A destination endpoint
#[derive(Debug, Clone, PartialEq, Eq, Deserialize, Serialize)]
pub struct DestinationConfig {
    pub host: String,
    pub port: u16,
}

impl fmt::Display for DestinationConfig {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}:{}", self.host, self.port)
    }
}

impl FromStr for DestinationConfig {
    type Err = anyhow::Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let (host, port) = s
            .rsplit_once(':')
            .ok_or_else(|| anyhow!("expected host:port, got '{}'", s))?;
        if host.is_empty() {
            bail!("destination host must not be empty in '{}'", s);
        }
        let port = port
            .parse::<u16>()
            .map_err(|e| anyhow!("invalid destination port in '{}': {}", s, e))?;

        Ok(Self {
            host: host.to_string(),
            port,
        })
    }
}

/// Monitoring configuration
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct MonitoringConfig {
    pub log_level: String,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            server: ServerConfig {
                bind_addr: "127.0.0.1:2206".parse().unwrap(),
                max_sessions: 1024,
                buffer_size: 8192,
                connect_timeout: Duration::from_secs(10),
                shutdown_timeout: Duration::from_secs(30),
            },
            forward: ForwardConfig {
                destination: DestinationConfig {
                    host: "localhost".to_string(),
                    port: 9999,
                },
                destinations: vec![],
                load_balancing: false,
                check_alive_interval: Duration::from_secs(10),
            },
            monitoring: MonitoringConfig {
                log_level: "info".to_string(),
            },
        }
    }
}
