//! Configuration Manager

use super::{Config, DestinationConfig};
use crate::Result;
use anyhow::{bail, Context};
use std::net::SocketAddr;
use std::path::Path;

/// Manages configuration loading and validation
pub struct ConfigManager;

impl ConfigManager {
    /// Load configuration from file
    pub fn load_from_file(path: &Path) -> Result<Config> {
        if path.exists() {
            tracing::info!("Loading configuration from: {}", path.display());
            let content = std::fs::read_to_string(path)
                .with_context(|| format!("Failed to read config file: {}", path.display()))?;

            let config: Config = toml::from_str(&content)
                .with_context(|| format!("Failed to parse config file: {}", path.display()))?;

            config
                .validate()
                .with_context(|| "Configuration validation failed")?;

            tracing::info!("Configuration loaded and validated successfully");
            Ok(config)
        } else {
            tracing::warn!(
                "Configuration file not found at {}, using defaults",
                path.display()
            );
            let config = Config::default();
            config.validate()?;
            Ok(config)
        }
    }

    /// Load configuration from environment variables
    pub fn load_from_env() -> Result<Config> {
        let mut config = Config::default();

        if let Ok(bind_addr) = std::env::var("RUSTFORWARD_BIND_ADDR") {
            config.server.bind_addr = bind_addr
                .parse::<SocketAddr>()
                .with_context(|| format!("Invalid RUSTFORWARD_BIND_ADDR: {}", bind_addr))?;
        }

        if let Ok(destination) = std::env::var("RUSTFORWARD_DESTINATION") {
            config.forward.destination = destination
                .parse::<DestinationConfig>()
                .with_context(|| format!("Invalid RUSTFORWARD_DESTINATION: {}", destination))?;
        }

        if let Ok(max_sessions) = std::env::var("RUSTFORWARD_MAX_SESSIONS") {
            config.server.max_sessions = max_sessions
                .parse::<usize>()
                .with_context(|| format!("Invalid RUSTFORWARD_MAX_SESSIONS: {}", max_sessions))?;
        }

        if let Ok(timeout) = std::env::var("RUSTFORWARD_CONNECT_TIMEOUT") {
            config.server.connect_timeout = humantime::parse_duration(&timeout)
                .with_context(|| format!("Invalid RUSTFORWARD_CONNECT_TIMEOUT: {}", timeout))?;
        }

        if let Ok(buffer_size) = std::env::var("RUSTFORWARD_BUFFER_SIZE") {
            config.server.buffer_size = buffer_size
                .parse::<usize>()
                .with_context(|| format!("Invalid RUSTFORWARD_BUFFER_SIZE: {}", buffer_size))?;
        }

        if let Ok(log_level) = std::env::var("RUSTFORWARD_LOG_LEVEL") {
            config.monitoring.log_level = log_level;
        }

        config.validate()?;
        Ok(config)
    }
}

impl Config {
    /// Validate the configuration
    pub fn validate(&self) -> Result<()> {
        self.validate_server_config()
            .with_context(|| "Server configuration validation failed")?;

        self.validate_forward_config()
            .with_context(|| "Forward configuration validation failed")?;

        self.validate_monitoring_config()
            .with_context(|| "Monitoring configuration validation failed")?;

        Ok(())
    }

    /// Validate server configuration
    fn validate_server_config(&self) -> Result<()> {
        if self.server.max_sessions == 0 {
            bail!("max_sessions must be greater than 0");
        }

        if self.server.max_sessions > 100000 {
            bail!("max_sessions cannot exceed 100,000 for safety");
        }

        if self.server.connect_timeout.as_secs() == 0 {
            bail!("connect_timeout must be greater than 0");
        }

        if self.server.buffer_size < 1024 {
            bail!("buffer_size must be at least 1024 bytes");
        }

        if self.server.buffer_size > 1048576 {
            bail!("buffer_size cannot exceed 1MB");
        }

        Ok(())
    }

    /// Validate forwarding configuration
    fn validate_forward_config(&self) -> Result<()> {
        Self::validate_destination(&self.forward.destination)
            .with_context(|| "invalid forward.destination")?;

        for (i, destination) in self.forward.destinations.iter().enumerate() {
            Self::validate_destination(destination)
                .with_context(|| format!("invalid forward.destinations[{}]", i))?;
        }

        if self.forward.load_balancing && self.forward.destinations.is_empty() {
            bail!("load_balancing requires a non-empty destinations list");
        }

        if self.forward.check_alive_interval.as_millis() == 0 {
            bail!("check_alive_interval must be greater than 0");
        }

        Ok(())
    }

    fn validate_destination(destination: &DestinationConfig) -> Result<()> {
        if destination.host.is_empty() {
            bail!("destination host must not be empty");
        }

        if destination.port == 0 {
            bail!("destination port must be in range 1-65535");
        }

        Ok(())
    }

    /// Validate monitoring configuration
    fn validate_monitoring_config(&self) -> Result<()> {
        let valid_log_levels = ["trace", "debug", "info", "warn", "error"];
        if !valid_log_levels.contains(&self.monitoring.log_level.as_str()) {
            bail!(
                "monitoring.log_level must be one of: {}",
                valid_log_levels.join(", ")
            );
        }

        Ok(())
    }

    /// Merge with CLI arguments
    pub fn merge_with_cli_args(
        &mut self,
        bind: Option<&str>,
        port: Option<u16>,
        destination: Option<DestinationConfig>,
        max_sessions: Option<usize>,
        timeout: Option<u64>,
        buffer_size: Option<usize>,
    ) {
        // Override bind address if provided
        if let Some(bind_str) = bind {
            if let Ok(addr) = bind_str.parse::<SocketAddr>() {
                self.server.bind_addr = addr;
                tracing::info!("CLI override: bind address set to {}", addr);
            } else {
                tracing::warn!("Invalid bind address provided: {}", bind_str);
            }
        }

        // Override listening port if provided
        if let Some(port) = port {
            self.server.bind_addr.set_port(port);
            tracing::info!("CLI override: port set to {}", port);
        }

        // Override forwarding destination if provided
        if let Some(destination) = destination {
            tracing::info!("CLI override: destination set to {}", destination);
            self.forward.destination = destination;
        }

        // Override session cap if provided
        if let Some(max_sessions) = max_sessions {
            self.server.max_sessions = max_sessions;
            tracing::info!("CLI override: max sessions set to {}", max_sessions);
        }

        // Override connect timeout if provided
        if let Some(timeout_secs) = timeout {
            self.server.connect_timeout = std::time::Duration::from_secs(timeout_secs);
            tracing::info!("CLI override: connect timeout set to {}s", timeout_secs);
        }

        // Override buffer size if provided
        if let Some(buffer_size) = buffer_size {
            self.server.buffer_size = buffer_size;
            tracing::info!("CLI override: buffer size set to {} bytes", buffer_size);
        }
    }
}
