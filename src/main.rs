//! RustForward - Transparent TCP Connection Forwarder
//!
//! Accepts client connections on a configured listening port and forwards
//! each one, byte for byte, to a configured destination server:
//!
//! ```text
//!     CLIENT <--> RUSTFORWARD <--> DESTINATION
//! ```

use anyhow::{Context, Result};
use clap::Parser;
use std::path::PathBuf;
use std::sync::Arc;

use tracing::{error, info, warn};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

use rustforward::{
    config::ConfigManager, config::DestinationConfig, ForwardListener, ShutdownCoordinator,
};

/// CLI arguments for RustForward
#[derive(Parser, Debug)]
#[command(name = "rustforward")]
#[command(about = "RustForward - Transparent TCP connection forwarder")]
#[command(version)]
#[command(long_about = "
RustForward - Transparent TCP connection forwarder

Accepts inbound TCP connections and forwards each one, byte for byte, to
the configured destination server.

Configuration priority (highest to lowest):
1. Command-line arguments
2. Configuration file
3. Environment variables
4. Built-in defaults

Environment variables:
  RUSTFORWARD_BIND_ADDR       - Bind address (e.g., 127.0.0.1:2206)
  RUSTFORWARD_DESTINATION     - Destination to forward to (host:port)
  RUSTFORWARD_MAX_SESSIONS    - Maximum concurrent forwarding sessions
  RUSTFORWARD_CONNECT_TIMEOUT - Destination connect timeout (e.g., 5s)
  RUSTFORWARD_BUFFER_SIZE     - Relay buffer size in bytes
  RUSTFORWARD_LOG_LEVEL       - Log level (trace, debug, info, warn, error)
")]
pub struct CliArgs {
    /// Configuration file path
    #[arg(
        short,
        long,
        default_value = "config.toml",
        help = "Path to configuration file"
    )]
    pub config: PathBuf,

    /// Bind address (overrides config file)
    #[arg(short, long, help = "Bind address (e.g., 127.0.0.1:2206)")]
    pub bind: Option<String>,

    /// Port to listen on (overrides config file)
    #[arg(short, long, help = "Port to listen on")]
    pub port: Option<u16>,

    /// Destination to forward to (overrides config file)
    #[arg(short, long, help = "Destination to forward to (host:port)")]
    pub destination: Option<DestinationConfig>,

    /// Log level (trace, debug, info, warn, error)
    #[arg(long, default_value = "info", help = "Log level")]
    pub log_level: String,

    /// Enable verbose logging (sets log level to debug)
    #[arg(short, long, help = "Enable verbose logging")]
    pub verbose: bool,

    /// Maximum number of concurrent forwarding sessions
    #[arg(long, help = "Maximum number of concurrent forwarding sessions")]
    pub max_sessions: Option<usize>,

    /// Destination connect timeout in seconds
    #[arg(long, help = "Destination connect timeout in seconds")]
    pub timeout: Option<u64>,

    /// Relay buffer size in bytes
    #[arg(long, help = "Relay buffer size in bytes")]
    pub buffer_size: Option<usize>,

    /// Validate configuration and exit
    #[arg(long, help = "Validate configuration and exit")]
    pub validate_config: bool,
}

#[tokio::main]
async fn main() -> Result<()> {
    let args = CliArgs::parse();

    // Initialize tracing
    init_tracing(&args)?;

    info!(
        "Starting RustForward v{} - Transparent TCP connection forwarder",
        env!("CARGO_PKG_VERSION")
    );

    // Load configuration with priority: CLI args > config file > environment > defaults
    let mut config = if args.config.exists() {
        ConfigManager::load_from_file(&args.config)?
    } else {
        info!("Config file not found, checking environment variables");
        ConfigManager::load_from_env()?
    };

    // Apply CLI argument overrides (highest priority)
    config.merge_with_cli_args(
        args.bind.as_deref(),
        args.port,
        args.destination.clone(),
        args.max_sessions,
        args.timeout,
        args.buffer_size,
    );

    // Final validation after all overrides
    config
        .validate()
        .context("Final configuration validation failed")?;

    // If validate-config flag is set, just validate and exit
    if args.validate_config {
        info!("Configuration is valid");
        info!("Configuration summary:");
        info!("  Bind address: {}", config.server.bind_addr);
        info!("  Destination: {}", config.forward.destination);
        info!("  Max sessions: {}", config.server.max_sessions);
        info!("  Connect timeout: {:?}", config.server.connect_timeout);
        info!("  Buffer size: {} bytes", config.server.buffer_size);
        info!(
            "  Load balancing: {}",
            if config.forward.load_balancing {
                "enabled (not implemented)"
            } else {
                "disabled"
            }
        );
        return Ok(());
    }

    info!("Configuration loaded successfully");
    info!("Bind address: {}", config.server.bind_addr);
    info!("Destination: {}", config.forward.destination);

    if config.forward.load_balancing || !config.forward.destinations.is_empty() {
        warn!(
            "Destination pool and load balancing are configured but destination selection \
             is not implemented; all connections are forwarded to {}",
            config.forward.destination
        );
    }

    // Create shutdown coordinator
    let shutdown_timeout = config.server.shutdown_timeout;
    let shutdown_coordinator = ShutdownCoordinator::new(shutdown_timeout);

    // Bind before serving so that an unavailable port fails loudly instead
    // of leaving the process half-started
    let mut listener = ForwardListener::new(Arc::new(config));
    listener.bind().await?;

    let shutdown_handle = listener.shutdown_handle();

    // Start the server in a separate task
    let server_handle = tokio::spawn(async move {
        if let Err(e) = listener.start().await {
            error!("Server error: {}", e);
        }
        listener.wait_for_sessions_to_close().await;
    });

    info!("RustForward started successfully");
    info!("Press Ctrl+C or send SIGTERM/SIGINT to shutdown gracefully");

    // Block until a shutdown signal arrives
    if let Err(e) = shutdown_coordinator.listen_for_signals().await {
        error!("Error setting up signal handlers: {}", e);
    }

    // Initiate graceful shutdown
    info!("Initiating graceful shutdown...");
    if shutdown_handle.send(()).is_err() {
        warn!("Failed to send shutdown signal to server task");
    }

    // Wait for server task to complete
    if let Err(e) = server_handle.await {
        if !e.is_cancelled() {
            error!("Server task failed: {}", e);
        }
    }

    info!("Server shutdown complete");

    Ok(())
}

/// Initialize tracing/logging
fn init_tracing(args: &CliArgs) -> Result<()> {
    let log_level = if args.verbose {
        "debug"
    } else {
        &args.log_level
    };

    let env_filter = tracing_subscriber::EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new(log_level));

    tracing_subscriber::registry()
        .with(
            tracing_subscriber::fmt::layer()
                .with_target(false)
                .with_thread_ids(true)
                .with_level(true)
                .with_ansi(true),
        )
        .with(env_filter)
        .init();

    Ok(())
}
