//! Tests for configuration loading, validation and overrides

use std::io::Write;
use std::path::Path;
use std::time::Duration;

use rustforward::config::{Config, ConfigManager, DestinationConfig};

#[test]
fn default_config_is_valid() {
    let config = Config::default();
    config.validate().unwrap();

    assert_eq!(config.server.bind_addr.port(), 2206);
    assert_eq!(
        config.forward.destination,
        DestinationConfig {
            host: "localhost".to_string(),
            port: 9999,
        }
    );
    assert!(!config.forward.load_balancing);
}

#[test]
fn loads_config_from_toml_file() {
    let mut file = tempfile::NamedTempFile::new().unwrap();
    write!(
        file,
        r#"
[server]
bind_addr = "127.0.0.1:8000"
max_sessions = 64
buffer_size = 4096
connect_timeout = "5s"
shutdown_timeout = "10s"

[forward]
destination = {{ host = "10.0.0.5", port = 8080 }}
destinations = [
    {{ host = "10.0.0.5", port = 8080 }},
    {{ host = "10.0.0.6", port = 8080 }},
]
load_balancing = true
check_alive_interval = "30s"

[monitoring]
log_level = "debug"
"#
    )
    .unwrap();

    let config = ConfigManager::load_from_file(file.path()).unwrap();

    assert_eq!(config.server.bind_addr, "127.0.0.1:8000".parse().unwrap());
    assert_eq!(config.server.max_sessions, 64);
    assert_eq!(config.server.buffer_size, 4096);
    assert_eq!(config.server.connect_timeout, Duration::from_secs(5));
    assert_eq!(
        config.forward.destination,
        DestinationConfig {
            host: "10.0.0.5".to_string(),
            port: 8080,
        }
    );
    assert_eq!(config.forward.destinations.len(), 2);
    assert!(config.forward.load_balancing);
    assert_eq!(config.forward.check_alive_interval, Duration::from_secs(30));
    assert_eq!(config.monitoring.log_level, "debug");
}

#[test]
fn missing_file_falls_back_to_defaults() {
    let config = ConfigManager::load_from_file(Path::new("/nonexistent/rustforward.toml")).unwrap();
    assert_eq!(config.server.bind_addr.port(), 2206);
    assert_eq!(config.forward.destination.port, 9999);
}

#[test]
fn rejects_unparseable_config_file() {
    let mut file = tempfile::NamedTempFile::new().unwrap();
    write!(file, "this is not toml at all {{{{").unwrap();

    assert!(ConfigManager::load_from_file(file.path()).is_err());
}

#[test]
fn rejects_zero_destination_port() {
    let mut config = Config::default();
    config.forward.destination.port = 0;
    assert!(config.validate().is_err());
}

#[test]
fn rejects_empty_destination_host() {
    let mut config = Config::default();
    config.forward.destination.host.clear();
    assert!(config.validate().is_err());
}

#[test]
fn rejects_undersized_buffer() {
    let mut config = Config::default();
    config.server.buffer_size = 16;
    assert!(config.validate().is_err());
}

#[test]
fn rejects_zero_session_cap() {
    let mut config = Config::default();
    config.server.max_sessions = 0;
    assert!(config.validate().is_err());
}

#[test]
fn rejects_load_balancing_without_destination_pool() {
    let mut config = Config::default();
    config.forward.load_balancing = true;
    config.forward.destinations.clear();
    assert!(config.validate().is_err());
}

#[test]
fn rejects_unknown_log_level() {
    let mut config = Config::default();
    config.monitoring.log_level = "chatty".to_string();
    assert!(config.validate().is_err());
}

#[test]
fn parses_destination_from_host_port_string() {
    let destination: DestinationConfig = "example.com:8080".parse().unwrap();
    assert_eq!(destination.host, "example.com");
    assert_eq!(destination.port, 8080);

    assert!("no-port".parse::<DestinationConfig>().is_err());
    assert!(":9999".parse::<DestinationConfig>().is_err());
    assert!("host:notaport".parse::<DestinationConfig>().is_err());
}

#[test]
fn cli_arguments_override_file_values() {
    let mut config = Config::default();

    config.merge_with_cli_args(
        Some("0.0.0.0:7000"),
        Some(7100),
        Some("db.internal:5432".parse().unwrap()),
        Some(10),
        Some(3),
        Some(2048),
    );

    assert_eq!(config.server.bind_addr, "0.0.0.0:7100".parse().unwrap());
    assert_eq!(
        config.forward.destination,
        DestinationConfig {
            host: "db.internal".to_string(),
            port: 5432,
        }
    );
    assert_eq!(config.server.max_sessions, 10);
    assert_eq!(config.server.connect_timeout, Duration::from_secs(3));
    assert_eq!(config.server.buffer_size, 2048);
}

#[test]
fn invalid_cli_bind_address_is_ignored() {
    let mut config = Config::default();
    let original = config.server.bind_addr;

    config.merge_with_cli_args(Some("not-an-address"), None, None, None, None, None);

    assert_eq!(config.server.bind_addr, original);
}
