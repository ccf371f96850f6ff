//! RustForward Library
//!
//! Transparent TCP connection forwarder. Accepts inbound client
//! connections on a configured listening port, opens a matching outbound
//! connection to the configured destination and relays bytes in both
//! directions until either side closes or fails:
//!
//! ```text
//!     CLIENT <--> RUSTFORWARD <--> DESTINATION
//! ```
//!
//! Clients and the destination only ever talk to the forwarder; the
//! forwarded bytes are an exact, uninterpreted pass-through of whatever
//! protocol the two sides speak.

pub mod config;
pub mod error;
pub mod listener;
pub mod relay;
pub mod shutdown;

pub use config::Config;
pub use error::ForwardError;
pub use listener::ForwardListener;
pub use shutdown::ShutdownCoordinator;

/// Common error type for application-level plumbing
pub type Result<T> = anyhow::Result<T>;
