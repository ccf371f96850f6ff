//! Error Taxonomy
//!
//! Listener-level failures (`Bind`, `Accept`) are the only process-visible
//! errors. `Dial` and `Relay` are contained within the session that raised
//! them and never reach the accept loop.

use std::io;
use std::net::SocketAddr;
use thiserror::Error;

use crate::relay::RelayDirection;

#[derive(Debug, Error)]
pub enum ForwardError {
    /// The listening port is unavailable (in use, privileged, out of
    /// range). Fatal to the whole process.
    #[error("unable to bind to {addr}: {source}")]
    Bind {
        addr: SocketAddr,
        #[source]
        source: io::Error,
    },

    /// The listening socket itself failed. Transient per-connection accept
    /// failures are logged inside the loop and never surface as this.
    #[error("listening socket failed while accepting: {source}")]
    Accept {
        #[source]
        source: io::Error,
    },

    /// The destination could not be reached for one session.
    #[error("unable to reach destination {host}:{port}: {source}")]
    Dial {
        host: String,
        port: u16,
        #[source]
        source: io::Error,
    },

    /// An I/O failure mid-stream on one relay direction.
    #[error("relay {direction} failed: {source}")]
    Relay {
        direction: RelayDirection,
        #[source]
        source: io::Error,
    },
}
