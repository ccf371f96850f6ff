//! Relay Task
//!
//! One unidirectional byte-copy loop between a source and a sink stream.

use bytes::BytesMut;
use std::fmt;
use std::sync::Arc;
use tokio::io::{AsyncRead, AsyncReadExt, AsyncWrite, AsyncWriteExt};
use tracing::{debug, trace};

use super::session::SessionState;
use crate::error::ForwardError;

/// Direction of a relay task within its session
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RelayDirection {
    ClientToDestination,
    DestinationToClient,
}

impl fmt::Display for RelayDirection {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            RelayDirection::ClientToDestination => write!(f, "client->destination"),
            RelayDirection::DestinationToClient => write!(f, "destination->client"),
        }
    }
}

/// Copies bytes from `source` to `sink` until the source reaches
/// end-of-stream or either side fails with an I/O error.
///
/// The task holds a non-owning back-reference to its session and reports
/// termination through [`SessionState::connection_broken`]. It never
/// restarts: `running -> stopped` is its only transition.
pub struct RelayTask<R, W> {
    source: R,
    sink: W,
    session: Arc<SessionState>,
    direction: RelayDirection,
    buffer_size: usize,
}

impl<R, W> RelayTask<R, W>
where
    R: AsyncRead + Unpin,
    W: AsyncWrite + Unpin,
{
    pub fn new(
        source: R,
        sink: W,
        session: Arc<SessionState>,
        direction: RelayDirection,
        buffer_size: usize,
    ) -> Self {
        Self {
            source,
            sink,
            session,
            direction,
            buffer_size,
        }
    }

    /// Runs the copy loop to completion, then notifies the owning session
    /// exactly once and exits permanently.
    pub async fn run(mut self) {
        match self.copy_loop().await {
            Ok(()) => debug!(
                session_id = self.session.id(),
                "{} relay reached end of stream", self.direction
            ),
            Err(e) => debug!(session_id = self.session.id(), "{}", e),
        }
        self.session.connection_broken();
    }

    /// Forwards chunks unmodified and in order. Chunk size only affects
    /// throughput, not correctness.
    async fn copy_loop(&mut self) -> Result<(), ForwardError> {
        let mut buf = BytesMut::with_capacity(self.buffer_size);
        loop {
            buf.clear();
            let n = self
                .source
                .read_buf(&mut buf)
                .await
                .map_err(|e| ForwardError::Relay {
                    direction: self.direction,
                    source: e,
                })?;
            if n == 0 {
                return Ok(());
            }

            self.sink
                .write_all(&buf)
                .await
                .map_err(|e| ForwardError::Relay {
                    direction: self.direction,
                    source: e,
                })?;

            trace!(
                session_id = self.session.id(),
                "{} relay forwarded {} bytes", self.direction, n
            );
            self.session.record_transfer(self.direction, n as u64);
        }
    }
}
