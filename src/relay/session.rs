//! Connection Session
//!
//! Owns one client socket and one destination socket and coordinates the
//! two relay tasks that forward bytes between them. The session guarantees
//! that both sockets are closed exactly once, no matter which relay
//! observes a broken connection first.

use std::io;
use std::net::SocketAddr;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Instant;

use tokio::net::TcpStream;
use tokio::task::AbortHandle;
use tokio::time::timeout;
use tracing::{debug, error, info, warn};

use super::task::{RelayDirection, RelayTask};
use crate::config::Config;
use crate::error::ForwardError;

/// State shared between a session and its two relay tasks.
///
/// Relay tasks hold this through an `Arc` back-reference; the sockets
/// themselves are never owned here, only the means to tear them down.
pub struct SessionState {
    id: u64,
    client_addr: SocketAddr,
    destination_addr: SocketAddr,
    started_at: Instant,
    bytes_up: AtomicU64,
    bytes_down: AtomicU64,
    teardown: Mutex<Teardown>,
}

/// Guarded teardown state. `both_alive` stays false until the destination
/// dial has succeeded; the abort handles arrive once the relays are
/// spawned.
struct Teardown {
    both_alive: bool,
    relays: Vec<AbortHandle>,
}

impl SessionState {
    pub fn new(id: u64, client_addr: SocketAddr, destination_addr: SocketAddr) -> Self {
        debug!(
            session_id = id,
            "creating session state ({} -> {})", client_addr, destination_addr
        );

        Self {
            id,
            client_addr,
            destination_addr,
            started_at: Instant::now(),
            bytes_up: AtomicU64::new(0),
            bytes_down: AtomicU64::new(0),
            teardown: Mutex::new(Teardown {
                both_alive: false,
                relays: Vec::new(),
            }),
        }
    }

    pub fn id(&self) -> u64 {
        self.id
    }

    pub fn client_addr(&self) -> SocketAddr {
        self.client_addr
    }

    pub fn destination_addr(&self) -> SocketAddr {
        self.destination_addr
    }

    /// Bytes forwarded from client to destination
    pub fn bytes_up(&self) -> u64 {
        self.bytes_up.load(Ordering::Relaxed)
    }

    /// Bytes forwarded from destination to client
    pub fn bytes_down(&self) -> u64 {
        self.bytes_down.load(Ordering::Relaxed)
    }

    /// True while both connections are considered alive
    pub fn is_alive(&self) -> bool {
        self.teardown.lock().unwrap().both_alive
    }

    /// Marks the session active. Called once, after the destination dial
    /// has succeeded and before any relay task starts.
    pub(crate) fn mark_alive(&self) {
        self.teardown.lock().unwrap().both_alive = true;
    }

    pub(crate) fn record_transfer(&self, direction: RelayDirection, bytes: u64) {
        match direction {
            RelayDirection::ClientToDestination => {
                self.bytes_up.fetch_add(bytes, Ordering::Relaxed)
            }
            RelayDirection::DestinationToClient => {
                self.bytes_down.fetch_add(bytes, Ordering::Relaxed)
            }
        };
    }

    /// Hands the relay abort handles to the teardown guard.
    ///
    /// A relay can finish before registration completes. In that case the
    /// session is no longer alive and the freshly spawned relays must not
    /// outlive it, so they are aborted right here.
    pub(crate) fn register_relays(&self, handles: Vec<AbortHandle>) {
        let mut guard = self.teardown.lock().unwrap();
        if guard.both_alive {
            guard.relays = handles;
            return;
        }
        drop(guard);

        for handle in handles {
            handle.abort();
        }
    }

    /// Called by either relay task when its stream reaches end-of-stream
    /// or fails.
    ///
    /// The first caller wins the flag, aborts both relay tasks and logs
    /// the stop line; every later call is a no-op. Aborting a relay drops
    /// the stream halves it owns, which closes both sockets and unblocks
    /// the other relay's pending read or write — socket closure is the
    /// only cross-task cancellation signal. Returns whether this call
    /// performed the teardown.
    pub fn connection_broken(&self) -> bool {
        let relays = {
            let mut guard = self.teardown.lock().unwrap();
            if !guard.both_alive {
                return false;
            }
            guard.both_alive = false;
            std::mem::take(&mut guard.relays)
        };

        for relay in relays {
            relay.abort();
        }

        info!(
            session_id = self.id,
            duration_ms = self.started_at.elapsed().as_millis() as u64,
            bytes_up = self.bytes_up(),
            bytes_down = self.bytes_down(),
            "TCP forwarding {} <--> {} stopped",
            self.client_addr,
            self.destination_addr
        );
        true
    }
}

/// One forwarded connection: the accepted client socket plus the
/// destination socket dialed in `run()`.
pub struct ConnectionSession {
    id: u64,
    client: TcpStream,
    client_addr: SocketAddr,
    config: Arc<Config>,
}

impl ConnectionSession {
    /// Takes ownership of a connected client socket. The destination
    /// socket is dialed later by `run()`.
    pub fn new(id: u64, client: TcpStream, client_addr: SocketAddr, config: Arc<Config>) -> Self {
        Self {
            id,
            client,
            client_addr,
            config,
        }
    }

    /// Runs the session to completion.
    ///
    /// A dial failure stays local to this session: the client socket is
    /// closed, nothing is relayed, and the accept loop never sees the
    /// error.
    pub async fn run(self) {
        let destination = match self.dial().await {
            Ok(stream) => stream,
            Err(e) => {
                warn!(session_id = self.id, client_addr = %self.client_addr, "{}", e);
                // No relay task exists yet; dropping the client socket on
                // return is the only cleanup required.
                return;
            }
        };

        self.forward(destination).await;
    }

    async fn dial(&self) -> Result<TcpStream, ForwardError> {
        let host = &self.config.forward.destination.host;
        let port = self.config.forward.destination.port;
        debug!(session_id = self.id, "dialing destination {}:{}", host, port);

        let connect = TcpStream::connect((host.as_str(), port));
        match timeout(self.config.server.connect_timeout, connect).await {
            Ok(Ok(stream)) => Ok(stream),
            Ok(Err(e)) => Err(ForwardError::Dial {
                host: host.clone(),
                port,
                source: e,
            }),
            Err(_) => Err(ForwardError::Dial {
                host: host.clone(),
                port,
                source: io::Error::new(io::ErrorKind::TimedOut, "connect timed out"),
            }),
        }
    }

    /// Splits both sockets and drives the two relay directions until the
    /// session is torn down.
    async fn forward(self, destination: TcpStream) {
        let destination_addr = match destination.peer_addr() {
            Ok(addr) => addr,
            Err(e) => {
                warn!(session_id = self.id, "destination socket unusable: {}", e);
                return;
            }
        };

        let state = Arc::new(SessionState::new(
            self.id,
            self.client_addr,
            destination_addr,
        ));

        info!(
            session_id = self.id,
            "TCP forwarding {} <--> {} started", self.client_addr, destination_addr
        );

        // Relay tasks are only ever created once the dial has succeeded.
        state.mark_alive();

        let (client_read, client_write) = self.client.into_split();
        let (destination_read, destination_write) = destination.into_split();

        let buffer_size = self.config.server.buffer_size;
        let upstream = RelayTask::new(
            client_read,
            destination_write,
            Arc::clone(&state),
            RelayDirection::ClientToDestination,
            buffer_size,
        );
        let downstream = RelayTask::new(
            destination_read,
            client_write,
            Arc::clone(&state),
            RelayDirection::DestinationToClient,
            buffer_size,
        );

        let upstream = tokio::spawn(upstream.run());
        let downstream = tokio::spawn(downstream.run());
        state.register_relays(vec![upstream.abort_handle(), downstream.abort_handle()]);

        // An aborted relay is normal teardown; anything else is a bug.
        for relay in [upstream, downstream] {
            if let Err(e) = relay.await {
                if !e.is_cancelled() {
                    error!(session_id = self.id, "relay task failed: {}", e);
                }
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;
    use tokio::time::sleep;

    fn test_state(id: u64) -> SessionState {
        SessionState::new(
            id,
            "127.0.0.1:50001".parse().unwrap(),
            "127.0.0.1:50002".parse().unwrap(),
        )
    }

    #[tokio::test]
    async fn teardown_runs_exactly_once_under_concurrent_reports() {
        let state = Arc::new(test_state(1));
        state.mark_alive();

        let mut reporters = Vec::new();
        for _ in 0..8 {
            let state = Arc::clone(&state);
            reporters.push(tokio::spawn(async move { state.connection_broken() }));
        }

        let mut teardowns = 0;
        for reporter in reporters {
            if reporter.await.unwrap() {
                teardowns += 1;
            }
        }

        assert_eq!(teardowns, 1);
        assert!(!state.is_alive());
    }

    #[tokio::test]
    async fn teardown_only_runs_while_both_connections_are_alive() {
        let state = test_state(2);
        assert_eq!(state.id(), 2);
        assert_eq!(state.client_addr(), "127.0.0.1:50001".parse().unwrap());
        assert_eq!(state.destination_addr(), "127.0.0.1:50002".parse().unwrap());

        // Before the dial succeeds the call is a no-op.
        assert!(!state.connection_broken());

        state.mark_alive();
        assert!(state.connection_broken());
        assert!(!state.connection_broken());
    }

    #[tokio::test]
    async fn teardown_aborts_registered_relays() {
        let state = Arc::new(test_state(3));
        state.mark_alive();

        let first = tokio::spawn(async { sleep(Duration::from_secs(60)).await });
        let second = tokio::spawn(async { sleep(Duration::from_secs(60)).await });
        state.register_relays(vec![first.abort_handle(), second.abort_handle()]);

        assert!(state.connection_broken());
        assert!(first.await.unwrap_err().is_cancelled());
        assert!(second.await.unwrap_err().is_cancelled());
    }

    #[tokio::test]
    async fn late_relay_registration_aborts_the_relays() {
        let state = Arc::new(test_state(4));
        state.mark_alive();
        assert!(state.connection_broken());

        // The session was torn down before the handles arrived; they must
        // not keep running.
        let stuck = tokio::spawn(async { sleep(Duration::from_secs(60)).await });
        state.register_relays(vec![stuck.abort_handle()]);
        assert!(stuck.await.unwrap_err().is_cancelled());
    }
}
