//! Forward Listener Implementation

use std::io;
use std::net::SocketAddr;
use std::sync::atomic::{AtomicBool, AtomicU64, AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Instant;

use tokio::net::TcpListener;
use tokio::sync::{broadcast, Semaphore};
use tokio::time::Duration;
use tracing::{debug, error, info, warn};

use crate::config::Config;
use crate::error::ForwardError;
use crate::relay::ConnectionSession;

/// Accepts client connections and spawns a forwarding session for each.
///
/// The accept loop never waits on a running session; every accepted
/// connection is handed to its own task immediately. Sessions beyond the
/// configured `max_sessions` cap are accepted, logged and dropped.
pub struct ForwardListener {
    listener: Option<TcpListener>,
    config: Arc<Config>,
    session_slots: Arc<Semaphore>,
    active_sessions: Arc<AtomicUsize>,
    next_session_id: Arc<AtomicU64>,
    shutdown_flag: Arc<AtomicBool>,
    shutdown_tx: broadcast::Sender<()>,
}

impl ForwardListener {
    pub fn new(config: Arc<Config>) -> Self {
        let session_slots = Arc::new(Semaphore::new(config.server.max_sessions));
        let (shutdown_tx, _) = broadcast::channel(1);

        Self {
            listener: None,
            config,
            session_slots,
            active_sessions: Arc::new(AtomicUsize::new(0)),
            next_session_id: Arc::new(AtomicU64::new(1)),
            shutdown_flag: Arc::new(AtomicBool::new(false)),
            shutdown_tx,
        }
    }

    /// Binds the listening socket and returns the bound address.
    ///
    /// A bind failure is fatal to the whole process; the caller must not
    /// continue in a half-started state.
    pub async fn bind(&mut self) -> Result<SocketAddr, ForwardError> {
        let bind_addr = self.config.server.bind_addr;

        info!("Binding TCP listener to {}", bind_addr);
        let listener = TcpListener::bind(bind_addr)
            .await
            .map_err(|e| ForwardError::Bind {
                addr: bind_addr,
                source: e,
            })?;
        let local_addr = listener.local_addr().map_err(|e| ForwardError::Bind {
            addr: bind_addr,
            source: e,
        })?;

        info!(
            "Forward server started on {} -> {}",
            local_addr, self.config.forward.destination
        );
        self.listener = Some(listener);
        Ok(local_addr)
    }

    /// Binds (if not already bound) and runs the accept loop until the
    /// listening socket fails or shutdown is requested.
    pub async fn start(&mut self) -> Result<(), ForwardError> {
        if self.listener.is_none() {
            self.bind().await?;
        }
        self.accept_connections().await
    }

    /// Main accept loop. Transient per-connection failures keep the loop
    /// alive; a failure of the listening socket itself surfaces as
    /// [`ForwardError::Accept`].
    async fn accept_connections(&self) -> Result<(), ForwardError> {
        let Some(listener) = self.listener.as_ref() else {
            // start() binds before accepting; without a socket there is
            // nothing to serve.
            return Ok(());
        };

        info!("Starting accept loop");
        let mut shutdown_rx = self.shutdown_tx.subscribe();

        loop {
            if self.shutdown_flag.load(Ordering::Relaxed) {
                info!("Shutdown flag set, stopping accept loop");
                break;
            }

            tokio::select! {
                accept_result = listener.accept() => {
                    match accept_result {
                        Ok((client, client_addr)) => {
                            info!("Accepted client from {}", client_addr);

                            if self.shutdown_flag.load(Ordering::Relaxed) {
                                debug!("Rejecting client {} due to shutdown", client_addr);
                                continue;
                            }

                            let slot = match Arc::clone(&self.session_slots).try_acquire_owned() {
                                Ok(slot) => slot,
                                Err(_) => {
                                    warn!(
                                        "Session limit reached ({}), dropping client {}",
                                        self.config.server.max_sessions, client_addr
                                    );
                                    continue;
                                }
                            };

                            let session_id = self.next_session_id.fetch_add(1, Ordering::Relaxed);
                            let session = ConnectionSession::new(
                                session_id,
                                client,
                                client_addr,
                                Arc::clone(&self.config),
                            );

                            let active_sessions = Arc::clone(&self.active_sessions);
                            tokio::spawn(async move {
                                // The slot is held for the whole session lifetime.
                                let _slot = slot;

                                active_sessions.fetch_add(1, Ordering::Relaxed);
                                let started = Instant::now();

                                session.run().await;

                                debug!(session_id, "session closed after {:?}", started.elapsed());
                                active_sessions.fetch_sub(1, Ordering::Relaxed);
                            });
                        }
                        Err(e) if is_transient_accept_error(&e) => {
                            warn!("Transient accept failure: {}", e);
                        }
                        Err(e) => {
                            error!("Listening socket failed: {}", e);
                            return Err(ForwardError::Accept { source: e });
                        }
                    }
                }
                _ = shutdown_rx.recv() => {
                    info!("Received shutdown signal, stopping accept loop");
                    self.shutdown_flag.store(true, Ordering::Relaxed);
                    break;
                }
            }
        }

        info!("Accept loop stopped");
        Ok(())
    }

    /// Number of forwarding sessions currently running
    pub fn get_active_sessions(&self) -> usize {
        self.active_sessions.load(Ordering::Relaxed)
    }

    /// Bound address, once `bind()` has succeeded
    pub fn local_addr(&self) -> Option<SocketAddr> {
        self.listener
            .as_ref()
            .and_then(|listener| listener.local_addr().ok())
    }

    /// Stops the accept loop. Running sessions are not interrupted.
    pub fn initiate_shutdown(&self) {
        info!("Initiating shutdown of forward listener");
        self.shutdown_flag.store(true, Ordering::Relaxed);

        if self.shutdown_tx.send(()).is_err() {
            debug!("No accept loop subscribed to the shutdown signal");
        }
    }

    /// Sender half of the shutdown channel, for stopping the accept loop
    /// after the listener has been moved into its serving task.
    pub fn shutdown_handle(&self) -> broadcast::Sender<()> {
        self.shutdown_tx.clone()
    }

    /// Receiver for components that want to observe shutdown
    pub fn subscribe_shutdown(&self) -> broadcast::Receiver<()> {
        self.shutdown_tx.subscribe()
    }

    /// Whether shutdown has been initiated
    pub fn is_shutting_down(&self) -> bool {
        self.shutdown_flag.load(Ordering::Relaxed)
    }

    /// Waits until all sessions have closed or the configured shutdown
    /// timeout elapses.
    pub async fn wait_for_sessions_to_close(&self) {
        let shutdown_timeout = self.config.server.shutdown_timeout;
        let start_time = Instant::now();

        info!(
            "Waiting for {} active sessions to close (timeout: {:?})",
            self.get_active_sessions(),
            shutdown_timeout
        );

        while self.get_active_sessions() > 0 && start_time.elapsed() < shutdown_timeout {
            debug!(
                "Waiting for {} active sessions to close",
                self.get_active_sessions()
            );
            tokio::time::sleep(Duration::from_millis(500)).await;
        }

        let remaining = self.get_active_sessions();
        let elapsed = start_time.elapsed();

        if remaining == 0 {
            info!("All sessions closed gracefully in {:?}", elapsed);
        } else {
            warn!(
                "Shutdown timeout reached after {:?} with {} sessions still active",
                elapsed, remaining
            );
        }
    }
}

/// Accept failures that affect only the connection being accepted, not
/// the listening socket itself.
fn is_transient_accept_error(e: &io::Error) -> bool {
    matches!(
        e.kind(),
        io::ErrorKind::ConnectionRefused
            | io::ErrorKind::ConnectionAborted
            | io::ErrorKind::ConnectionReset
            | io::ErrorKind::Interrupted
            | io::ErrorKind::WouldBlock
    )
}
