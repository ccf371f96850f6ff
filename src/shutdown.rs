//! Graceful Shutdown Handling
//!
//! This module provides utilities for handling graceful shutdown of the
//! forward server. It supports SIGTERM and SIGINT signals and ensures
//! active forwarding sessions are drained before the process exits.

use std::sync::Arc;
use std::time::{Duration, Instant};
use tokio::signal;
use tokio::sync::{broadcast, Notify};
use tracing::{debug, info, warn};

use crate::listener::ForwardListener;
use crate::Result;

/// Shutdown coordinator that manages the graceful shutdown process
pub struct ShutdownCoordinator {
    /// Broadcast sender for shutdown signal
    shutdown_tx: broadcast::Sender<()>,
    /// Notification for shutdown completion
    shutdown_complete: Arc<Notify>,
    /// Shutdown timeout duration
    timeout: Duration,
}

impl ShutdownCoordinator {
    /// Create a new shutdown coordinator
    pub fn new(timeout: Duration) -> Self {
        let (shutdown_tx, _) = broadcast::channel(1);
        let shutdown_complete = Arc::new(Notify::new());

        Self {
            shutdown_tx,
            shutdown_complete,
            timeout,
        }
    }

    /// Get a shutdown receiver for components to listen for shutdown signals
    pub fn subscribe(&self) -> broadcast::Receiver<()> {
        self.shutdown_tx.subscribe()
    }

    /// Get a handle to wait for shutdown completion
    pub fn completion_handle(&self) -> Arc<Notify> {
        Arc::clone(&self.shutdown_complete)
    }

    /// Start listening for shutdown signals (SIGTERM, SIGINT)
    pub async fn listen_for_signals(&self) -> Result<()> {
        info!("Starting shutdown signal listener");

        #[cfg(unix)]
        {
            let mut sigterm = signal::unix::signal(signal::unix::SignalKind::terminate())?;
            let mut sigint = signal::unix::signal(signal::unix::SignalKind::interrupt())?;

            tokio::select! {
                _ = sigterm.recv() => {
                    info!("Received SIGTERM, initiating graceful shutdown");
                }
                _ = sigint.recv() => {
                    info!("Received SIGINT, initiating graceful shutdown");
                }
                _ = signal::ctrl_c() => {
                    info!("Received Ctrl+C, initiating graceful shutdown");
                }
            }
        }

        #[cfg(windows)]
        {
            signal::ctrl_c().await?;
            info!("Received Ctrl+C, initiating graceful shutdown");
        }

        // Send shutdown signal to all components
        if let Err(e) = self.shutdown_tx.send(()) {
            warn!("Failed to send shutdown signal: {}", e);
        }

        Ok(())
    }

    /// Perform graceful shutdown of the forward listener
    pub async fn shutdown_listener(&self, listener: &ForwardListener) -> Result<()> {
        info!("Initiating graceful shutdown of forward listener");
        let start_time = Instant::now();

        listener.initiate_shutdown();

        // Wait for active sessions to drain
        let mut last_count = listener.get_active_sessions();
        info!(
            "Waiting for {} active sessions to close (timeout: {:?})",
            last_count, self.timeout
        );

        while last_count > 0 && start_time.elapsed() < self.timeout {
            tokio::time::sleep(Duration::from_millis(500)).await;

            let current_count = listener.get_active_sessions();
            if current_count != last_count {
                debug!("Active sessions: {} -> {}", last_count, current_count);
                last_count = current_count;
            }
        }

        let final_count = listener.get_active_sessions();
        let elapsed = start_time.elapsed();

        if final_count == 0 {
            info!("All sessions closed gracefully in {:?}", elapsed);
        } else {
            warn!(
                "Shutdown timeout reached after {:?} with {} sessions still active",
                elapsed, final_count
            );
        }

        // Notify that shutdown is complete
        self.shutdown_complete.notify_waiters();

        Ok(())
    }

    /// Wait for shutdown completion with timeout
    pub async fn wait_for_completion(&self) -> Result<()> {
        tokio::time::timeout(
            self.timeout + Duration::from_secs(5), // Extra buffer for cleanup
            self.shutdown_complete.notified(),
        )
        .await
        .map_err(|_| anyhow::anyhow!("Shutdown completion timeout"))?;

        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::Config;

    #[tokio::test]
    async fn test_shutdown_coordinator_creation() {
        let coordinator = ShutdownCoordinator::new(Duration::from_secs(5));
        let _receiver = coordinator.subscribe();
        let _completion = coordinator.completion_handle();

        // Should not panic
    }

    #[tokio::test]
    async fn test_shutdown_signal_broadcast() {
        let coordinator = ShutdownCoordinator::new(Duration::from_secs(5));
        let mut receiver = coordinator.subscribe();

        // Send shutdown signal
        coordinator.shutdown_tx.send(()).unwrap();

        // Should receive the signal
        assert!(receiver.recv().await.is_ok());
    }

    #[tokio::test]
    async fn test_idle_listener_drains_immediately() {
        let coordinator = ShutdownCoordinator::new(Duration::from_secs(1));
        let listener = ForwardListener::new(Arc::new(Config::default()));

        coordinator.shutdown_listener(&listener).await.unwrap();

        assert!(listener.is_shutting_down());
        assert_eq!(listener.get_active_sessions(), 0);
    }

    #[tokio::test]
    async fn test_completion_is_observable_by_waiters() {
        let coordinator = Arc::new(ShutdownCoordinator::new(Duration::from_secs(1)));
        let listener = ForwardListener::new(Arc::new(Config::default()));

        let waiter = {
            let coordinator = Arc::clone(&coordinator);
            tokio::spawn(async move { coordinator.wait_for_completion().await })
        };
        // Give the waiter a moment to park on the notification.
        tokio::time::sleep(Duration::from_millis(50)).await;

        coordinator.shutdown_listener(&listener).await.unwrap();
        waiter.await.unwrap().unwrap();
    }
}
