//! Graceful shutdown coordination.
//!
//! A [`ShutdownSignal`] is cloned into every consumer loop. Once triggered,
//! by an OS signal or programmatically, it stays triggered, so a loop that
//! checks it between poll cycles can never miss it.
//!
//! # Example
//!
//! ```rust,ignore
//! use streambridge::shutdown::ShutdownSignal;
//!
//! let shutdown = ShutdownSignal::new();
//! let handle = consumer.spawn_with(shutdown.clone());
//!
//! shutdown.wait().await; // SIGINT / SIGTERM
//! handle.join().await;
//! ```

use std::time::Duration;
use tokio::sync::watch;
use tracing::{error, info, warn};

/// Default time allowed for loops to finish their current cycle.
const DEFAULT_SHUTDOWN_TIMEOUT: Duration = Duration::from_secs(30);

/// A latched, cloneable shutdown flag.
#[derive(Clone, Debug)]
pub struct ShutdownSignal {
    sender: watch::Sender<bool>,
    timeout: Duration,
}

impl ShutdownSignal {
    /// Create a new shutdown signal with default timeout (30 seconds).
    pub fn new() -> Self {
        Self::with_timeout(DEFAULT_SHUTDOWN_TIMEOUT)
    }

    pub fn with_timeout(timeout: Duration) -> Self {
        let (sender, _) = watch::channel(false);
        Self { sender, timeout }
    }

    pub fn timeout(&self) -> Duration {
        self.timeout
    }

    /// Wait for SIGINT or SIGTERM, then trigger shutdown.
    pub async fn wait(&self) {
        let ctrl_c = async {
            if let Err(e) = tokio::signal::ctrl_c().await {
                error!(error = %e, "Failed to install Ctrl+C handler");
                std::future::pending::<()>().await;
            }
        };

        #[cfg(unix)]
        let terminate = async {
            use tokio::signal::unix::{signal, SignalKind};
            match signal(SignalKind::terminate()) {
                Ok(mut stream) => {
                    stream.recv().await;
                }
                Err(e) => {
                    error!(error = %e, "Failed to install SIGTERM handler");
                    std::future::pending::<()>().await;
                }
            }
        };

        #[cfg(not(unix))]
        let terminate = std::future::pending::<()>();

        tokio::select! {
            _ = ctrl_c => {
                info!("Received Ctrl+C, initiating graceful shutdown...");
            }
            _ = terminate => {
                info!("Received SIGTERM, initiating graceful shutdown...");
            }
            _ = self.triggered() => {}
        }

        self.sender.send_replace(true);
    }

    /// Trigger shutdown manually (for tests or programmatic stop).
    pub fn trigger(&self) {
        if !self.sender.send_replace(true) {
            info!("Shutdown triggered programmatically");
        }
    }

    /// Non-blocking check.
    pub fn is_triggered(&self) -> bool {
        *self.sender.borrow()
    }

    /// Resolves once shutdown has been triggered (immediately if it already was).
    pub async fn triggered(&self) {
        let mut receiver = self.sender.subscribe();
        // The sender lives in `self`, so the channel cannot close while we wait
        let _ = receiver.wait_for(|triggered| *triggered).await;
    }

    /// Wait for shutdown, giving up after `timeout`.
    ///
    /// Returns `true` if shutdown was triggered in time.
    pub async fn wait_with_timeout(&self, timeout: Duration) -> bool {
        tokio::select! {
            _ = self.triggered() => true,
            _ = tokio::time::sleep(timeout) => {
                warn!(
                    timeout_ms = timeout.as_millis() as u64,
                    "Shutdown timeout reached"
                );
                false
            }
        }
    }
}

impl Default for ShutdownSignal {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_shutdown_signal_creation() {
        let signal = ShutdownSignal::new();
        assert_eq!(signal.timeout(), Duration::from_secs(30));
        assert!(!signal.is_triggered());
    }

    #[test]
    fn test_custom_timeout() {
        let signal = ShutdownSignal::with_timeout(Duration::from_secs(60));
        assert_eq!(signal.timeout(), Duration::from_secs(60));
    }

    #[tokio::test]
    async fn test_manual_trigger() {
        let signal = ShutdownSignal::new();

        let trigger_signal = signal.clone();
        tokio::spawn(async move {
            tokio::time::sleep(Duration::from_millis(10)).await;
            trigger_signal.trigger();
        });

        let result = tokio::time::timeout(Duration::from_millis(500), signal.triggered()).await;
        assert!(result.is_ok());
        assert!(signal.is_triggered());
    }

    #[tokio::test]
    async fn test_trigger_is_latched() {
        let signal = ShutdownSignal::new();
        signal.trigger();
        signal.trigger();

        // Subscribers created after the trigger still observe it
        let clone = signal.clone();
        assert!(clone.is_triggered());
        assert!(clone.wait_with_timeout(Duration::from_millis(50)).await);
    }

    #[tokio::test]
    async fn test_wait_with_timeout_expires() {
        let signal = ShutdownSignal::new();
        assert!(!signal.wait_with_timeout(Duration::from_millis(20)).await);
    }
}
