//! Process-wide cancellation
//!
//! One [`Shutdown`] owns a `watch` channel; every background loop and the
//! API server hold a [`ShutdownSignal`] cloned from it.

use std::time::Duration;

use tokio::signal;
use tokio::sync::watch;
use tracing::{error, info};

/// Coordinator for graceful shutdown
pub struct Shutdown {
    tx: watch::Sender<bool>,
}

impl Shutdown {
    pub fn new() -> Self {
        let (tx, _) = watch::channel(false);
        Self { tx }
    }

    /// Subscribe to the shutdown signal
    pub fn subscribe(&self) -> ShutdownSignal {
        ShutdownSignal {
            rx: self.tx.subscribe(),
        }
    }

    /// Trigger the shutdown signal
    pub fn trigger(&self) {
        let _ = self.tx.send(true);
    }

    /// Number of live subscribers
    pub fn receiver_count(&self) -> usize {
        self.tx.receiver_count()
    }
}

impl Default for Shutdown {
    fn default() -> Self {
        Self::new()
    }
}

/// Receiving half held by each task
#[derive(Clone)]
pub struct ShutdownSignal {
    rx: watch::Receiver<bool>,
}

impl ShutdownSignal {
    pub fn is_shutdown(&self) -> bool {
        *self.rx.borrow()
    }

    /// Resolve once shutdown has been triggered
    ///
    /// A dropped [`Shutdown`] counts as triggered.
    pub async fn recv(&mut self) {
        if self.is_shutdown() {
            return;
        }
        while self.rx.changed().await.is_ok() {
            if *self.rx.borrow() {
                return;
            }
        }
    }

    /// Sleep for `duration` unless shutdown arrives first
    ///
    /// Returns `true` when the caller should keep going.
    pub async fn pause(&mut self, duration: Duration) -> bool {
        if self.is_shutdown() {
            return false;
        }
        if duration.is_zero() {
            return true;
        }

        let slept = tokio::select! {
            _ = tokio::time::sleep(duration) => true,
            _ = self.recv() => false,
        };
        slept && !self.is_shutdown()
    }
}

/// Wait for Ctrl+C or SIGTERM
pub async fn wait_for_signal() {
    let ctrl_c = async {
        if let Err(e) = signal::ctrl_c().await {
            error!("Failed to listen for Ctrl+C: {}", e);
            std::future::pending::<()>().await;
        }
    };

    #[cfg(unix)]
    let terminate = async {
        match signal::unix::signal(signal::unix::SignalKind::terminate()) {
            Ok(mut sig) => {
                sig.recv().await;
            }
            Err(e) => {
                error!("Failed to install SIGTERM handler: {}", e);
                std::future::pending::<()>().await;
            }
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => info!("Received Ctrl+C"),
        _ = terminate => info!("Received SIGTERM"),
    }
}
