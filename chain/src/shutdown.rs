//! Shutdown coordination for the chain service's background tasks.
//!
//! The signal is latched: a [`ShutdownSignal`] taken after shutdown was
//! triggered resolves immediately, so a task spawned late never outlives
//! `stop()`.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use tokio::signal;
use tokio::sync::broadcast;

/// The process signal that ended [`ShutdownController::wait_for_signal`].
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum OsSignal {
    Interrupt,
    Terminate,
}

pub struct ShutdownController {
    tx: broadcast::Sender<()>,
    triggered: Arc<AtomicBool>,
}

/// One task's view of the shutdown signal. Use `recv` as a `select!` arm.
pub struct ShutdownSignal {
    rx: broadcast::Receiver<()>,
    triggered: Arc<AtomicBool>,
}

impl ShutdownSignal {
    /// Resolves once shutdown has been triggered, including before this
    /// signal was created.
    pub async fn recv(&mut self) {
        if self.triggered.load(Ordering::Acquire) {
            return;
        }
        // Closed also means nobody can trigger shutdown any more.
        let _ = self.rx.recv().await;
    }

    pub fn is_triggered(&self) -> bool {
        self.triggered.load(Ordering::Acquire)
    }
}

impl ShutdownController {
    pub fn new() -> Self {
        let (tx, _) = broadcast::channel(1);
        Self {
            tx,
            triggered: Arc::new(AtomicBool::new(false)),
        }
    }

    pub fn subscribe(&self) -> ShutdownSignal {
        ShutdownSignal {
            rx: self.tx.subscribe(),
            triggered: Arc::clone(&self.triggered),
        }
    }

    pub fn shutdown(&self) {
        if !self.triggered.swap(true, Ordering::AcqRel) {
            let _ = self.tx.send(());
        }
    }

    pub fn is_triggered(&self) -> bool {
        self.triggered.load(Ordering::Acquire)
    }

    /// Block until SIGINT or SIGTERM arrives, trigger shutdown and report
    /// which one it was.
    pub async fn wait_for_signal(&self) -> OsSignal {
        #[cfg(unix)]
        let terminate = async {
            match signal::unix::signal(signal::unix::SignalKind::terminate()) {
                Ok(mut stream) => {
                    stream.recv().await;
                }
                Err(e) => {
                    tracing::warn!(error = %e, "SIGTERM handler unavailable");
                    std::future::pending::<()>().await;
                }
            }
        };
        #[cfg(not(unix))]
        let terminate = std::future::pending::<()>();

        let received = tokio::select! {
            _ = signal::ctrl_c() => OsSignal::Interrupt,
            _ = terminate => OsSignal::Terminate,
        };
        self.shutdown();
        received
    }
}

impl Default for ShutdownController {
    fn default() -> Self {
        Self::new()
    }
}
