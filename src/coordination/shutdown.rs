//! Cooperative shutdown signal
//!
//! A single `watch` channel fans the cancellation out to the poller and every
//! worker. Listeners observe it at loop boundaries and dequeue points only;
//! nothing in flight is aborted.

use std::future::Future;
use std::io;
use tokio::sync::watch;
use tracing::{error, info, warn};

/// Owner side of the shutdown signal
#[derive(Debug)]
pub struct Shutdown {
    tx: watch::Sender<bool>,
}

impl Shutdown {
    pub fn new() -> Self {
        let (tx, _) = watch::channel(false);
        Self { tx }
    }

    /// Get a listener for the poller or a worker
    pub fn listener(&self) -> ShutdownListener {
        ShutdownListener {
            rx: self.tx.subscribe(),
        }
    }

    /// Request shutdown; repeated calls are ignored
    pub fn trigger(&self) {
        let already = self.tx.send_replace(true);
        if already {
            warn!("Shutdown already requested, ignoring duplicate signal");
        } else {
            info!("Shutdown requested");
        }
    }

    pub fn is_triggered(&self) -> bool {
        *self.tx.borrow()
    }
}

impl Default for Shutdown {
    fn default() -> Self {
        Self::new()
    }
}

/// Receiving side, cheap to clone
#[derive(Debug, Clone)]
pub struct ShutdownListener {
    rx: watch::Receiver<bool>,
}

impl ShutdownListener {
    pub fn is_shutdown(&self) -> bool {
        *self.rx.borrow()
    }

    /// Resolves once shutdown is requested or the owner is dropped
    pub async fn cancelled(&mut self) {
        // An Err means the sender is gone, which is treated as shutdown
        let _ = self.rx.wait_for(|stopped| *stopped).await;
    }
}

/// Resolve on Ctrl+C or SIGTERM
///
/// A handler that cannot be installed is logged and never fires.
pub async fn shutdown_signal() {
    #[cfg(unix)]
    let terminate = async {
        let mut stream =
            tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate())?;
        stream.recv().await;
        Ok::<(), io::Error>(())
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<io::Result<()>>();

    first_signal(tokio::signal::ctrl_c(), terminate).await;
}

async fn first_signal<C, T>(ctrl_c: C, terminate: T)
where
    C: Future<Output = io::Result<()>>,
    T: Future<Output = io::Result<()>>,
{
    tokio::select! {
        _ = delivered(ctrl_c, "Ctrl+C") => {},
        _ = delivered(terminate, "SIGTERM") => {},
    }
}

async fn delivered<F>(signal: F, name: &str)
where
    F: Future<Output = io::Result<()>>,
{
    if let Err(e) = signal.await {
        error!("Failed to install {} handler: {}", name, e);
        std::future::pending::<()>().await;
    }
}
