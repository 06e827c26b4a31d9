//! Order reconciliation background service
//!
//! A poller moves NEW orders to PROCESSING and feeds them through a bounded
//! queue to a fixed pool of workers. Each worker resolves one order at a time
//! through [`OrderService::update_order_status`]. Worker errors travel back on
//! a second bounded channel and are logged by the poller; they never stop it.
//!
//! On shutdown the poller stops feeding, workers finish the order in hand,
//! and anything still queued is returned to NEW.

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;

use tokio::sync::mpsc::error::SendTimeoutError;
use tokio::sync::{mpsc, Mutex};
use tokio::task::JoinSet;
use tracing::{debug, error, info, warn};

use super::orders::{OrderService, Transition};
use crate::coordination::ShutdownListener;
use crate::domain::{Order, OrderStatus};
use crate::error::{LedgerError, Result};

/// Configuration for the reconciler
#[derive(Debug, Clone)]
pub struct ReconcilerConfig {
    /// Pause between dispatch cycles
    pub poll_interval: Duration,
    /// Number of concurrent workers
    pub workers: usize,
    /// Capacity of the work queue
    pub queue_capacity: usize,
    /// Capacity of the worker error channel
    pub error_queue_capacity: usize,
    /// How long a worker waits to report an error before dropping it
    pub error_report_timeout: Duration,
}

impl Default for ReconcilerConfig {
    fn default() -> Self {
        Self {
            poll_interval: Duration::from_secs(1),
            workers: 16,
            queue_capacity: 1024,
            error_queue_capacity: 1024,
            error_report_timeout: Duration::from_secs(1),
        }
    }
}

/// Running counters, shared between the poller and workers
#[derive(Debug, Default)]
pub struct ReconcilerStats {
    cycles: AtomicU64,
    dispatched: AtomicU64,
    processed: AtomicU64,
    invalidated: AtomicU64,
    retried: AtomicU64,
    failed: AtomicU64,
    released: AtomicU64,
}

/// Point-in-time copy of [`ReconcilerStats`]
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct StatsSnapshot {
    pub cycles: u64,
    pub dispatched: u64,
    pub processed: u64,
    pub invalidated: u64,
    pub retried: u64,
    pub failed: u64,
    /// Orders returned to NEW by recovery or shutdown
    pub released: u64,
}

impl ReconcilerStats {
    pub fn snapshot(&self) -> StatsSnapshot {
        StatsSnapshot {
            cycles: self.cycles.load(Ordering::Relaxed),
            dispatched: self.dispatched.load(Ordering::Relaxed),
            processed: self.processed.load(Ordering::Relaxed),
            invalidated: self.invalidated.load(Ordering::Relaxed),
            retried: self.retried.load(Ordering::Relaxed),
            failed: self.failed.load(Ordering::Relaxed),
            released: self.released.load(Ordering::Relaxed),
        }
    }

    fn record(&self, outcome: &Result<Transition>) {
        let counter = match outcome {
            Ok(Transition::Processed(_)) => &self.processed,
            Ok(Transition::Invalidated) => &self.invalidated,
            Ok(Transition::Retried) => &self.retried,
            Err(_) => &self.failed,
        };
        counter.fetch_add(1, Ordering::Relaxed);
    }
}

type WorkQueue = Arc<Mutex<mpsc::Receiver<Order>>>;

/// Poller plus worker pool
pub struct Reconciler {
    service: Arc<OrderService>,
    config: ReconcilerConfig,
    stats: Arc<ReconcilerStats>,
}

impl Reconciler {
    pub fn new(service: Arc<OrderService>, config: ReconcilerConfig) -> Self {
        Self {
            service,
            config,
            stats: Arc::new(ReconcilerStats::default()),
        }
    }

    pub fn stats(&self) -> StatsSnapshot {
        self.stats.snapshot()
    }

    /// Run until shutdown is requested or the store fails while dispatching.
    ///
    /// Orders left in PROCESSING by a previous run are released first. An
    /// `Err` means the poller could not read or claim orders; workers still
    /// drain whatever was already queued before this returns.
    pub async fn run(&self, mut shutdown: ShutdownListener) -> Result<()> {
        let recovered = self.service.release_in_flight().await?;
        self.stats
            .released
            .fetch_add(recovered as u64, Ordering::Relaxed);

        let (order_tx, order_rx) = mpsc::channel::<Order>(self.config.queue_capacity.max(1));
        let (error_tx, mut error_rx) =
            mpsc::channel::<LedgerError>(self.config.error_queue_capacity.max(1));
        let queue: WorkQueue = Arc::new(Mutex::new(order_rx));

        let mut workers = JoinSet::new();
        for worker_id in 0..self.config.workers.max(1) {
            workers.spawn(worker(
                worker_id,
                self.service.clone(),
                queue.clone(),
                error_tx.clone(),
                shutdown.clone(),
                self.stats.clone(),
                self.config.error_report_timeout,
            ));
        }
        drop(error_tx);
        info!(
            "Reconciler started with {} workers, polling every {:?}",
            self.config.workers.max(1),
            self.config.poll_interval
        );

        let result = self.dispatch(&order_tx, &mut error_rx, &mut shutdown).await;
        if let Err(e) = &result {
            error!("Reconciler stopped dispatching: {}", e);
        }

        // Closing the sender lets workers exit once the queue is empty
        drop(order_tx);
        while let Some(joined) = workers.join_next().await {
            if let Err(e) = joined {
                error!("Reconciliation worker panicked: {}", e);
            }
        }

        self.release_queued(&queue).await;
        drain_errors(&mut error_rx);

        info!("Reconciler stopped: {:?}", self.stats.snapshot());
        result
    }

    async fn dispatch(
        &self,
        order_tx: &mpsc::Sender<Order>,
        error_rx: &mut mpsc::Receiver<LedgerError>,
        shutdown: &mut ShutdownListener,
    ) -> Result<()> {
        loop {
            if shutdown.is_shutdown() {
                return Ok(());
            }
            drain_errors(error_rx);
            self.stats.cycles.fetch_add(1, Ordering::Relaxed);

            let orders = self.service.orders_for_processing().await?;
            if !orders.is_empty() {
                debug!("Dispatching {} orders", orders.len());
            }

            for mut order in orders {
                if shutdown.is_shutdown() {
                    return Ok(());
                }

                self.service.claim(&order).await?;
                order.status = OrderStatus::Processing;

                tokio::select! {
                    biased;
                    _ = shutdown.cancelled() => {
                        self.release(&order).await;
                        return Ok(());
                    }
                    sent = order_tx.send(order.clone()) => {
                        if sent.is_err() {
                            self.release(&order).await;
                            return Err(LedgerError::Internal(
                                "work queue closed while dispatching".to_string(),
                            ));
                        }
                        self.stats.dispatched.fetch_add(1, Ordering::Relaxed);
                    }
                }
            }

            let pause = tokio::time::sleep(self.config.poll_interval);
            tokio::pin!(pause);
            loop {
                tokio::select! {
                    biased;
                    _ = shutdown.cancelled() => return Ok(()),
                    Some(err) = error_rx.recv() => report(&err),
                    _ = &mut pause => break,
                }
            }
        }
    }

    async fn release(&self, order: &Order) {
        match self.service.release(order).await {
            Ok(()) => {
                self.stats.released.fetch_add(1, Ordering::Relaxed);
            }
            Err(e) => error!("Failed to return order {} to NEW: {}", order.id, e),
        }
    }

    async fn release_queued(&self, queue: &WorkQueue) {
        let mut rx = queue.lock().await;
        rx.close();
        let mut released = 0usize;
        while let Ok(order) = rx.try_recv() {
            self.release(&order).await;
            released += 1;
        }
        if released > 0 {
            info!("Returned {} queued orders to NEW", released);
        }
    }
}

async fn worker(
    worker_id: usize,
    service: Arc<OrderService>,
    queue: WorkQueue,
    errors: mpsc::Sender<LedgerError>,
    mut shutdown: ShutdownListener,
    stats: Arc<ReconcilerStats>,
    report_timeout: Duration,
) {
    debug!("Worker {} started", worker_id);
    loop {
        let next = tokio::select! {
            biased;
            _ = shutdown.cancelled() => None,
            order = async { queue.lock().await.recv().await } => order,
        };
        let Some(order) = next else {
            break;
        };

        let outcome = service.update_order_status(&order).await;
        stats.record(&outcome);

        if let Err(err) = outcome {
            match errors.send_timeout(err, report_timeout).await {
                Ok(()) => {}
                Err(SendTimeoutError::Timeout(err)) | Err(SendTimeoutError::Closed(err)) => {
                    warn!("Worker {} dropped error report: {}", worker_id, err);
                }
            }
        }
    }
    debug!("Worker {} stopped", worker_id);
}

fn report(err: &LedgerError) {
    warn!("Error from reconciliation worker: {}", err);
}

fn drain_errors(error_rx: &mut mpsc::Receiver<LedgerError>) {
    while let Ok(err) = error_rx.try_recv() {
        report(&err);
    }
}
