// Accrual reconciliation engine
//
// Timer task: every poll interval, snapshot the pending orders and spawn a
// tick that looks them up through a bounded worker pool.
// Writer task: single consumer of the bounded result queue, applies each
// decision to the ledger as a conditional status transition.
//
// Upstream failures only mean "still pending", and so does a ledger that
// rejects one statement. Losing the database itself stops the engine and is
// reported through the handle.

use futures::StreamExt;
use parking_lot::Mutex;
use std::collections::HashSet;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{mpsc, Mutex as AsyncMutex};
use tokio::task::{JoinHandle, JoinSet};
use tokio::time::{interval, timeout, timeout_at, Instant, MissedTickBehavior};
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

use super::client::{AccrualResponse, AccrualSource};
use crate::error::{AccrualError, AppError, AppResult};
use crate::ledger::{models::OrderNumber, LedgerStore};

/// Reconciler configuration
#[derive(Debug, Clone)]
pub struct ReconcilerConfig {
    /// Time between pending-order scans
    pub poll_interval: Duration,
    /// Capacity of the lookup -> writer queue
    pub queue_capacity: usize,
    /// Lookups in flight at once, across one tick
    pub max_concurrent_lookups: usize,
    /// Per-lookup deadline
    pub lookup_timeout: Duration,
    /// How long shutdown waits for in-flight work before aborting it
    pub shutdown_grace: Duration,
}

impl Default for ReconcilerConfig {
    fn default() -> Self {
        Self {
            poll_interval: Duration::from_secs(15),
            queue_capacity: 10,
            max_concurrent_lookups: 16,
            lookup_timeout: Duration::from_secs(5),
            shutdown_grace: Duration::from_secs(5),
        }
    }
}

/// Outcome of one lookup, as queued for the writer
#[derive(Debug)]
struct LookupResult {
    order_number: OrderNumber,
    outcome: Result<AccrualResponse, AccrualError>,
}

pub struct AccrualReconciler {
    ledger: Arc<dyn LedgerStore>,
    source: Arc<dyn AccrualSource>,
    config: ReconcilerConfig,
    /// Orders looked up but not yet written back. Claiming and write-back
    /// both hold this lock, so a pending snapshot never races a settlement.
    in_flight: AsyncMutex<HashSet<OrderNumber>>,
    /// Set when the accrual service asks us to back off
    paused_until: Mutex<Option<Instant>>,
}

/// Running engine. Dropping the handle does not stop the tasks; call `shutdown`.
pub struct ReconcilerHandle {
    cancel: CancellationToken,
    timer: JoinHandle<AppResult<()>>,
    writer: JoinHandle<AppResult<()>>,
    shutdown_grace: Duration,
}

impl ReconcilerHandle {
    /// Resolves once the engine has been asked to stop, including when it
    /// stopped itself after losing the ledger.
    pub async fn wait(&self) {
        self.cancel.cancelled().await;
    }

    /// Stop scheduling ticks, let in-flight work drain, and report how the
    /// engine ended. Ticks and the writer share one grace deadline.
    pub async fn shutdown(mut self) -> AppResult<()> {
        let deadline = Instant::now() + self.shutdown_grace;
        self.cancel.cancel();

        let scanned = match self.timer.await {
            Ok(result) => result,
            Err(e) => Err(AppError::Internal(format!("reconciler timer failed: {}", e))),
        };

        let written = match timeout_at(deadline, &mut self.writer).await {
            Ok(Ok(result)) => result,
            Ok(Err(e)) => Err(AppError::Internal(format!("reconciler writer failed: {}", e))),
            Err(_) => {
                warn!("⚠️ Reconciler writer did not drain within grace period, aborting");
                self.writer.abort();
                Ok(())
            }
        };

        match (scanned, written) {
            (Err(e), written) => {
                if let Err(other) = written {
                    error!("❌ Reconciler writer also failed: {}", other);
                }
                Err(e)
            }
            (Ok(()), written) => {
                if written.is_ok() {
                    info!("✓ Accrual reconciler stopped");
                }
                written
            }
        }
    }
}

impl AccrualReconciler {
    pub fn new(
        ledger: Arc<dyn LedgerStore>,
        source: Arc<dyn AccrualSource>,
        config: ReconcilerConfig,
    ) -> Self {
        Self {
            ledger,
            source,
            config,
            in_flight: AsyncMutex::new(HashSet::new()),
            paused_until: Mutex::new(None),
        }
    }

    /// Start the timer and writer tasks (runs in background)
    pub fn start(self: Arc<Self>) -> ReconcilerHandle {
        let (tx, rx) = mpsc::channel(self.config.queue_capacity);
        let cancel = CancellationToken::new();

        let writer = tokio::spawn(self.clone().run_writer(rx, cancel.clone()));
        let timer = tokio::spawn(self.clone().run_timer(tx, cancel.clone()));

        info!(
            "⏰ Accrual reconciler started (interval {:?}, queue {}, concurrency {})",
            self.config.poll_interval, self.config.queue_capacity, self.config.max_concurrent_lookups
        );

        ReconcilerHandle {
            cancel,
            timer,
            writer,
            shutdown_grace: self.config.shutdown_grace,
        }
    }

    // ========== TIMER ==========

    async fn run_timer(
        self: Arc<Self>,
        tx: mpsc::Sender<LookupResult>,
        cancel: CancellationToken,
    ) -> AppResult<()> {
        let mut ticker = interval(self.config.poll_interval);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
        let mut ticks = JoinSet::new();
        let mut outcome = Ok(());

        loop {
            tokio::select! {
                _ = cancel.cancelled() => break,
                Some(joined) = ticks.join_next(), if !ticks.is_empty() => {
                    if let Err(e) = joined {
                        error!("❌ Reconciliation tick failed: {:?}", e);
                    }
                }
                _ = ticker.tick() => match self.claim_pending().await {
                    Ok(Some(orders)) => {
                        ticks.spawn(self.clone().run_tick(orders, tx.clone()));
                    }
                    Ok(None) => {}
                    Err(e) => {
                        error!("❌ Ledger unreachable, stopping accrual reconciler: {}", e);
                        cancel.cancel();
                        outcome = Err(e);
                        break;
                    }
                },
            }
        }

        // Ticks still running hold their own senders; the writer stops once they finish
        drop(tx);
        let drained = timeout(self.config.shutdown_grace, async {
            while ticks.join_next().await.is_some() {}
        })
        .await;

        if drained.is_err() {
            warn!("⚠️ Aborting {} reconciliation ticks after grace period", ticks.len());
            ticks.abort_all();
            while ticks.join_next().await.is_some() {}
        }

        outcome
    }

    /// Snapshot pending orders and claim the ones not already in flight.
    /// Only a lost database is an error; anything else skips the tick.
    async fn claim_pending(&self) -> AppResult<Option<Vec<OrderNumber>>> {
        if self.is_paused() {
            debug!("Accrual service rate limit in effect, skipping tick");
            return Ok(None);
        }

        let mut in_flight = self.in_flight.lock().await;
        let pending = match self.ledger.list_pending().await {
            Ok(pending) => pending,
            Err(e) if e.is_fatal() => return Err(e),
            Err(e) => {
                warn!("⚠️ Unable to list pending orders, skipping tick: {}", e);
                return Ok(None);
            }
        };

        let claimed: Vec<OrderNumber> = pending
            .into_iter()
            .filter(|order| in_flight.insert(order.clone()))
            .collect();

        if claimed.is_empty() {
            return Ok(None);
        }

        info!("🔄 Reconciling {} pending orders", claimed.len());
        Ok(Some(claimed))
    }

    // ========== TICK ==========

    /// Fan out lookups through a bounded pool; returns when every lookup of
    /// this tick has been queued (or dropped).
    async fn run_tick(self: Arc<Self>, orders: Vec<OrderNumber>, tx: mpsc::Sender<LookupResult>) {
        let this = &self;
        let tx = &tx;

        futures::stream::iter(orders)
            .for_each_concurrent(self.config.max_concurrent_lookups, |order_number| async move {
                if this.is_paused() {
                    this.release(&order_number).await;
                    return;
                }

                let outcome = this.lookup(&order_number).await;
                if let Err(AccrualError::RateLimited { retry_after }) = &outcome {
                    this.pause_for(*retry_after);
                }

                let result = LookupResult {
                    order_number: order_number.clone(),
                    outcome,
                };
                if tx.send(result).await.is_err() {
                    // writer is gone, the engine is stopping
                    this.release(&order_number).await;
                }
            })
            .await;
    }

    async fn lookup(&self, order_number: &OrderNumber) -> Result<AccrualResponse, AccrualError> {
        match timeout(self.config.lookup_timeout, self.source.fetch(order_number)).await {
            Ok(outcome) => outcome,
            Err(_) => Err(AccrualError::Timeout(self.config.lookup_timeout)),
        }
    }

    // ========== WRITER ==========

    async fn run_writer(
        self: Arc<Self>,
        mut rx: mpsc::Receiver<LookupResult>,
        cancel: CancellationToken,
    ) -> AppResult<()> {
        while let Some(result) = rx.recv().await {
            if let Err(e) = self.apply(result).await {
                error!("❌ Ledger write failed, stopping accrual reconciler: {}", e);
                cancel.cancel();
                return Err(e);
            }
        }

        Ok(())
    }

    async fn apply(&self, result: LookupResult) -> AppResult<()> {
        let LookupResult {
            order_number,
            outcome,
        } = result;

        let mut in_flight = self.in_flight.lock().await;
        let written = match outcome {
            Ok(decision) => {
                let update = decision.to_update(order_number.clone());
                self.ledger.apply_reconciliation(&update).await.map(|applied| {
                    if applied {
                        info!("✓ Order {} reconciled: {}", order_number, update.status);
                    }
                })
            }
            Err(AccrualError::RateLimited { retry_after }) => {
                warn!(
                    "⚠️ Accrual service rate limited lookup of {}, pausing {:?}",
                    order_number, retry_after
                );
                Ok(())
            }
            Err(e) => {
                debug!("Order {} stays pending: {}", order_number, e);
                Ok(())
            }
        };

        in_flight.remove(&order_number);
        drop(in_flight);

        match written {
            Err(e) if !e.is_fatal() => {
                warn!("⚠️ Could not reconcile order {}: {}", order_number, e);
                Ok(())
            }
            other => other,
        }
    }

    // ========== BOOKKEEPING ==========

    async fn release(&self, order_number: &OrderNumber) {
        self.in_flight.lock().await.remove(order_number);
    }

    fn is_paused(&self) -> bool {
        let mut paused = self.paused_until.lock();
        match *paused {
            Some(until) if Instant::now() < until => true,
            Some(_) => {
                *paused = None;
                false
            }
            None => false,
        }
    }

    fn pause_for(&self, wait: Duration) {
        let until = Instant::now() + wait;
        let mut paused = self.paused_until.lock();
        if paused.map_or(true, |current| current < until) {
            *paused = Some(until);
        }
    }
}
