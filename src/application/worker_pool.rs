//! Worker Pool: owns every live [`SymbolWorker`] and routes inbound events
//! to the right one.

use std::collections::HashMap;
use std::sync::Arc;

use tokio::sync::{mpsc, RwLock};
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use crate::application::worker::{SymbolWorker, WorkerStats};
use crate::domain::errors::PoolError;
use crate::domain::timeframe::Timeframe;
use crate::domain::types::{Candle, MarketEvent, Symbol};
use crate::infrastructure::observability::Metrics;

struct WorkerHandle {
    input: mpsc::Sender<MarketEvent>,
    task: tokio::task::JoinHandle<WorkerStats>,
}

/// Routes events to per-(symbol, timeframe) [`SymbolWorker`] tasks, enforces
/// the configured capacity, and merges every worker's output candles into a
/// single stream.
pub struct WorkerPool {
    workers: Arc<RwLock<HashMap<(Symbol, Timeframe), WorkerHandle>>>,
    max_workers: usize,
    worker_buffer_size: usize,
    emit_timeout: std::time::Duration,
    market_timezone: chrono_tz::Tz,
    output: mpsc::Sender<Candle>,
    cancel: CancellationToken,
    metrics: Metrics,
}

impl WorkerPool {
    pub fn new(
        max_workers: usize,
        worker_buffer_size: usize,
        emit_timeout: std::time::Duration,
        market_timezone: chrono_tz::Tz,
        output: mpsc::Sender<Candle>,
        cancel: CancellationToken,
        metrics: Metrics,
    ) -> Self {
        Self {
            workers: Arc::new(RwLock::new(HashMap::new())),
            max_workers,
            worker_buffer_size,
            emit_timeout,
            market_timezone,
            output,
            cancel,
            metrics,
        }
    }

    /// Spins up a worker for `(symbol, timeframe)` if one doesn't already
    /// exist. Returns [`PoolError::CapacityExceeded`] once `max_workers` is
    /// reached.
    pub async fn add_subscription(&self, symbol: Symbol, timeframe: Timeframe) -> Result<(), PoolError> {
        let mut workers = self.workers.write().await;
        let key = (symbol.clone(), timeframe);
        if workers.contains_key(&key) {
            return Ok(());
        }
        if workers.len() >= self.max_workers {
            self.metrics.pool_capacity_rejections_total.inc();
            return Err(PoolError::CapacityExceeded {
                current: workers.len(),
                max: self.max_workers,
            });
        }

        let (tx, rx) = mpsc::channel(self.worker_buffer_size);
        let worker = SymbolWorker::new(symbol.clone(), timeframe, self.market_timezone, self.emit_timeout, self.metrics.clone());
        let output = self.output.clone();
        let cancel = self.cancel.clone();
        let task = tokio::spawn(async move { worker.run(rx, output, cancel).await });

        info!(%symbol, %timeframe, "worker started");
        workers.insert(key, WorkerHandle { input: tx, task });
        Ok(())
    }

    /// Drops the worker for `(symbol, timeframe)`, closing its input channel
    /// so it flushes any open candle and terminates.
    pub async fn remove_subscription(&self, symbol: &Symbol, timeframe: Timeframe) {
        let mut workers = self.workers.write().await;
        if let Some(handle) = workers.remove(&(symbol.clone(), timeframe)) {
            drop(handle.input);
            let _ = handle.task.await;
        }
    }

    /// Routes one event to every worker subscribed to its symbol, across
    /// all timeframes, so each timeframe's worker aggregates independently
    /// from the same tick stream. A worker with a
    /// full input queue has the event dropped for it specifically and
    /// counted; an unsubscribed symbol is dropped silently.
    pub async fn ingest(&self, event: MarketEvent) {
        let workers = self.workers.read().await;
        let mut matched = 0;
        for ((symbol, timeframe), handle) in workers.iter() {
            if symbol != &event.symbol {
                continue;
            }
            matched += 1;
            if handle.input.try_send(event.clone()).is_err() {
                warn!(%symbol, %timeframe, "worker input queue full, event dropped");
            }
        }
        if matched == 0 {
            debug!(symbol = %event.symbol, "no worker subscribed, event dropped");
        }
    }

    pub async fn worker_count(&self) -> usize {
        self.workers.read().await.len()
    }

    /// Stops every worker and waits for its flush-on-stop to complete.
    pub async fn shutdown(&self) {
        let mut workers = self.workers.write().await;
        let handles: Vec<_> = workers.drain().map(|(_, h)| h).collect();
        drop(workers);
        for handle in handles {
            drop(handle.input);
            let _ = handle.task.await;
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn capacity_exceeded_rejects_new_worker() {
        let (tx, _rx) = mpsc::channel(8);
        let pool = WorkerPool::new(
            1,
            8,
            std::time::Duration::from_millis(50),
            chrono_tz::America::New_York,
            tx,
            CancellationToken::new(),
            Metrics::default(),
        );
        pool.add_subscription(Symbol::new("AAPL"), Timeframe::OneMin).await.unwrap();
        let err = pool.add_subscription(Symbol::new("MSFT"), Timeframe::OneMin).await.unwrap_err();
        assert!(matches!(err, PoolError::CapacityExceeded { current: 1, max: 1 }));
    }

    #[tokio::test]
    async fn ingest_without_subscription_is_dropped_silently() {
        let (tx, mut rx) = mpsc::channel(8);
        let pool = WorkerPool::new(
            10,
            8,
            std::time::Duration::from_millis(50),
            chrono_tz::America::New_York,
            tx,
            CancellationToken::new(),
            Metrics::default(),
        );
        let event = MarketEvent::trade(Symbol::new("AAPL"), rust_decimal::Decimal::ONE, 1, chrono::Utc::now());
        pool.ingest(event).await;
        assert!(rx.try_recv().is_err(), "no candle should ever be produced for an unsubscribed symbol");
    }

    #[tokio::test]
    async fn ingest_routes_to_every_timeframe_subscribed_for_the_symbol() {
        let (tx, _rx) = mpsc::channel(8);
        let pool = WorkerPool::new(
            10,
            8,
            std::time::Duration::from_millis(50),
            chrono_tz::America::New_York,
            tx,
            CancellationToken::new(),
            Metrics::default(),
        );
        pool.add_subscription(Symbol::new("AAPL"), Timeframe::OneMin).await.unwrap();
        pool.add_subscription(Symbol::new("AAPL"), Timeframe::FiveMin).await.unwrap();
        let event = MarketEvent::trade(Symbol::new("AAPL"), rust_decimal::Decimal::ONE, 1, chrono::Utc::now());
        pool.ingest(event).await;
        assert_eq!(pool.worker_count().await, 2);
    }
}
