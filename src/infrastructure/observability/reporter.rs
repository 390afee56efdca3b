//! Push-based metrics reporter: periodically logs a JSON snapshot of
//! pipeline health, in addition to the pull-based `/metrics` surface.

use std::sync::Arc;
use std::time::{Duration, Instant};

use serde::Serialize;
use tokio_util::sync::CancellationToken;
use tracing::info;

use crate::application::worker_pool::WorkerPool;
use crate::infrastructure::observability::metrics::Metrics;

#[derive(Serialize)]
struct Snapshot {
    uptime_seconds: u64,
    active_workers: usize,
}

/// Emits one structured log line per interval summarizing pipeline
/// health, driven off the same [`Metrics`] registry exposed at `/metrics`.
pub struct MetricsReporter {
    pool: Arc<WorkerPool>,
    metrics: Metrics,
    start: Instant,
    interval: Duration,
}

impl MetricsReporter {
    pub fn new(pool: Arc<WorkerPool>, metrics: Metrics, interval: Duration) -> Self {
        Self {
            pool,
            metrics,
            start: Instant::now(),
            interval,
        }
    }

    pub async fn run(self, cancel: CancellationToken) {
        let mut ticker = tokio::time::interval(self.interval);
        loop {
            tokio::select! {
                _ = cancel.cancelled() => break,
                _ = ticker.tick() => {
                    let uptime = self.start.elapsed().as_secs();
                    self.metrics.uptime_seconds.set(uptime as f64);
                    let snapshot = Snapshot {
                        uptime_seconds: uptime,
                        active_workers: self.pool.worker_count().await,
                    };
                    match serde_json::to_string(&snapshot) {
                        Ok(json) => info!(target: "candlestream::health", "{json}"),
                        Err(e) => info!(error = %e, "failed to serialize metrics snapshot"),
                    }
                }
            }
        }
    }
}
