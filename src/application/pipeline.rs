//! Pipeline Wiring: the fixed channel topology connecting the Stream
//! Client, Worker Pool, Enrichment Engine, Distributor, and Store Adapter,
//! plus coordinated shutdown.

use std::sync::Arc;
use std::time::Duration;

use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use crate::application::distributor::Distributor;
use crate::application::enrichment::EnrichmentEngine;
use crate::application::store::StoreAdapter;
use crate::application::worker_pool::WorkerPool;
use crate::config::PipelineEnvConfig;
use crate::domain::timeframe::Timeframe;
use crate::domain::types::{Candle, Symbol};
use crate::infrastructure::observability::{Metrics, MetricsReporter};
use crate::infrastructure::stream_client::{ReconnectPolicy, StreamClient};

/// The maximum time shutdown is allowed to take before remaining tasks are
/// abandoned.
const SHUTDOWN_DEADLINE: Duration = Duration::from_secs(5);

/// How many times a failed store write is retried before being counted as
/// a permanent loss for that candle.
const STORE_RETRY_CAP: u32 = 3;

pub struct Pipeline {
    pub pool: Arc<WorkerPool>,
    pub engine: Arc<EnrichmentEngine>,
    pub distributor: Arc<Distributor>,
    pub stream_client: Arc<StreamClient>,
    pub metrics: Metrics,
    cancel: CancellationToken,
    store: Arc<dyn StoreAdapter>,
    config: PipelineEnvConfig,
    event_rx: std::sync::Mutex<Option<mpsc::Receiver<crate::domain::types::MarketEvent>>>,
    candle_rx: std::sync::Mutex<Option<mpsc::Receiver<Candle>>>,
}

impl Pipeline {
    pub fn new(config: PipelineEnvConfig, provider_ws_url: String, provider_api_key: String, provider_api_secret: String, store: Arc<dyn StoreAdapter>) -> Self {
        let cancel = CancellationToken::new();
        let metrics = Metrics::new().expect("metric registration with fixed, non-conflicting names cannot fail");

        let (event_tx, event_rx) = mpsc::channel(config.event_buffer_size);
        let (candle_tx, candle_rx) = mpsc::channel(config.candle_buffer_size);

        let reconnect = ReconnectPolicy {
            max_attempts: config.reconnect_max_attempts,
            initial_delay: Duration::from_millis(config.reconnect_initial_delay_ms),
            max_delay: Duration::from_millis(config.reconnect_max_delay_ms),
        };
        let stream_client = Arc::new(StreamClient::new(
            provider_ws_url,
            provider_api_key,
            provider_api_secret,
            reconnect,
            event_tx,
            metrics.clone(),
        ));

        let pool = Arc::new(WorkerPool::new(
            config.max_workers,
            config.worker_buffer_size,
            Duration::from_millis(config.emit_timeout_ms),
            config.market_timezone,
            candle_tx,
            cancel.clone(),
            metrics.clone(),
        ));

        let engine = Arc::new(EnrichmentEngine::new(
            config.enrichment_concurrency,
            config.enrichment_min_history,
            Duration::from_secs(config.enrichment_cache_ttl_s),
            metrics.clone(),
        ));

        let distributor = Arc::new(Distributor::new(config.worker_buffer_size, metrics.clone()));

        Self {
            pool,
            engine,
            distributor,
            stream_client,
            metrics,
            cancel,
            store,
            config,
            event_rx: std::sync::Mutex::new(Some(event_rx)),
            candle_rx: std::sync::Mutex::new(Some(candle_rx)),
        }
    }

    /// Subscribes to a (symbol, timeframe) pair end-to-end: starts a Symbol
    /// Worker in the pool and tells the Stream Client to subscribe to the
    /// underlying symbol on the wire.
    pub async fn subscribe(&self, symbol: Symbol, timeframe: Timeframe) -> Result<(), crate::domain::errors::PoolError> {
        self.pool.add_subscription(symbol.clone(), timeframe).await?;
        self.stream_client.subscribe(&[symbol]).await;
        Ok(())
    }

    /// Starts every long-running task that makes up the pipeline: the
    /// stream session, the event-to-pool bridge, the enrichment fan-out,
    /// the store-write task, the distribution task, and the periodic
    /// health reporter. Returns once [`Pipeline::cancel`] has been called
    /// and every task has wound down, or the shutdown deadline elapses.
    pub async fn run(self: Arc<Self>) {
        let mut event_rx = self.event_rx.lock().expect("not poisoned: only run() takes this lock").take().expect("run() called more than once");
        let mut candle_rx = self.candle_rx.lock().expect("not poisoned: only run() takes this lock").take().expect("run() called more than once");

        let stream_task = {
            let client = self.stream_client.clone();
            let cancel = self.cancel.clone();
            tokio::spawn(async move {
                if let Err(e) = client.run(cancel).await {
                    warn!(error = %e, "stream client exited with an error");
                }
            })
        };

        let bridge_task = {
            let pool = self.pool.clone();
            let cancel = self.cancel.clone();
            tokio::spawn(async move {
                loop {
                    tokio::select! {
                        _ = cancel.cancelled() => break,
                        maybe = event_rx.recv() => {
                            match maybe {
                                Some(event) => pool.ingest(event).await,
                                None => break,
                            }
                        }
                    }
                }
            })
        };

        let (enriched_tx, mut enriched_rx) = mpsc::channel(self.config.candle_buffer_size);
        let engine_task = {
            let engine = self.engine.clone();
            let cancel = self.cancel.clone();
            tokio::spawn(async move { engine.run(candle_rx, enriched_tx, cancel).await })
        };

        let (store_tx, mut store_rx) = mpsc::channel::<Candle>(self.config.candle_buffer_size);
        let store_task = {
            let store = self.store.clone();
            let metrics = self.metrics.clone();
            tokio::spawn(async move {
                while let Some(candle) = store_rx.recv().await {
                    let mut attempt = 0;
                    loop {
                        match store.upsert(&candle).await {
                            Ok(()) => break,
                            Err(e) if attempt < STORE_RETRY_CAP => {
                                attempt += 1;
                                metrics.store_failures_total.inc();
                                debug!(error = %e, attempt, "store upsert failed, retrying");
                            }
                            Err(e) => {
                                metrics.store_failures_total.inc();
                                warn!(error = %e, "store upsert failed permanently for this candle");
                                break;
                            }
                        }
                    }
                }
            })
        };

        let distribute_task = {
            let distributor = self.distributor.clone();
            let cancel = self.cancel.clone();
            tokio::spawn(async move {
                loop {
                    tokio::select! {
                        _ = cancel.cancelled() => break,
                        maybe = enriched_rx.recv() => {
                            match maybe {
                                Some(ec) => {
                                    let _ = store_tx.try_send(ec.candle.clone());
                                    distributor.publish(&ec.candle.symbol, ec.candle.timeframe, ec).await;
                                }
                                None => break,
                            }
                        }
                    }
                }
            })
        };

        let reporter_task = {
            let reporter = MetricsReporter::new(self.pool.clone(), self.metrics.clone(), Duration::from_secs(self.config.health_check_interval_s));
            let cancel = self.cancel.clone();
            tokio::spawn(async move { reporter.run(cancel).await })
        };

        info!("pipeline started");
        self.cancel.cancelled().await;

        let shutdown = tokio::time::timeout(SHUTDOWN_DEADLINE, async {
            self.pool.shutdown().await;
            let _ = stream_task.await;
            let _ = bridge_task.await;
            let _ = engine_task.await;
            let _ = distribute_task.await;
            let _ = store_task.await;
            let _ = reporter_task.await;
        })
        .await;

        if shutdown.is_err() {
            warn!("shutdown deadline elapsed, abandoning remaining tasks");
        }
    }

    pub fn cancel(&self) {
        self.cancel.cancel();
    }

    pub fn cancellation_token(&self) -> CancellationToken {
        self.cancel.clone()
    }
}
