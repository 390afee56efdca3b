//! Enrichment Engine: turns each completed [`Candle`] into an
//! [`EnrichedCandle`] by running the indicator, analysis, and signal
//! kernels against a rolling per-(symbol, timeframe) history.

use std::collections::{hash_map::DefaultHasher, HashMap, VecDeque};
use std::hash::{Hash, Hasher};
use std::sync::Arc;
use std::time::{Duration, Instant};

use tokio::sync::{mpsc, RwLock};
use tokio_util::sync::CancellationToken;
use tracing::debug;

use crate::domain::analysis::{detect_candlestick_patterns, detect_chart_patterns, detect_regime, detect_support_resistance, AnalysisSet};
use crate::domain::enriched::{EnrichedCandle, EnrichmentMetadata};
use crate::domain::errors::EnrichmentError;
use crate::domain::indicators::compute_indicators;
use crate::domain::signal::integrate_signal;
use crate::domain::timeframe::Timeframe;
use crate::domain::types::{Candle, Symbol};
use crate::infrastructure::observability::Metrics;

/// Bound on retained history per (symbol, timeframe): generous enough for
/// every indicator window (sma50 being the longest) plus slack for pattern
/// detection, without growing unbounded over a long-running process.
const MAX_HISTORY: usize = 250;

struct CacheEntry {
    bucket_start: chrono::DateTime<chrono::Utc>,
    enriched: EnrichedCandle,
    cached_at: Instant,
}

struct SymbolState {
    history: VecDeque<Candle>,
    cache: Option<CacheEntry>,
}

impl SymbolState {
    fn new() -> Self {
        Self {
            history: VecDeque::with_capacity(MAX_HISTORY),
            cache: None,
        }
    }
}

/// Runs the pure domain kernels (`compute_indicators`, the `analysis`
/// detectors, `integrate_signal`) against a maintained rolling history,
/// fanned out across a fixed worker-task pool keyed by (symbol, timeframe)
/// so results for a given pair are never reordered.
pub struct EnrichmentEngine {
    states: Vec<Arc<RwLock<HashMap<(Symbol, Timeframe), SymbolState>>>>,
    min_history: usize,
    cache_ttl: Duration,
    concurrency: usize,
    metrics: Metrics,
}

impl EnrichmentEngine {
    pub fn new(concurrency: usize, min_history: usize, cache_ttl: Duration, metrics: Metrics) -> Self {
        let concurrency = concurrency.max(1);
        let states = (0..concurrency).map(|_| Arc::new(RwLock::new(HashMap::new()))).collect();
        Self {
            states,
            min_history,
            cache_ttl,
            concurrency,
            metrics,
        }
    }

    fn shard_for(&self, symbol: &Symbol, timeframe: Timeframe) -> usize {
        let mut hasher = DefaultHasher::new();
        symbol.hash(&mut hasher);
        timeframe.hash(&mut hasher);
        (hasher.finish() as usize) % self.concurrency
    }

    /// Enriches one completed candle, maintaining the rolling history for
    /// its (symbol, timeframe) and reusing the cached result when the same
    /// bucket is re-delivered within the TTL.
    pub async fn enrich(&self, candle: Candle) -> EnrichedCandle {
        let shard = self.shard_for(&candle.symbol, candle.timeframe);
        self.enrich_in_shard(shard, candle).await
    }

    async fn enrich_in_shard(&self, shard: usize, candle: Candle) -> EnrichedCandle {
        let mut states = self.states[shard].write().await;
        let key = (candle.symbol.clone(), candle.timeframe);
        let state = states.entry(key).or_insert_with(SymbolState::new);

        if let Some(cached) = &state.cache {
            if cached.bucket_start == candle.bucket_start && cached.cached_at.elapsed() < self.cache_ttl {
                return cached.enriched.clone();
            }
        }

        let started = Instant::now();
        let history: Vec<Candle> = state.history.iter().cloned().collect();

        if history.len() < self.min_history {
            let err = EnrichmentError::InsufficientHistory {
                needed: self.min_history,
                available: history.len(),
            };
            self.metrics
                .insufficient_history_total
                .with_label_values(&[candle.symbol.as_str(), candle.timeframe.to_string().as_str()])
                .inc();
            debug!(symbol = %candle.symbol, timeframe = %candle.timeframe, %err, "enriching with partial history");
        }

        let indicators = compute_indicators(&history, &candle);
        let candlestick_patterns = detect_candlestick_patterns(&history, &candle);
        let chart_patterns = detect_chart_patterns(&history, &candle);
        let regime = detect_regime(&history, &candle);
        let (levels, current_position) = detect_support_resistance(&history, &candle);
        let analysis = AnalysisSet {
            candlestick_patterns,
            chart_patterns,
            regime,
            levels,
            current_position,
        };

        let current_volume = candle.volume as f64;
        let signal = integrate_signal(&indicators, &analysis, current_volume);

        let elapsed = started.elapsed();
        self.metrics
            .enrichment_latency_seconds
            .with_label_values(&[candle.timeframe.to_string().as_str()])
            .observe(elapsed.as_secs_f64());

        let enriched = EnrichedCandle {
            candle: candle.clone(),
            indicators,
            analysis,
            signal,
            metadata: EnrichmentMetadata {
                processed_at: chrono::Utc::now(),
                processing_time_ms: elapsed.as_secs_f64() * 1000.0,
                history_periods_used: history.len(),
            },
        };

        state.history.push_back(candle.clone());
        if state.history.len() > MAX_HISTORY {
            state.history.pop_front();
        }
        state.cache = Some(CacheEntry {
            bucket_start: candle.bucket_start,
            enriched: enriched.clone(),
            cached_at: Instant::now(),
        });

        enriched
    }

    /// Spawns `concurrency` worker tasks plus one dispatcher, and returns
    /// once all of them have exited. The dispatcher routes each candle to
    /// the shard its (symbol, timeframe) hashes to, so a given key is
    /// always enriched by the same task and never reordered, while
    /// distinct keys enrich fully in parallel.
    pub async fn run(self: Arc<Self>, mut input: mpsc::Receiver<Candle>, output: mpsc::Sender<EnrichedCandle>, cancel: CancellationToken) {
        let mut shard_txs = Vec::with_capacity(self.concurrency);
        let mut worker_handles = Vec::with_capacity(self.concurrency);

        for shard in 0..self.concurrency {
            let (tx, mut rx) = mpsc::channel::<Candle>(64);
            shard_txs.push(tx);
            let engine = self.clone();
            let output = output.clone();
            let cancel = cancel.clone();
            worker_handles.push(tokio::spawn(async move {
                loop {
                    tokio::select! {
                        _ = cancel.cancelled() => break,
                        maybe_candle = rx.recv() => {
                            match maybe_candle {
                                Some(candle) => {
                                    let enriched = engine.enrich_in_shard(shard, candle).await;
                                    if output.send(enriched).await.is_err() {
                                        break;
                                    }
                                }
                                None => break,
                            }
                        }
                    }
                }
            }));
        }

        loop {
            tokio::select! {
                _ = cancel.cancelled() => break,
                maybe_candle = input.recv() => {
                    match maybe_candle {
                        Some(candle) => {
                            let shard = self.shard_for(&candle.symbol, candle.timeframe);
                            if shard_txs[shard].send(candle).await.is_err() {
                                break;
                            }
                        }
                        None => break,
                    }
                }
            }
        }

        drop(shard_txs);
        for handle in worker_handles {
            let _ = handle.await;
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rust_decimal_macros::dec;

    fn candle(symbol: &str, bucket_start: chrono::DateTime<chrono::Utc>, close: rust_decimal::Decimal) -> Candle {
        Candle {
            symbol: Symbol::new(symbol),
            timeframe: Timeframe::OneMin,
            bucket_start,
            open: close,
            high: close,
            low: close,
            close,
            volume: 100,
        }
    }

    #[tokio::test]
    async fn enrich_with_short_history_still_produces_output() {
        let engine = EnrichmentEngine::new(2, 50, Duration::from_secs(300), Metrics::default());
        let now = chrono::Utc::now();
        let enriched = engine.enrich(candle("AAPL", now, dec!(100.0))).await;
        assert_eq!(enriched.metadata.history_periods_used, 0);
        assert!(enriched.indicators.sma20.is_none());
    }

    #[tokio::test]
    async fn re_enriching_same_bucket_within_ttl_returns_cached_result() {
        let engine = EnrichmentEngine::new(1, 1, Duration::from_secs(300), Metrics::default());
        let now = chrono::Utc::now();
        let first = engine.enrich(candle("AAPL", now, dec!(100.0))).await;
        let second = engine.enrich(candle("AAPL", now, dec!(100.0))).await;
        assert_eq!(first.metadata.processed_at, second.metadata.processed_at);
    }

    #[tokio::test]
    async fn history_accumulates_across_successive_buckets() {
        let engine = EnrichmentEngine::new(1, 1, Duration::from_secs(300), Metrics::default());
        let base = chrono::Utc::now();
        for i in 0..5 {
            let bucket = base + chrono::Duration::minutes(i);
            engine.enrich(candle("AAPL", bucket, dec!(100.0))).await;
        }
        let last = engine.enrich(candle("AAPL", base + chrono::Duration::minutes(5), dec!(100.0))).await;
        assert_eq!(last.metadata.history_periods_used, 5);
    }
}
