//! Distributor: fans enriched candles out to every subscribed sink, in
//! ascending bucket-start order per (symbol, timeframe), dropping the
//! oldest buffered item on a slow sink rather than blocking the pipeline.

use std::collections::HashMap;
use std::sync::Arc;

use tokio::sync::{mpsc, Mutex};
use tracing::warn;

use crate::domain::enriched::EnrichedCandle;
use crate::domain::errors::DistributorError;
use crate::domain::timeframe::Timeframe;
use crate::domain::types::{Subscription, Symbol};
use crate::infrastructure::observability::Metrics;

struct Sink {
    subscription: Subscription,
    sender: mpsc::Sender<EnrichedCandle>,
    drops: u64,
}

/// Registry of live sinks plus the fan-out logic that pushes each
/// `EnrichedCandle` to every subscription whose filter matches.
pub struct Distributor {
    sinks: Arc<Mutex<HashMap<String, Sink>>>,
    sink_buffer_size: usize,
    metrics: Metrics,
}

impl Distributor {
    pub fn new(sink_buffer_size: usize, metrics: Metrics) -> Self {
        Self {
            sinks: Arc::new(Mutex::new(HashMap::new())),
            sink_buffer_size,
            metrics,
        }
    }

    /// Registers a sink and returns the receiver it should drain.
    /// Re-registering the same `sink_id` replaces the prior subscription
    /// and receiver.
    pub async fn register(&self, subscription: Subscription) -> mpsc::Receiver<EnrichedCandle> {
        let (tx, rx) = mpsc::channel(self.sink_buffer_size);
        let mut sinks = self.sinks.lock().await;
        sinks.insert(
            subscription.sink_id.clone(),
            Sink {
                subscription,
                sender: tx,
                drops: 0,
            },
        );
        rx
    }

    pub async fn unregister(&self, sink_id: &str) {
        self.sinks.lock().await.remove(sink_id);
    }

    pub async fn update_subscription(&self, subscription: Subscription) -> Result<(), DistributorError> {
        let mut sinks = self.sinks.lock().await;
        match sinks.get_mut(&subscription.sink_id) {
            Some(sink) => {
                sink.subscription = subscription;
                Ok(())
            }
            None => Err(DistributorError::UnknownSink {
                sink_id: subscription.sink_id,
            }),
        }
    }

    /// Delivers one enriched candle to every sink whose subscription
    /// matches its (symbol, timeframe). A full sink buffer drops the
    /// oldest queued item to make room rather than blocking this call.
    pub async fn publish(&self, symbol: &Symbol, timeframe: Timeframe, candle: EnrichedCandle) {
        let mut sinks = self.sinks.lock().await;
        for sink in sinks.values_mut() {
            if !sink.subscription.matches(symbol, timeframe) {
                continue;
            }
            if let Err(mpsc::error::TrySendError::Full(dropped)) = sink.sender.try_send(candle.clone()) {
                drop(dropped);
                let _ = sink.sender.try_recv();
                if sink.sender.try_send(candle.clone()).is_err() {
                    sink.drops += 1;
                    self.metrics.sink_drops_total.with_label_values(&[sink.subscription.sink_id.as_str()]).inc();
                    warn!(sink_id = %sink.subscription.sink_id, "sink buffer full, candle dropped");
                }
            }
        }
    }

    pub async fn drop_count(&self, sink_id: &str) -> Option<u64> {
        self.sinks.lock().await.get(sink_id).map(|s| s.drops)
    }

    pub async fn sink_count(&self) -> usize {
        self.sinks.lock().await.len()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Utc;
    use rust_decimal_macros::dec;

    fn candle(symbol: &str, bucket_start: chrono::DateTime<chrono::Utc>) -> EnrichedCandle {
        use crate::domain::analysis::AnalysisSet;
        use crate::domain::indicators::IndicatorSet;
        use crate::domain::signal::{RiskLevel, TradingSignal};
        use crate::domain::indicators::Direction;
        use crate::domain::enriched::EnrichmentMetadata;
        use crate::domain::types::Candle;

        EnrichedCandle {
            candle: Candle {
                symbol: Symbol::new(symbol),
                timeframe: Timeframe::OneMin,
                bucket_start,
                open: dec!(1),
                high: dec!(1),
                low: dec!(1),
                close: dec!(1),
                volume: 1,
            },
            indicators: IndicatorSet::default(),
            analysis: AnalysisSet::default(),
            signal: TradingSignal {
                overall: Direction::Neutral,
                confidence: 0.0,
                risk_level: RiskLevel::Low,
            },
            metadata: EnrichmentMetadata {
                processed_at: Utc::now(),
                processing_time_ms: 0.0,
                history_periods_used: 0,
            },
        }
    }

    #[tokio::test]
    async fn publish_only_reaches_matching_subscription() {
        let dist = Distributor::new(4, Metrics::default());
        let mut sub = Subscription::new("sink-a");
        sub.pairs.insert((Symbol::new("AAPL"), Timeframe::OneMin));
        let mut rx = dist.register(sub).await;

        dist.publish(&Symbol::new("AAPL"), Timeframe::OneMin, candle("AAPL", Utc::now())).await;
        dist.publish(&Symbol::new("MSFT"), Timeframe::OneMin, candle("MSFT", Utc::now())).await;

        let received = rx.try_recv().expect("AAPL candle should have arrived");
        assert_eq!(received.candle.symbol, Symbol::new("AAPL"));
        assert!(rx.try_recv().is_err(), "MSFT candle should not have been delivered");
    }

    #[tokio::test]
    async fn full_buffer_drops_oldest_instead_of_blocking() {
        let dist = Distributor::new(1, Metrics::default());
        let mut sub = Subscription::new("sink-a");
        sub.pairs.insert((Symbol::new("AAPL"), Timeframe::OneMin));
        let mut rx = dist.register(sub).await;

        let t0 = Utc::now();
        dist.publish(&Symbol::new("AAPL"), Timeframe::OneMin, candle("AAPL", t0)).await;
        let t1 = t0 + chrono::Duration::minutes(1);
        dist.publish(&Symbol::new("AAPL"), Timeframe::OneMin, candle("AAPL", t1)).await;

        let received = rx.try_recv().expect("newest candle should be retained");
        assert_eq!(received.candle.bucket_start, t1);
    }
}
