//! Symbol Worker: turns one (symbol, timeframe)'s MarketEvent sequence into
//! a sequence of completed Candles.

use chrono_tz::Tz;
use rust_decimal::Decimal;
use tokio::sync::mpsc;
use tokio::time::{Duration, Instant};
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use crate::domain::timeframe::Timeframe;
use crate::domain::types::{Candle, EventKind, MarketEvent, Symbol};
use crate::infrastructure::observability::Metrics;

/// The worker's private, mutable state: at most one partial candle and the
/// bucket it was opened for.
#[derive(Debug)]
struct Partial {
    bucket_start: chrono::DateTime<chrono::Utc>,
    open: Decimal,
    high: Decimal,
    low: Decimal,
    close: Decimal,
    volume: i64,
}

impl Partial {
    fn from_trade(bucket_start: chrono::DateTime<chrono::Utc>, price: Decimal, volume: i64) -> Self {
        Self {
            bucket_start,
            open: price,
            high: price,
            low: price,
            close: price,
            volume,
        }
    }

    fn apply_trade(&mut self, price: Decimal, volume: i64) {
        if price > self.high {
            self.high = price;
        }
        if price < self.low {
            self.low = price;
        }
        self.close = price;
        self.volume += volume;
    }

    fn build(&self, symbol: Symbol, timeframe: Timeframe) -> Candle {
        Candle {
            symbol,
            timeframe,
            bucket_start: self.bucket_start,
            open: self.open,
            high: self.high,
            low: self.low,
            close: self.close,
            volume: self.volume,
        }
    }
}

/// Counters exposed for observability; cheap atomics would do, but the
/// worker is single-task-owned so plain fields suffice.
#[derive(Debug, Default, Clone, Copy)]
pub struct WorkerStats {
    pub candles_emitted: u64,
    pub events_ingested: u64,
    pub late_events_dropped: u64,
    pub emit_drops: u64,
    pub invariant_rejections: u64,
}

/// One Symbol Worker: owns a single (symbol, timeframe) and the partial
/// candle it is currently building.
pub struct SymbolWorker {
    pub symbol: Symbol,
    pub timeframe: Timeframe,
    market_timezone: Tz,
    emit_timeout: Duration,
    partial: Option<Partial>,
    stats: WorkerStats,
    metrics: Metrics,
}

impl SymbolWorker {
    pub fn new(symbol: Symbol, timeframe: Timeframe, market_timezone: Tz, emit_timeout: Duration, metrics: Metrics) -> Self {
        Self {
            symbol,
            timeframe,
            market_timezone,
            emit_timeout,
            partial: None,
            stats: WorkerStats::default(),
            metrics,
        }
    }

    pub fn stats(&self) -> WorkerStats {
        self.stats
    }

    /// Applies one event to the worker's state, returning a completed
    /// Candle if the event rolled over into a new bucket.
    pub fn ingest(&mut self, event: &MarketEvent) -> Option<Candle> {
        self.stats.events_ingested += 1;
        self.metrics.events_ingested_total.with_label_values(&[self.symbol.as_str()]).inc();
        let bucket = self.timeframe.floor(event.timestamp, self.market_timezone);

        let (price, volume) = match event.kind {
            EventKind::Trade | EventKind::Quote => (event.price, event.volume),
            EventKind::Bar => {
                let ohlc = event.bar_ohlc.expect("bar events always carry bar_ohlc");
                return self.ingest_bar(bucket, ohlc, event.volume);
            }
        };

        match &mut self.partial {
            None => {
                self.partial = Some(Partial::from_trade(bucket, price, volume));
                None
            }
            Some(p) if p.bucket_start == bucket => {
                p.apply_trade(price, volume);
                None
            }
            Some(p) if bucket < p.bucket_start => {
                // A late event only merges into the currently open bucket;
                // anything for a bucket in the past is dropped.
                self.stats.late_events_dropped += 1;
                self.metrics.late_events_dropped_total.with_label_values(&[self.symbol.as_str(), self.timeframe.to_string().as_str()]).inc();
                debug!(symbol = %self.symbol, "dropped late event for closed bucket");
                None
            }
            Some(_) => {
                let completed = self.roll_over(bucket, price, volume);
                Some(completed)
            }
        }
    }

    fn ingest_bar(
        &mut self,
        bucket: chrono::DateTime<chrono::Utc>,
        ohlc: crate::domain::types::BarOhlc,
        volume: i64,
    ) -> Option<Candle> {
        match &self.partial {
            None => {
                self.partial = Some(Partial {
                    bucket_start: bucket,
                    open: ohlc.open,
                    high: ohlc.high,
                    low: ohlc.low,
                    close: ohlc.close,
                    volume,
                });
                None
            }
            Some(p) if p.bucket_start == bucket => {
                // Same native bucket: compose.
                let p = self.partial.as_mut().expect("checked Some above");
                p.high = p.high.max(ohlc.high);
                p.low = p.low.min(ohlc.low);
                p.close = ohlc.close;
                p.volume += volume;
                None
            }
            Some(p) if bucket < p.bucket_start => {
                self.stats.late_events_dropped += 1;
                self.metrics.late_events_dropped_total.with_label_values(&[self.symbol.as_str(), self.timeframe.to_string().as_str()]).inc();
                None
            }
            Some(_) => {
                let completed = self.partial.take().expect("checked Some above").build(self.symbol.clone(), self.timeframe);
                self.partial = Some(Partial {
                    bucket_start: bucket,
                    open: ohlc.open,
                    high: ohlc.high,
                    low: ohlc.low,
                    close: ohlc.close,
                    volume,
                });
                self.stats.candles_emitted += 1;
                self.metrics.candles_emitted_total.with_label_values(&[self.symbol.as_str(), self.timeframe.to_string().as_str()]).inc();
                Some(completed)
            }
        }
    }

    fn roll_over(&mut self, new_bucket: chrono::DateTime<chrono::Utc>, price: Decimal, volume: i64) -> Candle {
        let completed = self
            .partial
            .take()
            .expect("roll_over only called when partial is Some")
            .build(self.symbol.clone(), self.timeframe);
        self.partial = Some(Partial::from_trade(new_bucket, price, volume));
        self.stats.candles_emitted += 1;
        self.metrics.candles_emitted_total.with_label_values(&[self.symbol.as_str(), self.timeframe.to_string().as_str()]).inc();
        completed
    }

    /// Periodic flush: emits the open candle if wall-clock has passed its
    /// bucket-end, even absent further events.
    pub fn flush_if_past_bucket_end(&mut self, now: chrono::DateTime<chrono::Utc>) -> Option<Candle> {
        let bucket_end = self.partial.as_ref().map(|p| self.timeframe.bucket_end(p.bucket_start, self.market_timezone))?;
        if now < bucket_end {
            return None;
        }
        let completed = self.partial.take()?.build(self.symbol.clone(), self.timeframe);
        self.stats.candles_emitted += 1;
        self.metrics.candles_emitted_total.with_label_values(&[self.symbol.as_str(), self.timeframe.to_string().as_str()]).inc();
        Some(completed)
    }

    /// Graceful stop: emits any open candle.
    pub fn stop(&mut self) -> Option<Candle> {
        self.partial.take().map(|p| {
            self.stats.candles_emitted += 1;
            self.metrics.candles_emitted_total.with_label_values(&[self.symbol.as_str(), self.timeframe.to_string().as_str()]).inc();
            p.build(self.symbol.clone(), self.timeframe)
        })
    }

    /// Runs the worker's task loop: consumes events from `input`, emits
    /// completed candles to `output`, and periodically checks for a
    /// timer-driven flush. Exits when `input` closes or `cancel` fires,
    /// flushing any open candle first.
    pub async fn run(
        mut self,
        mut input: mpsc::Receiver<MarketEvent>,
        output: mpsc::Sender<Candle>,
        cancel: CancellationToken,
    ) -> WorkerStats {
        let mut flush_tick = tokio::time::interval(Duration::from_secs(1));
        loop {
            tokio::select! {
                _ = cancel.cancelled() => {
                    if let Some(c) = self.stop() {
                        self.emit(&output, c).await;
                    }
                    break;
                }
                maybe_event = input.recv() => {
                    match maybe_event {
                        Some(event) => {
                            if let Some(candle) = self.ingest(&event) {
                                self.emit(&output, candle).await;
                            }
                        }
                        None => {
                            if let Some(c) = self.stop() {
                                self.emit(&output, c).await;
                            }
                            break;
                        }
                    }
                }
                _ = flush_tick.tick() => {
                    if let Some(candle) = self.flush_if_past_bucket_end(chrono::Utc::now()) {
                        self.emit(&output, candle).await;
                    }
                }
            }
        }
        self.stats()
    }

    async fn emit(&mut self, output: &mpsc::Sender<Candle>, candle: Candle) {
        if let Err(reason) = candle.validate() {
            self.stats.invariant_rejections += 1;
            self.metrics.invariant_rejections_total.with_label_values(&[self.symbol.as_str(), self.timeframe.to_string().as_str()]).inc();
            warn!(symbol = %self.symbol, %reason, "candle invariant violated, rejecting before emission");
            return;
        }
        match tokio::time::timeout(self.emit_timeout, output.send(candle)).await {
            Ok(Ok(())) => {}
            Ok(Err(_)) => {
                // Receiver dropped; nothing further to do, the pool is shutting down.
            }
            Err(_) => {
                self.stats.emit_drops += 1;
                self.metrics.emit_drops_total.with_label_values(&[self.symbol.as_str(), self.timeframe.to_string().as_str()]).inc();
                info!(symbol = %self.symbol, timeout_ms = self.emit_timeout.as_millis() as u64, "emit timed out, candle dropped");
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::{TimeZone, Utc};
    use rust_decimal_macros::dec;

    fn ny() -> Tz {
        chrono_tz::America::New_York
    }

    fn trade_at(y: i32, mo: u32, d: u32, h: u32, mi: u32, s: u32, ms: u32, price: Decimal, volume: i64) -> MarketEvent {
        let ts = ny()
            .with_ymd_and_hms(y, mo, d, h, mi, s)
            .unwrap()
            .with_timezone(&Utc)
            + chrono::Duration::milliseconds(ms as i64);
        MarketEvent::trade(Symbol::new("AAPL"), price, volume, ts)
    }

    #[test]
    fn single_bucket_aggregation_then_rollover_emits_correct_candles() {
        let mut w = SymbolWorker::new(Symbol::new("AAPL"), Timeframe::OneMin, ny(), Duration::from_millis(100), Metrics::default());
        assert!(w.ingest(&trade_at(2024, 1, 2, 9, 30, 0, 100, dec!(100.00), 10)).is_none());
        assert!(w.ingest(&trade_at(2024, 1, 2, 9, 30, 12, 500, dec!(101.50), 5)).is_none());
        assert!(w.ingest(&trade_at(2024, 1, 2, 9, 30, 45, 0, dec!(99.75), 8)).is_none());

        // scenario 2: bucket rollover
        let completed = w
            .ingest(&trade_at(2024, 1, 2, 9, 31, 0, 0, dec!(102.00), 4))
            .expect("rollover should emit the prior bucket");
        assert_eq!(completed.open, dec!(100.00));
        assert_eq!(completed.high, dec!(101.50));
        assert_eq!(completed.low, dec!(99.75));
        assert_eq!(completed.close, dec!(99.75));
        assert_eq!(completed.volume, 23);

        let stopped = w.stop().expect("new bucket should still be open");
        assert_eq!(stopped.open, dec!(102.00));
        assert_eq!(stopped.volume, 4);
    }

    #[test]
    fn late_event_for_closed_bucket_is_dropped_not_merged() {
        let mut w = SymbolWorker::new(Symbol::new("AAPL"), Timeframe::OneMin, ny(), Duration::from_millis(100), Metrics::default());
        w.ingest(&trade_at(2024, 1, 2, 9, 31, 0, 0, dec!(100.0), 1));
        let late = w.ingest(&trade_at(2024, 1, 2, 9, 30, 0, 0, dec!(50.0), 1));
        assert!(late.is_none());
        assert_eq!(w.stats().late_events_dropped, 1);
        let open = w.stop().unwrap();
        assert_eq!(open.open, dec!(100.0));
    }

    #[test]
    fn n_copies_of_same_trade_yield_one_candle_with_summed_volume() {
        let mut w = SymbolWorker::new(Symbol::new("AAPL"), Timeframe::OneMin, ny(), Duration::from_millis(100), Metrics::default());
        for _ in 0..5 {
            assert!(w.ingest(&trade_at(2024, 1, 2, 9, 30, 0, 0, dec!(100.0), 2)).is_none());
        }
        let candle = w.stop().unwrap();
        assert_eq!(candle.volume, 10);
        assert_eq!(candle.open, dec!(100.0));
        assert_eq!(candle.high, dec!(100.0));
        assert_eq!(candle.low, dec!(100.0));
        assert_eq!(candle.close, dec!(100.0));
    }

    #[test]
    fn exact_boundary_trade_belongs_to_new_bucket() {
        let mut w = SymbolWorker::new(Symbol::new("AAPL"), Timeframe::OneMin, ny(), Duration::from_millis(100), Metrics::default());
        w.ingest(&trade_at(2024, 1, 2, 9, 30, 0, 0, dec!(100.0), 1));
        let completed = w.ingest(&trade_at(2024, 1, 2, 9, 31, 0, 0, dec!(101.0), 1));
        assert!(completed.is_some(), "trade exactly at the boundary should close the prior bucket");
    }
}
