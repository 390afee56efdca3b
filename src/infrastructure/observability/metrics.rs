//! Prometheus metrics for the pipeline. All metrics use the `candlestream_`
//! prefix.

use prometheus::{
    core::{AtomicF64, GenericGauge},
    CounterVec, Gauge, HistogramOpts, HistogramVec, Opts, Registry, TextEncoder,
};
use std::sync::Arc;

#[derive(Clone)]
pub struct Metrics {
    registry: Arc<Registry>,
    pub candles_emitted_total: CounterVec,
    pub events_ingested_total: CounterVec,
    pub late_events_dropped_total: CounterVec,
    pub emit_drops_total: CounterVec,
    pub invariant_rejections_total: CounterVec,
    pub pool_capacity_rejections_total: prometheus::Counter,
    pub sink_drops_total: CounterVec,
    pub store_failures_total: prometheus::Counter,
    pub stream_reconnects_total: prometheus::Counter,
    pub stream_decode_errors_total: prometheus::Counter,
    pub enrichment_latency_seconds: HistogramVec,
    pub insufficient_history_total: CounterVec,
    pub uptime_seconds: GenericGauge<AtomicF64>,
}

impl Metrics {
    pub fn new() -> anyhow::Result<Self> {
        let registry = Registry::new();

        let candles_emitted_total = CounterVec::new(
            Opts::new("candlestream_candles_emitted_total", "Completed candles emitted per symbol and timeframe"),
            &["symbol", "timeframe"],
        )?;
        registry.register(Box::new(candles_emitted_total.clone()))?;

        let events_ingested_total = CounterVec::new(
            Opts::new("candlestream_events_ingested_total", "Raw market events ingested per symbol"),
            &["symbol"],
        )?;
        registry.register(Box::new(events_ingested_total.clone()))?;

        let late_events_dropped_total = CounterVec::new(
            Opts::new("candlestream_late_events_dropped_total", "Late events dropped for an already-closed bucket"),
            &["symbol", "timeframe"],
        )?;
        registry.register(Box::new(late_events_dropped_total.clone()))?;

        let emit_drops_total = CounterVec::new(
            Opts::new("candlestream_emit_drops_total", "Candles dropped after the emit-timeout elapsed"),
            &["symbol", "timeframe"],
        )?;
        registry.register(Box::new(emit_drops_total.clone()))?;

        let invariant_rejections_total = CounterVec::new(
            Opts::new("candlestream_invariant_rejections_total", "Candles rejected for violating the OHLCV invariant"),
            &["symbol", "timeframe"],
        )?;
        registry.register(Box::new(invariant_rejections_total.clone()))?;

        let pool_capacity_rejections_total = prometheus::Counter::with_opts(Opts::new(
            "candlestream_pool_capacity_rejections_total",
            "addSubscription calls rejected because max_workers was reached",
        ))?;
        registry.register(Box::new(pool_capacity_rejections_total.clone()))?;

        let sink_drops_total = CounterVec::new(
            Opts::new("candlestream_sink_drops_total", "Enriched candles dropped for a slow sink"),
            &["sink_id"],
        )?;
        registry.register(Box::new(sink_drops_total.clone()))?;

        let store_failures_total = prometheus::Counter::with_opts(Opts::new(
            "candlestream_store_failures_total",
            "Store upsert failures (non-fatal, retried)",
        ))?;
        registry.register(Box::new(store_failures_total.clone()))?;

        let stream_reconnects_total = prometheus::Counter::with_opts(Opts::new(
            "candlestream_stream_reconnects_total",
            "Provider stream reconnection attempts",
        ))?;
        registry.register(Box::new(stream_reconnects_total.clone()))?;

        let stream_decode_errors_total = prometheus::Counter::with_opts(Opts::new(
            "candlestream_stream_decode_errors_total",
            "Provider messages that failed to decode",
        ))?;
        registry.register(Box::new(stream_decode_errors_total.clone()))?;

        let enrichment_latency_seconds = HistogramVec::new(
            HistogramOpts::new("candlestream_enrichment_latency_seconds", "Time spent enriching one candle")
                .buckets(vec![0.0001, 0.0005, 0.001, 0.0025, 0.005, 0.01, 0.025, 0.05]),
            &["timeframe"],
        )?;
        registry.register(Box::new(enrichment_latency_seconds.clone()))?;

        let insufficient_history_total = CounterVec::new(
            Opts::new("candlestream_insufficient_history_total", "Enrichments run with less than enrichment_min_history"),
            &["symbol", "timeframe"],
        )?;
        registry.register(Box::new(insufficient_history_total.clone()))?;

        let uptime_seconds = Gauge::with_opts(Opts::new("candlestream_uptime_seconds", "Process uptime in seconds"))?;
        registry.register(Box::new(uptime_seconds.clone()))?;

        Ok(Self {
            registry: Arc::new(registry),
            candles_emitted_total,
            events_ingested_total,
            late_events_dropped_total,
            emit_drops_total,
            invariant_rejections_total,
            pool_capacity_rejections_total,
            sink_drops_total,
            store_failures_total,
            stream_reconnects_total,
            stream_decode_errors_total,
            enrichment_latency_seconds,
            insufficient_history_total,
            uptime_seconds,
        })
    }

    pub fn render(&self) -> String {
        let encoder = TextEncoder::new();
        let metric_families = self.registry.gather();
        encoder.encode_to_string(&metric_families).unwrap_or_default()
    }
}

impl Default for Metrics {
    fn default() -> Self {
        Self::new().expect("metric registration with fixed, non-conflicting names cannot fail")
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn render_includes_registered_metric_names() {
        let metrics = Metrics::new().unwrap();
        metrics.candles_emitted_total.with_label_values(&["AAPL", "1m"]).inc();
        let output = metrics.render();
        assert!(output.contains("candlestream_candles_emitted_total"));
        assert!(output.contains("AAPL"));
    }
}
