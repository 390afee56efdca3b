//! The fully enriched output unit the pipeline distributes downstream.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::domain::analysis::AnalysisSet;
use crate::domain::indicators::IndicatorSet;
use crate::domain::signal::TradingSignal;
use crate::domain::types::Candle;

/// Provenance/timing metadata attached to every enriched candle, useful for
/// latency dashboards and debugging stale output.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct EnrichmentMetadata {
    pub processed_at: DateTime<Utc>,
    pub processing_time_ms: f64,
    pub history_periods_used: usize,
}

/// One OHLCV candle plus its full indicator set, pattern/regime analysis,
/// and integrated trading signal.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EnrichedCandle {
    pub candle: Candle,
    pub indicators: IndicatorSet,
    pub analysis: AnalysisSet,
    pub signal: TradingSignal,
    pub metadata: EnrichmentMetadata,
}
