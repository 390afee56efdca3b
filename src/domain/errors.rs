//! Error taxonomy, one enum per component (mirrors the split between
//! `TradingError`/`RiskViolation`/`MarketDataError`/`PortfolioError` kept
//! elsewhere in this workspace), aggregated under [`PipelineError`] at
//! component boundaries that need to report a single failure type.

use thiserror::Error;

/// Errors raised while building or validating configuration.
#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("missing required environment variable {0}")]
    MissingVar(&'static str),

    #[error("invalid value for {field}: {reason}")]
    InvalidValue { field: &'static str, reason: String },
}

/// Errors local to one Symbol Worker.
#[derive(Debug, Error)]
pub enum WorkerError {
    #[error("candle invariant violated for {symbol} @ {bucket_start}: {reason}")]
    InvariantViolation {
        symbol: String,
        bucket_start: i64,
        reason: String,
    },

    #[error("emit timed out after {timeout_ms}ms, candle dropped")]
    BackpressureDrop { timeout_ms: u64 },
}

/// Errors raised by the Worker Pool.
#[derive(Debug, Error)]
pub enum PoolError {
    #[error("worker capacity exceeded: {current}/{max}")]
    CapacityExceeded { current: usize, max: usize },

    #[error("no worker subscribed for {symbol}/{timeframe}")]
    NoSubscription { symbol: String, timeframe: String },
}

/// Errors raised by the provider Stream Client.
#[derive(Debug, Error)]
pub enum StreamError {
    #[error("transient network failure: {0}")]
    TransientNetwork(String),

    #[error("authentication failed: {0}")]
    AuthFailure(String),

    #[error("failed to decode provider message: {0}")]
    DecodeError(String),

    #[error("reconnect attempts exhausted ({attempts} tried)")]
    ReconnectExhausted { attempts: u32 },
}

/// Errors raised while enriching a candle. These never
/// abort enrichment as a whole — the engine downgrades the affected field
/// and keeps going; this type exists so counters and logs can name what
/// happened.
#[derive(Debug, Error)]
pub enum EnrichmentError {
    #[error("insufficient history: needed {needed}, had {available}")]
    InsufficientHistory { needed: usize, available: usize },

    #[error("internal indicator error computing {indicator}: {reason}")]
    InternalIndicatorError {
        indicator: &'static str,
        reason: String,
    },
}

/// Errors raised by the Distributor.
#[derive(Debug, Error)]
pub enum DistributorError {
    #[error("sink {sink_id} buffer full, oldest candle dropped")]
    BackpressureDrop { sink_id: String },

    #[error("sink {sink_id} is not registered")]
    UnknownSink { sink_id: String },
}

/// Errors raised by the Store Adapter. Non-fatal: logged
/// and counted, retried up to a cap, never stop the pipeline.
#[derive(Debug, Error)]
pub enum StoreError {
    #[error("persistence failure: {0}")]
    Persistence(String),
}

/// Top-level error used at wiring boundaries (binary startup, pipeline
/// construction) where a single fallible return type is more convenient
/// than component-specific enums.
#[derive(Debug, Error)]
pub enum PipelineError {
    #[error(transparent)]
    Config(#[from] ConfigError),

    #[error(transparent)]
    Pool(#[from] PoolError),

    #[error(transparent)]
    Stream(#[from] StreamError),

    #[error(transparent)]
    Store(#[from] StoreError),

    #[error("{0}")]
    Other(String),
}
