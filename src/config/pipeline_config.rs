//! Pipeline configuration parsing from environment variables.

use std::env;
use std::str::FromStr;

use chrono_tz::Tz;

use crate::domain::errors::ConfigError;
use crate::domain::timeframe::Timeframe;

fn env_or<T: FromStr>(key: &str, default: T) -> T {
    env::var(key)
        .ok()
        .and_then(|v| v.parse::<T>().ok())
        .unwrap_or(default)
}

/// Runtime-tunable knobs for the worker pool, stream client, enrichment
/// engine, and distributor.
#[derive(Debug, Clone)]
pub struct PipelineEnvConfig {
    pub max_workers: usize,
    pub event_buffer_size: usize,
    pub candle_buffer_size: usize,
    pub worker_buffer_size: usize,
    pub emit_timeout_ms: u64,
    pub health_check_interval_s: u64,
    pub reconnect_max_attempts: u32,
    pub reconnect_initial_delay_ms: u64,
    pub reconnect_max_delay_ms: u64,
    pub enrichment_concurrency: usize,
    pub enrichment_min_history: usize,
    pub enrichment_cache_ttl_s: u64,
    pub market_timezone: Tz,
    pub supported_timeframes: Vec<Timeframe>,
}

impl Default for PipelineEnvConfig {
    fn default() -> Self {
        Self {
            max_workers: 100,
            event_buffer_size: 10_000,
            candle_buffer_size: 5_000,
            worker_buffer_size: 1_000,
            emit_timeout_ms: 100,
            health_check_interval_s: 30,
            reconnect_max_attempts: 10,
            reconnect_initial_delay_ms: 5_000,
            reconnect_max_delay_ms: 60_000,
            enrichment_concurrency: 4,
            enrichment_min_history: 50,
            enrichment_cache_ttl_s: 300,
            market_timezone: chrono_tz::America::New_York,
            supported_timeframes: Timeframe::all().to_vec(),
        }
    }
}

impl PipelineEnvConfig {
    pub fn from_env() -> Result<Self, ConfigError> {
        let defaults = Self::default();

        let market_timezone = match env::var("MARKET_TIMEZONE") {
            Ok(tz) => tz.parse::<Tz>().map_err(|_| ConfigError::InvalidValue {
                field: "MARKET_TIMEZONE",
                reason: format!("unrecognized IANA timezone '{tz}'"),
            })?,
            Err(_) => defaults.market_timezone,
        };

        let supported_timeframes = match env::var("SUPPORTED_TIMEFRAMES") {
            Ok(raw) => raw
                .split(',')
                .map(|s| s.trim().parse::<Timeframe>())
                .collect::<Result<Vec<_>, _>>()?,
            Err(_) => defaults.supported_timeframes,
        };

        Ok(Self {
            max_workers: env_or("MAX_WORKERS", defaults.max_workers),
            event_buffer_size: env_or("EVENT_BUFFER_SIZE", defaults.event_buffer_size),
            candle_buffer_size: env_or("CANDLE_BUFFER_SIZE", defaults.candle_buffer_size),
            worker_buffer_size: env_or("WORKER_BUFFER_SIZE", defaults.worker_buffer_size),
            emit_timeout_ms: env_or("EMIT_TIMEOUT_MS", defaults.emit_timeout_ms),
            health_check_interval_s: env_or("HEALTH_CHECK_INTERVAL_S", defaults.health_check_interval_s),
            reconnect_max_attempts: env_or("RECONNECT_MAX_ATTEMPTS", defaults.reconnect_max_attempts),
            reconnect_initial_delay_ms: env_or("RECONNECT_INITIAL_DELAY_MS", defaults.reconnect_initial_delay_ms),
            reconnect_max_delay_ms: defaults.reconnect_max_delay_ms,
            enrichment_concurrency: env_or("ENRICHMENT_CONCURRENCY", defaults.enrichment_concurrency),
            enrichment_min_history: env_or("ENRICHMENT_MIN_HISTORY", defaults.enrichment_min_history),
            enrichment_cache_ttl_s: env_or("ENRICHMENT_CACHE_TTL_S", defaults.enrichment_cache_ttl_s),
            market_timezone,
            supported_timeframes,
        })
    }
}
