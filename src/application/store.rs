//! Store Adapter: the persistence seam the pipeline writes raw candles
//! through.

use async_trait::async_trait;

use crate::domain::errors::StoreError;
use crate::domain::types::Candle;

/// Durable sink for raw OHLCV candles. Implementations must make `upsert`
/// idempotent by `(symbol, bucket_start, timeframe)` so a redelivered
/// candle overwrites rather than duplicates.
#[async_trait]
pub trait StoreAdapter: Send + Sync {
    async fn upsert(&self, candle: &Candle) -> Result<(), StoreError>;
}
