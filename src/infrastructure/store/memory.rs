//! In-memory [`StoreAdapter`]: thread-safe, idempotent-by-key, loses state
//! on restart — suitable for tests and single-instance development.

use std::collections::HashMap;
use std::sync::Arc;

use async_trait::async_trait;
use tokio::sync::RwLock;

use crate::application::store::StoreAdapter;
use crate::domain::errors::StoreError;
use crate::domain::timeframe::Timeframe;
use crate::domain::types::{Candle, Symbol};

pub struct InMemoryStoreAdapter {
    rows: Arc<RwLock<HashMap<(Symbol, chrono::DateTime<chrono::Utc>, Timeframe), Candle>>>,
}

impl InMemoryStoreAdapter {
    pub fn new() -> Self {
        Self {
            rows: Arc::new(RwLock::new(HashMap::new())),
        }
    }

    pub async fn len(&self) -> usize {
        self.rows.read().await.len()
    }

    pub async fn get(&self, symbol: &Symbol, bucket_start: chrono::DateTime<chrono::Utc>, timeframe: Timeframe) -> Option<Candle> {
        self.rows.read().await.get(&(symbol.clone(), bucket_start, timeframe)).cloned()
    }
}

impl Default for InMemoryStoreAdapter {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl StoreAdapter for InMemoryStoreAdapter {
    async fn upsert(&self, candle: &Candle) -> Result<(), StoreError> {
        let key = (candle.symbol.clone(), candle.bucket_start, candle.timeframe);
        self.rows.write().await.insert(key, candle.clone());
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rust_decimal_macros::dec;

    fn candle(close: rust_decimal::Decimal) -> Candle {
        Candle {
            symbol: Symbol::new("AAPL"),
            timeframe: Timeframe::OneMin,
            bucket_start: chrono::Utc::now(),
            open: close,
            high: close,
            low: close,
            close,
            volume: 10,
        }
    }

    #[tokio::test]
    async fn upsert_is_idempotent_by_symbol_bucket_timeframe() {
        let store = InMemoryStoreAdapter::new();
        let c = candle(dec!(100));
        store.upsert(&c).await.unwrap();
        store.upsert(&c).await.unwrap();
        assert_eq!(store.len().await, 1);
    }

    #[tokio::test]
    async fn upsert_replaces_prior_value_for_the_same_key() {
        let store = InMemoryStoreAdapter::new();
        let mut c = candle(dec!(100));
        store.upsert(&c).await.unwrap();
        c.close = dec!(105);
        store.upsert(&c).await.unwrap();
        let stored = store.get(&c.symbol, c.bucket_start, c.timeframe).await.unwrap();
        assert_eq!(stored.close, dec!(105));
    }
}
