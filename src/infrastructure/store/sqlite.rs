//! SQLite-backed [`StoreAdapter`]: durable, idempotent raw-candle storage.

use async_trait::async_trait;
use rust_decimal::Decimal;
use sqlx::sqlite::SqlitePoolOptions;
use sqlx::{Row, SqlitePool};

use crate::application::store::StoreAdapter;
use crate::domain::errors::StoreError;
use crate::domain::timeframe::Timeframe;
use crate::domain::types::Candle;

/// Fixed-point precision prices are rounded to before persistence.
const PRICE_SCALE: u32 = 4;

pub struct SqliteStoreAdapter {
    pool: SqlitePool,
}

impl SqliteStoreAdapter {
    pub async fn connect(database_url: &str) -> Result<Self, StoreError> {
        let pool = SqlitePoolOptions::new()
            .max_connections(5)
            .connect(database_url)
            .await
            .map_err(|e| StoreError::Persistence(e.to_string()))?;

        sqlx::query(
            r#"
            CREATE TABLE IF NOT EXISTS ohlcv (
                symbol TEXT NOT NULL,
                timestamp INTEGER NOT NULL,
                timeframe TEXT NOT NULL,
                open TEXT NOT NULL,
                high TEXT NOT NULL,
                low TEXT NOT NULL,
                close TEXT NOT NULL,
                volume INTEGER NOT NULL,
                PRIMARY KEY (symbol, timestamp, timeframe)
            )
            "#,
        )
        .execute(&pool)
        .await
        .map_err(|e| StoreError::Persistence(e.to_string()))?;

        sqlx::query("CREATE INDEX IF NOT EXISTS idx_ohlcv_symbol_timeframe_ts ON ohlcv (symbol, timeframe, timestamp DESC)")
            .execute(&pool)
            .await
            .map_err(|e| StoreError::Persistence(e.to_string()))?;

        Ok(Self { pool })
    }

    pub async fn count(&self) -> Result<i64, StoreError> {
        let row = sqlx::query("SELECT COUNT(*) AS n FROM ohlcv")
            .fetch_one(&self.pool)
            .await
            .map_err(|e| StoreError::Persistence(e.to_string()))?;
        Ok(row.get::<i64, _>("n"))
    }
}

#[async_trait]
impl StoreAdapter for SqliteStoreAdapter {
    async fn upsert(&self, candle: &Candle) -> Result<(), StoreError> {
        let round = |d: Decimal| d.round_dp(PRICE_SCALE).to_string();
        sqlx::query(
            r#"
            INSERT INTO ohlcv (symbol, timestamp, timeframe, open, high, low, close, volume)
            VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8)
            ON CONFLICT (symbol, timestamp, timeframe) DO UPDATE SET
                open = excluded.open,
                high = excluded.high,
                low = excluded.low,
                close = excluded.close,
                volume = excluded.volume
            "#,
        )
        .bind(candle.symbol.as_str())
        .bind(candle.bucket_start.timestamp_millis())
        .bind(candle.timeframe.to_string())
        .bind(round(candle.open))
        .bind(round(candle.high))
        .bind(round(candle.low))
        .bind(round(candle.close))
        .bind(candle.volume)
        .execute(&self.pool)
        .await
        .map_err(|e| StoreError::Persistence(e.to_string()))?;

        Ok(())
    }
}
