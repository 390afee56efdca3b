//! Stream Client: the provider session — connect, authenticate, subscribe,
//! decode, reconnect.

use std::sync::Arc;
use std::time::Duration;

use futures_util::{SinkExt, StreamExt};
use rust_decimal::Decimal;
use serde::Deserialize;
use tokio::sync::{mpsc, RwLock};
use tokio_tungstenite::{connect_async, tungstenite::Message};
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

use crate::domain::errors::StreamError;
use crate::domain::types::{BarOhlc, MarketEvent, Symbol};
use crate::infrastructure::observability::Metrics;

/// Interval between outbound keepalive pings.
const PING_INTERVAL: Duration = Duration::from_secs(30);

/// How long a connection can go without a pong before it's treated as
/// half-dead and torn down to force a reconnect.
const PONG_TIMEOUT: Duration = Duration::from_secs(90);

/// One decoded provider message, before it is turned into a `MarketEvent`.
#[derive(Debug)]
enum ProviderMessage {
    Trade { symbol: String, price: Decimal, size: i64, epoch_ms: i64 },
    Bar { symbol: String, ohlc: BarOhlc, size: i64, epoch_ms: i64 },
    Success,
    Error(String),
    Unknown,
}

#[derive(Debug, Deserialize)]
struct RawMessage {
    #[serde(rename = "T")]
    type_code: String,
    #[serde(rename = "S", default)]
    symbol: Option<String>,
    #[serde(rename = "p", default)]
    price: Option<Decimal>,
    #[serde(rename = "s", default)]
    size: Option<i64>,
    #[serde(rename = "t", default)]
    timestamp_ms: Option<i64>,
    #[serde(rename = "o", default)]
    open: Option<Decimal>,
    #[serde(rename = "h", default)]
    high: Option<Decimal>,
    #[serde(rename = "l", default)]
    low: Option<Decimal>,
    #[serde(rename = "c", default)]
    close: Option<Decimal>,
    #[serde(default)]
    message: Option<String>,
}

fn decode_one(raw: RawMessage) -> ProviderMessage {
    match raw.type_code.as_str() {
        "t" => {
            let (Some(symbol), Some(price), Some(size), Some(ts)) = (raw.symbol, raw.price, raw.size, raw.timestamp_ms) else {
                return ProviderMessage::Unknown;
            };
            ProviderMessage::Trade {
                symbol,
                price,
                size,
                epoch_ms: ts,
            }
        }
        "b" => {
            let (Some(symbol), Some(open), Some(high), Some(low), Some(close), Some(ts)) =
                (raw.symbol, raw.open, raw.high, raw.low, raw.close, raw.timestamp_ms)
            else {
                return ProviderMessage::Unknown;
            };
            ProviderMessage::Bar {
                symbol,
                ohlc: BarOhlc { open, high, low, close },
                size: raw.size.unwrap_or(0),
                epoch_ms: ts,
            }
        }
        "success" => ProviderMessage::Success,
        "error" => ProviderMessage::Error(raw.message.unwrap_or_default()),
        _ => ProviderMessage::Unknown,
    }
}

fn decode_payload(text: &str, metrics: &Metrics) -> Vec<ProviderMessage> {
    if let Ok(one) = serde_json::from_str::<RawMessage>(text) {
        return vec![decode_one(one)];
    }
    match serde_json::from_str::<Vec<RawMessage>>(text) {
        Ok(many) => many.into_iter().map(decode_one).collect(),
        Err(e) => {
            metrics.stream_decode_errors_total.inc();
            debug!(error = %e, "failed to decode provider message, skipping");
            vec![]
        }
    }
}

fn to_market_event(msg: ProviderMessage) -> Option<MarketEvent> {
    match msg {
        ProviderMessage::Trade { symbol, price, size, epoch_ms } => {
            let ts = chrono::DateTime::from_timestamp_millis(epoch_ms)?;
            Some(MarketEvent::trade(Symbol::new(symbol), price, size, ts))
        }
        ProviderMessage::Bar { symbol, ohlc, size, epoch_ms } => {
            let ts = chrono::DateTime::from_timestamp_millis(epoch_ms)?;
            Some(MarketEvent::bar(Symbol::new(symbol), ohlc, size, ts))
        }
        ProviderMessage::Success | ProviderMessage::Unknown => None,
        ProviderMessage::Error(reason) => {
            warn!(%reason, "provider reported an error");
            None
        }
    }
}

#[derive(Debug, Clone)]
pub struct ReconnectPolicy {
    pub max_attempts: u32,
    pub initial_delay: Duration,
    pub max_delay: Duration,
}

/// Maintains a live session to the provider and emits decoded
/// [`MarketEvent`]s onto a bounded output queue.
pub struct StreamClient {
    ws_url: String,
    api_key: String,
    api_secret: String,
    subscribed: Arc<RwLock<Vec<String>>>,
    reconnect: ReconnectPolicy,
    output: mpsc::Sender<MarketEvent>,
    drop_count: Arc<std::sync::atomic::AtomicU64>,
    metrics: Metrics,
}

impl StreamClient {
    pub fn new(
        ws_url: String,
        api_key: String,
        api_secret: String,
        reconnect: ReconnectPolicy,
        output: mpsc::Sender<MarketEvent>,
        metrics: Metrics,
    ) -> Self {
        Self {
            ws_url,
            api_key,
            api_secret,
            subscribed: Arc::new(RwLock::new(Vec::new())),
            reconnect,
            output,
            drop_count: Arc::new(std::sync::atomic::AtomicU64::new(0)),
            metrics,
        }
    }

    pub async fn subscribe(&self, symbols: &[Symbol]) {
        let mut set = self.subscribed.write().await;
        for s in symbols {
            let s = s.as_str().to_string();
            if !set.contains(&s) {
                set.push(s);
            }
        }
    }

    pub async fn unsubscribe(&self, symbols: &[Symbol]) {
        let mut set = self.subscribed.write().await;
        set.retain(|s| !symbols.iter().any(|sym| sym.as_str() == s));
    }

    pub fn drop_count(&self) -> u64 {
        self.drop_count.load(std::sync::atomic::Ordering::Relaxed)
    }

    /// Runs the session loop: connect, authenticate, subscribe, read, and
    /// reconnect with capped exponential backoff on failure. Exits when `cancel` fires.
    pub async fn run(&self, cancel: CancellationToken) -> Result<(), StreamError> {
        let mut attempt: u32 = 0;
        let mut delay = self.reconnect.initial_delay;

        loop {
            if cancel.is_cancelled() {
                return Ok(());
            }

            match self.connect_and_stream(&cancel).await {
                Ok(()) => {
                    info!("stream session closed gracefully");
                    return Ok(());
                }
                Err(StreamError::AuthFailure(reason)) => {
                    error!(%reason, "authentication failed, aborting session");
                    return Err(StreamError::AuthFailure(reason));
                }
                Err(e) => {
                    attempt += 1;
                    self.metrics.stream_reconnects_total.inc();
                    if attempt > self.reconnect.max_attempts {
                        return Err(StreamError::ReconnectExhausted { attempts: attempt });
                    }
                    warn!(error = %e, attempt, delay_ms = delay.as_millis() as u64, "stream error, reconnecting");
                    tokio::select! {
                        _ = cancel.cancelled() => return Ok(()),
                        _ = tokio::time::sleep(delay) => {}
                    }
                    delay = (delay * 2).min(self.reconnect.max_delay);
                }
            }
        }
    }

    async fn connect_and_stream(&self, cancel: &CancellationToken) -> Result<(), StreamError> {
        let (ws_stream, _) = connect_async(&self.ws_url)
            .await
            .map_err(|e| StreamError::TransientNetwork(e.to_string()))?;
        let (mut write, mut read) = ws_stream.split();

        let auth_msg = serde_json::json!({
            "action": "auth",
            "key": self.api_key,
            "secret": self.api_secret,
        });
        write
            .send(Message::Text(auth_msg.to_string().into()))
            .await
            .map_err(|e| StreamError::TransientNetwork(e.to_string()))?;

        let symbols = self.subscribed.read().await.clone();
        if !symbols.is_empty() {
            let sub_msg = serde_json::json!({
                "action": "subscribe",
                "trades": symbols,
                "bars": symbols,
            });
            write
                .send(Message::Text(sub_msg.to_string().into()))
                .await
                .map_err(|e| StreamError::TransientNetwork(e.to_string()))?;
        }

        let (ws_tx, mut ws_rx) = mpsc::channel::<Message>(64);
        tokio::spawn(async move {
            while let Some(msg) = ws_rx.recv().await {
                if write.send(msg).await.is_err() {
                    break;
                }
            }
        });

        let ping_tx = ws_tx.clone();
        let ping_cancel = cancel.clone();
        tokio::spawn(async move {
            let mut ticker = tokio::time::interval(PING_INTERVAL);
            loop {
                tokio::select! {
                    _ = ping_cancel.cancelled() => break,
                    _ = ticker.tick() => {
                        if ping_tx.send(Message::Ping(Vec::new().into())).await.is_err() {
                            break;
                        }
                    }
                }
            }
        });

        let mut last_pong = tokio::time::Instant::now();
        let mut liveness_check = tokio::time::interval(PING_INTERVAL);
        liveness_check.tick().await;

        loop {
            tokio::select! {
                _ = cancel.cancelled() => return Ok(()),
                _ = liveness_check.tick() => {
                    if last_pong.elapsed() > PONG_TIMEOUT {
                        warn!(elapsed_s = last_pong.elapsed().as_secs(), "no pong within the keepalive window, forcing reconnect");
                        return Err(StreamError::TransientNetwork("pong timeout".into()));
                    }
                }
                msg = read.next() => {
                    match msg {
                        Some(Ok(Message::Text(text))) => self.handle_text(&text).await,
                        Some(Ok(Message::Ping(_))) => {
                            let _ = ws_tx.send(Message::Pong(Vec::new().into())).await;
                        }
                        Some(Ok(Message::Pong(_))) => {
                            last_pong = tokio::time::Instant::now();
                        }
                        Some(Ok(Message::Close(_))) | None => return Ok(()),
                        Some(Ok(_)) => {}
                        Some(Err(e)) => return Err(StreamError::TransientNetwork(e.to_string())),
                    }
                }
            }
        }
    }

    async fn handle_text(&self, text: &str) {
        for msg in decode_payload(text, &self.metrics) {
            let Some(event) = to_market_event(msg) else { continue };
            if self.output.try_send(event).is_err() {
                self.drop_count.fetch_add(1, std::sync::atomic::Ordering::Relaxed);
                debug!("market event dropped, downstream queue full");
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn trade_message_decodes_to_market_event() {
        let text = r#"{"T":"t","S":"AAPL","p":100.50,"s":10,"t":1704192600100}"#;
        let decoded = decode_payload(text, &Metrics::default());
        assert_eq!(decoded.len(), 1);
        let event = to_market_event(decoded.into_iter().next().unwrap()).expect("valid trade decodes");
        assert_eq!(event.symbol, Symbol::new("AAPL"));
        assert_eq!(event.volume, 10);
    }

    #[test]
    fn array_payload_decodes_every_element() {
        let text = r#"[{"T":"t","S":"AAPL","p":100.0,"s":1,"t":1704192600000},{"T":"success"}]"#;
        let decoded = decode_payload(text, &Metrics::default());
        assert_eq!(decoded.len(), 2);
    }

    #[test]
    fn unknown_type_code_is_ignored_not_erroring() {
        let text = r#"{"T":"subscription_update"}"#;
        let decoded = decode_payload(text, &Metrics::default());
        assert!(matches!(decoded.as_slice(), [ProviderMessage::Unknown]));
    }

    #[test]
    fn bar_message_carries_full_ohlc_without_reaggregation() {
        let text = r#"{"T":"b","S":"MSFT","o":10.0,"h":12.0,"l":9.5,"c":11.0,"s":500,"t":1704192600000}"#;
        let decoded = decode_payload(text, &Metrics::default());
        let event = to_market_event(decoded.into_iter().next().unwrap()).expect("valid bar decodes");
        let ohlc = event.bar_ohlc.expect("bar event carries ohlc");
        assert_eq!(ohlc.high, Decimal::from(12));
        assert_eq!(event.volume, 500);
    }
}
