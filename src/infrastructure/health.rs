//! Health, metrics, and subscriber websocket HTTP surface.

use std::sync::Arc;
use std::time::Instant;

use axum::extract::ws::{Message, WebSocket, WebSocketUpgrade};
use axum::extract::State;
use axum::response::IntoResponse;
use axum::routing::get;
use axum::{Json, Router};
use serde::{Deserialize, Serialize};
use tracing::{debug, warn};

use crate::application::distributor::Distributor;
use crate::domain::timeframe::Timeframe;
use crate::domain::types::Subscription;
use crate::infrastructure::observability::Metrics;

#[derive(Clone)]
pub struct AppState {
    pub metrics: Metrics,
    pub distributor: Arc<Distributor>,
    pub started_at: Instant,
}

#[derive(Serialize)]
struct HealthBody {
    status: &'static str,
    uptime_seconds: u64,
}

async fn healthz(State(state): State<AppState>) -> impl IntoResponse {
    Json(HealthBody {
        status: "ok",
        uptime_seconds: state.started_at.elapsed().as_secs(),
    })
}

async fn metrics(State(state): State<AppState>) -> impl IntoResponse {
    state.metrics.render()
}

#[derive(Deserialize)]
struct SubscribeRequest {
    action: String,
    symbol: String,
    timeframe: String,
}

#[derive(Serialize)]
struct OutboundEnvelope<'a> {
    #[serde(rename = "type")]
    kind: &'static str,
    symbol: &'a str,
    timeframe: String,
    timestamp: chrono::DateTime<chrono::Utc>,
    data: &'a crate::domain::enriched::EnrichedCandle,
}

async fn ws_handler(ws: WebSocketUpgrade, State(state): State<AppState>) -> impl IntoResponse {
    ws.on_upgrade(move |socket| handle_socket(socket, state))
}

/// One sink connection: reads subscribe requests, registers with the
/// Distributor, and forwards every matching enriched candle as the
/// outbound wire envelope.
async fn handle_socket(mut socket: WebSocket, state: AppState) {
    let sink_id = uuid::Uuid::new_v4().to_string();
    let mut subscription = Subscription::new(sink_id.clone());
    let mut receiver = state.distributor.register(subscription.clone()).await;

    loop {
        tokio::select! {
            incoming = socket.recv() => {
                match incoming {
                    Some(Ok(Message::Text(text))) => {
                        match serde_json::from_str::<SubscribeRequest>(&text) {
                            Ok(req) if req.action == "subscribe" => {
                                if let Ok(tf) = req.timeframe.parse::<Timeframe>() {
                                    subscription.pairs.insert((crate::domain::types::Symbol::new(req.symbol), tf));
                                    if let Err(e) = state.distributor.update_subscription(subscription.clone()).await {
                                        warn!(error = %e, "failed to update subscription");
                                    }
                                }
                            }
                            Ok(_) => {}
                            Err(e) => debug!(error = %e, "unrecognized subscriber message, ignoring"),
                        }
                    }
                    Some(Ok(Message::Close(_))) | None => break,
                    Some(Ok(_)) => {}
                    Some(Err(e)) => {
                        debug!(error = %e, "sink socket read error");
                        break;
                    }
                }
            }
            enriched = receiver.recv() => {
                match enriched {
                    Some(ec) => {
                        let envelope = OutboundEnvelope {
                            kind: "enriched_candle",
                            symbol: ec.candle.symbol.as_str(),
                            timeframe: ec.candle.timeframe.to_string(),
                            timestamp: ec.candle.bucket_start,
                            data: &ec,
                        };
                        match serde_json::to_string(&envelope) {
                            Ok(json) => {
                                if socket.send(Message::Text(json.into())).await.is_err() {
                                    break;
                                }
                            }
                            Err(e) => warn!(error = %e, "failed to serialize enriched candle"),
                        }
                    }
                    None => break,
                }
            }
        }
    }

    state.distributor.unregister(&sink_id).await;
}

pub fn router(state: AppState) -> Router {
    Router::new()
        .route("/healthz", get(healthz))
        .route("/metrics", get(metrics))
        .route("/ws", get(ws_handler))
        .with_state(state)
}
