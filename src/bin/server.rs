//! Candlestream server: runs the real-time aggregation/enrichment/
//! distribution pipeline headless, exposing health, metrics, and a
//! subscriber websocket over HTTP.

use std::sync::Arc;

use anyhow::Result;
use candlestream::application::pipeline::Pipeline;
use candlestream::config::Config;
use candlestream::domain::types::Symbol;
use candlestream::infrastructure::health::{router, AppState};
use candlestream::infrastructure::store::SqliteStoreAdapter;
use tracing::{info, Level};
use tracing_subscriber::prelude::*;

#[tokio::main]
async fn main() -> Result<()> {
    dotenvy::dotenv().ok();

    tracing_subscriber::registry()
        .with(tracing_subscriber::EnvFilter::from_default_env().add_directive(Level::INFO.into()))
        .with(tracing_subscriber::fmt::layer().with_target(false))
        .init();

    info!("candlestream server {} starting", env!("CARGO_PKG_VERSION"));

    let config = Config::from_env()?;
    info!(market_timezone = %config.pipeline.market_timezone, max_workers = config.pipeline.max_workers, "configuration loaded");

    let store = Arc::new(SqliteStoreAdapter::connect(&config.database_url).await?);

    let pipeline = Arc::new(Pipeline::new(
        config.pipeline.clone(),
        config.provider_ws_url.clone(),
        config.provider_api_key.clone(),
        config.provider_api_secret.clone(),
        store,
    ));

    for symbol in default_symbols() {
        for timeframe in &config.pipeline.supported_timeframes {
            if let Err(e) = pipeline.subscribe(symbol.clone(), *timeframe).await {
                tracing::warn!(%symbol, timeframe = %timeframe, error = %e, "failed to subscribe");
            }
        }
    }

    let pipeline_run = pipeline.clone();
    let pipeline_task = tokio::spawn(async move { pipeline_run.run().await });

    let app_state = AppState {
        metrics: pipeline.metrics.clone(),
        distributor: pipeline.distributor.clone(),
        started_at: std::time::Instant::now(),
    };
    let app = router(app_state);
    let bind_addr = format!("{}:{}", config.observability.bind_address, config.observability.port);
    let listener = tokio::net::TcpListener::bind(&bind_addr).await?;
    info!(%bind_addr, "health/metrics/websocket surface listening");
    let server_task = tokio::spawn(async move {
        if let Err(e) = axum::serve(listener, app).await {
            tracing::error!(error = %e, "http server exited with an error");
        }
    });

    info!("candlestream running, press ctrl+c to shut down");
    tokio::signal::ctrl_c().await?;
    info!("shutdown signal received");

    pipeline.cancel();
    let _ = pipeline_task.await;
    server_task.abort();

    Ok(())
}

/// Placeholder subscription seed until subscriptions are driven by an
/// external control-plane request; every supported timeframe of these
/// symbols starts streaming on launch.
fn default_symbols() -> Vec<Symbol> {
    vec![Symbol::new("AAPL"), Symbol::new("MSFT")]
}
