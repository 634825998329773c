//! Market & news freshness service: binary entrypoint.
//! Loads config, wires both pipelines and serves the Axum router on Shuttle.

use anyhow::Context;
use market_news_aggregator::{build_app, telemetry, AppConfig};
use shuttle_axum::ShuttleAxum;

#[shuttle_runtime::main]
async fn axum() -> ShuttleAxum {
    // Load .env in local/dev; no-op in prod environments.
    let _ = dotenvy::dotenv();

    telemetry::init_tracing();

    let cfg = AppConfig::load_default().context("loading freshness config")?;
    let router = build_app(&cfg)?;

    Ok(router.into())
}
