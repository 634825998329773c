// src/lib.rs
// Public library surface for the binary and integration tests.

pub mod api;
pub mod config;
pub mod ingest;
pub mod telemetry;

pub use crate::api::{router, AppState};
pub use crate::config::AppConfig;

use axum::Router;

/// Build the HTTP app from config: pipelines, optional background refresh,
/// and `/metrics` when enabled. Call after tracing init.
pub fn build_app(cfg: &AppConfig) -> anyhow::Result<Router> {
    let state = AppState::from_config(cfg)?;

    if cfg.refresh.interval_secs > 0 {
        ingest::scheduler::spawn_refresh_scheduler(
            state.quotes.clone(),
            state.news.clone(),
            ingest::scheduler::RefreshSchedulerCfg {
                interval_secs: cfg.refresh.interval_secs,
            },
        );
        tracing::info!(interval_secs = cfg.refresh.interval_secs, "background refresh enabled");
    }

    let mut app = router(state);
    if telemetry::metrics_enabled() {
        let metrics = telemetry::Metrics::init(cfg)?;
        app = app.merge(metrics.router());
    }
    Ok(app)
}
