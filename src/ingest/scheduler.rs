// src/ingest/scheduler.rs
use std::sync::Arc;
use std::time::Duration;

use metrics::counter;
use tokio::task::JoinHandle;

use crate::ingest::pipeline::AggregationPipeline;
use crate::ingest::types::{Article, Quote};

#[derive(Clone, Copy, Debug)]
pub struct RefreshSchedulerCfg {
    pub interval_secs: u64,
}

/// Poll both pipelines on a fixed interval so the cache and the snapshot stay
/// warm between client requests. Ticks that land while a cycle is in flight
/// join it through the single-flight cache.
pub fn spawn_refresh_scheduler(
    quotes: Arc<AggregationPipeline<Quote>>,
    news: Arc<AggregationPipeline<Article>>,
    cfg: RefreshSchedulerCfg,
) -> JoinHandle<()> {
    let period = Duration::from_secs(cfg.interval_secs.max(1));
    tokio::spawn(async move {
        let mut ticker = tokio::time::interval(period);
        ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);
        loop {
            ticker.tick().await;
            let (q, n) = tokio::join!(quotes.aggregate(), news.aggregate());

            counter!("freshness_refresh_runs_total").increment(1);
            tracing::info!(
                target: "ingest",
                quotes = q.result.len(),
                quotes_freshness = ?q.freshness,
                articles = n.result.len(),
                news_freshness = ?n.freshness,
                "background refresh tick"
            );
        }
    })
}
