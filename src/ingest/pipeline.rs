// src/ingest/pipeline.rs
//! Aggregation: rate-limit gate -> cache/single-flight -> parallel fetch ->
//! dedupe -> snapshot, with the snapshot as a last resort.

use std::sync::Arc;
use std::time::{Duration, Instant as WallInstant};

use chrono::Utc;
use metrics::{counter, gauge, histogram};
use serde::Serialize;
use tokio::task::JoinSet;

use crate::ingest::cache::{CacheStatus, ResultCache};
use crate::ingest::dedup::dedupe;
use crate::ingest::ensure_metrics_described;
use crate::ingest::fallback::FallbackStore;
use crate::ingest::rate_limit::RateLimiter;
use crate::ingest::types::{AggregateResult, FetchError, PipelineItem, SourceProvider};

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum PipelineError {
    /// No source produced a result this cycle (an empty list still counts as a result).
    #[error("all {failed} sources failed ({rate_limited} rate-limited)")]
    AllSourcesFailed { failed: usize, rate_limited: usize },
    /// The live cycle produced nothing and no snapshot exists either.
    #[error("no live data and no snapshot: {0}")]
    FallbackUnavailable(Box<PipelineError>),
    /// The cycle task ended without reporting (panic or runtime shutdown).
    #[error("live cycle aborted before reporting a result")]
    CycleAborted,
}

/// Where an aggregate came from.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum Freshness {
    Live,
    Cached,
    Stale,
    Unavailable,
}

impl Freshness {
    /// Value for the `X-Cache` response header.
    pub fn header_value(self) -> &'static str {
        match self {
            Freshness::Live | Freshness::Unavailable => "MISS",
            Freshness::Cached => "HIT",
            Freshness::Stale => "STALE",
        }
    }

    pub fn is_stale(self) -> bool {
        matches!(self, Freshness::Stale)
    }
}

#[derive(Debug, Clone)]
pub struct Aggregate<T> {
    pub result: AggregateResult<T>,
    pub freshness: Freshness,
    /// Why the live cycle did not produce this result, if it did not.
    pub failure: Option<PipelineError>,
}

impl<T> Aggregate<T> {
    /// Treat "nothing at all" as an error; stale data is still data.
    pub fn into_strict(self) -> Result<Self, PipelineError> {
        match (self.freshness, &self.failure) {
            (Freshness::Unavailable, Some(cause)) => {
                Err(PipelineError::FallbackUnavailable(Box::new(cause.clone())))
            }
            _ => Ok(self),
        }
    }
}

#[derive(Debug, Clone, Copy)]
pub struct PipelineSettings {
    pub cache_ttl: Duration,
    pub fetch_timeout: Duration,
}

pub struct AggregationPipeline<T: PipelineItem> {
    cycle: Arc<LiveCycle<T>>,
    cache: ResultCache<T>,
    cache_ttl: Duration,
}

/// Everything one live cycle needs, shared with the task that runs it.
struct LiveCycle<T: PipelineItem> {
    name: &'static str,
    sources: Vec<Arc<dyn SourceProvider<T>>>,
    limiter: Arc<RateLimiter>,
    fallback: FallbackStore<T>,
    fetch_timeout: Duration,
}

impl<T: PipelineItem> AggregationPipeline<T> {
    pub fn new(
        name: &'static str,
        sources: Vec<Arc<dyn SourceProvider<T>>>,
        limiter: Arc<RateLimiter>,
        fallback: FallbackStore<T>,
        settings: PipelineSettings,
    ) -> Self {
        ensure_metrics_described();
        Self {
            cycle: Arc::new(LiveCycle {
                name,
                sources,
                limiter,
                fallback,
                fetch_timeout: settings.fetch_timeout,
            }),
            cache: ResultCache::new(),
            cache_ttl: settings.cache_ttl,
        }
    }

    pub fn name(&self) -> &'static str {
        self.cycle.name
    }

    pub fn source_count(&self) -> usize {
        self.cycle.sources.len()
    }

    /// Never fails: the worst case is an empty, `Unavailable` aggregate with the cause attached.
    pub async fn aggregate(&self) -> Aggregate<T> {
        let lookup = self
            .cache
            .get_or_compute(self.cache_ttl, || Arc::clone(&self.cycle).run())
            .await;

        let failure = match lookup {
            Ok(hit) if !hit.result.is_empty() => {
                let freshness = match hit.status {
                    CacheStatus::Hit => {
                        counter!("freshness_cache_hits_total", "pipeline" => self.name())
                            .increment(1);
                        Freshness::Cached
                    }
                    CacheStatus::Miss | CacheStatus::Joined => Freshness::Live,
                };
                return Aggregate {
                    result: hit.result,
                    freshness,
                    failure: None,
                };
            }
            Ok(_) => None,
            Err(e) => Some(e),
        };

        match self.cycle.fallback.load().await {
            Some(snapshot) => {
                counter!("freshness_fallback_served_total", "pipeline" => self.name()).increment(1);
                tracing::warn!(
                    target: "pipeline",
                    pipeline = self.name(),
                    items = snapshot.len(),
                    captured_at = %snapshot.captured_at(),
                    "serving last-known-good snapshot"
                );
                Aggregate {
                    result: snapshot,
                    freshness: Freshness::Stale,
                    failure,
                }
            }
            None => {
                tracing::error!(
                    target: "pipeline",
                    pipeline = self.name(),
                    error = ?failure,
                    "no live data and no snapshot"
                );
                Aggregate {
                    result: AggregateResult::empty(Utc::now()),
                    freshness: Freshness::Unavailable,
                    failure,
                }
            }
        }
    }

    /// Drop the cached entry so the next `aggregate` goes upstream.
    pub fn invalidate(&self) {
        self.cache.invalidate();
    }
}

impl<T: PipelineItem> LiveCycle<T> {
    /// One live cycle, spawned by the cache as the single-flight leader. It
    /// owns its inputs, so it finishes (snapshot save included) even when
    /// every caller waiting on it has gone away.
    async fn run(self: Arc<Self>) -> Result<AggregateResult<T>, PipelineError> {
        counter!("freshness_cache_misses_total", "pipeline" => self.name).increment(1);

        let mut set = JoinSet::new();
        let mut rate_limited = 0usize;
        for source in &self.sources {
            if !self.limiter.allow(source.key().as_str()) {
                rate_limited += 1;
                counter!("freshness_rate_limited_total", "pipeline" => self.name).increment(1);
                tracing::debug!(
                    target: "pipeline",
                    pipeline = self.name,
                    source = %source.key(),
                    "rate limited; skipping source"
                );
                continue;
            }
            let source = Arc::clone(source);
            let timeout = self.fetch_timeout;
            set.spawn(async move {
                let res = fetch_with_timeout(source.as_ref(), timeout).await;
                (source.key().clone(), res)
            });
        }

        let mut items = Vec::new();
        let mut succeeded = 0usize;
        let mut failed = 0usize;
        while let Some(joined) = set.join_next().await {
            match joined {
                Ok((_, Ok(batch))) => {
                    succeeded += 1;
                    items.extend(batch);
                }
                Ok((key, Err(e))) => {
                    failed += 1;
                    tracing::warn!(
                        target: "pipeline",
                        pipeline = self.name,
                        source = %key,
                        error = %e,
                        "source fetch failed"
                    );
                }
                Err(join_err) => {
                    failed += 1;
                    tracing::error!(
                        target: "pipeline",
                        pipeline = self.name,
                        error = %join_err,
                        "source task aborted"
                    );
                }
            }
        }

        if succeeded == 0 {
            return Err(PipelineError::AllSourcesFailed {
                failed: failed + rate_limited,
                rate_limited,
            });
        }

        let fetched = items.len();
        let items = dedupe(items);
        let removed = fetched - items.len();
        if removed > 0 {
            counter!("freshness_dedup_total", "pipeline" => self.name).increment(removed as u64);
        }

        let result = AggregateResult::new(items, Utc::now());
        gauge!("freshness_last_cycle_ts", "pipeline" => self.name)
            .set(result.captured_at().timestamp() as f64);
        tracing::info!(
            target: "pipeline",
            pipeline = self.name,
            kept = result.len(),
            dedup = removed,
            succeeded,
            failed,
            rate_limited,
            "live cycle done"
        );

        if !result.is_empty() {
            self.fallback.save(&result).await;
        }
        Ok(result)
    }
}

/// Run one source fetch under a deadline, recording duration and outcome.
pub async fn fetch_with_timeout<T: Send>(
    source: &dyn SourceProvider<T>,
    timeout: Duration,
) -> Result<Vec<T>, FetchError> {
    let started = WallInstant::now();
    let res = match tokio::time::timeout(timeout, source.fetch()).await {
        Ok(r) => r,
        Err(_) => Err(FetchError::Timeout(timeout)),
    };
    histogram!("freshness_fetch_ms").record(started.elapsed().as_secs_f64() * 1_000.0);
    let outcome = match &res {
        Ok(_) => "ok",
        Err(e) => e.kind(),
    };
    counter!("freshness_source_fetch_total", "outcome" => outcome).increment(1);
    res
}
