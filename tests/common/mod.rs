// tests/common/mod.rs
//
// Shared fakes for pipeline and HTTP tests: scripted sources, a canned
// feed loader, and small builders for quotes and articles.
#![allow(dead_code)]

use std::collections::HashMap;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use chrono::{DateTime, TimeZone, Utc};

use market_news_aggregator::ingest::fallback::{FallbackStore, KvStore, MemoryKvStore};
use market_news_aggregator::ingest::pipeline::{AggregationPipeline, PipelineSettings};
use market_news_aggregator::ingest::providers::rss::{FeedDocument, FeedLoader, FeedMeta};
use market_news_aggregator::ingest::rate_limit::RateLimiter;
use market_news_aggregator::ingest::types::{
    canonical_id, AggregateResult, Article, FetchError, PipelineItem, Quote, SourceKey,
    SourceProvider,
};

pub fn t0() -> DateTime<Utc> {
    Utc.with_ymd_and_hms(2025, 9, 6, 9, 0, 0).unwrap()
}

pub fn quote(id: &str, price: f64) -> Quote {
    Quote {
        id: id.to_string(),
        price,
        change: 0.0,
        change_percent: 0.0,
        sparkline: None,
    }
}

pub fn article(guid: Option<&str>, url: &str, source: &str, feed_url: &str) -> Article {
    Article {
        title: format!("{source} story {url}"),
        url: url.to_string(),
        published_at: t0(),
        author: None,
        summary: None,
        guid: guid.map(str::to_string),
        canonical_id: canonical_id(guid, url),
        source_name: source.to_string(),
        source_url: format!("https://{}.test", source.to_lowercase()),
        feed_url: feed_url.to_string(),
    }
}

/// Returns a fixed batch after an optional delay; counts calls.
pub struct StaticSource<T> {
    key: SourceKey,
    items: Vec<T>,
    delay: Duration,
    pub calls: Arc<AtomicUsize>,
}

impl<T> StaticSource<T> {
    pub fn new(key: &str, items: Vec<T>) -> Self {
        Self {
            key: SourceKey::new(key),
            items,
            delay: Duration::ZERO,
            calls: Arc::new(AtomicUsize::new(0)),
        }
    }

    pub fn with_delay(mut self, delay: Duration) -> Self {
        self.delay = delay;
        self
    }

    pub fn calls(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }
}

#[async_trait::async_trait]
impl<T: Clone + Send + Sync + 'static> SourceProvider<T> for StaticSource<T> {
    fn key(&self) -> &SourceKey {
        &self.key
    }

    async fn fetch(&self) -> Result<Vec<T>, FetchError> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        if !self.delay.is_zero() {
            tokio::time::sleep(self.delay).await;
        }
        Ok(self.items.clone())
    }
}

/// Always fails with the given error.
pub struct FailingSource {
    key: SourceKey,
    err: FetchError,
    pub calls: Arc<AtomicUsize>,
}

impl FailingSource {
    pub fn new(key: &str, err: FetchError) -> Self {
        Self {
            key: SourceKey::new(key),
            err,
            calls: Arc::new(AtomicUsize::new(0)),
        }
    }
}

#[async_trait::async_trait]
impl<T: Send + 'static> SourceProvider<T> for FailingSource {
    fn key(&self) -> &SourceKey {
        &self.key
    }

    async fn fetch(&self) -> Result<Vec<T>, FetchError> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        Err(self.err.clone())
    }
}

/// Never answers; only a timeout gets the pipeline past it.
pub struct HangingSource {
    key: SourceKey,
}

impl HangingSource {
    pub fn new(key: &str) -> Self {
        Self {
            key: SourceKey::new(key),
        }
    }
}

#[async_trait::async_trait]
impl<T: Send + 'static> SourceProvider<T> for HangingSource {
    fn key(&self) -> &SourceKey {
        &self.key
    }

    async fn fetch(&self) -> Result<Vec<T>, FetchError> {
        std::future::pending::<()>().await;
        Ok(Vec::new())
    }
}

/// Canned documents per URL; unknown URLs fail as unavailable.
#[derive(Default)]
pub struct MockFeedLoader {
    docs: Mutex<HashMap<String, Result<FeedDocument, FetchError>>>,
    pub calls: AtomicUsize,
}

impl MockFeedLoader {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_articles(self, url: &str, title: &str, articles: Vec<Article>) -> Self {
        let doc = FeedDocument {
            feed: FeedMeta {
                title: title.to_string(),
                link: url.to_string(),
                description: None,
            },
            articles,
        };
        self.docs.lock().unwrap().insert(url.to_string(), Ok(doc));
        self
    }

    pub fn with_error(self, url: &str, err: FetchError) -> Self {
        self.docs.lock().unwrap().insert(url.to_string(), Err(err));
        self
    }

    pub fn calls(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }
}

#[async_trait::async_trait]
impl FeedLoader for MockFeedLoader {
    async fn load(&self, url: &str) -> Result<FeedDocument, FetchError> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        self.docs
            .lock()
            .unwrap()
            .get(url)
            .cloned()
            .unwrap_or_else(|| Err(FetchError::Unavailable(format!("no route to {url}"))))
    }
}

pub fn settings(ttl: Duration, timeout: Duration) -> PipelineSettings {
    PipelineSettings {
        cache_ttl: ttl,
        fetch_timeout: timeout,
    }
}

/// Pipeline over `sources` with an in-memory snapshot store and a generous limiter.
pub fn pipeline<T: PipelineItem>(
    name: &'static str,
    sources: Vec<Arc<dyn SourceProvider<T>>>,
    store: Arc<dyn KvStore>,
    settings: PipelineSettings,
) -> AggregationPipeline<T> {
    AggregationPipeline::new(
        name,
        sources,
        Arc::new(RateLimiter::per_minute(100)),
        FallbackStore::new(store, format!("{name}.snapshot.v1")),
        settings,
    )
}

pub fn memory_store() -> Arc<dyn KvStore> {
    Arc::new(MemoryKvStore::new())
}

/// Seed a snapshot the way a previous healthy cycle would have.
pub async fn seed_snapshot<T: PipelineItem>(store: &Arc<dyn KvStore>, key: &str, items: Vec<T>) {
    FallbackStore::<T>::new(Arc::clone(store), key)
        .save(&AggregateResult::new(items, t0()))
        .await;
}
