// src/ingest/types.rs
use std::borrow::Borrow;
use std::fmt;
use std::time::Duration;

use chrono::{DateTime, Utc};
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};

/// Identity of one upstream endpoint (a quote data symbol or a feed URL).
/// Used as the key for rate limiting and for log/metric labels.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct SourceKey(String);

impl SourceKey {
    pub fn new(key: impl Into<String>) -> Self {
        Self(key.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for SourceKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl Borrow<str> for SourceKey {
    fn borrow(&self) -> &str {
        &self.0
    }
}

impl From<&str> for SourceKey {
    fn from(s: &str) -> Self {
        Self(s.to_string())
    }
}

impl From<String> for SourceKey {
    fn from(s: String) -> Self {
        Self(s)
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Quote {
    pub id: String,
    pub price: f64,
    pub change: f64,
    pub change_percent: f64,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub sparkline: Option<Vec<f64>>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Article {
    pub title: String,
    pub url: String,
    pub published_at: DateTime<Utc>,
    pub author: Option<String>,
    pub summary: Option<String>,
    /// Upstream guid, Atom id or link, whichever came first.
    pub guid: Option<String>,
    pub canonical_id: String,
    pub source_name: String,
    pub source_url: String,
    /// Configured URL this article was fetched from.
    pub feed_url: String,
}

/// Key deciding whether two articles are "the same": guid if non-empty, else url.
pub fn canonical_id(guid: Option<&str>, url: &str) -> String {
    match guid.map(str::trim) {
        Some(g) if !g.is_empty() => g.to_string(),
        _ => url.trim().to_string(),
    }
}

/// Anything the aggregation pipeline can fetch, dedupe, cache and persist.
pub trait PipelineItem: Clone + Send + Sync + Serialize + DeserializeOwned + 'static {
    fn canonical_key(&self) -> &str;
}

impl PipelineItem for Quote {
    fn canonical_key(&self) -> &str {
        &self.id
    }
}

impl PipelineItem for Article {
    fn canonical_key(&self) -> &str {
        &self.canonical_id
    }
}

/// Output of one aggregation cycle. Fields are private so a produced result
/// cannot be patched after it has been handed to the cache or fallback store.
#[derive(Debug, Clone, PartialEq)]
pub struct AggregateResult<T> {
    items: Vec<T>,
    captured_at: DateTime<Utc>,
}

impl<T> AggregateResult<T> {
    pub fn new(items: Vec<T>, captured_at: DateTime<Utc>) -> Self {
        Self { items, captured_at }
    }

    pub fn empty(captured_at: DateTime<Utc>) -> Self {
        Self::new(Vec::new(), captured_at)
    }

    pub fn items(&self) -> &[T] {
        &self.items
    }

    pub fn captured_at(&self) -> DateTime<Utc> {
        self.captured_at
    }

    pub fn len(&self) -> usize {
        self.items.len()
    }

    pub fn is_empty(&self) -> bool {
        self.items.is_empty()
    }

    pub fn into_items(self) -> Vec<T> {
        self.items
    }
}

/// Whole-source failures. Per-item problems never surface here; the item is dropped instead.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum FetchError {
    #[error("upstream timed out after {0:?}")]
    Timeout(Duration),
    #[error("upstream unavailable: {0}")]
    Unavailable(String),
    #[error("upstream returned HTTP {0}")]
    Status(u16),
    #[error("malformed upstream payload: {0}")]
    Parse(String),
}

impl FetchError {
    pub(crate) fn from_reqwest(err: reqwest::Error, timeout: Duration) -> Self {
        if err.is_timeout() {
            FetchError::Timeout(timeout)
        } else if let Some(status) = err.status() {
            FetchError::Status(status.as_u16())
        } else {
            FetchError::Unavailable(err.to_string())
        }
    }

    /// Short label for metrics.
    pub fn kind(&self) -> &'static str {
        match self {
            FetchError::Timeout(_) => "timeout",
            FetchError::Unavailable(_) => "unavailable",
            FetchError::Status(_) => "status",
            FetchError::Parse(_) => "parse",
        }
    }
}

#[async_trait::async_trait]
pub trait SourceProvider<T: Send>: Send + Sync {
    fn key(&self) -> &SourceKey;
    async fn fetch(&self) -> Result<Vec<T>, FetchError>;
}
