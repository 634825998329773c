// src/ingest/fallback.rs
//! Last-known-good snapshot, read only when a live cycle yields nothing.
//!
//! Layout: one JSON array of items under a versioned key. Changing how items
//! are shaped or identified means bumping the key, so old snapshots are
//! ignored instead of misread.

use std::collections::HashMap;
use std::marker::PhantomData;
use std::path::PathBuf;
use std::sync::{Arc, Mutex};

use anyhow::{Context, Result};
use chrono::{DateTime, Utc};

use crate::ingest::types::{AggregateResult, PipelineItem};

pub const NEWS_SNAPSHOT_KEY: &str = "news.snapshot.v1";
pub const QUOTES_SNAPSHOT_KEY: &str = "quotes.snapshot.v1";

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StoredValue {
    pub body: String,
    pub written_at: DateTime<Utc>,
}

/// Minimal key-value backend for snapshots.
#[async_trait::async_trait]
pub trait KvStore: Send + Sync {
    async fn get(&self, key: &str) -> Result<Option<StoredValue>>;
    async fn put(&self, key: &str, body: String) -> Result<()>;
}

/// One file per key under `dir`, replaced via write-to-temp + rename.
pub struct FileKvStore {
    dir: PathBuf,
}

impl FileKvStore {
    pub fn new(dir: impl Into<PathBuf>) -> Self {
        Self { dir: dir.into() }
    }

    fn path_for(&self, key: &str) -> PathBuf {
        let file: String = key
            .chars()
            .map(|c| {
                if c.is_ascii_alphanumeric() || matches!(c, '.' | '-' | '_') {
                    c
                } else {
                    '_'
                }
            })
            .collect();
        self.dir.join(format!("{file}.json"))
    }
}

#[async_trait::async_trait]
impl KvStore for FileKvStore {
    async fn get(&self, key: &str) -> Result<Option<StoredValue>> {
        let path = self.path_for(key);
        let body = match tokio::fs::read_to_string(&path).await {
            Ok(s) => s,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(None),
            Err(e) => {
                return Err(e).with_context(|| format!("reading snapshot {}", path.display()))
            }
        };
        let written_at = tokio::fs::metadata(&path)
            .await
            .ok()
            .and_then(|m| m.modified().ok())
            .map(DateTime::<Utc>::from)
            .unwrap_or_else(Utc::now);
        Ok(Some(StoredValue { body, written_at }))
    }

    async fn put(&self, key: &str, body: String) -> Result<()> {
        tokio::fs::create_dir_all(&self.dir)
            .await
            .with_context(|| format!("creating snapshot dir {}", self.dir.display()))?;
        let path = self.path_for(key);
        let tmp = path.with_extension("json.tmp");
        tokio::fs::write(&tmp, body.as_bytes())
            .await
            .with_context(|| format!("writing {}", tmp.display()))?;
        tokio::fs::rename(&tmp, &path)
            .await
            .with_context(|| format!("replacing {}", path.display()))?;
        Ok(())
    }
}

/// Process-lifetime store; used in tests and when no snapshot dir is configured.
#[derive(Default)]
pub struct MemoryKvStore {
    values: Mutex<HashMap<String, StoredValue>>,
}

impl MemoryKvStore {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait::async_trait]
impl KvStore for MemoryKvStore {
    async fn get(&self, key: &str) -> Result<Option<StoredValue>> {
        let g = self
            .values
            .lock()
            .map_err(|_| anyhow::anyhow!("memory store lock poisoned"))?;
        Ok(g.get(key).cloned())
    }

    async fn put(&self, key: &str, body: String) -> Result<()> {
        let mut g = self
            .values
            .lock()
            .map_err(|_| anyhow::anyhow!("memory store lock poisoned"))?;
        g.insert(
            key.to_string(),
            StoredValue {
                body,
                written_at: Utc::now(),
            },
        );
        Ok(())
    }
}

/// Typed, best-effort view over a `KvStore`: storage problems are logged,
/// never returned to the caller.
pub struct FallbackStore<T> {
    store: Arc<dyn KvStore>,
    key: String,
    _items: PhantomData<fn() -> T>,
}

impl<T: PipelineItem> FallbackStore<T> {
    pub fn new(store: Arc<dyn KvStore>, key: impl Into<String>) -> Self {
        Self {
            store,
            key: key.into(),
            _items: PhantomData,
        }
    }

    pub async fn save(&self, result: &AggregateResult<T>) {
        let body = match serde_json::to_string(result.items()) {
            Ok(b) => b,
            Err(e) => {
                tracing::warn!(error = %e, key = %self.key, "snapshot serialize failed");
                return;
            }
        };
        if let Err(e) = self.store.put(&self.key, body).await {
            tracing::warn!(error = %format!("{e:#}"), key = %self.key, "snapshot save failed");
        }
    }

    pub async fn load(&self) -> Option<AggregateResult<T>> {
        let stored = match self.store.get(&self.key).await {
            Ok(Some(v)) => v,
            Ok(None) => return None,
            Err(e) => {
                tracing::warn!(error = %format!("{e:#}"), key = %self.key, "snapshot load failed");
                return None;
            }
        };
        match serde_json::from_str::<Vec<T>>(&stored.body) {
            Ok(items) => Some(AggregateResult::new(items, stored.written_at)),
            Err(e) => {
                tracing::warn!(error = %e, key = %self.key, "snapshot has unexpected shape; ignoring");
                None
            }
        }
    }
}
