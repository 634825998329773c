// src/config/mod.rs
pub mod feeds;
pub mod tickers;

use std::path::{Path, PathBuf};
use std::time::Duration;

use anyhow::{anyhow, bail, Context, Result};
use serde::{Deserialize, Serialize};

use crate::ingest::fallback::{NEWS_SNAPSHOT_KEY, QUOTES_SNAPSHOT_KEY};
use crate::ingest::providers::yahoo::PriceField;

pub use feeds::{FeedCatalog, FeedDefinition, Leaning};
pub use tickers::TickerDefinition;

const ENV_PATH: &str = "FRESHNESS_CONFIG_PATH";
const DEFAULT_PATH: &str = "config/freshness.toml";

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct QuotesConfig {
    pub cache_ttl_ms: u64,
    pub fetch_timeout_ms: u64,
    /// Upstream calls per data symbol per window.
    pub rate_limit_max: u32,
    pub rate_limit_window_ms: u64,
    /// First field with a usable value wins.
    pub price_precedence: Vec<PriceField>,
    pub yahoo_base_url: String,
    pub snapshot_key: String,
}

impl Default for QuotesConfig {
    fn default() -> Self {
        Self {
            cache_ttl_ms: 15 * 60 * 1_000,
            fetch_timeout_ms: 10_000,
            rate_limit_max: 30,
            rate_limit_window_ms: 60_000,
            price_precedence: PriceField::default_precedence(),
            yahoo_base_url: "https://query1.finance.yahoo.com".to_string(),
            snapshot_key: QUOTES_SNAPSHOT_KEY.to_string(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct NewsConfig {
    pub cache_ttl_ms: u64,
    pub fetch_timeout_ms: u64,
    /// Fetches per feed URL per window (shared by the aggregate and the single-feed endpoint).
    pub rate_limit_max: u32,
    pub rate_limit_window_ms: u64,
    pub summary_max_len: usize,
    pub snapshot_key: String,
}

impl Default for NewsConfig {
    fn default() -> Self {
        Self {
            cache_ttl_ms: 5 * 60 * 1_000,
            fetch_timeout_ms: 10_000,
            rate_limit_max: 10,
            rate_limit_window_ms: 60_000,
            summary_max_len: 500,
            snapshot_key: NEWS_SNAPSHOT_KEY.to_string(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct StorageConfig {
    /// Directory for last-known-good snapshots. Empty keeps them in memory only.
    pub snapshot_dir: String,
}

impl Default for StorageConfig {
    fn default() -> Self {
        Self {
            snapshot_dir: "state/snapshots".to_string(),
        }
    }
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct RefreshConfig {
    /// 0 disables background refresh.
    pub interval_secs: u64,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct AppConfig {
    pub quotes: QuotesConfig,
    pub news: NewsConfig,
    pub storage: StorageConfig,
    pub refresh: RefreshConfig,
    pub feeds: Vec<FeedDefinition>,
    pub tickers: Vec<TickerDefinition>,
}

impl Default for AppConfig {
    fn default() -> Self {
        Self {
            quotes: QuotesConfig::default(),
            news: NewsConfig::default(),
            storage: StorageConfig::default(),
            refresh: RefreshConfig::default(),
            feeds: feeds::default_feeds(),
            tickers: tickers::default_tickers(),
        }
    }
}

impl AppConfig {
    pub fn load_from(path: &Path) -> Result<Self> {
        let content = std::fs::read_to_string(path)
            .with_context(|| format!("reading config from {}", path.display()))?;
        Self::from_toml_str(&content).with_context(|| format!("parsing {}", path.display()))
    }

    pub fn from_toml_str(s: &str) -> Result<Self> {
        let cfg: AppConfig = toml::from_str(s)?;
        Ok(cfg)
    }

    /// Resolve config with fallbacks, then apply env overrides and validate:
    /// 1) $FRESHNESS_CONFIG_PATH
    /// 2) config/freshness.toml
    /// 3) built-in defaults
    pub fn load_default() -> Result<Self> {
        let mut cfg = if let Ok(p) = std::env::var(ENV_PATH) {
            let pb = PathBuf::from(p);
            if !pb.exists() {
                return Err(anyhow!("{ENV_PATH} points to non-existent path"));
            }
            Self::load_from(&pb)?
        } else {
            let p = PathBuf::from(DEFAULT_PATH);
            if p.exists() {
                Self::load_from(&p)?
            } else {
                Self::default()
            }
        };
        cfg.apply_env_overrides()?;
        cfg.validate()?;
        Ok(cfg)
    }

    pub fn apply_env_overrides(&mut self) -> Result<()> {
        if let Some(v) = env_parse::<u64>("QUOTES_CACHE_TTL_MS")? {
            self.quotes.cache_ttl_ms = v;
        }
        if let Some(v) = env_parse::<u64>("NEWS_CACHE_TTL_MS")? {
            self.news.cache_ttl_ms = v;
        }
        if let Some(v) = env_parse::<u32>("FEED_RATE_LIMIT_MAX")? {
            self.news.rate_limit_max = v;
        }
        if let Ok(v) = std::env::var("SNAPSHOT_DIR") {
            self.storage.snapshot_dir = v.trim().to_string();
        }
        if let Some(v) = env_parse::<u64>("REFRESH_INTERVAL_SECS")? {
            self.refresh.interval_secs = v;
        }
        Ok(())
    }

    pub fn validate(&self) -> Result<()> {
        let nonzero = [
            ("quotes.fetch_timeout_ms", self.quotes.fetch_timeout_ms),
            ("quotes.rate_limit_window_ms", self.quotes.rate_limit_window_ms),
            ("news.fetch_timeout_ms", self.news.fetch_timeout_ms),
            ("news.rate_limit_window_ms", self.news.rate_limit_window_ms),
        ];
        for (name, v) in nonzero {
            if v == 0 {
                bail!("{name} must be > 0");
            }
        }
        if self.quotes.price_precedence.is_empty() {
            bail!("quotes.price_precedence must list at least one field");
        }
        for f in &self.feeds {
            if f.url.trim().is_empty() {
                bail!("feed {} has an empty url", f.id);
            }
        }
        Ok(())
    }

    pub fn feed_catalog(&self) -> FeedCatalog {
        FeedCatalog::new(self.feeds.clone())
    }
}

impl QuotesConfig {
    pub fn cache_ttl(&self) -> Duration {
        Duration::from_millis(self.cache_ttl_ms)
    }
    pub fn fetch_timeout(&self) -> Duration {
        Duration::from_millis(self.fetch_timeout_ms)
    }
    pub fn rate_window(&self) -> Duration {
        Duration::from_millis(self.rate_limit_window_ms)
    }
}

impl NewsConfig {
    pub fn cache_ttl(&self) -> Duration {
        Duration::from_millis(self.cache_ttl_ms)
    }
    pub fn fetch_timeout(&self) -> Duration {
        Duration::from_millis(self.fetch_timeout_ms)
    }
    pub fn rate_window(&self) -> Duration {
        Duration::from_millis(self.rate_limit_window_ms)
    }
}

fn env_parse<T>(name: &str) -> Result<Option<T>>
where
    T: std::str::FromStr,
    T::Err: std::fmt::Display,
{
    match std::env::var(name) {
        Ok(raw) if !raw.trim().is_empty() => raw
            .trim()
            .parse::<T>()
            .map(Some)
            .map_err(|e| anyhow!("invalid {name}={raw}: {e}")),
        _ => Ok(None),
    }
}
