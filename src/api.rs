// src/api.rs
use std::sync::Arc;

use anyhow::{Context, Result};
use axum::{
    extract::{Query, State},
    http::{header::HeaderName, HeaderValue, StatusCode},
    response::{IntoResponse, Response},
    routing::get,
    Json, Router,
};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::json;
use tower_http::cors::CorsLayer;

use crate::config::{AppConfig, FeedCatalog, Leaning};
use crate::ingest::fallback::{FallbackStore, FileKvStore, KvStore, MemoryKvStore};
use crate::ingest::filter::{apply_filters, DateRange, NewsFilters, SortBy};
use crate::ingest::pipeline::{AggregationPipeline, Freshness, PipelineSettings};
use crate::ingest::providers::rss::{FeedLoader, HttpFeedLoader};
use crate::ingest::providers::yahoo::YahooChartClient;
use crate::ingest::providers::{feed_sources, quote_sources};
use crate::ingest::rate_limit::RateLimiter;
use crate::ingest::types::{Article, Quote};

pub const X_CACHE: HeaderName = HeaderName::from_static("x-cache");

#[derive(Clone)]
pub struct AppState {
    pub quotes: Arc<AggregationPipeline<Quote>>,
    pub news: Arc<AggregationPipeline<Article>>,
    feed_loader: Arc<dyn FeedLoader>,
    /// Shared with the news pipeline: one budget per feed URL, whichever path calls it.
    feed_limiter: Arc<RateLimiter>,
    catalog: Arc<FeedCatalog>,
}

impl AppState {
    pub fn new(
        quotes: Arc<AggregationPipeline<Quote>>,
        news: Arc<AggregationPipeline<Article>>,
        feed_loader: Arc<dyn FeedLoader>,
        feed_limiter: Arc<RateLimiter>,
        catalog: Arc<FeedCatalog>,
    ) -> Self {
        Self {
            quotes,
            news,
            feed_loader,
            feed_limiter,
            catalog,
        }
    }

    /// Wire real upstream clients, limiters and snapshot storage from config.
    pub fn from_config(cfg: &AppConfig) -> Result<Self> {
        let store: Arc<dyn KvStore> = if cfg.storage.snapshot_dir.trim().is_empty() {
            Arc::new(MemoryKvStore::new())
        } else {
            Arc::new(FileKvStore::new(cfg.storage.snapshot_dir.trim()))
        };

        let chart = Arc::new(
            YahooChartClient::new(&cfg.quotes.yahoo_base_url, cfg.quotes.fetch_timeout())
                .context("quote client")?,
        );
        let quotes = AggregationPipeline::new(
            "quotes",
            quote_sources(&cfg.tickers, chart, &cfg.quotes.price_precedence),
            Arc::new(RateLimiter::new(
                cfg.quotes.rate_limit_max,
                cfg.quotes.rate_window(),
            )),
            FallbackStore::new(Arc::clone(&store), cfg.quotes.snapshot_key.clone()),
            PipelineSettings {
                cache_ttl: cfg.quotes.cache_ttl(),
                fetch_timeout: cfg.quotes.fetch_timeout(),
            },
        );

        let loader: Arc<dyn FeedLoader> = Arc::new(
            HttpFeedLoader::new(cfg.news.fetch_timeout(), cfg.news.summary_max_len)
                .context("feed client")?,
        );
        let feed_limiter = Arc::new(RateLimiter::new(
            cfg.news.rate_limit_max,
            cfg.news.rate_window(),
        ));
        let catalog = Arc::new(cfg.feed_catalog());
        let news = AggregationPipeline::new(
            "news",
            feed_sources(catalog.iter().map(|f| f.url.as_str()), Arc::clone(&loader)),
            Arc::clone(&feed_limiter),
            FallbackStore::new(store, cfg.news.snapshot_key.clone()),
            PipelineSettings {
                cache_ttl: cfg.news.cache_ttl(),
                fetch_timeout: cfg.news.fetch_timeout(),
            },
        );

        tracing::info!(
            quote_sources = quotes.source_count(),
            feeds = news.source_count(),
            snapshot_dir = %cfg.storage.snapshot_dir,
            "pipelines ready"
        );

        Ok(Self::new(
            Arc::new(quotes),
            Arc::new(news),
            loader,
            feed_limiter,
            catalog,
        ))
    }
}

pub fn router(state: AppState) -> Router {
    Router::new()
        .route("/health", get(health))
        .route("/api/health", get(health))
        .route("/api/markets/quotes", get(market_quotes))
        .route("/api/news", get(aggregated_news))
        .route("/api/news/rss", get(single_feed))
        .route("/api/news/feeds", get(feed_catalog))
        .layer(CorsLayer::very_permissive())
        .with_state(state)
}

async fn health() -> &'static str {
    "OK"
}

fn error_body(status: StatusCode, error: &str, message: Option<String>) -> Response {
    let body = match message {
        Some(m) => json!({ "error": error, "message": m }),
        None => json!({ "error": error }),
    };
    (status, Json(body)).into_response()
}

fn with_cache_header(mut resp: Response, freshness: Freshness) -> Response {
    resp.headers_mut()
        .insert(X_CACHE, HeaderValue::from_static(freshness.header_value()));
    resp
}

async fn market_quotes(State(state): State<AppState>) -> Response {
    let agg = state.quotes.aggregate().await;
    let freshness = agg.freshness;
    match agg.into_strict() {
        Ok(agg) => with_cache_header(Json(agg.result.into_items()).into_response(), freshness),
        Err(e) => with_cache_header(
            error_body(
                StatusCode::SERVICE_UNAVAILABLE,
                "Market data temporarily unavailable",
                Some(e.to_string()),
            ),
            freshness,
        ),
    }
}

#[derive(Debug, Deserialize)]
struct FeedQuery {
    #[serde(rename = "feedUrl")]
    feed_url: Option<String>,
}

/// Only absolute http(s) URLs are fetched.
fn valid_feed_url(raw: &str) -> bool {
    reqwest::Url::parse(raw)
        .map(|u| matches!(u.scheme(), "http" | "https") && u.host_str().is_some())
        .unwrap_or(false)
}

async fn single_feed(State(state): State<AppState>, Query(q): Query<FeedQuery>) -> Response {
    let Some(url) = q.feed_url.as_deref().map(str::trim).filter(|u| !u.is_empty()) else {
        return error_body(
            StatusCode::BAD_REQUEST,
            "feedUrl query parameter is required",
            None,
        );
    };
    if !valid_feed_url(url) {
        return error_body(StatusCode::BAD_REQUEST, "Invalid feedUrl", None);
    }
    if !state.feed_limiter.allow(url) {
        return error_body(
            StatusCode::TOO_MANY_REQUESTS,
            "Rate limit exceeded. Please wait before fetching this feed again.",
            None,
        );
    }
    match state.feed_loader.load(url).await {
        Ok(doc) => Json(doc).into_response(),
        Err(e) => {
            tracing::warn!(feed = url, error = %e, "single feed fetch failed");
            error_body(
                StatusCode::INTERNAL_SERVER_ERROR,
                "Failed to fetch or parse RSS feed",
                Some(e.to_string()),
            )
        }
    }
}

#[derive(Debug, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
struct NewsQuery {
    industries: Option<String>,
    sources: Option<String>,
    leanings: Option<String>,
    date_range: Option<String>,
    search_query: Option<String>,
    sort_by: Option<String>,
}

fn split_list(raw: Option<&str>) -> Vec<String> {
    raw.unwrap_or_default()
        .split(',')
        .map(str::trim)
        .filter(|s| !s.is_empty())
        .map(str::to_string)
        .collect()
}

impl NewsQuery {
    fn into_filters(self) -> Result<NewsFilters> {
        let leanings = split_list(self.leanings.as_deref())
            .iter()
            .map(|s| s.parse::<Leaning>())
            .collect::<Result<Vec<_>>>()?;
        let date_range = match self.date_range.as_deref() {
            Some(s) => s.parse::<DateRange>()?,
            None => DateRange::All,
        };
        let sort_by = match self.sort_by.as_deref() {
            Some(s) => s.parse::<SortBy>()?,
            None => SortBy::Newest,
        };
        Ok(NewsFilters {
            industries: split_list(self.industries.as_deref()),
            sources: split_list(self.sources.as_deref()),
            leanings,
            date_range,
            search_query: self.search_query.filter(|s| !s.trim().is_empty()),
            sort_by,
        })
    }
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
struct NewsResponse {
    articles: Vec<Article>,
    freshness: Freshness,
    stale: bool,
    captured_at: DateTime<Utc>,
    #[serde(skip_serializing_if = "Option::is_none")]
    error: Option<String>,
}

async fn aggregated_news(State(state): State<AppState>, Query(q): Query<NewsQuery>) -> Response {
    let filters = match q.into_filters() {
        Ok(f) => f,
        Err(e) => {
            return error_body(StatusCode::BAD_REQUEST, "Invalid filter", Some(e.to_string()))
        }
    };

    let agg = state.news.aggregate().await;
    let articles = apply_filters(agg.result.items(), &filters, &state.catalog, Utc::now());
    let body = NewsResponse {
        articles,
        freshness: agg.freshness,
        stale: agg.freshness.is_stale(),
        captured_at: agg.result.captured_at(),
        error: agg.failure.map(|e| e.to_string()),
    };
    with_cache_header(Json(body).into_response(), agg.freshness)
}

async fn feed_catalog(State(state): State<AppState>) -> Response {
    Json(state.catalog.feeds()).into_response()
}
