// src/ingest/filter.rs
//! Pure filter/sort over an already-aggregated article list.

use std::str::FromStr;

use chrono::{DateTime, Duration, Utc};
use serde::{Deserialize, Serialize};

use crate::config::feeds::{FeedCatalog, FeedDefinition, Leaning};
use crate::ingest::types::Article;

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub enum DateRange {
    #[serde(rename = "24h")]
    Day,
    #[serde(rename = "7d")]
    Week,
    #[serde(rename = "30d")]
    Month,
    #[default]
    #[serde(rename = "all")]
    All,
}

impl DateRange {
    pub fn span(self) -> Option<Duration> {
        match self {
            DateRange::Day => Some(Duration::hours(24)),
            DateRange::Week => Some(Duration::days(7)),
            DateRange::Month => Some(Duration::days(30)),
            DateRange::All => None,
        }
    }
}

impl FromStr for DateRange {
    type Err = anyhow::Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim() {
            "24h" => Ok(DateRange::Day),
            "7d" => Ok(DateRange::Week),
            "30d" => Ok(DateRange::Month),
            "all" | "" => Ok(DateRange::All),
            other => anyhow::bail!("unknown dateRange: {other}"),
        }
    }
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SortBy {
    #[default]
    Newest,
    Source,
}

impl FromStr for SortBy {
    type Err = anyhow::Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim() {
            "newest" | "" => Ok(SortBy::Newest),
            "source" => Ok(SortBy::Source),
            other => anyhow::bail!("unknown sortBy: {other}"),
        }
    }
}

/// Caller-supplied filter object. Empty lists mean "no constraint".
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct NewsFilters {
    pub industries: Vec<String>,
    /// Matched against the article's source name or the catalog feed id.
    pub sources: Vec<String>,
    pub leanings: Vec<Leaning>,
    pub date_range: DateRange,
    pub search_query: Option<String>,
    pub sort_by: SortBy,
}

/// Inclusive: an article exactly `span` old is still inside the range.
pub fn is_within_date_range(article: &Article, range: DateRange, now: DateTime<Utc>) -> bool {
    match range.span() {
        None => true,
        Some(span) => now.signed_duration_since(article.published_at) <= span,
    }
}

/// Case-insensitive substring match on title and summary. Blank query matches all.
pub fn matches_search(article: &Article, query: &str) -> bool {
    let q = query.trim().to_lowercase();
    if q.is_empty() {
        return true;
    }
    article.title.to_lowercase().contains(&q)
        || article
            .summary
            .as_deref()
            .is_some_and(|s| s.to_lowercase().contains(&q))
}

/// Stable sort; `Source` breaks ties by newest first.
pub fn sort_articles(mut articles: Vec<Article>, sort_by: SortBy) -> Vec<Article> {
    match sort_by {
        SortBy::Newest => articles.sort_by(|a, b| b.published_at.cmp(&a.published_at)),
        SortBy::Source => articles.sort_by(|a, b| {
            a.source_name
                .to_lowercase()
                .cmp(&b.source_name.to_lowercase())
                .then_with(|| b.published_at.cmp(&a.published_at))
        }),
    }
    articles
}

fn feed_for<'a>(catalog: &'a FeedCatalog, article: &Article) -> Option<&'a FeedDefinition> {
    catalog
        .by_url(&article.feed_url)
        .or_else(|| catalog.by_url(&article.source_url))
}

/// OR within a dimension, AND across dimensions, then sort.
pub fn apply_filters(
    articles: &[Article],
    filters: &NewsFilters,
    catalog: &FeedCatalog,
    now: DateTime<Utc>,
) -> Vec<Article> {
    let query = filters.search_query.as_deref().unwrap_or("");
    let kept: Vec<Article> = articles
        .iter()
        .filter(|a| is_within_date_range(a, filters.date_range, now))
        .filter(|a| {
            filters.industries.is_empty()
                || feed_for(catalog, a).is_some_and(|f| {
                    f.industries
                        .iter()
                        .any(|ind| filters.industries.iter().any(|w| w.eq_ignore_ascii_case(ind)))
                })
        })
        .filter(|a| {
            filters.sources.is_empty()
                || filters.sources.iter().any(|s| {
                    s == &a.source_name || feed_for(catalog, a).is_some_and(|f| &f.id == s)
                })
        })
        .filter(|a| {
            filters.leanings.is_empty()
                || feed_for(catalog, a)
                    .and_then(|f| f.leaning)
                    .is_some_and(|l| filters.leanings.contains(&l))
        })
        .filter(|a| matches_search(a, query))
        .cloned()
        .collect();
    sort_articles(kept, filters.sort_by)
}
