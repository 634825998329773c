// src/config/feeds.rs
use std::collections::HashMap;
use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Leaning {
    Left,
    Center,
    Right,
    Finance,
    Tech,
    Other,
}

impl Leaning {
    pub fn as_str(self) -> &'static str {
        match self {
            Leaning::Left => "left",
            Leaning::Center => "center",
            Leaning::Right => "right",
            Leaning::Finance => "finance",
            Leaning::Tech => "tech",
            Leaning::Other => "other",
        }
    }
}

impl fmt::Display for Leaning {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for Leaning {
    type Err = anyhow::Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "left" => Ok(Leaning::Left),
            "center" => Ok(Leaning::Center),
            "right" => Ok(Leaning::Right),
            "finance" => Ok(Leaning::Finance),
            "tech" => Ok(Leaning::Tech),
            "other" => Ok(Leaning::Other),
            other => anyhow::bail!("unknown leaning: {other}"),
        }
    }
}

/// One configured news feed and the labels filters match against.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct FeedDefinition {
    pub id: String,
    pub name: String,
    pub url: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub leaning: Option<Leaning>,
    #[serde(default)]
    pub industries: Vec<String>,
    #[serde(default)]
    pub regions: Vec<String>,
}

/// Feed definitions indexed by URL.
#[derive(Debug, Clone, Default)]
pub struct FeedCatalog {
    feeds: Vec<FeedDefinition>,
    by_url: HashMap<String, usize>,
}

impl FeedCatalog {
    pub fn new(feeds: Vec<FeedDefinition>) -> Self {
        let by_url = feeds
            .iter()
            .enumerate()
            .map(|(i, f)| (f.url.clone(), i))
            .collect();
        Self { feeds, by_url }
    }

    pub fn by_url(&self, url: &str) -> Option<&FeedDefinition> {
        self.by_url.get(url).map(|&i| &self.feeds[i])
    }

    pub fn iter(&self) -> impl Iterator<Item = &FeedDefinition> {
        self.feeds.iter()
    }

    pub fn feeds(&self) -> &[FeedDefinition] {
        &self.feeds
    }

    pub fn len(&self) -> usize {
        self.feeds.len()
    }

    pub fn is_empty(&self) -> bool {
        self.feeds.is_empty()
    }
}

fn feed(
    id: &str,
    name: &str,
    url: &str,
    leaning: Leaning,
    industries: &[&str],
    regions: &[&str],
) -> FeedDefinition {
    FeedDefinition {
        id: id.to_string(),
        name: name.to_string(),
        url: url.to_string(),
        leaning: Some(leaning),
        industries: industries.iter().map(|s| s.to_string()).collect(),
        regions: regions.iter().map(|s| s.to_string()).collect(),
    }
}

pub fn default_feeds() -> Vec<FeedDefinition> {
    vec![
        feed(
            "reuters-finance",
            "Reuters Finance",
            "https://www.reutersagency.com/feed/?taxonomy=best-topics&post_type=best",
            Leaning::Finance,
            &["finance", "markets"],
            &["US", "EU", "ASIA"],
        ),
        feed(
            "bloomberg",
            "Bloomberg",
            "https://feeds.bloomberg.com/markets/news.rss",
            Leaning::Finance,
            &["finance", "markets", "tech"],
            &["US", "EU", "ASIA"],
        ),
        feed(
            "financial-times",
            "Financial Times",
            "https://www.ft.com/?format=rss",
            Leaning::Finance,
            &["finance", "markets"],
            &["US", "EU", "UK"],
        ),
        feed(
            "wsj-markets",
            "Wall Street Journal Markets",
            "https://feeds.a.dj.com/rss/RSSMarketsMain.xml",
            Leaning::Finance,
            &["finance", "markets"],
            &["US"],
        ),
        feed(
            "cnbc-top",
            "CNBC Top News",
            "https://feeds.nbcnews.com/nbcnews/public/topstories",
            Leaning::Center,
            &["finance", "tech", "markets"],
            &["US"],
        ),
        feed(
            "techcrunch",
            "TechCrunch",
            "https://techcrunch.com/feed/",
            Leaning::Tech,
            &["tech"],
            &["US"],
        ),
    ]
}
