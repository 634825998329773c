// src/ingest/providers/mod.rs
pub mod rss;
pub mod yahoo;

use std::sync::Arc;

use crate::config::TickerDefinition;
use crate::ingest::types::{Article, Quote, SourceProvider};

use self::rss::{FeedLoader, RssFeedSource};
use self::yahoo::{PriceField, YahooChartClient, YahooQuoteSource};

/// One source per distinct data symbol.
pub fn quote_sources(
    tickers: &[TickerDefinition],
    client: Arc<YahooChartClient>,
    precedence: &[PriceField],
) -> Vec<Arc<dyn SourceProvider<Quote>>> {
    let precedence: Arc<[PriceField]> = precedence.into();
    crate::config::tickers::group_by_symbol(tickers)
        .into_iter()
        .map(|(symbol, ids)| {
            Arc::new(YahooQuoteSource::new(
                symbol,
                ids,
                Arc::clone(&client),
                Arc::clone(&precedence),
            )) as Arc<dyn SourceProvider<Quote>>
        })
        .collect()
}

/// One source per configured feed URL (duplicates collapse).
pub fn feed_sources<'a>(
    urls: impl IntoIterator<Item = &'a str>,
    loader: Arc<dyn FeedLoader>,
) -> Vec<Arc<dyn SourceProvider<Article>>> {
    let mut seen = std::collections::HashSet::new();
    urls.into_iter()
        .filter(|u| seen.insert(u.to_string()))
        .map(|u| Arc::new(RssFeedSource::new(u, Arc::clone(&loader))) as Arc<dyn SourceProvider<Article>>)
        .collect()
}
