// src/ingest/dedup.rs
use std::collections::HashSet;

use crate::ingest::types::PipelineItem;

/// Collapse items sharing a canonical key, keeping the first occurrence.
/// Order of the survivors is the input order.
pub fn dedupe<T: PipelineItem>(items: Vec<T>) -> Vec<T> {
    let mut seen: HashSet<String> = HashSet::with_capacity(items.len());
    let mut keep = Vec::with_capacity(items.len());
    for item in items {
        if seen.insert(item.canonical_key().to_string()) {
            keep.push(item);
        }
    }
    keep
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ingest::types::{canonical_id, Article};
    use chrono::{TimeZone, Utc};

    fn art(guid: Option<&str>, url: &str, source: &str) -> Article {
        Article {
            title: format!("{source}: {url}"),
            url: url.to_string(),
            published_at: Utc.with_ymd_and_hms(2025, 9, 6, 9, 0, 0).unwrap(),
            author: None,
            summary: None,
            guid: guid.map(str::to_string),
            canonical_id: canonical_id(guid, url),
            source_name: source.to_string(),
            source_url: format!("https://{source}.test"),
            feed_url: format!("https://{source}.test/rss"),
        }
    }

    #[test]
    fn first_occurrence_wins_across_sources() {
        let items = vec![
            art(Some("g-1"), "https://a.test/1", "alpha"),
            art(None, "https://a.test/2", "alpha"),
            art(Some("g-1"), "https://b.test/other-url", "beta"),
            art(None, "https://a.test/2", "beta"),
            art(Some("g-3"), "https://b.test/3", "beta"),
        ];
        let out = dedupe(items);
        let picked: Vec<(&str, &str)> = out
            .iter()
            .map(|a| (a.canonical_id.as_str(), a.source_name.as_str()))
            .collect();
        assert_eq!(
            picked,
            vec![
                ("g-1", "alpha"),
                ("https://a.test/2", "alpha"),
                ("g-3", "beta")
            ]
        );
    }

    #[test]
    fn dedupe_is_idempotent() {
        let items = vec![
            art(Some("x"), "https://a.test/1", "alpha"),
            art(Some("x"), "https://a.test/1", "beta"),
            art(Some("y"), "https://a.test/2", "beta"),
        ];
        let once = dedupe(items);
        let twice = dedupe(once.clone());
        assert_eq!(once, twice);
    }

    #[test]
    fn guid_and_url_namespaces_do_not_collide_by_accident() {
        // Same URL but distinct guids: two different articles.
        let items = vec![
            art(Some("a"), "https://a.test/live-blog", "alpha"),
            art(Some("b"), "https://a.test/live-blog", "alpha"),
        ];
        assert_eq!(dedupe(items).len(), 2);
    }
}
