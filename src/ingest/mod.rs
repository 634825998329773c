// src/ingest/mod.rs
pub mod cache;
pub mod dedup;
pub mod fallback;
pub mod filter;
pub mod pipeline;
pub mod providers;
pub mod rate_limit;
pub mod scheduler;
pub mod types;

use metrics::{describe_counter, describe_gauge, describe_histogram};
use once_cell::sync::OnceCell;

/// Marker appended to free text that was cut at the configured length.
pub const TRUNCATION_MARKER: &str = "...";

/// One-time metrics registration (so series show up on /metrics).
pub(crate) fn ensure_metrics_described() {
    static ONCE: OnceCell<()> = OnceCell::new();
    ONCE.get_or_init(|| {
        describe_counter!(
            "freshness_source_fetch_total",
            "Upstream fetches per pipeline and outcome."
        );
        describe_counter!(
            "freshness_rate_limited_total",
            "Sources skipped because their rate window was exhausted."
        );
        describe_counter!(
            "freshness_items_dropped_total",
            "Upstream items skipped during normalization."
        );
        describe_counter!(
            "freshness_dedup_total",
            "Items removed as duplicates of an earlier canonical key."
        );
        describe_counter!("freshness_cache_hits_total", "Aggregations served from cache.");
        describe_counter!(
            "freshness_cache_misses_total",
            "Aggregations that ran a live fan-out."
        );
        describe_counter!(
            "freshness_fallback_served_total",
            "Aggregations answered from the persisted snapshot."
        );
        describe_histogram!(
            "freshness_fetch_ms",
            "Wall time of one upstream fetch in milliseconds."
        );
        describe_histogram!(
            "freshness_parse_ms",
            "Time spent parsing one feed document in milliseconds."
        );
        describe_counter!(
            "freshness_refresh_runs_total",
            "Background refresh ticks."
        );
        describe_gauge!(
            "freshness_cache_ttl_ms",
            "Configured absolute cache TTL per pipeline."
        );
        describe_gauge!(
            "freshness_last_cycle_ts",
            "Unix ts when a live aggregation cycle last finished."
        );
    });
}

/// Normalize free text: decode entities, strip tags, collapse whitespace, trim.
pub fn clean_text(s: &str) -> String {
    // 1) HTML entity decode
    let mut out = html_escape::decode_html_entities(s).to_string();

    // 2) Strip HTML tags
    static RE_TAGS: OnceCell<regex::Regex> = OnceCell::new();
    let re_tags = RE_TAGS.get_or_init(|| regex::Regex::new(r"(?is)</?[^>]+>").unwrap());
    out = re_tags.replace_all(&out, " ").to_string();

    // 3) A second decode pass catches double-escaped feeds (`&amp;nbsp;`)
    if out.contains('&') {
        out = html_escape::decode_html_entities(&out).to_string();
    }

    // 4) Collapse whitespace
    static RE_WS: OnceCell<regex::Regex> = OnceCell::new();
    let re_ws = RE_WS.get_or_init(|| regex::Regex::new(r"\s+").unwrap());
    out = re_ws.replace_all(&out, " ").to_string();
    out.trim().to_string()
}

/// Cut `s` to at most `max_chars` characters, appending `marker` when anything was removed.
pub fn truncate_with_marker(s: &str, max_chars: usize, marker: &str) -> String {
    if s.chars().count() <= max_chars {
        return s.to_string();
    }
    let mut out: String = s.chars().take(max_chars).collect();
    out.push_str(marker);
    out
}

/// Empty-after-trim strings become `None`.
pub(crate) fn non_empty(s: Option<String>) -> Option<String> {
    s.map(|v| v.trim().to_string()).filter(|v| !v.is_empty())
}
