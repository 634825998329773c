// src/ingest/providers/rss.rs
//! RSS 2.0 / RSS 1.0 (RDF) / Atom parsing and the per-feed source.
//!
//! Parsing is a streaming quick-xml event loop rather than serde
//! deserialization: feeds in the wild mix namespaces, CDATA and HTML
//! entities that are not valid XML, and one bad item must not sink the feed.

use std::sync::Arc;
use std::time::Duration;

use anyhow::{Context, Result};
use chrono::{DateTime, Utc};
use metrics::{counter, histogram};
use quick_xml::events::{BytesStart, Event};
use quick_xml::Reader;
use serde::{Deserialize, Serialize};
use time::format_description::well_known::{Rfc2822, Rfc3339};
use time::OffsetDateTime;

use crate::ingest::types::{canonical_id, Article, FetchError, SourceKey, SourceProvider};
use crate::ingest::{clean_text, non_empty, truncate_with_marker, TRUNCATION_MARKER};

pub const UNKNOWN_FEED: &str = "Unknown Feed";
pub const UNTITLED: &str = "Untitled";

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct FeedMeta {
    pub title: String,
    pub link: String,
    pub description: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct FeedDocument {
    pub feed: FeedMeta,
    pub articles: Vec<Article>,
}

#[derive(Debug, Default)]
struct ItemDraft {
    title: Option<String>,
    link: Option<String>,
    guid: Option<String>,
    id: Option<String>,
    pub_date: Option<String>,
    published: Option<String>,
    updated: Option<String>,
    dc_date: Option<String>,
    content_encoded: Option<String>,
    content: Option<String>,
    description: Option<String>,
    summary: Option<String>,
    creator: Option<String>,
    author: Option<String>,
    author_name: Option<String>,
}

#[derive(Debug, Default)]
struct MetaDraft {
    title: Option<String>,
    link: Option<String>,
    description: Option<String>,
}

fn set_once(slot: &mut Option<String>, value: String) {
    if slot.is_none() && !value.trim().is_empty() {
        *slot = Some(value);
    }
}

/// Raw bytes -> text with HTML entities decoded (quick-xml's own unescape
/// rejects entities like `&nbsp;` that feeds routinely carry).
fn decode_text(raw: &[u8]) -> String {
    let s = String::from_utf8_lossy(raw);
    html_escape::decode_html_entities(&s).into_owned()
}

fn attr(e: &BytesStart<'_>, name: &[u8]) -> Option<String> {
    e.attributes()
        .flatten()
        .find(|a| a.key.as_ref() == name)
        .map(|a| decode_text(&a.value))
}

/// Atom `<link href rel>`: only `alternate` (or unlabelled) links point at the article.
fn atom_link(e: &BytesStart<'_>) -> Option<String> {
    let href = attr(e, b"href")?;
    match attr(e, b"rel").as_deref() {
        None | Some("alternate") => Some(href),
        _ => None,
    }
}

fn is_feed_root(name: &[u8]) -> bool {
    matches!(name, b"rss" | b"feed" | b"rdf:RDF" | b"RDF")
}

fn is_item(name: &[u8]) -> bool {
    matches!(name, b"item" | b"entry")
}

/// Item fields whose body may carry nested markup.
fn is_rich_field(name: &[u8]) -> bool {
    matches!(
        name,
        b"content" | b"content:encoded" | b"description" | b"summary"
    )
}

fn is_meta_parent(name: &[u8]) -> bool {
    matches!(name, b"channel" | b"feed")
}

/// RFC 2822 (`pubDate`) or RFC 3339 (Atom, Dublin Core).
pub fn parse_feed_date(ts: &str) -> Option<DateTime<Utc>> {
    let ts = ts.trim();
    let odt = OffsetDateTime::parse(ts, &Rfc2822)
        .or_else(|_| OffsetDateTime::parse(ts, &Rfc3339))
        .ok();
    if let Some(odt) = odt {
        return DateTime::from_timestamp(odt.unix_timestamp(), odt.nanosecond());
    }
    // Named zones ("EST", "PDT") that the strict parser refuses.
    DateTime::parse_from_rfc2822(ts)
        .ok()
        .map(|dt| dt.with_timezone(&Utc))
}

/// Parse a whole feed document. Items without any identity (no guid, id or
/// link) are skipped and counted; a malformed document fails as a whole.
pub fn parse_feed(
    xml: &str,
    feed_url: &str,
    fetched_at: DateTime<Utc>,
    summary_max_len: usize,
) -> Result<FeedDocument, FetchError> {
    let t0 = std::time::Instant::now();
    let mut reader = Reader::from_str(xml);
    reader.config_mut().trim_text(true);

    let mut stack: Vec<Vec<u8>> = Vec::new();
    let mut text = String::new();
    let mut rich_depth: Option<usize> = None;
    let mut saw_root = false;
    let mut meta = MetaDraft::default();
    let mut item: Option<ItemDraft> = None;
    let mut articles = Vec::new();
    let mut dropped = 0u64;

    loop {
        let ev = reader
            .read_event()
            .map_err(|e| FetchError::Parse(format!("xml error at {}: {e}", reader.buffer_position())))?;
        match ev {
            Event::Start(e) => {
                let name = e.name().as_ref().to_vec();
                if rich_depth.is_some() {
                    // Markup inside a body field (Atom xhtml content) is part of its text.
                    stack.push(name);
                    text.push(' ');
                    continue;
                }
                if !saw_root {
                    if !is_feed_root(&name) {
                        return Err(FetchError::Parse(format!(
                            "not an RSS or Atom document (root <{}>)",
                            String::from_utf8_lossy(&name)
                        )));
                    }
                    saw_root = true;
                } else if is_item(&name) && item.is_none() {
                    item = Some(ItemDraft::default());
                } else if name == b"link" {
                    if let Some(href) = atom_link(&e) {
                        link_target(&stack, &mut item, &mut meta, href);
                    }
                }
                let rich = item.is_some() && is_rich_field(&name);
                stack.push(name);
                text.clear();
                if rich {
                    rich_depth = Some(stack.len());
                }
            }
            Event::Empty(e) => {
                if !saw_root {
                    return Err(FetchError::Parse("feed document has no content".into()));
                }
                if e.name().as_ref() == b"link" {
                    if let Some(href) = atom_link(&e) {
                        link_target(&stack, &mut item, &mut meta, href);
                    }
                }
            }
            Event::Text(e) => {
                text.push_str(&decode_text(&e.into_inner()));
            }
            Event::CData(e) => {
                text.push_str(&String::from_utf8_lossy(&e.into_inner()));
            }
            Event::End(_) => {
                let depth = stack.len();
                let Some(name) = stack.pop() else {
                    return Err(FetchError::Parse("unbalanced closing tag".into()));
                };
                if let Some(field_depth) = rich_depth {
                    if depth > field_depth {
                        text.push(' ');
                        continue;
                    }
                    rich_depth = None;
                }
                let value = std::mem::take(&mut text);
                let parent = stack.last().map(Vec::as_slice).unwrap_or_default();

                if is_item(&name) {
                    if let Some(draft) = item.take() {
                        match finish_item(draft, &meta, feed_url, fetched_at, summary_max_len) {
                            Some(a) => articles.push(a),
                            None => dropped += 1,
                        }
                    }
                } else if let Some(draft) = item.as_mut() {
                    assign_item_field(draft, &name, parent, value);
                } else if is_meta_parent(parent) {
                    match name.as_slice() {
                        b"title" => set_once(&mut meta.title, value),
                        b"link" => set_once(&mut meta.link, value),
                        b"description" | b"subtitle" => set_once(&mut meta.description, value),
                        _ => {}
                    }
                }
            }
            Event::Eof => break,
            _ => {}
        }
    }

    if !saw_root {
        return Err(FetchError::Parse("empty feed document".into()));
    }
    if !stack.is_empty() {
        return Err(FetchError::Parse("unexpected end of document".into()));
    }

    if dropped > 0 {
        counter!("freshness_items_dropped_total", "pipeline" => "news").increment(dropped);
        tracing::warn!(target: "ingest", feed = feed_url, dropped, "skipped items without guid or link");
    }
    histogram!("freshness_parse_ms").record(t0.elapsed().as_secs_f64() * 1_000.0);

    // Articles were built before the channel title may have been seen
    // (RDF puts items after the channel); settle source fields now.
    let feed = FeedMeta {
        title: meta
            .title
            .as_deref()
            .map(clean_text)
            .filter(|t| !t.is_empty())
            .unwrap_or_else(|| UNKNOWN_FEED.to_string()),
        link: non_empty(meta.link).unwrap_or_else(|| feed_url.to_string()),
        description: meta.description.as_deref().map(clean_text).filter(|d| !d.is_empty()),
    };
    for a in &mut articles {
        a.source_name = feed.title.clone();
        a.source_url = feed.link.clone();
    }

    Ok(FeedDocument { feed, articles })
}

fn link_target(stack: &[Vec<u8>], item: &mut Option<ItemDraft>, meta: &mut MetaDraft, href: String) {
    if let Some(draft) = item.as_mut() {
        set_once(&mut draft.link, href);
    } else if stack.last().is_some_and(|p| is_meta_parent(p)) {
        set_once(&mut meta.link, href);
    }
}

fn assign_item_field(draft: &mut ItemDraft, name: &[u8], parent: &[u8], value: String) {
    let slot = match name {
        b"title" => &mut draft.title,
        b"link" => &mut draft.link,
        b"guid" => &mut draft.guid,
        b"id" => &mut draft.id,
        b"pubDate" => &mut draft.pub_date,
        b"published" => &mut draft.published,
        b"updated" => &mut draft.updated,
        b"dc:date" => &mut draft.dc_date,
        b"content:encoded" => &mut draft.content_encoded,
        b"content" => &mut draft.content,
        b"description" => &mut draft.description,
        b"summary" => &mut draft.summary,
        b"dc:creator" => &mut draft.creator,
        b"name" if parent == b"author" => &mut draft.author_name,
        b"author" => &mut draft.author,
        _ => return,
    };
    set_once(slot, value);
}

fn finish_item(
    d: ItemDraft,
    meta: &MetaDraft,
    feed_url: &str,
    fetched_at: DateTime<Utc>,
    summary_max_len: usize,
) -> Option<Article> {
    let link = non_empty(d.link);
    let guid = non_empty(d.guid)
        .or_else(|| non_empty(d.id))
        .or_else(|| link.clone());
    let guid = guid?;

    let url = link.unwrap_or_else(|| {
        if guid.starts_with("http://") || guid.starts_with("https://") {
            guid.clone()
        } else {
            String::new()
        }
    });

    let published_at = [d.pub_date, d.published, d.updated, d.dc_date]
        .into_iter()
        .flatten()
        .find_map(|ts| parse_feed_date(&ts))
        .unwrap_or(fetched_at);

    let summary = [d.content_encoded, d.content, d.description, d.summary]
        .into_iter()
        .flatten()
        .map(|s| clean_text(&s))
        .find(|s| !s.is_empty())
        .map(|s| truncate_with_marker(&s, summary_max_len, TRUNCATION_MARKER));

    let author = [d.creator, d.author, d.author_name]
        .into_iter()
        .flatten()
        .map(|s| clean_text(&s))
        .find(|s| !s.is_empty());

    let title = d
        .title
        .as_deref()
        .map(clean_text)
        .filter(|t| !t.is_empty())
        .unwrap_or_else(|| UNTITLED.to_string());

    Some(Article {
        canonical_id: canonical_id(Some(&guid), &url),
        title,
        url,
        published_at,
        author,
        summary,
        guid: Some(guid),
        source_name: meta.title.clone().unwrap_or_default(),
        source_url: meta.link.clone().unwrap_or_default(),
        feed_url: feed_url.to_string(),
    })
}

/// Fetch + parse seam; the HTTP implementation is swapped for canned feeds in tests.
#[async_trait::async_trait]
pub trait FeedLoader: Send + Sync {
    async fn load(&self, url: &str) -> Result<FeedDocument, FetchError>;
}

pub struct HttpFeedLoader {
    client: reqwest::Client,
    timeout: Duration,
    summary_max_len: usize,
}

impl HttpFeedLoader {
    pub fn new(timeout: Duration, summary_max_len: usize) -> Result<Self> {
        let client = reqwest::Client::builder()
            .user_agent(concat!(env!("CARGO_PKG_NAME"), "/", env!("CARGO_PKG_VERSION")))
            .connect_timeout(timeout.min(Duration::from_secs(5)))
            .timeout(timeout)
            .build()
            .context("building feed http client")?;
        Ok(Self {
            client,
            timeout,
            summary_max_len,
        })
    }
}

#[async_trait::async_trait]
impl FeedLoader for HttpFeedLoader {
    async fn load(&self, url: &str) -> Result<FeedDocument, FetchError> {
        let resp = self
            .client
            .get(url)
            .header(
                reqwest::header::ACCEPT,
                "application/rss+xml, application/atom+xml, application/xml, text/xml;q=0.9, */*;q=0.8",
            )
            .send()
            .await
            .map_err(|e| FetchError::from_reqwest(e, self.timeout))?;
        let status = resp.status();
        if !status.is_success() {
            return Err(FetchError::Status(status.as_u16()));
        }
        let body = resp
            .text()
            .await
            .map_err(|e| FetchError::from_reqwest(e, self.timeout))?;
        parse_feed(&body, url, Utc::now(), self.summary_max_len)
    }
}

/// One configured feed as a pipeline source; the key is the feed URL.
pub struct RssFeedSource {
    key: SourceKey,
    loader: Arc<dyn FeedLoader>,
}

impl RssFeedSource {
    pub fn new(url: impl Into<String>, loader: Arc<dyn FeedLoader>) -> Self {
        Self {
            key: SourceKey::new(url),
            loader,
        }
    }
}

#[async_trait::async_trait]
impl SourceProvider<Article> for RssFeedSource {
    fn key(&self) -> &SourceKey {
        &self.key
    }

    async fn fetch(&self) -> Result<Vec<Article>, FetchError> {
        self.loader
            .load(self.key.as_str())
            .await
            .map(|doc| doc.articles)
    }
}
