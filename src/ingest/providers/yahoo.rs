// src/ingest/providers/yahoo.rs
//! Quote source backed by the public chart endpoint.

use std::sync::Arc;
use std::time::Duration;

use anyhow::{anyhow, Context, Result};
use metrics::counter;
use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::ingest::types::{FetchError, Quote, SourceKey, SourceProvider};

/// Where a quote's price may come from, tried in configured order.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PriceField {
    RegularMarketPrice,
    PreviousClose,
    ChartPreviousClose,
    RegularMarketOpen,
    /// First finite open of the intraday series.
    FirstOpen,
}

impl PriceField {
    pub fn default_precedence() -> Vec<PriceField> {
        vec![
            PriceField::RegularMarketPrice,
            PriceField::PreviousClose,
            PriceField::ChartPreviousClose,
            PriceField::RegularMarketOpen,
            PriceField::FirstOpen,
        ]
    }

    /// `result` is one element of `chart.result`.
    pub fn extract(self, result: &Value) -> Option<f64> {
        let meta = &result["meta"];
        match self {
            PriceField::RegularMarketPrice => number_at(&meta["regularMarketPrice"]),
            PriceField::PreviousClose => number_at(&meta["previousClose"]),
            PriceField::ChartPreviousClose => number_at(&meta["chartPreviousClose"]),
            PriceField::RegularMarketOpen => number_at(&meta["regularMarketOpen"]),
            PriceField::FirstOpen => series(result, "open").into_iter().next(),
        }
    }
}

/// Accepts `1.5`, `"1.5"` and `{"raw": 1.5}`; anything non-finite is absent.
pub fn number_at(v: &Value) -> Option<f64> {
    let n = match v {
        Value::Number(n) => n.as_f64(),
        Value::String(s) => s.trim().parse::<f64>().ok(),
        Value::Object(o) => o.get("raw").and_then(number_at),
        _ => None,
    }?;
    n.is_finite().then_some(n)
}

fn series(result: &Value, field: &str) -> Vec<f64> {
    result["indicators"]["quote"][0][field]
        .as_array()
        .map(|xs| xs.iter().filter_map(number_at).collect())
        .unwrap_or_default()
}

fn reference_close(meta: &Value) -> Option<f64> {
    number_at(&meta["previousClose"])
        .or_else(|| number_at(&meta["chartPreviousClose"]))
        .filter(|c| *c != 0.0)
}

/// Build one quote per display id from a chart payload.
/// No usable price drops the quotes (counted) but does not fail the source.
pub fn normalize_chart(
    ids: &[String],
    payload: &Value,
    precedence: &[PriceField],
) -> Result<Vec<Quote>, FetchError> {
    let chart = &payload["chart"];
    if !chart["error"].is_null() {
        let msg = chart["error"]["description"]
            .as_str()
            .or_else(|| chart["error"]["code"].as_str())
            .unwrap_or("unknown chart error");
        return Err(FetchError::Parse(format!("chart error: {msg}")));
    }
    let Some(result) = chart["result"].get(0).filter(|r| r.is_object()) else {
        return Err(FetchError::Parse("chart payload has no result".into()));
    };

    let Some(price) = precedence.iter().find_map(|f| f.extract(result)) else {
        counter!("freshness_items_dropped_total", "pipeline" => "quotes").increment(ids.len() as u64);
        tracing::warn!(target: "ingest", ids = ?ids, "no usable price; dropping quote");
        return Ok(Vec::new());
    };

    let meta = &result["meta"];
    let reference = reference_close(meta);
    // Derived values can overflow (tiny reference close); JSON has no infinity.
    let change = number_at(&meta["regularMarketChange"])
        .or_else(|| reference.map(|r| price - r).filter(|v| v.is_finite()))
        .unwrap_or(0.0);
    let change_percent = number_at(&meta["regularMarketChangePercent"])
        .or_else(|| reference.map(|r| change / r * 100.0).filter(|v| v.is_finite()))
        .unwrap_or(0.0);
    let closes = series(result, "close");
    let sparkline = (!closes.is_empty()).then_some(closes);

    Ok(ids
        .iter()
        .map(|id| Quote {
            id: id.clone(),
            price,
            change,
            change_percent,
            sparkline: sparkline.clone(),
        })
        .collect())
}

pub struct YahooChartClient {
    client: reqwest::Client,
    base_url: reqwest::Url,
    timeout: Duration,
}

impl YahooChartClient {
    pub fn new(base_url: &str, timeout: Duration) -> Result<Self> {
        let base_url = reqwest::Url::parse(base_url)
            .with_context(|| format!("invalid quote api base url {base_url}"))?;
        if base_url.cannot_be_a_base() {
            return Err(anyhow!("quote api base url cannot be a base: {base_url}"));
        }
        let client = reqwest::Client::builder()
            .user_agent(concat!(env!("CARGO_PKG_NAME"), "/", env!("CARGO_PKG_VERSION")))
            .timeout(timeout)
            .build()
            .context("building quote http client")?;
        Ok(Self {
            client,
            base_url,
            timeout,
        })
    }

    pub fn chart_url(&self, symbol: &str) -> reqwest::Url {
        let mut url = self.base_url.clone();
        if let Ok(mut segs) = url.path_segments_mut() {
            segs.pop_if_empty()
                .extend(["v8", "finance", "chart", symbol]);
        }
        url.query_pairs_mut()
            .append_pair("range", "1d")
            .append_pair("interval", "15m");
        url
    }

    pub async fn chart(&self, symbol: &str) -> Result<Value, FetchError> {
        let resp = self
            .client
            .get(self.chart_url(symbol))
            .send()
            .await
            .map_err(|e| FetchError::from_reqwest(e, self.timeout))?;
        let status = resp.status();
        // The API reports unknown symbols as 404 with a chart.error body.
        if !status.is_success() && status != reqwest::StatusCode::NOT_FOUND {
            return Err(FetchError::Status(status.as_u16()));
        }
        let body: Value = resp.json().await.map_err(|e| {
            if e.is_decode() {
                FetchError::Parse(e.to_string())
            } else {
                FetchError::from_reqwest(e, self.timeout)
            }
        })?;
        Ok(body)
    }
}

/// All display ids that share one data symbol, fetched with one call.
pub struct YahooQuoteSource {
    key: SourceKey,
    ids: Vec<String>,
    client: Arc<YahooChartClient>,
    precedence: Arc<[PriceField]>,
}

impl YahooQuoteSource {
    pub fn new(
        symbol: impl Into<String>,
        ids: Vec<String>,
        client: Arc<YahooChartClient>,
        precedence: Arc<[PriceField]>,
    ) -> Self {
        Self {
            key: SourceKey::new(symbol),
            ids,
            client,
            precedence,
        }
    }
}

#[async_trait::async_trait]
impl SourceProvider<Quote> for YahooQuoteSource {
    fn key(&self) -> &SourceKey {
        &self.key
    }

    async fn fetch(&self) -> Result<Vec<Quote>, FetchError> {
        let payload = self.client.chart(self.key.as_str()).await?;
        normalize_chart(&self.ids, &payload, &self.precedence)
    }
}
