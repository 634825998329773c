// src/config/tickers.rs
use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};

/// Display id exposed to clients, and the symbol the quote API knows it by.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TickerDefinition {
    pub id: String,
    pub data_symbol: String,
}

/// Data symbol -> display ids, preserving first-seen id order per symbol.
/// Several ids may share one upstream symbol (e.g. `btcusd` and `btcusdt`).
pub fn group_by_symbol(tickers: &[TickerDefinition]) -> BTreeMap<String, Vec<String>> {
    let mut out: BTreeMap<String, Vec<String>> = BTreeMap::new();
    for t in tickers {
        let ids = out.entry(t.data_symbol.clone()).or_default();
        if !ids.contains(&t.id) {
            ids.push(t.id.clone());
        }
    }
    out
}

pub fn default_tickers() -> Vec<TickerDefinition> {
    [
        ("aapl", "AAPL"),
        ("msft", "MSFT"),
        ("googl", "GOOGL"),
        ("amzn", "AMZN"),
        ("meta", "META"),
        ("nvda", "NVDA"),
        ("tsla", "TSLA"),
        ("spx", "^GSPC"),
        ("ndx", "^NDX"),
        ("dji", "^DJI"),
        ("rut", "^RUT"),
        ("eurusd", "EURUSD=X"),
        ("gbpusd", "GBPUSD=X"),
        ("usdjpy", "USDJPY=X"),
        ("audusd", "AUDUSD=X"),
        ("usdcad", "USDCAD=X"),
        ("btcusd", "BTC-USD"),
        ("ethusd", "ETH-USD"),
        ("btcusdt", "BTC-USD"),
        ("ethusdt", "ETH-USD"),
        ("gold", "GC=F"),
        ("silver", "SI=F"),
        ("wti", "CL=F"),
        ("brent", "BZ=F"),
    ]
    .into_iter()
    .map(|(id, sym)| TickerDefinition {
        id: id.to_string(),
        data_symbol: sym.to_string(),
    })
    .collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn shared_symbols_are_grouped() {
        let groups = group_by_symbol(&default_tickers());
        assert_eq!(groups.len(), 22);
        assert_eq!(groups["BTC-USD"], vec!["btcusd", "btcusdt"]);
        assert_eq!(groups["AAPL"], vec!["aapl"]);
    }
}
