//! REST client for the launchpad's agent API.
//!
//! Responses wrap their payload (`token_info`, `market_info`, `metrics`) and
//! encode most numbers as strings, so records are parsed field by field.

use std::error::Error as StdError;
use std::time::Duration;

use async_trait::async_trait;
use common::{AccountHolding, ActivityEntry, ChartCandle, TokenInfo, TokenMarket, TokenMetrics};
use reqwest::Client;
use serde_json::Value;
use tracing::{debug, instrument};

use crate::provider::{ProviderError, TokenDataProvider};

pub const MAINNET_API_URL: &str = "https://api.nadapp.net";
pub const TESTNET_API_URL: &str = "https://dev-api.nad.fun";

fn format_reqwest_error(err: &reqwest::Error) -> String {
    let mut message = err.to_string();
    let mut source = err.source();
    while let Some(cause) = source {
        let cause_msg = cause.to_string();
        if !cause_msg.is_empty() && !message.contains(&cause_msg) {
            message.push_str(": ");
            message.push_str(&cause_msg);
        }
        source = cause.source();
    }
    message
}

fn text(v: &Value, key: &str) -> Option<String> {
    match v.get(key)? {
        Value::String(s) if !s.is_empty() => Some(s.clone()),
        Value::Number(n) => Some(n.to_string()),
        _ => None,
    }
}

fn number(v: &Value, key: &str) -> Option<f64> {
    match v.get(key)? {
        Value::Number(n) => n.as_f64(),
        Value::String(s) => s.trim().parse().ok(),
        _ => None,
    }
}

fn count(v: &Value, key: &str) -> Option<u64> {
    number(v, key).filter(|n| *n >= 0.0).map(|n| n as u64)
}

/// Payload under `key`, or the document itself when it is not wrapped.
fn unwrap_payload<'a>(raw: &'a Value, key: &str) -> &'a Value {
    raw.get(key).unwrap_or(raw)
}

/// First array found at the root or under one of `keys`.
fn list<'a>(raw: &'a Value, keys: &[&str]) -> &'a [Value] {
    if let Some(items) = raw.as_array() {
        return items;
    }
    keys.iter()
        .find_map(|k| raw.get(*k).and_then(Value::as_array))
        .map(Vec::as_slice)
        .unwrap_or(&[])
}

pub(crate) fn parse_token_info(id: &str, raw: &Value) -> TokenInfo {
    let t = unwrap_payload(raw, "token_info");
    let creator = t
        .get("creator")
        .and_then(|c| text(c, "account_id"))
        .or_else(|| text(t, "creator"))
        .unwrap_or_default();
    TokenInfo {
        id: text(t, "token_id").unwrap_or_else(|| id.to_string()),
        name: text(t, "name").unwrap_or_else(|| "Unknown".into()),
        symbol: text(t, "symbol").unwrap_or_else(|| "???".into()),
        creator,
        image_url: text(t, "image_uri"),
        description: text(t, "description"),
        graduated: t.get("is_graduated").and_then(Value::as_bool).unwrap_or(false),
        created_at: text(t, "created_at"),
    }
}

pub(crate) fn parse_market(id: &str, raw: &Value) -> TokenMarket {
    let m = unwrap_payload(raw, "market_info");
    TokenMarket {
        token_id: text(m, "token_id").unwrap_or_else(|| id.to_string()),
        price: number(m, "price_native").or_else(|| number(m, "price")),
        price_usd: number(m, "price_usd").or_else(|| number(m, "price")),
        market_cap: number(m, "market_cap"),
        volume_24h: number(m, "volume"),
        holders: count(m, "holder_count"),
        buy_count: count(m, "buy_count"),
        sell_count: count(m, "sell_count"),
    }
}

pub(crate) fn parse_metrics(id: &str, timeframe: &str, raw: &Value) -> TokenMetrics {
    let mut m = unwrap_payload(raw, "metrics");
    // `metrics` may be a per-timeframe list.
    if let Some(items) = m.as_array() {
        m = items
            .iter()
            .find(|item| text(item, "timeframe").as_deref() == Some(timeframe))
            .or_else(|| items.first())
            .unwrap_or(&Value::Null);
    }
    TokenMetrics {
        token_id: text(m, "token_id").unwrap_or_else(|| id.to_string()),
        timeframe: text(m, "timeframe").unwrap_or_else(|| timeframe.to_string()),
        price_change: number(m, "price_change"),
        volume_change: number(m, "volume_change"),
        buy_volume: number(m, "buy_volume"),
        sell_volume: number(m, "sell_volume"),
        net_flow: number(m, "net_flow"),
    }
}

pub(crate) fn parse_chart(raw: &Value) -> Vec<ChartCandle> {
    list(raw, &["chart", "candles", "data"])
        .iter()
        .filter_map(|c| {
            Some(ChartCandle {
                timestamp: number(c, "timestamp").or_else(|| number(c, "t"))? as i64,
                open: number(c, "open")?,
                high: number(c, "high")?,
                low: number(c, "low")?,
                close: number(c, "close")?,
                volume: number(c, "volume").unwrap_or(0.0),
            })
        })
        .collect()
}

pub(crate) fn parse_activity(raw: &Value) -> Vec<ActivityEntry> {
    list(raw, &["swaps", "history", "data"])
        .iter()
        .filter_map(|entry| {
            let account = ["account_id", "account", "sender", "trader"]
                .iter()
                .find_map(|k| text(entry, k))
                .or_else(|| entry.get("account").and_then(|a| text(a, "account_id")))?;
            Some(ActivityEntry {
                account,
                side: text(entry, "event_type").or_else(|| text(entry, "side")),
                timestamp: number(entry, "created_at")
                    .or_else(|| number(entry, "timestamp"))
                    .map(|t| t as i64),
            })
        })
        .collect()
}

pub(crate) fn parse_holdings(raw: &Value) -> Vec<AccountHolding> {
    list(raw, &["tokens", "holdings", "data"])
        .iter()
        .filter_map(|entry| {
            let token = entry.get("token_info").unwrap_or(entry);
            Some(AccountHolding {
                token_id: text(token, "token_id")?,
                graduated: token
                    .get("is_graduated")
                    .and_then(Value::as_bool)
                    .unwrap_or(false),
            })
        })
        .collect()
}

#[derive(Clone)]
pub struct NadFunClient {
    client: Client,
    base_url: String,
    api_key: Option<String>,
}

impl NadFunClient {
    pub fn new(base_url: &str, api_key: Option<String>) -> Result<Self, ProviderError> {
        let client = Client::builder()
            .pool_max_idle_per_host(4)
            .timeout(Duration::from_secs(15))
            .build()
            .map_err(|e| ProviderError::Http(format_reqwest_error(&e)))?;
        Ok(Self {
            client,
            base_url: base_url.trim().trim_end_matches('/').to_string(),
            api_key: api_key.filter(|k| !k.trim().is_empty()),
        })
    }

    async fn get(&self, path: &str) -> Result<Value, ProviderError> {
        let mut req = self.client.get(format!("{}{}", self.base_url, path));
        if let Some(key) = &self.api_key {
            req = req.header("X-API-Key", key);
        }

        let resp = req
            .send()
            .await
            .map_err(|e| ProviderError::Http(format_reqwest_error(&e)))?;
        let status = resp.status();
        if !status.is_success() {
            let body = resp.text().await.unwrap_or_default();
            return Err(ProviderError::Api {
                status: status.as_u16(),
                path: path.to_string(),
                body,
            });
        }

        debug!("GET {} -> {}", path, status);
        resp.json().await.map_err(|e| ProviderError::Decode {
            path: path.to_string(),
            message: format_reqwest_error(&e),
        })
    }
}

#[async_trait]
impl TokenDataProvider for NadFunClient {
    #[instrument(skip(self))]
    async fn info(&self, id: &str) -> Result<TokenInfo, ProviderError> {
        let raw = self.get(&format!("/agent/token/{}", id)).await?;
        Ok(parse_token_info(id, &raw))
    }

    #[instrument(skip(self))]
    async fn market(&self, id: &str) -> Result<TokenMarket, ProviderError> {
        let raw = self.get(&format!("/agent/market/{}", id)).await?;
        Ok(parse_market(id, &raw))
    }

    #[instrument(skip(self))]
    async fn metrics(&self, id: &str, timeframe: &str) -> Result<TokenMetrics, ProviderError> {
        let raw = self
            .get(&format!("/agent/metrics/{}?timeframes={}", id, timeframe))
            .await?;
        Ok(parse_metrics(id, timeframe, &raw))
    }

    #[instrument(skip(self))]
    async fn chart(&self, id: &str) -> Result<Vec<ChartCandle>, ProviderError> {
        let raw = self.get(&format!("/agent/chart/{}", id)).await?;
        Ok(parse_chart(&raw))
    }

    #[instrument(skip(self))]
    async fn recent_activity(&self, id: &str) -> Result<Vec<ActivityEntry>, ProviderError> {
        let raw = self.get(&format!("/agent/swap-history/{}", id)).await?;
        Ok(parse_activity(&raw))
    }

    #[instrument(skip(self))]
    async fn holdings_of(&self, account: &str) -> Result<Vec<AccountHolding>, ProviderError> {
        let raw = self.get(&format!("/agent/holdings/{}", account)).await?;
        Ok(parse_holdings(&raw))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_parse_wrapped_token_info() {
        let raw = json!({ "token_info": {
            "token_id": "0xabc",
            "name": "ClawNad",
            "symbol": "CLAWN",
            "creator": { "account_id": "0xcreator" },
            "is_graduated": false,
            "created_at": 1738000000
        }});
        let info = parse_token_info("0xabc", &raw);
        assert_eq!(info.name, "ClawNad");
        assert_eq!(info.creator, "0xcreator");
        assert_eq!(info.created_at.as_deref(), Some("1738000000"));
        assert!(!info.graduated);
    }

    #[test]
    fn test_parse_token_info_defaults() {
        let info = parse_token_info("0xdef", &json!({}));
        assert_eq!(info.id, "0xdef");
        assert_eq!(info.name, "Unknown");
        assert_eq!(info.symbol, "???");
    }

    #[test]
    fn test_parse_market_string_numbers() {
        let raw = json!({ "market_info": {
            "price_native": "0.000012",
            "price_usd": 0.0004,
            "holder_count": "143",
            "volume": "5120.5"
        }});
        let market = parse_market("0xabc", &raw);
        assert_eq!(market.price, Some(0.000012));
        assert_eq!(market.price_usd, Some(0.0004));
        assert_eq!(market.holders, Some(143));
        assert_eq!(market.volume_24h, Some(5120.5));
        assert_eq!(market.buy_count, None);
    }

    #[test]
    fn test_parse_metrics_list_picks_timeframe() {
        let raw = json!({ "metrics": [
            { "timeframe": "5m", "price_change": 1.0 },
            { "timeframe": "1h", "price_change": -4.5 }
        ]});
        let metrics = parse_metrics("0xabc", "1h", &raw);
        assert_eq!(metrics.price_change, Some(-4.5));
    }

    #[test]
    fn test_parse_activity_and_holdings() {
        let activity = parse_activity(&json!({ "swaps": [
            { "account_id": "0x1", "event_type": "BUY" },
            { "account": { "account_id": "0x2" } },
            { "amount": "3" }
        ]}));
        let accounts: Vec<_> = activity.iter().map(|a| a.account.as_str()).collect();
        assert_eq!(accounts, ["0x1", "0x2"]);

        let holdings = parse_holdings(&json!([
            { "token_info": { "token_id": "0xaa", "is_graduated": true } },
            { "token_id": "0xbb" }
        ]));
        assert_eq!(holdings.len(), 2);
        assert!(holdings[0].graduated);
        assert_eq!(holdings[1].token_id, "0xbb");
    }

    #[test]
    fn test_parse_chart_skips_incomplete_candles() {
        let candles = parse_chart(&json!([
            { "t": 1, "open": 1, "high": 2, "low": 0.5, "close": "1.5", "volume": 10 },
            { "t": 2, "open": 1 }
        ]));
        assert_eq!(candles.len(), 1);
        assert_eq!(candles[0].close, 1.5);
    }
}
