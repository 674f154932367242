//! HTTP client for a signing relay that holds the trading wallet key and
//! submits bonding-curve router transactions on our behalf.

use std::error::Error as StdError;
use std::time::Duration;

use async_trait::async_trait;
use reqwest::{Client, RequestBuilder};
use serde_json::{json, Value};
use tracing::{debug, instrument, warn};

use crate::types::{TradeError, TradeReceipt, TradingProvider};

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

fn number(v: &Value, pointer: &str) -> Option<f64> {
    match v.pointer(pointer)? {
        Value::Number(n) => n.as_f64(),
        Value::String(s) => s.trim().parse().ok(),
        _ => None,
    }
}

pub(crate) fn parse_receipt(raw: &Value) -> Result<TradeReceipt, TradeError> {
    let tx_ref = raw
        .get("tx_hash")
        .or_else(|| raw.get("hash"))
        .and_then(Value::as_str)
        .filter(|h| !h.is_empty())
        .ok_or_else(|| TradeError::Decode(format!("receipt without tx hash: {}", raw)))?;
    Ok(TradeReceipt {
        tx_ref: tx_ref.to_string(),
        amount_out: number(raw, "/amount_out").unwrap_or(0.0),
    })
}

pub struct RelayTradingClient {
    client: Client,
    base_url: String,
    token: Option<String>,
    slippage_bps: u32,
    deadline_secs: u64,
}

impl RelayTradingClient {
    pub fn new(
        base_url: &str,
        token: Option<String>,
        slippage_bps: u32,
        deadline_secs: u64,
    ) -> Result<Self, TradeError> {
        let client = Client::builder()
            // Writes wait for the transaction receipt.
            .timeout(Duration::from_secs(deadline_secs.max(30) + 30))
            .build()
            .map_err(|e| TradeError::Http(format_reqwest_error(&e)))?;
        Ok(Self {
            client,
            base_url: base_url.trim().trim_end_matches('/').to_string(),
            token: token.filter(|t| !t.trim().is_empty()),
            slippage_bps,
            deadline_secs,
        })
    }

    fn authorized(&self, req: RequestBuilder) -> RequestBuilder {
        match &self.token {
            Some(token) => req.bearer_auth(token),
            None => req,
        }
    }

    async fn send(&self, req: RequestBuilder, what: &str) -> Result<Value, TradeError> {
        let resp = self
            .authorized(req)
            .send()
            .await
            .map_err(|e| TradeError::Http(format_reqwest_error(&e)))?;
        let status = resp.status();
        if !status.is_success() {
            let body = resp.text().await.unwrap_or_default();
            warn!("Relay {} failed with {}", what, status);
            return Err(TradeError::Relay {
                status: status.as_u16(),
                body,
            });
        }
        debug!("Relay {} -> {}", what, status);
        resp.json()
            .await
            .map_err(|e| TradeError::Decode(format_reqwest_error(&e)))
    }

    async fn token_status(&self, id: &str) -> Result<Value, TradeError> {
        let url = format!("{}/tokens/{}/status", self.base_url, id);
        self.send(self.client.get(url), "status").await
    }
}

#[async_trait]
impl TradingProvider for RelayTradingClient {
    #[instrument(skip(self))]
    async fn can_trade(&self, id: &str) -> Result<bool, TradeError> {
        let status = self.token_status(id).await?;
        let graduated = status.get("graduated").and_then(Value::as_bool).unwrap_or(false);
        let locked = status.get("locked").and_then(Value::as_bool).unwrap_or(false);
        Ok(!graduated && !locked)
    }

    #[instrument(skip(self))]
    async fn progress(&self, id: &str) -> Result<f64, TradeError> {
        let status = self.token_status(id).await?;
        // The curve reports progress in basis points.
        number(&status, "/progress_bps")
            .map(|bps| bps / 100.0)
            .ok_or_else(|| TradeError::Decode("status without progress_bps".into()))
    }

    #[instrument(skip(self))]
    async fn buy(&self, id: &str, amount: f64) -> Result<TradeReceipt, TradeError> {
        let body = json!({
            "token": id,
            "amount_native": amount.to_string(),
            "slippage_bps": self.slippage_bps,
            "deadline_secs": self.deadline_secs,
        });
        let raw = self
            .send(self.client.post(format!("{}/buy", self.base_url)).json(&body), "buy")
            .await?;
        parse_receipt(&raw)
    }

    #[instrument(skip(self))]
    async fn sell(&self, id: &str) -> Result<TradeReceipt, TradeError> {
        let body = json!({
            "token": id,
            "amount": "all",
            "slippage_bps": self.slippage_bps,
            "deadline_secs": self.deadline_secs,
        });
        let raw = self
            .send(self.client.post(format!("{}/sell", self.base_url)).json(&body), "sell")
            .await?;
        parse_receipt(&raw)
    }

    #[instrument(skip(self))]
    async fn balance(&self) -> Result<f64, TradeError> {
        let raw = self
            .send(self.client.get(format!("{}/balance", self.base_url)), "balance")
            .await?;
        number(&raw, "/balance").ok_or_else(|| TradeError::Decode("missing balance".into()))
    }
}
