//! In-memory providers shared by the binary's unit tests.

use std::collections::{HashMap, HashSet};
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};

use async_trait::async_trait;
use candidate_engine::{ProviderError, TokenDataProvider};
use common::{AccountHolding, ActivityEntry, ChartCandle, TokenInfo, TokenMarket, TokenMetrics};
use execution_engine::{TradeError, TradeReceipt, TradingProvider};
use llm_client::{Generation, LlmError, TextGenerator};
use publish_client::{Identity, PublishError, PublishResponse, PublishingProvider};
use serde_json::{json, Value};

use crate::journal::{EventJournal, SharedJournal};
use crate::store::SqliteStore;

fn not_found(path: &str) -> ProviderError {
    ProviderError::Api {
        status: 404,
        path: path.to_string(),
        body: "not found".into(),
    }
}

#[derive(Default)]
pub struct FakeTokens {
    tokens: Mutex<HashMap<String, (TokenInfo, Option<f64>)>>,
    failing_market: Mutex<HashSet<String>>,
    traders: Mutex<HashMap<String, Vec<String>>>,
    portfolios: Mutex<HashMap<String, Vec<String>>>,
    pub info_calls: AtomicUsize,
}

impl FakeTokens {
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    pub fn add(&self, id: &str, price: Option<f64>, graduated: bool) {
        let info = TokenInfo {
            id: id.to_string(),
            name: format!("Token {}", id),
            symbol: id.trim_start_matches("0x").to_uppercase(),
            creator: "0xcreator".into(),
            image_url: None,
            description: Some("test token".into()),
            graduated,
            created_at: None,
        };
        self.tokens
            .lock()
            .unwrap()
            .insert(id.to_string(), (info, price));
    }

    pub fn set_price(&self, id: &str, price: Option<f64>) {
        if let Some(entry) = self.tokens.lock().unwrap().get_mut(id) {
            entry.1 = price;
        }
    }

    pub fn fail_market(&self, id: &str) {
        self.failing_market.lock().unwrap().insert(id.to_string());
    }

    /// `account` recently traded `token` and now holds `holds`.
    pub fn add_trader(&self, token: &str, account: &str, holds: &[&str]) {
        self.traders
            .lock()
            .unwrap()
            .entry(token.to_string())
            .or_default()
            .push(account.to_string());
        self.portfolios.lock().unwrap().insert(
            account.to_string(),
            holds.iter().map(|h| h.to_string()).collect(),
        );
    }
}

#[async_trait]
impl TokenDataProvider for FakeTokens {
    async fn info(&self, id: &str) -> Result<TokenInfo, ProviderError> {
        self.info_calls.fetch_add(1, Ordering::SeqCst);
        self.tokens
            .lock()
            .unwrap()
            .get(id)
            .map(|(info, _)| info.clone())
            .ok_or_else(|| not_found("/agent/token"))
    }

    async fn market(&self, id: &str) -> Result<TokenMarket, ProviderError> {
        if self.failing_market.lock().unwrap().contains(id) {
            return Err(ProviderError::Http("connection reset".into()));
        }
        let price = self
            .tokens
            .lock()
            .unwrap()
            .get(id)
            .map(|(_, price)| *price)
            .ok_or_else(|| not_found("/agent/market"))?;
        Ok(TokenMarket {
            token_id: id.to_string(),
            price,
            ..Default::default()
        })
    }

    async fn metrics(&self, _id: &str, _timeframe: &str) -> Result<TokenMetrics, ProviderError> {
        Err(not_found("/agent/metrics"))
    }

    async fn chart(&self, _id: &str) -> Result<Vec<ChartCandle>, ProviderError> {
        Ok(Vec::new())
    }

    async fn recent_activity(&self, id: &str) -> Result<Vec<ActivityEntry>, ProviderError> {
        let traders = self.traders.lock().unwrap();
        Ok(traders
            .get(id)
            .map(|accounts| {
                accounts
                    .iter()
                    .map(|account| ActivityEntry {
                        account: account.clone(),
                        side: Some("buy".into()),
                        timestamp: None,
                    })
                    .collect()
            })
            .unwrap_or_default())
    }

    async fn holdings_of(&self, account: &str) -> Result<Vec<AccountHolding>, ProviderError> {
        let portfolios = self.portfolios.lock().unwrap();
        let tokens = self.tokens.lock().unwrap();
        Ok(portfolios
            .get(account)
            .map(|ids| {
                ids.iter()
                    .map(|id| AccountHolding {
                        token_id: id.clone(),
                        graduated: tokens.get(id).map(|(info, _)| info.graduated).unwrap_or(false),
                    })
                    .collect()
            })
            .unwrap_or_default())
    }
}

pub struct FakeTrading {
    pub balance: Mutex<f64>,
    untradable: Mutex<HashSet<String>>,
    pub fail_buys: AtomicBool,
    pub fail_sells: AtomicBool,
    pub buys: AtomicUsize,
    pub sells: AtomicUsize,
}

impl FakeTrading {
    pub fn new(balance: f64) -> Arc<Self> {
        Arc::new(Self {
            balance: Mutex::new(balance),
            untradable: Mutex::new(HashSet::new()),
            fail_buys: AtomicBool::new(false),
            fail_sells: AtomicBool::new(false),
            buys: AtomicUsize::new(0),
            sells: AtomicUsize::new(0),
        })
    }

    pub fn lock_token(&self, id: &str) {
        self.untradable.lock().unwrap().insert(id.to_string());
    }
}

#[async_trait]
impl TradingProvider for FakeTrading {
    async fn can_trade(&self, id: &str) -> Result<bool, TradeError> {
        Ok(!self.untradable.lock().unwrap().contains(id))
    }

    async fn progress(&self, _id: &str) -> Result<f64, TradeError> {
        Ok(12.5)
    }

    async fn buy(&self, _id: &str, amount: f64) -> Result<TradeReceipt, TradeError> {
        self.buys.fetch_add(1, Ordering::SeqCst);
        if self.fail_buys.load(Ordering::SeqCst) {
            return Err(TradeError::Relay {
                status: 500,
                body: "execution reverted".into(),
            });
        }
        *self.balance.lock().unwrap() -= amount;
        Ok(TradeReceipt {
            tx_ref: format!("0xbuy{}", self.buys.load(Ordering::SeqCst)),
            amount_out: amount * 10_000.0,
        })
    }

    async fn sell(&self, _id: &str) -> Result<TradeReceipt, TradeError> {
        self.sells.fetch_add(1, Ordering::SeqCst);
        if self.fail_sells.load(Ordering::SeqCst) {
            return Err(TradeError::Rejected("insufficient liquidity".into()));
        }
        Ok(TradeReceipt {
            tx_ref: format!("0xsell{}", self.sells.load(Ordering::SeqCst)),
            amount_out: 0.1,
        })
    }

    async fn balance(&self) -> Result<f64, TradeError> {
        Ok(*self.balance.lock().unwrap())
    }
}

/// Board that records every submission.
#[derive(Default)]
pub struct FakeBoard {
    pub threads: Mutex<Vec<(String, String, String)>>,
    pub replies: Mutex<Vec<(String, String, String)>>,
    pub fail_threads: AtomicBool,
}

impl FakeBoard {
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }
}

#[async_trait]
impl PublishingProvider for FakeBoard {
    async fn create_thread(
        &self,
        identity: &Identity,
        title: &str,
        body: &str,
    ) -> Result<PublishResponse, PublishError> {
        if self.fail_threads.load(Ordering::SeqCst) {
            return Err(PublishError::Api {
                status: 429,
                body: "slow down".into(),
            });
        }
        let mut threads = self.threads.lock().unwrap();
        threads.push((identity.to_string(), title.to_string(), body.to_string()));
        Ok(PublishResponse::from_value(
            json!({ "post": { "id": format!("thread-{}", threads.len()) } }),
        ))
    }

    async fn create_reply(
        &self,
        identity: &Identity,
        thread_id: &str,
        body: &str,
        _parent_id: Option<&str>,
    ) -> Result<PublishResponse, PublishError> {
        let mut replies = self.replies.lock().unwrap();
        replies.push((identity.to_string(), thread_id.to_string(), body.to_string()));
        Ok(PublishResponse::from_value(
            json!({ "comment": { "id": format!("reply-{}", replies.len()) } }),
        ))
    }

    async fn verify(
        &self,
        _identity: &Identity,
        _code: &str,
        _answer: &str,
    ) -> Result<Value, PublishError> {
        Ok(json!({ "success": true }))
    }
}

/// Generator that answers every prompt with the same text.
pub struct FixedGenerator(pub String);

impl FixedGenerator {
    pub fn vote(score: u8, yes: bool) -> Arc<Self> {
        Arc::new(Self(format!(
            r#"{{"score": {}, "vote": "{}", "confidence": 80, "rationale": "fixed"}}"#,
            score,
            if yes { "YES" } else { "NO" }
        )))
    }
}

#[async_trait]
impl TextGenerator for FixedGenerator {
    fn name(&self) -> &str {
        "fixed"
    }

    async fn generate(&self, _instructions: &str, _input: &str) -> Result<Generation, LlmError> {
        Ok(Generation {
            content: self.0.clone(),
            model: "fixed".into(),
            cached: false,
        })
    }
}

pub fn temp_journal() -> (tempfile::TempDir, SharedJournal) {
    let tmp = tempfile::tempdir().unwrap();
    let journal = EventJournal::open(tmp.path().join("events")).unwrap();
    (tmp, journal.shared())
}

pub fn memory_store() -> Arc<SqliteStore> {
    Arc::new(SqliteStore::open_in_memory().unwrap())
}
