//! Domain types shared across the bot.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

// ── Token data ────────────────────────────────────────────────────────

/// Descriptive metadata for a token on the launchpad.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct TokenInfo {
    pub id: String,
    pub name: String,
    pub symbol: String,
    #[serde(default)]
    pub creator: String,
    #[serde(default)]
    pub image_url: Option<String>,
    #[serde(default)]
    pub description: Option<String>,
    /// True once the token left the bonding-curve phase.
    #[serde(default)]
    pub graduated: bool,
    #[serde(default)]
    pub created_at: Option<String>,
}

/// Current market snapshot for a token. Prices are in the native unit.
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq)]
pub struct TokenMarket {
    pub token_id: String,
    #[serde(default)]
    pub price: Option<f64>,
    #[serde(default)]
    pub price_usd: Option<f64>,
    #[serde(default)]
    pub market_cap: Option<f64>,
    #[serde(default)]
    pub volume_24h: Option<f64>,
    #[serde(default)]
    pub holders: Option<u64>,
    #[serde(default)]
    pub buy_count: Option<u64>,
    #[serde(default)]
    pub sell_count: Option<u64>,
}

/// Trading metrics over a timeframe (e.g. "1h").
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq)]
pub struct TokenMetrics {
    pub token_id: String,
    pub timeframe: String,
    #[serde(default)]
    pub price_change: Option<f64>,
    #[serde(default)]
    pub volume_change: Option<f64>,
    #[serde(default)]
    pub buy_volume: Option<f64>,
    #[serde(default)]
    pub sell_volume: Option<f64>,
    #[serde(default)]
    pub net_flow: Option<f64>,
}

impl TokenMetrics {
    pub fn empty(token_id: &str, timeframe: &str) -> Self {
        Self {
            token_id: token_id.to_string(),
            timeframe: timeframe.to_string(),
            ..Default::default()
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct ChartCandle {
    pub timestamp: i64,
    pub open: f64,
    pub high: f64,
    pub low: f64,
    pub close: f64,
    pub volume: f64,
}

/// One entry of a token's recent swap activity.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct ActivityEntry {
    /// Account that traded.
    pub account: String,
    #[serde(default)]
    pub side: Option<String>,
    #[serde(default)]
    pub timestamp: Option<i64>,
}

/// A token position held by some account.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct AccountHolding {
    pub token_id: String,
    #[serde(default)]
    pub graduated: bool,
}

// ── Candidates ────────────────────────────────────────────────────────

/// A token under consideration. Created on first sighting, never re-created.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct Candidate {
    pub id: String,
    pub name: String,
    pub symbol: String,
    pub creator: String,
    pub description: Option<String>,
    /// False once the token graduated out of the tradable phase.
    pub eligible: bool,
    pub discovered_at: DateTime<Utc>,
}

impl Candidate {
    pub fn from_info(info: &TokenInfo, discovered_at: DateTime<Utc>) -> Self {
        Self {
            id: info.id.clone(),
            name: info.name.clone(),
            symbol: info.symbol.clone(),
            creator: info.creator.clone(),
            description: info.description.clone(),
            eligible: !info.graduated,
            discovered_at,
        }
    }
}

// ── Holdings ──────────────────────────────────────────────────────────

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum HoldingStatus {
    Holding,
    Sold,
    Pending,
}

impl HoldingStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            HoldingStatus::Holding => "holding",
            HoldingStatus::Sold => "sold",
            HoldingStatus::Pending => "pending",
        }
    }

    pub fn parse(raw: &str) -> Option<Self> {
        match raw {
            "holding" => Some(HoldingStatus::Holding),
            "sold" => Some(HoldingStatus::Sold),
            "pending" => Some(HoldingStatus::Pending),
            _ => None,
        }
    }
}

/// An open (or closed) position created after a successful buy.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct Holding {
    pub candidate_id: String,
    pub name: String,
    pub symbol: String,
    /// Token amount received.
    pub amount: f64,
    /// Native amount spent on entry.
    pub entry_spend: f64,
    /// Market price observed when the position was opened.
    pub entry_price: f64,
    pub entry_tx: String,
    pub exit_tx: Option<String>,
    pub status: HoldingStatus,
    pub last_price: Option<f64>,
    pub pnl_percent: Option<f64>,
    pub opened_at: DateTime<Utc>,
    pub closed_at: Option<DateTime<Utc>>,
}

impl Holding {
    /// P&L percent at `price` relative to the entry price. `None` when the
    /// entry price is unusable.
    pub fn pnl_percent_at(&self, price: f64) -> Option<f64> {
        if !(self.entry_price > 0.0) || !price.is_finite() {
            return None;
        }
        Some((price - self.entry_price) / self.entry_price * 100.0)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn holding(entry_price: f64) -> Holding {
        Holding {
            candidate_id: "0xabc".into(),
            name: "Test".into(),
            symbol: "TST".into(),
            amount: 1000.0,
            entry_spend: 0.1,
            entry_price,
            entry_tx: "0x1".into(),
            exit_tx: None,
            status: HoldingStatus::Holding,
            last_price: None,
            pnl_percent: None,
            opened_at: Utc::now(),
            closed_at: None,
        }
    }

    #[test]
    fn test_pnl_percent() {
        let h = holding(2.0);
        assert_eq!(h.pnl_percent_at(3.0), Some(50.0));
        let loss = h.pnl_percent_at(1.4).unwrap();
        assert!((loss + 30.0).abs() < 1e-9);
    }

    #[test]
    fn test_pnl_percent_requires_entry_price() {
        assert_eq!(holding(0.0).pnl_percent_at(1.0), None);
    }

    #[test]
    fn test_status_round_trip_strings() {
        for status in [HoldingStatus::Holding, HoldingStatus::Sold, HoldingStatus::Pending] {
            assert_eq!(HoldingStatus::parse(status.as_str()), Some(status));
        }
        assert_eq!(HoldingStatus::parse("open"), None);
    }

    #[test]
    fn test_candidate_eligibility_follows_graduation() {
        let info = TokenInfo {
            id: "0x1".into(),
            name: "A".into(),
            symbol: "A".into(),
            creator: String::new(),
            image_url: None,
            description: None,
            graduated: true,
            created_at: None,
        };
        assert!(!Candidate::from_info(&info, Utc::now()).eligible);
    }
}
