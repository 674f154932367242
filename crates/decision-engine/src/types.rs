use std::collections::BTreeMap;
use std::fmt;

use chrono::{DateTime, Utc};
use common::{Candidate, ChartCandle, TokenMarket, TokenMetrics};
use schemars::JsonSchema;
use serde::{Deserialize, Serialize};

// ── Panel roles ───────────────────────────────────────────────────────

/// The four fixed evaluator seats. Ordering is the panel's speaking order.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Role {
    Alpha,
    Degen,
    Sage,
    Contrarian,
}

impl Role {
    pub const ALL: [Role; 4] = [Role::Alpha, Role::Degen, Role::Sage, Role::Contrarian];

    /// Relative weight in the aggregated score.
    pub fn weight(&self) -> f64 {
        match self {
            Role::Alpha => 1.0,
            Role::Degen => 0.8,
            Role::Sage => 1.0,
            Role::Contrarian => 1.2,
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            Role::Alpha => "alpha",
            Role::Degen => "degen",
            Role::Sage => "sage",
            Role::Contrarian => "contrarian",
        }
    }

    pub fn label(&self) -> &'static str {
        match self {
            Role::Alpha => "ALPHA",
            Role::Degen => "DEGEN",
            Role::Sage => "SAGE",
            Role::Contrarian => "CONTRARIAN",
        }
    }
}

impl fmt::Display for Role {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

// ── Votes ─────────────────────────────────────────────────────────────

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, JsonSchema)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum Recommendation {
    Yes,
    No,
}

impl Recommendation {
    pub fn as_str(&self) -> &'static str {
        match self {
            Recommendation::Yes => "YES",
            Recommendation::No => "NO",
        }
    }
}

/// One evaluator's structured judgment of a candidate.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, JsonSchema)]
pub struct EvaluationVote {
    /// 1 = terrible, 10 = exceptional.
    pub score: u8,
    pub vote: Recommendation,
    /// 0 to 100.
    pub confidence: u8,
    /// Two to four sentences in the evaluator's voice.
    #[serde(alias = "analysis")]
    pub rationale: String,
    /// Set only for serious rug or scam risk. Vetoes the whole panel.
    #[serde(default, alias = "criticalFlag")]
    pub critical_flag: bool,
}

impl EvaluationVote {
    pub fn new(score: u8, vote: Recommendation, confidence: u8, rationale: &str) -> Self {
        Self {
            score,
            vote,
            confidence,
            rationale: rationale.to_string(),
            critical_flag: false,
        }
    }

    /// Conservative vote substituted when an evaluator cannot produce one.
    pub fn fallback(role: Role) -> Self {
        Self::new(
            3,
            Recommendation::No,
            20,
            &format!("[{}] Analysis failed, defaulting to a conservative NO vote.", role),
        )
    }

    pub fn flagged(mut self) -> Self {
        self.critical_flag = true;
        self
    }

    pub fn validate(&self) -> Result<(), String> {
        if !(1..=10).contains(&self.score) {
            return Err(format!("score {} outside 1..=10", self.score));
        }
        if self.confidence > 100 {
            return Err(format!("confidence {} outside 0..=100", self.confidence));
        }
        if self.rationale.trim().is_empty() {
            return Err("empty rationale".into());
        }
        Ok(())
    }
}

/// An evaluator's vote tagged with how it was obtained.
#[derive(Debug, Clone, PartialEq)]
pub enum VoteOutcome {
    Parsed(EvaluationVote),
    Fallback { vote: EvaluationVote, reason: String },
}

impl VoteOutcome {
    pub fn vote(&self) -> &EvaluationVote {
        match self {
            VoteOutcome::Parsed(vote) | VoteOutcome::Fallback { vote, .. } => vote,
        }
    }

    pub fn into_vote(self) -> EvaluationVote {
        match self {
            VoteOutcome::Parsed(vote) | VoteOutcome::Fallback { vote, .. } => vote,
        }
    }

    pub fn is_fallback(&self) -> bool {
        matches!(self, VoteOutcome::Fallback { .. })
    }
}

// ── Aggregated result ─────────────────────────────────────────────────

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum Decision {
    Invest,
    Pass,
}

impl Decision {
    pub fn as_str(&self) -> &'static str {
        match self {
            Decision::Invest => "INVEST",
            Decision::Pass => "PASS",
        }
    }

    pub fn parse(raw: &str) -> Option<Self> {
        match raw {
            "INVEST" => Some(Decision::Invest),
            "PASS" => Some(Decision::Pass),
            _ => None,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct VoteResult {
    pub candidate_id: String,
    pub candidate_name: String,
    pub candidate_symbol: String,
    pub votes: BTreeMap<Role, EvaluationVote>,
    /// Weighted mean score rounded to two decimals.
    pub weighted_score: f64,
    pub yes_count: usize,
    pub decision: Decision,
    pub critical_flag: bool,
    pub timestamp: DateTime<Utc>,
}

// ── Dossier ───────────────────────────────────────────────────────────

/// Snapshot of a candidate handed identically to every evaluator.
#[derive(Debug, Clone, Serialize)]
pub struct Dossier {
    pub candidate: Candidate,
    pub market: TokenMarket,
    pub metrics: TokenMetrics,
    pub chart: Vec<ChartCandle>,
    /// Bonding-curve completion in percent.
    pub progress: Option<f64>,
}

fn or_na<T: fmt::Display>(value: Option<T>) -> String {
    value.map(|v| v.to_string()).unwrap_or_else(|| "N/A".into())
}

impl Dossier {
    pub fn render(&self) -> String {
        let c = &self.candidate;
        let m = &self.market;
        let x = &self.metrics;

        let mut out = format!(
            "TOKEN ANALYSIS REQUEST\n\n\
             Name: {}\nSymbol: {}\nDescription: {}\nCreator: {}\n\n\
             MARKET DATA:\n\
             - Price: {}\n- Market Cap: {}\n- 24h Volume: {}\n- Holders: {}\n- Buy Count: {}\n- Sell Count: {}\n\n\
             METRICS ({}):\n\
             - Price Change: {}\n- Buy Volume: {}\n- Sell Volume: {}\n\n\
             CURVE:\n- Graduation Progress: {}\n",
            c.name,
            c.symbol,
            c.description.as_deref().unwrap_or("N/A"),
            c.creator,
            or_na(m.price),
            or_na(m.market_cap),
            or_na(m.volume_24h),
            or_na(m.holders),
            or_na(m.buy_count),
            or_na(m.sell_count),
            x.timeframe,
            or_na(x.price_change.map(|p| format!("{:.2}%", p))),
            or_na(x.buy_volume),
            or_na(x.sell_volume),
            or_na(self.progress.map(|p| format!("{:.1}%", p))),
        );

        if let (Some(first), Some(last)) = (self.chart.first(), self.chart.last()) {
            let high = self.chart.iter().map(|k| k.high).fold(f64::MIN, f64::max);
            let low = self.chart.iter().map(|k| k.low).fold(f64::MAX, f64::min);
            out.push_str(&format!(
                "\nCHART:\n- Candles: {}\n- Open: {}\n- Close: {}\n- Range: {} to {}\n",
                self.chart.len(),
                first.open,
                last.close,
                low,
                high
            ));
        }

        out.push_str("\nAnalyze this token and provide your assessment.");
        out
    }
}
