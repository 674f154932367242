use std::collections::BTreeMap;

use chrono::Utc;
use common::Candidate;

use crate::types::{Decision, EvaluationVote, Recommendation, Role, VoteResult};

pub const DEFAULT_VOTE_THRESHOLD: f64 = 4.5;
pub const DEFAULT_MIN_YES_VOTES: usize = 2;

/// Turns a panel's votes into an INVEST/PASS decision.
#[derive(Debug, Clone)]
pub struct VoteAggregator {
    threshold: f64,
    min_yes_votes: usize,
}

impl Default for VoteAggregator {
    fn default() -> Self {
        Self::new(DEFAULT_VOTE_THRESHOLD, DEFAULT_MIN_YES_VOTES)
    }
}

impl VoteAggregator {
    pub fn new(threshold: f64, min_yes_votes: usize) -> Self {
        Self {
            threshold,
            min_yes_votes,
        }
    }

    pub fn threshold(&self) -> f64 {
        self.threshold
    }

    fn weighted_score(votes: &BTreeMap<Role, EvaluationVote>) -> f64 {
        let (sum, weight) = votes.iter().fold((0.0, 0.0), |(sum, weight), (role, vote)| {
            (sum + f64::from(vote.score) * role.weight(), weight + role.weight())
        });
        if weight <= 0.0 {
            return 0.0;
        }
        ((sum / weight) * 100.0).round() / 100.0
    }

    /// The decision depends only on the votes and the configured thresholds.
    /// The threshold is compared against the rounded score so a persisted
    /// result always reproduces its decision.
    pub fn evaluate(&self, candidate: &Candidate, votes: &BTreeMap<Role, EvaluationVote>) -> VoteResult {
        let weighted_score = Self::weighted_score(votes);
        let yes_count = votes
            .values()
            .filter(|v| v.vote == Recommendation::Yes)
            .count();
        let critical_flag = votes.values().any(|v| v.critical_flag);

        let decision = if weighted_score >= self.threshold
            && yes_count >= self.min_yes_votes
            && !critical_flag
        {
            Decision::Invest
        } else {
            Decision::Pass
        };

        VoteResult {
            candidate_id: candidate.id.clone(),
            candidate_name: candidate.name.clone(),
            candidate_symbol: candidate.symbol.clone(),
            votes: votes.clone(),
            weighted_score,
            yes_count,
            decision,
            critical_flag,
            timestamp: Utc::now(),
        }
    }
}

/// Human-readable vote summary used in debate and report bodies.
pub fn format_result(result: &VoteResult) -> String {
    let mut lines = vec![
        format!(
            "SYNDICATE VOTE: {} (${})",
            result.candidate_name, result.candidate_symbol
        ),
        String::new(),
        format!("Weighted Score: {:.2}/10", result.weighted_score),
        format!("Votes: {}/{} YES", result.yes_count, result.votes.len()),
        format!(
            "Critical Flag: {}",
            if result.critical_flag { "YES" } else { "No" }
        ),
        format!("Decision: {}", result.decision.as_str()),
        String::new(),
    ];

    for (role, vote) in &result.votes {
        let mark = match vote.vote {
            Recommendation::Yes => '+',
            Recommendation::No => '-',
        };
        lines.push(format!(
            "[{}] {} ({}/10, {}% conf): {}",
            mark,
            role.label(),
            vote.score,
            vote.confidence,
            vote.rationale
        ));
    }

    lines.join("\n")
}
