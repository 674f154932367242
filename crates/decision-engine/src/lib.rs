pub mod engine;
pub mod panel;
pub mod persona;
pub mod types;

pub use engine::{format_result, VoteAggregator, DEFAULT_MIN_YES_VOTES, DEFAULT_VOTE_THRESHOLD};
pub use panel::{parse_vote, Evaluator, EvaluatorPanel};
pub use types::{Decision, Dossier, EvaluationVote, Recommendation, Role, VoteOutcome, VoteResult};
