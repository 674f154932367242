use std::collections::BTreeMap;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;

use common::PipelineError;
use llm_client::TextGenerator;
use tracing::{debug, info, warn};

use crate::persona::{instructions, offline_votes};
use crate::types::{Dossier, EvaluationVote, Role, VoteOutcome};

/// Extracts and validates a vote from raw generated text.
///
/// Tolerates code fences and prose around the object: everything from the
/// first `{` to the last `}` is parsed.
pub fn parse_vote(raw: &str) -> Result<EvaluationVote, PipelineError> {
    let start = raw
        .find('{')
        .ok_or_else(|| PipelineError::AnalyzerParse("no JSON object in output".into()))?;
    let end = raw
        .rfind('}')
        .filter(|end| *end > start)
        .ok_or_else(|| PipelineError::AnalyzerParse("unterminated JSON object".into()))?;

    let vote: EvaluationVote = serde_json::from_str(&raw[start..=end])
        .map_err(|e| PipelineError::AnalyzerParse(e.to_string()))?;
    vote.validate().map_err(PipelineError::AnalyzerParse)?;
    Ok(vote)
}

enum VoteSource {
    Generator(Arc<dyn TextGenerator>),
    Offline {
        fixtures: Vec<EvaluationVote>,
        cursor: AtomicUsize,
    },
}

/// One panel seat bound to a persona.
pub struct Evaluator {
    role: Role,
    instructions: String,
    source: VoteSource,
}

impl Evaluator {
    pub fn new(role: Role, generator: Arc<dyn TextGenerator>) -> Self {
        Self {
            role,
            instructions: instructions(role),
            source: VoteSource::Generator(generator),
        }
    }

    pub fn offline(role: Role) -> Self {
        Self {
            role,
            instructions: instructions(role),
            source: VoteSource::Offline {
                fixtures: offline_votes(role),
                cursor: AtomicUsize::new(0),
            },
        }
    }

    pub fn role(&self) -> Role {
        self.role
    }

    /// Never fails: any problem yields the conservative fallback vote.
    pub async fn analyze(&self, dossier: &str) -> VoteOutcome {
        let generator = match &self.source {
            VoteSource::Offline { fixtures, cursor } => {
                if fixtures.is_empty() {
                    return self.fallback("no offline fixtures".into());
                }
                let index = cursor.fetch_add(1, Ordering::Relaxed) % fixtures.len();
                return VoteOutcome::Parsed(fixtures[index].clone());
            }
            VoteSource::Generator(generator) => generator,
        };

        let generation = match generator.generate(&self.instructions, dossier).await {
            Ok(generation) => generation,
            Err(e) => return self.fallback(format!("generation failed: {}", e)),
        };
        debug!(
            "{} vote generated by {} (cached={})",
            self.role, generation.model, generation.cached
        );

        match parse_vote(&generation.content) {
            Ok(vote) => VoteOutcome::Parsed(vote),
            Err(e) => self.fallback(e.to_string()),
        }
    }

    fn fallback(&self, reason: String) -> VoteOutcome {
        warn!("{} falling back to conservative vote: {}", self.role, reason);
        VoteOutcome::Fallback {
            vote: EvaluationVote::fallback(self.role),
            reason,
        }
    }
}

/// The fixed four-seat panel.
pub struct EvaluatorPanel {
    evaluators: Vec<Evaluator>,
}

impl EvaluatorPanel {
    pub fn new(generator: Arc<dyn TextGenerator>) -> Self {
        Self {
            evaluators: Role::ALL
                .iter()
                .map(|role| Evaluator::new(*role, generator.clone()))
                .collect(),
        }
    }

    /// Panel that answers from fixtures without calling any generator.
    pub fn offline() -> Self {
        Self {
            evaluators: Role::ALL.iter().map(|role| Evaluator::offline(*role)).collect(),
        }
    }

    /// Renders the dossier once and polls every seat in order.
    pub async fn analyze(&self, dossier: &Dossier) -> BTreeMap<Role, VoteOutcome> {
        let text = dossier.render();
        let mut outcomes = BTreeMap::new();
        for evaluator in &self.evaluators {
            let outcome = evaluator.analyze(&text).await;
            let vote = outcome.vote();
            info!(
                "{} on {}: {}/10 {} ({}% conf){}",
                evaluator.role().label(),
                dossier.candidate.symbol,
                vote.score,
                vote.vote.as_str(),
                vote.confidence,
                if outcome.is_fallback() { " [fallback]" } else { "" }
            );
            outcomes.insert(evaluator.role(), outcome);
        }
        outcomes
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::Recommendation;
    use async_trait::async_trait;
    use chrono::Utc;
    use common::{Candidate, TokenMarket, TokenMetrics};
    use llm_client::{Generation, LlmError};
    use std::sync::Mutex;

    struct Scripted {
        replies: Mutex<Vec<Result<String, ()>>>,
        seen_inputs: Mutex<Vec<String>>,
    }

    impl Scripted {
        fn new(replies: Vec<Result<&str, ()>>) -> Arc<Self> {
            Arc::new(Self {
                replies: Mutex::new(replies.into_iter().rev().map(|r| r.map(String::from)).collect()),
                seen_inputs: Mutex::new(Vec::new()),
            })
        }
    }

    #[async_trait]
    impl TextGenerator for Scripted {
        fn name(&self) -> &str {
            "scripted"
        }

        async fn generate(&self, _instructions: &str, input: &str) -> Result<Generation, LlmError> {
            self.seen_inputs.lock().unwrap().push(input.to_string());
            match self.replies.lock().unwrap().pop() {
                Some(Ok(content)) => Ok(Generation {
                    content,
                    model: "scripted".into(),
                    cached: false,
                }),
                _ => Err(LlmError::Timeout),
            }
        }
    }

    fn dossier() -> Dossier {
        Dossier {
            candidate: Candidate {
                id: "0xabc".into(),
                name: "Claw".into(),
                symbol: "CLAW".into(),
                creator: "0xc".into(),
                description: Some("crab coin".into()),
                eligible: true,
                discovered_at: Utc::now(),
            },
            market: TokenMarket::default(),
            metrics: TokenMetrics::empty("0xabc", "1h"),
            chart: Vec::new(),
            progress: None,
        }
    }

    #[test]
    fn test_parse_vote_strips_fences_and_prose() {
        let raw = "Here you go:\n```json\n{\"score\": 8, \"vote\": \"YES\", \"confidence\": 80, \"analysis\": \"strong\"}\n```";
        let vote = parse_vote(raw).unwrap();
        assert_eq!(vote.score, 8);
        assert_eq!(vote.vote, Recommendation::Yes);
    }

    #[test]
    fn test_parse_vote_rejects_bad_output() {
        assert!(parse_vote("I think YES").is_err());
        assert!(parse_vote("{\"score\": 8}").is_err());
        assert!(parse_vote(
            "{\"score\": 12, \"vote\": \"YES\", \"confidence\": 80, \"rationale\": \"x\"}"
        )
        .is_err());
        assert!(matches!(
            parse_vote("} nope {"),
            Err(PipelineError::AnalyzerParse(_))
        ));
    }

    #[tokio::test]
    async fn test_panel_always_returns_four_votes() {
        let generator = Scripted::new(vec![
            Ok(r#"{"score": 7, "vote": "YES", "confidence": 70, "rationale": "good"}"#),
            Ok("not json at all"),
            Err(()),
            Ok(r#"{"score": 2, "vote": "NO", "confidence": 95, "rationale": "rug", "criticalFlag": true}"#),
        ]);
        let panel = EvaluatorPanel::new(generator.clone());

        let votes = panel.analyze(&dossier()).await;
        assert_eq!(votes.len(), 4);
        assert!(!votes[&Role::Alpha].is_fallback());
        assert!(votes[&Role::Degen].is_fallback());
        assert!(votes[&Role::Sage].is_fallback());
        assert_eq!(votes[&Role::Sage].vote(), &EvaluationVote::fallback(Role::Sage));
        assert!(votes[&Role::Contrarian].vote().critical_flag);
    }

    #[tokio::test]
    async fn test_every_seat_gets_identical_dossier() {
        let generator = Scripted::new(vec![Err(()); 4]);
        EvaluatorPanel::new(generator.clone()).analyze(&dossier()).await;

        let inputs = generator.seen_inputs.lock().unwrap();
        assert_eq!(inputs.len(), 4);
        assert!(inputs.iter().all(|input| input == &inputs[0]));
        assert!(inputs[0].contains("crab coin"));
    }

    #[test]
    fn test_fallback_vote_shape() {
        let vote = EvaluationVote::fallback(Role::Alpha);
        assert_eq!((vote.score, vote.vote, vote.confidence), (3, Recommendation::No, 20));
        assert!(!vote.critical_flag);
    }

    #[tokio::test]
    async fn test_offline_cycles_fixtures() {
        let evaluator = Evaluator::offline(Role::Alpha);
        let fixtures = offline_votes(Role::Alpha);

        let mut seen = Vec::new();
        for _ in 0..fixtures.len() + 1 {
            seen.push(evaluator.analyze("dossier").await.into_vote());
        }
        assert_eq!(seen[..fixtures.len()], fixtures[..]);
        assert_eq!(seen[fixtures.len()], fixtures[0]);
    }
}
