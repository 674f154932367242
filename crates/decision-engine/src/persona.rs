//! Evaluator personas: instruction text and offline fixture votes.

use schemars::schema_for;

use crate::types::{EvaluationVote, Recommendation, Role};

const SHARED_INSTRUCTIONS: &str = r#"You sit on a four-member investment panel that judges newly launched bonding-curve tokens.
You receive one token dossier: metadata, market data, trading metrics and curve progress.
Judge it strictly from your own seat on the panel.

Respond with a single JSON object conforming to the schema below.
Do NOT output markdown blocks or conversational text. JUST the JSON object.
- score: 1 = terrible, 10 = exceptional
- vote: YES to invest, NO to pass
- confidence: 0 to 100
- rationale: two to four sentences in your voice, citing concrete numbers from the dossier
"#;

fn persona_brief(role: Role) -> &'static str {
    match role {
        Role::Alpha => {
            "You are ALPHA, the quantitative analyst. You read buy/sell ratios, volume profile, \
             price velocity and curve progress. Numbers beat narratives: if the math is weak, vote NO."
        }
        Role::Degen => {
            "You are DEGEN, the momentum trader. You chase volume spikes, fast curve progress and \
             memetic names. You lean toward action, but obvious scams still get a NO."
        }
        Role::Sage => {
            "You are SAGE, the fundamentals analyst. You weigh description quality, concept staying \
             power, creator intent and community potential over short-term metrics."
        }
        Role::Contrarian => {
            "You are CONTRARIAN, the risk skeptic. You hunt for whale concentration, wash trading, \
             suspicious creators and exit-liquidity traps. Your bar for YES is higher than the others'. \
             Set critical_flag to true when you see serious rug or scam risk."
        }
    }
}

/// Full instruction text for `role`, including the vote JSON schema.
pub fn instructions(role: Role) -> String {
    let schema = serde_json::to_string_pretty(&schema_for!(EvaluationVote)).unwrap_or_default();
    format!(
        "{}\nJSON Schema:\n{}\n\n{}",
        SHARED_INSTRUCTIONS,
        schema,
        persona_brief(role)
    )
}

type Fixture = (u8, Recommendation, u8, bool, &'static str);

const ALPHA_FIXTURES: &[Fixture] = &[
    (7, Recommendation::Yes, 72, false,
     "Buy/sell ratio sits at 3.2x with curve progress at 12.4%. Price velocity of +18% over the hour on sustained bids gives a favorable risk/reward at this entry."),
    (4, Recommendation::No, 65, false,
     "Buy/sell ratio slipped to 0.8x, curve progress stalled near 3% and volume is down 62% from peak. Momentum looks exhausted."),
    (8, Recommendation::Yes, 85, false,
     "5.1x buy ratio, 47 unique buyers in the last hour and the curve is past 23% and accelerating. Strong quantitative setup."),
];

const DEGEN_FIXTURES: &[Fixture] = &[
    (8, Recommendation::Yes, 78, false,
     "Volume spiked 4x in thirty minutes and the curve is ripping past 15%. Name is memeable and holders are stacking. Aping in."),
    (3, Recommendation::No, 55, false,
     "Volume flatlined with eight holders and a boring concept. No momentum, no hype, not touching it."),
    (9, Recommendation::Yes, 90, false,
     "Volume going parabolic, 67 holders already and the curve at 31%. Pure meme energy, sending it."),
];

const SAGE_FIXTURES: &[Fixture] = &[
    (6, Recommendation::Yes, 60, false,
     "The narrative has real depth and the creator describes a clear concept. Metrics are early but the project reads as built with intent."),
    (4, Recommendation::No, 70, false,
     "Generic description, no original concept and no visible creator track record. Looks like a low-effort launch."),
    (7, Recommendation::Yes, 75, false,
     "High-quality metadata and a concept that taps a live cultural narrative. Could grow a loyal community over time."),
];

const CONTRARIAN_FIXTURES: &[Fixture] = &[
    (5, Recommendation::No, 68, false,
     "Top three wallets hold 48% of supply and buy volume looks inflated by one whale. Exit liquidity disappears the moment they sell."),
    (6, Recommendation::Yes, 55, false,
     "Holder distribution is fairly even with no wallet above 8% and sell pressure looks organic. Tentative YES with tight stops."),
    (2, Recommendation::No, 92, true,
     "Creator wallet was funded from a known rug deployer cluster and 90% of volume is wash trading. High rug probability."),
];

/// Fixture votes cycled through in offline mode.
pub fn offline_votes(role: Role) -> Vec<EvaluationVote> {
    let fixtures = match role {
        Role::Alpha => ALPHA_FIXTURES,
        Role::Degen => DEGEN_FIXTURES,
        Role::Sage => SAGE_FIXTURES,
        Role::Contrarian => CONTRARIAN_FIXTURES,
    };
    fixtures
        .iter()
        .map(|&(score, vote, confidence, critical, rationale)| EvaluationVote {
            score,
            vote,
            confidence,
            rationale: rationale.to_string(),
            critical_flag: critical,
        })
        .collect()
}
