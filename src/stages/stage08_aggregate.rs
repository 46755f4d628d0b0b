//! Stage 8 — Aggregate. Pure deterministic merge of the two verdict packs
//! into a draft verdict and quality score. No I/O, no LLM calls.

use serde_json::json;

use crate::risk_flags::RiskFlag;
use crate::state::{DraftVerdict, JudgePrepMeta, PipelineState, Stance, VerdictLabel, VerdictPack};
use crate::stages::{StageContext, StageResult};

/// The stance truth table: `(support, skeptic) -> draft label`.
fn draft_label(support: Stance, skeptic: Stance) -> VerdictLabel {
    use Stance::*;
    match (support, skeptic) {
        (Supports, Refutes) => VerdictLabel::Mixed,
        (Refutes, Supports) => VerdictLabel::Mixed,
        (Supports, Neutral | Unverified) => VerdictLabel::True,
        (Neutral | Unverified, Refutes) => VerdictLabel::False,
        (Neutral, Neutral) | (Unverified, Unverified) => VerdictLabel::Unverified,
        _ => VerdictLabel::Unverified,
    }
}

pub async fn run(_ctx: &StageContext, state: &mut PipelineState) -> StageResult {
    let support = state.verdict_support.clone().unwrap_or_else(|| VerdictPack::unverified_skeleton("missing"));
    let skeptic = state.verdict_skeptic.clone().unwrap_or_else(|| VerdictPack::unverified_skeleton("missing"));

    let support_citation_count = support.citations.len();
    let skeptic_citation_count = skeptic.citations.len();
    let no_citations_anywhere = support_citation_count == 0 && skeptic_citation_count == 0;

    if no_citations_anywhere {
        state.risk_flags.insert(RiskFlag::NoVerifiedCitations);
    }

    let (stance, fail_closed) = if no_citations_anywhere {
        (VerdictLabel::Unverified, true)
    } else {
        (draft_label(support.stance, skeptic.stance), false)
    };

    let rationale_summary = format!(
        "support={:?}({:.2}) skeptic={:?}({:.2})",
        support.stance, support.confidence, skeptic.stance, skeptic.confidence
    );

    state.draft_verdict = Some(DraftVerdict { stance, rationale_summary });
    state.quality_score = Some(quality_score(&support, &skeptic, fail_closed));
    state.judge_prep_meta = Some(JudgePrepMeta {
        support_citation_count,
        skeptic_citation_count,
        stance_balanced: support_citation_count > 0 && skeptic_citation_count > 0,
    });
    state.record_output(
        "stage08_aggregate",
        json!({ "draft_verdict": state.draft_verdict, "quality_score": state.quality_score }),
        None,
    );

    Ok(())
}

/// `[0,100]`: balance of evidence counts, citation validity, confidence
/// spread between the two sides.
fn quality_score(support: &VerdictPack, skeptic: &VerdictPack, fail_closed: bool) -> f64 {
    if fail_closed {
        return 0.0;
    }
    let total_citations = (support.citations.len() + skeptic.citations.len()) as f64;
    let balance = if total_citations == 0.0 {
        0.0
    } else {
        let min_side = support.citations.len().min(skeptic.citations.len()) as f64;
        (min_side / (total_citations / 2.0)).min(1.0)
    };
    let validity = if support.diagnostics.parse_ok && skeptic.diagnostics.parse_ok { 1.0 } else { 0.5 };
    let confidence_spread = 1.0 - (support.confidence - skeptic.confidence).abs();

    ((balance * 40.0) + (validity * 30.0) + (confidence_spread * 30.0)).clamp(0.0, 100.0)
}
