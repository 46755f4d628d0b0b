//! Stage 5 — TopK. Partitions retained evidence into support/skeptic
//! pools and selects the curated `citations` list.
//!
//! No per-candidate stance signal is available at this point in the
//! pipeline (that's what Stages 6/7 produce), so pool assignment
//! alternates by relevance rank, per the redesign's deterministic
//! tie-break contract rather than a real stance classifier.

use serde_json::json;

use crate::risk_flags::RiskFlag;
use crate::state::{Citation, EvidenceCandidate, PipelineState, ScoredEvidence, TopkDiagnostics};
use crate::stages::{StageContext, StageRecoverable, StageResult};

/// `(trust_prior desc, score desc, id asc)`.
fn tie_break_cmp(a: &ScoredEvidence, b: &ScoredEvidence) -> std::cmp::Ordering {
    b.candidate
        .trust_prior
        .total_cmp(&a.candidate.trust_prior)
        .then_with(|| b.relevance.total_cmp(&a.relevance))
        .then_with(|| a.candidate.id.cmp(&b.candidate.id))
}

pub async fn run(ctx: &StageContext, state: &mut PipelineState) -> StageResult {
    let mut retained: Vec<&ScoredEvidence> = state.scored_evidence.iter().filter(|s| s.retained).collect();
    retained.sort_by(|a, b| tie_break_cmp(a, b));

    let mut support_pool: Vec<EvidenceCandidate> = Vec::new();
    let mut skeptic_pool: Vec<EvidenceCandidate> = Vec::new();
    for (idx, item) in retained.iter().enumerate() {
        if idx % 2 == 0 {
            support_pool.push(item.candidate.clone());
        } else {
            skeptic_pool.push(item.candidate.clone());
        }
    }

    let k = ctx.config.topk_per_side.max(1);
    support_pool.truncate(k);
    skeptic_pool.truncate(k);

    let mut citations: Vec<Citation> = support_pool
        .iter()
        .take(k)
        .map(|c| Citation::new(c.id.clone(), c.snippet.clone(), candidate_relevance(&state.scored_evidence, &c.id)))
        .collect();

    if !skeptic_pool.is_empty() && !citations.iter().any(|c| skeptic_pool.iter().any(|s| s.id == c.evidence_id)) {
        let first = &skeptic_pool[0];
        citations.push(Citation::new(
            first.id.clone(),
            first.snippet.clone(),
            candidate_relevance(&state.scored_evidence, &first.id),
        ));
    }

    let avg_trust = |pool: &[EvidenceCandidate]| {
        if pool.is_empty() {
            0.0
        } else {
            pool.iter().map(|c| c.trust_prior).sum::<f64>() / pool.len() as f64
        }
    };

    state.topk_diagnostics = TopkDiagnostics {
        support_k: support_pool.len(),
        skeptic_k: skeptic_pool.len(),
        avg_trust_support: avg_trust(&support_pool),
        avg_trust_skeptic: avg_trust(&skeptic_pool),
    };

    let skeptic_empty = skeptic_pool.is_empty();
    state.support_pool = support_pool;
    state.skeptic_pool = skeptic_pool;
    state.citations = citations;
    state.record_output(
        "stage05_topk",
        json!({ "diagnostics": state.topk_diagnostics, "citations": state.citations }),
        None,
    );

    if state.support_pool.is_empty() && state.skeptic_pool.is_empty() {
        return Err(StageRecoverable::new(RiskFlag::TopkEmpty, "TOPK_EMPTY: no retained evidence to partition"));
    }
    if skeptic_empty {
        state.risk_flags.insert(RiskFlag::NoSkepticEvidence);
    }
    Ok(())
}

fn candidate_relevance(scored: &[ScoredEvidence], id: &str) -> f64 {
    scored.iter().find(|s| s.candidate.id == id).map(|s| s.relevance).unwrap_or(0.0)
}
