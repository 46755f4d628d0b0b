//! Stage 7 — VerifySkeptic. Same contract as Stage 6 but over the
//! skeptic pool, with a guard against blindly echoing the support pack:
//! a citation id already used by `verdict_support` is only kept here if
//! the two packs disagree on stance.

use serde_json::json;

use crate::state::{PipelineState, VerdictPack};
use crate::stages::stage06_verify_support::build_pack;
use crate::stages::{StageContext, StageResult};

pub async fn run(ctx: &StageContext, state: &mut PipelineState) -> StageResult {
    let skeptic_pool = state.skeptic_pool.clone();
    let mut pack = build_pack(ctx, state, "stage07_verify_skeptic", &skeptic_pool).await;

    if let Some(support) = &state.verdict_support {
        apply_anti_copy_guard(&mut pack, support);
    }

    state.verdict_skeptic = Some(pack);
    state.record_output("stage07_verify_skeptic", json!(state.verdict_skeptic), None);
    Ok(())
}

/// Drops skeptic citations that reuse a support citation's `evidence_id`
/// while agreeing with the support pack's stance — the shape a lazily
/// copied pack would take.
fn apply_anti_copy_guard(skeptic: &mut VerdictPack, support: &VerdictPack) {
    if skeptic.stance != support.stance {
        return;
    }
    let support_ids: std::collections::HashSet<&str> =
        support.citations.iter().map(|c| c.evidence_id.as_str()).collect();
    let dropped = skeptic.citations.iter().filter(|c| support_ids.contains(c.evidence_id.as_str())).count();
    if dropped == 0 {
        return;
    }
    skeptic.citations.retain(|c| !support_ids.contains(c.evidence_id.as_str()));
    skeptic.diagnostics.citation_valid_count = skeptic.citations.len();
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::state::{Citation, Stance, VerdictPackDiagnostics};

    fn pack(stance: Stance, citation_ids: &[&str]) -> VerdictPack {
        VerdictPack {
            stance,
            confidence: 0.8,
            reasoning: "r".to_string(),
            citations: citation_ids.iter().map(|id| Citation::new(*id, "q", 0.8)).collect(),
            diagnostics: VerdictPackDiagnostics { parse_ok: true, parse_retry_used: false, citation_valid_count: citation_ids.len() },
        }
    }

    #[test]
    fn drops_overlapping_citations_when_stance_matches() {
        let support = pack(Stance::Supports, &["e1", "e2"]);
        let mut skeptic = pack(Stance::Supports, &["e1", "e3"]);
        apply_anti_copy_guard(&mut skeptic, &support);
        assert_eq!(skeptic.citations.len(), 1);
        assert_eq!(skeptic.citations[0].evidence_id, "e3");
    }

    #[test]
    fn keeps_overlapping_citations_when_stance_differs() {
        let support = pack(Stance::Supports, &["e1"]);
        let mut skeptic = pack(Stance::Refutes, &["e1"]);
        apply_anti_copy_guard(&mut skeptic, &support);
        assert_eq!(skeptic.citations.len(), 1);
    }
}
