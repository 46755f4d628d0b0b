//! Stage 4 — Score. Rates each evidence candidate's relevance to the
//! claim: an LLM scorer when available, a deterministic lexical fallback
//! otherwise. No retries; cost is capped by one call per candidate batch.

use serde::Deserialize;
use serde_json::json;

use crate::output_strategy::OutputStrategy;
use crate::payload::Payload;
use crate::risk_flags::RiskFlag;
use crate::state::{PipelineState, ScoreDiagnostics, ScoredEvidence};
use crate::stages::{StageContext, StageRecoverable, StageResult};
use crate::LlmCall;

#[derive(Debug, Deserialize)]
struct ScoreExtraction {
    scores: Vec<f64>,
}

pub async fn run(ctx: &StageContext, state: &mut PipelineState) -> StageResult {
    let claim_text = state.claim_text.clone().unwrap_or_default();
    let candidates = state.evidence_candidates.clone();

    let scores = match run_llm_scoring(ctx, &claim_text, &candidates).await {
        Ok(scores) if scores.len() == candidates.len() => scores,
        _ => candidates.iter().map(|c| lexical_score(&claim_text, &c.snippet)).collect(),
    };

    let threshold = ctx.config.score_pass_threshold;
    let scored: Vec<ScoredEvidence> = candidates
        .into_iter()
        .zip(scores)
        .map(|(candidate, relevance)| ScoredEvidence {
            retained: relevance >= threshold,
            candidate,
            relevance,
        })
        .collect();

    let total_scored = scored.len();
    let pass_count = scored.iter().filter(|s| s.retained).count();
    let pass_rate = if total_scored == 0 { 0.0 } else { pass_count as f64 / total_scored as f64 };

    state.scored_evidence = scored;
    state.score_diagnostics = ScoreDiagnostics { total_scored, pass_count, pass_rate };
    state.record_output("stage04_score", json!(state.score_diagnostics), None);

    if pass_count == 0 {
        return Err(StageRecoverable::new(RiskFlag::ScoreDegraded, "SCORE_DEGRADED: no candidate passed threshold"));
    }
    Ok(())
}

async fn run_llm_scoring(
    ctx: &StageContext,
    claim_text: &str,
    candidates: &[crate::state::EvidenceCandidate],
) -> Result<Vec<f64>, String> {
    if candidates.is_empty() {
        return Ok(Vec::new());
    }

    let snippets: Vec<&str> = candidates.iter().map(|c| c.snippet.as_str()).collect();
    let payload = json!({ "claim": claim_text, "snippets": snippets });

    let call = LlmCall::new(
        "stage04_score",
        "Rate each snippet's relevance to the claim from 0.0 (irrelevant) to \
         1.0 (directly confirms or refutes). Respond as JSON: {{\"scores\": [float, ...]}} \
         with one score per snippet, in order.\nInput: {input}",
    )
    .with_model(ctx.config.slm_stage1_2.model.clone())
    .with_output_strategy(OutputStrategy::Json);

    let output = call.invoke(&ctx.stage1_2_ctx, payload).await.map_err(|e| e.to_string())?;
    let extraction: ScoreExtraction = output.parse_as().map_err(|e| e.to_string())?;
    Ok(extraction.scores)
}

/// Deterministic fallback: fraction of claim tokens (length > 1) also
/// present in the snippet, case-insensitive.
fn lexical_score(claim_text: &str, snippet: &str) -> f64 {
    let snippet_lower = snippet.to_lowercase();
    let tokens: Vec<&str> = claim_text.split_whitespace().filter(|t| t.chars().count() > 1).collect();
    if tokens.is_empty() {
        return 0.0;
    }
    let hits = tokens.iter().filter(|t| snippet_lower.contains(&t.to_lowercase())).count();
    hits as f64 / tokens.len() as f64
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn lexical_score_counts_overlapping_tokens() {
        let score = lexical_score("제프리 힌튼은 노벨상을 수상했다", "제프리 힌튼이 노벨상을 받았다고 보도했다");
        assert!(score > 0.0);
    }

    #[test]
    fn lexical_score_is_zero_for_unrelated_snippet() {
        let score = lexical_score("bitcoin price forecast", "완전히 관련 없는 내용입니다");
        assert_eq!(score, 0.0);
    }

    #[tokio::test]
    async fn degraded_when_no_candidate_passes_threshold() {
        let mut state = crate::state::test_support::blank_state();
        state.claim_text = Some("totally unrelated claim text".to_string());
        state.evidence_candidates = vec![crate::state::EvidenceCandidate {
            id: "e1".to_string(),
            source_type: crate::state::SourceType::WebUrl,
            title: "t".to_string(),
            url: None,
            snippet: "no overlap whatsoever".to_string(),
            published_at: None,
            trust_prior: 0.5,
        }];
        let ctx = crate::stages::tests_support::fake_context_with_response("not json");
        let result = run(&ctx, &mut state).await;
        assert!(result.is_err());
        assert_eq!(state.score_diagnostics.pass_count, 0);
    }
}
