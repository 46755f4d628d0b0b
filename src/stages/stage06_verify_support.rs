//! Stage 6 — VerifySupport. Calls the LLM with the claim and the support
//! pool; expects a strict `VerdictPack`. Invalid citations are dropped.
//! One repair pass on parse/schema failure; a skeleton `UNVERIFIED` pack
//! is emitted if the repair also fails.

use serde::Deserialize;
use serde_json::json;

use crate::output_strategy::OutputStrategy;
use crate::payload::Payload;
use crate::retry::RetryConfig;
use crate::state::{Citation, PipelineState, Stance, VerdictPack, VerdictPackDiagnostics};
use crate::stages::{StageContext, StageResult};
use crate::LlmCall;

#[derive(Debug, Deserialize)]
struct VerdictExtraction {
    stance: StanceWire,
    confidence: f64,
    reasoning: String,
    citations: Vec<CitationWire>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
enum StanceWire {
    Supports,
    Refutes,
    Neutral,
    Unverified,
}

impl From<StanceWire> for Stance {
    fn from(wire: StanceWire) -> Self {
        match wire {
            StanceWire::Supports => Stance::Supports,
            StanceWire::Refutes => Stance::Refutes,
            StanceWire::Neutral => Stance::Neutral,
            StanceWire::Unverified => Stance::Unverified,
        }
    }
}

#[derive(Debug, Deserialize)]
struct CitationWire {
    evidence_id: String,
    quote: String,
    relevance: f64,
}

pub async fn run(ctx: &StageContext, state: &mut PipelineState) -> StageResult {
    let pack = build_pack(ctx, state, "stage06_verify_support", &state.support_pool.clone()).await;
    state.verdict_support = Some(pack);
    state.record_output("stage06_verify_support", json!(state.verdict_support), None);
    Ok(())
}

/// Shared by Stage 6 and Stage 7: call the LLM over `pool`, validate
/// citations against it, repair once on failure, and fall back to an
/// unverified skeleton if the repair also fails.
pub(crate) async fn build_pack(
    ctx: &StageContext,
    state: &PipelineState,
    stage_name: &'static str,
    pool: &[crate::state::EvidenceCandidate],
) -> VerdictPack {
    let claim_text = state.claim_text.clone().unwrap_or_default();
    let valid_ids: std::collections::HashSet<&str> = pool.iter().map(|c| c.id.as_str()).collect();

    match run_llm_verify(ctx, stage_name, &claim_text, pool).await {
        Ok(extraction) => finalize_pack(extraction, &valid_ids, false),
        Err(first_error) => match run_repair(ctx, stage_name, &claim_text, pool, &first_error).await {
            Ok(extraction) => finalize_pack(extraction, &valid_ids, true),
            Err(_) => VerdictPack::unverified_skeleton(format!("parse failed twice: {first_error}")),
        },
    }
}

fn finalize_pack(
    extraction: VerdictExtraction,
    valid_ids: &std::collections::HashSet<&str>,
    parse_retry_used: bool,
) -> VerdictPack {
    let citations: Vec<Citation> = extraction
        .citations
        .into_iter()
        .filter(|c| valid_ids.contains(c.evidence_id.as_str()))
        .map(|c| Citation::new(c.evidence_id, c.quote, c.relevance))
        .collect();

    VerdictPack {
        stance: extraction.stance.into(),
        confidence: extraction.confidence.clamp(0.0, 1.0),
        reasoning: extraction.reasoning,
        diagnostics: VerdictPackDiagnostics {
            parse_ok: true,
            parse_retry_used,
            citation_valid_count: citations.len(),
        },
        citations,
    }
}

async fn run_llm_verify(
    ctx: &StageContext,
    stage_name: &str,
    claim_text: &str,
    pool: &[crate::state::EvidenceCandidate],
) -> Result<VerdictExtraction, String> {
    let evidence_json: Vec<serde_json::Value> = pool
        .iter()
        .map(|c| json!({ "id": c.id, "title": c.title, "snippet": c.snippet }))
        .collect();
    let payload = json!({ "claim": claim_text, "evidence": evidence_json });

    let call = LlmCall::new(
        stage_name.to_string(),
        "Given the claim and the evidence list, decide whether the evidence \
         SUPPORTS, REFUTES, is NEUTRAL toward, or leaves it UNVERIFIED. Respond \
         as JSON: {{\"stance\": \"SUPPORTS\"|\"REFUTES\"|\"NEUTRAL\"|\"UNVERIFIED\", \
         \"confidence\": float 0..1, \"reasoning\": string, \"citations\": \
         [{{\"evidence_id\": string, \"quote\": string (<=500 chars), \"relevance\": float}}]}}.\n\
         Input: {input}",
    )
    .with_model(ctx.config.slm_stage6_7.model.clone())
    .with_output_strategy(OutputStrategy::Json)
    .with_retry(RetryConfig::new(1));

    let output = call.invoke(&ctx.stage6_7_ctx, payload).await.map_err(|e| e.to_string())?;
    output.parse_as().map_err(|e| e.to_string())
}

async fn run_repair(
    ctx: &StageContext,
    stage_name: &str,
    claim_text: &str,
    pool: &[crate::state::EvidenceCandidate],
    prior_error: &str,
) -> Result<VerdictExtraction, String> {
    let evidence_json: Vec<serde_json::Value> = pool
        .iter()
        .map(|c| json!({ "id": c.id, "title": c.title, "snippet": c.snippet }))
        .collect();
    let payload = json!({ "claim": claim_text, "evidence": evidence_json });

    let repair_name = format!("{stage_name}_repair");
    let template = format!(
        "Your previous verdict output did not satisfy the schema. Error: \
         {prior_error}. Re-emit valid JSON only, with the same fields as \
         before.\nInput: {{input}}"
    );
    let call = LlmCall::new(repair_name, template)
        .with_model(ctx.config.slm_stage6_7.model.clone())
        .with_output_strategy(OutputStrategy::Json)
        .with_retry(RetryConfig::new(0));

    let output = call.invoke(&ctx.stage6_7_ctx, payload).await.map_err(|e| e.to_string())?;
    output.parse_as().map_err(|e| e.to_string())
}
