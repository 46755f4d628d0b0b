//! Stage 9 — Judge. LLM-based final adjudicator over the claim, both
//! verdict packs, and the curated citations. Strict schema; one repair
//! pass; on a second failure the Stage 8 draft is used verbatim with
//! `fail_closed=true`.

use serde::Deserialize;
use serde_json::json;

use crate::output_strategy::OutputStrategy;
use crate::payload::Payload;
use crate::retry::RetryConfig;
use crate::risk_flags::RiskFlag;
use crate::state::{FinalVerdict, ModelInfo, PipelineState, Stage09Diagnostics, VerdictLabel};
use crate::stages::{StageContext, StageResult};
use crate::LlmCall;

const LOW_EVIDENCE_MIN_CANDIDATES: usize = 2;
const LOW_TRUST_THRESHOLD: f64 = 0.4;
const LOW_CONFIDENCE_THRESHOLD: f64 = 0.3;
const QUALITY_GATE_THRESHOLD: f64 = 35.0;
const CAP_NO_CITATIONS: f64 = 0.4;
const CAP_LOW_EVIDENCE: f64 = 0.7;

#[derive(Debug, Deserialize)]
struct JudgeExtraction {
    label: LabelWire,
    confidence: f64,
    summary: String,
    #[serde(default)]
    rationale: Vec<String>,
    #[serde(default)]
    selected_evidence_ids: Vec<String>,
    #[serde(default)]
    limitations: Vec<String>,
    #[serde(default)]
    recommended_next_steps: Vec<String>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
enum LabelWire {
    True,
    False,
    Mixed,
    Unverified,
    Refused,
}

impl From<LabelWire> for VerdictLabel {
    fn from(wire: LabelWire) -> Self {
        match wire {
            LabelWire::True => VerdictLabel::True,
            LabelWire::False => VerdictLabel::False,
            LabelWire::Mixed => VerdictLabel::Mixed,
            LabelWire::Unverified => VerdictLabel::Unverified,
            LabelWire::Refused => VerdictLabel::Refused,
        }
    }
}

const KNOWN_LABELS: &[&str] = &["TRUE", "FALSE", "MIXED", "UNVERIFIED", "REFUSED"];

/// A judge response that failed to parse as [`JudgeExtraction`].
///
/// `SchemaMismatch` means the JSON parsed far enough to see a `label`
/// field holding a string outside the closed set; `Other` covers every
/// other parse failure (missing fields, wrong types, non-JSON output).
enum JudgeParseError {
    SchemaMismatch(String),
    Other(String),
}

impl std::fmt::Display for JudgeParseError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            JudgeParseError::SchemaMismatch(msg) | JudgeParseError::Other(msg) => write!(f, "{msg}"),
        }
    }
}

fn label_outside_closed_set(value: &serde_json::Value) -> bool {
    matches!(value.get("label"), Some(serde_json::Value::String(s)) if !KNOWN_LABELS.contains(&s.as_str()))
}

fn parse_judge_extraction(output: &crate::payload::PayloadOutput) -> Result<JudgeExtraction, JudgeParseError> {
    output.parse_as().map_err(|e| {
        if label_outside_closed_set(&output.value) {
            JudgeParseError::SchemaMismatch(e.to_string())
        } else {
            JudgeParseError::Other(e.to_string())
        }
    })
}

/// Records a persistent both-paths-404 so the orchestrator can escalate it
/// in strict mode, then folds it back into the ordinary string-keyed error
/// channel every other backend failure already uses.
fn classify_backend_error(state: &mut PipelineState, err: crate::error::PipelineError) -> JudgeParseError {
    if let crate::error::PipelineError::ModelNotFound { model, endpoint } = &err {
        state.model_not_found = Some(crate::state::ModelNotFoundInfo {
            model: model.clone(),
            endpoint: endpoint.clone(),
        });
        state.risk_flags.insert(RiskFlag::ModelNotFound);
    }
    JudgeParseError::Other(err.to_string())
}

pub async fn run(ctx: &StageContext, state: &mut PipelineState) -> StageResult {
    let mut schema_mismatch = false;
    let (mut verdict, fail_closed) = match run_llm_judge(ctx, state).await {
        Ok(extraction) => (from_extraction(extraction), false),
        Err(first_error) => {
            if matches!(first_error, JudgeParseError::SchemaMismatch(_)) {
                schema_mismatch = true;
                state.risk_flags.insert(RiskFlag::LlmSchemaMismatch);
            }
            match run_repair(ctx, state, &first_error.to_string()).await {
                Ok(extraction) => (from_extraction(extraction), false),
                Err(repair_error) => {
                    if matches!(repair_error, JudgeParseError::SchemaMismatch(_)) {
                        schema_mismatch = true;
                        state.risk_flags.insert(RiskFlag::LlmSchemaMismatch);
                    }
                    state.risk_flags.insert(RiskFlag::LlmJudgeFailed);
                    (draft_fallback_verdict(state), true)
                }
            }
        }
    };

    apply_risk_flags_and_caps(state, &mut verdict);

    state.stage09_diagnostics = Stage09Diagnostics {
        schema_mismatch,
        fail_closed: fail_closed || state.risk_flags.contains(&RiskFlag::JudgeFailClosed),
        selected_evidence_count: verdict.selected_evidence_ids.len(),
    };
    state.model_info = Some(model_info(ctx));
    state.final_verdict = Some(verdict);
    state.record_output(
        "stage09_judge",
        json!({ "final_verdict": state.final_verdict, "diagnostics": state.stage09_diagnostics }),
        None,
    );

    Ok(())
}

fn from_extraction(extraction: JudgeExtraction) -> FinalVerdict {
    FinalVerdict {
        label: extraction.label.into(),
        confidence: extraction.confidence.clamp(0.0, 1.0),
        summary: extraction.summary,
        rationale: extraction.rationale,
        selected_evidence_ids: extraction.selected_evidence_ids,
        limitations: extraction.limitations,
        recommended_next_steps: extraction.recommended_next_steps,
    }
}

fn draft_fallback_verdict(state: &PipelineState) -> FinalVerdict {
    let draft = state.draft_verdict.clone();
    let (label, summary) = match draft {
        Some(d) => (d.stance, d.rationale_summary),
        None => (VerdictLabel::Unverified, "judge and draft both unavailable".to_string()),
    };
    FinalVerdict {
        label,
        confidence: 0.0,
        summary,
        rationale: Vec::new(),
        selected_evidence_ids: state.citations.iter().map(|c| c.evidence_id.clone()).collect(),
        limitations: vec!["automated judge unavailable; draft verdict used verbatim".to_string()],
        recommended_next_steps: Vec::new(),
    }
}

fn apply_risk_flags_and_caps(state: &mut PipelineState, verdict: &mut FinalVerdict) {
    if verdict.label == VerdictLabel::Refused {
        verdict.confidence = 0.0;
        verdict.selected_evidence_ids.clear();
        return;
    }

    if state.evidence_candidates.len() < LOW_EVIDENCE_MIN_CANDIDATES {
        state.risk_flags.insert(RiskFlag::LowEvidence);
    }

    let avg_citation_trust = avg_citation_trust(state);
    if avg_citation_trust < LOW_TRUST_THRESHOLD {
        state.risk_flags.insert(RiskFlag::LowTrustEvidence);
    }

    if let Some(quality_score) = state.quality_score {
        if quality_score < QUALITY_GATE_THRESHOLD {
            state.risk_flags.insert(RiskFlag::QualityGateFailed);
        }
    }

    let support_k = state.topk_diagnostics.support_k;
    let skeptic_k = state.topk_diagnostics.skeptic_k;
    if support_k > 0 && skeptic_k > 0 && (support_k.max(skeptic_k) as f64) > (support_k.min(skeptic_k) as f64) * 3.0 {
        state.risk_flags.insert(RiskFlag::UnbalancedStanceEvidence);
    }

    if state.risk_flags.contains(&RiskFlag::NoVerifiedCitations) {
        verdict.label = VerdictLabel::Unverified;
        verdict.confidence = verdict.confidence.min(CAP_NO_CITATIONS);
        state.risk_flags.insert(RiskFlag::JudgeFailClosed);
    } else if state.risk_flags.contains(&RiskFlag::LowEvidence) || state.risk_flags.contains(&RiskFlag::LowTrustEvidence) {
        verdict.confidence = verdict.confidence.min(CAP_LOW_EVIDENCE);
    }

    if verdict.confidence < LOW_CONFIDENCE_THRESHOLD {
        state.risk_flags.insert(RiskFlag::LowConfidence);
    }
}

fn avg_citation_trust(state: &PipelineState) -> f64 {
    if state.citations.is_empty() {
        return 0.0;
    }
    let ids = state.evidence_ids();
    let trusts: Vec<f64> = state
        .citations
        .iter()
        .filter_map(|c| {
            if ids.contains(c.evidence_id.as_str()) {
                state.evidence_candidates.iter().find(|e| e.id == c.evidence_id).map(|e| e.trust_prior)
            } else {
                None
            }
        })
        .collect();
    if trusts.is_empty() {
        0.0
    } else {
        trusts.iter().sum::<f64>() / trusts.len() as f64
    }
}

fn model_info(ctx: &StageContext) -> ModelInfo {
    let provider = if ctx.config.judge.is_external() { "openai-compatible" } else { "ollama" };
    ModelInfo {
        provider: provider.to_string(),
        model: ctx.config.judge.model.clone(),
        version: None,
    }
}

async fn run_llm_judge(ctx: &StageContext, state: &mut PipelineState) -> Result<JudgeExtraction, JudgeParseError> {
    let payload = judge_payload(state);
    let call = LlmCall::new(
        "stage09_judge",
        "You are the final adjudicator. Given the claim, the support-side and \
         skeptic-side verdict packs, and the curated citations, produce a final \
         verdict. Respond as JSON: {{\"label\": \"TRUE\"|\"FALSE\"|\"MIXED\"|\"UNVERIFIED\"|\"REFUSED\", \
         \"confidence\": float 0..1, \"summary\": string, \"rationale\": [string], \
         \"selected_evidence_ids\": [string], \"limitations\": [string], \
         \"recommended_next_steps\": [string]}}.\nInput: {input}",
    )
    .with_model(ctx.config.judge.model.clone())
    .with_output_strategy(OutputStrategy::Json)
    .with_retry(RetryConfig::new(1));

    let output = call
        .invoke(&ctx.judge_ctx, payload)
        .await
        .map_err(|e| classify_backend_error(state, e))?;
    parse_judge_extraction(&output)
}

async fn run_repair(
    ctx: &StageContext,
    state: &mut PipelineState,
    prior_error: &str,
) -> Result<JudgeExtraction, JudgeParseError> {
    let payload = judge_payload(state);
    let template = format!(
        "Your previous judge output did not satisfy the schema. Error: \
         {prior_error}. Re-emit valid JSON only, with the same fields as \
         before.\nInput: {{input}}"
    );
    let call = LlmCall::new("stage09_judge_repair", template)
        .with_model(ctx.config.judge.model.clone())
        .with_output_strategy(OutputStrategy::Json)
        .with_retry(RetryConfig::new(0));

    let output = call
        .invoke(&ctx.judge_ctx, payload)
        .await
        .map_err(|e| classify_backend_error(state, e))?;
    parse_judge_extraction(&output)
}

fn judge_payload(state: &PipelineState) -> serde_json::Value {
    json!({
        "claim": state.claim_text.clone().unwrap_or_default(),
        "verdict_support": state.verdict_support,
        "verdict_skeptic": state.verdict_skeptic,
        "citations": state.citations,
    })
}
