//! Stage 1 — Normalize. Extracts the canonical claim from raw input.

use serde::Deserialize;
use serde_json::json;

use crate::output_strategy::OutputStrategy;
use crate::payload::Payload;
use crate::retry::RetryConfig;
use crate::risk_flags::RiskFlag;
use crate::state::{ClaimMode, NormalizeMode, PipelineState};
use crate::stages::{StageContext, StageRecoverable, StageResult};
use crate::LlmCall;

#[derive(Debug, Deserialize)]
struct NormalizeExtraction {
    claim_text: String,
    claim_mode: ClaimModeWire,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "lowercase")]
enum ClaimModeWire {
    Fact,
    Rumor,
    Mixed,
}

impl From<ClaimModeWire> for ClaimMode {
    fn from(wire: ClaimModeWire) -> Self {
        match wire {
            ClaimModeWire::Fact => ClaimMode::Fact,
            ClaimModeWire::Rumor => ClaimMode::Rumor,
            ClaimModeWire::Mixed => ClaimMode::Mixed,
        }
    }
}

pub async fn run(ctx: &StageContext, state: &mut PipelineState) -> StageResult {
    let truncated: String = state
        .input_payload
        .chars()
        .take(ctx.config.max_claim_chars)
        .collect();

    let result = match state.normalize_mode {
        NormalizeMode::Basic => {
            apply_basic_fallback(state, &truncated);
            Ok(())
        }
        NormalizeMode::Llm => match run_llm_extraction(ctx, &truncated).await {
            Ok(extraction) => {
                state.claim_text = Some(extraction.claim_text);
                state.claim_mode = Some(extraction.claim_mode.into());
                state.canonical_evidence = Some(json!({ "source": "llm" }));
                Ok(())
            }
            Err(message) => {
                apply_basic_fallback(state, &truncated);
                Err(StageRecoverable::new(
                    RiskFlag::StageFailure("normalize"),
                    format!("NORMALIZE_FAILED: {message}"),
                ))
            }
        },
    };

    state.record_output(
        "stage01_normalize",
        json!({ "claim_text": state.claim_text, "claim_mode": state.claim_mode }),
        None,
    );
    result
}

async fn run_llm_extraction(ctx: &StageContext, input: &str) -> Result<NormalizeExtraction, String> {
    let call = LlmCall::new(
        "stage01_normalize",
        "Extract the canonical factual claim from the following input and classify it.\n\
         Respond as JSON: {{\"claim_text\": string, \"claim_mode\": \"fact\"|\"rumor\"|\"mixed\"}}.\n\
         Input: {input}",
    )
    .with_model(ctx.config.slm_stage1_2.model.clone())
    .with_output_strategy(OutputStrategy::Json)
    .with_retry(RetryConfig::new(1));

    let output = call
        .invoke(&ctx.stage1_2_ctx, json!(input))
        .await
        .map_err(|e| e.to_string())?;

    output.parse_as::<NormalizeExtraction>().map_err(|e| e.to_string())
}

fn apply_basic_fallback(state: &mut PipelineState, truncated: &str) {
    state.claim_text = Some(truncated.trim().to_string());
    state.claim_mode = Some(ClaimMode::Fact);
    state.canonical_evidence = Some(json!({ "source": "basic" }));
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn basic_fallback_trims_and_labels_fact() {
        let mut state = crate::state::test_support::blank_state();
        apply_basic_fallback(&mut state, "  a claim  ");
        assert_eq!(state.claim_text.as_deref(), Some("a claim"));
        assert_eq!(state.claim_mode, Some(ClaimMode::Fact));
    }
}
