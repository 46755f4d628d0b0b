//! Fixed-DAG orchestrator for the nine-stage verdict pipeline.
//!
//! The graph has exactly one fan-out/fan-in: `stage03_wiki` and
//! `stage03_web` run concurrently via [`tokio::join!`], then
//! `stage03_merge` joins them back into a single evidence set. Every
//! other edge is a straight sequence. Stage ordering, not a generic
//! graph data structure, models the DAG — the shape never changes at
//! runtime, so a registry/scheduler would only add indirection.

use std::future::Future;
use std::panic::AssertUnwindSafe;
use std::pin::Pin;
use std::time::Instant;

use futures::FutureExt;

use crate::artifact::ArtifactBuilder;
use crate::risk_flags::RiskFlag;
use crate::stages::{adapter, stage01_normalize, stage02_querygen, stage03_collect, stage04_score, stage05_topk, stage06_verify_support, stage07_verify_skeptic, stage08_aggregate, stage09_judge, StageContext, StageResult};
use crate::state::{PipelineState, StageStatus};

/// The nine stage ids in DAG order, used to resolve `start_stage`/
/// `end_stage` replay hints. `stage03_wiki`/`stage03_web` share a slot
/// since they run concurrently.
pub const STAGE_IDS: &[&str] = &[
    "stage01_normalize",
    "stage02_querygen",
    "adapter",
    "stage03_collect",
    "stage04_score",
    "stage05_topk",
    "stage06_verify_support",
    "stage07_verify_skeptic",
    "stage08_aggregate",
    "stage09_judge",
];

/// Runs the fixed DAG in order, honoring `state.start_stage`/`end_stage`
/// replay hints and `strict_pipeline` failure semantics.
///
/// In lenient mode (the default), a recoverable stage failure is logged,
/// its risk flag recorded, and the run continues into the next stage
/// with whatever partial state exists. In strict mode, the first
/// recoverable failure aborts the run with [`crate::error::VerdictError`].
pub struct GraphOrchestrator;

impl GraphOrchestrator {
    pub async fn run(ctx: &StageContext, state: &mut PipelineState) -> Result<(), crate::error::VerdictError> {
        let start_idx = state
            .start_stage
            .as_deref()
            .and_then(|s| STAGE_IDS.iter().position(|id| *id == s))
            .unwrap_or(0);
        let end_idx = state
            .end_stage
            .as_deref()
            .and_then(|s| STAGE_IDS.iter().position(|id| *id == s))
            .unwrap_or(STAGE_IDS.len() - 1);

        for (idx, stage_id) in STAGE_IDS.iter().enumerate() {
            if idx < start_idx || idx > end_idx {
                state.log_stage(stage_id, StageStatus::Skipped, 0, None);
                continue;
            }

            let outcome = run_one(ctx, state, stage_id).await;
            match outcome {
                Ok(()) => {
                    if state.strict_pipeline && state.risk_flags.contains(&RiskFlag::ModelNotFound) {
                        if let Some(info) = &state.model_not_found {
                            return Err(crate::error::VerdictError::ModelNotFound {
                                model: info.model.clone(),
                                endpoint: info.endpoint.clone(),
                            });
                        }
                    }
                }
                Err(crash_message) => {
                    state.risk_flags.insert(RiskFlag::PipelineCrash);
                    if state.strict_pipeline {
                        return Err(crate::error::VerdictError::PipelineCrash(crash_message));
                    }
                }
            }
        }

        Ok(())
    }
}

/// Runs one named stage slot (collapsing the `stage03_wiki`/`stage03_web`
/// fan-out into the single `"stage03_collect"` slot), catching panics so
/// a single bad stage degrades rather than taking the whole run down.
///
/// `pub(crate)` so [`crate::service`]'s streaming path can drive the same
/// per-stage execution while interleaving progress events between calls.
pub(crate) async fn run_one(ctx: &StageContext, state: &mut PipelineState, stage_id: &str) -> Result<(), String> {
    let started = Instant::now();

    let result: Result<StageResult, String> = if stage_id == "stage03_collect" {
        run_collect_fanout(ctx, state).await
    } else {
        let fut: Pin<Box<dyn Future<Output = StageResult> + Send + '_>> = match stage_id {
            "stage01_normalize" => Box::pin(stage01_normalize::run(ctx, state)),
            "stage02_querygen" => Box::pin(stage02_querygen::run(ctx, state)),
            "adapter" => Box::pin(adapter::run(ctx, state)),
            "stage04_score" => Box::pin(stage04_score::run(ctx, state)),
            "stage05_topk" => Box::pin(stage05_topk::run(ctx, state)),
            "stage06_verify_support" => Box::pin(stage06_verify_support::run(ctx, state)),
            "stage07_verify_skeptic" => Box::pin(stage07_verify_skeptic::run(ctx, state)),
            "stage08_aggregate" => Box::pin(stage08_aggregate::run(ctx, state)),
            "stage09_judge" => Box::pin(stage09_judge::run(ctx, state)),
            other => unreachable!("unknown stage id {other}"),
        };
        AssertUnwindSafe(fut).catch_unwind().await.map_err(panic_to_string)
    };

    let elapsed_ms = started.elapsed().as_millis() as u64;

    match result {
        Ok(Ok(())) => {
            state.log_stage(stage_id, StageStatus::Success, elapsed_ms, None);
            record_artifact(ctx, state, stage_id, elapsed_ms, None);
            tracing::info!(trace_id = %state.trace_id, stage = stage_id, elapsed_ms, "stage succeeded");
            Ok(())
        }
        Ok(Err(recoverable)) => {
            state.risk_flags.insert(recoverable.flag.clone());
            state.log_stage(stage_id, StageStatus::Error, elapsed_ms, Some(recoverable.message.clone()));
            record_artifact(ctx, state, stage_id, elapsed_ms, Some(recoverable.message.clone()));
            tracing::warn!(trace_id = %state.trace_id, stage = stage_id, elapsed_ms, error = %recoverable.message, "stage recovered from error");
            Ok(())
        }
        Err(panic_message) => {
            state.log_stage(stage_id, StageStatus::Error, elapsed_ms, Some(panic_message.clone()));
            record_artifact(ctx, state, stage_id, elapsed_ms, Some(panic_message.clone()));
            tracing::warn!(trace_id = %state.trace_id, stage = stage_id, elapsed_ms, error = %panic_message, "stage panicked");
            Err(panic_message)
        }
    }
}

/// `stage03_wiki`/`stage03_web` run concurrently, then `stage03_merge`
/// joins them. A recoverable failure from either side of the fan-out is
/// folded into the merge's own result rather than aborting the fan-in.
async fn run_collect_fanout(ctx: &StageContext, state: &mut PipelineState) -> Result<StageResult, String> {
    let mut wiki_state = state.clone();
    let mut web_state = state.clone();

    let (wiki_result, web_result) = {
        let wiki_fut = AssertUnwindSafe(stage03_collect::run_wiki(ctx, &mut wiki_state)).catch_unwind();
        let web_fut = AssertUnwindSafe(stage03_collect::run_web(ctx, &mut web_state)).catch_unwind();
        tokio::join!(wiki_fut, web_fut)
    };

    let wiki_result = wiki_result.map_err(panic_to_string)?;
    let web_result = web_result.map_err(panic_to_string)?;

    state.wiki_candidates = wiki_state.wiki_candidates;
    state.web_candidates = web_state.web_candidates;

    if let Err(recoverable) = &wiki_result {
        state.risk_flags.insert(recoverable.flag.clone());
    }
    if let Err(recoverable) = &web_result {
        state.risk_flags.insert(recoverable.flag.clone());
    }

    AssertUnwindSafe(stage03_collect::run_merge(ctx, state))
        .catch_unwind()
        .await
        .map_err(panic_to_string)
}

fn panic_to_string(panic: Box<dyn std::any::Any + Send>) -> String {
    if let Some(s) = panic.downcast_ref::<&str>() {
        s.to_string()
    } else if let Some(s) = panic.downcast_ref::<String>() {
        s.clone()
    } else {
        "stage panicked with a non-string payload".to_string()
    }
}

fn record_artifact(ctx: &StageContext, state: &PipelineState, stage_id: &str, elapsed_ms: u64, error: Option<String>) {
    let summary = state.stage_outputs.get(stage_id).cloned().unwrap_or_else(|| serde_json::json!({}));
    let mut tokens = state.risk_flags.tokens();
    if let Some(err) = error {
        tokens.push(format!("error:{err}"));
    }
    let mut builder = ArtifactBuilder::default();
    if stage_id == "stage09_judge" {
        builder = builder.schema_mismatch(state.stage09_diagnostics.schema_mismatch);
    }
    let artifact = builder.build(&state.trace_id, stage_id, elapsed_ms, &summary, tokens);
    ctx.artifacts.record(&artifact);
}
