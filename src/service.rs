//! Public entry points: `PipelineService::run` (sync) and `run_stream`
//! (streaming). Both share [`build_initial_state`] so the two paths never
//! drift on defaulting/reconciliation behavior.

use std::sync::Arc;
use std::time::Duration;

use chrono::Utc;
use futures::channel::mpsc;
use futures::{Stream, StreamExt};
use serde::{Deserialize, Serialize};
use tracing::{info, warn};
use uuid::Uuid;

use crate::analysis_store::{AnalysisRecord, AnalysisStore};
use crate::checkpoint::{self, CheckpointOutcome, CheckpointStore};
use crate::error::VerdictResult;
use crate::orchestrator::{self, GraphOrchestrator, STAGE_IDS};
use crate::risk_flags::RiskFlag;
use crate::state::{Citation, InputType, ModelInfo, NormalizeMode, PipelineState, StageLogEntry, VerdictLabel};
use crate::stages::StageContext;

#[derive(Debug, Clone, Deserialize)]
pub struct PipelineRequest {
    pub input_type: InputType,
    pub input_payload: String,
    #[serde(default)]
    pub user_request: Option<String>,
    #[serde(default = "default_language")]
    pub language: String,
    #[serde(default)]
    pub include_full_outputs: bool,
    #[serde(default)]
    pub start_stage: Option<String>,
    #[serde(default)]
    pub end_stage: Option<String>,
    #[serde(default = "default_normalize_mode")]
    pub normalize_mode: NormalizeMode,
    #[serde(default)]
    pub checkpoint_thread_id: Option<String>,
    #[serde(default)]
    pub checkpoint_resume: bool,
}

fn default_language() -> String {
    "ko".to_string()
}

fn default_normalize_mode() -> NormalizeMode {
    NormalizeMode::Llm
}

#[derive(Debug, Clone, Serialize)]
pub struct PipelineResponse {
    pub analysis_id: String,
    pub label: VerdictLabel,
    pub confidence: f64,
    pub summary: String,
    pub rationale: Vec<String>,
    pub citations: Vec<Citation>,
    pub counter_evidence: Vec<Citation>,
    pub limitations: Vec<String>,
    pub recommended_next_steps: Vec<String>,
    pub risk_flags: Vec<String>,
    pub model_info: Option<ModelInfo>,
    pub latency_ms: u64,
    pub created_at: chrono::DateTime<Utc>,
    pub checkpoint_thread_id: Option<String>,
    pub checkpoint_resumed: bool,
    pub checkpoint_expired: bool,
    pub stage_outputs: std::collections::HashMap<String, serde_json::Value>,
    pub stage_logs: Vec<StageLogEntry>,
    pub stage_full_outputs: std::collections::HashMap<String, serde_json::Value>,
}

/// Streaming event shapes. `#[serde(tag = "event")]` picks the variant
/// name (snake_case) as the `"event"` discriminant, matching each shape's
/// own field set.
#[derive(Debug, Clone, Serialize)]
#[serde(tag = "event", rename_all = "snake_case")]
pub enum StreamEvent {
    StreamOpen {
        trace_id: String,
        ts: chrono::DateTime<Utc>,
    },
    StepStarted {
        stage: String,
        ui_step: u8,
        ui_step_title: String,
        ts: chrono::DateTime<Utc>,
    },
    StepCompleted {
        stage: String,
        ui_step: u8,
        ts: chrono::DateTime<Utc>,
    },
    StageComplete {
        stage: String,
        data: serde_json::Value,
        ts: chrono::DateTime<Utc>,
    },
    Heartbeat {
        current_stage: String,
        idle_ms: u64,
        ts: chrono::DateTime<Utc>,
    },
    Complete {
        data: Box<PipelineResponse>,
    },
    Error {
        data: StreamErrorData,
    },
}

#[derive(Debug, Clone, Serialize)]
pub struct StreamErrorData {
    pub code: String,
    pub stage: Option<String>,
    pub message: String,
    pub display_message: String,
}

/// Maps a stage id to the coarse 3-step grouping shown in the UI timeline.
fn ui_step(stage_id: &str) -> (u8, &'static str) {
    match stage_id {
        "stage01_normalize" | "stage02_querygen" | "adapter" | "stage03_collect" => (1, "Researching the claim"),
        "stage04_score" | "stage05_topk" | "stage06_verify_support" | "stage07_verify_skeptic" => {
            (2, "Weighing the evidence")
        }
        _ => (3, "Rendering a verdict"),
    }
}

/// Constructs the shared initial state for both entry points: computes
/// `trace_id`, applies request defaults, and folds in a resolved
/// checkpoint outcome.
pub fn build_initial_state(
    request: &PipelineRequest,
    checkpoint: &CheckpointOutcome,
    config: &crate::config::VerdictConfig,
) -> PipelineState {
    PipelineState {
        trace_id: Uuid::new_v4().to_string(),
        input_type: request.input_type,
        input_payload: request.input_payload.clone(),
        user_request: request.user_request.clone(),
        language: request.language.clone(),
        include_full_outputs: request.include_full_outputs,
        start_stage: request.start_stage.clone(),
        end_stage: request.end_stage.clone(),
        normalize_mode: request.normalize_mode,
        checkpoint_thread_id: Some(checkpoint.thread_id.clone()),
        checkpoint_resume: request.checkpoint_resume,
        strict_pipeline: config.strict_pipeline,
        claim_text: None,
        claim_mode: None,
        canonical_evidence: None,
        query_variants: Vec::new(),
        querygen_claims: Vec::new(),
        search_queries: Vec::new(),
        wiki_candidates: Vec::new(),
        web_candidates: Vec::new(),
        evidence_candidates: Vec::new(),
        stage03_merge_stats: Default::default(),
        scored_evidence: Vec::new(),
        score_diagnostics: Default::default(),
        support_pool: Vec::new(),
        skeptic_pool: Vec::new(),
        citations: Vec::new(),
        topk_diagnostics: Default::default(),
        verdict_support: None,
        verdict_skeptic: None,
        judge_prep_meta: None,
        draft_verdict: None,
        quality_score: None,
        final_verdict: None,
        model_info: None,
        stage09_diagnostics: Default::default(),
        model_not_found: None,
        risk_flags: crate::risk_flags::RiskFlags::new(),
        stage_logs: Vec::new(),
        stage_outputs: std::collections::HashMap::new(),
        stage_full_outputs: std::collections::HashMap::new(),
        checkpoint_resumed: checkpoint.resumed,
        checkpoint_expired: checkpoint.expired,
        started_at: std::time::Instant::now(),
    }
}

/// Counter-evidence is the skeptic pack's citations that the judge did not
/// select — the dissenting view the final label didn't adopt, surfaced
/// separately from the citations backing the label itself.
fn derive_counter_evidence(state: &PipelineState, selected_ids: &[String]) -> Vec<Citation> {
    let Some(skeptic) = &state.verdict_skeptic else {
        return Vec::new();
    };
    skeptic
        .citations
        .iter()
        .filter(|c| !selected_ids.contains(&c.evidence_id))
        .cloned()
        .collect()
}

fn resolve_selected_citations(state: &PipelineState, selected_ids: &[String]) -> Vec<Citation> {
    state
        .citations
        .iter()
        .filter(|c| selected_ids.contains(&c.evidence_id))
        .cloned()
        .collect()
}

fn assemble_response(state: &PipelineState, analysis_id: String) -> PipelineResponse {
    let verdict = state.final_verdict.clone().unwrap_or_else(|| crate::state::FinalVerdict {
        label: VerdictLabel::Unverified,
        confidence: 0.0,
        summary: "no verdict produced".to_string(),
        rationale: Vec::new(),
        selected_evidence_ids: Vec::new(),
        limitations: Vec::new(),
        recommended_next_steps: Vec::new(),
    });

    PipelineResponse {
        analysis_id,
        label: verdict.label,
        confidence: verdict.confidence,
        summary: verdict.summary.clone(),
        rationale: verdict.rationale.clone(),
        citations: resolve_selected_citations(state, &verdict.selected_evidence_ids),
        counter_evidence: derive_counter_evidence(state, &verdict.selected_evidence_ids),
        limitations: verdict.limitations.clone(),
        recommended_next_steps: verdict.recommended_next_steps.clone(),
        risk_flags: state.risk_flags.tokens(),
        model_info: state.model_info.clone(),
        latency_ms: state.started_at.elapsed().as_millis() as u64,
        created_at: Utc::now(),
        checkpoint_thread_id: state.checkpoint_thread_id.clone(),
        checkpoint_resumed: state.checkpoint_resumed,
        checkpoint_expired: state.checkpoint_expired,
        stage_outputs: state.stage_outputs.clone(),
        stage_logs: state.stage_logs.clone(),
        stage_full_outputs: state.stage_full_outputs.clone(),
    }
}

/// Wires together the stage context, checkpoint store, and analysis
/// repository into the two public entry points.
pub struct PipelineService {
    pub stage_ctx: StageContext,
    pub checkpoint_store: Arc<dyn CheckpointStore>,
    pub analysis_store: Arc<dyn AnalysisStore>,
}

impl PipelineService {
    pub fn new(
        stage_ctx: StageContext,
        checkpoint_store: Arc<dyn CheckpointStore>,
        analysis_store: Arc<dyn AnalysisStore>,
    ) -> Self {
        Self {
            stage_ctx,
            checkpoint_store,
            analysis_store,
        }
    }

    async fn reconcile_checkpoint(&self, request: &PipelineRequest) -> CheckpointOutcome {
        checkpoint::reconcile(
            self.checkpoint_store.as_ref(),
            request.checkpoint_thread_id.as_deref(),
            request.checkpoint_resume,
            self.stage_ctx.config.checkpoint_ttl,
        )
        .await
    }

    async fn persist(&self, state: &mut PipelineState, analysis_id: &str, citations: &[Citation]) {
        let record = AnalysisRecord::from_verdict(
            analysis_id.to_string(),
            state.trace_id.clone(),
            state.final_verdict.as_ref().unwrap_or(&crate::state::FinalVerdict {
                label: VerdictLabel::Unverified,
                confidence: 0.0,
                summary: String::new(),
                rationale: Vec::new(),
                selected_evidence_ids: Vec::new(),
                limitations: Vec::new(),
                recommended_next_steps: Vec::new(),
            }),
            serde_json::json!(citations),
            &state.risk_flags,
            state.model_info.as_ref(),
        );
        if let Err(err) = self.analysis_store.save(&record).await {
            warn!(trace_id = %state.trace_id, error = %err, "failed to persist analysis row");
            state.risk_flags.insert(RiskFlag::PersistenceFailed);
        }
    }

    /// Runs the full graph and returns a complete response. In lenient
    /// mode (the default) this always succeeds; in strict mode an
    /// unrecovered pipeline crash is re-raised.
    pub async fn run(&self, request: PipelineRequest) -> VerdictResult<PipelineResponse> {
        let checkpoint_outcome = self.reconcile_checkpoint(&request).await;
        let mut state = build_initial_state(&request, &checkpoint_outcome, &self.stage_ctx.config);
        info!(trace_id = %state.trace_id, "pipeline run started");

        GraphOrchestrator::run(&self.stage_ctx, &mut state).await?;

        let analysis_id = Uuid::new_v4().to_string();
        let selected_ids = state.final_verdict.as_ref().map(|v| v.selected_evidence_ids.clone()).unwrap_or_default();
        let citations = resolve_selected_citations(&state, &selected_ids);
        self.persist(&mut state, &analysis_id, &citations).await;

        let response = assemble_response(&state, analysis_id);
        info!(trace_id = %state.trace_id, label = ?response.label, "pipeline run finished");
        Ok(response)
    }

    /// Runs the graph stage by stage, emitting progress events as they
    /// happen and a heartbeat after `heartbeat_interval` of silence within
    /// a single stage. Terminates with exactly one `Complete` or `Error`.
    pub fn run_stream(self: Arc<Self>, request: PipelineRequest) -> impl Stream<Item = StreamEvent> {
        let (tx, rx) = mpsc::unbounded();
        tokio::spawn(async move {
            self.drive_stream(request, tx).await;
        });
        rx
    }

    async fn drive_stream(&self, request: PipelineRequest, tx: mpsc::UnboundedSender<StreamEvent>) {
        let checkpoint_outcome = self.reconcile_checkpoint(&request).await;
        let mut state = build_initial_state(&request, &checkpoint_outcome, &self.stage_ctx.config);

        let _ = tx.unbounded_send(StreamEvent::StreamOpen {
            trace_id: state.trace_id.clone(),
            ts: Utc::now(),
        });

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
        let heartbeat_interval = self.stage_ctx.config.heartbeat_interval;

        for (idx, stage_id) in STAGE_IDS.iter().enumerate() {
            if idx < start_idx || idx > end_idx {
                state.log_stage(stage_id, crate::state::StageStatus::Skipped, 0, None);
                continue;
            }

            let (step, step_title) = ui_step(stage_id);
            let _ = tx.unbounded_send(StreamEvent::StepStarted {
                stage: stage_id.to_string(),
                ui_step: step,
                ui_step_title: step_title.to_string(),
                ts: Utc::now(),
            });

            let crash = self.run_one_with_heartbeat(&mut state, stage_id, heartbeat_interval, &tx).await;

            if let Some(crash_message) = crash {
                state.risk_flags.insert(RiskFlag::PipelineCrash);
                if state.strict_pipeline {
                    let _ = tx.unbounded_send(StreamEvent::Error {
                        data: StreamErrorData {
                            code: "PIPELINE_CRASH".to_string(),
                            stage: Some(stage_id.to_string()),
                            message: crash_message.clone(),
                            display_message: "The analysis could not be completed.".to_string(),
                        },
                    });
                    return;
                }
            } else if state.strict_pipeline && state.risk_flags.contains(&RiskFlag::ModelNotFound) {
                if let Some(info) = &state.model_not_found {
                    let _ = tx.unbounded_send(StreamEvent::Error {
                        data: StreamErrorData {
                            code: "MODEL_NOT_FOUND".to_string(),
                            stage: Some(stage_id.to_string()),
                            message: format!("model '{}' not found at {}", info.model, info.endpoint),
                            display_message: "The analysis could not be completed.".to_string(),
                        },
                    });
                    return;
                }
            }

            let _ = tx.unbounded_send(StreamEvent::StepCompleted {
                stage: stage_id.to_string(),
                ui_step: step,
                ts: Utc::now(),
            });
            let summary = state.stage_outputs.get(*stage_id).cloned().unwrap_or_else(|| serde_json::json!({}));
            let _ = tx.unbounded_send(StreamEvent::StageComplete {
                stage: stage_id.to_string(),
                data: summary,
                ts: Utc::now(),
            });
        }

        let analysis_id = Uuid::new_v4().to_string();
        let selected_ids = state.final_verdict.as_ref().map(|v| v.selected_evidence_ids.clone()).unwrap_or_default();
        let citations = resolve_selected_citations(&state, &selected_ids);
        self.persist(&mut state, &analysis_id, &citations).await;

        let response = assemble_response(&state, analysis_id);
        let _ = tx.unbounded_send(StreamEvent::Complete {
            data: Box::new(response),
        });
    }

    /// Runs one stage, racing it against a heartbeat timer so a
    /// slow-running LLM/network call doesn't look hung on the streaming
    /// path. Returns `Some(panic_message)` only on an unrecovered crash.
    async fn run_one_with_heartbeat(
        &self,
        state: &mut PipelineState,
        stage_id: &str,
        heartbeat_interval: Duration,
        tx: &mpsc::UnboundedSender<StreamEvent>,
    ) -> Option<String> {
        let mut idle_ms: u64 = 0;
        let mut stage_fut = Box::pin(orchestrator::run_one(&self.stage_ctx, state, stage_id));
        loop {
            tokio::select! {
                result = &mut stage_fut => {
                    return result.err();
                }
                _ = tokio::time::sleep(heartbeat_interval) => {
                    idle_ms += heartbeat_interval.as_millis() as u64;
                    let _ = tx.unbounded_send(StreamEvent::Heartbeat {
                        current_stage: stage_id.to_string(),
                        idle_ms,
                        ts: Utc::now(),
                    });
                }
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::analysis_store::InMemoryAnalysisStore;
    use crate::checkpoint::InMemoryCheckpointStore;

    fn request() -> PipelineRequest {
        PipelineRequest {
            input_type: InputType::Text,
            input_payload: "the sky is blue".to_string(),
            user_request: None,
            language: "ko".to_string(),
            include_full_outputs: false,
            start_stage: None,
            end_stage: None,
            normalize_mode: NormalizeMode::Basic,
            checkpoint_thread_id: None,
            checkpoint_resume: false,
        }
    }

    fn service() -> PipelineService {
        PipelineService::new(
            crate::stages::tests_support::fake_context(),
            Arc::new(InMemoryCheckpointStore::new()),
            Arc::new(InMemoryAnalysisStore::new()),
        )
    }

    /// An [`crate::analysis_store::AnalysisStore`] that always fails, for
    /// exercising the `PERSISTENCE_FAILED` propagation path.
    struct FailingAnalysisStore;

    #[async_trait::async_trait]
    impl crate::analysis_store::AnalysisStore for FailingAnalysisStore {
        async fn save(&self, _record: &crate::analysis_store::AnalysisRecord) -> Result<(), crate::error::PipelineError> {
            Err(crate::error::PipelineError::Other("disk full".to_string()))
        }
    }

    #[tokio::test]
    async fn run_produces_a_response_with_a_fresh_checkpoint_thread() {
        let svc = service();
        let response = svc.run(request()).await.unwrap();
        assert!(!response.checkpoint_thread_id.as_ref().unwrap().is_empty());
        assert!(!response.checkpoint_resumed);
    }

    #[tokio::test]
    async fn persistence_failure_surfaces_as_a_risk_flag_on_the_response() {
        let svc = PipelineService::new(
            crate::stages::tests_support::fake_context(),
            Arc::new(InMemoryCheckpointStore::new()),
            Arc::new(FailingAnalysisStore),
        );
        let response = svc.run(request()).await.unwrap();
        assert!(response.risk_flags.contains(&RiskFlag::PersistenceFailed.as_token()));
    }

    #[tokio::test]
    async fn strict_pipeline_is_read_from_config() {
        let mut ctx = crate::stages::tests_support::fake_context();
        ctx.config = Arc::new(crate::config::VerdictConfig {
            strict_pipeline: true,
            ..(*ctx.config).clone()
        });
        let checkpoint = CheckpointOutcome {
            thread_id: "t".to_string(),
            resumed: false,
            expired: false,
        };
        let state = build_initial_state(&request(), &checkpoint, &ctx.config);
        assert!(state.strict_pipeline);
    }

    #[tokio::test]
    async fn run_stream_terminates_with_a_complete_event() {
        let svc = Arc::new(service());
        let mut stream = Box::pin(svc.run_stream(request()));
        let mut saw_open = false;
        let mut saw_complete = false;
        while let Some(event) = stream.next().await {
            match event {
                StreamEvent::StreamOpen { .. } => saw_open = true,
                StreamEvent::Complete { .. } => {
                    saw_complete = true;
                    break;
                }
                _ => {}
            }
        }
        assert!(saw_open);
        assert!(saw_complete);
    }
}

