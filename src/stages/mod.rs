//! The nine pipeline stages plus the fan-out adapter.
//!
//! Each stage is `async fn(&StageContext, &mut PipelineState) -> StageResult`.
//! A recoverable failure is returned as `Err(StageRecoverable)`, never a
//! panic or a bubbled `VerdictError` — the orchestrator turns it into a
//! risk flag and keeps going (lenient mode) or escalates (strict mode for
//! genuinely fatal conditions, which stages do not raise).

pub mod adapter;
pub mod stage01_normalize;
pub mod stage02_querygen;
pub mod stage03_collect;
pub mod stage04_score;
pub mod stage05_topk;
pub mod stage06_verify_support;
pub mod stage07_verify_skeptic;
pub mod stage08_aggregate;
pub mod stage09_judge;

use std::sync::Arc;

use crate::artifact::ArtifactLogger;
use crate::config::VerdictConfig;
use crate::exec_ctx::ExecCtx;
use crate::risk_flags::RiskFlag;
use crate::search::{SearchProvider, WikiEvidenceStore};

/// Everything a stage needs besides the state it mutates: per-role LLM
/// contexts, search/evidence providers, config, and the artifact logger.
pub struct StageContext {
    pub config: Arc<VerdictConfig>,
    pub stage1_2_ctx: ExecCtx,
    pub stage6_7_ctx: ExecCtx,
    pub judge_ctx: ExecCtx,
    pub news: Arc<dyn SearchProvider>,
    pub web: Arc<dyn SearchProvider>,
    pub wiki: Arc<dyn WikiEvidenceStore>,
    pub artifacts: Arc<ArtifactLogger>,
}

/// A recoverable, stage-local failure. Carries the risk flag the caller
/// should set and a human-readable message for `stage_logs`.
#[derive(Debug, Clone)]
pub struct StageRecoverable {
    pub flag: RiskFlag,
    pub message: String,
}

impl StageRecoverable {
    pub fn new(flag: RiskFlag, message: impl Into<String>) -> Self {
        Self {
            flag,
            message: message.into(),
        }
    }
}

pub type StageResult = Result<(), StageRecoverable>;
