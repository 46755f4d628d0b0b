//! The pipeline state record threaded through all nine stages.
//!
//! `PipelineState` is additive: each stage reads the fields it needs and
//! writes only the fields it owns. Nothing downstream of stage N ever
//! rewrites a field stage N already set, except the service layer's own
//! derived fields (`latency_ms`, `created_at`).

use std::collections::HashMap;
use std::time::Instant;

use serde::{Deserialize, Serialize};

use crate::risk_flags::RiskFlags;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum InputType {
    Text,
    Url,
    Image,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum NormalizeMode {
    Llm,
    Basic,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ClaimMode {
    Fact,
    Rumor,
    Mixed,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum QueryType {
    #[serde(rename = "news")]
    News,
    #[serde(rename = "web")]
    Web,
    #[serde(rename = "wiki")]
    Wiki,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct QueryVariant {
    pub text: String,
    #[serde(rename = "type")]
    pub kind: QueryType,
    /// Only meaningful for `QueryType::Wiki`: title-indexed vs. full-text
    /// lookup, carried over from the originating `WikiQuery::mode`.
    #[serde(default)]
    pub wiki_mode: Option<WikiQueryMode>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TimeSensitivity {
    Low,
    Mid,
    High,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct WikiQuery {
    pub mode: WikiQueryMode,
    pub q: String,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum WikiQueryMode {
    Title,
    Fulltext,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct QueryPack {
    pub wiki_db: Vec<WikiQuery>,
    pub news_search: Vec<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct QuerygenClaim {
    pub claim_id: String,
    pub claim_type: String,
    pub time_sensitivity: TimeSensitivity,
    pub query_pack: QueryPack,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum SourceType {
    Wikipedia,
    News,
    WebUrl,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EvidenceCandidate {
    pub id: String,
    pub source_type: SourceType,
    pub title: String,
    pub url: Option<String>,
    pub snippet: String,
    pub published_at: Option<String>,
    pub trust_prior: f64,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct Stage03MergeStats {
    pub wiki_count: usize,
    pub news_count: usize,
    pub web_count: usize,
    pub filtered_count: usize,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ScoredEvidence {
    pub candidate: EvidenceCandidate,
    pub relevance: f64,
    pub retained: bool,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ScoreDiagnostics {
    pub total_scored: usize,
    pub pass_count: usize,
    pub pass_rate: f64,
}

/// A quote-bounded reference to an evidence candidate.
///
/// `quote` is hard-truncated to `MAX_QUOTE_CHARS` at construction; this
/// never fails, it silently shortens.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Citation {
    pub evidence_id: String,
    pub quote: String,
    pub relevance: f64,
}

impl Citation {
    pub const MAX_QUOTE_CHARS: usize = 500;

    pub fn new(evidence_id: impl Into<String>, quote: impl Into<String>, relevance: f64) -> Self {
        let quote: String = quote.into();
        let truncated: String = quote.chars().take(Self::MAX_QUOTE_CHARS).collect();
        Self {
            evidence_id: evidence_id.into(),
            quote: truncated,
            relevance,
        }
    }
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct TopkDiagnostics {
    pub support_k: usize,
    pub skeptic_k: usize,
    pub avg_trust_support: f64,
    pub avg_trust_skeptic: f64,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum Stance {
    Supports,
    Refutes,
    Neutral,
    Unverified,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct VerdictPackDiagnostics {
    pub parse_ok: bool,
    pub parse_retry_used: bool,
    pub citation_valid_count: usize,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct VerdictPack {
    pub stance: Stance,
    pub confidence: f64,
    pub reasoning: String,
    pub citations: Vec<Citation>,
    pub diagnostics: VerdictPackDiagnostics,
}

impl VerdictPack {
    /// The skeleton pack emitted when both parse attempts fail.
    pub fn unverified_skeleton(reason: impl Into<String>) -> Self {
        Self {
            stance: Stance::Unverified,
            confidence: 0.0,
            reasoning: reason.into(),
            citations: Vec::new(),
            diagnostics: VerdictPackDiagnostics {
                parse_ok: false,
                parse_retry_used: true,
                citation_valid_count: 0,
            },
        }
    }
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct JudgePrepMeta {
    pub support_citation_count: usize,
    pub skeptic_citation_count: usize,
    pub stance_balanced: bool,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum VerdictLabel {
    True,
    False,
    Mixed,
    Unverified,
    Refused,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DraftVerdict {
    pub stance: VerdictLabel,
    pub rationale_summary: String,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct Stage09Diagnostics {
    pub schema_mismatch: bool,
    pub fail_closed: bool,
    pub selected_evidence_count: usize,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ModelNotFoundInfo {
    pub model: String,
    pub endpoint: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ModelInfo {
    pub provider: String,
    pub model: String,
    pub version: Option<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct FinalVerdict {
    pub label: VerdictLabel,
    pub confidence: f64,
    pub summary: String,
    pub rationale: Vec<String>,
    pub selected_evidence_ids: Vec<String>,
    pub limitations: Vec<String>,
    pub recommended_next_steps: Vec<String>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum StageStatus {
    Success,
    Error,
    Skipped,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StageLogEntry {
    pub stage: String,
    pub status: StageStatus,
    pub elapsed_ms: u64,
    pub error: Option<String>,
}

/// The single structured record threaded through all nine stages.
///
/// Constructed once by [`crate::service::build_initial_state`] and
/// discarded after response assembly; stages mutate it additively.
#[derive(Debug, Clone)]
pub struct PipelineState {
    // Identity & config
    pub trace_id: String,
    pub input_type: InputType,
    pub input_payload: String,
    pub user_request: Option<String>,
    pub language: String,
    pub include_full_outputs: bool,
    pub start_stage: Option<String>,
    pub end_stage: Option<String>,
    pub normalize_mode: NormalizeMode,
    pub checkpoint_thread_id: Option<String>,
    pub checkpoint_resume: bool,
    pub strict_pipeline: bool,

    // Stage 1
    pub claim_text: Option<String>,
    pub claim_mode: Option<ClaimMode>,
    pub canonical_evidence: Option<serde_json::Value>,

    // Stage 2
    pub query_variants: Vec<QueryVariant>,
    pub querygen_claims: Vec<QuerygenClaim>,

    // Adapter
    pub search_queries: Vec<QueryVariant>,

    // Stage 3
    pub wiki_candidates: Vec<EvidenceCandidate>,
    pub web_candidates: Vec<EvidenceCandidate>,
    pub evidence_candidates: Vec<EvidenceCandidate>,
    pub stage03_merge_stats: Stage03MergeStats,

    // Stage 4
    pub scored_evidence: Vec<ScoredEvidence>,
    pub score_diagnostics: ScoreDiagnostics,

    // Stage 5
    pub support_pool: Vec<EvidenceCandidate>,
    pub skeptic_pool: Vec<EvidenceCandidate>,
    pub citations: Vec<Citation>,
    pub topk_diagnostics: TopkDiagnostics,

    // Stage 6/7
    pub verdict_support: Option<VerdictPack>,
    pub verdict_skeptic: Option<VerdictPack>,

    // Stage 8
    pub judge_prep_meta: Option<JudgePrepMeta>,
    pub draft_verdict: Option<DraftVerdict>,
    pub quality_score: Option<f64>,

    // Stage 9
    pub final_verdict: Option<FinalVerdict>,
    pub model_info: Option<ModelInfo>,
    pub stage09_diagnostics: Stage09Diagnostics,

    // Cross-cutting
    /// Set when an LLM call's provider-fallback dispatch 404'd on both
    /// paths; lets the orchestrator escalate `RiskFlag::ModelNotFound`
    /// into a hard failure in strict mode with the model/endpoint intact.
    pub model_not_found: Option<ModelNotFoundInfo>,
    pub risk_flags: RiskFlags,
    pub stage_logs: Vec<StageLogEntry>,
    pub stage_outputs: HashMap<String, serde_json::Value>,
    pub stage_full_outputs: HashMap<String, serde_json::Value>,
    pub checkpoint_resumed: bool,
    pub checkpoint_expired: bool,

    #[doc(hidden)]
    pub started_at: Instant,
}

impl PipelineState {
    /// Record that a stage has finished, appending exactly one log entry.
    pub fn log_stage(&mut self, stage: &str, status: StageStatus, elapsed_ms: u64, error: Option<String>) {
        self.stage_logs.push(StageLogEntry {
            stage: stage.to_string(),
            status,
            elapsed_ms,
            error,
        });
    }

    /// Record a stage's compact output summary, and (if requested) its
    /// full payload.
    pub fn record_output(&mut self, stage: &str, summary: serde_json::Value, full: Option<serde_json::Value>) {
        self.stage_outputs.insert(stage.to_string(), summary);
        if self.include_full_outputs {
            if let Some(full) = full {
                self.stage_full_outputs.insert(stage.to_string(), full);
            }
        }
    }

    /// Resolve a citation's `evidence_id` against the merged candidate
    /// set. Unresolved ids must be dropped by the caller per invariant 4.
    pub fn evidence_ids(&self) -> std::collections::HashSet<&str> {
        self.evidence_candidates.iter().map(|c| c.id.as_str()).collect()
    }
}

/// Test-only constructor shared across `stages::*` unit tests so each
/// stage test doesn't have to restate every field on `PipelineState`.
#[cfg(test)]
pub(crate) mod test_support {
    use super::*;

    pub fn blank_state() -> PipelineState {
        PipelineState {
            trace_id: "trace-test".to_string(),
            input_type: InputType::Text,
            input_payload: String::new(),
            user_request: None,
            language: "ko".to_string(),
            include_full_outputs: false,
            start_stage: None,
            end_stage: None,
            normalize_mode: NormalizeMode::Llm,
            checkpoint_thread_id: None,
            checkpoint_resume: false,
            strict_pipeline: false,
            claim_text: None,
            claim_mode: None,
            canonical_evidence: None,
            query_variants: Vec::new(),
            querygen_claims: Vec::new(),
            search_queries: Vec::new(),
            wiki_candidates: Vec::new(),
            web_candidates: Vec::new(),
            evidence_candidates: Vec::new(),
            stage03_merge_stats: Stage03MergeStats::default(),
            scored_evidence: Vec::new(),
            score_diagnostics: ScoreDiagnostics::default(),
            support_pool: Vec::new(),
            skeptic_pool: Vec::new(),
            citations: Vec::new(),
            topk_diagnostics: TopkDiagnostics::default(),
            verdict_support: None,
            verdict_skeptic: None,
            judge_prep_meta: None,
            draft_verdict: None,
            quality_score: None,
            final_verdict: None,
            model_info: None,
            stage09_diagnostics: Stage09Diagnostics::default(),
            model_not_found: None,
            risk_flags: RiskFlags::new(),
            stage_logs: Vec::new(),
            stage_outputs: HashMap::new(),
            stage_full_outputs: HashMap::new(),
            checkpoint_resumed: false,
            checkpoint_expired: false,
            started_at: Instant::now(),
        }
    }
}
