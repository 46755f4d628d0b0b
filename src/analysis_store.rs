//! Persistence for completed verdicts.
//!
//! A narrow trait-bound repository, same shape as [`crate::checkpoint::CheckpointStore`]:
//! best-effort, never fails the request. A save failure sets
//! `PERSISTENCE_FAILED` on the response and is otherwise swallowed.

use async_trait::async_trait;
use chrono::{DateTime, Utc};

use crate::error::PipelineError;
use crate::risk_flags::RiskFlags;
use crate::state::{FinalVerdict, ModelInfo};

/// One row of `analysis_results`.
#[derive(Debug, Clone)]
pub struct AnalysisRecord {
    pub id: String,
    pub created_at: DateTime<Utc>,
    pub label: String,
    pub confidence: f64,
    pub summary: String,
    pub citations_json: serde_json::Value,
    pub risk_flags: Vec<String>,
    pub trace_id: String,
    pub model_info_json: serde_json::Value,
}

impl AnalysisRecord {
    pub fn from_verdict(
        id: impl Into<String>,
        trace_id: impl Into<String>,
        verdict: &FinalVerdict,
        citations_json: serde_json::Value,
        risk_flags: &RiskFlags,
        model_info: Option<&ModelInfo>,
    ) -> Self {
        Self {
            id: id.into(),
            created_at: Utc::now(),
            label: format!("{:?}", verdict.label).to_uppercase(),
            confidence: verdict.confidence,
            summary: verdict.summary.clone(),
            citations_json,
            risk_flags: risk_flags.tokens(),
            trace_id: trace_id.into(),
            model_info_json: model_info.map(|m| serde_json::json!(m)).unwrap_or(serde_json::Value::Null),
        }
    }
}

#[async_trait]
pub trait AnalysisStore: Send + Sync {
    async fn save(&self, record: &AnalysisRecord) -> Result<(), PipelineError>;
}

/// In-memory store used when no durable backend is configured, or the
/// durable backend is unreachable.
#[derive(Default)]
pub struct InMemoryAnalysisStore {
    rows: std::sync::Mutex<Vec<AnalysisRecord>>,
}

impl InMemoryAnalysisStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn len(&self) -> usize {
        self.rows.lock().unwrap().len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

#[async_trait]
impl AnalysisStore for InMemoryAnalysisStore {
    async fn save(&self, record: &AnalysisRecord) -> Result<(), PipelineError> {
        self.rows.lock().unwrap().push(record.clone());
        Ok(())
    }
}

#[cfg(feature = "postgres")]
pub mod postgres {
    use super::*;
    use sqlx::PgPool;

    pub struct PostgresAnalysisStore {
        pool: PgPool,
    }

    impl PostgresAnalysisStore {
        pub fn new(pool: PgPool) -> Self {
            Self { pool }
        }
    }

    #[async_trait]
    impl AnalysisStore for PostgresAnalysisStore {
        async fn save(&self, record: &AnalysisRecord) -> Result<(), PipelineError> {
            sqlx::query(
                "INSERT INTO analysis_results \
                 (id, created_at, label, confidence, summary, citations_json, risk_flags, trace_id, model_info) \
                 VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9)",
            )
            .bind(&record.id)
            .bind(record.created_at)
            .bind(&record.label)
            .bind(record.confidence)
            .bind(&record.summary)
            .bind(&record.citations_json)
            .bind(&record.risk_flags)
            .bind(&record.trace_id)
            .bind(&record.model_info_json)
            .execute(&self.pool)
            .await
            .map_err(|e| PipelineError::Other(e.to_string()))?;
            Ok(())
        }
    }
}
