//! Thread-identity checkpoint manager.
//!
//! Durable resume is modeled as a thin registry mapping a `thread_id` to
//! `last_seen`. The DAG's own step-level state is a separate, optional
//! concern (see module docs in [`crate::orchestrator`]); this manager only
//! guarantees thread-identity and TTL semantics, with or without a
//! step-level saver underneath it.

use std::collections::HashMap;
use std::sync::Mutex;
use std::time::Duration;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use uuid::Uuid;

use crate::error::PipelineError;

/// Outcome of reconciling a request's checkpoint hint against the store.
#[derive(Debug, Clone)]
pub struct CheckpointOutcome {
    pub thread_id: String,
    pub resumed: bool,
    pub expired: bool,
}

/// A durable (or in-memory fallback) thread-identity registry.
///
/// Implementations must never fail the request for storage reasons; a
/// failing `lookup`/`touch` should be caught by the caller and degraded
/// to [`InMemoryCheckpointStore`] rather than propagated.
#[async_trait]
pub trait CheckpointStore: Send + Sync {
    async fn lookup(&self, thread_id: &str) -> Result<Option<DateTime<Utc>>, PipelineError>;
    async fn upsert(&self, thread_id: &str, last_seen: DateTime<Utc>) -> Result<(), PipelineError>;
    async fn delete(&self, thread_id: &str) -> Result<(), PipelineError>;
}

/// Reconcile a request's checkpoint hint against a store, applying TTL
/// expiry. This is the one function both the Postgres-backed and the
/// in-memory stores share.
pub async fn reconcile(
    store: &dyn CheckpointStore,
    requested_thread_id: Option<&str>,
    resume_requested: bool,
    ttl: Duration,
) -> CheckpointOutcome {
    match requested_thread_id {
        None => {
            let thread_id = Uuid::new_v4().to_string();
            let _ = store.upsert(&thread_id, Utc::now()).await;
            CheckpointOutcome {
                thread_id,
                resumed: false,
                expired: false,
            }
        }
        Some(thread_id) if resume_requested => match store.lookup(thread_id).await {
            Ok(Some(last_seen)) => {
                let age = Utc::now().signed_duration_since(last_seen);
                let ttl_chrono = chrono::Duration::from_std(ttl).unwrap_or(chrono::Duration::zero());
                if age > ttl_chrono {
                    let _ = store.delete(thread_id).await;
                    let new_id = Uuid::new_v4().to_string();
                    let _ = store.upsert(&new_id, Utc::now()).await;
                    CheckpointOutcome {
                        thread_id: new_id,
                        resumed: false,
                        expired: true,
                    }
                } else {
                    let _ = store.upsert(thread_id, Utc::now()).await;
                    CheckpointOutcome {
                        thread_id: thread_id.to_string(),
                        resumed: true,
                        expired: false,
                    }
                }
            }
            Ok(None) | Err(_) => {
                let _ = store.upsert(thread_id, Utc::now()).await;
                CheckpointOutcome {
                    thread_id: thread_id.to_string(),
                    resumed: false,
                    expired: false,
                }
            }
        },
        Some(thread_id) => {
            let _ = store.upsert(thread_id, Utc::now()).await;
            CheckpointOutcome {
                thread_id: thread_id.to_string(),
                resumed: false,
                expired: false,
            }
        }
    }
}

/// In-memory fallback used when no durable backend is configured, or
/// when the durable backend is unreachable.
#[derive(Default)]
pub struct InMemoryCheckpointStore {
    rows: Mutex<HashMap<String, DateTime<Utc>>>,
}

impl InMemoryCheckpointStore {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl CheckpointStore for InMemoryCheckpointStore {
    async fn lookup(&self, thread_id: &str) -> Result<Option<DateTime<Utc>>, PipelineError> {
        Ok(self.rows.lock().unwrap().get(thread_id).copied())
    }

    async fn upsert(&self, thread_id: &str, last_seen: DateTime<Utc>) -> Result<(), PipelineError> {
        self.rows.lock().unwrap().insert(thread_id.to_string(), last_seen);
        Ok(())
    }

    async fn delete(&self, thread_id: &str) -> Result<(), PipelineError> {
        self.rows.lock().unwrap().remove(thread_id);
        Ok(())
    }
}

/// A store that never tracks identity: every request gets a fresh id and
/// `resumed` is always false. Used when `checkpoint_backend=none`.
#[derive(Default)]
pub struct NullCheckpointStore;

#[async_trait]
impl CheckpointStore for NullCheckpointStore {
    async fn lookup(&self, _thread_id: &str) -> Result<Option<DateTime<Utc>>, PipelineError> {
        Ok(None)
    }

    async fn upsert(&self, _thread_id: &str, _last_seen: DateTime<Utc>) -> Result<(), PipelineError> {
        Ok(())
    }

    async fn delete(&self, _thread_id: &str) -> Result<(), PipelineError> {
        Ok(())
    }
}

#[cfg(feature = "postgres")]
pub mod postgres {
    use super::*;
    use sqlx::PgPool;

    /// Postgres-backed thread registry, table shape
    /// `(thread_id primary key, last_seen timestamptz)`.
    pub struct PostgresCheckpointStore {
        pool: PgPool,
        table: String,
    }

    impl PostgresCheckpointStore {
        pub fn new(pool: PgPool, table: impl Into<String>) -> Self {
            Self {
                pool,
                table: table.into(),
            }
        }
    }

    #[async_trait]
    impl CheckpointStore for PostgresCheckpointStore {
        async fn lookup(&self, thread_id: &str) -> Result<Option<DateTime<Utc>>, PipelineError> {
            let query = format!("SELECT last_seen FROM {} WHERE thread_id = $1", self.table);
            let row: Option<(DateTime<Utc>,)> = sqlx::query_as(&query)
                .bind(thread_id)
                .fetch_optional(&self.pool)
                .await
                .map_err(|e| PipelineError::Other(e.to_string()))?;
            Ok(row.map(|(last_seen,)| last_seen))
        }

        async fn upsert(&self, thread_id: &str, last_seen: DateTime<Utc>) -> Result<(), PipelineError> {
            let query = format!(
                "INSERT INTO {} (thread_id, last_seen) VALUES ($1, $2) \
                 ON CONFLICT (thread_id) DO UPDATE SET last_seen = EXCLUDED.last_seen",
                self.table
            );
            sqlx::query(&query)
                .bind(thread_id)
                .bind(last_seen)
                .execute(&self.pool)
                .await
                .map_err(|e| PipelineError::Other(e.to_string()))?;
            Ok(())
        }

        async fn delete(&self, thread_id: &str) -> Result<(), PipelineError> {
            let query = format!("DELETE FROM {} WHERE thread_id = $1", self.table);
            sqlx::query(&query)
                .bind(thread_id)
                .execute(&self.pool)
                .await
                .map_err(|e| PipelineError::Other(e.to_string()))?;
            Ok(())
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn fresh_request_allocates_new_thread() {
        let store = InMemoryCheckpointStore::new();
        let outcome = reconcile(&store, None, false, Duration::from_secs(3600)).await;
        assert!(!outcome.resumed);
        assert!(!outcome.expired);
        assert!(!outcome.thread_id.is_empty());
    }

    #[tokio::test]
    async fn resume_within_ttl_marks_resumed() {
        let store = InMemoryCheckpointStore::new();
        let first = reconcile(&store, None, false, Duration::from_secs(3600)).await;
        let second = reconcile(&store, Some(&first.thread_id), true, Duration::from_secs(3600)).await;
        assert!(second.resumed);
        assert!(!second.expired);
        assert_eq!(second.thread_id, first.thread_id);
    }

    #[tokio::test]
    async fn resume_past_ttl_issues_new_thread() {
        let store = InMemoryCheckpointStore::new();
        let thread_id = "stale-thread".to_string();
        store.upsert(&thread_id, Utc::now() - chrono::Duration::hours(2)).await.unwrap();
        let outcome = reconcile(&store, Some(&thread_id), true, Duration::from_secs(60)).await;
        assert!(outcome.expired);
        assert!(!outcome.resumed);
        assert_ne!(outcome.thread_id, thread_id);
    }

    #[tokio::test]
    async fn resume_unknown_thread_falls_back_to_fresh_insert() {
        let store = InMemoryCheckpointStore::new();
        let outcome = reconcile(&store, Some("never-seen"), true, Duration::from_secs(3600)).await;
        assert!(!outcome.resumed);
        assert_eq!(outcome.thread_id, "never-seen");
    }

    #[tokio::test]
    async fn null_store_never_resumes() {
        let store = NullCheckpointStore;
        let outcome = reconcile(&store, Some("whatever"), true, Duration::from_secs(3600)).await;
        assert!(!outcome.resumed);
    }
}
