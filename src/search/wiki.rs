//! Read-only wiki evidence store: title trigram, full-text, and optional
//! vector search over a corpus this crate never writes to.

use async_trait::async_trait;

use crate::state::EvidenceCandidate;

/// One wiki lookup, in the mode the caller requested.
#[derive(Debug, Clone)]
pub enum WikiQueryKind {
    Title(String),
    Fulltext(String),
}

/// A read-only handle to the wiki corpus.
///
/// Queries are always parameterized by the implementation; this trait's
/// job is to enforce the length cap and normalization *before* any
/// implementation sees the string, so every backend gets the same
/// adversarial-input guarantee (testable property 10 in the spec).
#[async_trait]
pub trait WikiEvidenceStore: Send + Sync {
    /// Execute one already-normalized query. Implementations must never
    /// raise for parse/execution failures — return an empty `Vec` instead.
    async fn query(&self, kind: &WikiQueryKind, limit: usize) -> Vec<EvidenceCandidate>;
}

/// Maximum characters a wiki query string may contain after normalization.
pub const MAX_QUERY_CHARS: usize = 180;

/// Strip control characters, collapse whitespace, map `&` to a space,
/// then cap to [`MAX_QUERY_CHARS`]. Applied to every wiki query before it
/// reaches a [`WikiEvidenceStore`] implementation.
pub fn normalize_query(raw: &str) -> String {
    let mut collapsed = String::with_capacity(raw.len());
    let mut last_was_space = false;
    for ch in raw.chars() {
        if ch.is_control() {
            continue;
        }
        let ch = if ch == '&' { ' ' } else { ch };
        if ch.is_whitespace() {
            if !last_was_space {
                collapsed.push(' ');
            }
            last_was_space = true;
        } else {
            collapsed.push(ch);
            last_was_space = false;
        }
    }
    let trimmed = collapsed.trim();
    trimmed.chars().take(MAX_QUERY_CHARS).collect()
}

/// `sqlx`-backed implementation over the read-only wiki corpus.
///
/// Table shapes (see module docs): `wiki_pages(id, title, ...)` with a
/// `pg_trgm` GIN index on `title`, and `wiki_chunks(page_id, chunk_idx,
/// content, ...)` with a `simple`-dictionary FTS GIN index on `content`.
/// Vector retrieval over `wiki_chunks.embedding` is not wired here: the
/// embeddings backfill job that populates it is a separate concern from
/// this crate, gated by `wiki_embeddings_ready` in
/// [`crate::config::VerdictConfig`].
#[cfg(feature = "postgres")]
pub mod postgres {
    use super::*;
    use crate::state::{EvidenceCandidate, SourceType};
    use sqlx::PgPool;

    pub struct PostgresWikiStore {
        pool: PgPool,
    }

    impl PostgresWikiStore {
        pub fn new(pool: PgPool) -> Self {
            Self { pool }
        }

        async fn query_title(&self, q: &str, limit: usize) -> Vec<EvidenceCandidate> {
            let rows: Vec<(i64, String, String)> = sqlx::query_as(
                "SELECT id, title, url FROM wiki_pages \
                 WHERE title % $1 ORDER BY similarity(title, $1) DESC LIMIT $2",
            )
            .bind(q)
            .bind(limit as i64)
            .fetch_all(&self.pool)
            .await
            .unwrap_or_default();

            rows.into_iter()
                .map(|(id, title, url)| EvidenceCandidate {
                    id: format!("wiki:{id}"),
                    source_type: SourceType::Wikipedia,
                    title: title.clone(),
                    url: Some(url),
                    snippet: title,
                    published_at: None,
                    trust_prior: 1.0,
                })
                .collect()
        }

        async fn query_fulltext(&self, q: &str, limit: usize) -> Vec<EvidenceCandidate> {
            let rows: Vec<(i64, String, String, String)> = sqlx::query_as(
                "SELECT p.id, p.title, p.url, c.content FROM wiki_chunks c \
                 JOIN wiki_pages p ON p.id = c.page_id \
                 WHERE to_tsvector('simple', c.content) @@ plainto_tsquery('simple', $1) \
                 ORDER BY ts_rank(to_tsvector('simple', c.content), plainto_tsquery('simple', $1)) DESC \
                 LIMIT $2",
            )
            .bind(q)
            .bind(limit as i64)
            .fetch_all(&self.pool)
            .await
            .unwrap_or_default();

            rows.into_iter()
                .map(|(id, title, url, content)| EvidenceCandidate {
                    id: format!("wiki:{id}"),
                    source_type: SourceType::Wikipedia,
                    title,
                    url: Some(url),
                    snippet: content.chars().take(500).collect(),
                    published_at: None,
                    trust_prior: 1.0,
                })
                .collect()
        }
    }

    #[async_trait]
    impl WikiEvidenceStore for PostgresWikiStore {
        async fn query(&self, kind: &WikiQueryKind, limit: usize) -> Vec<EvidenceCandidate> {
            match kind {
                WikiQueryKind::Title(q) => self.query_title(q, limit).await,
                WikiQueryKind::Fulltext(q) => self.query_fulltext(q, limit).await,
            }
        }
    }
}
