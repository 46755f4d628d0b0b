//! External evidence sources: news, web, and the read-only wiki store.
//!
//! Each source is defined behind a trait so tests substitute a fixed-
//! response fake instead of performing network or database I/O, the same
//! pattern the LLM layer uses for [`Backend`](crate::backend::Backend) and
//! [`MockBackend`](crate::backend::MockBackend).

pub mod news;
pub mod web;
pub mod wiki;

pub use news::NewsClient;
pub use web::WebClient;
pub use wiki::{normalize_query, WikiEvidenceStore, WikiQueryKind};

use async_trait::async_trait;

use crate::state::EvidenceCandidate;

/// A single query issued to a search provider.
#[derive(Debug, Clone)]
pub struct SearchQuery {
    pub text: String,
}

/// News and web search share this trait; the wiki store has its own
/// (see [`WikiEvidenceStore`]) because its query shape (title vs
/// fulltext mode) differs.
#[async_trait]
pub trait SearchProvider: Send + Sync {
    /// Human-readable provider name, used in trust-prior lookups and logs.
    fn name(&self) -> &'static str;

    /// Run one query. Must never raise for transient/rate-limit failures;
    /// those are handled by the retry wrapper in the caller and, on
    /// exhaustion, resolved to an empty `Vec`.
    async fn search(&self, query: &SearchQuery) -> Result<Vec<EvidenceCandidate>, ProviderError>;
}

/// Errors a provider can surface to the retry wrapper. Distinguishing
/// these lets `with_retry` decide whether another attempt is worthwhile.
#[derive(Debug, Clone, thiserror::Error)]
pub enum ProviderError {
    #[error("rate limited{}", retry_after.map(|d| format!(", retry after {d:?}")).unwrap_or_default())]
    RateLimited { retry_after: Option<std::time::Duration> },
    #[error("timed out")]
    Timeout,
    #[error("server error: {0}")]
    ServerError(String),
    #[error("client error (non-retryable): {0}")]
    ClientError(String),
}

impl ProviderError {
    pub fn is_retryable(&self) -> bool {
        matches!(self, ProviderError::RateLimited { .. } | ProviderError::Timeout | ProviderError::ServerError(_))
    }
}

/// Trust-prior allowlist: press domains outrank blogs, which outrank the
/// unknown-domain default.
pub fn trust_prior_for_domain(domain: &str) -> f64 {
    const PRESS_DOMAINS: &[&str] = &["reuters.com", "apnews.com", "bbc.com", "yonhapnews.co.kr", "hani.co.kr"];
    const BLOG_DOMAINS: &[&str] = &["medium.com", "blogspot.com", "tistory.com"];

    if PRESS_DOMAINS.iter().any(|d| domain.ends_with(d)) {
        0.8
    } else if BLOG_DOMAINS.iter().any(|d| domain.ends_with(d)) {
        0.3
    } else {
        0.5
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn press_domain_outranks_unknown() {
        assert!(trust_prior_for_domain("news.reuters.com") > trust_prior_for_domain("example.com"));
    }

    #[test]
    fn blog_domain_ranks_below_unknown() {
        assert!(trust_prior_for_domain("someone.tistory.com") < trust_prior_for_domain("example.com"));
    }

    #[test]
    fn server_error_is_retryable_client_error_is_not() {
        assert!(ProviderError::ServerError("500".into()).is_retryable());
        assert!(!ProviderError::ClientError("400".into()).is_retryable());
    }
}
