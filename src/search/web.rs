//! Keyless, library-backed web-search fallback.
//!
//! No API key required. The underlying call is treated as potentially
//! blocking, so it is wrapped in a time-bounded await rather than issued
//! directly on the event loop.

use std::time::Duration;

use async_trait::async_trait;

use crate::search::{ProviderError, SearchProvider, SearchQuery};
use crate::state::{EvidenceCandidate, SourceType};

/// A keyless search backend, e.g. a locally embedded search library or a
/// free-tier HTTP endpoint. The concrete lookup is injected so tests and
/// alternate deployments can swap it out.
pub type WebLookupFn =
    std::sync::Arc<dyn Fn(&str) -> Result<Vec<(String, String, String)>, String> + Send + Sync>;

pub struct WebClient {
    lookup: WebLookupFn,
    timeout: Duration,
}

impl WebClient {
    pub fn new(lookup: WebLookupFn) -> Self {
        Self {
            lookup,
            timeout: Duration::from_secs(10),
        }
    }
}

#[async_trait]
impl SearchProvider for WebClient {
    fn name(&self) -> &'static str {
        "web"
    }

    async fn search(&self, query: &SearchQuery) -> Result<Vec<EvidenceCandidate>, ProviderError> {
        let lookup = self.lookup.clone();
        let text = query.text.clone();

        let result = tokio::time::timeout(
            self.timeout,
            tokio::task::spawn_blocking(move || lookup(&text)),
        )
        .await
        .map_err(|_| ProviderError::Timeout)?
        .map_err(|e| ProviderError::ServerError(e.to_string()))?;

        match result {
            Ok(hits) => Ok(hits
                .into_iter()
                .map(|(url, title, snippet)| {
                    let domain = url.split('/').nth(2).unwrap_or("").to_string();
                    EvidenceCandidate {
                        id: format!("web:{url}"),
                        source_type: SourceType::WebUrl,
                        title,
                        url: Some(url),
                        snippet,
                        published_at: None,
                        trust_prior: super::trust_prior_for_domain(&domain),
                    }
                })
                .collect()),
            Err(e) => Err(ProviderError::ServerError(e)),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn lookup_results_become_candidates() {
        let lookup: WebLookupFn = std::sync::Arc::new(|q: &str| {
            Ok(vec![(format!("https://example.com/{q}"), "Title".to_string(), "Snippet".to_string())])
        });
        let client = WebClient::new(lookup);
        let out = client.search(&SearchQuery { text: "x".to_string() }).await.unwrap();
        assert_eq!(out.len(), 1);
        assert_eq!(out[0].source_type, SourceType::WebUrl);
    }

    #[tokio::test]
    async fn lookup_failure_becomes_server_error() {
        let lookup: WebLookupFn = std::sync::Arc::new(|_q: &str| Err("boom".to_string()));
        let client = WebClient::new(lookup);
        let err = client.search(&SearchQuery { text: "x".to_string() }).await.unwrap_err();
        assert!(matches!(err, ProviderError::ServerError(_)));
    }
}
