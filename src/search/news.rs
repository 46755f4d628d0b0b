//! Keyed commercial news-search provider.
//!
//! Mandatory per-attempt timeout, retry on 429/5xx with exponential
//! backoff + jitter, and a process-wide concurrency semaphore — built on
//! the same [`BackoffConfig`](crate::backend::BackoffConfig) machinery the
//! LLM backends use.

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use reqwest::StatusCode;
use tokio::sync::Semaphore;

use crate::backend::BackoffConfig;
use crate::search::{ProviderError, SearchProvider, SearchQuery};
use crate::state::{EvidenceCandidate, SourceType};

/// Commercial news-search client. Requires an API key; the keyless
/// fallback lives in [`crate::search::web`].
pub struct NewsClient {
    http: reqwest::Client,
    api_key: String,
    base_url: String,
    semaphore: Arc<Semaphore>,
    backoff: BackoffConfig,
    timeout: Duration,
    max_attempts: u32,
}

impl NewsClient {
    pub fn new(api_key: impl Into<String>, base_url: impl Into<String>, concurrency: usize) -> Self {
        Self {
            http: reqwest::Client::new(),
            api_key: api_key.into(),
            base_url: base_url.into(),
            semaphore: Arc::new(Semaphore::new(concurrency.max(1))),
            backoff: BackoffConfig::standard(),
            timeout: Duration::from_secs(10),
            max_attempts: 3,
        }
    }

    async fn execute_once(&self, query: &SearchQuery) -> Result<Vec<EvidenceCandidate>, ProviderError> {
        let response = self
            .http
            .get(&self.base_url)
            .query(&[("q", query.text.as_str())])
            .bearer_auth(&self.api_key)
            .timeout(self.timeout)
            .send()
            .await
            .map_err(|e| {
                if e.is_timeout() {
                    ProviderError::Timeout
                } else {
                    ProviderError::ServerError(e.to_string())
                }
            })?;

        let status = response.status();
        if status == StatusCode::TOO_MANY_REQUESTS {
            let retry_after = response
                .headers()
                .get(reqwest::header::RETRY_AFTER)
                .and_then(|v| v.to_str().ok())
                .and_then(|v| v.parse::<u64>().ok())
                .map(Duration::from_secs);
            return Err(ProviderError::RateLimited { retry_after });
        }
        if status.is_server_error() {
            return Err(ProviderError::ServerError(status.to_string()));
        }
        if status.is_client_error() {
            return Err(ProviderError::ClientError(status.to_string()));
        }

        let body: serde_json::Value = response
            .json()
            .await
            .map_err(|e| ProviderError::ServerError(e.to_string()))?;

        Ok(parse_articles(&body))
    }
}

fn parse_articles(body: &serde_json::Value) -> Vec<EvidenceCandidate> {
    body.get("articles")
        .and_then(|a| a.as_array())
        .map(|articles| {
            articles
                .iter()
                .filter_map(|a| {
                    let url = a.get("url")?.as_str()?.to_string();
                    let title = a.get("title").and_then(|t| t.as_str()).unwrap_or("").to_string();
                    let snippet = a.get("description").and_then(|d| d.as_str()).unwrap_or("").to_string();
                    let published_at = a.get("publishedAt").and_then(|p| p.as_str()).map(String::from);
                    let domain = url.split('/').nth(2).unwrap_or("").to_string();
                    Some(EvidenceCandidate {
                        id: format!("news:{url}"),
                        source_type: SourceType::News,
                        title,
                        url: Some(url),
                        snippet,
                        published_at,
                        trust_prior: super::trust_prior_for_domain(&domain),
                    })
                })
                .collect()
        })
        .unwrap_or_default()
}

#[async_trait]
impl SearchProvider for NewsClient {
    fn name(&self) -> &'static str {
        "news"
    }

    async fn search(&self, query: &SearchQuery) -> Result<Vec<EvidenceCandidate>, ProviderError> {
        let _permit = self.semaphore.acquire().await.map_err(|_| ProviderError::Timeout)?;

        let mut last_err = ProviderError::Timeout;
        for attempt in 1..=self.max_attempts {
            match self.execute_once(query).await {
                Ok(candidates) => return Ok(candidates),
                Err(e) if e.is_retryable() && attempt < self.max_attempts => {
                    last_err = e;
                    tokio::time::sleep(self.backoff.delay_for_attempt(attempt)).await;
                }
                Err(e) => return Err(e),
            }
        }
        Err(last_err)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_articles_with_domain_trust_prior() {
        let body = serde_json::json!({
            "articles": [
                {"url": "https://www.reuters.com/a", "title": "T", "description": "D", "publishedAt": "2024-01-01"}
            ]
        });
        let candidates = parse_articles(&body);
        assert_eq!(candidates.len(), 1);
        assert_eq!(candidates[0].source_type, SourceType::News);
        assert!(candidates[0].trust_prior > 0.5);
    }

    #[test]
    fn missing_articles_key_yields_empty() {
        let body = serde_json::json!({});
        assert!(parse_articles(&body).is_empty());
    }

    #[test]
    fn article_without_url_is_skipped() {
        let body = serde_json::json!({"articles": [{"title": "no url"}]});
        assert!(parse_articles(&body).is_empty());
    }
}
