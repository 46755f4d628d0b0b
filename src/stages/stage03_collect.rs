//! Stage 3 — Collect. Runs wiki queries against the evidence store and
//! web/news queries against two providers, then deduplicates and filters
//! the merged candidate set.
//!
//! Split into three functions mirroring the fan-out/fan-in in the DAG:
//! [`run_wiki`] and [`run_web`] run concurrently via `tokio::join!` in the
//! orchestrator; [`run_merge`] is the fan-in.

use std::collections::HashSet;
use std::sync::Arc;

use futures::stream::{self, StreamExt};

use crate::risk_flags::RiskFlag;
use crate::search::{SearchQuery, WikiQueryKind};
use crate::state::{EvidenceCandidate, PipelineState, QueryType, SourceType, Stage03MergeStats, WikiQueryMode};
use crate::stages::{StageContext, StageRecoverable, StageResult};

/// Candidates kept per individual query, before merge-level dedup.
const PER_QUERY_CAP: usize = 5;

pub async fn run_wiki(ctx: &StageContext, state: &mut PipelineState) -> StageResult {
    let wiki_queries: Vec<(&str, WikiQueryMode)> = state
        .search_queries
        .iter()
        .filter(|q| q.kind == QueryType::Wiki)
        .map(|q| (q.text.as_str(), q.wiki_mode.unwrap_or(WikiQueryMode::Fulltext)))
        .collect();

    let wiki = Arc::clone(&ctx.wiki);
    let concurrency = ctx.config.wiki_concurrency.max(1);

    let results: Vec<Vec<EvidenceCandidate>> = stream::iter(wiki_queries.into_iter())
        .map(|(text, mode)| {
            let wiki = Arc::clone(&wiki);
            let normalized = crate::search::normalize_query(text);
            let kind = match mode {
                WikiQueryMode::Title => WikiQueryKind::Title(normalized),
                WikiQueryMode::Fulltext => WikiQueryKind::Fulltext(normalized),
            };
            async move { wiki.query(&kind, PER_QUERY_CAP).await }
        })
        .buffer_unordered(concurrency)
        .collect()
        .await;

    state.wiki_candidates = results
        .into_iter()
        .flatten()
        .map(|mut c| {
            c.trust_prior = 1.0;
            c
        })
        .collect();

    Ok(())
}

pub async fn run_web(ctx: &StageContext, state: &mut PipelineState) -> StageResult {
    let web_like_queries: Vec<&str> = state
        .search_queries
        .iter()
        .filter(|q| q.kind == QueryType::News || q.kind == QueryType::Web)
        .map(|q| q.text.as_str())
        .collect();

    let news = Arc::clone(&ctx.news);
    let web = Arc::clone(&ctx.web);
    let concurrency = ctx.config.news_concurrency.max(ctx.config.web_concurrency).max(1);

    let results: Vec<Vec<EvidenceCandidate>> = stream::iter(web_like_queries.into_iter())
        .map(|text| {
            let news = Arc::clone(&news);
            let web = Arc::clone(&web);
            let query = SearchQuery { text: text.to_string() };
            async move {
                let mut candidates = news.search(&query).await.unwrap_or_default();
                candidates.extend(web.search(&query).await.unwrap_or_default());
                candidates.truncate(PER_QUERY_CAP * 2);
                candidates
            }
        })
        .buffer_unordered(concurrency)
        .collect()
        .await;

    state.web_candidates = results.into_iter().flatten().collect();
    Ok(())
}

/// Normalizes a URL for dedup purposes: strips scheme, trailing slash,
/// and fragment/query.
fn normalize_url(url: &str) -> String {
    let without_scheme = url.split("://").nth(1).unwrap_or(url);
    let without_fragment = without_scheme.split('#').next().unwrap_or(without_scheme);
    let without_query = without_fragment.split('?').next().unwrap_or(without_fragment);
    without_query.trim_end_matches('/').to_lowercase()
}

fn is_low_quality(candidate: &EvidenceCandidate) -> bool {
    candidate.snippet.trim().is_empty() || candidate.title.trim().is_empty()
}

pub async fn run_merge(_ctx: &StageContext, state: &mut PipelineState) -> StageResult {
    let wiki_count = state.wiki_candidates.len();
    let news_count = state.web_candidates.iter().filter(|c| c.source_type == SourceType::News).count();
    let web_count = state.web_candidates.iter().filter(|c| c.source_type == SourceType::WebUrl).count();

    let mut seen: HashSet<(String, SourceType)> = HashSet::new();
    let mut filtered_count = 0usize;
    let mut merged = Vec::new();

    for candidate in state.wiki_candidates.iter().chain(state.web_candidates.iter()) {
        if is_low_quality(candidate) {
            filtered_count += 1;
            continue;
        }
        let key = (
            candidate.url.as_deref().map(normalize_url).unwrap_or_else(|| candidate.id.clone()),
            candidate.source_type,
        );
        if !seen.insert(key) {
            filtered_count += 1;
            continue;
        }
        merged.push(candidate.clone());
    }

    state.evidence_candidates = merged;
    state.stage03_merge_stats = Stage03MergeStats {
        wiki_count,
        news_count,
        web_count,
        filtered_count,
    };

    let summary = serde_json::json!({
        "evidence_candidates": state.evidence_candidates,
        "stats": state.stage03_merge_stats,
    });
    // Recorded under both keys: "stage03_collect" is the STAGE_IDS slot the
    // orchestrator and streaming path look summaries up by; "stage03_merge"
    // is the name callers reference when checking evidence candidate ids.
    state.record_output("stage03_collect", summary.clone(), None);
    state.record_output("stage03_merge", summary, None);

    if state.evidence_candidates.is_empty() {
        return Err(StageRecoverable::new(RiskFlag::CollectEmpty, "COLLECT_EMPTY: no evidence survived merge"));
    }
    Ok(())
}
