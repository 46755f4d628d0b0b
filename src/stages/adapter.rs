//! Fan-out adapter. Pure transform: flattens `querygen_claims[].query_pack`
//! into the flat `search_queries` list consumed by `stage03_wiki` and
//! `stage03_web`. Stable ordering: wiki first (claim order preserved),
//! then news.

use serde_json::json;

use crate::state::{PipelineState, QueryType, QueryVariant};
use crate::stages::StageResult;

pub async fn run(_ctx: &crate::stages::StageContext, state: &mut PipelineState) -> StageResult {
    let mut search_queries = Vec::new();

    for claim in &state.querygen_claims {
        for wiki in &claim.query_pack.wiki_db {
            search_queries.push(QueryVariant {
                text: wiki.q.clone(),
                kind: QueryType::Wiki,
                wiki_mode: Some(wiki.mode),
            });
        }
    }
    for claim in &state.querygen_claims {
        for news in &claim.query_pack.news_search {
            search_queries.push(QueryVariant {
                text: news.clone(),
                kind: QueryType::News,
                wiki_mode: None,
            });
        }
    }

    state.search_queries = search_queries;
    state.record_output("adapter", json!({ "search_query_count": state.search_queries.len() }), None);
    Ok(())
}
