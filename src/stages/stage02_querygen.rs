//! Stage 2 — QueryGen. Splits the claim into up to three sub-claims, each
//! carrying a `query_pack` of wiki and news/web queries.

use serde::Deserialize;
use serde_json::json;

use crate::output_strategy::OutputStrategy;
use crate::payload::Payload;
use crate::retry::RetryConfig;
use crate::risk_flags::RiskFlag;
use crate::state::{
    PipelineState, QueryPack, QueryType, QueryVariant, QuerygenClaim, TimeSensitivity, WikiQuery, WikiQueryMode,
};
use crate::stages::{StageContext, StageRecoverable, StageResult};
use crate::LlmCall;

const WIKI_DB_LEN: usize = 3;
const NEWS_SEARCH_LEN: usize = 4;

#[derive(Debug, Deserialize)]
struct QuerygenExtraction {
    claims: Vec<QuerygenClaimWire>,
}

#[derive(Debug, Deserialize)]
struct QuerygenClaimWire {
    claim_id: String,
    claim_type: String,
    time_sensitivity: TimeSensitivity,
    query_pack: QueryPackWire,
}

#[derive(Debug, Deserialize)]
struct QueryPackWire {
    wiki_db: Vec<WikiQueryWire>,
    news_search: Vec<String>,
}

#[derive(Debug, Deserialize)]
struct WikiQueryWire {
    mode: WikiQueryMode,
    q: String,
}

/// Validates the strict schema: up to 3 claims, each with exactly
/// `WIKI_DB_LEN` wiki queries and `NEWS_SEARCH_LEN` non-empty news queries.
fn validate(extraction: &QuerygenExtraction) -> Result<(), String> {
    if extraction.claims.is_empty() || extraction.claims.len() > 3 {
        return Err(format!("expected 1-3 claims, got {}", extraction.claims.len()));
    }
    for claim in &extraction.claims {
        if !["C1", "C2", "C3"].contains(&claim.claim_id.as_str()) {
            return Err(format!("invalid claim_id: {}", claim.claim_id));
        }
        if claim.query_pack.wiki_db.len() != WIKI_DB_LEN {
            return Err(format!(
                "wiki_db must have exactly {WIKI_DB_LEN} entries, got {}",
                claim.query_pack.wiki_db.len()
            ));
        }
        if claim.query_pack.news_search.len() != NEWS_SEARCH_LEN {
            return Err(format!(
                "news_search must have exactly {NEWS_SEARCH_LEN} entries, got {}",
                claim.query_pack.news_search.len()
            ));
        }
        if claim.query_pack.news_search.iter().any(|q| q.trim().is_empty()) {
            return Err("news_search entries must be non-empty".to_string());
        }
    }
    Ok(())
}

pub async fn run(ctx: &StageContext, state: &mut PipelineState) -> StageResult {
    let claim_text = state.claim_text.clone().unwrap_or_default();

    let result = match run_llm_querygen(ctx, &claim_text).await {
        Ok(extraction) => {
            populate(state, extraction);
            Ok(())
        }
        Err(first_error) => match run_repair(ctx, &claim_text, &first_error).await {
            Ok(extraction) => {
                populate(state, extraction);
                Ok(())
            }
            Err(repair_error) => {
                apply_degraded_fallback(state, &claim_text);
                Err(StageRecoverable::new(
                    RiskFlag::QuerygenDegraded,
                    format!("QUERYGEN_DEGRADED: {first_error}; repair failed: {repair_error}"),
                ))
            }
        },
    };

    state.record_output(
        "stage02_querygen",
        json!({ "claim_count": state.querygen_claims.len(), "query_variant_count": state.query_variants.len() }),
        None,
    );
    result
}

async fn run_llm_querygen(ctx: &StageContext, claim_text: &str) -> Result<QuerygenExtraction, String> {
    let call = LlmCall::new(
        "stage02_querygen",
        "Split the claim into up to three sub-claims. For each, emit claim_id \
         (C1/C2/C3), claim_type, time_sensitivity (low/mid/high), and a query_pack \
         with exactly 3 wiki_db entries ({{mode: title|fulltext, q}}) and exactly 4 \
         non-empty news_search strings.\nClaim: {input}",
    )
    .with_model(ctx.config.slm_stage1_2.model.clone())
    .with_output_strategy(OutputStrategy::Json)
    .with_retry(RetryConfig::new(1));

    let output = call
        .invoke(&ctx.stage1_2_ctx, json!(claim_text))
        .await
        .map_err(|e| e.to_string())?;

    let extraction: QuerygenExtraction = output.parse_as().map_err(|e| e.to_string())?;
    validate(&extraction).map(|_| extraction)
}

async fn run_repair(ctx: &StageContext, claim_text: &str, prior_error: &str) -> Result<QuerygenExtraction, String> {
    let template = format!(
        "Your previous output for this claim did not satisfy the schema \
         (claims[1..3], each with exactly 3 wiki_db entries and exactly 4 \
         non-empty news_search strings). Error: {prior_error}. Re-emit valid \
         JSON only.\nClaim: {{input}}"
    );
    let call = LlmCall::new("stage02_querygen_repair", template)
        .with_model(ctx.config.slm_stage1_2.model.clone())
        .with_output_strategy(OutputStrategy::Json)
        .with_retry(RetryConfig::new(0));

    let output = call
        .invoke(&ctx.stage1_2_ctx, json!(claim_text))
        .await
        .map_err(|e| e.to_string())?;

    let extraction: QuerygenExtraction = output.parse_as().map_err(|e| e.to_string())?;
    validate(&extraction).map(|_| extraction)
}

fn populate(state: &mut PipelineState, extraction: QuerygenExtraction) {
    let mut query_variants = Vec::new();
    let mut querygen_claims = Vec::new();

    for claim in extraction.claims {
        let wiki_db: Vec<WikiQuery> = claim
            .query_pack
            .wiki_db
            .into_iter()
            .map(|w| WikiQuery { mode: w.mode, q: w.q })
            .collect();
        let news_search = claim.query_pack.news_search;

        for wiki in &wiki_db {
            query_variants.push(QueryVariant {
                text: wiki.q.clone(),
                kind: QueryType::Wiki,
                wiki_mode: Some(wiki.mode),
            });
        }
        for news in &news_search {
            query_variants.push(QueryVariant {
                text: news.clone(),
                kind: QueryType::News,
                wiki_mode: None,
            });
        }

        querygen_claims.push(QuerygenClaim {
            claim_id: claim.claim_id,
            claim_type: claim.claim_type,
            time_sensitivity: claim.time_sensitivity,
            query_pack: QueryPack { wiki_db, news_search },
        });
    }

    state.query_variants = query_variants;
    state.querygen_claims = querygen_claims;
}

/// Best-effort variants built directly from the claim text when both the
/// primary call and the repair retry fail the schema.
fn apply_degraded_fallback(state: &mut PipelineState, claim_text: &str) {
    let wiki_db = vec![WikiQuery {
        mode: WikiQueryMode::Fulltext,
        q: claim_text.to_string(),
    }];
    let news_search = vec![claim_text.to_string()];

    state.query_variants = vec![
        QueryVariant {
            text: claim_text.to_string(),
            kind: QueryType::Wiki,
            wiki_mode: Some(WikiQueryMode::Fulltext),
        },
        QueryVariant {
            text: claim_text.to_string(),
            kind: QueryType::News,
            wiki_mode: None,
        },
    ];
    state.querygen_claims = vec![QuerygenClaim {
        claim_id: "C1".to_string(),
        claim_type: "사건".to_string(),
        time_sensitivity: TimeSensitivity::Mid,
        query_pack: QueryPack { wiki_db, news_search },
    }];
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn validate_rejects_wrong_wiki_db_len() {
        let extraction = QuerygenExtraction {
            claims: vec![QuerygenClaimWire {
                claim_id: "C1".to_string(),
                claim_type: "사건".to_string(),
                time_sensitivity: TimeSensitivity::Low,
                query_pack: QueryPackWire {
                    wiki_db: vec![WikiQueryWire {
                        mode: WikiQueryMode::Title,
                        q: "q".to_string(),
                    }],
                    news_search: vec!["a".to_string(), "b".to_string(), "c".to_string(), "d".to_string()],
                },
            }],
        };
        assert!(validate(&extraction).is_err());
    }

    #[test]
    fn validate_rejects_empty_news_search_entry() {
        let extraction = QuerygenExtraction {
            claims: vec![QuerygenClaimWire {
                claim_id: "C1".to_string(),
                claim_type: "사건".to_string(),
                time_sensitivity: TimeSensitivity::Low,
                query_pack: QueryPackWire {
                    wiki_db: vec![
                        WikiQueryWire { mode: WikiQueryMode::Title, q: "a".to_string() },
                        WikiQueryWire { mode: WikiQueryMode::Title, q: "b".to_string() },
                        WikiQueryWire { mode: WikiQueryMode::Fulltext, q: "c".to_string() },
                    ],
                    news_search: vec!["x".to_string(), "".to_string(), "y".to_string(), "z".to_string()],
                },
            }],
        };
        assert!(validate(&extraction).is_err());
    }

    #[test]
    fn degraded_fallback_produces_one_claim_with_usable_queries() {
        let mut state = crate::state::test_support::blank_state();
        apply_degraded_fallback(&mut state, "the claim");
        assert_eq!(state.querygen_claims.len(), 1);
        assert_eq!(state.querygen_claims[0].claim_id, "C1");
        assert_eq!(state.query_variants.len(), 2);
    }
}
