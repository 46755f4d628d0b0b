//! Example: wiring a real `StageContext` and running one claim through
//! the full nine-stage pipeline against a local Ollama instance.
//!
//! Run with: `cargo run --example verify_claim`
//!
//! Requires `STAGE12_MODEL_URL`/`STAGE12_MODEL_NAME`,
//! `STAGE67_MODEL_URL`/`STAGE67_MODEL_NAME`, `JUDGE_MODEL_URL`/
//! `JUDGE_MODEL_NAME` in the environment (see `VerdictConfig::from_env`).
//! News search additionally needs `NEWS_API_KEY`; without the `postgres`
//! feature the wiki store below falls back to an empty in-memory stub.

use std::sync::Arc;

use async_trait::async_trait;

use verdict_pipeline::analysis_store::InMemoryAnalysisStore;
use verdict_pipeline::artifact::ArtifactLogger;
use verdict_pipeline::checkpoint::InMemoryCheckpointStore;
use verdict_pipeline::config::VerdictConfig;
use verdict_pipeline::exec_ctx::ExecCtx;
use verdict_pipeline::search::{
    news::NewsClient, web::WebClient, ProviderError, SearchProvider, SearchQuery, WikiEvidenceStore,
    WikiQueryKind,
};
use verdict_pipeline::service::{PipelineRequest, PipelineService};
use verdict_pipeline::stages::StageContext;
use verdict_pipeline::state::{EvidenceCandidate, InputType, NormalizeMode};

/// Stands in for a real wiki corpus when the `postgres` feature is off.
/// Always returns no candidates; `Score`/`TopK` degrade gracefully and
/// the pipeline still resolves (likely to `UNVERIFIED` without other
/// evidence sources).
struct EmptyWikiStore;

#[async_trait]
impl WikiEvidenceStore for EmptyWikiStore {
    async fn query(&self, _kind: &WikiQueryKind, _limit: usize) -> Vec<EvidenceCandidate> {
        Vec::new()
    }
}

/// `reqwest::blocking`-free keyless web lookup stub. A real deployment
/// would point this at a library like `duckduckgo-rs` or a scraping
/// client; wired here as a no-op so the demo runs without extra setup.
fn no_op_web_lookup(_query: &str) -> Result<Vec<(String, String, String)>, String> {
    Ok(Vec::new())
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    tracing_subscriber::fmt::init();

    let config = Arc::new(VerdictConfig::from_env()?);

    let stage1_2_ctx = ExecCtx::builder(&config.slm_stage1_2.base_url)
        .var("model", &config.slm_stage1_2.model)
        .build();
    let stage6_7_ctx = ExecCtx::builder(&config.slm_stage6_7.base_url)
        .var("model", &config.slm_stage6_7.model)
        .build();
    let judge_ctx = ExecCtx::builder(&config.judge.base_url)
        .var("model", &config.judge.model)
        .build();

    let news: Arc<dyn SearchProvider> = match std::env::var("NEWS_API_KEY") {
        Ok(key) => Arc::new(NewsClient::new(key, "https://newsapi.org/v2", config.news_concurrency)),
        Err(_) => Arc::new(NoNewsProvider),
    };
    let web: Arc<dyn SearchProvider> = Arc::new(WebClient::new(Arc::new(no_op_web_lookup)));
    let wiki: Arc<dyn WikiEvidenceStore> = Arc::new(EmptyWikiStore);

    let stage_ctx = StageContext {
        config: config.clone(),
        stage1_2_ctx,
        stage6_7_ctx,
        judge_ctx,
        news,
        web,
        wiki,
        artifacts: Arc::new(ArtifactLogger::new("./artifacts")),
    };

    let service = PipelineService::new(
        stage_ctx,
        Arc::new(InMemoryCheckpointStore::new()),
        Arc::new(InMemoryAnalysisStore::new()),
    );

    let response = service
        .run(PipelineRequest {
            input_type: InputType::Text,
            input_payload: "The Great Wall of China is visible from space with the naked eye."
                .to_string(),
            user_request: None,
            language: "ko".to_string(),
            include_full_outputs: false,
            start_stage: None,
            end_stage: None,
            normalize_mode: NormalizeMode::Llm,
            checkpoint_thread_id: None,
            checkpoint_resume: false,
        })
        .await?;

    println!("label: {:?}", response.label);
    println!("confidence: {:.2}", response.confidence);
    println!("summary: {}", response.summary);
    println!("risk_flags: {:?}", response.risk_flags);

    Ok(())
}

/// Absent a news key, news search contributes nothing rather than
/// blocking the run on a missing credential.
struct NoNewsProvider;

#[async_trait]
impl SearchProvider for NoNewsProvider {
    fn name(&self) -> &'static str {
        "news"
    }

    async fn search(&self, _query: &SearchQuery) -> Result<Vec<EvidenceCandidate>, ProviderError> {
        Ok(Vec::new())
    }
}
