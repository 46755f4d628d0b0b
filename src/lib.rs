//! # verdict-pipeline
//!
//! An evidence-verification pipeline orchestrator: takes a claim (or a
//! pre-fetched URL's text) and produces a structured verdict — `TRUE`,
//! `FALSE`, `MIXED`, `UNVERIFIED`, or `REFUSED` — backed by citations drawn
//! from Wikipedia, news, and web search.
//!
//! The pipeline is a fixed nine-stage DAG (see [`orchestrator`]) run over a
//! single additive [`state::PipelineState`] record: normalize the claim,
//! generate search queries, collect evidence from three sources, score and
//! partition it into supporting/skeptical pools, verify each pool with an
//! LLM, aggregate the two verdict packs deterministically, and hand the
//! result to a final LLM judge.
//!
//! ## Entry points
//!
//! [`service::PipelineService`] exposes the two ways to run the graph:
//! `run` for a single awaited response, `run_stream` for a progress-event
//! stream that still ends in exactly one `complete` or `error` event. Both
//! share [`service::build_initial_state`] so the two paths never drift.
//!
//! ```no_run
//! use std::sync::Arc;
//! use verdict_pipeline::config::VerdictConfig;
//! use verdict_pipeline::service::{PipelineRequest, PipelineService};
//! use verdict_pipeline::state::InputType;
//!
//! # async fn run() -> Result<(), Box<dyn std::error::Error>> {
//! let config = VerdictConfig::from_env()?;
//! // Wiring a StageContext (LLM roles, search providers, artifact logger)
//! // is demonstrated in `demos/verify_claim.rs`.
//! # let stage_ctx: verdict_pipeline::stages::StageContext = todo!();
//! let service = PipelineService::new(
//!     stage_ctx,
//!     Arc::new(verdict_pipeline::checkpoint::InMemoryCheckpointStore::new()),
//!     Arc::new(verdict_pipeline::analysis_store::InMemoryAnalysisStore::new()),
//! );
//!
//! let response = service.run(PipelineRequest {
//!     input_type: InputType::Text,
//!     input_payload: "The Great Wall of China is visible from space.".to_string(),
//!     user_request: None,
//!     language: "ko".to_string(),
//!     include_full_outputs: false,
//!     start_stage: None,
//!     end_stage: None,
//!     normalize_mode: verdict_pipeline::state::NormalizeMode::Llm,
//!     checkpoint_thread_id: None,
//!     checkpoint_resume: false,
//! }).await?;
//! println!("{:?} ({:.2})", response.label, response.confidence);
//! # Ok(()) }
//! ```
//!
//! ## Ambient modules (carried over, generalized)
//!
//! The LLM-call primitives underneath every stage — [`backend`], [`payload`],
//! [`exec_ctx`], [`llm_call`], [`retry`], [`output_strategy`],
//! [`output_parser`], [`streaming`] — are unchanged in shape from the
//! general-purpose payload layer this crate grew from; stages built on top
//! of them are what's new.

// --- Payload layer (LLM call primitives used by every stage) ---
pub mod backend;
pub mod chain;
pub mod diagnostics;
pub mod events;
pub mod exec_ctx;
pub mod llm_call;
pub mod output_parser;
pub mod output_strategy;
pub mod parsing;
pub mod payload;
pub mod retry;
pub mod streaming;
pub mod client;

// --- Verdict pipeline ---
pub mod analysis_store;
pub mod artifact;
pub mod async_bridge;
pub mod checkpoint;
pub mod config;
pub mod error;
pub mod orchestrator;
pub mod risk_flags;
pub mod search;
pub mod service;
pub mod state;
pub mod stages;

// --- Primary exports: payload layer ---
pub use backend::{BackoffConfig, MockBackend, OllamaBackend};
#[cfg(feature = "openai")]
pub use backend::OpenAiBackend;
pub use chain::Chain;
pub use diagnostics::ParseDiagnostics;
pub use exec_ctx::{ExecCtx, ExecCtxBuilder};
pub use llm_call::LlmCall;
pub use output_strategy::OutputStrategy;
pub use payload::{BoxFut, Payload, PayloadOutput};
pub use retry::RetryConfig;
pub use streaming::StreamingDecoder;

// --- Primary exports: verdict pipeline ---
pub use config::VerdictConfig;
pub use error::{PipelineError, Result, VerdictError, VerdictResult};
pub use orchestrator::GraphOrchestrator;
pub use service::{PipelineRequest, PipelineResponse, PipelineService, StreamEvent};
pub use state::PipelineState;

pub use client::LlmConfig;
