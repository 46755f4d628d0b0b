//! Typed, environment-derived configuration for the verdict pipeline.
//!
//! Loaded once at process startup via [`VerdictConfig::from_env`]. Missing
//! required values fail fast rather than surfacing as a confusing error
//! deep inside a stage.

use std::time::Duration;

use crate::error::VerdictError;

/// Which backend the checkpoint manager persists thread identity to.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CheckpointBackend {
    Postgres,
    Memory,
    None,
}

impl CheckpointBackend {
    fn parse(raw: &str) -> Result<Self, VerdictError> {
        match raw {
            "postgres" => Ok(Self::Postgres),
            "memory" => Ok(Self::Memory),
            "none" => Ok(Self::None),
            other => Err(VerdictError::Config(format!(
                "CHECKPOINT_BACKEND must be one of postgres|memory|none, got '{other}'"
            ))),
        }
    }
}

/// Endpoint + model + API key for one LLM role in the pipeline.
#[derive(Debug, Clone)]
pub struct RoleEndpoint {
    pub base_url: String,
    pub model: String,
    pub api_key: Option<String>,
    pub max_tokens: u32,
}

impl RoleEndpoint {
    /// An external (non-localhost) host requires a non-empty key.
    pub fn is_external(&self) -> bool {
        !(self.base_url.contains("localhost")
            || self.base_url.contains("127.0.0.1")
            || self.base_url.contains(":11434"))
    }

    pub fn requires_key_but_missing(&self) -> bool {
        self.is_external() && self.api_key.as_deref().unwrap_or("").is_empty()
    }
}

/// Shared timeout/retry/backoff policy for an external API client.
#[derive(Debug, Clone, Copy)]
pub struct ExternalApiPolicy {
    pub timeout: Duration,
    pub max_attempts: u32,
    pub base_backoff: Duration,
    pub max_backoff: Duration,
}

impl Default for ExternalApiPolicy {
    fn default() -> Self {
        Self {
            timeout: Duration::from_secs(10),
            max_attempts: 3,
            base_backoff: Duration::from_millis(500),
            max_backoff: Duration::from_secs(4),
        }
    }
}

/// The full typed configuration bundle for one process.
#[derive(Debug, Clone)]
pub struct VerdictConfig {
    /// Stage 1 (Normalize) and Stage 2 (QueryGen) share a small fast model.
    pub slm_stage1_2: RoleEndpoint,
    /// Stage 6/7 (VerifySupport / VerifySkeptic) share a small fast model.
    pub slm_stage6_7: RoleEndpoint,
    /// Stage 9 (Judge) uses a stronger model, often an external provider.
    pub judge: RoleEndpoint,

    pub external_api_policy: ExternalApiPolicy,
    pub news_concurrency: usize,
    pub web_concurrency: usize,
    pub wiki_concurrency: usize,

    pub strict_pipeline: bool,

    pub checkpoint_backend: CheckpointBackend,
    pub checkpoint_ttl: Duration,
    pub checkpoint_table: String,
    pub checkpoint_database_url: Option<String>,

    pub wiki_embeddings_ready: bool,

    pub heartbeat_interval: Duration,
    pub score_pass_threshold: f64,
    pub topk_per_side: usize,
    pub citation_quote_max_chars: usize,
    pub max_claim_chars: usize,
}

impl VerdictConfig {
    /// Load and validate configuration from the process environment.
    ///
    /// Required: `STAGE12_MODEL_URL`, `STAGE12_MODEL_NAME`,
    /// `STAGE67_MODEL_URL`, `STAGE67_MODEL_NAME`, `JUDGE_MODEL_URL`,
    /// `JUDGE_MODEL_NAME`. The judge API key accepts any of
    /// `JUDGE_API_KEY`, `OPENAI_API_KEY`, `PPLX_API_KEY`,
    /// `PERPLEXITY_API_KEY` (first one present wins).
    pub fn from_env() -> Result<Self, VerdictError> {
        let env = EnvReader;
        Self::from_reader(&env)
    }

    fn from_reader(env: &dyn EnvSource) -> Result<Self, VerdictError> {
        let slm_stage1_2 = RoleEndpoint {
            base_url: env.require("STAGE12_MODEL_URL")?,
            model: env.require("STAGE12_MODEL_NAME")?,
            api_key: env.optional("STAGE12_API_KEY"),
            max_tokens: env.optional_u32("STAGE12_MAX_TOKENS", 1024),
        };
        let slm_stage6_7 = RoleEndpoint {
            base_url: env.require("STAGE67_MODEL_URL")?,
            model: env.require("STAGE67_MODEL_NAME")?,
            api_key: env.optional("STAGE67_API_KEY"),
            max_tokens: env.optional_u32("STAGE67_MAX_TOKENS", 1536),
        };
        let judge_api_key = env
            .optional("JUDGE_API_KEY")
            .or_else(|| env.optional("OPENAI_API_KEY"))
            .or_else(|| env.optional("PPLX_API_KEY"))
            .or_else(|| env.optional("PERPLEXITY_API_KEY"));
        let judge = RoleEndpoint {
            base_url: env.require("JUDGE_MODEL_URL")?,
            model: env.require("JUDGE_MODEL_NAME")?,
            api_key: judge_api_key,
            max_tokens: env.optional_u32("JUDGE_MAX_TOKENS", 2048),
        };

        if judge.requires_key_but_missing() {
            return Err(VerdictError::JudgeKeyMissingForExternalProvider {
                provider: judge.base_url.clone(),
            });
        }

        let checkpoint_backend =
            CheckpointBackend::parse(&env.optional("CHECKPOINT_BACKEND").unwrap_or_else(|| "memory".to_string()))?;

        Ok(Self {
            slm_stage1_2,
            slm_stage6_7,
            judge,
            external_api_policy: ExternalApiPolicy {
                timeout: Duration::from_secs(env.optional_u32("EXTERNAL_API_TIMEOUT_SECS", 10) as u64),
                max_attempts: env.optional_u32("EXTERNAL_API_MAX_ATTEMPTS", 3),
                base_backoff: Duration::from_millis(env.optional_u32("EXTERNAL_API_BASE_BACKOFF_MS", 500) as u64),
                max_backoff: Duration::from_millis(env.optional_u32("EXTERNAL_API_MAX_BACKOFF_MS", 4000) as u64),
            },
            news_concurrency: env.optional_u32("NEWS_CONCURRENCY", 4) as usize,
            web_concurrency: env.optional_u32("WEB_CONCURRENCY", 4) as usize,
            wiki_concurrency: env.optional_u32("WIKI_CONCURRENCY", 8) as usize,
            strict_pipeline: env.optional_bool("STRICT_PIPELINE", false),
            checkpoint_backend,
            checkpoint_ttl: Duration::from_secs(env.optional_u32("CHECKPOINT_TTL_SECS", 3600) as u64),
            checkpoint_table: env.optional("CHECKPOINT_TABLE").unwrap_or_else(|| "checkpoint_threads".to_string()),
            checkpoint_database_url: env.optional("DATABASE_URL"),
            wiki_embeddings_ready: env.optional_bool("WIKI_EMBEDDINGS_READY", false),
            heartbeat_interval: Duration::from_secs(env.optional_u32("HEARTBEAT_INTERVAL_SECS", 8) as u64),
            score_pass_threshold: env.optional_f64("SCORE_PASS_THRESHOLD", 0.5),
            topk_per_side: env.optional_u32("TOPK_PER_SIDE", 4) as usize,
            citation_quote_max_chars: 500,
            max_claim_chars: env.optional_u32("MAX_CLAIM_CHARS", 10_000) as usize,
        })
    }
}

/// Indirection over `std::env` so config loading is testable without
/// mutating process-wide environment state.
trait EnvSource {
    fn get(&self, key: &str) -> Option<String>;

    fn require(&self, key: &str) -> Result<String, VerdictError> {
        self.get(key)
            .filter(|v| !v.is_empty())
            .ok_or_else(|| VerdictError::Config(format!("missing required environment variable {key}")))
    }

    fn optional(&self, key: &str) -> Option<String> {
        self.get(key).filter(|v| !v.is_empty())
    }

    fn optional_u32(&self, key: &str, default: u32) -> u32 {
        self.optional(key).and_then(|v| v.parse().ok()).unwrap_or(default)
    }

    fn optional_f64(&self, key: &str, default: f64) -> f64 {
        self.optional(key).and_then(|v| v.parse().ok()).unwrap_or(default)
    }

    fn optional_bool(&self, key: &str, default: bool) -> bool {
        self.optional(key)
            .map(|v| matches!(v.as_str(), "1" | "true" | "TRUE" | "yes"))
            .unwrap_or(default)
    }
}

struct EnvReader;

impl EnvSource for EnvReader {
    fn get(&self, key: &str) -> Option<String> {
        std::env::var(key).ok()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    struct FakeEnv(HashMap<&'static str, &'static str>);

    impl EnvSource for FakeEnv {
        fn get(&self, key: &str) -> Option<String> {
            self.0.get(key).map(|v| v.to_string())
        }
    }

    fn base_env() -> HashMap<&'static str, &'static str> {
        let mut m = HashMap::new();
        m.insert("STAGE12_MODEL_URL", "http://localhost:11434");
        m.insert("STAGE12_MODEL_NAME", "llama3");
        m.insert("STAGE67_MODEL_URL", "http://localhost:11434");
        m.insert("STAGE67_MODEL_NAME", "llama3");
        m.insert("JUDGE_MODEL_URL", "http://localhost:11434");
        m.insert("JUDGE_MODEL_NAME", "llama3");
        m
    }

    #[test]
    fn loads_minimal_local_config() {
        let env = FakeEnv(base_env());
        let config = VerdictConfig::from_reader(&env).unwrap();
        assert_eq!(config.judge.model, "llama3");
        assert_eq!(config.checkpoint_backend, CheckpointBackend::Memory);
        assert!(!config.judge.is_external());
    }

    #[test]
    fn missing_required_field_fails_fast() {
        let mut m = base_env();
        m.remove("JUDGE_MODEL_URL");
        let env = FakeEnv(m);
        let err = VerdictConfig::from_reader(&env).unwrap_err();
        assert!(matches!(err, VerdictError::Config(_)));
    }

    #[test]
    fn external_judge_without_key_is_fatal() {
        let mut m = base_env();
        m.insert("JUDGE_MODEL_URL", "https://api.openai.com/v1");
        let env = FakeEnv(m);
        let err = VerdictConfig::from_reader(&env).unwrap_err();
        assert!(matches!(err, VerdictError::JudgeKeyMissingForExternalProvider { .. }));
    }

    #[test]
    fn external_judge_with_key_succeeds() {
        let mut m = base_env();
        m.insert("JUDGE_MODEL_URL", "https://api.openai.com/v1");
        m.insert("OPENAI_API_KEY", "sk-test-key");
        let env = FakeEnv(m);
        let config = VerdictConfig::from_reader(&env).unwrap();
        assert_eq!(config.judge.api_key.as_deref(), Some("sk-test-key"));
    }

    #[test]
    fn invalid_checkpoint_backend_rejected() {
        let mut m = base_env();
        m.insert("CHECKPOINT_BACKEND", "sqlite");
        let env = FakeEnv(m);
        assert!(VerdictConfig::from_reader(&env).is_err());
    }
}
