use std::time::Duration;
use thiserror::Error;

/// Errors produced by the pipeline and its components.
#[derive(Error, Debug)]
pub enum PipelineError {
    /// Low-level HTTP transport failure (connection refused, timeout, etc.).
    #[error("HTTP request failed: {0}")]
    Request(#[from] reqwest::Error),

    /// JSON parsing failed at the serde level.
    #[error("JSON parsing failed: {0}")]
    Json(#[from] serde_json::Error),

    /// A pipeline stage failed with a descriptive message.
    #[error("Stage '{stage}' failed: {message}")]
    StageFailed { stage: String, message: String },

    /// The pipeline or payload was cancelled via the cancellation flag.
    #[error("Pipeline was cancelled")]
    Cancelled,

    /// Invalid configuration detected at build time.
    #[error("Invalid configuration: {0}")]
    InvalidConfig(String),

    /// HTTP error with status code, response body, and optional Retry-After hint.
    ///
    /// Returned by [`Backend`](crate::backend::Backend) implementations when
    /// the provider returns a non-success status code. The `retry_after` field
    /// is populated from the `Retry-After` response header when present.
    #[error("HTTP {status}: {body}")]
    HttpError {
        /// HTTP status code (e.g. 429, 500, 503).
        status: u16,
        /// Response body text.
        body: String,
        /// Parsed `Retry-After` header value, if present.
        retry_after: Option<Duration>,
    },

    /// Both the OpenAI-compatible path and the native provider path 404'd
    /// for this model -- it is genuinely missing, not just misrouted.
    #[error("model '{model}' not found at {endpoint}")]
    ModelNotFound { model: String, endpoint: String },

    /// Catch-all for other errors.
    #[error("{0}")]
    Other(String),
}

impl From<anyhow::Error> for PipelineError {
    fn from(err: anyhow::Error) -> Self {
        PipelineError::Other(err.to_string())
    }
}

pub type Result<T> = std::result::Result<T, PipelineError>;

/// Fatal, service-level errors from the verdict pipeline.
///
/// Recoverable stage conditions never take this shape — they are folded
/// into [`RiskFlags`](crate::risk_flags::RiskFlags) on the response instead.
/// Only conditions that prevent a response from being assembled at all
/// reach here, and only in `strict_pipeline` mode; in lenient mode the
/// service catches these at the top level and degrades to an `UNVERIFIED`
/// response carrying the corresponding flag.
#[derive(Error, Debug)]
pub enum VerdictError {
    /// A required environment variable was missing or malformed at startup.
    #[error("invalid configuration: {0}")]
    Config(String),

    /// The judge (or another external-provider) endpoint needs an API key
    /// that was not supplied.
    #[error("external provider '{provider}' requires an API key but none was configured")]
    JudgeKeyMissingForExternalProvider { provider: String },

    /// The configured model could not be found on the target endpoint.
    #[error("model '{model}' not found at {endpoint}")]
    ModelNotFound { model: String, endpoint: String },

    /// The full pipeline run failed in a way that could not be degraded
    /// to a lenient response.
    #[error("pipeline execution failed: {0}")]
    PipelineExecutionFailed(String),

    /// The streaming run could not even start (initial state construction,
    /// checkpoint reconciliation, etc. failed before the first event).
    #[error("pipeline stream initialization failed: {0}")]
    PipelineStreamInitFailed(String),

    /// An unanticipated panic/exception surfaced from the orchestrator.
    #[error("pipeline crashed: {0}")]
    PipelineCrash(String),

    /// A lower-level transport/parsing failure propagated up unhandled.
    #[error(transparent)]
    Pipeline(#[from] PipelineError),
}

pub type VerdictResult<T> = std::result::Result<T, VerdictError>;
