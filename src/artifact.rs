//! Append-only per-stage artifact logging.
//!
//! One JSON record per stage, written under a per-run directory and
//! appended to a per-run JSONL plus a global index JSONL. Best-effort:
//! any I/O failure here is logged and swallowed, never propagated.

use std::io::Write;
use std::path::{Path, PathBuf};

use chrono::Utc;
use serde::Serialize;
use sha2::{Digest, Sha256};

/// One stage's artifact record.
#[derive(Debug, Clone, Serialize)]
pub struct StageArtifact {
    pub trace_id: String,
    pub stage: String,
    pub timestamp: String,
    pub duration_ms: u64,
    pub prompt_user_sha256: Option<String>,
    pub prompt_system_sha256: Option<String>,
    pub slm_raw_sha256: Option<String>,
    pub stage_json_sha256: String,
    pub stage_json_keys: Vec<String>,
    pub parse_ok: Option<bool>,
    pub parse_retry_used: Option<bool>,
    pub citation_valid_count: Option<usize>,
    pub schema_mismatch: Option<bool>,
    pub fail_closed: Option<bool>,
    pub risk_flags: Vec<String>,
}

/// Hex-encoded SHA-256 of `text`, used for every content-addressed field
/// on a [`StageArtifact`].
pub fn sha256_hex(text: &str) -> String {
    let mut hasher = Sha256::new();
    hasher.update(text.as_bytes());
    format!("{:x}", hasher.finalize())
}

/// Builder for a [`StageArtifact`], letting callers fill in only the
/// guardrail fields that apply to a given stage.
#[derive(Default)]
pub struct ArtifactBuilder {
    prompt_user: Option<String>,
    prompt_system: Option<String>,
    slm_raw: Option<String>,
    parse_ok: Option<bool>,
    parse_retry_used: Option<bool>,
    citation_valid_count: Option<usize>,
    schema_mismatch: Option<bool>,
    fail_closed: Option<bool>,
}

impl ArtifactBuilder {
    pub fn prompt_user(mut self, text: impl Into<String>) -> Self {
        self.prompt_user = Some(text.into());
        self
    }
    pub fn prompt_system(mut self, text: impl Into<String>) -> Self {
        self.prompt_system = Some(text.into());
        self
    }
    pub fn slm_raw(mut self, text: impl Into<String>) -> Self {
        self.slm_raw = Some(text.into());
        self
    }
    pub fn parse_ok(mut self, ok: bool) -> Self {
        self.parse_ok = Some(ok);
        self
    }
    pub fn parse_retry_used(mut self, used: bool) -> Self {
        self.parse_retry_used = Some(used);
        self
    }
    pub fn citation_valid_count(mut self, count: usize) -> Self {
        self.citation_valid_count = Some(count);
        self
    }
    pub fn schema_mismatch(mut self, mismatch: bool) -> Self {
        self.schema_mismatch = Some(mismatch);
        self
    }
    pub fn fail_closed(mut self, fail_closed: bool) -> Self {
        self.fail_closed = Some(fail_closed);
        self
    }

    pub fn build(
        self,
        trace_id: &str,
        stage: &str,
        duration_ms: u64,
        stage_json: &serde_json::Value,
        risk_flags: Vec<String>,
    ) -> StageArtifact {
        let stage_json_text = stage_json.to_string();
        let stage_json_keys = match stage_json {
            serde_json::Value::Object(map) => map.keys().cloned().collect(),
            _ => Vec::new(),
        };
        StageArtifact {
            trace_id: trace_id.to_string(),
            stage: stage.to_string(),
            timestamp: Utc::now().to_rfc3339(),
            duration_ms,
            prompt_user_sha256: self.prompt_user.as_deref().map(sha256_hex),
            prompt_system_sha256: self.prompt_system.as_deref().map(sha256_hex),
            slm_raw_sha256: self.slm_raw.as_deref().map(sha256_hex),
            stage_json_sha256: sha256_hex(&stage_json_text),
            stage_json_keys,
            parse_ok: self.parse_ok,
            parse_retry_used: self.parse_retry_used,
            citation_valid_count: self.citation_valid_count,
            schema_mismatch: self.schema_mismatch,
            fail_closed: self.fail_closed,
            risk_flags,
        }
    }
}

/// Writes artifacts under `run_dir/<trace_id>.jsonl` plus a shared
/// `index.jsonl` at the logger's root. Best-effort: write failures are
/// logged at `warn` and otherwise ignored.
pub struct ArtifactLogger {
    root: PathBuf,
}

impl ArtifactLogger {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self { root: root.into() }
    }

    pub fn record(&self, artifact: &StageArtifact) {
        if let Err(e) = self.try_record(artifact) {
            tracing::warn!(trace_id = %artifact.trace_id, stage = %artifact.stage, error = %e, "artifact logging failed");
        }
    }

    fn try_record(&self, artifact: &StageArtifact) -> std::io::Result<()> {
        std::fs::create_dir_all(&self.root)?;
        let line = serde_json::to_string(artifact).map_err(std::io::Error::other)?;

        append_line(&self.run_file(&artifact.trace_id), &line)?;
        append_line(&self.index_file(), &line)?;
        Ok(())
    }

    fn run_file(&self, trace_id: &str) -> PathBuf {
        self.root.join(format!("{trace_id}.jsonl"))
    }

    fn index_file(&self) -> PathBuf {
        self.root.join("index.jsonl")
    }
}

fn append_line(path: &Path, line: &str) -> std::io::Result<()> {
    let mut file = std::fs::OpenOptions::new().create(true).append(true).open(path)?;
    writeln!(file, "{line}")
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn sha256_hex_is_stable() {
        let a = sha256_hex("hello");
        let b = sha256_hex("hello");
        assert_eq!(a, b);
        assert_eq!(a.len(), 64);
    }

    #[test]
    fn builder_hashes_present_fields_only() {
        let artifact = ArtifactBuilder::default()
            .prompt_user("hi")
            .parse_ok(true)
            .build("trace-1", "stage01", 5, &serde_json::json!({"a": 1}), vec![]);
        assert!(artifact.prompt_user_sha256.is_some());
        assert!(artifact.prompt_system_sha256.is_none());
        assert_eq!(artifact.parse_ok, Some(true));
    }

    #[test]
    fn logger_appends_to_run_and_index_files() {
        let dir = std::env::temp_dir().join(format!("artifact-test-{}", uuid::Uuid::new_v4()));
        let logger = ArtifactLogger::new(&dir);
        let artifact = ArtifactBuilder::default().build("trace-2", "stage02", 1, &serde_json::json!({}), vec![]);
        logger.record(&artifact);

        let run_contents = std::fs::read_to_string(dir.join("trace-2.jsonl")).unwrap();
        assert!(run_contents.contains("stage02"));
        let index_contents = std::fs::read_to_string(dir.join("index.jsonl")).unwrap();
        assert!(index_contents.contains("stage02"));

        std::fs::remove_dir_all(&dir).ok();
    }
}
