//! The closed vocabulary of risk-flag tokens attached to a verdict response.
//!
//! Risk flags are how recoverable stage conditions surface to the caller
//! without failing the request. [`RiskFlags`] keeps the set deduped and
//! serializes as a plain array of uppercase strings.

use std::collections::BTreeSet;
use std::fmt;

/// A single risk-flag token from the closed vocabulary.
///
/// `StageFailure` carries the stage id for the generic `<STAGE>_FAILURE`
/// family; every other variant is a fixed token.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub enum RiskFlag {
    LowEvidence,
    LowTrustEvidence,
    LowConfidence,
    NoSkepticEvidence,
    UnbalancedStanceEvidence,
    NoVerifiedCitations,
    QuerygenDegraded,
    CollectEmpty,
    ScoreDegraded,
    TopkEmpty,
    QualityGateFailed,
    JudgeFailClosed,
    LlmJudgeFailed,
    LlmSchemaMismatch,
    ModelNotFound,
    PersistenceFailed,
    PipelineCrash,
    StageFailure(&'static str),
}

impl RiskFlag {
    /// The uppercase token string used on the wire.
    pub fn as_token(&self) -> String {
        match self {
            RiskFlag::LowEvidence => "LOW_EVIDENCE".to_string(),
            RiskFlag::LowTrustEvidence => "LOW_TRUST_EVIDENCE".to_string(),
            RiskFlag::LowConfidence => "LOW_CONFIDENCE".to_string(),
            RiskFlag::NoSkepticEvidence => "NO_SKEPTIC_EVIDENCE".to_string(),
            RiskFlag::UnbalancedStanceEvidence => "UNBALANCED_STANCE_EVIDENCE".to_string(),
            RiskFlag::NoVerifiedCitations => "NO_VERIFIED_CITATIONS".to_string(),
            RiskFlag::QuerygenDegraded => "QUERYGEN_DEGRADED".to_string(),
            RiskFlag::CollectEmpty => "COLLECT_EMPTY".to_string(),
            RiskFlag::ScoreDegraded => "SCORE_DEGRADED".to_string(),
            RiskFlag::TopkEmpty => "TOPK_EMPTY".to_string(),
            RiskFlag::QualityGateFailed => "QUALITY_GATE_FAILED".to_string(),
            RiskFlag::JudgeFailClosed => "JUDGE_FAIL_CLOSED".to_string(),
            RiskFlag::LlmJudgeFailed => "LLM_JUDGE_FAILED".to_string(),
            RiskFlag::LlmSchemaMismatch => "LLM_SCHEMA_MISMATCH".to_string(),
            RiskFlag::ModelNotFound => "MODEL_NOT_FOUND".to_string(),
            RiskFlag::PersistenceFailed => "PERSISTENCE_FAILED".to_string(),
            RiskFlag::PipelineCrash => "PIPELINE_CRASH".to_string(),
            RiskFlag::StageFailure(stage) => format!("{}_FAILURE", stage.to_uppercase()),
        }
    }
}

impl fmt::Display for RiskFlag {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.as_token())
    }
}

/// A deduped, ordered set of risk flags.
///
/// Backed by a `BTreeSet` keyed on the flag itself so insertion is
/// idempotent and serialization order is stable (required by invariant 6
/// in the data model: two runs on identical inputs produce byte-identical
/// responses).
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct RiskFlags(BTreeSet<RiskFlag>);

impl RiskFlags {
    pub fn new() -> Self {
        Self(BTreeSet::new())
    }

    pub fn insert(&mut self, flag: RiskFlag) {
        self.0.insert(flag);
    }

    pub fn contains(&self, flag: &RiskFlag) -> bool {
        self.0.contains(flag)
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    pub fn len(&self) -> usize {
        self.0.len()
    }

    pub fn iter(&self) -> impl Iterator<Item = &RiskFlag> {
        self.0.iter()
    }

    /// Tokens in stable sorted order, as they appear on the wire.
    pub fn tokens(&self) -> Vec<String> {
        self.0.iter().map(RiskFlag::as_token).collect()
    }
}

impl serde::Serialize for RiskFlags {
    fn serialize<S>(&self, serializer: S) -> Result<S::Ok, S::Error>
    where
        S: serde::Serializer,
    {
        self.tokens().serialize(serializer)
    }
}

impl FromIterator<RiskFlag> for RiskFlags {
    fn from_iter<I: IntoIterator<Item = RiskFlag>>(iter: I) -> Self {
        Self(iter.into_iter().collect())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn dedupes_identical_flags() {
        let mut flags = RiskFlags::new();
        flags.insert(RiskFlag::LowEvidence);
        flags.insert(RiskFlag::LowEvidence);
        assert_eq!(flags.len(), 1);
    }

    #[test]
    fn stage_failure_token_uppercases_stage() {
        let flag = RiskFlag::StageFailure("stage03_web");
        assert_eq!(flag.as_token(), "STAGE03_WEB_FAILURE");
    }

    #[test]
    fn tokens_are_sorted_and_stable() {
        let mut flags = RiskFlags::new();
        flags.insert(RiskFlag::PipelineCrash);
        flags.insert(RiskFlag::LowEvidence);
        let tokens = flags.tokens();
        let mut sorted = tokens.clone();
        sorted.sort();
        assert_eq!(tokens, sorted);
    }

    #[test]
    fn contains_checks_membership() {
        let mut flags = RiskFlags::new();
        flags.insert(RiskFlag::NoVerifiedCitations);
        assert!(flags.contains(&RiskFlag::NoVerifiedCitations));
        assert!(!flags.contains(&RiskFlag::LowEvidence));
    }
}
