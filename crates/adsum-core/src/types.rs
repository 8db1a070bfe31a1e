use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Dimension of the face embedding vectors produced by the recognition model.
pub const EMBEDDING_DIM: usize = 512;

#[derive(Error, Debug)]
pub enum EmbeddingError {
    #[error("invalid embedding dimension: {0} (expected {EMBEDDING_DIM})")]
    InvalidDim(usize),
    #[error("invalid embedding value (NaN/Inf)")]
    InvalidValue,
}

/// A face embedding vector extracted from one frame or one enrollment sample.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Embedding {
    pub values: Vec<f32>,
    /// Version tag of the model that produced the vector, when known.
    pub model_version: Option<String>,
}

impl Embedding {
    pub fn new(values: Vec<f32>) -> Self {
        Self {
            values,
            model_version: None,
        }
    }

    /// Check dimension and finiteness. Run before a vector is stored or matched.
    pub fn validate(&self) -> Result<(), EmbeddingError> {
        if self.values.len() != EMBEDDING_DIM {
            return Err(EmbeddingError::InvalidDim(self.values.len()));
        }
        if self.values.iter().any(|v| !v.is_finite()) {
            return Err(EmbeddingError::InvalidValue);
        }
        Ok(())
    }
}

/// An identity enrolled for attendance, with its ordered reference samples.
///
/// The sample order is the enrollment order; the matcher's tie-break depends
/// on roster order, so both are preserved end to end.
#[derive(Debug, Clone)]
pub struct EnrolledIdentity {
    pub user_id: String,
    pub name: Option<String>,
    pub references: Vec<Embedding>,
}

/// Outcome of comparing one probe embedding against the enrolled roster.
///
/// Invariant: `is_match == (score >= similarity_threshold)` for the threshold
/// the matcher was built with.
#[derive(Debug, Clone, PartialEq)]
pub struct MatchResult {
    pub user_id: String,
    pub score: f32,
    pub is_match: bool,
}

/// The system's accept/reject call, as persisted in a decision record.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Decision {
    Accept,
    Reject,
}

impl Decision {
    /// Parse a stored decision string. Historical rows vary in case and
    /// whitespace; anything that is not accept/reject is `None`.
    pub fn parse(raw: &str) -> Option<Decision> {
        match raw.trim().to_ascii_lowercase().as_str() {
            "accept" => Some(Decision::Accept),
            "reject" => Some(Decision::Reject),
            _ => None,
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            Decision::Accept => "accept",
            Decision::Reject => "reject",
        }
    }
}

/// The persisted, immutable outcome of one verification attempt.
///
/// `face_verified` is ground truth (claimed identity matched the recognized
/// identity), independent of `system_decision`. `threshold_used` and
/// `system_decision` are always written by the session; they are optional
/// only because rows recorded before those columns existed are still read
/// back for evaluation.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DecisionRecord {
    pub user_id: String,
    pub recognition_score: Option<f32>,
    pub face_verified: bool,
    pub liveness_verified: bool,
    pub threshold_used: Option<f32>,
    pub system_decision: Option<String>,
    pub timestamp: DateTime<Utc>,
}

impl DecisionRecord {
    /// The stored decision, parsed. `None` when the field is missing or the
    /// stored text is not accept/reject.
    pub fn decision(&self) -> Option<Decision> {
        self.system_decision.as_deref().and_then(Decision::parse)
    }

    pub fn accepted(&self) -> bool {
        self.decision() == Some(Decision::Accept)
    }

    /// The factors that failed, for user-facing reporting. Empty for an
    /// accepted record.
    pub fn failure_reasons(&self) -> Vec<&'static str> {
        if self.accepted() {
            return Vec::new();
        }
        let mut reasons = Vec::new();
        if !self.face_verified {
            reasons.push("face did not match the claimed identity");
        }
        if !self.liveness_verified {
            reasons.push("liveness not confirmed");
        }
        let threshold = self.threshold_used.unwrap_or(0.0);
        if self.recognition_score.unwrap_or(0.0) < threshold {
            reasons.push("similarity score below threshold");
        }
        reasons
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn record(face: bool, liveness: bool, score: f32, decision: &str) -> DecisionRecord {
        DecisionRecord {
            user_id: "0002".to_string(),
            recognition_score: Some(score),
            face_verified: face,
            liveness_verified: liveness,
            threshold_used: Some(0.5),
            system_decision: Some(decision.to_string()),
            timestamp: Utc::now(),
        }
    }

    #[test]
    fn parse_decision_normalizes_case_and_whitespace() {
        assert_eq!(Decision::parse("accept"), Some(Decision::Accept));
        assert_eq!(Decision::parse(" ACCEPT "), Some(Decision::Accept));
        assert_eq!(Decision::parse("Reject"), Some(Decision::Reject));
        assert_eq!(Decision::parse("maybe"), None);
        assert_eq!(Decision::parse(""), None);
    }

    #[test]
    fn accepted_reads_stored_decision() {
        assert!(record(true, true, 0.9, "accept").accepted());
        assert!(!record(true, true, 0.9, "reject").accepted());
        assert!(!record(true, true, 0.9, "garbage").accepted());
    }

    #[test]
    fn failure_reasons_empty_for_accept() {
        assert!(record(true, true, 0.9, "accept").failure_reasons().is_empty());
    }

    #[test]
    fn failure_reasons_name_each_failed_factor() {
        let reasons = record(false, false, 0.2, "reject").failure_reasons();
        assert_eq!(reasons.len(), 3);

        let reasons = record(true, false, 0.8, "reject").failure_reasons();
        assert_eq!(reasons, vec!["liveness not confirmed"]);
    }

    #[test]
    fn embedding_validation() {
        let mut emb = Embedding::new(vec![0.5; EMBEDDING_DIM]);
        assert!(emb.validate().is_ok());

        emb.values[7] = f32::NAN;
        assert!(matches!(emb.validate(), Err(EmbeddingError::InvalidValue)));

        let short = Embedding::new(vec![0.5; 128]);
        assert!(matches!(
            short.validate(),
            Err(EmbeddingError::InvalidDim(128))
        ));
    }
}
