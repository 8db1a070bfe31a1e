//! Audit-grade outcome labelling for individual decision records.

use adsum_core::types::{Decision, DecisionRecord};
use serde::Serialize;

/// The pairing of ground truth (`face_verified`) with the system's call.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum Outcome {
    TrueAccept,
    FalseReject,
    FalseAccept,
    TrueReject,
    /// The stored decision exists but is neither accept nor reject.
    Unknown,
}

impl Outcome {
    pub fn as_str(&self) -> &'static str {
        match self {
            Outcome::TrueAccept => "true_accept",
            Outcome::FalseReject => "false_reject",
            Outcome::FalseAccept => "false_accept",
            Outcome::TrueReject => "true_reject",
            Outcome::Unknown => "unknown",
        }
    }
}

/// Label one record.
///
/// Uses the **stored** decision, never a recomputation — the record is the
/// audit trail of what the system actually did. Only when the decision field
/// is absent (rows predating the column) is it derived from the stored score
/// against `threshold_used`, falling back to `default_threshold`; a missing
/// score derives to reject.
pub fn classify(record: &DecisionRecord, default_threshold: f32) -> Outcome {
    let decision = match &record.system_decision {
        Some(raw) => match Decision::parse(raw) {
            Some(d) => d,
            None => return Outcome::Unknown,
        },
        None => {
            let threshold = record.threshold_used.unwrap_or(default_threshold);
            match record.recognition_score {
                Some(score) if score >= threshold => Decision::Accept,
                _ => Decision::Reject,
            }
        }
    };

    match (record.face_verified, decision) {
        (true, Decision::Accept) => Outcome::TrueAccept,
        (true, Decision::Reject) => Outcome::FalseReject,
        (false, Decision::Accept) => Outcome::FalseAccept,
        (false, Decision::Reject) => Outcome::TrueReject,
    }
}

/// Tally of outcome labels over a batch.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct OutcomeCounts {
    pub true_accept: usize,
    pub false_reject: usize,
    pub false_accept: usize,
    pub true_reject: usize,
    pub unknown: usize,
}

pub fn outcome_counts(records: &[DecisionRecord], default_threshold: f32) -> OutcomeCounts {
    let mut counts = OutcomeCounts::default();
    for record in records {
        match classify(record, default_threshold) {
            Outcome::TrueAccept => counts.true_accept += 1,
            Outcome::FalseReject => counts.false_reject += 1,
            Outcome::FalseAccept => counts.false_accept += 1,
            Outcome::TrueReject => counts.true_reject += 1,
            Outcome::Unknown => counts.unknown += 1,
        }
    }
    counts
}
