//! Embedding comparison against enrolled reference sets.

use crate::types::{Embedding, EnrolledIdentity, MatchResult};

/// Compares a probe embedding against enrolled references.
pub trait Matcher {
    /// Compare one probe against one identity's reference set.
    /// Returns `(is_match, score)` where the score is the mean similarity
    /// over every reference sample.
    fn compare(&self, probe: &Embedding, references: &[Embedding]) -> (bool, f32);

    /// Search the full roster for the best-matching enrolled identity.
    /// Returns `None` when no identity clears the threshold.
    fn search(&self, probe: &Embedding, roster: &[EnrolledIdentity]) -> Option<MatchResult>;
}

/// Mean-cosine-similarity matcher.
///
/// The score is averaged over all reference samples rather than taking the
/// maximum, so one atypical enrollment sample cannot dominate the verdict.
#[derive(Debug, Clone)]
pub struct CosineMatcher {
    threshold: f32,
}

impl CosineMatcher {
    pub fn new(threshold: f32) -> Self {
        Self {
            threshold: threshold.clamp(0.0, 1.0),
        }
    }

    pub fn threshold(&self) -> f32 {
        self.threshold
    }
}

impl Matcher for CosineMatcher {
    fn compare(&self, probe: &Embedding, references: &[Embedding]) -> (bool, f32) {
        if references.is_empty() {
            return (false, 0.0);
        }
        let total: f32 = references
            .iter()
            .map(|r| cosine_similarity(&probe.values, &r.values))
            .sum();
        let score = total / references.len() as f32;
        (score >= self.threshold, score)
    }

    fn search(&self, probe: &Embedding, roster: &[EnrolledIdentity]) -> Option<MatchResult> {
        let mut best: Option<MatchResult> = None;
        for identity in roster {
            let (is_match, score) = self.compare(probe, &identity.references);
            if !is_match {
                continue;
            }
            // Strict comparison: on a tie, the earlier-enrolled identity wins.
            // The tie-break is part of the false-accept behavior when two
            // enrolled identities are visually similar.
            let better = best.as_ref().map_or(true, |b| score > b.score);
            if better {
                best = Some(MatchResult {
                    user_id: identity.user_id.clone(),
                    score: round3(score),
                    is_match: true,
                });
            }
        }
        if let Some(m) = &best {
            tracing::debug!(user = %m.user_id, score = m.score, "roster match");
        }
        best
    }
}

fn cosine_similarity(a: &[f32], b: &[f32]) -> f32 {
    if a.len() != b.len() || a.is_empty() {
        return 0.0;
    }
    let mut dot = 0.0f32;
    let mut norm_a = 0.0f32;
    let mut norm_b = 0.0f32;
    for (x, y) in a.iter().zip(b.iter()) {
        dot += x * y;
        norm_a += x * x;
        norm_b += y * y;
    }
    if norm_a == 0.0 || norm_b == 0.0 {
        return 0.0;
    }
    dot / (norm_a.sqrt() * norm_b.sqrt())
}

fn round3(v: f32) -> f32 {
    (v * 1000.0).round() / 1000.0
}
