//! FAR/FRR/accuracy at a threshold, threshold sweeps, and the equal error
//! rate.
//!
//! Everything here is a pure function over an immutable batch of decision
//! records: identical input yields identical output, no I/O, no clock.

use adsum_core::types::{Decision, DecisionRecord};
use serde::Serialize;

/// Verification error rates and outcome counts at one threshold.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Metrics {
    pub threshold: f32,
    #[serde(rename = "FAR")]
    pub far: f64,
    #[serde(rename = "FRR")]
    pub frr: f64,
    pub accuracy: f64,
    pub total_attempts: usize,
    pub genuine_attempts: usize,
    pub impostor_attempts: usize,
    pub false_accepts: usize,
    pub false_rejects: usize,
    pub true_accepts: usize,
    pub true_rejects: usize,
}

impl Metrics {
    fn empty(threshold: f32) -> Self {
        Self {
            threshold,
            far: 0.0,
            frr: 0.0,
            accuracy: 0.0,
            total_attempts: 0,
            genuine_attempts: 0,
            impostor_attempts: 0,
            false_accepts: 0,
            false_rejects: 0,
            true_accepts: 0,
            true_rejects: 0,
        }
    }
}

/// One point of a threshold sweep.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct SweepPoint {
    pub threshold: f32,
    #[serde(rename = "FAR")]
    pub far: f64,
    #[serde(rename = "FRR")]
    pub frr: f64,
    pub accuracy: f64,
}

/// The sweep point where FAR and FRR come closest.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct EerResult {
    pub eer_threshold: f32,
    pub eer_value: f64,
    #[serde(rename = "FAR_at_eer")]
    pub far_at_eer: f64,
    #[serde(rename = "FRR_at_eer")]
    pub frr_at_eer: f64,
}

impl Default for EerResult {
    fn default() -> Self {
        Self {
            eer_threshold: 0.5,
            eer_value: 0.0,
            far_at_eer: 0.0,
            frr_at_eer: 0.0,
        }
    }
}

/// Partition a batch into genuine (`face_verified`) and impostor attempts.
pub fn split(records: &[DecisionRecord]) -> (Vec<&DecisionRecord>, Vec<&DecisionRecord>) {
    let (genuine, impostor): (Vec<_>, Vec<_>) = records.iter().partition(|r| r.face_verified);
    tracing::debug!(
        genuine = genuine.len(),
        impostor = impostor.len(),
        "split decision batch"
    );
    (genuine, impostor)
}

/// Compute FAR, FRR and accuracy for a batch.
///
/// With `use_stored_decision`, counts come from each record's persisted
/// `system_decision` — what the system actually enforced — and the reported
/// threshold is the most frequent stored `threshold_used` (the caller's
/// argument is only a fallback). Without it, accept/reject is recomputed
/// from the recognition score against `threshold`; records with no score
/// never count as false accepts or false rejects.
///
/// Empty genuine or impostor subsets yield a 0.0 rate for that side.
pub fn compute_metrics(
    records: &[DecisionRecord],
    threshold: f32,
    use_stored_decision: bool,
) -> Metrics {
    let threshold = threshold.clamp(0.0, 1.0);
    if records.is_empty() {
        return Metrics::empty(threshold);
    }

    let (genuine, impostor) = split(records);
    let genuine_count = genuine.len();
    let impostor_count = impostor.len();

    let (false_rejects, false_accepts, threshold) = if use_stored_decision {
        let fr = genuine
            .iter()
            .filter(|r| r.decision() == Some(Decision::Reject))
            .count();
        let fa = impostor
            .iter()
            .filter(|r| r.decision() == Some(Decision::Accept))
            .count();
        (fr, fa, mode_threshold(records).unwrap_or(threshold))
    } else {
        let fr = genuine
            .iter()
            .filter(|r| r.recognition_score.is_some_and(|s| s < threshold))
            .count();
        let fa = impostor
            .iter()
            .filter(|r| r.recognition_score.is_some_and(|s| s >= threshold))
            .count();
        (fr, fa, threshold)
    };

    let true_accepts = genuine_count - false_rejects;
    let true_rejects = impostor_count - false_accepts;

    let frr = rate(false_rejects, genuine_count);
    let far = rate(false_accepts, impostor_count);
    let accuracy = rate(true_accepts + true_rejects, records.len());

    Metrics {
        threshold,
        far,
        frr,
        accuracy,
        total_attempts: records.len(),
        genuine_attempts: genuine_count,
        impostor_attempts: impostor_count,
        false_accepts,
        false_rejects,
        true_accepts,
        true_rejects,
    }
}

/// Evaluate score-based metrics at `n` evenly spaced thresholds over
/// [0, 1] inclusive.
///
/// The sweep always recomputes decisions from scores: stored decisions were
/// all made at one operating point, so they cannot trace a detection-error
/// tradeoff curve.
pub fn sweep(records: &[DecisionRecord], n: usize) -> Vec<SweepPoint> {
    if records.is_empty() || n == 0 {
        return Vec::new();
    }
    (0..n)
        .map(|i| {
            let t = if n == 1 {
                0.0
            } else {
                i as f32 / (n - 1) as f32
            };
            let m = compute_metrics(records, t, false);
            SweepPoint {
                threshold: t,
                far: m.far,
                frr: m.frr,
                accuracy: m.accuracy,
            }
        })
        .collect()
}

/// Locate the equal error rate over an `n`-point sweep: the first grid point
/// (in ascending threshold order) minimizing `|FAR - FRR|`, with the EER
/// value averaged between the two rates there.
pub fn find_eer(records: &[DecisionRecord], n: usize) -> EerResult {
    let points = sweep(records, n);
    let Some(best) = points.iter().min_by(|a, b| {
        let ga = (a.far - a.frr).abs();
        let gb = (b.far - b.frr).abs();
        ga.total_cmp(&gb)
    }) else {
        return EerResult::default();
    };

    EerResult {
        eer_threshold: round4_f32(best.threshold),
        eer_value: round4((best.far + best.frr) / 2.0),
        far_at_eer: best.far,
        frr_at_eer: best.frr,
    }
}

fn rate(numerator: usize, denominator: usize) -> f64 {
    if denominator == 0 {
        0.0
    } else {
        round4(numerator as f64 / denominator as f64)
    }
}

/// Most frequent stored threshold; the smallest value wins ties. `None`
/// when no record carries one.
fn mode_threshold(records: &[DecisionRecord]) -> Option<f32> {
    let mut values: Vec<f32> = records.iter().filter_map(|r| r.threshold_used).collect();
    if values.is_empty() {
        return None;
    }
    values.sort_by(|a, b| a.total_cmp(b));

    let mut best = (values[0], 0usize);
    let mut i = 0;
    while i < values.len() {
        let mut j = i;
        while j < values.len() && values[j] == values[i] {
            j += 1;
        }
        if j - i > best.1 {
            best = (values[i], j - i);
        }
        i = j;
    }
    Some(best.0)
}

pub(crate) fn round4(v: f64) -> f64 {
    (v * 10_000.0).round() / 10_000.0
}

fn round4_f32(v: f32) -> f32 {
    (v * 10_000.0).round() / 10_000.0
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Utc;

    fn rec(
        face: bool,
        decision: Option<&str>,
        score: Option<f32>,
        threshold: Option<f32>,
    ) -> DecisionRecord {
        DecisionRecord {
            user_id: "0002".to_string(),
            recognition_score: score,
            face_verified: face,
            liveness_verified: face,
            threshold_used: threshold,
            system_decision: decision.map(str::to_string),
            timestamp: Utc::now(),
        }
    }

    /// 3 genuine/accept, 2 genuine/reject, 2 impostor/accept,
    /// 3 impostor/reject.
    fn ten_records() -> Vec<DecisionRecord> {
        let mut records = Vec::new();
        for _ in 0..3 {
            records.push(rec(true, Some("accept"), Some(0.8), Some(0.5)));
        }
        for _ in 0..2 {
            records.push(rec(true, Some("reject"), Some(0.3), Some(0.5)));
        }
        for _ in 0..2 {
            records.push(rec(false, Some("accept"), Some(0.7), Some(0.5)));
        }
        for _ in 0..3 {
            records.push(rec(false, Some("reject"), Some(0.2), Some(0.5)));
        }
        records
    }

    #[test]
    fn ten_record_worked_example() {
        let m = compute_metrics(&ten_records(), 0.5, true);
        assert_eq!(m.far, 0.4);
        assert_eq!(m.frr, 0.4);
        assert_eq!(m.accuracy, 0.6);
        assert_eq!(m.true_accepts, 3);
        assert_eq!(m.false_rejects, 2);
        assert_eq!(m.false_accepts, 2);
        assert_eq!(m.true_rejects, 3);
        assert_eq!(m.genuine_attempts, 5);
        assert_eq!(m.impostor_attempts, 5);
        assert_eq!(m.total_attempts, 10);
    }

    #[test]
    fn empty_batch_yields_zeroes_not_errors() {
        let m = compute_metrics(&[], 0.5, true);
        assert_eq!(m.far, 0.0);
        assert_eq!(m.frr, 0.0);
        assert_eq!(m.accuracy, 0.0);
        assert_eq!(m.total_attempts, 0);

        assert!(sweep(&[], 10).is_empty());
        assert_eq!(find_eer(&[], 10), EerResult::default());
    }

    #[test]
    fn perfect_decisions_have_zero_error_rates() {
        let records = vec![
            rec(true, Some("accept"), Some(0.9), Some(0.5)),
            rec(true, Some("accept"), Some(0.7), Some(0.5)),
            rec(false, Some("reject"), Some(0.2), Some(0.5)),
        ];
        let m = compute_metrics(&records, 0.5, true);
        assert_eq!(m.far, 0.0);
        assert_eq!(m.frr, 0.0);
        assert_eq!(m.accuracy, 1.0);
    }

    #[test]
    fn stored_mode_trusts_decisions_over_scores() {
        // Scores contradict the stored decisions; stored mode must follow
        // the decisions.
        let records = vec![
            rec(true, Some("reject"), Some(0.99), Some(0.5)),
            rec(false, Some("accept"), Some(0.01), Some(0.5)),
        ];
        let m = compute_metrics(&records, 0.5, true);
        assert_eq!(m.false_rejects, 1);
        assert_eq!(m.false_accepts, 1);
        assert_eq!(m.accuracy, 0.0);
    }

    #[test]
    fn stored_mode_reports_mode_of_stored_thresholds() {
        let records = vec![
            rec(true, Some("accept"), Some(0.9), Some(0.4)),
            rec(true, Some("accept"), Some(0.9), Some(0.4)),
            rec(false, Some("reject"), Some(0.1), Some(0.6)),
        ];
        let m = compute_metrics(&records, 0.5, true);
        assert_eq!(m.threshold, 0.4);
    }

    #[test]
    fn stored_mode_threshold_tie_prefers_smaller() {
        let records = vec![
            rec(true, Some("accept"), Some(0.9), Some(0.6)),
            rec(true, Some("accept"), Some(0.9), Some(0.4)),
        ];
        let m = compute_metrics(&records, 0.5, true);
        assert_eq!(m.threshold, 0.4);
    }

    #[test]
    fn stored_mode_falls_back_to_caller_threshold() {
        let records = vec![rec(true, Some("accept"), Some(0.9), None)];
        let m = compute_metrics(&records, 0.45, true);
        assert_eq!(m.threshold, 0.45);
    }

    #[test]
    fn missing_decision_counts_as_neither_false_reject_nor_false_accept() {
        let records = vec![
            rec(true, None, Some(0.2), Some(0.5)),
            rec(false, None, Some(0.9), Some(0.5)),
        ];
        let m = compute_metrics(&records, 0.5, true);
        assert_eq!(m.false_rejects, 0);
        assert_eq!(m.false_accepts, 0);
        assert_eq!(m.true_accepts, 1);
        assert_eq!(m.true_rejects, 1);
    }

    #[test]
    fn score_mode_recomputes_from_scores() {
        let records = vec![
            rec(true, Some("accept"), Some(0.8), Some(0.5)),
            rec(true, Some("accept"), Some(0.3), Some(0.5)),
            rec(false, Some("reject"), Some(0.6), Some(0.5)),
            rec(false, Some("reject"), Some(0.1), Some(0.5)),
        ];
        let m = compute_metrics(&records, 0.5, false);
        assert_eq!(m.false_rejects, 1); // 0.3 < 0.5
        assert_eq!(m.false_accepts, 1); // 0.6 >= 0.5
        assert_eq!(m.frr, 0.5);
        assert_eq!(m.far, 0.5);
        assert_eq!(m.accuracy, 0.5);
    }

    #[test]
    fn score_mode_excludes_missing_scores_from_error_counts() {
        let records = vec![
            rec(true, None, None, Some(0.5)),
            rec(false, None, None, Some(0.5)),
        ];
        let m = compute_metrics(&records, 0.5, false);
        assert_eq!(m.false_rejects, 0);
        assert_eq!(m.false_accepts, 0);
    }

    #[test]
    fn caller_threshold_is_clamped() {
        let m = compute_metrics(&[rec(true, None, Some(0.5), None)], 3.0, false);
        assert_eq!(m.threshold, 1.0);
        let m = compute_metrics(&[rec(true, None, Some(0.5), None)], -1.0, false);
        assert_eq!(m.threshold, 0.0);
    }

    #[test]
    fn sweep_covers_unit_interval_inclusive() {
        let points = sweep(&ten_records(), 11);
        assert_eq!(points.len(), 11);
        assert_eq!(points[0].threshold, 0.0);
        assert_eq!(points[10].threshold, 1.0);
        assert!((points[5].threshold - 0.5).abs() < 1e-6);
    }

    #[test]
    fn sweep_rates_are_monotone_in_threshold() {
        let points = sweep(&ten_records(), 101);
        for pair in points.windows(2) {
            assert!(pair[1].far <= pair[0].far, "FAR must be non-increasing");
            assert!(pair[1].frr >= pair[0].frr, "FRR must be non-decreasing");
        }
    }

    #[test]
    fn eer_gap_is_minimal_over_the_grid() {
        let records = ten_records();
        let n = 101;
        let result = find_eer(&records, n);
        let best_gap = (result.far_at_eer - result.frr_at_eer).abs();
        for p in sweep(&records, n) {
            assert!(
                (p.far - p.frr).abs() >= best_gap - 1e-12,
                "no grid point may beat the reported EER gap"
            );
        }
        assert_eq!(result.eer_value, round4((result.far_at_eer + result.frr_at_eer) / 2.0));
    }

    #[test]
    fn eer_tie_break_takes_first_minimal_threshold() {
        // One genuine at 0.6, one impostor at 0.4: every threshold in
        // (0.4, 0.6] has FAR = FRR = 0, so the first such grid point wins.
        let records = vec![
            rec(true, None, Some(0.6), None),
            rec(false, None, Some(0.4), None),
        ];
        let result = find_eer(&records, 11);
        assert_eq!(result.eer_value, 0.0);
        assert!((result.eer_threshold - 0.5).abs() < 1e-6);
    }

    #[test]
    fn report_serializes_with_uppercase_rate_keys() {
        // Downstream consumers read the rates as FAR/FRR.
        let m = compute_metrics(&ten_records(), 0.5, true);
        let json = serde_json::to_value(&m).unwrap();
        assert_eq!(json["FAR"], 0.4);
        assert_eq!(json["FRR"], 0.4);
        assert_eq!(json["accuracy"], 0.6);
        assert_eq!(json["total_attempts"], 10);
    }

    mod properties {
        use super::*;
        use proptest::prelude::*;

        fn arb_records() -> impl Strategy<Value = Vec<DecisionRecord>> {
            prop::collection::vec((any::<bool>(), 0.0f32..=1.0f32), 1..40).prop_map(|rows| {
                rows.into_iter()
                    .map(|(face, score)| rec(face, None, Some(score), None))
                    .collect()
            })
        }

        proptest! {
            #[test]
            fn far_non_increasing_frr_non_decreasing(records in arb_records()) {
                let points = sweep(&records, 21);
                for pair in points.windows(2) {
                    prop_assert!(pair[1].far <= pair[0].far);
                    prop_assert!(pair[1].frr >= pair[0].frr);
                }
            }

            #[test]
            fn eer_is_grid_minimal(records in arb_records()) {
                let result = find_eer(&records, 21);
                let best_gap = (result.far_at_eer - result.frr_at_eer).abs();
                for p in sweep(&records, 21) {
                    prop_assert!((p.far - p.frr).abs() >= best_gap - 1e-12);
                }
            }
        }
    }
}
