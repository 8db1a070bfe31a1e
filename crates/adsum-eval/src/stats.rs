//! Descriptive statistics over the genuine and impostor score populations.

use adsum_core::types::DecisionRecord;
use serde::Serialize;

use crate::metrics::{round4, split};

/// Summary of one score population. Records without a score are excluded,
/// not treated as zero.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ScoreSummary {
    pub count: usize,
    pub mean: f64,
    pub median: f64,
    pub std: f64,
    pub min: f64,
    pub max: f64,
    pub q25: f64,
    pub q75: f64,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ScoreStatistics {
    pub genuine: Option<ScoreSummary>,
    pub impostor: Option<ScoreSummary>,
}

pub fn score_statistics(records: &[DecisionRecord]) -> ScoreStatistics {
    let (genuine, impostor) = split(records);
    ScoreStatistics {
        genuine: summarize(scores_of(&genuine)),
        impostor: summarize(scores_of(&impostor)),
    }
}

fn scores_of(records: &[&DecisionRecord]) -> Vec<f64> {
    records
        .iter()
        .filter_map(|r| r.recognition_score)
        .map(f64::from)
        .collect()
}

fn summarize(mut scores: Vec<f64>) -> Option<ScoreSummary> {
    if scores.is_empty() {
        return None;
    }
    scores.sort_by(|a, b| a.total_cmp(b));

    let count = scores.len();
    let mean = scores.iter().sum::<f64>() / count as f64;
    // Sample standard deviation; a single observation has no spread.
    let std = if count > 1 {
        let var = scores.iter().map(|s| (s - mean).powi(2)).sum::<f64>() / (count - 1) as f64;
        var.sqrt()
    } else {
        0.0
    };

    Some(ScoreSummary {
        count,
        mean: round4(mean),
        median: round4(percentile(&scores, 0.5)),
        std: round4(std),
        min: round4(scores[0]),
        max: round4(scores[count - 1]),
        q25: round4(percentile(&scores, 0.25)),
        q75: round4(percentile(&scores, 0.75)),
    })
}

/// Linear-interpolation percentile over a sorted slice.
fn percentile(sorted: &[f64], q: f64) -> f64 {
    let pos = q * (sorted.len() - 1) as f64;
    let lo = pos.floor() as usize;
    let hi = pos.ceil() as usize;
    if lo == hi {
        sorted[lo]
    } else {
        let frac = pos - lo as f64;
        sorted[lo] + (sorted[hi] - sorted[lo]) * frac
    }
}
