//! Adsum evaluation engine.
//!
//! Pure functions over immutable batches of [`DecisionRecord`]s: the
//! genuine/impostor split, FAR/FRR/accuracy at a threshold, threshold
//! sweeps, the equal error rate, score-population statistics, and
//! audit-grade outcome labelling. No I/O, no clock, no mutation — identical
//! input always produces identical output.
//!
//! [`DecisionRecord`]: adsum_core::types::DecisionRecord

pub mod metrics;
pub mod outcome;
pub mod stats;

pub use metrics::{compute_metrics, find_eer, split, sweep, EerResult, Metrics, SweepPoint};
pub use outcome::{classify, outcome_counts, Outcome, OutcomeCounts};
pub use stats::{score_statistics, ScoreStatistics, ScoreSummary};
