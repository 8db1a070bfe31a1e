use std::time::Duration;

/// Cosine similarity threshold for a positive face match.
pub const DEFAULT_SIMILARITY_THRESHOLD: f32 = 0.5;
/// Length of the liveness verification window once the face is confirmed.
pub const DEFAULT_VERIFICATION_DURATION: Duration = Duration::from_secs(10);
/// Expensive per-frame work (QR decode, face match, liveness) runs on every
/// Nth frame to bound CPU cost. Correctness never depends on the cadence.
pub const DEFAULT_SAMPLE_INTERVAL: u32 = 2;

/// Verification tunables, passed explicitly into the matcher, the session
/// and the engine loop. There is no ambient configuration state.
#[derive(Debug, Clone)]
pub struct VerifyConfig {
    /// Similarity threshold for a positive match, in [0, 1].
    pub similarity_threshold: f32,
    /// Wall-clock length of the verification window.
    pub verification_duration: Duration,
    /// QR decode runs every Nth frame while awaiting a claim.
    pub qr_sample_interval: u32,
    /// Face detection + matching runs every Nth frame.
    pub face_sample_interval: u32,
    /// Liveness evaluation runs every Nth frame inside the window.
    pub liveness_sample_interval: u32,
}

impl Default for VerifyConfig {
    fn default() -> Self {
        Self {
            similarity_threshold: DEFAULT_SIMILARITY_THRESHOLD,
            verification_duration: DEFAULT_VERIFICATION_DURATION,
            qr_sample_interval: DEFAULT_SAMPLE_INTERVAL,
            face_sample_interval: DEFAULT_SAMPLE_INTERVAL,
            liveness_sample_interval: DEFAULT_SAMPLE_INTERVAL,
        }
    }
}

impl VerifyConfig {
    /// Clamp out-of-range values: threshold into [0, 1], sampling intervals
    /// to at least 1.
    pub fn sanitized(mut self) -> Self {
        self.similarity_threshold = self.similarity_threshold.clamp(0.0, 1.0);
        self.qr_sample_interval = self.qr_sample_interval.max(1);
        self.face_sample_interval = self.face_sample_interval.max(1);
        self.liveness_sample_interval = self.liveness_sample_interval.max(1);
        self
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_match_documented_constants() {
        let cfg = VerifyConfig::default();
        assert_eq!(cfg.similarity_threshold, 0.5);
        assert_eq!(cfg.verification_duration, Duration::from_secs(10));
        assert_eq!(cfg.qr_sample_interval, 2);
        assert_eq!(cfg.face_sample_interval, 2);
        assert_eq!(cfg.liveness_sample_interval, 2);
    }

    #[test]
    fn sanitized_clamps() {
        let cfg = VerifyConfig {
            similarity_threshold: 1.7,
            qr_sample_interval: 0,
            ..VerifyConfig::default()
        }
        .sanitized();
        assert_eq!(cfg.similarity_threshold, 1.0);
        assert_eq!(cfg.qr_sample_interval, 1);

        let cfg = VerifyConfig {
            similarity_threshold: -0.3,
            ..VerifyConfig::default()
        }
        .sanitized();
        assert_eq!(cfg.similarity_threshold, 0.0);
    }
}
