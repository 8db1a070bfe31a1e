//! Per-attempt verification state machine.
//!
//! One attendance attempt fuses three independent evidence streams — the QR
//! identity claim, the face-embedding match and the liveness signal — plus
//! the wall clock into a single terminal [`DecisionRecord`]. The session is
//! a plain value type: an external loop feeds it events and the current
//! monotonic time, and it emits at most one record. All camera, decoding and
//! inference I/O stays outside.

use std::time::{Duration, Instant};

use chrono::Utc;

use crate::config::VerifyConfig;
use crate::types::{Decision, DecisionRecord, MatchResult};

/// Evidence and control events fed by the frame loop.
#[derive(Debug, Clone)]
pub enum SessionEvent {
    /// A QR code decoded to an identity claim.
    ClaimScanned(String),
    /// The matcher found an enrolled identity for the current frame.
    FaceMatched(MatchResult),
    /// Result of one liveness evaluation (blink / head movement).
    LivenessSignal(bool),
    /// Clock poll with no new evidence. Drives deadline expiry on frames
    /// where sampling skipped the expensive work.
    Tick,
    /// Operator abort. The session terminates with no record.
    Cancelled,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SessionPhase {
    /// Waiting for an identity claim. No biometric processing happens here.
    AwaitingClaim,
    /// Claim received; sampling frames for a confirming face match.
    AwaitingFaceMatch,
    /// Face confirmed; liveness window open until the deadline.
    Verifying,
    /// Terminal. Exactly one record was emitted, or the attempt was
    /// cancelled with none.
    Decided,
}

/// State for one attendance attempt.
#[derive(Debug)]
pub struct VerificationSession {
    config: VerifyConfig,
    phase: SessionPhase,
    expected_user_id: Option<String>,
    recognized_user_id: Option<String>,
    recognition_score: Option<f32>,
    liveness_confirmed: bool,
    started_at: Option<Instant>,
    deadline: Option<Instant>,
}

impl VerificationSession {
    pub fn new(config: VerifyConfig) -> Self {
        Self {
            config: config.sanitized(),
            phase: SessionPhase::AwaitingClaim,
            expected_user_id: None,
            recognized_user_id: None,
            recognition_score: None,
            liveness_confirmed: false,
            started_at: None,
            deadline: None,
        }
    }

    pub fn phase(&self) -> SessionPhase {
        self.phase
    }

    pub fn expected_user_id(&self) -> Option<&str> {
        self.expected_user_id.as_deref()
    }

    pub fn liveness_confirmed(&self) -> bool {
        self.liveness_confirmed
    }

    pub fn is_decided(&self) -> bool {
        self.phase == SessionPhase::Decided
    }

    /// Time left in the verification window, once it has started.
    pub fn remaining(&self, now: Instant) -> Option<Duration> {
        self.deadline.map(|d| d.saturating_duration_since(now))
    }

    /// Advance the state machine by one event.
    ///
    /// Returns the terminal record when this event decides the attempt.
    /// After the first `Some`, every further call returns `None`.
    pub fn handle_event(&mut self, event: SessionEvent, now: Instant) -> Option<DecisionRecord> {
        match self.phase {
            SessionPhase::Decided => None,
            SessionPhase::AwaitingClaim => self.on_awaiting_claim(event),
            SessionPhase::AwaitingFaceMatch => self.on_awaiting_face_match(event, now),
            SessionPhase::Verifying => self.on_verifying(event, now),
        }
    }

    fn on_awaiting_claim(&mut self, event: SessionEvent) -> Option<DecisionRecord> {
        match event {
            SessionEvent::ClaimScanned(user_id) => {
                tracing::info!(user = %user_id, "identity claim received");
                self.expected_user_id = Some(user_id);
                self.phase = SessionPhase::AwaitingFaceMatch;
                None
            }
            SessionEvent::Cancelled => {
                // No claim was ever made: nothing to evaluate, nothing to log.
                self.phase = SessionPhase::Decided;
                None
            }
            // Biometric evidence before a claim is discarded: the identity
            // claim must precede any face processing.
            _ => None,
        }
    }

    fn on_awaiting_face_match(
        &mut self,
        event: SessionEvent,
        now: Instant,
    ) -> Option<DecisionRecord> {
        match event {
            SessionEvent::FaceMatched(m) if m.is_match => {
                if self.expected_user_id.as_deref() == Some(m.user_id.as_str()) {
                    tracing::info!(
                        user = %m.user_id,
                        score = m.score,
                        window_secs = self.config.verification_duration.as_secs(),
                        "face confirmed, liveness window started"
                    );
                    self.recognized_user_id = Some(m.user_id);
                    self.recognition_score = Some(m.score);
                    self.started_at = Some(now);
                    self.deadline = Some(now + self.config.verification_duration);
                    self.phase = SessionPhase::Verifying;
                    None
                } else {
                    Some(self.emit_impostor(&m))
                }
            }
            SessionEvent::Cancelled => {
                self.phase = SessionPhase::Decided;
                None
            }
            // No face, no match, liveness noise, clock ticks: keep sampling.
            // There is no timeout before the window starts.
            _ => None,
        }
    }

    fn on_verifying(&mut self, event: SessionEvent, now: Instant) -> Option<DecisionRecord> {
        // Deadline first, on every event. Frames may be dropped, so expiry
        // can never depend on a particular event arriving.
        let deadline = self.deadline.expect("verifying phase always has a deadline");
        if now >= deadline {
            return Some(self.decide_at_deadline());
        }

        match event {
            SessionEvent::LivenessSignal(true) => {
                if !self.liveness_confirmed {
                    tracing::debug!("liveness confirmed");
                    self.liveness_confirmed = true;
                }
                None
            }
            SessionEvent::FaceMatched(m)
                if m.is_match && self.expected_user_id.as_deref() != Some(m.user_id.as_str()) =>
            {
                // A different identity inside the window is the same impostor
                // condition as before the window.
                Some(self.emit_impostor(&m))
            }
            SessionEvent::Cancelled => {
                self.phase = SessionPhase::Decided;
                None
            }
            _ => None,
        }
    }

    /// Recognized identity differs from the claim: terminal rejection,
    /// regardless of how high the similarity score was.
    fn emit_impostor(&mut self, m: &MatchResult) -> DecisionRecord {
        let claimed = self.expected_user_id.clone().unwrap_or_default();
        tracing::warn!(
            claimed = %claimed,
            recognized = %m.user_id,
            score = m.score,
            "face mismatch, attempt rejected"
        );
        self.phase = SessionPhase::Decided;
        DecisionRecord {
            user_id: claimed,
            recognition_score: Some(m.score),
            face_verified: false,
            liveness_verified: false,
            threshold_used: Some(self.config.similarity_threshold),
            system_decision: Some(Decision::Reject.as_str().to_string()),
            timestamp: Utc::now(),
        }
    }

    /// The window elapsed: record the attempt with the actual gate values.
    ///
    /// The decision is recomputed from the score against `threshold_used`
    /// even though the match stage already applied the same threshold, so
    /// the stored record is self-auditing.
    fn decide_at_deadline(&mut self) -> DecisionRecord {
        self.phase = SessionPhase::Decided;
        let score = self.recognition_score.unwrap_or(0.0);
        let face_verified = self.recognized_user_id.is_some()
            && self.recognized_user_id == self.expected_user_id
            && score > 0.0;
        let threshold = self.config.similarity_threshold;
        let decision = if score >= threshold {
            Decision::Accept
        } else {
            Decision::Reject
        };

        let record = DecisionRecord {
            user_id: self.expected_user_id.clone().unwrap_or_default(),
            recognition_score: Some(score),
            face_verified,
            liveness_verified: self.liveness_confirmed,
            threshold_used: Some(threshold),
            system_decision: Some(decision.as_str().to_string()),
            timestamp: Utc::now(),
        };

        if face_verified && self.liveness_confirmed && decision == Decision::Accept {
            tracing::info!(user = %record.user_id, score, "attendance verified");
        } else {
            tracing::warn!(
                user = %record.user_id,
                score,
                face_verified,
                liveness_verified = self.liveness_confirmed,
                decision = decision.as_str(),
                "verification window elapsed with failed factors"
            );
        }
        record
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn cfg() -> VerifyConfig {
        VerifyConfig::default()
    }

    fn matched(user: &str, score: f32) -> SessionEvent {
        SessionEvent::FaceMatched(MatchResult {
            user_id: user.to_string(),
            score,
            is_match: true,
        })
    }

    fn claim(user: &str) -> SessionEvent {
        SessionEvent::ClaimScanned(user.to_string())
    }

    fn secs(n: u64) -> Duration {
        Duration::from_secs(n)
    }

    #[test]
    fn full_accept_flow() {
        let t0 = Instant::now();
        let mut s = VerificationSession::new(cfg());

        assert!(s.handle_event(claim("0002"), t0).is_none());
        assert_eq!(s.phase(), SessionPhase::AwaitingFaceMatch);

        assert!(s.handle_event(matched("0002", 0.62), t0 + secs(1)).is_none());
        assert_eq!(s.phase(), SessionPhase::Verifying);

        assert!(s
            .handle_event(SessionEvent::LivenessSignal(true), t0 + secs(3))
            .is_none());
        assert!(s.liveness_confirmed());

        let record = s
            .handle_event(SessionEvent::Tick, t0 + secs(11))
            .expect("deadline decides");
        assert_eq!(record.user_id, "0002");
        assert!(record.face_verified);
        assert!(record.liveness_verified);
        assert_eq!(record.recognition_score, Some(0.62));
        assert_eq!(record.threshold_used, Some(0.5));
        assert_eq!(record.decision(), Some(Decision::Accept));
        assert!(s.is_decided());
    }

    #[test]
    fn biometric_evidence_before_claim_is_ignored() {
        let t0 = Instant::now();
        let mut s = VerificationSession::new(cfg());

        assert!(s.handle_event(matched("0002", 0.9), t0).is_none());
        assert!(s
            .handle_event(SessionEvent::LivenessSignal(true), t0)
            .is_none());
        assert_eq!(s.phase(), SessionPhase::AwaitingClaim);
        assert!(!s.liveness_confirmed());
    }

    #[test]
    fn impostor_rejected_immediately_regardless_of_score() {
        let t0 = Instant::now();
        let mut s = VerificationSession::new(cfg());
        s.handle_event(claim("0002"), t0);

        let record = s
            .handle_event(matched("0003", 0.8), t0 + secs(1))
            .expect("mismatch is terminal");
        assert_eq!(record.user_id, "0002");
        assert_eq!(record.recognition_score, Some(0.8));
        assert!(!record.face_verified);
        assert!(!record.liveness_verified);
        assert_eq!(record.decision(), Some(Decision::Reject));
        assert!(s.is_decided());
    }

    #[test]
    fn mismatch_inside_window_is_terminal_rejection() {
        let t0 = Instant::now();
        let mut s = VerificationSession::new(cfg());
        s.handle_event(claim("0002"), t0);
        s.handle_event(matched("0002", 0.7), t0 + secs(1));
        assert_eq!(s.phase(), SessionPhase::Verifying);

        let record = s
            .handle_event(matched("0003", 0.65), t0 + secs(4))
            .expect("mismatch inside window decides");
        assert!(!record.face_verified);
        assert_eq!(record.decision(), Some(Decision::Reject));
    }

    #[test]
    fn deadline_without_liveness_records_partial_failure() {
        let t0 = Instant::now();
        let mut s = VerificationSession::new(cfg());
        s.handle_event(claim("0002"), t0);
        s.handle_event(matched("0002", 0.62), t0 + secs(1));

        let record = s
            .handle_event(SessionEvent::Tick, t0 + secs(12))
            .expect("deadline decides");
        assert!(record.face_verified);
        assert!(!record.liveness_verified);
        // The decision itself is the score gate; the failed liveness factor
        // is preserved in the record for evaluation.
        assert_eq!(record.decision(), Some(Decision::Accept));
        assert_eq!(
            record.failure_reasons(),
            Vec::<&str>::new(),
            "accept carries no failure reasons"
        );
    }

    #[test]
    fn below_threshold_score_is_rejected_at_emission() {
        // The match stage normally gates entry into the window, but the
        // decision is still recomputed against the threshold at emission.
        let t0 = Instant::now();
        let mut s = VerificationSession::new(cfg());
        s.handle_event(claim("0002"), t0);
        s.handle_event(
            SessionEvent::FaceMatched(MatchResult {
                user_id: "0002".to_string(),
                score: 0.4,
                is_match: true,
            }),
            t0 + secs(1),
        );

        assert!(s
            .handle_event(SessionEvent::LivenessSignal(true), t0 + secs(2))
            .is_none());
        let record = s
            .handle_event(SessionEvent::Tick, t0 + secs(11))
            .expect("deadline decides");
        assert!(record.face_verified);
        assert!(record.liveness_verified);
        assert_eq!(record.decision(), Some(Decision::Reject));
    }

    #[test]
    fn liveness_is_sticky_once_confirmed() {
        let t0 = Instant::now();
        let mut s = VerificationSession::new(cfg());
        s.handle_event(claim("0002"), t0);
        s.handle_event(matched("0002", 0.7), t0);
        s.handle_event(SessionEvent::LivenessSignal(true), t0 + secs(2));
        s.handle_event(SessionEvent::LivenessSignal(false), t0 + secs(3));
        s.handle_event(SessionEvent::LivenessSignal(false), t0 + secs(4));

        let record = s.handle_event(SessionEvent::Tick, t0 + secs(10)).unwrap();
        assert!(record.liveness_verified);
    }

    #[test]
    fn deadline_is_checked_on_every_event_kind() {
        let t0 = Instant::now();
        let mut s = VerificationSession::new(cfg());
        s.handle_event(claim("0002"), t0);
        s.handle_event(matched("0002", 0.7), t0);

        // A liveness signal arriving after expiry must not count; the
        // deadline decides first.
        let record = s
            .handle_event(SessionEvent::LivenessSignal(true), t0 + secs(15))
            .expect("expired window decides on any event");
        assert!(!record.liveness_verified);
    }

    #[test]
    fn exactly_one_record_per_session() {
        let t0 = Instant::now();
        let mut s = VerificationSession::new(cfg());
        s.handle_event(claim("0002"), t0);
        s.handle_event(matched("0002", 0.7), t0);
        s.handle_event(SessionEvent::LivenessSignal(true), t0 + secs(1));

        assert!(s.handle_event(SessionEvent::Tick, t0 + secs(10)).is_some());
        for i in 11..20 {
            assert!(s.handle_event(SessionEvent::Tick, t0 + secs(i)).is_none());
        }
        assert!(s
            .handle_event(matched("0003", 0.9), t0 + secs(20))
            .is_none());
    }

    #[test]
    fn cancelled_before_claim_emits_nothing() {
        let t0 = Instant::now();
        let mut s = VerificationSession::new(cfg());
        assert!(s.handle_event(SessionEvent::Cancelled, t0).is_none());
        assert!(s.is_decided());
        assert!(s.handle_event(SessionEvent::Tick, t0 + secs(60)).is_none());
    }

    #[test]
    fn cancelled_inside_window_emits_nothing() {
        let t0 = Instant::now();
        let mut s = VerificationSession::new(cfg());
        s.handle_event(claim("0002"), t0);
        s.handle_event(matched("0002", 0.7), t0);
        assert!(s
            .handle_event(SessionEvent::Cancelled, t0 + secs(2))
            .is_none());
        assert!(s.is_decided());
        assert!(s.handle_event(SessionEvent::Tick, t0 + secs(30)).is_none());
    }

    #[test]
    fn no_match_keeps_waiting_without_timeout() {
        let t0 = Instant::now();
        let mut s = VerificationSession::new(cfg());
        s.handle_event(claim("0002"), t0);

        // Hours of ticks without a face: the claim phase has no deadline.
        for i in 0..1000u64 {
            assert!(s
                .handle_event(SessionEvent::Tick, t0 + secs(i * 10))
                .is_none());
        }
        assert_eq!(s.phase(), SessionPhase::AwaitingFaceMatch);
    }

    #[test]
    fn non_matching_result_is_not_evidence() {
        let t0 = Instant::now();
        let mut s = VerificationSession::new(cfg());
        s.handle_event(claim("0002"), t0);
        let ev = SessionEvent::FaceMatched(MatchResult {
            user_id: "0003".to_string(),
            score: 0.2,
            is_match: false,
        });
        assert!(s.handle_event(ev, t0 + secs(1)).is_none());
        assert_eq!(s.phase(), SessionPhase::AwaitingFaceMatch);
    }

    #[test]
    fn remaining_counts_down() {
        let t0 = Instant::now();
        let mut s = VerificationSession::new(cfg());
        assert!(s.remaining(t0).is_none());
        s.handle_event(claim("0002"), t0);
        s.handle_event(matched("0002", 0.7), t0);
        assert_eq!(s.remaining(t0 + secs(4)), Some(secs(6)));
        assert_eq!(s.remaining(t0 + secs(30)), Some(secs(0)));
    }
}
