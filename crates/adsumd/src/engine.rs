use std::sync::{Arc, Mutex, PoisonError};
use std::time::{Duration, Instant};

use thiserror::Error;
use tokio::sync::{mpsc, oneshot};

use adsum_core::extract::ExtractorError;
use adsum_core::{
    CosineMatcher, DecisionRecord, Embedding, EnrolledIdentity, Matcher, SessionEvent,
    SessionPhase, VerificationSession, VerifyConfig,
};

use crate::lockout::AttemptLockout;
use crate::pipeline::CapturePipeline;

#[derive(Error, Debug)]
pub enum EngineError {
    #[error("capture error: {0}")]
    Capture(#[from] ExtractorError),
    #[error("no usable face in any captured frame")]
    NoFaceDetected,
    #[error("collected {collected} enrollment sample(s), need {required}")]
    InsufficientSamples { collected: usize, required: usize },
    #[error("engine thread exited")]
    ChannelClosed,
}

/// Result of one check-in attempt.
#[derive(Debug)]
pub enum CheckInOutcome {
    /// The session reached a terminal condition and produced its record.
    /// The record is not yet persisted — that is the caller's step, so a
    /// storage failure can be surfaced before anything is acknowledged.
    Decided(DecisionRecord),
    /// The attempt was abandoned with no record (no claim within the
    /// operator window, or the claimed identity is locked out).
    Cancelled { reason: String },
}

/// Result of an enrollment capture.
#[derive(Debug)]
pub struct EnrollResult {
    /// Ordered reference embeddings, one per usable sample frame.
    pub references: Vec<Embedding>,
    /// Mean detector confidence over the collected samples.
    pub mean_quality: f32,
}

/// Messages sent from D-Bus handlers to the engine thread.
enum EngineRequest {
    Enroll {
        reply: oneshot::Sender<Result<EnrollResult, EngineError>>,
    },
    CheckIn {
        roster: Vec<EnrolledIdentity>,
        reply: oneshot::Sender<Result<CheckInOutcome, EngineError>>,
    },
}

/// Clone-safe handle to the engine thread.
#[derive(Clone)]
pub struct EngineHandle {
    tx: mpsc::Sender<EngineRequest>,
}

impl EngineHandle {
    /// Request enrollment: capture frames, collect single-face embedding
    /// samples.
    pub async fn enroll(&self) -> Result<EnrollResult, EngineError> {
        let (reply_tx, reply_rx) = oneshot::channel();
        self.tx
            .send(EngineRequest::Enroll { reply: reply_tx })
            .await
            .map_err(|_| EngineError::ChannelClosed)?;
        reply_rx.await.map_err(|_| EngineError::ChannelClosed)?
    }

    /// Request one check-in attempt against the given roster.
    pub async fn check_in(
        &self,
        roster: Vec<EnrolledIdentity>,
    ) -> Result<CheckInOutcome, EngineError> {
        let (reply_tx, reply_rx) = oneshot::channel();
        self.tx
            .send(EngineRequest::CheckIn {
                roster,
                reply: reply_tx,
            })
            .await
            .map_err(|_| EngineError::ChannelClosed)?;
        reply_rx.await.map_err(|_| EngineError::ChannelClosed)?
    }
}

/// Engine tunables beyond the core verification config.
#[derive(Debug, Clone)]
pub struct EngineSettings {
    pub verify: VerifyConfig,
    /// Whole-attempt window: no identity claim within this duration cancels
    /// the check-in with no record.
    pub checkin_timeout: Duration,
    pub enroll_sample_count: usize,
    pub enroll_frame_budget: usize,
}

/// Spawn the engine on a dedicated OS thread.
///
/// The thread owns the capture pipeline exclusively; one verification
/// attempt is active at a time by construction.
pub fn spawn_engine(
    mut pipeline: Box<dyn CapturePipeline>,
    settings: EngineSettings,
    lockout: Arc<Mutex<AttemptLockout>>,
) -> EngineHandle {
    let (tx, mut rx) = mpsc::channel::<EngineRequest>(4);

    std::thread::Builder::new()
        .name("adsum-engine".into())
        .spawn(move || {
            tracing::info!("engine thread started");
            while let Some(req) = rx.blocking_recv() {
                match req {
                    EngineRequest::Enroll { reply } => {
                        let result = run_enroll(
                            pipeline.as_mut(),
                            settings.enroll_sample_count,
                            settings.enroll_frame_budget,
                        );
                        let _ = reply.send(result);
                    }
                    EngineRequest::CheckIn { roster, reply } => {
                        let result = run_check_in(pipeline.as_mut(), &settings, &roster, &lockout);
                        let _ = reply.send(result);
                    }
                }
            }
            tracing::info!("engine thread exiting");
        })
        .expect("failed to spawn engine thread");

    EngineHandle { tx }
}

/// Drive one verification session from the capture pipeline.
///
/// Every frame advances the clock (deadline expiry cannot depend on a
/// particular evidence frame arriving); QR, face-match and liveness work
/// runs only on its sampled frames.
fn run_check_in(
    pipeline: &mut dyn CapturePipeline,
    settings: &EngineSettings,
    roster: &[EnrolledIdentity],
    lockout: &Mutex<AttemptLockout>,
) -> Result<CheckInOutcome, EngineError> {
    let config = settings.verify.clone().sanitized();
    let matcher = CosineMatcher::new(config.similarity_threshold);
    let mut session = VerificationSession::new(config.clone());
    let started = Instant::now();
    let mut frame_count: u64 = 0;

    loop {
        let frame = pipeline.capture_frame()?;
        frame_count += 1;
        let now = Instant::now();

        if session.phase() == SessionPhase::AwaitingClaim
            && now.duration_since(started) >= settings.checkin_timeout
        {
            tracing::info!(
                timeout_secs = settings.checkin_timeout.as_secs(),
                "no identity claim presented, attempt cancelled"
            );
            session.handle_event(SessionEvent::Cancelled, now);
            return Ok(CheckInOutcome::Cancelled {
                reason: "no identity claim presented".to_string(),
            });
        }

        // Clock poll first, every frame.
        if let Some(record) = session.handle_event(SessionEvent::Tick, now) {
            return Ok(CheckInOutcome::Decided(record));
        }

        match session.phase() {
            SessionPhase::AwaitingClaim => {
                // No face processing before the claim.
                if frame_count % u64::from(config.qr_sample_interval) == 0 {
                    if let Some(claim) = pipeline.scan(&frame) {
                        let gate = lock_unpoisoned(lockout).check(&claim);
                        if let Err(reason) = gate {
                            tracing::warn!(user = %claim, "claim refused, identity locked out");
                            session.handle_event(SessionEvent::Cancelled, now);
                            return Ok(CheckInOutcome::Cancelled { reason });
                        }
                        session.handle_event(SessionEvent::ClaimScanned(claim), now);
                    }
                }
            }
            SessionPhase::AwaitingFaceMatch | SessionPhase::Verifying => {
                let sample_face = frame_count % u64::from(config.face_sample_interval) == 0;
                let sample_liveness = session.phase() == SessionPhase::Verifying
                    && frame_count % u64::from(config.liveness_sample_interval) == 0;
                if !(sample_face || sample_liveness) {
                    continue;
                }

                let faces = pipeline.detect(&frame)?;
                // Exactly one face is usable evidence; zero or several means
                // this frame proves nothing.
                if faces.len() != 1 {
                    continue;
                }
                let face = &faces[0];

                if sample_face {
                    if let Some(m) = matcher.search(&face.embedding, roster) {
                        if let Some(record) =
                            session.handle_event(SessionEvent::FaceMatched(m), now)
                        {
                            return Ok(CheckInOutcome::Decided(record));
                        }
                    }
                }

                if sample_liveness && session.phase() == SessionPhase::Verifying {
                    let live = pipeline.signal(&frame, face)?;
                    if let Some(record) =
                        session.handle_event(SessionEvent::LivenessSignal(live), now)
                    {
                        return Ok(CheckInOutcome::Decided(record));
                    }
                }
            }
            SessionPhase::Decided => {
                // Terminal transitions all return above.
                unreachable!("decided session inside the frame loop");
            }
        }
    }
}

/// Capture frames until `sample_count` single-face embedding samples are
/// collected, scanning at most `frame_budget` frames.
fn run_enroll(
    pipeline: &mut dyn CapturePipeline,
    sample_count: usize,
    frame_budget: usize,
) -> Result<EnrollResult, EngineError> {
    let mut references = Vec::with_capacity(sample_count);
    let mut quality_sum = 0.0f32;

    for _ in 0..frame_budget {
        if references.len() >= sample_count {
            break;
        }
        let frame = pipeline.capture_frame()?;
        let faces = pipeline.detect(&frame)?;
        if faces.len() != 1 {
            continue;
        }
        let face = &faces[0];
        if face.embedding.validate().is_err() {
            tracing::warn!("extractor produced an invalid embedding, frame skipped");
            continue;
        }
        quality_sum += face.confidence;
        references.push(face.embedding.clone());
    }

    if references.is_empty() {
        return Err(EngineError::NoFaceDetected);
    }
    if references.len() < sample_count {
        return Err(EngineError::InsufficientSamples {
            collected: references.len(),
            required: sample_count,
        });
    }

    let mean_quality = quality_sum / references.len() as f32;
    tracing::info!(
        samples = references.len(),
        mean_quality,
        "enrollment samples collected"
    );
    Ok(EnrollResult {
        references,
        mean_quality,
    })
}

fn lock_unpoisoned<T>(mutex: &Mutex<T>) -> std::sync::MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(PoisonError::into_inner)
}
