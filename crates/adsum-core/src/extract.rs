//! Seams for the external collaborators: frame acquisition, face
//! detection/embedding extraction, liveness and QR decoding.
//!
//! The decision engine treats all four as black boxes. Implementations live
//! in capture/inference backends; the engine loop and the tests drive these
//! traits directly.

use thiserror::Error;

use crate::types::Embedding;

#[derive(Error, Debug)]
pub enum ExtractorError {
    #[error("extractor backend error: {0}")]
    Backend(String),
    #[error("frame source exhausted")]
    SourceExhausted,
}

/// One captured frame. The pixel layout is whatever the capture backend and
/// its paired extractors agreed on; the core never inspects it.
#[derive(Debug, Clone)]
pub struct Frame {
    pub data: Vec<u8>,
    pub width: u32,
    pub height: u32,
}

/// A face found in a frame, with its extracted embedding.
#[derive(Debug, Clone)]
pub struct DetectedFace {
    /// Bounding box as `[x1, y1, x2, y2]` in pixel coordinates.
    pub bbox: [f32; 4],
    /// Detector confidence in [0, 1].
    pub confidence: f32,
    pub embedding: Embedding,
}

/// Delivers frames at the camera's pace.
pub trait FrameSource {
    fn capture_frame(&mut self) -> Result<Frame, ExtractorError>;
}

/// Face detection plus embedding extraction.
///
/// Exactly one detected face is required for verification evidence; zero or
/// several faces is "nothing usable this frame", decided by the caller.
pub trait FaceExtractor {
    fn detect(&mut self, frame: &Frame) -> Result<Vec<DetectedFace>, ExtractorError>;
}

/// Per-frame liveness evaluation (blink / head-movement signals) for an
/// already-detected face.
pub trait LivenessProbe {
    fn signal(&mut self, frame: &Frame, face: &DetectedFace) -> Result<bool, ExtractorError>;
}

/// QR decoding for identity claims.
pub trait QrScanner {
    fn scan(&mut self, frame: &Frame) -> Option<String>;
}
