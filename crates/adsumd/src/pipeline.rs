//! Capture pipeline wiring.
//!
//! A pipeline bundles the four external-collaborator traits the decision
//! engine is driven by: frame source, face extractor, liveness probe and QR
//! scanner. Camera/inference backends ship as deployment integrations and
//! register here by name; the built-in `disconnected` backend delivers
//! evidence-free frames so a headless daemon still serves its D-Bus
//! interface and check-ins terminate by claim timeout.

use std::time::Duration;

use thiserror::Error;

use adsum_core::extract::{
    DetectedFace, ExtractorError, FaceExtractor, Frame, FrameSource, LivenessProbe, QrScanner,
};

use crate::config::Config;

#[derive(Error, Debug)]
pub enum PipelineError {
    #[error("unknown capture backend: {0}")]
    UnknownBackend(String),
}

/// The full evidence pipeline for one camera position.
pub trait CapturePipeline:
    FrameSource + FaceExtractor + LivenessProbe + QrScanner + Send
{
}

impl<T> CapturePipeline for T where
    T: FrameSource + FaceExtractor + LivenessProbe + QrScanner + Send
{
}

/// Build the pipeline named by the configuration.
pub fn from_config(config: &Config) -> Result<Box<dyn CapturePipeline>, PipelineError> {
    match config.capture_backend.as_str() {
        "disconnected" => Ok(Box::new(DisconnectedPipeline::new())),
        other => Err(PipelineError::UnknownBackend(other.to_string())),
    }
}

/// Evidence-free pipeline: black frames at ~30 fps, no faces, no QR codes.
pub struct DisconnectedPipeline {
    frame_interval: Duration,
}

impl DisconnectedPipeline {
    pub fn new() -> Self {
        Self {
            frame_interval: Duration::from_millis(33),
        }
    }
}

impl Default for DisconnectedPipeline {
    fn default() -> Self {
        Self::new()
    }
}

impl FrameSource for DisconnectedPipeline {
    fn capture_frame(&mut self) -> Result<Frame, ExtractorError> {
        // Pace like a camera would, so the engine loop does not spin.
        std::thread::sleep(self.frame_interval);
        Ok(Frame {
            data: Vec::new(),
            width: 640,
            height: 480,
        })
    }
}

impl FaceExtractor for DisconnectedPipeline {
    fn detect(&mut self, _frame: &Frame) -> Result<Vec<DetectedFace>, ExtractorError> {
        Ok(Vec::new())
    }
}

impl LivenessProbe for DisconnectedPipeline {
    fn signal(&mut self, _frame: &Frame, _face: &DetectedFace) -> Result<bool, ExtractorError> {
        Ok(false)
    }
}

impl QrScanner for DisconnectedPipeline {
    fn scan(&mut self, _frame: &Frame) -> Option<String> {
        None
    }
}
