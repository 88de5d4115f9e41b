//! External capture capabilities: the frame source and detector traits the
//! pipeline consumes, plus the deterministic synthetic stack used for
//! bring-up and integration tests.
//!
//! Camera drivers and model inference are deployment concerns; anything that
//! can hand out frames and detections plugs in behind these traits.

use glance_core::{BoundingBox, DetectedFace, Embedding, DEFAULT_EMBEDDING_DIM};
use std::time::Instant;
use thiserror::Error;

#[derive(Error, Debug)]
pub enum SourceError {
    #[error("device not found: {0}")]
    DeviceNotFound(String),
    #[error("device busy")]
    DeviceBusy,
    #[error("capture failed: {0}")]
    CaptureFailed(String),
}

#[derive(Error, Debug)]
pub enum DetectorError {
    #[error("model not ready")]
    ModelUnready,
    #[error("inference failed: {0}")]
    InferenceFailed(String),
}

/// A decoded camera frame as delivered by the external source.
#[derive(Clone)]
pub struct Frame {
    /// Grayscale pixel data (width * height bytes).
    pub data: Vec<u8>,
    pub width: u32,
    pub height: u32,
    pub captured_at: Instant,
    pub sequence: u64,
}

/// Live frame supplier. `Ok(None)` means the source is healthy but has no
/// frame to hand out right now (inactive or starved).
pub trait FrameSource: Send {
    fn next_frame(&mut self) -> Result<Option<Frame>, SourceError>;
}

/// Face detection and embedding extraction over one frame.
pub trait FaceDetector: Send {
    /// Returns `DetectorError::ModelUnready` until warm-up completes; the
    /// scheduler retries on subsequent ticks.
    fn detect(&mut self, frame: &Frame) -> Result<Vec<DetectedFace>, DetectorError>;
}

/// How a deployment wires its capture stack into a session. Consulted on
/// `start_camera` for the source and on the first `start_recognition` for
/// the detector.
pub trait CapabilityFactory: Send + Sync {
    fn open_source(&self) -> Result<Box<dyn FrameSource>, SourceError>;
    fn load_detector(&self) -> Result<Box<dyn FaceDetector>, DetectorError>;
}

// --- Synthetic stack ---

/// Deterministic frame generator: flat mid-gray frames with a running
/// sequence number.
pub struct SyntheticSource {
    width: u32,
    height: u32,
    sequence: u64,
}

impl SyntheticSource {
    pub fn new(width: u32, height: u32) -> Self {
        Self {
            width,
            height,
            sequence: 0,
        }
    }
}

impl FrameSource for SyntheticSource {
    fn next_frame(&mut self) -> Result<Option<Frame>, SourceError> {
        self.sequence += 1;
        Ok(Some(Frame {
            data: vec![128u8; (self.width * self.height) as usize],
            width: self.width,
            height: self.height,
            captured_at: Instant::now(),
            sequence: self.sequence,
        }))
    }
}

/// Deterministic detector: one centered face per frame whose embedding
/// direction is derived from the frame sequence, after an optional warm-up
/// during which it reports `ModelUnready`.
pub struct SyntheticDetector {
    dim: usize,
    warmup_remaining: u32,
}

impl SyntheticDetector {
    pub fn new(dim: usize) -> Self {
        Self::with_warmup(dim, 0)
    }

    pub fn with_warmup(dim: usize, warmup: u32) -> Self {
        Self {
            dim: dim.max(1),
            warmup_remaining: warmup,
        }
    }
}

impl FaceDetector for SyntheticDetector {
    fn detect(&mut self, frame: &Frame) -> Result<Vec<DetectedFace>, DetectorError> {
        if self.warmup_remaining > 0 {
            self.warmup_remaining -= 1;
            return Err(DetectorError::ModelUnready);
        }

        let mut values = vec![0.0f32; self.dim];
        values[(frame.sequence as usize) % self.dim] = 1.0;

        Ok(vec![DetectedFace {
            bbox: BoundingBox {
                x: frame.width as f32 / 4.0,
                y: frame.height as f32 / 4.0,
                width: frame.width as f32 / 2.0,
                height: frame.height as f32 / 2.0,
            },
            embedding: Embedding::new(values),
        }])
    }
}

/// Factory wiring the synthetic source and detector into a session. Real
/// deployments replace this with their camera/model stack.
pub struct SyntheticStack {
    pub width: u32,
    pub height: u32,
    pub embedding_dim: usize,
    pub detector_warmup: u32,
}

impl Default for SyntheticStack {
    fn default() -> Self {
        Self {
            width: 640,
            height: 360,
            embedding_dim: DEFAULT_EMBEDDING_DIM,
            detector_warmup: 0,
        }
    }
}

impl CapabilityFactory for SyntheticStack {
    fn open_source(&self) -> Result<Box<dyn FrameSource>, SourceError> {
        Ok(Box::new(SyntheticSource::new(self.width, self.height)))
    }

    fn load_detector(&self) -> Result<Box<dyn FaceDetector>, DetectorError> {
        Ok(Box::new(SyntheticDetector::with_warmup(
            self.embedding_dim,
            self.detector_warmup,
        )))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_synthetic_source_sequences_frames() {
        let mut source = SyntheticSource::new(4, 2);
        let first = source.next_frame().unwrap().unwrap();
        let second = source.next_frame().unwrap().unwrap();
        assert_eq!(first.sequence, 1);
        assert_eq!(second.sequence, 2);
        assert_eq!(first.data.len(), 8);
    }

    #[test]
    fn test_synthetic_detector_warmup_then_detects() {
        let mut source = SyntheticSource::new(4, 4);
        let mut detector = SyntheticDetector::with_warmup(8, 2);

        let frame = source.next_frame().unwrap().unwrap();
        assert!(matches!(
            detector.detect(&frame),
            Err(DetectorError::ModelUnready)
        ));
        assert!(matches!(
            detector.detect(&frame),
            Err(DetectorError::ModelUnready)
        ));

        let faces = detector.detect(&frame).unwrap();
        assert_eq!(faces.len(), 1);
        assert_eq!(faces[0].embedding.dim(), 8);
    }

    #[test]
    fn test_synthetic_detector_is_deterministic() {
        let mut source = SyntheticSource::new(4, 4);
        let frame = source.next_frame().unwrap().unwrap();

        let mut a = SyntheticDetector::new(16);
        let mut b = SyntheticDetector::new(16);
        assert_eq!(
            a.detect(&frame).unwrap()[0].embedding,
            b.detect(&frame).unwrap()[0].embedding
        );
    }
}
