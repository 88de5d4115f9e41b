//! Capture engine: a dedicated OS thread owning the frame source and
//! detector, so model inference never blocks the scheduler. The scheduler
//! enforces at-most-one-in-flight via its skip-if-busy rule; the engine
//! simply services one request after another.

use crate::source::{DetectorError, FaceDetector, FrameSource, SourceError};
use glance_core::{match_frame, CompareError, FrameResult, GallerySnapshot, MatcherConfig};
use std::sync::Arc;
use thiserror::Error;
use tokio::sync::{mpsc, oneshot};

#[derive(Error, Debug)]
pub enum EngineError {
    #[error("frame source error: {0}")]
    Source(#[from] SourceError),
    #[error("frame source inactive: no frame available")]
    NoFrame,
    #[error("detector error: {0}")]
    Detector(#[from] DetectorError),
    #[error("no detector installed")]
    DetectorMissing,
    #[error("comparator contract violation: {0}")]
    Compare(#[from] CompareError),
    #[error("capture engine exited")]
    ChannelClosed,
}

impl EngineError {
    /// Dimension mismatches are integration bugs and get logged louder than
    /// transient capture hiccups.
    pub fn is_contract_violation(&self) -> bool {
        matches!(self, EngineError::Compare(_))
    }
}

/// Messages sent from the session to the engine thread.
enum EngineRequest {
    InstallDetector(Box<dyn FaceDetector>),
    Tick {
        snapshot: Arc<GallerySnapshot>,
        matcher: MatcherConfig,
        reply: oneshot::Sender<Result<FrameResult, EngineError>>,
    },
}

/// Clone-safe handle to the engine thread. Dropping every handle closes the
/// request channel; the thread drains, exits, and releases the source.
#[derive(Clone)]
pub struct EngineHandle {
    tx: mpsc::Sender<EngineRequest>,
}

impl EngineHandle {
    /// Install (or replace) the detector used by subsequent ticks.
    pub fn install_detector(&self, detector: Box<dyn FaceDetector>) -> Result<(), EngineError> {
        self.tx
            .try_send(EngineRequest::InstallDetector(detector))
            .map_err(|_| EngineError::ChannelClosed)
    }

    /// Dispatch one capture→detect→match cycle without waiting on it.
    ///
    /// The returned receiver resolves when the cycle completes. Dropping it
    /// discards the result — which is exactly how a stopped session abandons
    /// an in-flight tick.
    pub fn dispatch_tick(
        &self,
        snapshot: Arc<GallerySnapshot>,
        matcher: MatcherConfig,
    ) -> Result<oneshot::Receiver<Result<FrameResult, EngineError>>, EngineError> {
        let (reply_tx, reply_rx) = oneshot::channel();
        self.tx
            .try_send(EngineRequest::Tick {
                snapshot,
                matcher,
                reply: reply_tx,
            })
            .map_err(|_| EngineError::ChannelClosed)?;
        Ok(reply_rx)
    }
}

/// Spawn the engine on a dedicated OS thread owning `source`.
pub fn spawn_engine(source: Box<dyn FrameSource>) -> EngineHandle {
    let (tx, mut rx) = mpsc::channel::<EngineRequest>(4);

    std::thread::Builder::new()
        .name("glance-engine".into())
        .spawn(move || {
            tracing::info!("capture engine thread started");
            let mut source = source;
            let mut detector: Option<Box<dyn FaceDetector>> = None;
            while let Some(req) = rx.blocking_recv() {
                match req {
                    EngineRequest::InstallDetector(d) => {
                        detector = Some(d);
                        tracing::info!("detector installed");
                    }
                    EngineRequest::Tick {
                        snapshot,
                        matcher,
                        reply,
                    } => {
                        let result = match detector {
                            Some(ref mut d) => {
                                run_tick(source.as_mut(), Some(d.as_mut()), &snapshot, &matcher)
                            }
                            None => run_tick(source.as_mut(), None, &snapshot, &matcher),
                        };
                        // A dropped reply means the tick was abandoned by a
                        // stop or teardown; the late result is discarded.
                        let _ = reply.send(result);
                    }
                }
            }
            tracing::info!("capture engine thread exiting");
        })
        .expect("failed to spawn capture engine thread");

    EngineHandle { tx }
}

fn run_tick(
    source: &mut dyn FrameSource,
    detector: Option<&mut dyn FaceDetector>,
    snapshot: &GallerySnapshot,
    matcher: &MatcherConfig,
) -> Result<FrameResult, EngineError> {
    let detector = detector.ok_or(EngineError::DetectorMissing)?;
    let frame = source.next_frame()?.ok_or(EngineError::NoFrame)?;
    let detections = detector.detect(&frame)?;
    Ok(match_frame(detections, snapshot, matcher)?)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::source::Frame;
    use glance_core::{BoundingBox, DetectedFace, Embedding};
    use std::time::Instant;

    struct OneFrameSource {
        starve: bool,
    }

    impl FrameSource for OneFrameSource {
        fn next_frame(&mut self) -> Result<Option<Frame>, SourceError> {
            if self.starve {
                return Ok(None);
            }
            Ok(Some(Frame {
                data: vec![0u8; 4],
                width: 2,
                height: 2,
                captured_at: Instant::now(),
                sequence: 1,
            }))
        }
    }

    struct OneFaceDetector;

    impl FaceDetector for OneFaceDetector {
        fn detect(&mut self, _frame: &Frame) -> Result<Vec<DetectedFace>, DetectorError> {
            Ok(vec![DetectedFace {
                bbox: BoundingBox {
                    x: 0.0,
                    y: 0.0,
                    width: 2.0,
                    height: 2.0,
                },
                embedding: Embedding::new(vec![1.0, 0.0]),
            }])
        }
    }

    #[tokio::test]
    async fn test_tick_without_detector_fails() {
        let engine = spawn_engine(Box::new(OneFrameSource { starve: false }));
        let reply = engine
            .dispatch_tick(Arc::new(GallerySnapshot::empty()), MatcherConfig::default())
            .unwrap();
        let result = reply.await.unwrap();
        assert!(matches!(result, Err(EngineError::DetectorMissing)));
    }

    #[tokio::test]
    async fn test_tick_produces_frame_result() {
        let engine = spawn_engine(Box::new(OneFrameSource { starve: false }));
        engine.install_detector(Box::new(OneFaceDetector)).unwrap();

        let snapshot = Arc::new(GallerySnapshot::empty());
        let reply = engine
            .dispatch_tick(Arc::clone(&snapshot), MatcherConfig::default())
            .unwrap();
        let frame = reply.await.unwrap().unwrap();
        assert_eq!(frame.results.len(), 1);
        assert_eq!(frame.snapshot_version, snapshot.version());
    }

    #[tokio::test]
    async fn test_starved_source_reports_no_frame() {
        let engine = spawn_engine(Box::new(OneFrameSource { starve: true }));
        engine.install_detector(Box::new(OneFaceDetector)).unwrap();

        let reply = engine
            .dispatch_tick(Arc::new(GallerySnapshot::empty()), MatcherConfig::default())
            .unwrap();
        let result = reply.await.unwrap();
        assert!(matches!(result, Err(EngineError::NoFrame)));
    }
}
