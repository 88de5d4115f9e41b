//! Recognition session: the state machine and the tick scheduler.
//!
//! One session owns one pipeline. Camera and scheduler resources are
//! acquired by `start_*` and released by `stop_*`; teardown is RAII — when
//! the session drops, the engine channel closes (releasing the source) and
//! the scheduler task sees its stop channel close and exits.

use crate::engine::{self, EngineError, EngineHandle};
use crate::publisher::Publisher;
use crate::source::CapabilityFactory;
use crate::stats::{StatisticsSnapshot, StatsAggregator};
use glance_core::{FrameResult, GallerySnapshot, MatcherConfig};
use std::sync::{Arc, Mutex};
use std::time::{Duration, Instant};
use thiserror::Error;
use tokio::sync::{broadcast, oneshot, watch};
use tokio::task::JoinHandle;
use tokio::time::MissedTickBehavior;

#[derive(Error, Debug)]
pub enum SessionError {
    #[error("device unavailable: {0}")]
    DeviceUnavailable(#[from] crate::source::SourceError),
    #[error("precondition not met: {0}")]
    PreconditionNotMet(String),
}

/// Scheduler knobs, usually derived from [`crate::config::Config`].
#[derive(Debug, Clone)]
pub struct SessionConfig {
    /// Target tick period while recognizing.
    pub tick_period: Duration,
    /// Statistics window length.
    pub stats_window: Duration,
    pub matcher: MatcherConfig,
    /// Consecutive tick failures before DetectionDegraded is raised.
    pub failure_threshold: u32,
}

impl Default for SessionConfig {
    fn default() -> Self {
        Self {
            tick_period: Duration::from_millis(500),
            stats_window: Duration::from_secs(1),
            matcher: MatcherConfig::default(),
            failure_threshold: 3,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SessionState {
    Idle,
    CameraReady,
    Recognizing,
}

struct SchedulerHandle {
    stop_tx: watch::Sender<bool>,
    task: JoinHandle<()>,
}

impl SchedulerHandle {
    /// Stop before the next tick without waiting for an in-flight detection:
    /// aborting the task drops the in-flight reply receiver, so a late
    /// result is discarded unpublished.
    fn shutdown(self) {
        let _ = self.stop_tx.send(true);
        self.task.abort();
    }
}

struct Inner {
    state: SessionState,
    engine: Option<EngineHandle>,
    detector_installed: bool,
    scheduler: Option<SchedulerHandle>,
}

/// One recognition pipeline: camera lifecycle, periodic scheduling, result
/// delivery. Methods are synchronous but must be called inside a tokio
/// runtime (the scheduler is a spawned task).
pub struct Session {
    config: SessionConfig,
    factory: Box<dyn CapabilityFactory>,
    publisher: Arc<Publisher>,
    snapshot_rx: watch::Receiver<Arc<GallerySnapshot>>,
    stats: Arc<Mutex<StatsAggregator>>,
    inner: Mutex<Inner>,
}

impl Session {
    pub fn new(
        config: SessionConfig,
        factory: Box<dyn CapabilityFactory>,
        snapshot_rx: watch::Receiver<Arc<GallerySnapshot>>,
        publisher: Arc<Publisher>,
    ) -> Self {
        let stats = Arc::new(Mutex::new(StatsAggregator::new(config.stats_window)));
        Self {
            config,
            factory,
            publisher,
            snapshot_rx,
            stats,
            inner: Mutex::new(Inner {
                state: SessionState::Idle,
                engine: None,
                detector_installed: false,
                scheduler: None,
            }),
        }
    }

    pub fn state(&self) -> SessionState {
        self.inner.lock().expect("session lock poisoned").state
    }

    pub fn subscribe(&self) -> broadcast::Receiver<crate::publisher::Event> {
        self.publisher.subscribe()
    }

    /// Most recent frame results, oldest first.
    pub fn history(&self) -> Vec<FrameResult> {
        self.publisher.history()
    }

    pub fn latest_stats(&self) -> StatisticsSnapshot {
        self.publisher.latest_stats()
    }

    /// Acquire the camera: Idle → CameraReady.
    pub fn start_camera(&self) -> Result<(), SessionError> {
        let mut inner = self.inner.lock().expect("session lock poisoned");
        if inner.state != SessionState::Idle {
            return Err(SessionError::PreconditionNotMet(format!(
                "start_camera requires Idle, session is {:?}",
                inner.state
            )));
        }

        let source = self.factory.open_source()?;
        inner.engine = Some(engine::spawn_engine(source));
        inner.detector_installed = false;
        inner.state = SessionState::CameraReady;
        tracing::info!("camera acquired");
        Ok(())
    }

    /// Release everything: any state → Idle. Stops recognition if active.
    pub fn stop_camera(&self) {
        let mut inner = self.inner.lock().expect("session lock poisoned");
        if let Some(scheduler) = inner.scheduler.take() {
            scheduler.shutdown();
        }
        // Dropping the last engine handle closes the request channel; the
        // engine thread exits and the source is released.
        inner.engine = None;
        inner.detector_installed = false;
        if inner.state != SessionState::Idle {
            tracing::info!("camera released");
        }
        inner.state = SessionState::Idle;
    }

    /// Start the periodic pipeline: CameraReady → Recognizing.
    pub fn start_recognition(&self) -> Result<(), SessionError> {
        let mut inner = self.inner.lock().expect("session lock poisoned");
        if inner.state != SessionState::CameraReady {
            return Err(SessionError::PreconditionNotMet(format!(
                "start_recognition requires CameraReady, session is {:?}",
                inner.state
            )));
        }
        let engine = inner
            .engine
            .clone()
            .ok_or_else(|| SessionError::PreconditionNotMet("no capture engine".into()))?;

        if !inner.detector_installed {
            let detector = self.factory.load_detector().map_err(|err| {
                SessionError::PreconditionNotMet(format!("detection capability unready: {err}"))
            })?;
            engine.install_detector(detector).map_err(|err| {
                SessionError::PreconditionNotMet(format!("capture engine unavailable: {err}"))
            })?;
            inner.detector_installed = true;
        }

        let (stop_tx, stop_rx) = watch::channel(false);
        let task = tokio::spawn(run_scheduler(
            self.config.clone(),
            engine,
            self.snapshot_rx.clone(),
            Arc::clone(&self.stats),
            Arc::clone(&self.publisher),
            stop_rx,
        ));
        inner.scheduler = Some(SchedulerHandle { stop_tx, task });
        inner.state = SessionState::Recognizing;
        tracing::info!(
            period_ms = self.config.tick_period.as_millis() as u64,
            "recognition started"
        );
        Ok(())
    }

    /// Stop the pipeline: Recognizing → CameraReady.
    ///
    /// Takes effect before the next tick. An in-flight detection is not
    /// waited for; its result, if it arrives late, is discarded unpublished.
    pub fn stop_recognition(&self) -> Result<(), SessionError> {
        let mut inner = self.inner.lock().expect("session lock poisoned");
        if inner.state != SessionState::Recognizing {
            return Err(SessionError::PreconditionNotMet(format!(
                "stop_recognition requires Recognizing, session is {:?}",
                inner.state
            )));
        }
        if let Some(scheduler) = inner.scheduler.take() {
            scheduler.shutdown();
        }
        inner.state = SessionState::CameraReady;
        tracing::info!("recognition stopped");
        Ok(())
    }
}

/// The tick loop. Runs until stopped; owns no resources beyond channel
/// handles, so aborting it is safe at any await point.
async fn run_scheduler(
    config: SessionConfig,
    engine: EngineHandle,
    snapshot_rx: watch::Receiver<Arc<GallerySnapshot>>,
    stats: Arc<Mutex<StatsAggregator>>,
    publisher: Arc<Publisher>,
    mut stop_rx: watch::Receiver<bool>,
) {
    let mut ticker = tokio::time::interval(config.tick_period);
    ticker.set_missed_tick_behavior(MissedTickBehavior::Skip);

    let mut in_flight: Option<oneshot::Receiver<Result<FrameResult, EngineError>>> = None;
    let mut consecutive_failures = 0u32;
    let mut degraded_signaled = false;

    loop {
        tokio::select! {
            // Stop requested, or the session was torn down.
            _ = stop_rx.changed() => break,

            outcome = async { in_flight.as_mut().expect("guarded by branch condition").await },
                if in_flight.is_some() =>
            {
                in_flight = None;
                match outcome {
                    Ok(Ok(frame)) => {
                        consecutive_failures = 0;
                        degraded_signaled = false;
                        let flushed = {
                            let mut stats = stats.lock().expect("stats lock poisoned");
                            stats.record(&frame);
                            stats.flush_if_due(Instant::now())
                        };
                        publisher.publish_frame(frame);
                        if let Some(snapshot) = flushed {
                            publisher.publish_stats(snapshot);
                        }
                    }
                    Ok(Err(err)) => {
                        consecutive_failures += 1;
                        if err.is_contract_violation() {
                            tracing::error!(error = %err, "tick failed on comparator contract");
                        } else {
                            tracing::warn!(
                                error = %err,
                                failures = consecutive_failures,
                                "detection tick failed"
                            );
                        }
                        if consecutive_failures >= config.failure_threshold && !degraded_signaled {
                            degraded_signaled = true;
                            publisher.publish_degraded(consecutive_failures);
                        }
                    }
                    Err(_) => {
                        tracing::error!("capture engine dropped an in-flight tick; stopping scheduler");
                        break;
                    }
                }
            }

            _ = ticker.tick() => {
                if in_flight.is_some() {
                    // Backpressure: drop this tick rather than queue behind
                    // a slow detector.
                    tracing::debug!("previous tick still in flight; skipping");
                    continue;
                }
                let snapshot = snapshot_rx.borrow().clone();
                match engine.dispatch_tick(snapshot, config.matcher) {
                    Ok(reply) => in_flight = Some(reply),
                    Err(err) => {
                        tracing::error!(error = %err, "capture engine unavailable; stopping scheduler");
                        break;
                    }
                }
            }
        }
    }
}
