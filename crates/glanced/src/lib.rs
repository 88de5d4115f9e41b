//! glanced — the Glance recognition daemon.
//!
//! Drives the capture→detect→match→publish pipeline: a state-machined
//! session schedules periodic ticks with skip-if-busy backpressure, a
//! dedicated worker thread runs detection off the scheduler, a watcher keeps
//! an immutable gallery snapshot fresh, and results fan out through a
//! non-blocking publisher.

pub mod config;
pub mod engine;
pub mod gallery;
pub mod publisher;
pub mod session;
pub mod source;
pub mod stats;

pub use config::Config;
pub use gallery::GalleryWatcher;
pub use publisher::{Event, Publisher};
pub use session::{Session, SessionConfig, SessionError, SessionState};
pub use source::{CapabilityFactory, DetectorError, FaceDetector, Frame, FrameSource, SourceError};
pub use stats::StatisticsSnapshot;
