//! glance-core — the real-time face-matching core.
//!
//! Pure matching logic with no I/O: embedding comparison, immutable gallery
//! snapshots, and per-frame matching. Capture, scheduling, and persistence
//! live in the `glanced` and `glance-store` crates.

pub mod compare;
pub mod gallery;
pub mod matcher;
pub mod types;

pub use compare::{CompareError, DEFAULT_DISTANCE_MAX, DEFAULT_MATCH_THRESHOLD};
pub use gallery::GallerySnapshot;
pub use matcher::{match_frame, MatcherConfig};
pub use types::{
    BoundingBox, DetectedFace, Embedding, FrameResult, Identity, MatchResult, MatchedIdentity,
    DEFAULT_EMBEDDING_DIM,
};
