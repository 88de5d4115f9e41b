use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// Default embedding dimensionality. Fixed system-wide: the first enrollment
/// pins the gallery's dimensionality and every comparison validates it.
pub const DEFAULT_EMBEDDING_DIM: usize = 128;

/// Bounding box for a detected face, in source-frame pixel coordinates.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct BoundingBox {
    pub x: f32,
    pub y: f32,
    pub width: f32,
    pub height: f32,
}

/// Face embedding vector. Immutable once produced by the extractor.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Embedding {
    pub values: Vec<f32>,
}

impl Embedding {
    pub fn new(values: Vec<f32>) -> Self {
        Self { values }
    }

    /// Number of dimensions.
    pub fn dim(&self) -> usize {
        self.values.len()
    }
}

/// An enrolled identity. Owned by the gallery; never mutated after
/// enrollment, removed only by explicit deletion.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Identity {
    pub id: Uuid,
    pub name: String,
    pub embedding: Embedding,
    pub enrolled_at: DateTime<Utc>,
}

/// One face found by the external detector in a single frame.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DetectedFace {
    pub bbox: BoundingBox,
    pub embedding: Embedding,
}

/// Identity reference carried in match results. Embeddings stay in the
/// gallery; only id and name travel with published events.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct MatchedIdentity {
    pub id: Uuid,
    pub name: String,
}

/// Outcome of matching one detected face against a gallery snapshot.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MatchResult {
    pub face: DetectedFace,
    /// `None` iff no gallery identity's distance fell below the threshold.
    pub matched: Option<MatchedIdentity>,
    /// Cosine distance to the nearest identity; +inf for an empty gallery.
    pub distance: f32,
    /// Derived from `distance`, always recomputed, always in [0, 100].
    pub confidence: f32,
}

/// All match results for one detection frame.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct FrameResult {
    pub timestamp: DateTime<Utc>,
    pub results: Vec<MatchResult>,
    /// Version of the gallery snapshot this frame was matched against.
    pub snapshot_version: u64,
}

impl FrameResult {
    /// Number of detections that matched an enrolled identity.
    pub fn matched_count(&self) -> usize {
        self.results.iter().filter(|r| r.matched.is_some()).count()
    }
}
