//! Per-frame matching of detected faces against a gallery snapshot.

use crate::compare::{self, CompareError, DEFAULT_DISTANCE_MAX, DEFAULT_MATCH_THRESHOLD};
use crate::gallery::GallerySnapshot;
use crate::types::{DetectedFace, FrameResult, MatchResult, MatchedIdentity};
use chrono::Utc;

/// Calibration pair for match decisions. The two values travel together:
/// both are calibrated against the same distance metric.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct MatcherConfig {
    /// Distances strictly below this are matches.
    pub threshold: f32,
    /// Distance at which confidence reaches zero.
    pub distance_max: f32,
}

impl Default for MatcherConfig {
    fn default() -> Self {
        Self {
            threshold: DEFAULT_MATCH_THRESHOLD,
            distance_max: DEFAULT_DISTANCE_MAX,
        }
    }
}

/// Match every detected face in one frame against `snapshot`.
///
/// Pure given its inputs — no shared mutable state — so concurrent calls
/// against the same snapshot are safe. An empty detection list yields an
/// empty FrameResult, not an error.
pub fn match_frame(
    detections: Vec<DetectedFace>,
    snapshot: &GallerySnapshot,
    config: &MatcherConfig,
) -> Result<FrameResult, CompareError> {
    let mut results = Vec::with_capacity(detections.len());
    for face in detections {
        let (nearest, distance) = snapshot.nearest(&face.embedding)?;
        let matched = nearest
            .filter(|_| compare::is_match(distance, config.threshold))
            .map(|identity| MatchedIdentity {
                id: identity.id,
                name: identity.name.clone(),
            });
        results.push(MatchResult {
            face,
            matched,
            distance,
            confidence: compare::confidence(distance, config.distance_max),
        });
    }

    Ok(FrameResult {
        timestamp: Utc::now(),
        results,
        snapshot_version: snapshot.version(),
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::{BoundingBox, Embedding, Identity};
    use uuid::Uuid;

    fn detection(values: &[f32]) -> DetectedFace {
        DetectedFace {
            bbox: BoundingBox {
                x: 10.0,
                y: 20.0,
                width: 64.0,
                height: 64.0,
            },
            embedding: Embedding::new(values.to_vec()),
        }
    }

    fn enrolled(name: &str, values: &[f32]) -> Identity {
        Identity {
            id: Uuid::new_v4(),
            name: name.to_string(),
            embedding: Embedding::new(values.to_vec()),
            enrolled_at: Utc::now(),
        }
    }

    #[test]
    fn test_empty_detections_yield_empty_result() {
        let snapshot = GallerySnapshot::build(vec![enrolled("alice", &[1.0, 0.0])]);
        let frame = match_frame(Vec::new(), &snapshot, &MatcherConfig::default()).unwrap();
        assert!(frame.results.is_empty());
        assert_eq!(frame.snapshot_version, snapshot.version());
        assert_eq!(frame.matched_count(), 0);
    }

    #[test]
    fn test_alice_within_threshold_matches_with_expected_confidence() {
        // Probe at cosine distance 0.2 from Alice: cos = 0.8 for unit
        // vectors [1, 0] and [0.8, 0.6].
        let alice = enrolled("Alice", &[1.0, 0.0]);
        let alice_id = alice.id;
        let snapshot = GallerySnapshot::build(vec![alice]);

        let frame = match_frame(
            vec![detection(&[0.8, 0.6])],
            &snapshot,
            &MatcherConfig {
                threshold: 0.6,
                distance_max: 0.6,
            },
        )
        .unwrap();

        let result = &frame.results[0];
        let matched = result.matched.as_ref().unwrap();
        assert_eq!(matched.id, alice_id);
        assert_eq!(matched.name, "Alice");
        assert!((result.distance - 0.2).abs() < 1e-5);
        // (1 - 0.2/0.6) * 100 = 66.67
        assert!((result.confidence - 200.0 / 3.0).abs() < 1e-2);
        assert_eq!(frame.matched_count(), 1);
    }

    #[test]
    fn test_distance_at_threshold_is_not_a_match() {
        // Orthogonal probe: distance 1.0, above the 0.6 threshold.
        let snapshot = GallerySnapshot::build(vec![enrolled("alice", &[1.0, 0.0])]);
        let frame = match_frame(
            vec![detection(&[0.0, 1.0])],
            &snapshot,
            &MatcherConfig::default(),
        )
        .unwrap();

        let result = &frame.results[0];
        assert!(result.matched.is_none());
        assert!((result.distance - 1.0).abs() < 1e-6);
        assert_eq!(result.confidence, 0.0);
    }

    #[test]
    fn test_empty_gallery_never_matches() {
        let snapshot = GallerySnapshot::empty();
        let frame = match_frame(
            vec![detection(&[1.0, 0.0])],
            &snapshot,
            &MatcherConfig::default(),
        )
        .unwrap();

        let result = &frame.results[0];
        assert!(result.matched.is_none());
        assert_eq!(result.distance, f32::INFINITY);
        assert_eq!(result.confidence, 0.0);
    }

    #[test]
    fn test_dimension_mismatch_fails_the_frame() {
        let snapshot = GallerySnapshot::build(vec![enrolled("alice", &[1.0, 0.0, 0.0])]);
        let err = match_frame(
            vec![detection(&[1.0, 0.0])],
            &snapshot,
            &MatcherConfig::default(),
        )
        .unwrap_err();
        assert!(matches!(err, CompareError::DimensionMismatch { .. }));
    }

    #[test]
    fn test_multiple_detections_matched_independently() {
        let snapshot = GallerySnapshot::build(vec![
            enrolled("alice", &[1.0, 0.0]),
            enrolled("bob", &[0.0, 1.0]),
        ]);
        let frame = match_frame(
            vec![detection(&[0.99, 0.01]), detection(&[0.01, 0.99])],
            &snapshot,
            &MatcherConfig::default(),
        )
        .unwrap();

        assert_eq!(frame.results.len(), 2);
        assert_eq!(frame.results[0].matched.as_ref().unwrap().name, "alice");
        assert_eq!(frame.results[1].matched.as_ref().unwrap().name, "bob");
        assert_eq!(frame.matched_count(), 2);
    }
}
