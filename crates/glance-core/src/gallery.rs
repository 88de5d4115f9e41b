//! Immutable, versioned gallery snapshots.

use crate::compare::{self, CompareError};
use crate::types::{Embedding, Identity};
use std::sync::atomic::{AtomicU64, Ordering};

/// Source of snapshot version numbers. Process-wide and monotonic, so a
/// `FrameResult`'s `snapshot_version` always identifies the newer of two
/// snapshots.
static NEXT_VERSION: AtomicU64 = AtomicU64::new(1);

/// A point-in-time view of the enrolled gallery.
///
/// Built once and never mutated; shared behind `Arc` between the update path
/// and any number of concurrent matching passes. Gallery changes always
/// produce a new snapshot that is swapped in between frames, so an in-flight
/// pass keeps seeing the snapshot it started with.
#[derive(Debug)]
pub struct GallerySnapshot {
    version: u64,
    identities: Vec<Identity>,
}

impl GallerySnapshot {
    /// Build a snapshot from the given identities, assigning the next
    /// version number. O(n).
    pub fn build(identities: Vec<Identity>) -> Self {
        let version = NEXT_VERSION.fetch_add(1, Ordering::Relaxed);
        tracing::debug!(version, identities = identities.len(), "built gallery snapshot");
        Self { version, identities }
    }

    /// An empty snapshot, for sessions starting before any enrollment.
    pub fn empty() -> Self {
        Self::build(Vec::new())
    }

    pub fn version(&self) -> u64 {
        self.version
    }

    pub fn len(&self) -> usize {
        self.identities.len()
    }

    pub fn is_empty(&self) -> bool {
        self.identities.is_empty()
    }

    pub fn identities(&self) -> &[Identity] {
        &self.identities
    }

    /// Nearest enrolled identity to `probe` by cosine distance.
    ///
    /// Scans every identity — linear by design at gallery sizes in the
    /// hundreds to low thousands; an ANN index can replace this behind the
    /// same contract. Ties resolve to the earliest `enrolled_at`, then the
    /// smallest id, so equal distances always pick the same identity.
    /// Returns `(None, +inf)` for an empty gallery.
    pub fn nearest(&self, probe: &Embedding) -> Result<(Option<&Identity>, f32), CompareError> {
        let mut best: Option<(&Identity, f32)> = None;
        for identity in &self.identities {
            let d = compare::distance(probe, &identity.embedding)?;
            best = Some(match best {
                None => (identity, d),
                Some((cur, cur_d)) => {
                    if d < cur_d
                        || (d == cur_d
                            && (identity.enrolled_at, identity.id) < (cur.enrolled_at, cur.id))
                    {
                        (identity, d)
                    } else {
                        (cur, cur_d)
                    }
                }
            });
        }

        Ok(match best {
            Some((identity, d)) => (Some(identity), d),
            None => (None, f32::INFINITY),
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::{TimeZone, Utc};
    use uuid::Uuid;

    fn identity(name: &str, values: &[f32], enrolled_secs: i64) -> Identity {
        Identity {
            id: Uuid::new_v4(),
            name: name.to_string(),
            embedding: Embedding::new(values.to_vec()),
            enrolled_at: Utc.timestamp_opt(enrolled_secs, 0).unwrap(),
        }
    }

    #[test]
    fn test_empty_gallery_returns_none_and_infinity() {
        let snapshot = GallerySnapshot::empty();
        let (found, d) = snapshot.nearest(&Embedding::new(vec![1.0, 0.0])).unwrap();
        assert!(found.is_none());
        assert_eq!(d, f32::INFINITY);
    }

    #[test]
    fn test_single_identity_returns_true_distance() {
        let snapshot = GallerySnapshot::build(vec![identity("alice", &[1.0, 0.0], 0)]);
        let (found, d) = snapshot.nearest(&Embedding::new(vec![0.0, 1.0])).unwrap();
        assert_eq!(found.unwrap().name, "alice");
        assert!((d - 1.0).abs() < 1e-6);
    }

    #[test]
    fn test_nearest_picks_minimum_distance() {
        let snapshot = GallerySnapshot::build(vec![
            identity("far", &[0.0, 1.0], 0),
            identity("near", &[0.9, 0.1], 0),
        ]);
        let (found, _) = snapshot.nearest(&Embedding::new(vec![1.0, 0.0])).unwrap();
        assert_eq!(found.unwrap().name, "near");
    }

    #[test]
    fn test_tie_breaks_on_enrolled_at_then_id() {
        // Two identities equidistant from the probe; the earlier enrollment
        // must win on every call, regardless of insertion order.
        let early = identity("early", &[0.0, 1.0], 100);
        let late = identity("late", &[0.0, 1.0], 200);
        let probe = Embedding::new(vec![1.0, 0.0]);

        let forward = GallerySnapshot::build(vec![early.clone(), late.clone()]);
        let reversed = GallerySnapshot::build(vec![late.clone(), early.clone()]);
        for _ in 0..10 {
            assert_eq!(forward.nearest(&probe).unwrap().0.unwrap().name, "early");
            assert_eq!(reversed.nearest(&probe).unwrap().0.unwrap().name, "early");
        }

        // Same timestamp: the smaller id wins deterministically.
        let mut a = identity("a", &[0.0, 1.0], 100);
        let mut b = identity("b", &[0.0, 1.0], 100);
        if b.id < a.id {
            std::mem::swap(&mut a.id, &mut b.id);
        }
        let snapshot = GallerySnapshot::build(vec![b.clone(), a.clone()]);
        for _ in 0..10 {
            assert_eq!(snapshot.nearest(&probe).unwrap().0.unwrap().id, a.id);
        }
    }

    #[test]
    fn test_dimension_mismatch_propagates() {
        let snapshot = GallerySnapshot::build(vec![identity("alice", &[1.0, 0.0, 0.0], 0)]);
        let err = snapshot.nearest(&Embedding::new(vec![1.0, 0.0])).unwrap_err();
        assert_eq!(err, CompareError::DimensionMismatch { left: 2, right: 3 });
    }

    #[test]
    fn test_versions_are_monotonic() {
        let a = GallerySnapshot::empty();
        let b = GallerySnapshot::empty();
        assert!(b.version() > a.version());
    }
}
