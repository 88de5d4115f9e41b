//! glance-store — persistent gallery of enrolled identities.
//!
//! SQLite-backed via rusqlite (bundled). Embeddings are stored as
//! little-endian f32 BLOBs; a `meta` table carries the change generation
//! counter and the gallery's embedding dimensionality, which is fixed by the
//! first enrollment and validated on every later insert.

use chrono::{DateTime, Utc};
use glance_core::{Embedding, Identity};
use rusqlite::{params, Connection, OptionalExtension};
use std::path::Path;
use std::sync::Mutex;
use thiserror::Error;
use uuid::Uuid;

#[derive(Error, Debug)]
pub enum StoreError {
    #[error("sqlite: {0}")]
    Sqlite(#[from] rusqlite::Error),
    #[error("embedding dimension mismatch: gallery is {expected}-dimensional, got {actual}")]
    DimensionMismatch { expected: usize, actual: usize },
    #[error("corrupt identity row {id}: {reason}")]
    Corrupt { id: String, reason: String },
    #[error("store lock poisoned")]
    Poisoned,
}

/// Gallery persistence as seen by the pipeline and the enrollment flow.
///
/// `generation()` is the change-notification mechanism: it increases on
/// every mutation, so a watcher polls it cheaply and rebuilds its snapshot
/// only when the value moves. `insert_identity` belongs to the enrollment
/// flow; the matching pipeline only ever reads.
pub trait GalleryStore: Send + Sync {
    fn list_identities(&self) -> Result<Vec<Identity>, StoreError>;
    fn insert_identity(&self, name: &str, embedding: Embedding) -> Result<Identity, StoreError>;
    fn remove_identity(&self, id: Uuid) -> Result<bool, StoreError>;
    fn generation(&self) -> Result<u64, StoreError>;
}

const SCHEMA: &str = "
CREATE TABLE IF NOT EXISTS identities (
    id          TEXT PRIMARY KEY,
    name        TEXT NOT NULL,
    embedding   BLOB NOT NULL,
    enrolled_at TEXT NOT NULL
);
CREATE TABLE IF NOT EXISTS meta (
    key   TEXT PRIMARY KEY,
    value INTEGER NOT NULL
);
INSERT OR IGNORE INTO meta (key, value) VALUES ('generation', 0);
";

/// SQLite-backed [`GalleryStore`].
pub struct SqliteGalleryStore {
    conn: Mutex<Connection>,
}

impl SqliteGalleryStore {
    /// Open (creating if necessary) the gallery database at `path`.
    pub fn open(path: &Path) -> Result<Self, StoreError> {
        let conn = Connection::open(path)?;
        conn.execute_batch(SCHEMA)?;
        tracing::debug!(path = %path.display(), "opened gallery store");
        Ok(Self {
            conn: Mutex::new(conn),
        })
    }

    /// In-memory store, used by tests and diagnostics.
    pub fn open_in_memory() -> Result<Self, StoreError> {
        let conn = Connection::open_in_memory()?;
        conn.execute_batch(SCHEMA)?;
        Ok(Self {
            conn: Mutex::new(conn),
        })
    }
}

impl GalleryStore for SqliteGalleryStore {
    fn list_identities(&self) -> Result<Vec<Identity>, StoreError> {
        let conn = self.conn.lock().map_err(|_| StoreError::Poisoned)?;
        let mut stmt = conn.prepare(
            "SELECT id, name, embedding, enrolled_at FROM identities ORDER BY enrolled_at, id",
        )?;
        let rows = stmt.query_map([], |row| {
            Ok((
                row.get::<_, String>(0)?,
                row.get::<_, String>(1)?,
                row.get::<_, Vec<u8>>(2)?,
                row.get::<_, String>(3)?,
            ))
        })?;

        let mut identities = Vec::new();
        for row in rows {
            let (id, name, blob, enrolled_at) = row?;
            identities.push(decode_identity(&id, name, &blob, &enrolled_at)?);
        }
        Ok(identities)
    }

    fn insert_identity(&self, name: &str, embedding: Embedding) -> Result<Identity, StoreError> {
        let mut conn = self.conn.lock().map_err(|_| StoreError::Poisoned)?;
        let tx = conn.transaction()?;

        let existing_dim: Option<usize> = tx
            .query_row(
                "SELECT value FROM meta WHERE key = 'embedding_dim'",
                [],
                |row| row.get::<_, i64>(0),
            )
            .optional()?
            .map(|v| v as usize);
        match existing_dim {
            Some(expected) if expected != embedding.dim() => {
                return Err(StoreError::DimensionMismatch {
                    expected,
                    actual: embedding.dim(),
                });
            }
            None => {
                tx.execute(
                    "INSERT INTO meta (key, value) VALUES ('embedding_dim', ?1)",
                    params![embedding.dim() as i64],
                )?;
            }
            Some(_) => {}
        }

        let identity = Identity {
            id: Uuid::new_v4(),
            name: name.to_string(),
            embedding,
            enrolled_at: Utc::now(),
        };
        tx.execute(
            "INSERT INTO identities (id, name, embedding, enrolled_at) VALUES (?1, ?2, ?3, ?4)",
            params![
                identity.id.to_string(),
                identity.name,
                encode_embedding(&identity.embedding),
                identity.enrolled_at.to_rfc3339(),
            ],
        )?;
        tx.execute("UPDATE meta SET value = value + 1 WHERE key = 'generation'", [])?;
        tx.commit()?;

        tracing::info!(id = %identity.id, name = %identity.name, "identity enrolled");
        Ok(identity)
    }

    fn remove_identity(&self, id: Uuid) -> Result<bool, StoreError> {
        let mut conn = self.conn.lock().map_err(|_| StoreError::Poisoned)?;
        let tx = conn.transaction()?;
        let removed = tx.execute(
            "DELETE FROM identities WHERE id = ?1",
            params![id.to_string()],
        )?;
        if removed > 0 {
            tx.execute("UPDATE meta SET value = value + 1 WHERE key = 'generation'", [])?;
        }
        tx.commit()?;

        if removed > 0 {
            tracing::info!(%id, "identity removed");
        }
        Ok(removed > 0)
    }

    fn generation(&self) -> Result<u64, StoreError> {
        let conn = self.conn.lock().map_err(|_| StoreError::Poisoned)?;
        let generation: i64 = conn.query_row(
            "SELECT value FROM meta WHERE key = 'generation'",
            [],
            |row| row.get(0),
        )?;
        Ok(generation as u64)
    }
}

fn encode_embedding(embedding: &Embedding) -> Vec<u8> {
    let mut blob = Vec::with_capacity(embedding.values.len() * 4);
    for value in &embedding.values {
        blob.extend_from_slice(&value.to_le_bytes());
    }
    blob
}

fn decode_identity(
    id: &str,
    name: String,
    blob: &[u8],
    enrolled_at: &str,
) -> Result<Identity, StoreError> {
    let parsed_id = Uuid::parse_str(id).map_err(|e| StoreError::Corrupt {
        id: id.to_string(),
        reason: format!("bad uuid: {e}"),
    })?;
    let enrolled_at = DateTime::parse_from_rfc3339(enrolled_at)
        .map_err(|e| StoreError::Corrupt {
            id: id.to_string(),
            reason: format!("bad timestamp: {e}"),
        })?
        .with_timezone(&Utc);
    if blob.len() % 4 != 0 {
        return Err(StoreError::Corrupt {
            id: id.to_string(),
            reason: format!("embedding blob length {} not a multiple of 4", blob.len()),
        });
    }
    let values = blob
        .chunks_exact(4)
        .map(|c| f32::from_le_bytes([c[0], c[1], c[2], c[3]]))
        .collect();

    Ok(Identity {
        id: parsed_id,
        name,
        embedding: Embedding::new(values),
        enrolled_at,
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    fn emb(values: &[f32]) -> Embedding {
        Embedding::new(values.to_vec())
    }

    #[test]
    fn test_insert_and_list_round_trip() {
        let store = SqliteGalleryStore::open_in_memory().unwrap();
        let alice = store.insert_identity("alice", emb(&[0.25, -1.5, 3.0])).unwrap();

        let listed = store.list_identities().unwrap();
        assert_eq!(listed.len(), 1);
        assert_eq!(listed[0].id, alice.id);
        assert_eq!(listed[0].name, "alice");
        assert_eq!(listed[0].embedding.values, vec![0.25, -1.5, 3.0]);
        assert_eq!(listed[0].enrolled_at.timestamp(), alice.enrolled_at.timestamp());
    }

    #[test]
    fn test_generation_bumps_per_mutation() {
        let store = SqliteGalleryStore::open_in_memory().unwrap();
        assert_eq!(store.generation().unwrap(), 0);

        let alice = store.insert_identity("alice", emb(&[1.0, 0.0])).unwrap();
        assert_eq!(store.generation().unwrap(), 1);

        store.insert_identity("bob", emb(&[0.0, 1.0])).unwrap();
        assert_eq!(store.generation().unwrap(), 2);

        assert!(store.remove_identity(alice.id).unwrap());
        assert_eq!(store.generation().unwrap(), 3);
    }

    #[test]
    fn test_remove_missing_is_noop() {
        let store = SqliteGalleryStore::open_in_memory().unwrap();
        store.insert_identity("alice", emb(&[1.0, 0.0])).unwrap();
        let before = store.generation().unwrap();

        assert!(!store.remove_identity(Uuid::new_v4()).unwrap());
        assert_eq!(store.generation().unwrap(), before);
        assert_eq!(store.list_identities().unwrap().len(), 1);
    }

    #[test]
    fn test_first_enrollment_fixes_dimensionality() {
        let store = SqliteGalleryStore::open_in_memory().unwrap();
        store.insert_identity("alice", emb(&[1.0, 0.0, 0.0])).unwrap();

        let err = store.insert_identity("bob", emb(&[1.0, 0.0])).unwrap_err();
        assert!(matches!(
            err,
            StoreError::DimensionMismatch { expected: 3, actual: 2 }
        ));
        // The failed insert must not have changed the gallery.
        assert_eq!(store.list_identities().unwrap().len(), 1);
        assert_eq!(store.generation().unwrap(), 1);
    }

    #[test]
    fn test_list_orders_by_enrollment() {
        let store = SqliteGalleryStore::open_in_memory().unwrap();
        store.insert_identity("first", emb(&[1.0])).unwrap();
        store.insert_identity("second", emb(&[2.0])).unwrap();
        store.insert_identity("third", emb(&[3.0])).unwrap();

        let names: Vec<String> = store
            .list_identities()
            .unwrap()
            .into_iter()
            .map(|i| i.name)
            .collect();
        assert_eq!(names, vec!["first", "second", "third"]);
    }
}
