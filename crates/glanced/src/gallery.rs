//! Gallery watcher: keeps an immutable snapshot of the enrolled gallery
//! fresh and swaps it in atomically between matching passes.

use glance_core::{GallerySnapshot, Identity};
use glance_store::{GalleryStore, StoreError};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::watch;
use tokio::task::JoinHandle;
use tokio::time::MissedTickBehavior;

/// Polls the store's generation counter and republishes a fresh
/// [`GallerySnapshot`] through a watch channel whenever the gallery changed.
///
/// The swap is an atomic reference replacement: a tick that already cloned
/// the previous `Arc` keeps matching against it, and no reader ever sees a
/// partially built snapshot. The initial fetch is fail-fast, so a broken
/// store is never mistaken for an empty gallery; later fetch failures retain
/// the last good snapshot and log at error level.
pub struct GalleryWatcher {
    snapshot_tx: watch::Sender<Arc<GallerySnapshot>>,
    task: JoinHandle<()>,
}

impl GalleryWatcher {
    pub async fn spawn(
        store: Arc<dyn GalleryStore>,
        poll_interval: Duration,
    ) -> Result<Self, StoreError> {
        let (mut generation, identities) = match fetch(Arc::clone(&store), None).await? {
            Fetched::Changed {
                generation,
                identities,
            } => (generation, identities),
            // fetch() with no known generation always reports Changed.
            Fetched::Unchanged => (0, Vec::new()),
        };

        let snapshot = Arc::new(GallerySnapshot::build(identities));
        tracing::info!(
            generation,
            identities = snapshot.len(),
            version = snapshot.version(),
            "initial gallery snapshot loaded"
        );
        let (snapshot_tx, _) = watch::channel(snapshot);

        let tx = snapshot_tx.clone();
        let task = tokio::spawn(async move {
            let mut ticker = tokio::time::interval(poll_interval);
            ticker.set_missed_tick_behavior(MissedTickBehavior::Skip);
            loop {
                ticker.tick().await;
                match fetch(Arc::clone(&store), Some(generation)).await {
                    Ok(Fetched::Unchanged) => {}
                    Ok(Fetched::Changed {
                        generation: current,
                        identities,
                    }) => {
                        let snapshot = Arc::new(GallerySnapshot::build(identities));
                        tracing::info!(
                            generation = current,
                            identities = snapshot.len(),
                            version = snapshot.version(),
                            "gallery changed; snapshot swapped"
                        );
                        generation = current;
                        tx.send_replace(snapshot);
                    }
                    Err(err) => {
                        tracing::error!(
                            error = %err,
                            "gallery fetch failed; retaining last good snapshot"
                        );
                    }
                }
            }
        });

        Ok(Self { snapshot_tx, task })
    }

    /// Subscribe to snapshot swaps; `borrow()` is always the current one.
    pub fn subscribe(&self) -> watch::Receiver<Arc<GallerySnapshot>> {
        self.snapshot_tx.subscribe()
    }
}

impl Drop for GalleryWatcher {
    fn drop(&mut self) {
        self.task.abort();
    }
}

enum Fetched {
    Unchanged,
    Changed {
        generation: u64,
        identities: Vec<Identity>,
    },
}

/// Read generation and, when it moved past `known`, the identity list — on
/// the blocking pool, since the store is synchronous.
async fn fetch(store: Arc<dyn GalleryStore>, known: Option<u64>) -> Result<Fetched, StoreError> {
    tokio::task::spawn_blocking(move || {
        let current = store.generation()?;
        if known == Some(current) {
            return Ok(Fetched::Unchanged);
        }
        Ok(Fetched::Changed {
            generation: current,
            identities: store.list_identities()?,
        })
    })
    .await
    .expect("gallery fetch task panicked")
}
