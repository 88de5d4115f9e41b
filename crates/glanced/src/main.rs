use anyhow::{Context, Result};
use glance_store::SqliteGalleryStore;
use glanced::config::Config;
use glanced::gallery::GalleryWatcher;
use glanced::publisher::Publisher;
use glanced::session::Session;
use glanced::source::SyntheticStack;
use std::sync::Arc;
use tokio::sync::broadcast::error::RecvError;
use tracing_subscriber::EnvFilter;

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::from_default_env())
        .init();

    tracing::info!("glanced starting");

    let config = Config::load()?;
    if let Some(parent) = config.db_path.parent() {
        std::fs::create_dir_all(parent)
            .with_context(|| format!("creating data directory {}", parent.display()))?;
    }
    let store = Arc::new(SqliteGalleryStore::open(&config.db_path)?);
    let watcher = GalleryWatcher::spawn(store, config.gallery_poll()).await?;

    let publisher = Arc::new(Publisher::new(config.event_capacity, config.history_capacity));
    let session = Session::new(
        config.session(),
        // The in-tree capture stack; deployments wire a real camera and
        // model behind the same CapabilityFactory trait.
        Box::new(SyntheticStack::default()),
        watcher.subscribe(),
        Arc::clone(&publisher),
    );

    // Stdout observer: one JSON record per event. Lagging here drops oldest
    // events instead of stalling the scheduler.
    let mut events = publisher.subscribe();
    let observer = tokio::spawn(async move {
        loop {
            match events.recv().await {
                Ok(event) => match serde_json::to_string(&event.to_record()) {
                    Ok(line) => println!("{line}"),
                    Err(err) => tracing::warn!(error = %err, "failed to encode event"),
                },
                Err(RecvError::Lagged(missed)) => {
                    tracing::warn!(missed, "stdout observer lagged; events dropped");
                }
                Err(RecvError::Closed) => break,
            }
        }
    });

    session.start_camera()?;
    session.start_recognition()?;
    tracing::info!("glanced ready");

    tokio::signal::ctrl_c().await?;
    tracing::info!("glanced shutting down");

    session.stop_camera();
    observer.abort();

    Ok(())
}
