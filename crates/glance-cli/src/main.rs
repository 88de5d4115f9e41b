use anyhow::{bail, Context, Result};
use clap::{Parser, Subcommand};
use glance_core::{compare, Embedding, GallerySnapshot};
use glance_store::{GalleryStore, SqliteGalleryStore};
use glanced::config::Config;
use std::path::{Path, PathBuf};
use uuid::Uuid;

#[derive(Parser)]
#[command(name = "glance", about = "Glance gallery management CLI")]
struct Cli {
    /// Gallery database path (defaults to the daemon's configured path)
    #[arg(long)]
    db: Option<PathBuf>,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Enroll an identity from a JSON embedding file
    Enroll {
        /// Display name for the identity
        #[arg(short, long)]
        name: String,
        /// Path to a JSON array of floats produced by the embedding extractor
        #[arg(short, long)]
        embedding: PathBuf,
    },
    /// List enrolled identities
    List,
    /// Remove an enrolled identity by id
    Remove {
        id: Uuid,
    },
    /// Match a probe embedding against the gallery, without a camera
    Probe {
        /// Path to a JSON array of floats
        #[arg(short, long)]
        embedding: PathBuf,
        /// Cosine-distance match threshold
        #[arg(long, default_value_t = glance_core::DEFAULT_MATCH_THRESHOLD)]
        threshold: f32,
        /// Distance at which confidence reaches zero
        #[arg(long, default_value_t = glance_core::DEFAULT_DISTANCE_MAX)]
        distance_max: f32,
    },
}

fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
        .init();

    let cli = Cli::parse();
    let db_path = match cli.db {
        Some(path) => path,
        None => Config::load()?.db_path,
    };
    let store = SqliteGalleryStore::open(&db_path)
        .with_context(|| format!("opening gallery database {}", db_path.display()))?;

    match cli.command {
        Commands::Enroll { name, embedding } => {
            let embedding = read_embedding(&embedding)?;
            let identity = store.insert_identity(&name, embedding)?;
            println!("enrolled {} as {}", identity.name, identity.id);
        }
        Commands::List => {
            let identities = store.list_identities()?;
            if identities.is_empty() {
                println!("no identities enrolled");
            }
            for identity in identities {
                println!(
                    "{}  {}  dim={}  enrolled_at={}",
                    identity.id,
                    identity.name,
                    identity.embedding.dim(),
                    identity.enrolled_at.to_rfc3339()
                );
            }
        }
        Commands::Remove { id } => {
            if store.remove_identity(id)? {
                println!("removed {id}");
            } else {
                bail!("no identity with id {id}");
            }
        }
        Commands::Probe {
            embedding,
            threshold,
            distance_max,
        } => {
            let probe = read_embedding(&embedding)?;
            let snapshot = GallerySnapshot::build(store.list_identities()?);
            let (nearest, distance) = snapshot.nearest(&probe)?;
            let matched = nearest.filter(|_| compare::is_match(distance, threshold));

            let verdict = serde_json::json!({
                "matched": matched.is_some(),
                "identity": matched.map(|i| serde_json::json!({
                    "id": i.id,
                    "name": i.name,
                })),
                "distance": distance,
                "confidence": compare::confidence(distance, distance_max),
                "gallery_size": snapshot.len(),
            });
            println!("{}", serde_json::to_string_pretty(&verdict)?);
        }
    }

    Ok(())
}

fn read_embedding(path: &Path) -> Result<Embedding> {
    let raw = std::fs::read_to_string(path)
        .with_context(|| format!("reading embedding file {}", path.display()))?;
    let values: Vec<f32> = serde_json::from_str(&raw)
        .with_context(|| format!("parsing embedding file {}", path.display()))?;
    if values.is_empty() {
        bail!("embedding file {} holds an empty array", path.display());
    }
    Ok(Embedding::new(values))
}
