use crate::session::SessionConfig;
use glance_core::MatcherConfig;
use serde::Deserialize;
use std::path::PathBuf;
use std::time::Duration;
use thiserror::Error;

#[derive(Error, Debug)]
pub enum ConfigError {
    #[error("failed to read config file {path}: {source}")]
    Read {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
    #[error("failed to parse config file {path}: {source}")]
    Parse {
        path: PathBuf,
        #[source]
        source: toml::de::Error,
    },
}

/// Daemon configuration.
///
/// Built-in defaults, overridden by the TOML file named in `GLANCE_CONFIG`
/// (if set), overridden by individual `GLANCE_*` environment variables.
#[derive(Debug, Clone, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct Config {
    /// Path to the SQLite gallery database.
    pub db_path: PathBuf,
    /// Scheduler tick period in milliseconds.
    pub tick_period_ms: u64,
    /// Statistics window in milliseconds.
    pub stats_window_ms: u64,
    /// Gallery store poll interval in milliseconds.
    pub gallery_poll_ms: u64,
    /// Cosine-distance threshold for a positive match.
    pub match_threshold: f32,
    /// Distance at which match confidence reaches zero.
    pub distance_max: f32,
    /// Consecutive tick failures before a DetectionDegraded event is raised.
    pub failure_threshold: u32,
    /// Frame results retained for history/export.
    pub history_capacity: usize,
    /// Event broadcast buffer; observers lagging past it drop oldest events.
    pub event_capacity: usize,
}

impl Default for Config {
    fn default() -> Self {
        let data_dir = std::env::var("XDG_DATA_HOME")
            .map(PathBuf::from)
            .unwrap_or_else(|_| {
                let home = std::env::var("HOME").unwrap_or_else(|_| "/tmp".to_string());
                PathBuf::from(home).join(".local/share")
            })
            .join("glance");

        Self {
            db_path: data_dir.join("gallery.db"),
            tick_period_ms: 500,
            stats_window_ms: 1000,
            gallery_poll_ms: 2000,
            match_threshold: glance_core::DEFAULT_MATCH_THRESHOLD,
            distance_max: glance_core::DEFAULT_DISTANCE_MAX,
            failure_threshold: 3,
            history_capacity: 128,
            event_capacity: 64,
        }
    }
}

impl Config {
    /// Load configuration from file and environment.
    pub fn load() -> Result<Self, ConfigError> {
        let mut config = match std::env::var("GLANCE_CONFIG") {
            Ok(path) => {
                let path = PathBuf::from(path);
                let raw = std::fs::read_to_string(&path).map_err(|source| ConfigError::Read {
                    path: path.clone(),
                    source,
                })?;
                toml::from_str(&raw).map_err(|source| ConfigError::Parse { path, source })?
            }
            Err(_) => Self::default(),
        };
        config.apply_env();
        Ok(config)
    }

    fn apply_env(&mut self) {
        if let Ok(path) = std::env::var("GLANCE_DB_PATH") {
            self.db_path = PathBuf::from(path);
        }
        self.tick_period_ms = env_u64("GLANCE_TICK_PERIOD_MS", self.tick_period_ms);
        self.stats_window_ms = env_u64("GLANCE_STATS_WINDOW_MS", self.stats_window_ms);
        self.gallery_poll_ms = env_u64("GLANCE_GALLERY_POLL_MS", self.gallery_poll_ms);
        self.match_threshold = env_f32("GLANCE_MATCH_THRESHOLD", self.match_threshold);
        self.distance_max = env_f32("GLANCE_DISTANCE_MAX", self.distance_max);
        self.failure_threshold = env_u32("GLANCE_FAILURE_THRESHOLD", self.failure_threshold);
        self.history_capacity = env_usize("GLANCE_HISTORY_CAPACITY", self.history_capacity);
        self.event_capacity = env_usize("GLANCE_EVENT_CAPACITY", self.event_capacity);
    }

    pub fn gallery_poll(&self) -> Duration {
        Duration::from_millis(self.gallery_poll_ms)
    }

    pub fn matcher(&self) -> MatcherConfig {
        MatcherConfig {
            threshold: self.match_threshold,
            distance_max: self.distance_max,
        }
    }

    /// Scheduler-facing view of this configuration.
    pub fn session(&self) -> SessionConfig {
        SessionConfig {
            tick_period: Duration::from_millis(self.tick_period_ms),
            stats_window: Duration::from_millis(self.stats_window_ms),
            matcher: self.matcher(),
            failure_threshold: self.failure_threshold,
        }
    }
}

fn env_f32(key: &str, default: f32) -> f32 {
    std::env::var(key)
        .ok()
        .and_then(|v| v.parse().ok())
        .unwrap_or(default)
}

fn env_u32(key: &str, default: u32) -> u32 {
    std::env::var(key)
        .ok()
        .and_then(|v| v.parse().ok())
        .unwrap_or(default)
}

fn env_u64(key: &str, default: u64) -> u64 {
    std::env::var(key)
        .ok()
        .and_then(|v| v.parse().ok())
        .unwrap_or(default)
}

fn env_usize(key: &str, default: usize) -> usize {
    std::env::var(key)
        .ok()
        .and_then(|v| v.parse().ok())
        .unwrap_or(default)
}
