//! Configuration loading and management.
//!
//! The engine reads configuration from `~/.memory-engine/config.toml` (if
//! present) with environment variable overrides. All fields have sensible
//! defaults — no configuration file is required.

use anyhow::{Context, Result};
use serde::Deserialize;
use std::path::{Path, PathBuf};
use tracing::info;

/// Cosine similarity above which two embeddings are considered the same idea.
pub const SIMILARITY_THRESHOLD: f64 = 0.7;
/// Cosine similarity above which a new memory is treated as a duplicate of an existing one.
pub const DEDUPLICATION_THRESHOLD: f64 = 0.85;
/// Links scoring below this confidence are not persisted.
pub const MIN_CONFIDENCE_FOR_LINK: f64 = 0.6;
/// Default per-day multiplicative confidence decay factor.
pub const DEFAULT_DECAY_RATE: f64 = 0.99;
/// Days of inactivity after which a topic is deactivated by the stale-topic sweep.
pub const STALE_TOPIC_DAYS: i64 = 30;

/// Top-level engine configuration, deserialized from `config.toml`.
#[derive(Debug, Deserialize, Clone)]
#[serde(default)]
pub struct EngineConfig {
    /// Database path.
    pub storage: StorageConfig,
    /// DBSCAN clustering parameters.
    pub cluster: ClusterConfig,
    /// Maintenance scheduler job parameters.
    pub jobs: JobsConfig,
    /// Vector index (bucket signature) parameters.
    pub index: IndexConfig,
    /// Neighborhood cache parameters.
    pub neighborhood: NeighborhoodConfig,
    /// Episode windowing parameters.
    pub episode: EpisodeConfig,
}

#[derive(Debug, Deserialize, Clone)]
#[serde(default)]
pub struct StorageConfig {
    /// Path to the SQLite database file (supports `~` expansion).
    pub db_path: String,
}

/// DBSCAN neighborhood radius (cosine distance), core-point threshold, and lookback window.
#[derive(Debug, Deserialize, Clone)]
#[serde(default)]
pub struct ClusterConfig {
    pub epsilon: f64,
    pub min_points: usize,
    pub lookback_days: i64,
}

/// Maintenance cycle period and per-job batch sizes.
#[derive(Debug, Deserialize, Clone)]
#[serde(default)]
pub struct JobsConfig {
    /// Maintenance cycle period, in seconds.
    pub interval_secs: u64,
    pub decay_rate: f64,
    pub stale_topic_days: i64,
    pub auto_link_batch_size: usize,
    pub neighborhood_batch_size: usize,
    pub rebuild_vector_index: bool,
}

/// Bit width of the bucket signature; `num_buckets` is reserved for future sizing.
#[derive(Debug, Deserialize, Clone)]
#[serde(default)]
pub struct IndexConfig {
    pub num_buckets: usize,
    pub bucket_dims: usize,
}

#[derive(Debug, Deserialize, Clone)]
#[serde(default)]
pub struct NeighborhoodConfig {
    pub limit: usize,
    pub similarity_threshold: f64,
}

#[derive(Debug, Deserialize, Clone)]
#[serde(default)]
pub struct EpisodeConfig {
    pub gap_minutes: i64,
    pub max_members: usize,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            storage: StorageConfig::default(),
            cluster: ClusterConfig::default(),
            jobs: JobsConfig::default(),
            index: IndexConfig::default(),
            neighborhood: NeighborhoodConfig::default(),
            episode: EpisodeConfig::default(),
        }
    }
}

impl Default for StorageConfig {
    fn default() -> Self {
        let db_path = default_data_dir()
            .join("memory.db")
            .to_string_lossy()
            .into_owned();
        Self { db_path }
    }
}

impl Default for ClusterConfig {
    fn default() -> Self {
        Self {
            epsilon: 0.3,
            min_points: 3,
            lookback_days: 7,
        }
    }
}

impl Default for JobsConfig {
    fn default() -> Self {
        Self {
            interval_secs: 24 * 60 * 60,
            decay_rate: DEFAULT_DECAY_RATE,
            stale_topic_days: STALE_TOPIC_DAYS,
            auto_link_batch_size: 50,
            neighborhood_batch_size: 50,
            rebuild_vector_index: false,
        }
    }
}

impl Default for IndexConfig {
    fn default() -> Self {
        Self {
            num_buckets: 0,
            bucket_dims: 8,
        }
    }
}

impl Default for NeighborhoodConfig {
    fn default() -> Self {
        Self {
            limit: 10,
            similarity_threshold: SIMILARITY_THRESHOLD,
        }
    }
}

impl Default for EpisodeConfig {
    fn default() -> Self {
        Self {
            gap_minutes: 30,
            max_members: 50,
        }
    }
}

/// Returns `~/.memory-engine/`
pub fn default_data_dir() -> PathBuf {
    dirs::home_dir()
        .expect("home directory must exist")
        .join(".memory-engine")
}

/// Returns the default config file path: `~/.memory-engine/config.toml`
pub fn default_config_path() -> PathBuf {
    default_data_dir().join("config.toml")
}

impl EngineConfig {
    /// Load config from TOML file (if it exists) then apply env var overrides.
    pub fn load() -> Result<Self> {
        Self::load_from(default_config_path())
    }

    /// Load from a specific path, then apply env var overrides.
    pub fn load_from(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();
        let mut config = if path.exists() {
            let contents =
                std::fs::read_to_string(path).context("failed to read config file")?;
            toml::from_str(&contents).context("failed to parse config TOML")?
        } else {
            info!("no config file at {}, using defaults", path.display());
            EngineConfig::default()
        };

        config.apply_env_overrides();
        Ok(config)
    }

    /// Apply environment variable overrides.
    fn apply_env_overrides(&mut self) {
        self.apply_env_overrides_with(|key| std::env::var(key));
    }

    /// Apply overrides using a custom env lookup function (injectable for tests).
    fn apply_env_overrides_with(&mut self, env: impl Fn(&str) -> Result<String, std::env::VarError>) {
        if let Ok(val) = env("MEMORY_ENGINE_DB") {
            self.storage.db_path = val;
        }
        if let Ok(val) = env("MEMORY_ENGINE_CLUSTER_EPSILON") {
            if let Ok(v) = val.parse() {
                self.cluster.epsilon = v;
            }
        }
        if let Ok(val) = env("MEMORY_ENGINE_JOBS_INTERVAL_SECS") {
            if let Ok(v) = val.parse() {
                self.jobs.interval_secs = v;
            }
        }
    }

    /// Resolve the database path, expanding `~` if needed.
    pub fn resolved_db_path(&self) -> PathBuf {
        expand_tilde(&self.storage.db_path)
    }
}

pub fn expand_tilde(path: &str) -> PathBuf {
    if let Some(rest) = path.strip_prefix("~/") {
        dirs::home_dir()
            .expect("home directory must exist")
            .join(rest)
    } else {
        PathBuf::from(path)
    }
}
