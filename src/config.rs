//! Runtime configuration for pinned-file-cache.
//!
//! Configuration can be loaded from a JSON file or constructed programmatically.
//! Cache sizing, eviction preference and the demo workload all live here.

use std::path::PathBuf;

use clap::Parser;
use serde::{Deserialize, Serialize};

/// Size of every cached file unless configured otherwise (10 KiB).
pub const DEFAULT_FILE_SIZE: usize = 10 * 1024;

/// Command-line arguments.
#[derive(Parser, Debug, Clone)]
#[command(name = "pinned-file-cache", about = "Pin-based file cache workload driver")]
pub struct Cli {
    /// Path to configuration file (JSON).
    #[arg(short, long, default_value = "config.json")]
    pub config: PathBuf,

    /// Directory holding the cached files (overrides the config file).
    #[arg(long)]
    pub storage_dir: Option<PathBuf>,

    /// Maximum number of resident files (overrides the config file).
    #[arg(long)]
    pub max_entries: Option<usize>,

    /// Enable verbose logging.
    #[arg(short, long)]
    pub verbose: bool,
}

/// Top-level configuration.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct Config {
    /// Cache sizing and storage location.
    pub cache: CacheConfig,

    /// Eviction policy tuning.
    pub eviction: EvictionConfig,

    /// Demo workload settings.
    pub workload: WorkloadConfig,
}

/// Cache sizing.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct CacheConfig {
    /// Maximum number of files resident at any time.
    pub max_entries: usize,

    /// Size of every file in bytes.
    pub file_size: usize,

    /// Directory the cached file names are resolved against.
    pub storage_dir: PathBuf,
}

impl Default for CacheConfig {
    fn default() -> Self {
        Self {
            max_entries: 2,
            file_size: DEFAULT_FILE_SIZE,
            storage_dir: PathBuf::from("."),
        }
    }
}

impl CacheConfig {
    /// Reject sizes the cache cannot operate with.
    pub fn validate(&self) -> Result<(), String> {
        if self.max_entries == 0 {
            return Err("max_entries must be at least 1".to_string());
        }
        if self.file_size == 0 {
            return Err("file_size must be at least 1".to_string());
        }
        Ok(())
    }
}

/// Victim selection preference.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct EvictionConfig {
    /// Evict clean entries before dirty ones to avoid write-back I/O.
    pub prefer_clean: bool,
}

impl Default for EvictionConfig {
    fn default() -> Self {
        Self { prefer_clean: true }
    }
}

/// Demo workload run by the binary.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct WorkloadConfig {
    /// Number of worker threads.
    pub threads: usize,

    /// Distinct files owned by each worker.
    pub files_per_thread: usize,

    /// Write/verify rounds per worker.
    pub rounds: usize,
}

impl Default for WorkloadConfig {
    fn default() -> Self {
        Self {
            threads: 2,
            files_per_thread: 2,
            rounds: 1,
        }
    }
}

impl Config {
    /// Load configuration from a JSON file, falling back to defaults for missing fields.
    pub fn load(path: &std::path::Path) -> anyhow::Result<Self> {
        if path.exists() {
            let data = std::fs::read_to_string(path)?;
            let config: Config = serde_json::from_str(&data)?;
            Ok(config)
        } else {
            tracing::warn!("Config file not found at {:?}, using defaults", path);
            Ok(Config::default())
        }
    }

    /// Apply command-line overrides.
    pub fn apply_cli(&mut self, cli: &Cli) {
        if let Some(dir) = &cli.storage_dir {
            self.cache.storage_dir = dir.clone();
        }
        if let Some(max_entries) = cli.max_entries {
            self.cache.max_entries = max_entries;
        }
    }
}
