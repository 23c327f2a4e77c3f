use std::path::PathBuf;

use serde::{Deserialize, Serialize};

use crate::extract::{ExtractionLimits, DEFAULT_MAX_ITEM_BYTES};

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct IngestConfig {
    pub version: String,
    #[serde(default = "default_storage_root")]
    pub storage_root: PathBuf,
    #[serde(default = "default_database_path")]
    pub database_path: PathBuf,
    #[serde(default = "default_worker_count")]
    pub worker_count: usize,
    #[serde(default = "default_queue_capacity")]
    pub queue_capacity: usize,
    #[serde(default)]
    pub extraction: ExtractionConfig,
    #[serde(default)]
    pub logging: LogConfig,
}

impl IngestConfig {
    /// A default configuration rooted at explicit paths.
    pub fn with_paths<S: Into<PathBuf>, D: Into<PathBuf>>(storage_root: S, database_path: D) -> Self {
        Self {
            storage_root: storage_root.into(),
            database_path: database_path.into(),
            ..Self::default()
        }
    }
}

impl Default for IngestConfig {
    fn default() -> Self {
        Self {
            version: CONFIG_VERSION.to_string(),
            storage_root: default_storage_root(),
            database_path: default_database_path(),
            worker_count: default_worker_count(),
            queue_capacity: default_queue_capacity(),
            extraction: ExtractionConfig::default(),
            logging: LogConfig::default(),
        }
    }
}

pub const CONFIG_VERSION: &str = "1.0";

fn loadfile_home() -> PathBuf {
    dirs::home_dir()
        .map(|h| h.join(".loadfile"))
        .unwrap_or_else(|| PathBuf::from(".loadfile"))
}

fn default_storage_root() -> PathBuf {
    loadfile_home().join("storage")
}

fn default_database_path() -> PathBuf {
    crate::db::default_database_path().unwrap_or_else(|| loadfile_home().join("data").join("loadfile.db"))
}

fn default_worker_count() -> usize {
    num_cpus::get()
}

fn default_queue_capacity() -> usize {
    64
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ExtractionConfig {
    #[serde(default = "default_max_item_bytes")]
    pub max_item_bytes: u64,
    /// Required local name of each document's root element.
    #[serde(default)]
    pub expected_root: Option<String>,
}

fn default_max_item_bytes() -> u64 {
    DEFAULT_MAX_ITEM_BYTES
}

impl Default for ExtractionConfig {
    fn default() -> Self {
        Self {
            max_item_bytes: DEFAULT_MAX_ITEM_BYTES,
            expected_root: None,
        }
    }
}

impl ExtractionConfig {
    pub fn limits(&self) -> ExtractionLimits {
        ExtractionLimits {
            max_item_bytes: self.max_item_bytes,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum LogFormat {
    #[default]
    Text,
    Json,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LogConfig {
    #[serde(default = "default_log_level")]
    pub level: String,
    #[serde(default)]
    pub format: LogFormat,
}

fn default_log_level() -> String {
    "info".to_string()
}

impl Default for LogConfig {
    fn default() -> Self {
        Self {
            level: default_log_level(),
            format: LogFormat::Text,
        }
    }
}
