//! Configuration management for newsvec
//!
//! Loads the TOML configuration, applies `NEWSVEC_*` environment overrides and
//! validates the result before any index is touched.

use crate::error::{NewsvecError, Result};
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};

mod validator;

pub use validator::ConfigValidator;

/// Main configuration structure
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Config {
    #[serde(rename = "_meta")]
    pub meta: MetaConfig,
    pub storage: StorageConfig,
    pub embedding: EmbeddingConfig,
    pub index: IndexConfig,
    pub search: SearchConfig,
    #[serde(default)]
    pub job: JobConfig,
}

/// Metadata about the configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MetaConfig {
    pub schema_version: String,
    #[serde(default = "current_timestamp")]
    pub created_at: String,
    #[serde(default = "current_timestamp")]
    pub last_modified: String,
}

fn current_timestamp() -> String {
    chrono::Utc::now().to_rfc3339()
}

/// Locations of the two companion files of the index
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StorageConfig {
    pub index_path: PathBuf,
    pub metadata_path: PathBuf,
    /// Where migration backups go (defaults to the index file's directory)
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub backup_dir: Option<PathBuf>,
}

/// Embedding model configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EmbeddingConfig {
    pub model: String,
    pub dimension: usize,
    pub max_length: usize,
}

/// Vector index tuning
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct IndexConfig {
    /// Clusters probed per query on a clustered index
    pub nprobe: usize,
    /// Upper bound on the cluster count chosen at migration time
    pub max_nlist: usize,
    /// Below this many vectors migration still runs but logs a warning
    pub min_vectors_for_clustering: usize,
}

/// Defaults for similarity queries
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SearchConfig {
    pub top_k: usize,
    pub similarity_threshold: f32,
    /// Candidate multiplier used when a stock key filter is present
    pub filter_overfetch: usize,
}

/// Embedding job configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct JobConfig {
    pub batch_size: usize,
}

impl Default for JobConfig {
    fn default() -> Self {
        Self { batch_size: 100 }
    }
}

impl Config {
    /// Load configuration from a file
    pub fn load(path: &Path) -> Result<Self> {
        if !path.exists() {
            return Err(NewsvecError::ConfigNotFound {
                path: path.to_path_buf(),
            });
        }

        let content = std::fs::read_to_string(path).map_err(|e| NewsvecError::Io {
            source: e,
            context: format!("Failed to read config file: {:?}", path),
        })?;
        let mut config: Config = toml::from_str(&content)?;

        config.apply_env_overrides();

        ConfigValidator::validate(&config)?;

        Ok(config)
    }

    /// Save configuration to a file
    pub fn save(&self, path: &Path) -> Result<()> {
        let content = toml::to_string_pretty(self)?;
        std::fs::write(path, content).map_err(|e| NewsvecError::Io {
            source: e,
            context: format!("Failed to write config file: {:?}", path),
        })?;
        Ok(())
    }

    /// Defaults plus environment overrides, validated like a loaded file
    pub fn from_env_defaults() -> Result<Self> {
        Self::defaults_with_overrides(std::env::vars())
    }

    fn defaults_with_overrides(vars: impl IntoIterator<Item = (String, String)>) -> Result<Self> {
        let mut config = Config::default();
        config.apply_overrides(vars);
        ConfigValidator::validate(&config)?;
        Ok(config)
    }

    /// Apply environment variable overrides
    /// Environment variables in format: NEWSVEC_SECTION__KEY=value
    pub fn apply_env_overrides(&mut self) {
        self.apply_overrides(std::env::vars());
    }

    fn apply_overrides(&mut self, vars: impl IntoIterator<Item = (String, String)>) {
        for (key, value) in vars {
            if let Some(config_key) = key.strip_prefix("NEWSVEC_") {
                if let Err(e) = self.set_value_from_env(config_key, &value) {
                    tracing::warn!("Failed to apply env override {}: {}", key, e);
                }
            }
        }
    }

    fn set_value_from_env(&mut self, path: &str, value: &str) -> Result<()> {
        match path {
            "STORAGE__INDEX_PATH" => {
                self.storage.index_path = PathBuf::from(value);
            }
            "STORAGE__METADATA_PATH" => {
                self.storage.metadata_path = PathBuf::from(value);
            }
            "EMBEDDING__MODEL" => {
                self.embedding.model = value.to_string();
            }
            "EMBEDDING__DIMENSION" => {
                self.embedding.dimension = parse_value(path, value)?;
            }
            "INDEX__NPROBE" => {
                self.index.nprobe = parse_value(path, value)?;
            }
            "SEARCH__TOP_K" => {
                self.search.top_k = parse_value(path, value)?;
            }
            "SEARCH__SIMILARITY_THRESHOLD" => {
                self.search.similarity_threshold = parse_value(path, value)?;
            }
            _ => {
                tracing::debug!("Unknown env config key: {}", path);
            }
        }
        Ok(())
    }

    /// Get the default configuration file path
    pub fn default_path() -> Result<PathBuf> {
        let config_dir = dirs::config_dir()
            .ok_or_else(|| NewsvecError::Config("Cannot determine config directory".to_string()))?;

        Ok(config_dir.join("newsvec").join("config.toml"))
    }

    /// Index file path with `~` expanded
    pub fn index_path(&self) -> PathBuf {
        expand_tilde(&self.storage.index_path)
    }

    /// Metadata file path with `~` expanded
    pub fn metadata_path(&self) -> PathBuf {
        expand_tilde(&self.storage.metadata_path)
    }

    /// Directory migration backups are written to
    pub fn backup_dir(&self) -> PathBuf {
        match &self.storage.backup_dir {
            Some(dir) => expand_tilde(dir),
            None => self
                .index_path()
                .parent()
                .map(Path::to_path_buf)
                .unwrap_or_default(),
        }
    }
}

/// Expand a leading `~` to the home directory
pub fn expand_tilde(path: &Path) -> PathBuf {
    if let Ok(rest) = path.strip_prefix("~") {
        if let Some(home) = dirs::home_dir() {
            return home.join(rest);
        }
    }
    path.to_path_buf()
}

fn parse_value<T: std::str::FromStr>(path: &str, value: &str) -> Result<T> {
    value.parse().map_err(|_| NewsvecError::InvalidConfigValue {
        path: path.to_string(),
        message: format!("Cannot parse '{}'", value),
    })
}

impl Default for Config {
    fn default() -> Self {
        let data_dir = PathBuf::from("~/.newsvec");

        Self {
            meta: MetaConfig {
                schema_version: "1.0.0".to_string(),
                created_at: current_timestamp(),
                last_modified: current_timestamp(),
            },
            storage: StorageConfig {
                index_path: data_dir.join("vectors").join("news.index"),
                metadata_path: data_dir.join("vectors").join("news_metadata.json"),
                backup_dir: None,
            },
            embedding: EmbeddingConfig {
                model: "multilingual-e5-base".to_string(),
                dimension: 768,
                max_length: 512,
            },
            index: IndexConfig {
                nprobe: 10,
                max_nlist: 100,
                min_vectors_for_clustering: 1000,
            },
            search: SearchConfig {
                top_k: 5,
                similarity_threshold: 0.7,
                filter_overfetch: 10,
            },
            job: JobConfig::default(),
        }
    }
}
