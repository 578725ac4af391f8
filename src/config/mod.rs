//! Configuration management for Know
//!
//! Loads the TOML configuration file, applies `KNOW_SECTION__KEY` environment
//! overrides and validates the result before any component is constructed.

use crate::error::{KnowError, Result};
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::time::Duration;

mod validator;

pub use validator::ConfigValidator;

/// Main configuration structure
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Config {
    #[serde(rename = "_meta")]
    pub meta: MetaConfig,
    pub storage: StorageConfig,
    pub daemon: DaemonConfig,
    pub enrichment: EnrichmentConfig,
    pub llm: LlmConfig,
    pub indexing: IndexingConfig,
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

/// Storage configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StorageConfig {
    pub data_dir: PathBuf,
}

/// Daemon configuration for process and IPC management
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DaemonConfig {
    pub socket_path: PathBuf,
    pub pid_file: PathBuf,
    pub log_file: PathBuf,
    pub max_connections: usize,
    /// How long a client may take to send its request (e.g. "10s")
    #[serde(default = "default_read_timeout")]
    pub read_timeout: String,
}

fn default_read_timeout() -> String {
    "10s".to_string()
}

impl DaemonConfig {
    pub fn read_timeout(&self) -> Duration {
        parse_duration(&self.read_timeout).unwrap_or(Duration::from_secs(10))
    }
}

/// Background enrichment settings
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EnrichmentConfig {
    /// Maximum number of concurrently running enrichment jobs
    pub workers: usize,
    /// Deadline applied to every provider call (e.g. "30s", "500ms")
    pub call_timeout: String,
}

impl EnrichmentConfig {
    pub fn call_timeout(&self) -> Duration {
        parse_duration(&self.call_timeout).unwrap_or(Duration::from_secs(30))
    }
}

/// LLM provider configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LlmConfig {
    pub provider: String,
    pub api_key_env: String,
    pub base_url: String,
    pub model: String,
    pub embedding_model: String,
    pub temperature: f32,
    pub max_output_tokens: u32,
    /// Where embeddings come from: the remote provider or a local fastembed model
    #[serde(default = "default_embedding_provider")]
    pub embedding_provider: String,
    /// fastembed model used when `embedding_provider = "fastembed"`
    #[serde(default = "default_local_embedding_model")]
    pub local_embedding_model: String,
}

fn default_embedding_provider() -> String {
    "gemini".to_string()
}

fn default_local_embedding_model() -> String {
    "all-MiniLM-L6-v2".to_string()
}

/// Vector index configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct IndexingConfig {
    /// Set to false to run without similarity search
    pub enabled: bool,
    pub vector_dim: usize,
}

impl Config {
    /// Load configuration from a file
    pub fn load(path: &Path) -> Result<Self> {
        if !path.exists() {
            return Err(KnowError::ConfigNotFound {
                path: path.to_path_buf(),
            });
        }

        let content = std::fs::read_to_string(path).map_err(|e| KnowError::Io {
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
        std::fs::write(path, content).map_err(|e| KnowError::Io {
            source: e,
            context: format!("Failed to write config file: {:?}", path),
        })?;
        Ok(())
    }

    /// Apply environment variable overrides
    /// Environment variables in format: KNOW_SECTION__KEY=value
    pub fn apply_env_overrides(&mut self) {
        for (key, value) in std::env::vars() {
            if let Some(config_key) = key.strip_prefix("KNOW_") {
                if let Err(e) = self.set_value_from_env(config_key, &value) {
                    tracing::warn!("Failed to apply env override {}: {}", key, e);
                }
            }
        }
    }

    fn set_value_from_env(&mut self, path: &str, value: &str) -> Result<()> {
        match path {
            "ENRICHMENT__WORKERS" => {
                self.enrichment.workers =
                    value.parse().map_err(|_| KnowError::InvalidConfigValue {
                        path: path.to_string(),
                        message: format!("Cannot parse '{}' as integer", value),
                    })?;
            }
            "ENRICHMENT__CALL_TIMEOUT" => {
                self.enrichment.call_timeout = value.to_string();
            }
            "LLM__MODEL" => {
                self.llm.model = value.to_string();
            }
            "LLM__EMBEDDING_MODEL" => {
                self.llm.embedding_model = value.to_string();
            }
            "LLM__EMBEDDING_PROVIDER" => {
                self.llm.embedding_provider = value.to_string();
            }
            "LLM__LOCAL_EMBEDDING_MODEL" => {
                self.llm.local_embedding_model = value.to_string();
            }
            "DAEMON__READ_TIMEOUT" => {
                self.daemon.read_timeout = value.to_string();
            }
            "LLM__BASE_URL" => {
                self.llm.base_url = value.to_string();
            }
            "INDEXING__ENABLED" => {
                self.indexing.enabled =
                    value.parse().map_err(|_| KnowError::InvalidConfigValue {
                        path: path.to_string(),
                        message: format!("Cannot parse '{}' as boolean", value),
                    })?;
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
            .ok_or_else(|| KnowError::Config("Cannot determine config directory".to_string()))?;

        Ok(config_dir.join("know").join("config.toml"))
    }

    /// Get the default data directory
    pub fn default_data_dir() -> Result<PathBuf> {
        let home_dir = dirs::home_dir()
            .ok_or_else(|| KnowError::Config("Cannot determine home directory".to_string()))?;

        Ok(home_dir.join(".know"))
    }
}

impl Default for Config {
    fn default() -> Self {
        let data_dir = PathBuf::from("~/.know");

        Self {
            meta: MetaConfig {
                schema_version: "1.0.0".to_string(),
                created_at: current_timestamp(),
                last_modified: current_timestamp(),
            },
            storage: StorageConfig {
                data_dir: data_dir.clone(),
            },
            daemon: DaemonConfig {
                socket_path: data_dir.join("daemon.sock"),
                pid_file: data_dir.join("daemon.pid"),
                log_file: data_dir.join("logs").join("daemon.log"),
                max_connections: 10,
                read_timeout: default_read_timeout(),
            },
            enrichment: EnrichmentConfig {
                workers: 5,
                call_timeout: "30s".to_string(),
            },
            llm: LlmConfig {
                provider: "gemini".to_string(),
                api_key_env: "GEMINI_API_KEY".to_string(),
                base_url: "https://generativelanguage.googleapis.com/v1beta".to_string(),
                model: "gemini-2.0-flash".to_string(),
                embedding_model: "gemini-embedding-001".to_string(),
                temperature: 0.1,
                max_output_tokens: 1000,
                embedding_provider: default_embedding_provider(),
                local_embedding_model: default_local_embedding_model(),
            },
            indexing: IndexingConfig {
                enabled: true,
                vector_dim: 768,
            },
        }
    }
}

/// Parse a duration string such as "30s", "500ms", "2m" or a bare number of seconds
pub fn parse_duration(value: &str) -> Option<Duration> {
    let value = value.trim();

    // "ms" before "s" because "ms" ends with "s"
    if let Some(ms) = value.strip_suffix("ms") {
        ms.trim().parse().ok().map(Duration::from_millis)
    } else if let Some(secs) = value.strip_suffix('s') {
        secs.trim().parse().ok().map(Duration::from_secs)
    } else if let Some(mins) = value.strip_suffix('m') {
        mins.trim()
            .parse::<u64>()
            .ok()
            .map(|m| Duration::from_secs(m * 60))
    } else {
        value.parse().ok().map(Duration::from_secs)
    }
}

/// Expand a leading `~` to the user's home directory
pub fn expand_tilde(path: &Path) -> PathBuf {
    if let Ok(rest) = path.strip_prefix("~") {
        if let Some(home) = dirs::home_dir() {
            return home.join(rest);
        }
    }
    path.to_path_buf()
}
