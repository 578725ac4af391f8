use crate::enrichment::ProviderError;
use std::path::PathBuf;
use std::time::Duration;
use thiserror::Error;

/// Main error type for Know
#[derive(Error, Debug)]
pub enum KnowError {
    /// Configuration related errors
    #[error("Configuration error: {0}")]
    Config(String),

    /// Configuration validation errors
    #[error("Configuration validation failed: {errors:?}")]
    ConfigValidation { errors: Vec<ValidationError> },

    /// Configuration file not found
    #[error("Configuration file not found: {path}")]
    ConfigNotFound { path: PathBuf },

    /// Invalid configuration value
    #[error("Invalid configuration value at {path}: {message}")]
    InvalidConfigValue { path: String, message: String },

    /// IO errors
    #[error("IO error: {context}: {source}")]
    Io {
        source: std::io::Error,
        context: String,
    },

    /// TOML deserialization errors
    #[error("TOML error: {0}")]
    Toml(#[from] toml::de::Error),

    /// TOML serialization errors
    #[error("TOML serialization error: {0}")]
    TomlSerialization(#[from] toml::ser::Error),

    /// JSON errors
    #[error("JSON error: {context}: {source}")]
    Json {
        source: serde_json::Error,
        context: String,
    },

    /// Database errors
    #[error("Database error: {0}")]
    Database(#[from] rusqlite::Error),

    /// Connection pool errors
    #[error("Connection pool error: {0}")]
    Pool(#[from] r2d2::Error),

    /// Article lookup failed
    #[error("Article not found: {id}")]
    ArticleNotFound { id: i64 },

    /// Language model provider failure
    #[error("Provider error: {0}")]
    Provider(#[from] ProviderError),

    /// A provider call or request read exceeded its deadline
    #[error("'{operation}' timed out after {timeout:?}")]
    Timeout {
        operation: &'static str,
        timeout: Duration,
    },

    /// Work was abandoned because shutdown was requested
    #[error("Operation cancelled")]
    Cancelled,

    /// Vector dimension does not match the index
    #[error("Invalid vector dimension: expected {expected}, got {actual}")]
    InvalidDimension { expected: usize, actual: usize },

    /// Stored vector blob cannot be decoded
    #[error("Invalid vector blob: {0} bytes is not a multiple of 4")]
    InvalidVectorBlob(usize),

    /// Enrichment queue no longer accepts work
    #[error("Enrichment queue is closed")]
    QueueClosed,

    /// Daemon errors
    #[error("Daemon error: {0}")]
    Daemon(String),

    /// Daemon not running
    #[error("Daemon is not running")]
    DaemonNotRunning,
}

/// Configuration validation error
#[derive(Debug, Clone)]
pub struct ValidationError {
    /// Path to the configuration key that failed validation
    pub path: String,
    /// Error message describing the validation failure
    pub message: String,
}

impl ValidationError {
    pub fn new(path: impl Into<String>, message: impl Into<String>) -> Self {
        Self {
            path: path.into(),
            message: message.into(),
        }
    }
}

/// Result type for Know operations
pub type Result<T> = std::result::Result<T, KnowError>;
