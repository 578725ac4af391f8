//! Storage layer for Know
//!
//! Owns the SQLite database shared by the article store and the vector index

pub mod articles;
pub mod database;

use crate::error::{KnowError, Result};
use std::path::{Path, PathBuf};
use std::sync::Arc;

pub use articles::{Article, ArticleEdit, ArticleStore, NewArticle, SqliteArticleStore};
pub use database::{Database, DbPool, DbStats};

/// Storage manager that owns the data directory and database
pub struct StorageManager {
    pub database: Arc<Database>,
    pub articles: Arc<SqliteArticleStore>,
    base_path: PathBuf,
}

impl StorageManager {
    /// Create a new storage manager rooted at `base_path`
    pub fn new(base_path: PathBuf) -> Result<Self> {
        let store_dir = base_path.join("store");
        std::fs::create_dir_all(&store_dir).map_err(|e| KnowError::Io {
            source: e,
            context: format!("Failed to create store directory: {}", store_dir.display()),
        })?;

        let database = Arc::new(Database::new(&store_dir.join("db.sqlite"))?);
        let articles = Arc::new(SqliteArticleStore::new(database.clone()));

        Ok(Self {
            database,
            articles,
            base_path,
        })
    }

    /// Root of the data directory
    pub fn base_path(&self) -> &Path {
        &self.base_path
    }

    /// Path of the SQLite database file
    pub fn database_path(&self) -> PathBuf {
        self.base_path.join("store").join("db.sqlite")
    }
}
