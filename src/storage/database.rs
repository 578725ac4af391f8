//! SQLite database management with migrations
//!
//! Provides structured storage for articles and their enrichment results.
//! Every pooled connection has the sqlite-vec extension loaded.

use crate::error::{KnowError, Result};
use crate::vector;
use r2d2::Pool;
use r2d2_sqlite::SqliteConnectionManager;
use rusqlite::params;
use std::path::Path;

/// Database connection pool
pub type DbPool = Pool<SqliteConnectionManager>;

/// Database manager with migration support
pub struct Database {
    pool: DbPool,
}

impl Database {
    /// Create a new database connection
    pub fn new(db_path: &Path) -> Result<Self> {
        // Ensure parent directory exists
        if let Some(parent) = db_path.parent() {
            std::fs::create_dir_all(parent).map_err(|e| KnowError::Io {
                source: e,
                context: format!("Failed to create database directory: {:?}", parent),
            })?;
        }

        // sqlite-vec must be registered before the pool opens its first connection
        vector::register_extension();

        let manager = SqliteConnectionManager::file(db_path).with_init(|conn| {
            conn.execute_batch(
                "
                PRAGMA synchronous = NORMAL;
                PRAGMA foreign_keys = ON;
                PRAGMA busy_timeout = 5000;
                ",
            )
        });

        let pool = Pool::builder().max_size(16).build(manager)?;

        {
            let conn = pool.get()?;
            conn.execute_batch("PRAGMA journal_mode = WAL;")?;
        }

        let db = Self { pool };

        db.migrate()?;

        Ok(db)
    }

    /// Get a connection from the pool
    pub fn get_conn(&self) -> Result<r2d2::PooledConnection<SqliteConnectionManager>> {
        Ok(self.pool.get()?)
    }

    /// Run database migrations
    fn migrate(&self) -> Result<()> {
        let conn = self.get_conn()?;

        conn.execute(
            "CREATE TABLE IF NOT EXISTS _migrations (
                version INTEGER PRIMARY KEY,
                applied_at TEXT NOT NULL
            )",
            [],
        )?;

        let current_version: i32 = conn
            .query_row(
                "SELECT COALESCE(MAX(version), 0) FROM _migrations",
                [],
                |row| row.get(0),
            )
            .unwrap_or(0);

        for (version, migration) in MIGRATIONS.iter().enumerate() {
            let version = version as i32 + 1;

            if version > current_version {
                tracing::info!("Applying migration {}", version);

                conn.execute_batch(migration)?;

                conn.execute(
                    "INSERT INTO _migrations (version, applied_at) VALUES (?1, datetime('now'))",
                    params![version],
                )?;
            }
        }

        Ok(())
    }

    /// Get database statistics
    pub fn stats(&self) -> Result<DbStats> {
        let conn = self.get_conn()?;

        let article_count: i64 =
            conn.query_row("SELECT COUNT(*) FROM articles", [], |row| row.get(0))?;

        let untagged_count: i64 = conn.query_row(
            "SELECT COUNT(*) FROM articles WHERE tags IS NULL OR tags = '[]'",
            [],
            |row| row.get(0),
        )?;

        let unsummarized_count: i64 = conn.query_row(
            "SELECT COUNT(*) FROM articles WHERE summary IS NULL",
            [],
            |row| row.get(0),
        )?;

        let embedded_count: i64 = conn.query_row(
            "SELECT COUNT(*) FROM articles WHERE embedded = 1",
            [],
            |row| row.get(0),
        )?;

        Ok(DbStats {
            article_count: article_count as usize,
            untagged_count: untagged_count as usize,
            unsummarized_count: unsummarized_count as usize,
            embedded_count: embedded_count as usize,
        })
    }
}

/// Database statistics
#[derive(Debug, Clone, serde::Serialize, serde::Deserialize)]
pub struct DbStats {
    pub article_count: usize,
    pub untagged_count: usize,
    pub unsummarized_count: usize,
    pub embedded_count: usize,
}

/// Database migrations (each string is one migration)
const MIGRATIONS: &[&str] = &[
    // Migration 1: Initial schema
    r#"
    -- Articles table; tags is a JSON array (NULL = never tagged)
    CREATE TABLE articles (
        id INTEGER PRIMARY KEY AUTOINCREMENT,
        title TEXT NOT NULL,
        content TEXT NOT NULL,
        category TEXT NOT NULL DEFAULT '',
        author TEXT NOT NULL DEFAULT '',
        created_at INTEGER NOT NULL,
        updated_at INTEGER NOT NULL,
        tags TEXT,
        summary TEXT,
        embedded INTEGER NOT NULL DEFAULT 0
    );

    CREATE INDEX idx_articles_created_at ON articles(created_at);
    CREATE INDEX idx_articles_author ON articles(author);
    "#,
];
