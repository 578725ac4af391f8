//! Vector similarity index
//!
//! Embeddings live in the `vec_articles` sqlite-vec table (`vec0`) as packed
//! little-endian f32 blobs, one row per article. Nearest-neighbour queries rank
//! rows with sqlite-vec's `vec_distance_cosine`.
//!
//! Availability is checked once when the index is opened. If the extension is
//! missing, the table cannot be created for the configured dimension, or
//! indexing is disabled in configuration, the index runs in degraded mode:
//! writes are ignored and searches return nothing.
mod codec;

pub use codec::{decode, encode, register_extension};

use crate::config::IndexingConfig;
use crate::error::{KnowError, Result};
use crate::storage::Database;
use rusqlite::params;
use serde::{Deserialize, Serialize};
use std::sync::Arc;

/// Search hit: article id and its cosine distance to the query
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct VectorMatch {
    pub article_id: i64,
    /// Cosine distance (0.0 = identical direction, lower is more similar)
    pub distance: f64,
}

#[derive(Debug, Clone)]
enum IndexState {
    Enabled { version: String },
    Disabled { reason: String },
}

/// Fixed-dimension nearest-neighbour index keyed by article id
pub struct VectorIndex {
    db: Arc<Database>,
    dimension: usize,
    state: IndexState,
}

impl VectorIndex {
    /// Open the index, checking backend support once
    ///
    /// Never fails: an unusable backend puts the index into degraded mode.
    pub fn open(db: Arc<Database>, config: &IndexingConfig) -> Self {
        let dimension = config.vector_dim;

        let state = if !config.enabled {
            IndexState::Disabled {
                reason: "disabled by configuration".to_string(),
            }
        } else {
            match Self::check_backend(&db, dimension) {
                Ok(version) => IndexState::Enabled { version },
                Err(e) => IndexState::Disabled {
                    reason: e.to_string(),
                },
            }
        };

        match &state {
            IndexState::Enabled { version } => {
                tracing::info!("Vector index ready (sqlite-vec {}, {} dimensions)", version, dimension)
            }
            IndexState::Disabled { reason } => tracing::warn!(
                "Vector index unavailable, similarity search disabled: {}",
                reason
            ),
        }

        Self {
            db,
            dimension,
            state,
        }
    }

    /// Check that sqlite-vec is loaded and `vec_articles` matches `dimension`
    fn check_backend(db: &Database, dimension: usize) -> Result<String> {
        if dimension == 0 {
            return Err(KnowError::Config(
                "vector dimension must be greater than 0".to_string(),
            ));
        }

        let conn = db.get_conn()?;
        let version: String = conn.query_row("SELECT vec_version()", [], |row| row.get(0))?;

        conn.execute_batch(&format!(
            "CREATE VIRTUAL TABLE IF NOT EXISTS vec_articles USING vec0(
                article_id INTEGER PRIMARY KEY,
                embedding float[{}]
            );",
            dimension
        ))?;

        // An existing table keeps the dimension it was created with
        let declared: String = conn.query_row(
            "SELECT sql FROM sqlite_master WHERE name = 'vec_articles'",
            [],
            |row| row.get(0),
        )?;
        if !declared.contains(&format!("float[{}]", dimension)) {
            return Err(KnowError::Config(format!(
                "vec_articles was created with a different layout than float[{}]: {}",
                dimension, declared
            )));
        }

        Ok(version)
    }

    /// Whether the backend passed its availability check
    pub fn is_enabled(&self) -> bool {
        matches!(self.state, IndexState::Enabled { .. })
    }

    /// Get vector dimension
    pub fn dimension(&self) -> usize {
        self.dimension
    }

    fn check_dimension(&self, vector: &[f32]) -> Result<()> {
        if vector.len() != self.dimension {
            return Err(KnowError::InvalidDimension {
                expected: self.dimension,
                actual: vector.len(),
            });
        }
        Ok(())
    }

    /// Replace the entry for `article_id` with `vector`
    pub fn upsert(&self, article_id: i64, vector: &[f32]) -> Result<()> {
        if !self.is_enabled() {
            return Ok(());
        }
        self.check_dimension(vector)?;

        let mut conn = self.db.get_conn()?;
        let tx = conn.transaction()?;
        tx.execute(
            "DELETE FROM vec_articles WHERE article_id = ?1",
            params![article_id],
        )?;
        tx.execute(
            "INSERT INTO vec_articles (article_id, embedding) VALUES (?1, ?2)",
            params![article_id, encode(vector)],
        )?;
        tx.commit()?;

        tracing::debug!(article_id, "Stored embedding");
        Ok(())
    }

    /// Remove the entry for `article_id`; absence is not an error
    pub fn delete(&self, article_id: i64) -> Result<()> {
        if !self.is_enabled() {
            return Ok(());
        }

        let conn = self.db.get_conn()?;
        conn.execute(
            "DELETE FROM vec_articles WHERE article_id = ?1",
            params![article_id],
        )?;
        Ok(())
    }

    /// Up to `k` nearest articles with cosine distance below 1.0, closest first
    ///
    /// Entries whose article row no longer exists are skipped.
    pub fn search(&self, query: &[f32], k: usize) -> Result<Vec<VectorMatch>> {
        if !self.is_enabled() || k == 0 {
            return Ok(Vec::new());
        }
        self.check_dimension(query)?;

        let conn = self.db.get_conn()?;
        let mut stmt = conn.prepare(
            "SELECT article_id, distance FROM (
                SELECT v.article_id AS article_id,
                       vec_distance_cosine(v.embedding, ?1) AS distance
                FROM vec_articles v
                JOIN articles a ON a.id = v.article_id
             )
             WHERE distance < 1.0
             ORDER BY distance ASC
             LIMIT ?2",
        )?;
        let matches = stmt
            .query_map(params![encode(query), k as i64], |row| {
                Ok(VectorMatch {
                    article_id: row.get(0)?,
                    distance: row.get(1)?,
                })
            })?
            .collect::<rusqlite::Result<Vec<_>>>()?;

        Ok(matches)
    }

    /// Stored vector for an article, if any
    pub fn get(&self, article_id: i64) -> Result<Option<Vec<f32>>> {
        if !self.is_enabled() {
            return Ok(None);
        }

        let conn = self.db.get_conn()?;
        let mut stmt = conn.prepare("SELECT embedding FROM vec_articles WHERE article_id = ?1")?;
        let mut rows = stmt.query(params![article_id])?;
        match rows.next()? {
            Some(row) => {
                let blob: Vec<u8> = row.get(0)?;
                Ok(Some(decode(&blob)?))
            }
            None => Ok(None),
        }
    }

    /// Number of stored vectors
    pub fn len(&self) -> Result<usize> {
        if !self.is_enabled() {
            return Ok(0);
        }

        let conn = self.db.get_conn()?;
        let count: i64 = conn.query_row("SELECT COUNT(*) FROM vec_articles", [], |row| row.get(0))?;
        Ok(count as usize)
    }

    /// Check if index is empty
    pub fn is_empty(&self) -> Result<bool> {
        Ok(self.len()? == 0)
    }

    /// Remove all vectors
    pub fn clear(&self) -> Result<()> {
        if !self.is_enabled() {
            return Ok(());
        }

        let conn = self.db.get_conn()?;
        conn.execute("DELETE FROM vec_articles", [])?;
        Ok(())
    }
}
