//! Durable article records
//!
//! The enrichment core only needs a narrow view of article persistence, expressed
//! by the [`ArticleStore`] trait. [`SqliteArticleStore`] is the production backend.

use crate::error::{KnowError, Result};
use crate::storage::Database;
use chrono::{DateTime, Utc};
use rusqlite::{params, OptionalExtension, Row};
use serde::{Deserialize, Serialize};
use std::sync::Arc;

/// A stored article together with its enrichment fields
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Article {
    pub id: i64,
    pub title: String,
    pub content: String,
    pub category: String,
    pub author: String,
    pub created_at: DateTime<Utc>,
    /// `None` until the tag stage has run; `Some(vec![])` is a valid tagged state
    pub tags: Option<Vec<String>>,
    pub summary: Option<String>,
    /// Whether a vector entry has been written for the current content
    pub embedded: bool,
}

impl Article {
    /// Tags as a slice, empty when the article has not been tagged
    pub fn tag_list(&self) -> &[String] {
        self.tags.as_deref().unwrap_or(&[])
    }

    /// Text fed to the tag and embedding stages
    pub fn full_text(&self) -> String {
        format!("{}\n\n{}", self.title, self.content)
    }
}

/// Fields supplied when creating an article
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct NewArticle {
    pub title: String,
    pub content: String,
    #[serde(default)]
    pub category: String,
    #[serde(default)]
    pub author: String,
    /// Tags supplied by the author; left empty to let enrichment generate them
    #[serde(default)]
    pub tags: Vec<String>,
}

/// Fields replaced by an explicit edit
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ArticleEdit {
    pub title: String,
    pub content: String,
    #[serde(default)]
    pub category: String,
    /// Replacement tags from the author; `None` lets enrichment regenerate them
    #[serde(default)]
    pub tags: Option<Vec<String>>,
}

/// Persistence operations used by the enrichment core
///
/// Enrichment writes are partial-field updates and must be idempotent under
/// repeated identical calls. Methods returning `bool` report whether a row changed.
pub trait ArticleStore: Send + Sync {
    fn insert(&self, article: &NewArticle) -> Result<Article>;

    /// Insert a batch of articles; the SQLite store commits them in one transaction
    fn insert_many(&self, articles: &[NewArticle]) -> Result<Vec<Article>> {
        articles.iter().map(|article| self.insert(article)).collect()
    }

    fn get(&self, id: i64) -> Result<Option<Article>>;

    /// Replace title/content/category, reset summary and the embedded flag, and
    /// store the edit's tags (pending when none are supplied).
    /// Returns the article as it was before the edit.
    fn edit(&self, id: i64, edit: &ArticleEdit) -> Result<Option<Article>>;

    /// Remove an article, returning the removed record
    fn delete(&self, id: i64) -> Result<Option<Article>>;

    /// Write tags only while the field is still pending (NULL or empty)
    fn set_tags_if_pending(&self, id: i64, tags: &[String]) -> Result<bool>;

    fn set_summary(&self, id: i64, summary: &str) -> Result<bool>;

    fn set_embedded(&self, id: i64, embedded: bool) -> Result<bool>;

    /// Tag sets of every stored article (used to build the tag cache)
    fn all_tag_sets(&self) -> Result<Vec<Vec<String>>>;

    fn list(&self) -> Result<Vec<Article>>;

    /// Remove every article, returning how many were deleted
    fn clear(&self) -> Result<usize>;
}

/// SQLite-backed article store
pub struct SqliteArticleStore {
    db: Arc<Database>,
}

const ARTICLE_COLUMNS: &str =
    "id, title, content, category, author, created_at, tags, summary, embedded";

impl SqliteArticleStore {
    pub fn new(db: Arc<Database>) -> Self {
        Self { db }
    }

    fn insert_on(conn: &rusqlite::Connection, article: &NewArticle) -> Result<Article> {
        let now = Utc::now().timestamp();
        let tags = if article.tags.is_empty() {
            None
        } else {
            Some(encode_tags(&article.tags)?)
        };

        conn.execute(
            "INSERT INTO articles (title, content, category, author, created_at, updated_at, tags)
             VALUES (?1, ?2, ?3, ?4, ?5, ?5, ?6)",
            params![
                &article.title,
                &article.content,
                &article.category,
                &article.author,
                now,
                tags,
            ],
        )?;

        let id = conn.last_insert_rowid();
        Self::fetch(conn, id)?.ok_or(KnowError::ArticleNotFound { id })
    }

    fn fetch(conn: &rusqlite::Connection, id: i64) -> Result<Option<Article>> {
        let sql = format!("SELECT {} FROM articles WHERE id = ?1", ARTICLE_COLUMNS);
        Ok(conn.query_row(&sql, params![id], row_to_article).optional()?)
    }
}

fn encode_tags(tags: &[String]) -> Result<String> {
    serde_json::to_string(tags).map_err(|e| KnowError::Json {
        source: e,
        context: "Failed to serialize tags".to_string(),
    })
}

fn decode_tags(id: i64, raw: Option<String>) -> Option<Vec<String>> {
    let raw = raw?;
    match serde_json::from_str(&raw) {
        Ok(tags) => Some(tags),
        Err(e) => {
            tracing::warn!(article_id = id, "Ignoring malformed tags {:?}: {}", raw, e);
            None
        }
    }
}

fn row_to_article(row: &Row<'_>) -> rusqlite::Result<Article> {
    let id: i64 = row.get(0)?;
    let created_at: i64 = row.get(5)?;
    Ok(Article {
        id,
        title: row.get(1)?,
        content: row.get(2)?,
        category: row.get(3)?,
        author: row.get(4)?,
        created_at: DateTime::from_timestamp(created_at, 0).unwrap_or_default(),
        tags: decode_tags(id, row.get(6)?),
        summary: row.get(7)?,
        embedded: row.get(8)?,
    })
}

impl ArticleStore for SqliteArticleStore {
    fn insert(&self, article: &NewArticle) -> Result<Article> {
        let conn = self.db.get_conn()?;
        Self::insert_on(&conn, article)
    }

    fn insert_many(&self, articles: &[NewArticle]) -> Result<Vec<Article>> {
        let mut conn = self.db.get_conn()?;
        let tx = conn.transaction()?;

        let inserted = articles
            .iter()
            .map(|article| Self::insert_on(&tx, article))
            .collect::<Result<Vec<_>>>()?;
        tx.commit()?;

        Ok(inserted)
    }

    fn get(&self, id: i64) -> Result<Option<Article>> {
        let conn = self.db.get_conn()?;
        Self::fetch(&conn, id)
    }

    fn edit(&self, id: i64, edit: &ArticleEdit) -> Result<Option<Article>> {
        let mut conn = self.db.get_conn()?;
        let tx = conn.transaction()?;

        let Some(previous) = Self::fetch(&tx, id)? else {
            return Ok(None);
        };

        let tags = match edit.tags.as_deref() {
            Some(tags) if !tags.is_empty() => Some(encode_tags(tags)?),
            _ => None,
        };

        tx.execute(
            "UPDATE articles
             SET title = ?2, content = ?3, category = ?4, updated_at = ?5,
                 tags = ?6, summary = NULL, embedded = 0
             WHERE id = ?1",
            params![
                id,
                &edit.title,
                &edit.content,
                &edit.category,
                Utc::now().timestamp(),
                tags,
            ],
        )?;
        tx.commit()?;

        Ok(Some(previous))
    }

    fn delete(&self, id: i64) -> Result<Option<Article>> {
        let mut conn = self.db.get_conn()?;
        let tx = conn.transaction()?;

        let removed = Self::fetch(&tx, id)?;
        if removed.is_some() {
            tx.execute("DELETE FROM articles WHERE id = ?1", params![id])?;
        }
        tx.commit()?;

        Ok(removed)
    }

    fn set_tags_if_pending(&self, id: i64, tags: &[String]) -> Result<bool> {
        let conn = self.db.get_conn()?;
        let changed = conn.execute(
            "UPDATE articles SET tags = ?2
             WHERE id = ?1 AND (tags IS NULL OR tags = '[]')",
            params![id, encode_tags(tags)?],
        )?;
        Ok(changed > 0)
    }

    fn set_summary(&self, id: i64, summary: &str) -> Result<bool> {
        let conn = self.db.get_conn()?;
        let changed = conn.execute(
            "UPDATE articles SET summary = ?2 WHERE id = ?1",
            params![id, summary],
        )?;
        Ok(changed > 0)
    }

    fn set_embedded(&self, id: i64, embedded: bool) -> Result<bool> {
        let conn = self.db.get_conn()?;
        let changed = conn.execute(
            "UPDATE articles SET embedded = ?2 WHERE id = ?1",
            params![id, embedded],
        )?;
        Ok(changed > 0)
    }

    fn all_tag_sets(&self) -> Result<Vec<Vec<String>>> {
        let conn = self.db.get_conn()?;
        let mut stmt = conn.prepare("SELECT id, tags FROM articles WHERE tags IS NOT NULL")?;
        let rows = stmt.query_map([], |row| {
            Ok((row.get::<_, i64>(0)?, row.get::<_, Option<String>>(1)?))
        })?;

        let mut sets = Vec::new();
        for row in rows {
            let (id, raw) = row?;
            if let Some(tags) = decode_tags(id, raw) {
                sets.push(tags);
            }
        }
        Ok(sets)
    }

    fn list(&self) -> Result<Vec<Article>> {
        let conn = self.db.get_conn()?;
        let sql = format!("SELECT {} FROM articles ORDER BY id", ARTICLE_COLUMNS);
        let mut stmt = conn.prepare(&sql)?;
        let articles = stmt
            .query_map([], row_to_article)?
            .collect::<rusqlite::Result<Vec<_>>>()?;
        Ok(articles)
    }

    fn clear(&self) -> Result<usize> {
        let conn = self.db.get_conn()?;
        Ok(conn.execute("DELETE FROM articles", [])?)
    }
}
