//! Bulk seeding from a public question/passage dataset
//!
//! Pulls rows from the Hugging Face datasets server (`google/boolq`) and stores
//! each one as an article queued for enrichment, which makes it easy to load the
//! daemon with realistic work.

use super::ArticleService;
use crate::enrichment::ProviderError;
use crate::error::Result;
use crate::storage::NewArticle;
use serde::Deserialize;
use std::time::Duration;

pub const DEFAULT_DATASET_URL: &str = "https://datasets-server.huggingface.co";

const USER_AGENT: &str = concat!("know/", env!("CARGO_PKG_VERSION"));
const DATASET: &str = "google/boolq";
const BATCH_SIZE: usize = 100;
const DEFAULT_COUNT: usize = 100;
const MAX_COUNT: usize = 5000;

pub const SEED_CATEGORY: &str = "StressTest";
pub const SEED_AUTHOR: &str = "system_stress_test";

#[derive(Deserialize)]
struct RowsResponse {
    #[serde(default)]
    rows: Vec<RowEntry>,
}

#[derive(Deserialize)]
struct RowEntry {
    row: BoolqRow,
}

#[derive(Deserialize)]
struct BoolqRow {
    question: Option<String>,
    passage: Option<String>,
}

impl BoolqRow {
    fn into_article(self) -> NewArticle {
        NewArticle {
            title: self
                .question
                .filter(|q| !q.trim().is_empty())
                .unwrap_or_else(|| "Untitled".to_string()),
            content: self
                .passage
                .filter(|p| !p.trim().is_empty())
                .unwrap_or_else(|| "No content".to_string()),
            category: SEED_CATEGORY.to_string(),
            author: SEED_AUTHOR.to_string(),
            tags: Vec::new(),
        }
    }
}

/// Loads dataset rows as articles
pub struct DatasetSeeder {
    http_client: reqwest::Client,
    base_url: String,
}

impl DatasetSeeder {
    pub fn new(timeout: Duration) -> std::result::Result<Self, ProviderError> {
        Self::with_base_url(DEFAULT_DATASET_URL, timeout)
    }

    pub fn with_base_url(
        base_url: &str,
        timeout: Duration,
    ) -> std::result::Result<Self, ProviderError> {
        let http_client = reqwest::Client::builder()
            .user_agent(USER_AGENT)
            .timeout(timeout)
            .build()?;

        Ok(Self {
            http_client,
            base_url: base_url.trim_end_matches('/').to_string(),
        })
    }

    /// Number of articles a request for `requested` will produce at most
    pub fn clamp_count(requested: i64) -> usize {
        if requested <= 0 {
            DEFAULT_COUNT
        } else {
            (requested as usize).min(MAX_COUNT)
        }
    }

    async fn fetch_batch(
        &self,
        offset: usize,
        length: usize,
    ) -> std::result::Result<Vec<NewArticle>, ProviderError> {
        let url = format!("{}/rows", self.base_url);
        let offset = offset.to_string();
        let length = length.to_string();
        let response = self
            .http_client
            .get(&url)
            .query(&[
                ("dataset", DATASET),
                ("config", "default"),
                ("split", "train"),
                ("offset", offset.as_str()),
                ("length", length.as_str()),
            ])
            .send()
            .await?;

        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            return Err(ProviderError::Status {
                status: status.as_u16(),
                body,
            });
        }

        let rows: RowsResponse = response.json().await?;
        Ok(rows
            .rows
            .into_iter()
            .map(|entry| entry.row.into_article())
            .collect())
    }

    /// Fetch up to `requested` rows in batches, store them and queue each one
    ///
    /// Stops early when the dataset runs out. Returns the number of articles created.
    pub async fn seed(&self, service: &ArticleService, requested: i64) -> Result<usize> {
        let target = Self::clamp_count(requested);
        tracing::info!("Seeding {} articles from {}", target, DATASET);

        let mut created = 0;
        while created < target {
            let length = BATCH_SIZE.min(target - created);
            let batch = self.fetch_batch(created, length).await?;
            if batch.is_empty() {
                tracing::info!("Dataset exhausted after {} rows", created);
                break;
            }

            created += service.create_many(&batch)?.len();
        }

        tracing::info!("Seeded {} articles", created);
        Ok(created)
    }
}
