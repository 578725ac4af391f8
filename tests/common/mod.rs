#![allow(dead_code)]

use async_trait::async_trait;
use know::enrichment::{LanguageModel, ProviderError};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::time::Duration;

/// Deterministic model: tags come from keywords in the text, embeddings from
/// a fixed list of topic axes
pub struct KeywordModel {
    pub dimension: usize,
    pub delay: Duration,
    pub fail_summaries: bool,
    in_flight: AtomicUsize,
    max_in_flight: AtomicUsize,
}

const TOPICS: [&str; 4] = ["rust", "python", "database", "history"];

impl KeywordModel {
    pub fn new() -> Self {
        Self {
            dimension: TOPICS.len(),
            delay: Duration::from_millis(5),
            fail_summaries: false,
            in_flight: AtomicUsize::new(0),
            max_in_flight: AtomicUsize::new(0),
        }
    }

    pub fn max_in_flight(&self) -> usize {
        self.max_in_flight.load(Ordering::SeqCst)
    }

    async fn simulate_latency(&self) {
        let current = self.in_flight.fetch_add(1, Ordering::SeqCst) + 1;
        self.max_in_flight.fetch_max(current, Ordering::SeqCst);
        let _slot = Slot(&self.in_flight);
        tokio::time::sleep(self.delay).await;
    }
}

/// Releases an in-flight slot when the call finishes or is dropped
struct Slot<'a>(&'a AtomicUsize);

impl Drop for Slot<'_> {
    fn drop(&mut self) {
        self.0.fetch_sub(1, Ordering::SeqCst);
    }
}

#[async_trait]
impl LanguageModel for KeywordModel {
    async fn generate_tags(&self, text: &str) -> Result<Vec<String>, ProviderError> {
        self.simulate_latency().await;
        let lower = text.to_lowercase();
        Ok(TOPICS
            .iter()
            .filter(|topic| lower.contains(*topic))
            .map(|topic| {
                let mut chars = topic.chars();
                match chars.next() {
                    Some(first) => first.to_uppercase().chain(chars).collect(),
                    None => String::new(),
                }
            })
            .collect())
    }

    async fn generate_summary(&self, text: &str) -> Result<String, ProviderError> {
        self.simulate_latency().await;
        if self.fail_summaries {
            return Err(ProviderError::Status {
                status: 503,
                body: "unavailable".to_string(),
            });
        }
        Ok(format!("About {} characters of text.", text.len()))
    }

    async fn generate_embedding(&self, text: &str) -> Result<Vec<f32>, ProviderError> {
        self.simulate_latency().await;
        let lower = text.to_lowercase();
        Ok(TOPICS
            .iter()
            .map(|topic| lower.matches(topic).count() as f32)
            .collect())
    }

    fn name(&self) -> &str {
        "keyword"
    }
}
