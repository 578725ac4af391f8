//! Deterministic in-process language model for tests

use super::pipeline::Stage;
use super::provider::{LanguageModel, ProviderError};
use async_trait::async_trait;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Mutex;
use std::time::Duration;

pub(crate) struct FakeModel {
    tags: Vec<String>,
    summary: String,
    dimension: usize,
    embeddings: Vec<(String, Vec<f32>)>,
    failing: Vec<Stage>,
    hanging: Vec<Stage>,
    delay: Duration,
    calls: Mutex<Vec<Stage>>,
    in_flight: AtomicUsize,
    max_in_flight: AtomicUsize,
}

impl FakeModel {
    pub fn new(dimension: usize) -> Self {
        Self {
            tags: vec!["Rust".to_string(), "Databases".to_string()],
            summary: "A short summary.".to_string(),
            dimension,
            embeddings: Vec::new(),
            failing: Vec::new(),
            hanging: Vec::new(),
            delay: Duration::ZERO,
            calls: Mutex::new(Vec::new()),
            in_flight: AtomicUsize::new(0),
            max_in_flight: AtomicUsize::new(0),
        }
    }

    pub fn with_tags(mut self, tags: &[&str]) -> Self {
        self.tags = tags.iter().map(|t| t.to_string()).collect();
        self
    }

    pub fn with_summary(mut self, summary: &str) -> Self {
        self.summary = summary.to_string();
        self
    }

    /// Return `vector` for any text containing `needle`
    pub fn with_embedding(mut self, needle: &str, vector: Vec<f32>) -> Self {
        self.embeddings.push((needle.to_string(), vector));
        self
    }

    pub fn failing(mut self, stage: Stage) -> Self {
        self.failing.push(stage);
        self
    }

    pub fn hanging(mut self, stage: Stage) -> Self {
        self.hanging.push(stage);
        self
    }

    pub fn with_delay(mut self, delay: Duration) -> Self {
        self.delay = delay;
        self
    }

    pub fn calls(&self, stage: Stage) -> usize {
        self.calls
            .lock()
            .unwrap()
            .iter()
            .filter(|s| **s == stage)
            .count()
    }

    pub fn max_in_flight(&self) -> usize {
        self.max_in_flight.load(Ordering::SeqCst)
    }

    pub fn in_flight(&self) -> usize {
        self.in_flight.load(Ordering::SeqCst)
    }

    async fn enter(&self, stage: Stage) -> Result<(), ProviderError> {
        self.calls.lock().unwrap().push(stage);

        let _call = InFlight::enter(&self.in_flight, &self.max_in_flight);

        if self.hanging.contains(&stage) {
            tokio::time::sleep(Duration::from_secs(3600)).await;
        }
        if !self.delay.is_zero() {
            tokio::time::sleep(self.delay).await;
        }

        if self.failing.contains(&stage) {
            return Err(ProviderError::Request(format!("{} unavailable", stage)));
        }
        Ok(())
    }

    fn default_embedding(&self, text: &str) -> Vec<f32> {
        let mut vector = vec![1.0; self.dimension];
        for byte in text.bytes() {
            vector[byte as usize % self.dimension] += 1.0;
        }
        vector
    }
}

/// Holds one slot of the in-flight count, released even when the call is dropped
struct InFlight<'a> {
    counter: &'a AtomicUsize,
}

impl<'a> InFlight<'a> {
    fn enter(counter: &'a AtomicUsize, high_water: &AtomicUsize) -> Self {
        let current = counter.fetch_add(1, Ordering::SeqCst) + 1;
        high_water.fetch_max(current, Ordering::SeqCst);
        Self { counter }
    }
}

impl Drop for InFlight<'_> {
    fn drop(&mut self) {
        self.counter.fetch_sub(1, Ordering::SeqCst);
    }
}

#[async_trait]
impl LanguageModel for FakeModel {
    async fn generate_tags(&self, _text: &str) -> Result<Vec<String>, ProviderError> {
        self.enter(Stage::Tags).await?;
        Ok(self.tags.clone())
    }

    async fn generate_summary(&self, _text: &str) -> Result<String, ProviderError> {
        self.enter(Stage::Summary).await?;
        Ok(self.summary.clone())
    }

    async fn generate_embedding(&self, text: &str) -> Result<Vec<f32>, ProviderError> {
        self.enter(Stage::Embedding).await?;
        let vector = self
            .embeddings
            .iter()
            .find(|(needle, _)| text.contains(needle.as_str()))
            .map(|(_, vector)| vector.clone())
            .unwrap_or_else(|| self.default_embedding(text));
        Ok(vector)
    }

    fn name(&self) -> &str {
        "fake"
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_abandoned_call_releases_in_flight_slot() {
        let model = FakeModel::new(4).hanging(Stage::Summary);

        let result =
            tokio::time::timeout(Duration::from_millis(20), model.generate_summary("text")).await;

        assert!(result.is_err());
        assert_eq!(model.in_flight(), 0);
        assert_eq!(model.max_in_flight(), 1);
    }

    #[tokio::test]
    async fn test_completed_call_releases_in_flight_slot() {
        let model = FakeModel::new(4).failing(Stage::Tags);

        assert!(model.generate_tags("text").await.is_err());
        assert_eq!(model.in_flight(), 0);
    }
}
