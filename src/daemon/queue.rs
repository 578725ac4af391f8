// Unbounded FIFO of article ids awaiting enrichment

use crate::error::{KnowError, Result};
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use tokio::sync::{mpsc, Mutex};
use tokio_util::sync::CancellationToken;

/// Buffer between the write path and the worker pool
///
/// Enqueueing never waits, so ingestion latency is independent of provider latency.
/// Items are not deduplicated: the same id may be queued several times.
pub struct EnrichmentQueue {
    sender: mpsc::UnboundedSender<i64>,
    receiver: Mutex<mpsc::UnboundedReceiver<i64>>,
    closed: AtomicBool,
    pending: AtomicUsize,
}

impl EnrichmentQueue {
    pub fn new() -> Self {
        let (sender, receiver) = mpsc::unbounded_channel();
        Self {
            sender,
            receiver: Mutex::new(receiver),
            closed: AtomicBool::new(false),
            pending: AtomicUsize::new(0),
        }
    }

    /// Queue an article id; fails only once the queue has been closed
    pub fn enqueue(&self, article_id: i64) -> Result<()> {
        if self.closed.load(Ordering::Acquire) {
            return Err(KnowError::QueueClosed);
        }

        self.sender
            .send(article_id)
            .map_err(|_| KnowError::QueueClosed)?;
        self.pending.fetch_add(1, Ordering::Relaxed);

        tracing::trace!(article_id, "Queued article for enrichment");
        Ok(())
    }

    /// Wait for the next id, or `None` once cancelled or closed
    pub async fn dequeue(&self, cancel: &CancellationToken) -> Option<i64> {
        if self.is_closed() {
            return None;
        }

        let mut receiver = tokio::select! {
            biased;
            _ = cancel.cancelled() => return None,
            receiver = self.receiver.lock() => receiver,
        };

        let item = tokio::select! {
            biased;
            _ = cancel.cancelled() => None,
            item = receiver.recv() => item,
        };

        if item.is_some() {
            // Saturating: an enqueue racing with this dequeue may not have counted yet
            let _ = self
                .pending
                .fetch_update(Ordering::Relaxed, Ordering::Relaxed, |n| {
                    Some(n.saturating_sub(1))
                });
        }
        if self.is_closed() {
            return None;
        }
        item
    }

    /// Stop accepting work; buffered ids are discarded
    pub fn close(&self) {
        if !self.closed.swap(true, Ordering::AcqRel) {
            let dropped = self.pending.swap(0, Ordering::Relaxed);
            if dropped > 0 {
                tracing::info!("Enrichment queue closed, discarding {} queued articles", dropped);
            }
        }
    }

    pub fn is_closed(&self) -> bool {
        self.closed.load(Ordering::Acquire)
    }

    /// Approximate number of buffered ids
    pub fn len(&self) -> usize {
        self.pending.load(Ordering::Relaxed)
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

impl Default for EnrichmentQueue {
    fn default() -> Self {
        Self::new()
    }
}
