//! Know - personal knowledge base with background enrichment
//!
//! Articles are stored in SQLite and enriched asynchronously: a bounded pool of
//! workers asks a language model for topic tags, a summary and an embedding,
//! which feed a popular-tags cache and a cosine-similarity vector index.

pub mod cli;
pub mod config;
pub mod daemon;
pub mod enrichment;
pub mod error;
pub mod service;
pub mod storage;
pub mod tags;
pub mod vector;

pub use error::{KnowError, Result};
