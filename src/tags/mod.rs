//! Tag frequency cache
//!
//! In-memory index of how many articles currently carry each tag, so popular
//! tags can be answered without scanning every article. Tags compare
//! case-insensitively; the spelling seen first is the one reported.
//!
//! The cache has an explicit initialization phase: until [`TagFrequencyCache::initialize`]
//! has scanned the article store, every mutation is ignored and reads are empty.

use crate::error::Result;
use crate::storage::ArticleStore;
use ahash::{HashSet, HashSetExt, RandomState};
use dashmap::DashMap;
use std::sync::atomic::{AtomicBool, Ordering};

/// Count for one case-insensitive tag
#[derive(Debug, Clone)]
struct TagEntry {
    display: String,
    count: u64,
}

/// A tag and the number of articles carrying it
#[derive(Debug, Clone, PartialEq, Eq, serde::Serialize, serde::Deserialize)]
pub struct TagCount {
    pub tag: String,
    pub count: u64,
}

/// Concurrent tag → article count index
///
/// Every mutation goes through the map's entry API under the owning shard lock,
/// so updates to unrelated tags never serialize and a clear cannot strand an
/// increment on a detached counter.
#[derive(Debug, Default)]
pub struct TagFrequencyCache {
    entries: DashMap<String, TagEntry, RandomState>,
    initialized: AtomicBool,
}

fn normalize(tag: &str) -> String {
    tag.to_lowercase()
}

impl TagFrequencyCache {
    /// Create an empty, uninitialized cache
    pub fn new() -> Self {
        Self::default()
    }

    /// Build initial counts from every stored article's tags
    ///
    /// Calling this again after a successful initialization is a no-op.
    pub fn initialize(&self, store: &dyn ArticleStore) -> Result<()> {
        if self.is_initialized() {
            return Ok(());
        }

        let tag_sets = store.all_tag_sets()?;

        self.entries.clear();
        for tags in &tag_sets {
            for tag in tags {
                self.apply(tag, |count| count + 1);
            }
        }

        self.initialized.store(true, Ordering::Release);
        tracing::info!(
            "Tag cache initialized with {} unique tags from {} tagged articles",
            self.entries.len(),
            tag_sets.len()
        );

        Ok(())
    }

    pub fn is_initialized(&self) -> bool {
        self.initialized.load(Ordering::Acquire)
    }

    /// Update the count for `tag` in place, creating it at zero on first reference
    fn apply(&self, tag: &str, update: impl FnOnce(u64) -> u64) {
        let mut entry = self.entries.entry(normalize(tag)).or_insert_with(|| TagEntry {
            display: tag.to_string(),
            count: 0,
        });
        entry.count = update(entry.count);
    }

    /// Increment the count of every tag in `tags`
    pub fn add_tags<S: AsRef<str>>(&self, tags: &[S]) {
        if !self.is_initialized() {
            return;
        }

        for tag in tags {
            self.apply(tag.as_ref(), |count| count + 1);
        }
    }

    /// Decrement the count of every tag in `tags`, never below zero
    pub fn remove_tags<S: AsRef<str>>(&self, tags: &[S]) {
        if !self.is_initialized() {
            return;
        }

        for tag in tags {
            self.apply(tag.as_ref(), |count| count.saturating_sub(1));
        }
    }

    /// Apply a tag set change, touching only tags exclusive to one side
    pub fn update_tags<S: AsRef<str>, T: AsRef<str>>(&self, old: &[S], new: &[T]) {
        if !self.is_initialized() {
            return;
        }

        let old_keys = unique_by_key(old);
        let new_keys = unique_by_key(new);

        let removed: Vec<&str> = old_keys
            .iter()
            .filter(|(key, _)| !new_keys.iter().any(|(k, _)| k == key))
            .map(|(_, tag)| *tag)
            .collect();
        let added: Vec<&str> = new_keys
            .iter()
            .filter(|(key, _)| !old_keys.iter().any(|(k, _)| k == key))
            .map(|(_, tag)| *tag)
            .collect();

        self.remove_tags(&removed);
        self.add_tags(&added);
    }

    /// All tags with a positive count, most frequent first
    pub fn popular_tags(&self) -> Vec<TagCount> {
        if !self.is_initialized() {
            return Vec::new();
        }

        let mut tags: Vec<TagCount> = self
            .entries
            .iter()
            .filter(|entry| entry.count > 0)
            .map(|entry| TagCount {
                tag: entry.display.clone(),
                count: entry.count,
            })
            .collect();

        tags.sort_by(|a, b| b.count.cmp(&a.count).then_with(|| a.tag.cmp(&b.tag)));
        tags
    }

    /// Current count for a tag (case-insensitive); unseen tags report 0
    pub fn count(&self, tag: &str) -> u64 {
        if !self.is_initialized() {
            return 0;
        }

        self.entries
            .get(&normalize(tag))
            .map_or(0, |entry| entry.count)
    }

    /// Number of distinct tags ever observed, including those at zero
    pub fn len(&self) -> usize {
        if !self.is_initialized() {
            return 0;
        }

        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Drop every count; the cache stays initialized
    pub fn clear(&self) {
        self.entries.clear();
    }
}

/// Case-insensitive de-duplication keeping the first spelling
fn unique_by_key<S: AsRef<str>>(tags: &[S]) -> Vec<(String, &str)> {
    let mut seen = HashSet::new();
    let mut unique = Vec::with_capacity(tags.len());
    for tag in tags {
        let tag = tag.as_ref();
        let key = normalize(tag);
        if seen.insert(key.clone()) {
            unique.push((key, tag));
        }
    }
    unique
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::storage::{Database, NewArticle, SqliteArticleStore};
    use std::sync::Arc;
    use tempfile::TempDir;

    fn ready_cache() -> TagFrequencyCache {
        let cache = TagFrequencyCache::new();
        cache.initialized.store(true, Ordering::Release);
        cache
    }

    #[test]
    fn test_uninitialized_cache_ignores_everything() {
        let cache = TagFrequencyCache::new();
        cache.add_tags(&["Rust"]);
        cache.remove_tags(&["Rust"]);
        cache.update_tags(&["A"], &["B"]);

        assert!(cache.popular_tags().is_empty());
        assert!(cache.is_empty());
    }

    #[test]
    fn test_case_insensitive_identity() {
        let cache = ready_cache();
        cache.add_tags(&["Go", "go"]);

        assert_eq!(cache.len(), 1);
        assert_eq!(cache.count("GO"), 2);
        assert_eq!(
            cache.popular_tags(),
            vec![TagCount {
                tag: "Go".to_string(),
                count: 2
            }]
        );
    }

    #[test]
    fn test_remove_floors_at_zero() {
        let cache = ready_cache();
        cache.add_tags(&["X"]);
        cache.remove_tags(&["X"]);
        cache.remove_tags(&["X"]);

        assert_eq!(cache.count("X"), 0);
        // Key is retained at zero but hidden from popular tags
        assert_eq!(cache.len(), 1);
        assert!(cache.popular_tags().is_empty());

        cache.remove_tags(&["Never seen"]);
        assert_eq!(cache.count("never seen"), 0);
        assert_eq!(cache.len(), 2);
    }

    #[test]
    fn test_update_touches_only_symmetric_difference() {
        let cache = ready_cache();
        cache.add_tags(&["A", "B", "B"]);

        cache.update_tags(&["A", "B"], &["b", "C"]);

        assert_eq!(cache.count("A"), 0);
        assert_eq!(cache.count("B"), 2);
        assert_eq!(cache.count("C"), 1);
    }

    #[test]
    fn test_popular_tags_sorted_descending() {
        let cache = ready_cache();
        cache.add_tags(&["Web", "Databases", "Web", "Rust", "Web", "Rust"]);

        let tags: Vec<_> = cache.popular_tags().into_iter().map(|t| t.tag).collect();
        assert_eq!(tags, vec!["Web", "Rust", "Databases"]);
    }

    #[test]
    fn test_concurrent_updates_are_not_lost() {
        let cache = Arc::new(ready_cache());

        let handles: Vec<_> = (0..8)
            .map(|i| {
                let cache = cache.clone();
                std::thread::spawn(move || {
                    for _ in 0..1000 {
                        cache.add_tags(&["shared", if i % 2 == 0 { "even" } else { "odd" }]);
                    }
                    for _ in 0..500 {
                        cache.remove_tags(&["shared"]);
                    }
                })
            })
            .collect();

        for handle in handles {
            handle.join().unwrap();
        }

        assert_eq!(cache.count("shared"), 8 * 500);
        assert_eq!(cache.count("even"), 4 * 1000);
        assert_eq!(cache.count("odd"), 4 * 1000);
    }

    #[test]
    fn test_initialize_from_store() {
        let temp = TempDir::new().unwrap();
        let db = Arc::new(Database::new(&temp.path().join("test.db")).unwrap());
        let store = SqliteArticleStore::new(db);

        for tags in [vec!["Rust", "Systems"], vec!["rust"], vec![]] {
            store
                .insert(&NewArticle {
                    title: "t".to_string(),
                    content: "c".to_string(),
                    tags: tags.into_iter().map(String::from).collect(),
                    ..Default::default()
                })
                .unwrap();
        }

        let cache = TagFrequencyCache::new();
        cache.initialize(&store).unwrap();

        assert!(cache.is_initialized());
        assert_eq!(cache.count("Rust"), 2);
        assert_eq!(cache.count("systems"), 1);
        assert_eq!(cache.popular_tags()[0].tag, "Rust");

        // A second initialize does not double count
        cache.initialize(&store).unwrap();
        assert_eq!(cache.count("rust"), 2);
    }

    #[test]
    fn test_reads_before_initialize_report_nothing() {
        let temp = TempDir::new().unwrap();
        let db = Arc::new(Database::new(&temp.path().join("test.db")).unwrap());
        let store = SqliteArticleStore::new(db);
        store
            .insert(&NewArticle {
                title: "t".to_string(),
                content: "c".to_string(),
                tags: vec!["Rust".to_string()],
                ..Default::default()
            })
            .unwrap();

        let cache = TagFrequencyCache::new();
        assert_eq!(cache.count("rust"), 0);
        assert_eq!(cache.len(), 0);

        cache.initialize(&store).unwrap();
        assert_eq!(cache.count("rust"), 1);
        assert_eq!(cache.len(), 1);
    }

    #[test]
    fn test_clear_racing_adds_leaves_live_counts() {
        let cache = Arc::new(ready_cache());

        let adders: Vec<_> = (0..4)
            .map(|_| {
                let cache = cache.clone();
                std::thread::spawn(move || {
                    for _ in 0..2000 {
                        cache.add_tags(&["shared"]);
                    }
                })
            })
            .collect();
        let clearer = {
            let cache = cache.clone();
            std::thread::spawn(move || {
                for _ in 0..50 {
                    cache.clear();
                    std::thread::yield_now();
                }
            })
        };

        for handle in adders {
            handle.join().unwrap();
        }
        clearer.join().unwrap();

        // Whatever survived the clears is the value every reader sees, and the
        // next increment lands on it rather than on a detached counter
        let survived = cache.count("shared");
        assert!(survived <= 4 * 2000);
        cache.add_tags(&["shared"]);
        assert_eq!(cache.count("shared"), survived + 1);
        assert_eq!(
            cache.popular_tags(),
            vec![TagCount {
                tag: "shared".to_string(),
                count: survived + 1
            }]
        );
    }

    #[test]
    fn test_clear_keeps_cache_usable() {
        let cache = ready_cache();
        cache.add_tags(&["A"]);
        cache.clear();

        assert!(cache.is_empty());
        cache.add_tags(&["A"]);
        assert_eq!(cache.count("a"), 1);
    }
}
