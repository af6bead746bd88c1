//! In-memory aggregate store
//!
//! Versioned records behind an optimistic read / compare-and-swap loop, the
//! same discipline the SQLite store uses against its table.

use std::collections::HashMap;

use async_trait::async_trait;
use parking_lot::RwLock;
use tracing::debug;

use super::traits::{AggregateRecord, AggregateStore, MergeMode, StoreError, StoreErrorKind};

/// Default bound on optimistic merge attempts
pub const DEFAULT_MAX_ATTEMPTS: u32 = 64;

#[derive(Debug, Clone)]
struct Versioned {
    version: u64,
    images: Vec<String>,
}

/// Process-local aggregate store
#[derive(Debug)]
pub struct MemoryStore {
    records: RwLock<HashMap<String, Versioned>>,
    max_attempts: u32,
}

impl Default for MemoryStore {
    fn default() -> Self {
        Self::new()
    }
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::with_max_attempts(DEFAULT_MAX_ATTEMPTS)
    }

    pub fn with_max_attempts(max_attempts: u32) -> Self {
        Self {
            records: RwLock::new(HashMap::new()),
            max_attempts: max_attempts.max(1),
        }
    }

    /// Number of identities stored
    pub fn len(&self) -> usize {
        self.records.read().len()
    }

    pub fn is_empty(&self) -> bool {
        self.records.read().is_empty()
    }

    fn snapshot(&self, identity_id: &str) -> Option<Versioned> {
        self.records.read().get(identity_id).cloned()
    }

    /// Write `images` only if the record is still at `expected` version
    /// (`None` meaning "must not exist yet").
    fn compare_and_swap(&self, identity_id: &str, expected: Option<u64>, images: Vec<String>) -> bool {
        let mut records = self.records.write();
        let current = records.get(identity_id).map(|r| r.version);
        if current != expected {
            return false;
        }
        let version = expected.map_or(1, |v| v + 1);
        records.insert(identity_id.to_string(), Versioned { version, images });
        true
    }

    async fn merge_with(
        &self,
        identity_id: &str,
        image_url: &str,
        mode: MergeMode,
    ) -> Result<AggregateRecord, StoreError> {
        for attempt in 1..=self.max_attempts {
            let snapshot = self.snapshot(identity_id);
            let expected = snapshot.as_ref().map(|s| s.version);
            let current = snapshot.map(|s| s.images).unwrap_or_default();

            let images = match mode.apply(&current, image_url) {
                Some(images) => images,
                None => return Ok(AggregateRecord::new(identity_id, current)),
            };

            if self.compare_and_swap(identity_id, expected, images.clone()) {
                return Ok(AggregateRecord::new(identity_id, images));
            }

            debug!("Merge conflict on {} (attempt {})", identity_id, attempt);
            tokio::task::yield_now().await;
        }

        Err(StoreError::new(
            StoreErrorKind::Conflict,
            format!(
                "gave up merging into {} after {} attempts",
                identity_id, self.max_attempts
            ),
        ))
    }
}

#[async_trait]
impl AggregateStore for MemoryStore {
    async fn get(&self, identity_id: &str) -> Result<Option<AggregateRecord>, StoreError> {
        Ok(self
            .snapshot(identity_id)
            .map(|s| AggregateRecord::new(identity_id, s.images)))
    }

    async fn merge(&self, identity_id: &str, image_url: &str) -> Result<AggregateRecord, StoreError> {
        self.merge_with(identity_id, image_url, MergeMode::Append).await
    }

    async fn merge_unique(
        &self,
        identity_id: &str,
        image_url: &str,
    ) -> Result<AggregateRecord, StoreError> {
        self.merge_with(identity_id, image_url, MergeMode::Unique).await
    }
}

#[cfg(test)]
mod tests {
    use std::collections::HashSet;
    use std::sync::Arc;

    use super::*;

    #[tokio::test]
    async fn test_merge_creates_if_absent() {
        let store = MemoryStore::new();

        let record = store.merge("X", "http://b.s3-r.amazonaws.com/k.jpg").await.unwrap();
        assert_eq!(
            record,
            AggregateRecord::new("X", vec!["http://b.s3-r.amazonaws.com/k.jpg".to_string()])
        );
        assert_eq!(store.get("X").await.unwrap(), Some(record));
    }

    #[tokio::test]
    async fn test_merge_appends_in_order_without_dedup() {
        let store = MemoryStore::new();

        store.merge("X", "a").await.unwrap();
        store.merge("X", "b").await.unwrap();
        let record = store.merge("X", "a").await.unwrap();

        assert_eq!(record.image_urls, vec!["a", "b", "a"]);
    }

    #[tokio::test]
    async fn test_merge_unique_skips_present_url() {
        let store = MemoryStore::new();

        store.merge_unique("X", "a").await.unwrap();
        store.merge_unique("X", "b").await.unwrap();
        let record = store.merge_unique("X", "a").await.unwrap();

        assert_eq!(record.image_urls, vec!["a", "b"]);
        assert_eq!(store.len(), 1);
    }

    #[tokio::test]
    async fn test_get_missing() {
        let store = MemoryStore::new();
        assert!(store.get("nobody").await.unwrap().is_none());
        assert!(store.is_empty());
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 4)]
    async fn test_concurrent_merges_lose_nothing() {
        let store = Arc::new(MemoryStore::new());
        let n = 50;

        let handles: Vec<_> = (0..n)
            .map(|i| {
                let store = store.clone();
                tokio::spawn(async move { store.merge("C1", &format!("url-{i}")).await })
            })
            .collect();

        for handle in handles {
            handle.await.unwrap().unwrap();
        }

        let record = store.get("C1").await.unwrap().unwrap();
        assert_eq!(record.image_urls.len(), n);
        let distinct: HashSet<_> = record.image_urls.iter().collect();
        assert_eq!(distinct.len(), n);
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 4)]
    async fn test_concurrent_merges_across_identities() {
        let store = Arc::new(MemoryStore::new());

        let handles: Vec<_> = (0..60)
            .map(|i| {
                let store = store.clone();
                let identity = format!("C{}", i % 3);
                tokio::spawn(async move { store.merge(&identity, &format!("url-{i}")).await })
            })
            .collect();

        for handle in handles {
            handle.await.unwrap().unwrap();
        }

        for identity in ["C0", "C1", "C2"] {
            let record = store.get(identity).await.unwrap().unwrap();
            assert_eq!(record.image_urls.len(), 20);
        }
    }
}
