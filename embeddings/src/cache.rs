//! Memoization of embeddings for text that recurs across tickets.
//!
//! Boilerplate ticket phrasing and re-ingested knowledge chunks are embedded
//! over and over; the cache keys vectors by `(model, text)` and drops the
//! least recently used entry once full. An optional JSON file lets a warm
//! cache survive restarts.

use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicU64, Ordering};

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use tokio::fs;
use tokio::sync::Mutex;
use tracing::{debug, info};

use crate::Embedding;
use crate::error::Result;
use crate::provider::{EmbeddingProvider, EmbeddingRequest, EmbeddingResponse};

#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
struct CacheKey {
    model: String,
    text: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
struct Slot {
    key: CacheKey,
    embedding: Embedding,
    last_used: u64,
}

/// Point-in-time counters for an [`EmbeddingCache`].
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct CacheStats {
    pub entries: usize,
    pub capacity: usize,
    pub hits: u64,
    pub misses: u64,
}

/// Bounded LRU map from `(model, text)` to a vector.
pub struct EmbeddingCache {
    slots: Mutex<HashMap<CacheKey, Slot>>,
    capacity: usize,
    path: Option<PathBuf>,
    clock: AtomicU64,
    hits: AtomicU64,
    misses: AtomicU64,
}

impl EmbeddingCache {
    pub fn new(capacity: usize) -> Self {
        Self {
            slots: Mutex::new(HashMap::new()),
            capacity: capacity.max(1),
            path: None,
            clock: AtomicU64::new(0),
            hits: AtomicU64::new(0),
            misses: AtomicU64::new(0),
        }
    }

    /// Open a cache backed by `path`, loading it when the file exists.
    ///
    /// Nothing is written until [`flush`](Self::flush).
    pub async fn open(path: impl AsRef<Path>, capacity: usize) -> Result<Self> {
        let path = path.as_ref().to_path_buf();
        let mut cache = Self::new(capacity);

        if fs::try_exists(&path).await? {
            let raw = fs::read_to_string(&path).await?;
            let mut stored: Vec<Slot> = serde_json::from_str(&raw)?;
            // Keep the most recently used when the file outgrew the capacity.
            stored.sort_by_key(|slot| std::cmp::Reverse(slot.last_used));
            stored.truncate(cache.capacity);

            let newest = stored.first().map_or(0, |slot| slot.last_used + 1);
            cache.clock = AtomicU64::new(newest);
            let slots = cache.slots.get_mut();
            for slot in stored {
                slots.insert(slot.key.clone(), slot);
            }
            info!("Loaded {} cached embeddings from {}", slots.len(), path.display());
        }

        cache.path = Some(path);
        Ok(cache)
    }

    fn tick(&self) -> u64 {
        self.clock.fetch_add(1, Ordering::Relaxed)
    }

    fn key(text: &str, model: &str) -> CacheKey {
        CacheKey {
            model: model.to_string(),
            text: text.to_string(),
        }
    }

    /// Look up a vector, marking it as recently used.
    pub async fn get(&self, text: &str, model: &str) -> Option<Embedding> {
        let now = self.tick();
        let mut slots = self.slots.lock().await;
        match slots.get_mut(&Self::key(text, model)) {
            Some(slot) => {
                slot.last_used = now;
                self.hits.fetch_add(1, Ordering::Relaxed);
                Some(slot.embedding.clone())
            }
            None => {
                self.misses.fetch_add(1, Ordering::Relaxed);
                None
            }
        }
    }

    pub async fn put(&self, text: &str, model: &str, embedding: Embedding) {
        let key = Self::key(text, model);
        let now = self.tick();
        let mut slots = self.slots.lock().await;

        if !slots.contains_key(&key) && slots.len() >= self.capacity {
            let stale = slots
                .values()
                .min_by_key(|slot| slot.last_used)
                .map(|slot| slot.key.clone());
            if let Some(stale) = stale {
                slots.remove(&stale);
                debug!("Evicted cached embedding for model {}", stale.model);
            }
        }

        slots.insert(
            key.clone(),
            Slot {
                key,
                embedding,
                last_used: now,
            },
        );
    }

    pub async fn contains(&self, text: &str, model: &str) -> bool {
        self.slots
            .lock()
            .await
            .contains_key(&Self::key(text, model))
    }

    pub async fn stats(&self) -> CacheStats {
        CacheStats {
            entries: self.slots.lock().await.len(),
            capacity: self.capacity,
            hits: self.hits.load(Ordering::Relaxed),
            misses: self.misses.load(Ordering::Relaxed),
        }
    }

    /// Write the cache to its backing file. A no-op for in-memory caches.
    pub async fn flush(&self) -> Result<()> {
        let Some(path) = &self.path else {
            return Ok(());
        };

        let json = {
            let slots = self.slots.lock().await;
            let mut stored: Vec<&Slot> = slots.values().collect();
            stored.sort_by_key(|slot| slot.last_used);
            serde_json::to_string(&stored)?
        };

        if let Some(parent) = path.parent() {
            fs::create_dir_all(parent).await?;
        }
        fs::write(path, json).await?;
        debug!("Flushed embedding cache to {}", path.display());
        Ok(())
    }
}

/// An [`EmbeddingProvider`] that consults an [`EmbeddingCache`] before
/// calling the wrapped provider.
pub struct CachedProvider<P> {
    inner: P,
    cache: EmbeddingCache,
}

impl<P: EmbeddingProvider> CachedProvider<P> {
    pub fn new(inner: P, cache: EmbeddingCache) -> Self {
        Self { inner, cache }
    }

    pub fn cache(&self) -> &EmbeddingCache {
        &self.cache
    }
}

#[async_trait]
impl<P: EmbeddingProvider> EmbeddingProvider for CachedProvider<P> {
    fn name(&self) -> &str {
        self.inner.name()
    }

    fn default_model(&self) -> &str {
        self.inner.default_model()
    }

    fn default_dimension(&self) -> usize {
        self.inner.default_dimension()
    }

    async fn embed(&self, request: EmbeddingRequest) -> Result<EmbeddingResponse> {
        let model = request
            .model
            .as_deref()
            .unwrap_or_else(|| self.inner.default_model())
            .to_string();

        if let Some(embedding) = self.cache.get(&request.text, &model).await {
            return Ok(EmbeddingResponse {
                dimension: embedding.len(),
                embedding,
                model,
                tokens_used: None,
            });
        }

        let text = request.text.clone();
        let response = self.inner.embed(request).await?;
        self.cache
            .put(&text, &model, response.embedding.clone())
            .await;
        Ok(response)
    }

    fn is_available(&self) -> bool {
        self.inner.is_available()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::provider::HashingEmbeddingProvider;
    use pretty_assertions::assert_eq;

    #[tokio::test]
    async fn test_hit_and_miss_counters() {
        let cache = EmbeddingCache::new(8);
        cache.put("vpn drops", "m", vec![1.0, 0.0]).await;

        assert_eq!(cache.get("vpn drops", "m").await, Some(vec![1.0, 0.0]));
        assert_eq!(cache.get("vpn drops", "other-model").await, None);

        let stats = cache.stats().await;
        assert_eq!(
            stats,
            CacheStats {
                entries: 1,
                capacity: 8,
                hits: 1,
                misses: 1,
            }
        );
    }

    #[tokio::test]
    async fn test_least_recently_used_is_evicted() {
        let cache = EmbeddingCache::new(2);
        cache.put("refund", "m", vec![1.0]).await;
        cache.put("invoice", "m", vec![2.0]).await;
        // Touch "refund" so "invoice" becomes the stale one.
        cache.get("refund", "m").await;
        cache.put("password", "m", vec![3.0]).await;

        assert!(cache.contains("refund", "m").await);
        assert!(!cache.contains("invoice", "m").await);
        assert!(cache.contains("password", "m").await);
        assert_eq!(cache.stats().await.entries, 2);
    }

    #[tokio::test]
    async fn test_flush_and_reopen() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("warm/embeddings.json");

        let cache = EmbeddingCache::open(&path, 4).await.unwrap();
        cache.put("shipping delay", "m", vec![0.5, 0.5]).await;
        cache.flush().await.unwrap();

        let reopened = EmbeddingCache::open(&path, 4).await.unwrap();
        assert_eq!(reopened.get("shipping delay", "m").await, Some(vec![0.5, 0.5]));
    }

    #[tokio::test]
    async fn test_reopen_with_smaller_capacity_keeps_recent() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("embeddings.json");

        let cache = EmbeddingCache::open(&path, 4).await.unwrap();
        for (i, text) in ["a", "b", "c"].into_iter().enumerate() {
            cache.put(text, "m", vec![i as f32]).await;
        }
        cache.flush().await.unwrap();

        let small = EmbeddingCache::open(&path, 1).await.unwrap();
        assert!(small.contains("c", "m").await);
        assert_eq!(small.stats().await.entries, 1);
    }

    #[tokio::test]
    async fn test_cached_provider_skips_inner_on_repeat() {
        let provider =
            CachedProvider::new(HashingEmbeddingProvider::new(16), EmbeddingCache::new(4));

        let first = provider.embed(EmbeddingRequest::new("printer offline")).await.unwrap();
        let second = provider.embed(EmbeddingRequest::new("printer offline")).await.unwrap();

        assert_eq!(first.embedding, second.embedding);
        assert!(first.tokens_used.is_some());
        assert_eq!(second.tokens_used, None);
        assert_eq!(provider.cache().stats().await.hits, 1);
    }
}
