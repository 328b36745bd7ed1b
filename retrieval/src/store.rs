//! Knowledge store: chunks plus their embeddings, searchable by cosine
//! similarity.
//!
//! Reads and writes follow a read-copy-update scheme. A search clones the
//! current `Arc<Snapshot>` under a briefly held read lock and then works on
//! that snapshot without any lock. Writers are serialized by a separate mutex,
//! build the next snapshot off to the side and swap it in, so a long ingestion
//! never blocks searches.

use std::collections::{BTreeMap, HashMap, HashSet};
use std::sync::Arc;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use tokio::sync::{Mutex, RwLock};
use tracing::{debug, info};

use triage_embeddings::{Embedding, EmbeddingProvider, EmbeddingRequest, SimilarityIndex};

use crate::chunk::KnowledgeChunk;
use crate::error::{Result, RetrievalError};

/// Parameters for a nearest-neighbour search.
#[derive(Debug, Clone, PartialEq)]
pub struct SearchParams {
    /// Maximum number of chunks to return.
    pub top_k: usize,

    /// Minimum cosine similarity.
    pub threshold: f32,

    /// Only chunks whose category is listed are considered.
    pub category_filter: Option<Vec<String>>,
}

impl SearchParams {
    /// Create unfiltered search parameters.
    pub fn new(top_k: usize, threshold: f32) -> Self {
        Self {
            top_k,
            threshold,
            category_filter: None,
        }
    }

    /// Restrict the search to the given categories.
    pub fn with_categories(mut self, categories: Vec<String>) -> Self {
        self.category_filter = Some(categories);
        self
    }
}

/// A chunk with its similarity to the query vector.
#[derive(Debug, Clone)]
pub struct ScoredChunk {
    /// The chunk.
    pub chunk: Arc<KnowledgeChunk>,

    /// Cosine similarity with the query vector.
    pub similarity: f32,
}

/// A searchable store of knowledge chunks.
///
/// [`KnowledgeStore`] is the in-memory implementation; an external vector
/// database can be plugged in behind the same trait.
#[async_trait]
pub trait KnowledgeIndex: Send + Sync {
    /// Embed and store chunks. Re-adding an id overwrites it.
    async fn add_documents(&self, chunks: Vec<KnowledgeChunk>) -> Result<usize>;

    /// Return chunks with similarity >= `params.threshold`, best first.
    async fn search(&self, query: &[f32], params: &SearchParams) -> Result<Vec<ScoredChunk>>;

    /// Number of stored chunks.
    async fn len(&self) -> usize;

    /// Whether the store holds no chunks.
    async fn is_empty(&self) -> bool {
        self.len().await == 0
    }
}

/// Statistics about the store contents.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct StoreStats {
    /// Number of chunks.
    pub chunks: usize,

    /// Chunk count per category.
    pub categories: BTreeMap<String, usize>,
}

/// Serialized form of a stored chunk.
#[derive(Debug, Clone, Serialize, Deserialize)]
struct StoredChunk {
    chunk: KnowledgeChunk,
    embedding: Embedding,
}

#[derive(Debug, Clone)]
struct Snapshot {
    index: SimilarityIndex,
    chunks: HashMap<String, Arc<KnowledgeChunk>>,
}

impl Snapshot {
    fn new(dimension: usize) -> Self {
        Self {
            index: SimilarityIndex::new(dimension),
            chunks: HashMap::new(),
        }
    }

    fn insert(&mut self, chunk: KnowledgeChunk, embedding: Embedding) -> Result<()> {
        self.index.insert(chunk.id.clone(), embedding)?;
        self.chunks.insert(chunk.id.clone(), Arc::new(chunk));
        Ok(())
    }
}

/// In-memory knowledge store backed by a [`SimilarityIndex`].
pub struct KnowledgeStore {
    /// Provider used to embed incoming chunks.
    provider: Arc<dyn EmbeddingProvider>,

    /// Current snapshot, replaced wholesale on every write.
    snapshot: RwLock<Arc<Snapshot>>,

    /// Serializes writers.
    writer: Mutex<()>,
}

impl KnowledgeStore {
    /// Create an empty store whose vectors match the provider's dimension.
    pub fn new(provider: Arc<dyn EmbeddingProvider>) -> Self {
        let dimension = provider.default_dimension();
        Self {
            provider,
            snapshot: RwLock::new(Arc::new(Snapshot::new(dimension))),
            writer: Mutex::new(()),
        }
    }

    /// Rebuild a store from [`KnowledgeStore::to_json`] output without
    /// re-embedding.
    pub fn from_json(provider: Arc<dyn EmbeddingProvider>, json: &str) -> Result<Self> {
        let stored: Vec<StoredChunk> = serde_json::from_str(json)?;
        let mut snapshot = Snapshot::new(provider.default_dimension());
        for entry in stored {
            snapshot.insert(entry.chunk, entry.embedding)?;
        }

        info!("Loaded {} chunks into knowledge store", snapshot.chunks.len());
        Ok(Self {
            provider,
            snapshot: RwLock::new(Arc::new(snapshot)),
            writer: Mutex::new(()),
        })
    }

    /// Serialize chunks and their embeddings.
    pub async fn to_json(&self) -> Result<String> {
        let snapshot = self.current().await;
        let mut stored: Vec<StoredChunk> = snapshot
            .chunks
            .values()
            .filter_map(|chunk| {
                snapshot.index.get(&chunk.id).map(|embedding| StoredChunk {
                    chunk: KnowledgeChunk::clone(chunk),
                    embedding: embedding.to_vec(),
                })
            })
            .collect();
        stored.sort_by(|a, b| a.chunk.id.cmp(&b.chunk.id));
        Ok(serde_json::to_string(&stored)?)
    }

    /// Store a chunk whose embedding was computed elsewhere.
    pub async fn insert_embedded(&self, chunk: KnowledgeChunk, embedding: Embedding) -> Result<()> {
        Self::check_chunk(&chunk)?;
        let _guard = self.writer.lock().await;
        let mut next = Snapshot::clone(&*self.current().await);
        next.insert(chunk, embedding)?;
        self.publish(next).await;
        Ok(())
    }

    /// Remove chunks by id, returning how many existed.
    pub async fn remove_documents(&self, ids: &[&str]) -> usize {
        let _guard = self.writer.lock().await;
        let mut next = Snapshot::clone(&*self.current().await);

        let mut removed = 0;
        for id in ids {
            if next.chunks.remove(*id).is_some() {
                next.index.remove(id);
                removed += 1;
            }
        }

        if removed > 0 {
            self.publish(next).await;
            info!("Removed {removed} chunks from knowledge store");
        }
        removed
    }

    /// Look up a chunk by id.
    pub async fn get(&self, id: &str) -> Option<Arc<KnowledgeChunk>> {
        self.current().await.chunks.get(id).cloned()
    }

    /// Summarize the store contents.
    pub async fn stats(&self) -> StoreStats {
        let snapshot = self.current().await;
        let mut categories = BTreeMap::new();
        for chunk in snapshot.chunks.values() {
            *categories
                .entry(chunk.metadata.category.clone())
                .or_insert(0) += 1;
        }

        StoreStats {
            chunks: snapshot.chunks.len(),
            categories,
        }
    }

    async fn current(&self) -> Arc<Snapshot> {
        Arc::clone(&*self.snapshot.read().await)
    }

    async fn publish(&self, next: Snapshot) {
        *self.snapshot.write().await = Arc::new(next);
    }

    fn check_chunk(chunk: &KnowledgeChunk) -> Result<()> {
        if chunk.id.trim().is_empty() {
            return Err(RetrievalError::InvalidChunk {
                id: chunk.id.clone(),
                reason: "empty id".to_string(),
            });
        }
        if chunk.content.trim().is_empty() {
            return Err(RetrievalError::InvalidChunk {
                id: chunk.id.clone(),
                reason: "empty content".to_string(),
            });
        }
        Ok(())
    }
}

#[async_trait]
impl KnowledgeIndex for KnowledgeStore {
    async fn add_documents(&self, chunks: Vec<KnowledgeChunk>) -> Result<usize> {
        for chunk in &chunks {
            Self::check_chunk(chunk)?;
        }

        // Within one batch the last occurrence of an id wins.
        let mut seen = HashSet::new();
        let mut unique: Vec<KnowledgeChunk> = chunks
            .into_iter()
            .rev()
            .filter(|c| seen.insert(c.id.clone()))
            .collect();
        unique.reverse();

        if unique.is_empty() {
            return Ok(0);
        }

        let _guard = self.writer.lock().await;

        let requests = unique
            .iter()
            .map(|c| EmbeddingRequest::new(c.content.clone()))
            .collect();
        let responses = self.provider.embed_batch(requests).await?;
        if responses.len() != unique.len() {
            return Err(RetrievalError::StoreUnavailable(format!(
                "provider returned {} embeddings for {} chunks",
                responses.len(),
                unique.len()
            )));
        }

        let mut next = Snapshot::clone(&*self.current().await);
        let count = unique.len();
        for (chunk, response) in unique.into_iter().zip(responses) {
            debug!("Storing chunk {}", chunk.id);
            next.insert(chunk, response.embedding)?;
        }
        self.publish(next).await;

        info!("Added {count} chunks to knowledge store");
        Ok(count)
    }

    async fn search(&self, query: &[f32], params: &SearchParams) -> Result<Vec<ScoredChunk>> {
        let snapshot = self.current().await;

        let allowed: Option<HashSet<&str>> = params
            .category_filter
            .as_ref()
            .map(|cats| cats.iter().map(String::as_str).collect());

        let hits = snapshot.index.search_where(
            query,
            params.top_k,
            params.threshold,
            |id| match &allowed {
                Some(allowed) => snapshot
                    .chunks
                    .get(id)
                    .is_some_and(|c| allowed.contains(c.metadata.category.as_str())),
                None => true,
            },
        )?;

        Ok(hits
            .into_iter()
            .filter_map(|hit| {
                snapshot.chunks.get(&hit.id).map(|chunk| ScoredChunk {
                    chunk: Arc::clone(chunk),
                    similarity: hit.score,
                })
            })
            .collect())
    }

    async fn len(&self) -> usize {
        self.current().await.chunks.len()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::chunk::ChunkMetadata;
    use pretty_assertions::assert_eq;
    use triage_embeddings::HashingEmbeddingProvider;

    fn store() -> (KnowledgeStore, HashingEmbeddingProvider) {
        let provider = HashingEmbeddingProvider::default();
        (KnowledgeStore::new(Arc::new(provider.clone())), provider)
    }

    fn chunk(id: &str, content: &str, category: &str) -> KnowledgeChunk {
        KnowledgeChunk::new(id, content, ChunkMetadata::new(category))
    }

    #[tokio::test]
    async fn test_add_and_search() {
        let (store, provider) = store();
        store
            .add_documents(vec![
                chunk("kb-1", "reset your password from the login page", "account"),
                chunk("kb-2", "refunds are issued within five business days", "billing"),
            ])
            .await
            .unwrap();

        let query = provider.embed_text("how do I reset my password");
        let hits = store.search(&query, &SearchParams::new(5, 0.1)).await.unwrap();

        assert_eq!(hits[0].chunk.id, "kb-1");
        assert!(hits.iter().all(|h| h.similarity >= 0.1));
    }

    #[tokio::test]
    async fn test_add_is_idempotent_on_id() {
        let (store, _) = store();
        store
            .add_documents(vec![chunk("kb-1", "old text", "general")])
            .await
            .unwrap();
        store
            .add_documents(vec![chunk("kb-1", "new text", "general")])
            .await
            .unwrap();

        assert_eq!(store.len().await, 1);
        assert_eq!(store.get("kb-1").await.unwrap().content, "new text");
    }

    #[tokio::test]
    async fn test_category_filter() {
        let (store, provider) = store();
        store
            .add_documents(vec![
                chunk("a", "server error when uploading files", "technical"),
                chunk("b", "server error on invoice download", "billing"),
            ])
            .await
            .unwrap();

        let query = provider.embed_text("server error");
        let params = SearchParams::new(5, 0.0).with_categories(vec!["billing".to_string()]);
        let hits = store.search(&query, &params).await.unwrap();

        assert_eq!(hits.len(), 1);
        assert_eq!(hits[0].chunk.id, "b");
    }

    #[tokio::test]
    async fn test_rejects_empty_content() {
        let (store, _) = store();
        let err = store
            .add_documents(vec![chunk("x", "   ", "general")])
            .await
            .unwrap_err();
        assert!(matches!(err, RetrievalError::InvalidChunk { .. }));
        assert!(store.is_empty().await);
    }

    #[tokio::test]
    async fn test_remove_and_stats() {
        let (store, _) = store();
        store
            .add_documents(vec![
                chunk("a", "vpn setup guide", "technical"),
                chunk("b", "vpn troubleshooting", "technical"),
                chunk("c", "change billing address", "billing"),
            ])
            .await
            .unwrap();

        assert_eq!(store.remove_documents(&["a", "missing"]).await, 1);

        let stats = store.stats().await;
        assert_eq!(stats.chunks, 2);
        assert_eq!(stats.categories.get("technical"), Some(&1));
        assert_eq!(stats.categories.get("billing"), Some(&1));
    }

    #[tokio::test]
    async fn test_writes_publish_a_fresh_snapshot() {
        let (store, provider) = store();
        store
            .add_documents(vec![chunk("a", "printer offline after update", "technical")])
            .await
            .unwrap();
        let before = store.current().await;

        store
            .insert_embedded(
                chunk("b", "printer jam in tray two", "technical"),
                provider.embed_text("printer jam in tray two"),
            )
            .await
            .unwrap();
        assert_eq!(store.remove_documents(&["a"]).await, 1);

        // Earlier readers keep the snapshot they cloned.
        assert_eq!(before.chunks.len(), 1);
        assert!(before.chunks.contains_key("a"));

        let after = store.current().await;
        assert_eq!(after.chunks.len(), 1);
        assert!(after.index.contains("b"));
        assert!(!after.index.contains("a"));
    }

    #[tokio::test]
    async fn test_json_snapshot_restores_without_embedding() {
        let (store, provider) = store();
        store
            .add_documents(vec![chunk("a", "two factor authentication codes", "account")])
            .await
            .unwrap();

        let json = store.to_json().await.unwrap();
        let restored = KnowledgeStore::from_json(Arc::new(provider.clone()), &json).unwrap();

        let query = provider.embed_text("authentication codes");
        let hits = restored
            .search(&query, &SearchParams::new(1, 0.1))
            .await
            .unwrap();
        assert_eq!(hits[0].chunk.id, "a");
    }

    #[tokio::test]
    async fn test_concurrent_reads_during_writes() {
        let (store, provider) = store();
        let store = Arc::new(store);
        store
            .add_documents(vec![chunk("seed", "printer driver install", "technical")])
            .await
            .unwrap();

        let writer = {
            let store = Arc::clone(&store);
            tokio::spawn(async move {
                for i in 0..20 {
                    store
                        .add_documents(vec![chunk(&format!("doc-{i}"), "printer queue stuck", "technical")])
                        .await
                        .unwrap();
                }
            })
        };

        let query = provider.embed_text("printer driver");
        for _ in 0..20 {
            let hits = store.search(&query, &SearchParams::new(50, 0.0)).await.unwrap();
            assert!(hits.iter().any(|h| h.chunk.id == "seed"));
        }

        writer.await.unwrap();
        assert_eq!(store.len().await, 21);
    }
}
