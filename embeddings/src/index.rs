//! Brute-force cosine index over knowledge chunk vectors.

use std::collections::HashMap;

use tracing::trace;

use crate::Embedding;
use crate::error::{EmbeddingError, Result};
use crate::similarity::{Neighbor, nearest, normalize};

/// Vectors keyed by chunk id, stored at unit length.
///
/// Knowledge bases behind a support desk are small enough that a linear scan
/// per query is cheaper than maintaining an ANN structure.
#[derive(Debug, Clone)]
pub struct SimilarityIndex {
    dimension: usize,
    vectors: HashMap<String, Embedding>,
}

impl SimilarityIndex {
    pub fn new(dimension: usize) -> Self {
        Self {
            dimension,
            vectors: HashMap::new(),
        }
    }

    pub fn dimension(&self) -> usize {
        self.dimension
    }

    pub fn len(&self) -> usize {
        self.vectors.len()
    }

    pub fn is_empty(&self) -> bool {
        self.vectors.is_empty()
    }

    pub fn contains(&self, id: &str) -> bool {
        self.vectors.contains_key(id)
    }

    /// The stored (normalized) vector for `id`.
    pub fn get(&self, id: &str) -> Option<&[f32]> {
        self.vectors.get(id).map(Vec::as_slice)
    }

    /// Insert or replace the vector for `id`.
    pub fn insert(&mut self, id: impl Into<String>, mut vector: Embedding) -> Result<()> {
        self.check_dimension(&vector)?;
        normalize(&mut vector);
        let id = id.into();
        trace!("indexing {id}");
        self.vectors.insert(id, vector);
        Ok(())
    }

    /// Returns whether `id` was present.
    pub fn remove(&mut self, id: &str) -> bool {
        self.vectors.remove(id).is_some()
    }

    pub fn search(&self, query: &[f32], k: usize, min_score: f32) -> Result<Vec<Neighbor>> {
        self.search_where(query, k, min_score, |_| true)
    }

    /// Like [`search`](Self::search), scanning only ids accepted by `keep`.
    pub fn search_where<F>(
        &self,
        query: &[f32],
        k: usize,
        min_score: f32,
        keep: F,
    ) -> Result<Vec<Neighbor>>
    where
        F: Fn(&str) -> bool,
    {
        self.check_dimension(query)?;
        let candidates = self
            .vectors
            .iter()
            .filter(|(id, _)| keep(id))
            .map(|(id, vector)| (id.as_str(), vector.as_slice()));
        nearest(query, candidates, k, min_score)
    }

    fn check_dimension(&self, vector: &[f32]) -> Result<()> {
        if vector.len() == self.dimension {
            Ok(())
        } else {
            Err(EmbeddingError::DimensionMismatch {
                expected: self.dimension,
                actual: vector.len(),
            })
        }
    }
}
