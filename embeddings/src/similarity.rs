//! Vector math for comparing ticket text with knowledge chunks.

use std::cmp::Reverse;
use std::collections::BinaryHeap;

use ordered_float::OrderedFloat;

use crate::error::{EmbeddingError, Result};

/// Euclidean length.
pub fn magnitude(vector: &[f32]) -> f32 {
    vector.iter().map(|x| x * x).sum::<f32>().sqrt()
}

/// Scale `vector` to unit length in place. Zero vectors are left alone.
pub fn normalize(vector: &mut [f32]) {
    let len = magnitude(vector);
    if len > 0.0 {
        vector.iter_mut().for_each(|x| *x /= len);
    }
}

/// Cosine of the angle between `a` and `b`, in `[-1, 1]`.
///
/// A zero vector is orthogonal to everything, so it scores `0.0`.
pub fn cosine_similarity(a: &[f32], b: &[f32]) -> Result<f32> {
    if a.len() != b.len() {
        return Err(EmbeddingError::DimensionMismatch {
            expected: a.len(),
            actual: b.len(),
        });
    }

    let denominator = magnitude(a) * magnitude(b);
    if denominator == 0.0 {
        return Ok(0.0);
    }
    let dot: f32 = a.iter().zip(b).map(|(x, y)| x * y).sum();
    Ok((dot / denominator).clamp(-1.0, 1.0))
}

/// One index hit.
#[derive(Debug, Clone, PartialEq)]
pub struct Neighbor {
    pub id: String,
    pub score: f32,
}

/// Heap key: higher score wins, then the smaller id.
type Rank<'a> = (OrderedFloat<f32>, Reverse<&'a str>);

/// The `k` candidates closest to `query` scoring at least `min_score`,
/// best first.
///
/// Ties on score go to the lexicographically smaller id, so the answer does
/// not depend on candidate iteration order.
pub fn nearest<'a, I>(query: &[f32], candidates: I, k: usize, min_score: f32) -> Result<Vec<Neighbor>>
where
    I: IntoIterator<Item = (&'a str, &'a [f32])>,
{
    if k == 0 {
        return Ok(Vec::new());
    }

    // Min-heap holding the current best k; the worst sits on top.
    let mut best: BinaryHeap<Reverse<Rank<'a>>> = BinaryHeap::with_capacity(k + 1);
    for (id, vector) in candidates {
        let score = cosine_similarity(query, vector)?;
        if score < min_score {
            continue;
        }
        best.push(Reverse((OrderedFloat(score), Reverse(id))));
        if best.len() > k {
            best.pop();
        }
    }

    Ok(best
        .into_sorted_vec()
        .into_iter()
        .map(|Reverse((score, Reverse(id)))| Neighbor {
            id: id.to_string(),
            score: score.into_inner(),
        })
        .collect())
}
