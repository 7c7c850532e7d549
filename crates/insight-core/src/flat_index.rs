//! Exhaustive cosine-similarity index over embedding vectors.
//! Vectors live at append-ordered positions; the index knows nothing about documents.

use serde::{Deserialize, Serialize};

/// Flat (brute-force) similarity structure. Positions are `0..len()` in insertion order.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct FlatIndex {
    /// Vector length; 0 until the first vector is added.
    dimension: usize,
    /// Normalized vectors (unit length for cosine similarity via dot product).
    vectors: Vec<Vec<f32>>,
    /// Embedding model the vectors came from.
    #[serde(default)]
    model: Option<String>,
}

impl FlatIndex {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn dimension(&self) -> usize {
        self.dimension
    }

    pub fn model(&self) -> Option<&str> {
        self.model.as_deref()
    }

    pub fn set_model(&mut self, model: impl Into<String>) {
        self.model = Some(model.into());
    }

    /// Checks that `vectors` could be appended: all of one non-zero length that matches
    /// the index. Returns that length.
    pub fn check_batch(&self, vectors: &[Vec<f32>]) -> Result<usize, DimensionError> {
        let Some(first) = vectors.first() else {
            return Ok(self.dimension);
        };
        let dim = first.len();
        if dim == 0 {
            return Err(DimensionError { expected: self.dimension.max(1), found: 0 });
        }
        if self.dimension != 0 && dim != self.dimension {
            return Err(DimensionError { expected: self.dimension, found: dim });
        }
        if let Some(bad) = vectors.iter().find(|v| v.len() != dim) {
            return Err(DimensionError { expected: dim, found: bad.len() });
        }
        Ok(dim)
    }

    /// Append vectors, rejecting the whole batch on a dimension mismatch.
    /// Returns the position of the first new vector.
    pub fn add_batch(&mut self, vectors: Vec<Vec<f32>>) -> Result<u64, DimensionError> {
        let dim = self.check_batch(&vectors)?;
        let start = self.len();
        if !vectors.is_empty() {
            self.dimension = dim;
        }
        self.vectors.extend(vectors.iter().map(|v| normalize(v)));
        Ok(start)
    }

    /// Checks a deserialized index: every vector has the recorded dimension.
    pub fn check_stored(&self) -> Result<(), DimensionError> {
        if self.vectors.is_empty() {
            return Ok(());
        }
        if self.dimension == 0 {
            return Err(DimensionError { expected: 1, found: 0 });
        }
        match self.vectors.iter().find(|v| v.len() != self.dimension) {
            Some(bad) => Err(DimensionError { expected: self.dimension, found: bad.len() }),
            None => Ok(()),
        }
    }

    /// Positions most similar to the query, best first, with cosine similarity scores.
    pub fn search(&self, query: &[f32], k: usize) -> Vec<(u64, f32)> {
        if self.vectors.is_empty() || query.is_empty() || k == 0 {
            return Vec::new();
        }
        let q_norm = normalize(query);
        let mut scored: Vec<(u64, f32)> = self
            .vectors
            .iter()
            .enumerate()
            .map(|(pos, v)| (pos as u64, dot(&q_norm, v)))
            .collect();
        scored.sort_by(|a, b| b.1.partial_cmp(&a.1).unwrap_or(std::cmp::Ordering::Equal));
        scored.truncate(k);
        scored
    }

    /// Number of indexed vectors.
    pub fn len(&self) -> u64 {
        self.vectors.len() as u64
    }

    pub fn is_empty(&self) -> bool {
        self.vectors.is_empty()
    }
}

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
#[error("embedding dimension mismatch: expected {expected}, found {found}")]
pub struct DimensionError {
    pub expected: usize,
    pub found: usize,
}

fn normalize(v: &[f32]) -> Vec<f32> {
    let norm: f32 = v.iter().map(|x| x * x).sum::<f32>().sqrt();
    if norm <= 0.0 {
        return v.to_vec();
    }
    v.iter().map(|x| x / norm).collect()
}

fn dot(a: &[f32], b: &[f32]) -> f32 {
    a.iter().zip(b).map(|(x, y)| x * y).sum()
}
