//! Vector index store: the similarity structure, the position → document id
//! mapping and the documents, kept consistent and persisted together.
//!
//! Growth is append-only. A batch is embedded in full before anything is
//! touched, so a failed batch leaves the store exactly as it was.

use std::collections::{BTreeMap, HashSet};
use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::document::Document;
use crate::flat_index::{DimensionError, FlatIndex};
use crate::persist::{self, PersistError};
use crate::positions::{PositionKey, PositionMap};
use crate::provider::{embed_checked, EmbeddingProvider, ProviderError};

/// Texts sent to the embedding provider per request.
pub const EMBED_BATCH_SIZE: usize = 64;

/// Positions probed by a sampled validation.
pub const VALIDATION_SAMPLES: usize = 3;

/// How thoroughly [IndexStore::validate] checks the mapping.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ValidationMode {
    /// Count check plus up to [VALIDATION_SAMPLES] probed positions.
    #[default]
    Sampled,
    /// Every position is probed.
    Exhaustive,
}

/// A document found by similarity search.
#[derive(Debug, Clone, PartialEq)]
pub struct ScoredDocument {
    pub document: Document,
    pub position: u64,
    /// Cosine similarity with the query.
    pub score: f32,
}

#[derive(Debug, Clone, Default)]
pub struct IndexStore {
    index: FlatIndex,
    mapping: PositionMap,
    docstore: BTreeMap<String, Document>,
    backing_path: Option<PathBuf>,
    validation: ValidationMode,
}

impl IndexStore {
    /// A store with no entries.
    pub fn create_empty() -> Self {
        Self::default()
    }

    pub fn with_validation(mut self, mode: ValidationMode) -> Self {
        self.validation = mode;
        self
    }

    pub fn total_vectors(&self) -> u64 {
        self.index.len()
    }

    pub fn is_empty(&self) -> bool {
        self.index.is_empty()
    }

    pub fn dimension(&self) -> usize {
        self.index.dimension()
    }

    /// Embedding model the stored vectors came from, once anything is stored.
    pub fn embed_model(&self) -> Option<&str> {
        self.index.model()
    }

    /// Vectors from `current` can be compared with the stored ones. Always true for
    /// an empty store.
    pub fn check_model(&self, current: &str) -> Result<(), StoreError> {
        if self.is_empty() {
            return Ok(());
        }
        match self.index.model() {
            Some(indexed) if indexed == current => Ok(()),
            indexed => Err(StoreError::ModelMismatch {
                indexed: indexed.unwrap_or("unknown").to_string(),
                current: current.to_string(),
            }),
        }
    }

    pub fn mapping(&self) -> &PositionMap {
        &self.mapping
    }

    /// Where this store was last loaded from or persisted to.
    pub fn backing_path(&self) -> Option<&Path> {
        self.backing_path.as_deref()
    }

    /// Embed `docs` and append them at the next free positions, in order.
    ///
    /// All-or-nothing: on any embedding, model, dimension or id error the store is
    /// unchanged.
    pub async fn add_documents(
        &mut self,
        docs: Vec<Document>,
        embedder: &dyn EmbeddingProvider,
    ) -> Result<&mut Self, StoreError> {
        if docs.is_empty() {
            return Ok(self);
        }
        self.check_model(embedder.model())?;
        self.check_new_ids(&docs)?;

        let texts: Vec<String> = docs.iter().map(|d| d.content().to_string()).collect();
        let mut vectors = Vec::with_capacity(texts.len());
        for batch in texts.chunks(EMBED_BATCH_SIZE) {
            vectors.extend(embed_checked(embedder, batch).await?);
        }
        self.index.check_batch(&vectors)?;

        let start = self.index.add_batch(vectors)?;
        self.index.set_model(embedder.model());
        let count = docs.len();
        for (offset, doc) in docs.into_iter().enumerate() {
            self.mapping.insert(start + offset as u64, doc.id());
            self.docstore.insert(doc.id().to_string(), doc);
        }
        tracing::info!(added = count, total = self.total_vectors(), "documents indexed");
        Ok(self)
    }

    fn check_new_ids(&self, docs: &[Document]) -> Result<(), StoreError> {
        let mut seen = HashSet::with_capacity(docs.len());
        for doc in docs {
            if self.docstore.contains_key(doc.id()) || !seen.insert(doc.id()) {
                return Err(StoreError::DuplicateId(doc.id().to_string()));
            }
        }
        Ok(())
    }

    /// Write the store under `path`. Readers of `path` see the previous or the new
    /// state, never a mix. The in-memory store is untouched on failure.
    pub fn persist(&mut self, path: &Path) -> Result<(), StoreError> {
        let table = self.mapping.to_table();
        let generation = persist::write_snapshot(path, &self.index, &table, &self.docstore)?;
        tracing::debug!(dir = %generation.display(), total = self.total_vectors(), "index persisted");
        self.backing_path = Some(path.to_path_buf());
        Ok(())
    }

    /// Load the store persisted under `path`. `Ok(None)` when nothing complete is there.
    ///
    /// The mapping is normalized before the store is returned; its completeness is
    /// not checked here, call [Self::validate] for that.
    pub fn load(path: &Path) -> Result<Option<Self>, StoreError> {
        let Some(snapshot) = persist::read_snapshot(path)? else {
            return Ok(None);
        };
        let mapping = PositionMap::normalize(snapshot.mapping);
        if !mapping.retained().is_empty() {
            tracing::warn!(entries = mapping.retained().len(), "mapping has entries that do not resolve");
        }
        snapshot
            .index
            .check_stored()
            .map_err(|e| StoreError::Corrupt(e.to_string()))?;
        let store = Self {
            index: snapshot.index,
            mapping,
            docstore: snapshot.docstore,
            backing_path: Some(path.to_path_buf()),
            validation: ValidationMode::default(),
        };
        tracing::info!(path = %path.display(), total = store.total_vectors(), "index loaded");
        Ok(Some(store))
    }

    /// Cheap consistency check, see [Self::check].
    pub fn validate(&self) -> bool {
        match self.check() {
            Ok(()) => true,
            Err(e) => {
                tracing::warn!(error = %e, "index failed validation");
                false
            }
        }
    }

    /// Mapping and document store must cover exactly the indexed positions. Probes
    /// up to [VALIDATION_SAMPLES] positions, or all of them in exhaustive mode, so
    /// damage to unprobed positions can go unnoticed in sampled mode.
    pub fn check(&self) -> Result<(), StoreError> {
        let total = self.total_vectors();
        if self.mapping.len() as u64 != total {
            return Err(StoreError::Corrupt(format!(
                "mapping covers {} positions, index holds {total}",
                self.mapping.len()
            )));
        }
        if self.docstore.len() as u64 != total {
            return Err(StoreError::Corrupt(format!(
                "document store holds {} documents, index holds {total}",
                self.docstore.len()
            )));
        }
        let probes: Vec<u64> = match self.validation {
            ValidationMode::Sampled => sample_positions(total),
            ValidationMode::Exhaustive => (0..total).collect(),
        };
        for pos in probes {
            self.document_at(pos)?;
        }
        Ok(())
    }

    /// Build a fresh store from `docs` and persist it at `path`, discarding whatever
    /// was persisted there. The old state stays readable until the new one is
    /// swapped in, and is left alone entirely if embedding fails.
    pub async fn rebuild_from(
        path: &Path,
        docs: Vec<Document>,
        embedder: &dyn EmbeddingProvider,
        validation: ValidationMode,
    ) -> Result<Self, StoreError> {
        let mut store = Self::create_empty().with_validation(validation);
        store.add_documents(docs, embedder).await?;
        store.persist(path)?;
        tracing::info!(path = %path.display(), total = store.total_vectors(), "index rebuilt");
        Ok(store)
    }

    /// The document at a position given in any key representation.
    pub fn document_at(&self, key: impl Into<PositionKey>) -> Result<&Document, StoreError> {
        let key: PositionKey = key.into();
        let id = self
            .mapping
            .get(key.clone())
            .ok_or_else(|| StoreError::MissingPosition(key.to_string()))?;
        self.docstore
            .get(id)
            .ok_or_else(|| StoreError::MissingDocument(id.to_string()))
    }

    pub fn document(&self, id: &str) -> Option<&Document> {
        self.docstore.get(id)
    }

    /// The `k` documents closest to `query`, best first. Any position the mapping
    /// cannot resolve is an error, not a skipped hit.
    pub fn similar(&self, query: &[f32], k: usize) -> Result<Vec<ScoredDocument>, StoreError> {
        if query.len() != self.index.dimension() {
            return Err(StoreError::Dimension(DimensionError {
                expected: self.index.dimension(),
                found: query.len(),
            }));
        }
        self.index
            .search(query, k)
            .into_iter()
            .map(|(position, score)| {
                Ok(ScoredDocument {
                    document: self.document_at(position)?.clone(),
                    position,
                    score,
                })
            })
            .collect()
    }
}

/// Up to [VALIDATION_SAMPLES] positions spread over `0..total`: first, middle, last.
fn sample_positions(total: u64) -> Vec<u64> {
    if total == 0 {
        return Vec::new();
    }
    let mut picks = vec![0, total / 2, total - 1];
    picks.sort_unstable();
    picks.dedup();
    picks.truncate(VALIDATION_SAMPLES);
    picks
}

#[derive(Debug, Error)]
pub enum StoreError {
    #[error("embedding failed: {0}")]
    Embedding(#[from] ProviderError),
    #[error(transparent)]
    Dimension(#[from] DimensionError),
    #[error("duplicate document id: {0}")]
    DuplicateId(String),
    #[error("index was built with embedding model {indexed:?} but {current:?} is in use; rebuild or clear the index")]
    ModelMismatch { indexed: String, current: String },
    #[error(transparent)]
    Persist(#[from] PersistError),
    #[error("corrupt index: {0}")]
    Corrupt(String),
    #[error("no document id mapped at position {0}")]
    MissingPosition(String),
    #[error("document {0} is mapped but not stored")]
    MissingDocument(String),
}

impl StoreError {
    /// Errors meaning the persisted or in-memory index can no longer be trusted.
    pub fn is_corruption(&self) -> bool {
        match self {
            StoreError::Corrupt(_) | StoreError::MissingPosition(_) | StoreError::MissingDocument(_) => true,
            StoreError::Persist(e) => e.is_corruption(),
            _ => false,
        }
    }
}
