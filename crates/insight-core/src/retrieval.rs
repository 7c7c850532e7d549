//! Top-k similarity retrieval over an [IndexStore].

use crate::provider::{embed_checked, EmbeddingProvider};
use crate::store::{IndexStore, ScoredDocument, StoreError};

/// Documents returned per question unless configured otherwise.
pub const DEFAULT_TOP_K: usize = 4;

/// Result of a search. An empty index is a distinct, non-error outcome.
#[derive(Debug, Clone, PartialEq)]
pub enum SearchOutcome {
    /// The store holds no vectors; the similarity structure was not consulted.
    EmptyIndex,
    /// Up to `k` hits, most similar first.
    Hits(Vec<ScoredDocument>),
}

impl SearchOutcome {
    pub fn hits(&self) -> &[ScoredDocument] {
        match self {
            SearchOutcome::EmptyIndex => &[],
            SearchOutcome::Hits(hits) => hits,
        }
    }

    pub fn into_hits(self) -> Vec<ScoredDocument> {
        match self {
            SearchOutcome::EmptyIndex => Vec::new(),
            SearchOutcome::Hits(hits) => hits,
        }
    }

    pub fn is_empty_index(&self) -> bool {
        matches!(self, SearchOutcome::EmptyIndex)
    }
}

/// Embed `query` and return the `k` most similar documents.
///
/// A mapping miss comes back as a corruption error ([StoreError::is_corruption]);
/// the caller decides how to recover. A store built by another embedding model is
/// refused with [StoreError::ModelMismatch] before anything is embedded.
pub async fn search(
    store: &IndexStore,
    embedder: &dyn EmbeddingProvider,
    query: &str,
    k: usize,
) -> Result<SearchOutcome, StoreError> {
    if store.is_empty() {
        return Ok(SearchOutcome::EmptyIndex);
    }
    store.check_model(embedder.model())?;
    if k == 0 {
        return Ok(SearchOutcome::Hits(Vec::new()));
    }
    let mut vectors = embed_checked(embedder, &[query.to_string()]).await?;
    let query_vector = vectors.pop().unwrap_or_default();
    let hits = store.similar(&query_vector, k)?;
    tracing::debug!(query, hits = hits.len(), "search finished");
    Ok(SearchOutcome::Hits(hits))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::document::Document;
    use crate::test_support::{docs, FakeEmbedder};

    #[tokio::test]
    async fn empty_store_skips_the_index() {
        let embedder = FakeEmbedder::new();
        let store = IndexStore::create_empty();
        let outcome = search(&store, &embedder, "anything", 4).await.unwrap();
        assert!(outcome.is_empty_index());
        assert!(outcome.hits().is_empty());
        assert_eq!(embedder.calls(), 0);
    }

    #[tokio::test]
    async fn returns_at_most_k_ranked_hits() {
        let embedder = FakeEmbedder::new();
        let mut store = IndexStore::create_empty();
        store.add_documents(docs(&["d0", "d1", "d2"]), &embedder).await.unwrap();
        store.add_documents(docs(&["d3"]), &embedder).await.unwrap();
        assert_eq!(store.total_vectors(), 4);

        let hits = search(&store, &embedder, "content of d3", 2).await.unwrap().into_hits();
        assert_eq!(hits.len(), 2);
        assert_eq!(hits[0].document.id(), "d3");
        assert!(hits[0].score >= hits[1].score);
        let ids = ["d0", "d1", "d2", "d3"];
        assert!(hits.iter().all(|h| ids.contains(&h.document.id())));
    }

    #[tokio::test]
    async fn k_larger_than_store_returns_everything() {
        let embedder = FakeEmbedder::new();
        let mut store = IndexStore::create_empty();
        store
            .add_documents(vec![Document::with_id("a", "revenue by region")], &embedder)
            .await
            .unwrap();
        let outcome = search(&store, &embedder, "revenue", 10).await.unwrap();
        assert_eq!(outcome.hits().len(), 1);
    }

    #[tokio::test]
    async fn embedding_failure_is_not_corruption() {
        let embedder = FakeEmbedder::new();
        let mut store = IndexStore::create_empty();
        store.add_documents(docs(&["d0"]), &embedder).await.unwrap();
        let failing = FakeEmbedder::failing_on("FAIL");
        let err = search(&store, &failing, "FAIL", 1).await.unwrap_err();
        assert!(!err.is_corruption());
    }

    #[tokio::test]
    async fn other_embedding_model_is_refused_before_embedding() {
        let mut store = IndexStore::create_empty();
        store.add_documents(docs(&["d0"]), &FakeEmbedder::new()).await.unwrap();

        let other = FakeEmbedder::named("all-minilm");
        let err = search(&store, &other, "content of d0", 1).await.unwrap_err();
        assert!(matches!(err, StoreError::ModelMismatch { ref current, .. } if current == "all-minilm"));
        assert!(!err.is_corruption());
        assert_eq!(other.calls(), 0);
    }
}
