//! Seams to the embedding and text-generation backends.
//!
//! The store and answer code only see these traits; [crate::ollama] provides the
//! real implementation and tests swap in deterministic fakes.

use async_trait::async_trait;
use thiserror::Error;

/// Maps texts to fixed-length vectors, one per input, in input order.
#[async_trait]
pub trait EmbeddingProvider: Send + Sync {
    /// Name of the model behind the vectors. Vectors from different models are
    /// not comparable.
    fn model(&self) -> &str;

    async fn embed(&self, texts: &[String]) -> Result<Vec<Vec<f32>>, ProviderError>;
}

/// Turns a prompt into generated text.
#[async_trait]
pub trait GenerationProvider: Send + Sync {
    async fn generate(&self, prompt: &str) -> Result<String, ProviderError>;
}

#[derive(Debug, Error)]
pub enum ProviderError {
    #[error("provider unavailable: {0}")]
    Unavailable(String),
    #[error("provider request failed: {0}")]
    Request(String),
    #[error("malformed provider response: {0}")]
    Malformed(String),
}

/// Embeds `texts` and checks the provider answered with one vector per text.
pub(crate) async fn embed_checked(
    provider: &dyn EmbeddingProvider,
    texts: &[String],
) -> Result<Vec<Vec<f32>>, ProviderError> {
    if texts.is_empty() {
        return Ok(Vec::new());
    }
    let vectors = provider.embed(texts).await?;
    if vectors.len() != texts.len() {
        return Err(ProviderError::Malformed(format!(
            "expected {} embeddings, got {}",
            texts.len(),
            vectors.len()
        )));
    }
    Ok(vectors)
}
