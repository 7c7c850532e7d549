//! Ollama client for embeddings and completion. Wraps ollama-rs and implements the
//! provider traits.

use async_trait::async_trait;
use ollama_rs::generation::completion::request::GenerationRequest;
use ollama_rs::generation::embeddings::request::{EmbeddingsInput, GenerateEmbeddingsRequest};
use ollama_rs::models::ModelOptions;
use ollama_rs::Ollama;
use thiserror::Error;

use crate::provider::{EmbeddingProvider, GenerationProvider, ProviderError};

pub const DEFAULT_EMBED_MODEL: &str = "nomic-embed-text";
pub const DEFAULT_GENERATION_MODEL: &str = "llama3.2";
pub const DEFAULT_BASE_URL: &str = "http://localhost:11434";

/// Low temperature keeps answers close to the retrieved context.
pub const GENERATION_TEMPERATURE: f32 = 0.1;

/// Tried in order when the configured embedding model is not installed.
pub const EMBED_FALLBACKS: &[&str] = &["nomic-embed-text", "all-minilm", "llama3.2"];
/// Tried in order when the configured generation model is not installed.
pub const GENERATION_FALLBACKS: &[&str] = &["llama3.2", "llama3.1:8b", "gemma3:1b"];

/// Thin wrapper around Ollama for embedding and completion.
#[derive(Debug, Clone)]
pub struct OllamaClient {
    inner: Ollama,
    embed_model: String,
    generation_model: String,
}

impl OllamaClient {
    /// Create from URL string, e.g. http://localhost:11434.
    pub fn from_url(url: &str) -> Result<Self, OllamaError> {
        let inner = Ollama::try_new(url).map_err(OllamaError::ParseUrl)?;
        Ok(Self {
            inner,
            embed_model: DEFAULT_EMBED_MODEL.to_string(),
            generation_model: DEFAULT_GENERATION_MODEL.to_string(),
        })
    }

    /// Set the embedding model (e.g. `nomic-embed-text`, `all-minilm`).
    pub fn with_embed_model(mut self, model: impl Into<String>) -> Self {
        self.embed_model = model.into();
        self
    }

    /// Set the generation model (e.g. `llama3.2`, `gemma3:1b`).
    pub fn with_generation_model(mut self, model: impl Into<String>) -> Self {
        self.generation_model = model.into();
        self
    }

    pub fn embed_model(&self) -> &str {
        &self.embed_model
    }

    pub fn generation_model(&self) -> &str {
        &self.generation_model
    }

    /// Names of models installed in the local Ollama.
    pub async fn installed_models(&self) -> Result<Vec<String>, OllamaError> {
        let models = self
            .inner
            .list_local_models()
            .await
            .map_err(OllamaError::Request)?;
        Ok(models.into_iter().map(|m| m.name).collect())
    }

    /// Swap both configured models for installed ones, falling back down the
    /// default lists when the preferred model is missing.
    pub async fn resolve_models(mut self) -> Result<Self, OllamaError> {
        let installed = self.installed_models().await?;
        self.embed_model = resolve_model(&installed, &self.embed_model, EMBED_FALLBACKS)?;
        self.generation_model =
            resolve_model(&installed, &self.generation_model, GENERATION_FALLBACKS)?;
        Ok(self)
    }
}

/// Picks `preferred` if installed, else the first installed fallback.
pub fn resolve_model(
    installed: &[String],
    preferred: &str,
    fallbacks: &[&str],
) -> Result<String, OllamaError> {
    if is_installed(installed, preferred) {
        return Ok(preferred.to_string());
    }
    for candidate in fallbacks {
        if is_installed(installed, candidate) {
            tracing::warn!(
                preferred,
                using = *candidate,
                "model not installed, falling back (install it with `ollama pull {preferred}`)"
            );
            return Ok(candidate.to_string());
        }
    }
    Err(OllamaError::NoModel {
        preferred: preferred.to_string(),
    })
}

/// Ollama lists untagged pulls as `name:latest`.
fn is_installed(installed: &[String], model: &str) -> bool {
    installed.iter().any(|name| {
        name == model
            || (!model.contains(':') && name.strip_suffix(":latest") == Some(model))
    })
}

#[async_trait]
impl EmbeddingProvider for OllamaClient {
    fn model(&self) -> &str {
        &self.embed_model
    }

    async fn embed(&self, texts: &[String]) -> Result<Vec<Vec<f32>>, ProviderError> {
        if texts.is_empty() {
            return Ok(Vec::new());
        }
        let req = GenerateEmbeddingsRequest::new(
            self.embed_model.clone(),
            EmbeddingsInput::Multiple(texts.to_vec()),
        );
        let res = self
            .inner
            .generate_embeddings(req)
            .await
            .map_err(|e| ProviderError::Request(e.to_string()))?;
        Ok(res.embeddings)
    }
}

#[async_trait]
impl GenerationProvider for OllamaClient {
    async fn generate(&self, prompt: &str) -> Result<String, ProviderError> {
        let req = GenerationRequest::new(self.generation_model.clone(), prompt.to_string())
            .options(ModelOptions::default().temperature(GENERATION_TEMPERATURE));
        let res = self
            .inner
            .generate(req)
            .await
            .map_err(|e| ProviderError::Request(e.to_string()))?;
        Ok(res.response)
    }
}

#[derive(Debug, Error)]
pub enum OllamaError {
    #[error("invalid Ollama URL: {0}")]
    ParseUrl(#[from] url::ParseError),
    #[error("Ollama request failed: {0}")]
    Request(#[from] ollama_rs::error::OllamaError),
    #[error("no usable model found; install one with `ollama pull {preferred}`")]
    NoModel { preferred: String },
}
