//! Deterministic providers for tests: no network, stable vectors.

use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Mutex;

use async_trait::async_trait;

use crate::document::Document;
use crate::provider::{EmbeddingProvider, GenerationProvider, ProviderError};

const DIM: usize = 256;

pub const FAKE_EMBED_MODEL: &str = "fake-embed";

/// Hashed bag-of-words embedder. Texts sharing words get similar vectors.
pub struct FakeEmbedder {
    model: String,
    fail_marker: Option<String>,
    calls: AtomicUsize,
}

impl FakeEmbedder {
    pub fn new() -> Self {
        Self::named(FAKE_EMBED_MODEL)
    }

    /// Same vectors, reported under another model name.
    pub fn named(model: &str) -> Self {
        Self {
            model: model.to_string(),
            fail_marker: None,
            calls: AtomicUsize::new(0),
        }
    }

    /// Fails any request containing a text with `marker` in it.
    pub fn failing_on(marker: &str) -> Self {
        Self {
            fail_marker: Some(marker.to_string()),
            ..Self::new()
        }
    }

    pub fn calls(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }

    pub fn vector_for(&self, text: &str) -> Vec<f32> {
        let mut v = vec![0.0; DIM];
        for word in text.split_whitespace() {
            v[(fnv1a(&word.to_lowercase()) % DIM as u64) as usize] += 1.0;
        }
        v
    }
}

#[async_trait]
impl EmbeddingProvider for FakeEmbedder {
    fn model(&self) -> &str {
        &self.model
    }

    async fn embed(&self, texts: &[String]) -> Result<Vec<Vec<f32>>, ProviderError> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        if let Some(marker) = &self.fail_marker {
            if texts.iter().any(|t| t.contains(marker.as_str())) {
                return Err(ProviderError::Unavailable("embedding model offline".into()));
            }
        }
        Ok(texts.iter().map(|t| self.vector_for(t)).collect())
    }
}

/// Records prompts and answers with a fixed reply, or fails.
pub struct FakeGenerator {
    reply: Result<String, String>,
    prompts: Mutex<Vec<String>>,
}

impl FakeGenerator {
    pub fn replying(reply: &str) -> Self {
        Self {
            reply: Ok(reply.to_string()),
            prompts: Mutex::new(Vec::new()),
        }
    }

    pub fn failing(message: &str) -> Self {
        Self {
            reply: Err(message.to_string()),
            prompts: Mutex::new(Vec::new()),
        }
    }

    pub fn prompts(&self) -> Vec<String> {
        self.prompts.lock().unwrap().clone()
    }
}

#[async_trait]
impl GenerationProvider for FakeGenerator {
    async fn generate(&self, prompt: &str) -> Result<String, ProviderError> {
        self.prompts.lock().unwrap().push(prompt.to_string());
        self.reply.clone().map_err(ProviderError::Unavailable)
    }
}

/// Documents whose id is the given name and whose content mentions it.
pub fn docs(ids: &[&str]) -> Vec<Document> {
    ids.iter()
        .map(|id| Document::with_id(*id, format!("content of {id}")))
        .collect()
}

fn fnv1a(s: &str) -> u64 {
    s.bytes().fold(0xcbf29ce484222325, |h, b| (h ^ u64::from(b)).wrapping_mul(0x100000001b3))
}
