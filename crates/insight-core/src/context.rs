//! The composed question-answering service: providers, index directory and the
//! open store, passed around explicitly instead of living in globals.
//!
//! Index lifecycle:
//!
//! ```text
//! Uninitialized --open--> Active            (loaded and validated, or freshly built)
//! Uninitialized --open--> Empty             (load failed or validation failed)
//! Active --lookup miss--> Empty
//! Empty --ingest--------> Active
//! ```
//!
//! A store that failed a check is never queried again: its persisted files are
//! deleted and the caller is told to re-ingest.

use std::path::{Path, PathBuf};
use std::sync::Arc;

use thiserror::Error;

use crate::answer::{answer, assemble_context_within, Answer, DEFAULT_MAX_CONTEXT_CHARS};
use crate::config::{Config, IngestMode};
use crate::document::Document;
use crate::persist;
use crate::provider::{EmbeddingProvider, GenerationProvider, ProviderError};
use crate::retrieval::{self, SearchOutcome, DEFAULT_TOP_K};
use crate::store::{IndexStore, StoreError, ValidationMode};

/// Retrieval and ingestion knobs, usually taken from [Config].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Settings {
    pub top_k: usize,
    pub max_context_chars: usize,
    pub ingest_mode: IngestMode,
    pub validation: ValidationMode,
}

impl Default for Settings {
    fn default() -> Self {
        Self {
            top_k: DEFAULT_TOP_K,
            max_context_chars: DEFAULT_MAX_CONTEXT_CHARS,
            ingest_mode: IngestMode::default(),
            validation: ValidationMode::default(),
        }
    }
}

impl From<&Config> for Settings {
    fn from(config: &Config) -> Self {
        Self {
            top_k: config.top_k,
            max_context_chars: config.max_context_chars,
            ingest_mode: config.ingest_mode,
            validation: config.validation,
        }
    }
}

#[derive(Debug)]
enum IndexState {
    Uninitialized,
    Active(IndexStore),
    /// No usable index: none persisted yet, or cleared after corruption.
    Empty,
}

/// What the caller can see of the index lifecycle.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum IndexStatus {
    Uninitialized,
    Active { total_vectors: u64 },
    Empty,
}

/// Result of [RagContext::open].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum OpenOutcome {
    Loaded { total_vectors: u64 },
    NoIndex,
}

/// Result of [RagContext::ingest].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct IngestReport {
    pub added: usize,
    pub total_vectors: u64,
    /// A corrupt index was found and cleared before these documents went in.
    pub recovered: bool,
}

pub struct RagContext {
    embedder: Arc<dyn EmbeddingProvider>,
    generator: Arc<dyn GenerationProvider>,
    index_dir: PathBuf,
    settings: Settings,
    state: IndexState,
}

impl RagContext {
    pub fn new(
        embedder: Arc<dyn EmbeddingProvider>,
        generator: Arc<dyn GenerationProvider>,
        index_dir: impl Into<PathBuf>,
        settings: Settings,
    ) -> Self {
        Self {
            embedder,
            generator,
            index_dir: index_dir.into(),
            settings,
            state: IndexState::Uninitialized,
        }
    }

    pub fn index_dir(&self) -> &Path {
        &self.index_dir
    }

    pub fn settings(&self) -> &Settings {
        &self.settings
    }

    pub fn status(&self) -> IndexStatus {
        match &self.state {
            IndexState::Uninitialized => IndexStatus::Uninitialized,
            IndexState::Active(store) => IndexStatus::Active {
                total_vectors: store.total_vectors(),
            },
            IndexState::Empty => IndexStatus::Empty,
        }
    }

    /// Load and validate the persisted index. A load or validation failure clears
    /// the index directory and returns [RagError::CorruptIndex]; the context is then
    /// empty and ready for re-ingestion. Plain I/O failures leave the files alone,
    /// and so does an index built by another embedding model
    /// ([RagError::RebuildRequired]).
    pub fn open(&mut self) -> Result<OpenOutcome, RagError> {
        let loaded = match IndexStore::load(&self.index_dir) {
            Ok(loaded) => loaded,
            Err(e) if e.is_corruption() => return Err(self.recover(&e.to_string())),
            Err(e) => return Err(RagError::PersistenceFailure(e)),
        };
        let Some(store) = loaded else {
            tracing::info!(dir = %self.index_dir.display(), "no existing index");
            self.state = IndexState::Empty;
            return Ok(OpenOutcome::NoIndex);
        };
        let store = store.with_validation(self.settings.validation);
        if let Err(e) = store.check() {
            return Err(self.recover(&e.to_string()));
        }
        store
            .check_model(self.embedder.model())
            .map_err(RagError::RebuildRequired)?;
        let total_vectors = store.total_vectors();
        self.state = IndexState::Active(store);
        Ok(OpenOutcome::Loaded { total_vectors })
    }

    fn ensure_open(&mut self) -> Result<(), RagError> {
        if matches!(self.state, IndexState::Uninitialized) {
            self.open()?;
        }
        Ok(())
    }

    /// Run validation on the open index, recovering as [Self::open] does on failure.
    pub fn validate(&mut self) -> Result<IndexStatus, RagError> {
        self.ensure_open()?;
        let failure = match &self.state {
            IndexState::Active(store) => store.check().err(),
            _ => None,
        };
        match failure {
            Some(e) => Err(self.recover(&e.to_string())),
            None => Ok(self.status()),
        }
    }

    /// Index `docs` and persist. Additive mode appends to the current index;
    /// replace mode rebuilds from `docs` alone. On failure both memory and disk
    /// keep their previous state.
    pub async fn ingest(&mut self, docs: Vec<Document>) -> Result<IngestReport, RagError> {
        let added = docs.len();
        let mut recovered = false;
        let store = match self.settings.ingest_mode {
            IngestMode::Replace => {
                IndexStore::rebuild_from(&self.index_dir, docs, self.embedder.as_ref(), self.settings.validation)
                    .await
                    .map_err(classify_write_error)?
            }
            IngestMode::Additive => {
                match self.ensure_open() {
                    Ok(()) => {}
                    Err(RagError::CorruptIndex { reason }) => {
                        tracing::warn!(%reason, "previous index was cleared; continuing with a fresh one");
                        recovered = true;
                    }
                    Err(e) => return Err(e),
                }
                let mut next = match &self.state {
                    IndexState::Active(store) => store.clone(),
                    _ => IndexStore::create_empty().with_validation(self.settings.validation),
                };
                next.add_documents(docs, self.embedder.as_ref())
                    .await
                    .map_err(classify_write_error)?;
                next.persist(&self.index_dir).map_err(classify_write_error)?;
                next
            }
        };
        let total_vectors = store.total_vectors();
        self.state = IndexState::Active(store);
        Ok(IngestReport {
            added,
            total_vectors,
            recovered,
        })
    }

    /// The configured number of documents most similar to `query`.
    pub async fn search(&mut self, query: &str) -> Result<SearchOutcome, RagError> {
        self.search_k(query, self.settings.top_k).await
    }

    pub async fn search_k(&mut self, query: &str, k: usize) -> Result<SearchOutcome, RagError> {
        self.ensure_open()?;
        let result = match &self.state {
            IndexState::Active(store) => retrieval::search(store, self.embedder.as_ref(), query, k).await,
            _ => return Ok(SearchOutcome::EmptyIndex),
        };
        match result {
            Ok(outcome) => Ok(outcome),
            Err(e) if e.is_corruption() => Err(self.recover(&e.to_string())),
            Err(e @ StoreError::ModelMismatch { .. }) => Err(RagError::RebuildRequired(e)),
            Err(e) => Err(RagError::RetrievalFailure(e)),
        }
    }

    /// Retrieve context for `question` and ask the generation model.
    pub async fn ask(&mut self, question: &str) -> Result<Answer, RagError> {
        let outcome = self.search(question).await?;
        let context = assemble_context_within(
            outcome.hits().iter().map(|h| &h.document),
            self.settings.max_context_chars,
        );
        answer(self.generator.as_ref(), question, &context)
            .await
            .map_err(RagError::GenerationFailure)
    }

    /// Drop the index from memory and disk.
    pub fn clear(&mut self) -> Result<(), RagError> {
        self.state = IndexState::Empty;
        persist::clear(&self.index_dir).map_err(|e| RagError::PersistenceFailure(e.into()))?;
        tracing::info!(dir = %self.index_dir.display(), "index cleared");
        Ok(())
    }

    /// Forget the store and delete its files. Returns the error to surface.
    fn recover(&mut self, reason: &str) -> RagError {
        tracing::warn!(dir = %self.index_dir.display(), reason, "index is corrupt; clearing it");
        self.state = IndexState::Empty;
        let mut reason = reason.to_string();
        if let Err(e) = persist::clear(&self.index_dir) {
            tracing::error!(error = %e, "could not clear corrupt index");
            reason = format!("{reason}; clearing also failed: {e}");
        }
        RagError::CorruptIndex { reason }
    }
}

fn classify_write_error(e: StoreError) -> RagError {
    match e {
        StoreError::Persist(_) => RagError::PersistenceFailure(e),
        StoreError::ModelMismatch { .. } => RagError::RebuildRequired(e),
        other => RagError::IngestionFailure(other),
    }
}

/// Failures surfaced by [RagContext]. All are recoverable by the caller; only
/// `CorruptIndex` implies the index was cleared first. `RebuildRequired` is cured
/// by a replacing ingest or a clear.
#[derive(Debug, Error)]
pub enum RagError {
    #[error("ingestion failed: {0}")]
    IngestionFailure(#[source] StoreError),
    #[error("could not persist index: {0}")]
    PersistenceFailure(#[source] StoreError),
    #[error("index was corrupt ({reason}); index cleared, re-ingest required")]
    CorruptIndex { reason: String },
    #[error("index must be rebuilt: {0}")]
    RebuildRequired(#[source] StoreError),
    #[error("retrieval failed: {0}")]
    RetrievalFailure(#[source] StoreError),
    #[error("answer generation failed: {0}")]
    GenerationFailure(#[source] ProviderError),
}

impl RagError {
    /// Whether trying the same call again may succeed without other action.
    pub fn is_retryable(&self) -> bool {
        !matches!(self, RagError::CorruptIndex { .. } | RagError::RebuildRequired(_))
    }
}

#[cfg(test)]
mod tests {
    use std::collections::BTreeMap;
    use std::fs;

    use super::*;
    use crate::test_support::{docs, FakeEmbedder, FakeGenerator};

    fn context(dir: &Path, generator: Arc<FakeGenerator>, settings: Settings) -> RagContext {
        RagContext::new(Arc::new(FakeEmbedder::new()), generator, dir, settings)
    }

    fn mapping_file(dir: &Path) -> PathBuf {
        persist::live_generation(dir).unwrap().unwrap().join(persist::MAPPING_FILE)
    }

    fn edit_mapping(dir: &Path, edit: impl FnOnce(&mut BTreeMap<String, String>)) {
        let path = mapping_file(dir);
        let mut table: BTreeMap<String, String> = serde_json::from_str(&fs::read_to_string(&path).unwrap()).unwrap();
        edit(&mut table);
        fs::write(&path, serde_json::to_string(&table).unwrap()).unwrap();
    }

    #[tokio::test]
    async fn fresh_directory_opens_empty() {
        let dir = tempfile::tempdir().unwrap();
        let mut ctx = context(dir.path(), Arc::new(FakeGenerator::replying("x")), Settings::default());
        assert_eq!(ctx.open().unwrap(), OpenOutcome::NoIndex);
        assert!(ctx.search("anything").await.unwrap().is_empty_index());
    }

    #[tokio::test]
    async fn additive_ingest_survives_reopen() {
        let dir = tempfile::tempdir().unwrap();
        let generator = Arc::new(FakeGenerator::replying("x"));
        let mut ctx = context(dir.path(), generator.clone(), Settings::default());
        ctx.ingest(docs(&["d0", "d1", "d2"])).await.unwrap();
        let report = ctx.ingest(docs(&["d3"])).await.unwrap();
        assert_eq!(report.total_vectors, 4);
        assert!(!report.recovered);

        let mut reopened = context(dir.path(), generator, Settings::default());
        assert_eq!(reopened.open().unwrap(), OpenOutcome::Loaded { total_vectors: 4 });
        let hits = reopened.search_k("content of d1", 2).await.unwrap().into_hits();
        assert_eq!(hits.len(), 2);
        assert_eq!(hits[0].document.id(), "d1");
    }

    #[tokio::test]
    async fn replace_mode_discards_earlier_uploads() {
        let dir = tempfile::tempdir().unwrap();
        let settings = Settings {
            ingest_mode: IngestMode::Replace,
            ..Settings::default()
        };
        let mut ctx = context(dir.path(), Arc::new(FakeGenerator::replying("x")), settings);
        ctx.ingest(docs(&["d0", "d1"])).await.unwrap();
        let report = ctx.ingest(docs(&["d2"])).await.unwrap();
        assert_eq!(report.total_vectors, 1);
        assert_eq!(IndexStore::load(dir.path()).unwrap().unwrap().total_vectors(), 1);
    }

    #[tokio::test]
    async fn failed_ingest_keeps_memory_and_disk() {
        let dir = tempfile::tempdir().unwrap();
        let mut ctx = RagContext::new(
            Arc::new(FakeEmbedder::failing_on("FAIL")),
            Arc::new(FakeGenerator::replying("x")),
            dir.path(),
            Settings::default(),
        );
        ctx.ingest(docs(&["d0"])).await.unwrap();
        let mut batch = docs(&["d1"]);
        batch.push(Document::with_id("d2", "FAIL"));
        let err = ctx.ingest(batch).await.unwrap_err();
        assert!(matches!(err, RagError::IngestionFailure(_)));
        assert!(err.is_retryable());
        assert_eq!(ctx.status(), IndexStatus::Active { total_vectors: 1 });
        assert_eq!(IndexStore::load(dir.path()).unwrap().unwrap().total_vectors(), 1);
    }

    #[tokio::test]
    async fn failed_save_keeps_memory_and_disk() {
        let dir = tempfile::tempdir().unwrap();
        let mut ctx = context(dir.path(), Arc::new(FakeGenerator::replying("x")), Settings::default());
        ctx.ingest(docs(&["d0", "d1"])).await.unwrap();
        let saved = fs::read_to_string(mapping_file(dir.path())).unwrap();

        // A directory where the CURRENT pointer should be renamed to.
        let current = dir.path().join(persist::CURRENT_FILE);
        let pointer = fs::read_to_string(&current).unwrap();
        fs::remove_file(&current).unwrap();
        fs::create_dir(&current).unwrap();
        fs::write(current.join("keep"), "").unwrap();

        let err = ctx.ingest(docs(&["d2"])).await.unwrap_err();
        assert!(matches!(err, RagError::PersistenceFailure(_)));
        assert_eq!(ctx.status(), IndexStatus::Active { total_vectors: 2 });
        let hits = ctx.search_k("content of d2", 3).await.unwrap().into_hits();
        assert!(hits.iter().all(|h| h.document.id() != "d2"));

        assert!(!dir.path().join("gen-2").exists());
        fs::remove_dir_all(&current).unwrap();
        fs::write(&current, pointer).unwrap();
        assert_eq!(fs::read_to_string(mapping_file(dir.path())).unwrap(), saved);
        assert_eq!(IndexStore::load(dir.path()).unwrap().unwrap().total_vectors(), 2);
    }

    #[tokio::test]
    async fn index_from_another_embedding_model_requires_rebuild() {
        let dir = tempfile::tempdir().unwrap();
        let generator = Arc::new(FakeGenerator::replying("x"));
        let mut ctx = context(dir.path(), generator.clone(), Settings::default());
        ctx.ingest(docs(&["d0", "d1"])).await.unwrap();

        let other = Arc::new(FakeEmbedder::named("all-minilm"));
        let mut switched = RagContext::new(other.clone(), generator.clone(), dir.path(), Settings::default());
        let err = switched.open().unwrap_err();
        assert!(matches!(err, RagError::RebuildRequired(_)));
        assert!(!err.is_retryable());
        assert!(matches!(switched.ask("content of d0").await, Err(RagError::RebuildRequired(_))));
        assert!(matches!(switched.ingest(docs(&["d2"])).await, Err(RagError::RebuildRequired(_))));
        assert_eq!(other.calls(), 0);
        assert!(generator.prompts().is_empty());
        assert_eq!(IndexStore::load(dir.path()).unwrap().unwrap().total_vectors(), 2);

        let settings = Settings {
            ingest_mode: IngestMode::Replace,
            ..Settings::default()
        };
        let mut rebuilt = RagContext::new(other, generator, dir.path(), settings);
        rebuilt.ingest(docs(&["d2"])).await.unwrap();
        let loaded = IndexStore::load(dir.path()).unwrap().unwrap();
        assert_eq!(loaded.embed_model(), Some("all-minilm"));
        assert_eq!(loaded.total_vectors(), 1);
    }

    #[tokio::test]
    async fn missing_mapping_entry_clears_the_index_on_open() {
        let dir = tempfile::tempdir().unwrap();
        let generator = Arc::new(FakeGenerator::replying("x"));
        let mut ctx = context(dir.path(), generator.clone(), Settings::default());
        ctx.ingest(docs(&["d0", "d1", "d2", "d3"])).await.unwrap();
        edit_mapping(dir.path(), |t| {
            t.remove("2");
        });

        let mut reopened = context(dir.path(), generator, Settings::default());
        let err = reopened.open().unwrap_err();
        assert!(matches!(err, RagError::CorruptIndex { .. }));
        assert!(err.to_string().contains("re-ingest required"));
        assert_eq!(reopened.status(), IndexStatus::Empty);
        assert_eq!(fs::read_dir(dir.path()).unwrap().count(), 0);
        assert!(reopened.search("d1").await.unwrap().is_empty_index());

        let report = reopened.ingest(docs(&["d0"])).await.unwrap();
        assert_eq!(report.total_vectors, 1);
    }

    #[tokio::test]
    async fn unreadable_mapping_clears_the_index() {
        let dir = tempfile::tempdir().unwrap();
        let generator = Arc::new(FakeGenerator::replying("x"));
        let mut ctx = context(dir.path(), generator.clone(), Settings::default());
        ctx.ingest(docs(&["d0"])).await.unwrap();
        fs::write(mapping_file(dir.path()), "[[[").unwrap();

        let mut reopened = context(dir.path(), generator, Settings::default());
        let report = reopened.ingest(docs(&["d5"])).await.unwrap();
        assert!(report.recovered);
        assert_eq!(report.total_vectors, 1);
    }

    #[tokio::test]
    async fn lookup_miss_during_search_clears_instead_of_answering() {
        let dir = tempfile::tempdir().unwrap();
        let generator = Arc::new(FakeGenerator::replying("x"));
        let mut ctx = context(dir.path(), generator.clone(), Settings::default());
        ctx.ingest(docs(&["d0", "d1", "d2", "d3", "d4", "d5"])).await.unwrap();
        // Sampled validation probes positions 0, 3 and 5; damage position 1 only.
        edit_mapping(dir.path(), |t| {
            t.insert("1".into(), "ghost".into());
        });

        let mut reopened = context(dir.path(), generator.clone(), Settings::default());
        assert_eq!(reopened.open().unwrap(), OpenOutcome::Loaded { total_vectors: 6 });
        let err = reopened.ask("content of d1").await.unwrap_err();
        assert!(matches!(err, RagError::CorruptIndex { .. }));
        assert!(generator.prompts().is_empty());
        assert_eq!(reopened.status(), IndexStatus::Empty);
        assert!(IndexStore::load(dir.path()).unwrap().is_none());
    }

    #[tokio::test]
    async fn exhaustive_validation_catches_it_on_open() {
        let dir = tempfile::tempdir().unwrap();
        let generator = Arc::new(FakeGenerator::replying("x"));
        let mut ctx = context(dir.path(), generator.clone(), Settings::default());
        ctx.ingest(docs(&["d0", "d1", "d2", "d3", "d4", "d5"])).await.unwrap();
        edit_mapping(dir.path(), |t| {
            t.insert("1".into(), "ghost".into());
        });

        let settings = Settings {
            validation: ValidationMode::Exhaustive,
            ..Settings::default()
        };
        let mut reopened = context(dir.path(), generator, settings);
        assert!(matches!(reopened.validate(), Err(RagError::CorruptIndex { .. })));
    }

    #[tokio::test]
    async fn ask_uses_retrieved_context() {
        let dir = tempfile::tempdir().unwrap();
        let generator = Arc::new(FakeGenerator::replying("Sales rose 4%."));
        let mut ctx = context(dir.path(), generator.clone(), Settings::default());
        ctx.ingest(vec![
            Document::with_id("s", "sales rose four percent in march"),
            Document::with_id("w", "the weather was mild"),
        ])
        .await
        .unwrap();

        let got = ctx.ask("how did sales change in march").await.unwrap();
        assert_eq!(got, Answer::Generated("Sales rose 4%.".into()));
        let prompt = &generator.prompts()[0];
        let sales = prompt.find("sales rose").unwrap();
        let weather = prompt.find("weather").unwrap();
        assert!(sales < weather);
    }

    #[tokio::test]
    async fn ask_on_empty_index_is_insufficient_context() {
        let dir = tempfile::tempdir().unwrap();
        let generator = Arc::new(FakeGenerator::replying("made up"));
        let mut ctx = context(dir.path(), generator.clone(), Settings::default());
        assert_eq!(ctx.ask("anything?").await.unwrap(), Answer::InsufficientContext);
        assert!(generator.prompts().is_empty());
    }

    #[tokio::test]
    async fn generation_failure_is_surfaced() {
        let dir = tempfile::tempdir().unwrap();
        let mut ctx = context(dir.path(), Arc::new(FakeGenerator::failing("offline")), Settings::default());
        ctx.ingest(docs(&["d0"])).await.unwrap();
        let err = ctx.ask("content").await.unwrap_err();
        assert!(matches!(err, RagError::GenerationFailure(_)));
    }

    #[tokio::test]
    async fn clear_removes_everything() {
        let dir = tempfile::tempdir().unwrap();
        let mut ctx = context(dir.path(), Arc::new(FakeGenerator::replying("x")), Settings::default());
        ctx.ingest(docs(&["d0"])).await.unwrap();
        ctx.clear().unwrap();
        assert_eq!(ctx.status(), IndexStatus::Empty);
        assert!(IndexStore::load(dir.path()).unwrap().is_none());
    }
}
