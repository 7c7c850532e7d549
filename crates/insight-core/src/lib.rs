//! All backend logic independent of how the app is run.
//!
//! Documents are embedded into a persisted vector index; questions are answered
//! from the most similar documents by a generation model. Source files live in a
//! folder the user chooses. insight stores only config and the index in its own
//! app data directory (see [app_data]).

pub mod answer;
pub mod app_data;
pub mod chunks;
pub mod config;
pub mod context;
pub mod document;
pub mod flat_index;
pub mod ingest;
pub mod ollama;
pub mod persist;
pub mod positions;
pub mod provider;
pub mod retrieval;
pub mod sources;
pub mod store;
pub mod watcher;

#[cfg(test)]
mod test_support;

pub use answer::{answer, assemble_context, assemble_context_within, build_prompt, Answer, Context};
pub use app_data::app_data_dir;
pub use chunks::{chunk_text, ChunkParams, DEFAULT_CHUNK_OVERLAP, DEFAULT_CHUNK_SIZE};
pub use config::{
    load_config, save_config, set_sources_root, Config, ConfigError, IngestMode,
};
pub use context::{IndexStatus, IngestReport, OpenOutcome, RagContext, RagError, Settings};
pub use document::{Document, Metadata, MetadataValue};
pub use ingest::{pdf_documents, scan_documents, source_documents, table_documents, TableSummary};
pub use ollama::{OllamaClient, OllamaError};
pub use positions::{PositionKey, PositionMap};
pub use provider::{EmbeddingProvider, GenerationProvider, ProviderError};
pub use retrieval::{search, SearchOutcome};
pub use sources::{scan_sources, ScanError, SourceFile};
pub use store::{IndexStore, ScoredDocument, StoreError, ValidationMode};
pub use watcher::{watch_sources, SourceWatcher, WatchError};

/// Returns a short status string. Used to verify the backend is wired up.
pub fn status() -> &'static str {
    "insight-core ready"
}
