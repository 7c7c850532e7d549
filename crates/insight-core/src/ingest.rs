//! Ingestion: turns scanned sources, table summaries and extracted PDF pages into
//! documents ready for [crate::store::IndexStore::add_documents].

use std::path::Path;

use serde::{Deserialize, Serialize};

use crate::chunks::{chunk_text, ChunkParams};
use crate::document::Document;
use crate::sources::{scan_sources, ScanError, SourceFile};

/// Scan `root` and chunk every source into documents.
pub fn scan_documents(root: &Path, params: ChunkParams) -> Result<Vec<Document>, ScanError> {
    let sources = scan_sources(root)?;
    let docs = source_documents(&sources, params);
    tracing::info!(root = %root.display(), sources = sources.len(), documents = docs.len(), "sources scanned");
    Ok(docs)
}

/// One document per chunk, carrying the source path, chunk number and frontmatter.
pub fn source_documents(sources: &[SourceFile], params: ChunkParams) -> Vec<Document> {
    sources
        .iter()
        .flat_map(|src| {
            let path = src.path.display().to_string();
            chunk_text(&src.body, params)
                .into_iter()
                .enumerate()
                .map(move |(i, text)| {
                    Document::new(text)
                        .with_metadata(src.metadata.clone())
                        .with_meta("source", path.clone())
                        .with_meta("chunk", i)
                })
        })
        .collect()
}

/// Per-dataset summary computed by the dataframe layer.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct TableSummary {
    pub rows: usize,
    pub columns: Vec<String>,
    /// Pre-rendered `column  dtype` lines.
    pub dtypes: String,
    /// Pre-rendered `column  missing-count` lines.
    pub missing: String,
    /// Pre-rendered descriptive statistics table.
    pub statistics: String,
}

/// The four documents describing a table: overview, column types, missing values,
/// statistical summary.
pub fn table_documents(summary: &TableSummary, filename: &str) -> Vec<Document> {
    let overview = format!(
        "Dataset Overview for {filename}\nRows: {}\nColumns: {}\nColumn Names: {}",
        summary.rows,
        summary.columns.len(),
        summary.columns.join(", ")
    );
    [
        ("overview", overview),
        ("dtypes", format!("Column Data Types:\n{}", summary.dtypes)),
        ("missing", format!("Missing Values Per Column:\n{}", summary.missing)),
        ("statistics", format!("Statistical Summary:\n{}", summary.statistics)),
    ]
    .into_iter()
    .map(|(kind, content)| {
        Document::new(content)
            .with_meta("source", filename)
            .with_meta("kind", kind)
    })
    .collect()
}

/// Chunk already-extracted PDF page texts (one entry per page, first page is 1).
pub fn pdf_documents(pages: &[String], source: &str, params: ChunkParams) -> Vec<Document> {
    pages
        .iter()
        .enumerate()
        .flat_map(|(page, text)| {
            chunk_text(text, params)
                .into_iter()
                .enumerate()
                .map(move |(i, chunk)| {
                    Document::new(chunk)
                        .with_meta("source", source)
                        .with_meta("page", page + 1)
                        .with_meta("chunk", i)
                })
        })
        .collect()
}
