//! Discovering text sources (markdown and plain text) under a user-chosen directory.
//!
//! The sources root is chosen by the user; we only read and index it.

use std::path::{Path, PathBuf};

use walkdir::WalkDir;

use crate::document::{Metadata, MetadataValue};

/// File extensions picked up by [scan_sources].
pub const SOURCE_EXTENSIONS: &[&str] = &["md", "txt"];

/// A source file we found: path, body, and any frontmatter fields.
#[derive(Debug, Clone)]
pub struct SourceFile {
    pub path: PathBuf,
    /// Content without YAML frontmatter.
    pub body: String,
    /// Scalar frontmatter fields; nested values are skipped.
    pub metadata: Metadata,
}

/// Scans `root` for source files and returns them sorted by path.
/// Hidden entries are skipped and symlinks into directories are not followed.
pub fn scan_sources(root: &Path) -> Result<Vec<SourceFile>, ScanError> {
    if !root.is_dir() {
        return Err(ScanError::NotADirectory(root.to_path_buf()));
    }
    let mut sources = Vec::new();
    for entry in WalkDir::new(root)
        .follow_links(false)
        .sort_by_file_name()
        .into_iter()
        .filter_entry(|e| e.depth() == 0 || !is_hidden(e))
    {
        let entry = entry.map_err(|e| ScanError::Walk(e.to_string()))?;
        let path = entry.path();
        if is_source(path) && path.is_file() {
            let raw = std::fs::read_to_string(path).map_err(|e| ScanError::Read(path.to_path_buf(), e))?;
            sources.push(read_source(path, &raw));
        }
    }
    Ok(sources)
}

/// Parse one source file's raw content.
pub fn read_source(path: &Path, raw: &str) -> SourceFile {
    let (frontmatter, body) = split_frontmatter(raw);
    let metadata = frontmatter.map(parse_frontmatter).unwrap_or_default();
    SourceFile {
        path: path.to_path_buf(),
        body: body.to_string(),
        metadata,
    }
}

fn is_source(path: &Path) -> bool {
    path.extension()
        .and_then(|e| e.to_str())
        .map_or(false, |e| SOURCE_EXTENSIONS.iter().any(|s| e.eq_ignore_ascii_case(s)))
}

fn is_hidden(entry: &walkdir::DirEntry) -> bool {
    entry
        .file_name()
        .to_str()
        .map(|s| s.starts_with('.'))
        .unwrap_or(false)
}

/// Separates optional YAML frontmatter (between a leading `---` and the next `---` line)
/// from the body.
fn split_frontmatter(content: &str) -> (Option<&str>, &str) {
    let s = content.trim_start();
    let Some(after_first) = s.strip_prefix("---") else {
        return (None, content);
    };
    match after_first.find("\n---") {
        Some(end) => {
            let yaml = &after_first[..end];
            let rest = &after_first[end + 4..];
            (Some(yaml), rest.trim_start())
        }
        None => (None, content),
    }
}

/// Top-level scalar fields of a YAML mapping. Malformed YAML yields no metadata.
fn parse_frontmatter(yaml: &str) -> Metadata {
    let mut metadata = Metadata::new();
    let value: serde_yaml::Value = match serde_yaml::from_str(yaml) {
        Ok(v) => v,
        Err(e) => {
            tracing::debug!(error = %e, "ignoring unparsable frontmatter");
            return metadata;
        }
    };
    let serde_yaml::Value::Mapping(map) = value else {
        return metadata;
    };
    for (key, value) in map {
        let Some(key) = key.as_str() else { continue };
        let scalar = match value {
            serde_yaml::Value::Bool(b) => MetadataValue::Bool(b),
            serde_yaml::Value::Number(n) => match n.as_i64() {
                Some(i) => MetadataValue::Int(i),
                None => match n.as_f64() {
                    Some(f) => MetadataValue::Float(f),
                    None => continue,
                },
            },
            serde_yaml::Value::String(s) => MetadataValue::Text(s),
            _ => continue,
        };
        metadata.insert(key.to_string(), scalar);
    }
    metadata
}

#[derive(Debug, thiserror::Error)]
pub enum ScanError {
    #[error("not a directory: {0}")]
    NotADirectory(PathBuf),
    #[error("walk error: {0}")]
    Walk(String),
    #[error("read error for {0}: {1}")]
    Read(PathBuf, std::io::Error),
}
