//! On-disk layout of a persisted index.
//!
//! ```text
//! <root>/CURRENT          name of the live generation, e.g. "gen-3"
//! <root>/gen-3/index.json     similarity structure
//! <root>/gen-3/mapping.json   position -> document id, string keyed
//! <root>/gen-3/docstore.json  document id -> document
//! ```
//!
//! A save writes a whole new generation directory, then swaps `CURRENT` with a
//! rename. Readers follow `CURRENT`, so they see either the old or the new
//! generation in full.

use std::collections::BTreeMap;
use std::fs::{self, File};
use std::io::{self, BufReader, BufWriter, Write};
use std::path::{Path, PathBuf};

use serde::de::DeserializeOwned;
use serde::Serialize;
use thiserror::Error;

use crate::document::Document;
use crate::flat_index::FlatIndex;

pub const CURRENT_FILE: &str = "CURRENT";
pub const INDEX_FILE: &str = "index.json";
pub const MAPPING_FILE: &str = "mapping.json";
pub const DOCSTORE_FILE: &str = "docstore.json";

const GENERATION_PREFIX: &str = "gen-";
const TEMP_PREFIX: &str = ".tmp";

/// Everything read back from one generation.
#[derive(Debug)]
pub struct Snapshot {
    pub index: FlatIndex,
    pub mapping: BTreeMap<String, String>,
    pub docstore: BTreeMap<String, Document>,
}

/// Directory of the live generation, if a complete one exists under `root`.
pub fn live_generation(root: &Path) -> Result<Option<PathBuf>, PersistError> {
    let current = root.join(CURRENT_FILE);
    let name = match fs::read_to_string(&current) {
        Ok(s) => s.trim().to_string(),
        Err(e) if e.kind() == io::ErrorKind::NotFound => return Ok(None),
        Err(e) => return Err(PersistError::io(&current, e)),
    };
    if parse_generation(&name).is_none() {
        return Err(PersistError::BadPointer { path: current, name });
    }
    let dir = root.join(&name);
    let complete = [INDEX_FILE, MAPPING_FILE, DOCSTORE_FILE]
        .iter()
        .all(|f| dir.join(f).is_file());
    Ok(complete.then_some(dir))
}

/// Read the live generation. `Ok(None)` means there is no persisted index.
pub fn read_snapshot(root: &Path) -> Result<Option<Snapshot>, PersistError> {
    let Some(dir) = live_generation(root)? else {
        return Ok(None);
    };
    Ok(Some(Snapshot {
        index: read_json(&dir.join(INDEX_FILE))?,
        mapping: read_json(&dir.join(MAPPING_FILE))?,
        docstore: read_json(&dir.join(DOCSTORE_FILE))?,
    }))
}

/// Write a new generation and make it live. Older generations and leftovers of
/// earlier saves are removed afterwards; other files under `root` are left alone.
/// Returns the new generation directory.
pub fn write_snapshot(
    root: &Path,
    index: &FlatIndex,
    mapping: &BTreeMap<String, String>,
    docstore: &BTreeMap<String, Document>,
) -> Result<PathBuf, PersistError> {
    fs::create_dir_all(root).map_err(|e| PersistError::io(root, e))?;
    let name = format!("{GENERATION_PREFIX}{}", next_generation(root)?);
    let dir = root.join(&name);
    fs::create_dir(&dir).map_err(|e| PersistError::io(&dir, e))?;

    if let Err(e) = write_generation(root, &dir, &name, index, mapping, docstore) {
        if let Err(cleanup) = fs::remove_dir_all(&dir) {
            tracing::warn!(dir = %dir.display(), error = %cleanup, "could not remove unfinished generation");
        }
        return Err(e);
    }
    remove_stale(root, &name);
    Ok(dir)
}

fn write_generation(
    root: &Path,
    dir: &Path,
    name: &str,
    index: &FlatIndex,
    mapping: &BTreeMap<String, String>,
    docstore: &BTreeMap<String, Document>,
) -> Result<(), PersistError> {
    write_json(&dir.join(INDEX_FILE), index)?;
    write_json(&dir.join(MAPPING_FILE), mapping)?;
    write_json(&dir.join(DOCSTORE_FILE), docstore)?;
    sync_dir(dir).map_err(|e| PersistError::io(dir, e))?;

    let mut pointer = tempfile::Builder::new()
        .prefix(TEMP_PREFIX)
        .tempfile_in(root)
        .map_err(|e| PersistError::io(root, e))?;
    pointer
        .write_all(name.as_bytes())
        .and_then(|_| pointer.as_file().sync_all())
        .map_err(|e| PersistError::io(pointer.path(), e))?;
    let current = root.join(CURRENT_FILE);
    pointer
        .persist(&current)
        .map_err(|e| PersistError::io(&current, e.error))?;
    sync_dir(root).map_err(|e| PersistError::io(root, e))
}

/// Delete the index files under `root`: the pointer, every generation and temp
/// leftovers. The directory and anything else in it stay.
pub fn clear(root: &Path) -> Result<(), PersistError> {
    let entries = match fs::read_dir(root) {
        Ok(entries) => entries,
        Err(e) if e.kind() == io::ErrorKind::NotFound => return Ok(()),
        Err(e) => return Err(PersistError::io(root, e)),
    };
    for entry in entries {
        let entry = entry.map_err(|e| PersistError::io(root, e))?;
        if !is_index_entry(&entry) {
            continue;
        }
        let path = entry.path();
        remove_entry(&path).map_err(|e| PersistError::io(&path, e))?;
    }
    Ok(())
}

/// Names this module writes under a root. Anything else belongs to someone else.
fn is_index_entry(entry: &fs::DirEntry) -> bool {
    let Some(name) = entry.file_name().to_str().map(str::to_owned) else {
        return false;
    };
    let is_dir = entry.file_type().map(|t| t.is_dir()).unwrap_or(false);
    name == CURRENT_FILE
        || (is_dir && parse_generation(&name).is_some())
        || (!is_dir && name.starts_with(TEMP_PREFIX))
}

fn remove_entry(path: &Path) -> io::Result<()> {
    if path.is_dir() {
        fs::remove_dir_all(path)
    } else {
        fs::remove_file(path)
    }
}

fn parse_generation(name: &str) -> Option<u64> {
    name.strip_prefix(GENERATION_PREFIX)?.parse().ok()
}

fn next_generation(root: &Path) -> Result<u64, PersistError> {
    let mut max = 0;
    for entry in fs::read_dir(root).map_err(|e| PersistError::io(root, e))? {
        let entry = entry.map_err(|e| PersistError::io(root, e))?;
        if let Some(n) = entry.file_name().to_str().and_then(parse_generation) {
            max = max.max(n);
        }
    }
    Ok(max + 1)
}

/// Best effort: a leftover only wastes space, the live generation is already safe.
fn remove_stale(root: &Path, live: &str) {
    let Ok(entries) = fs::read_dir(root) else {
        return;
    };
    for entry in entries.flatten() {
        let name = entry.file_name();
        if name == CURRENT_FILE || name == live || !is_index_entry(&entry) {
            continue;
        }
        let path = entry.path();
        if let Err(e) = remove_entry(&path) {
            tracing::warn!(path = %path.display(), error = %e, "could not remove stale index files");
        }
    }
}

fn write_json<T: Serialize + ?Sized>(path: &Path, value: &T) -> Result<(), PersistError> {
    let file = File::create(path).map_err(|e| PersistError::io(path, e))?;
    let mut writer = BufWriter::new(file);
    serde_json::to_writer(&mut writer, value).map_err(|e| PersistError::json(path, e))?;
    let file = writer
        .into_inner()
        .map_err(|e| PersistError::io(path, e.into_error()))?;
    file.sync_all().map_err(|e| PersistError::io(path, e))
}

fn read_json<T: DeserializeOwned>(path: &Path) -> Result<T, PersistError> {
    let file = File::open(path).map_err(|e| PersistError::io(path, e))?;
    serde_json::from_reader(BufReader::new(file)).map_err(|e| PersistError::json(path, e))
}

#[cfg(unix)]
fn sync_dir(dir: &Path) -> io::Result<()> {
    File::open(dir)?.sync_all()
}

#[cfg(not(unix))]
fn sync_dir(_dir: &Path) -> io::Result<()> {
    Ok(())
}

#[derive(Debug, Error)]
pub enum PersistError {
    #[error("i/o error at {path}: {source}")]
    Io { path: PathBuf, source: io::Error },
    #[error("invalid data in {path}: {source}")]
    Json {
        path: PathBuf,
        source: serde_json::Error,
    },
    #[error("{path} names an unknown generation {name:?}")]
    BadPointer { path: PathBuf, name: String },
}

impl PersistError {
    fn io(path: &Path, source: io::Error) -> Self {
        PersistError::Io {
            path: path.to_path_buf(),
            source,
        }
    }

    fn json(path: &Path, source: serde_json::Error) -> Self {
        PersistError::Json {
            path: path.to_path_buf(),
            source,
        }
    }

    /// True when the files exist but their contents cannot be trusted.
    pub fn is_corruption(&self) -> bool {
        matches!(self, PersistError::Json { .. } | PersistError::BadPointer { .. })
    }
}
