//! Persisted config (Ollama models, index location, retrieval knobs) in the app data directory.

use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};

use crate::answer::DEFAULT_MAX_CONTEXT_CHARS;
use crate::app_data;
use crate::chunks::{ChunkParams, DEFAULT_CHUNK_OVERLAP, DEFAULT_CHUNK_SIZE};
use crate::ollama::{DEFAULT_BASE_URL, DEFAULT_EMBED_MODEL, DEFAULT_GENERATION_MODEL};
use crate::retrieval::DEFAULT_TOP_K;
use crate::store::ValidationMode;

const CONFIG_FILENAME: &str = "config.toml";
const INDEX_DIRNAME: &str = "index";

/// Whether new uploads extend the index or replace it.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum IngestMode {
    /// Append to whatever is already indexed.
    #[default]
    Additive,
    /// Rebuild the index from the new documents alone.
    Replace,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct Config {
    pub ollama_url: String,
    pub embed_model: String,
    pub generation_model: String,
    /// Where the index is persisted. Defaults to `index/` in the app data directory.
    pub index_dir: Option<String>,
    /// Directory of text sources to ingest (chosen by the user).
    pub sources_root: Option<String>,
    pub top_k: usize,
    pub chunk_size: usize,
    pub chunk_overlap: usize,
    pub max_context_chars: usize,
    pub ingest_mode: IngestMode,
    pub validation: ValidationMode,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            ollama_url: DEFAULT_BASE_URL.to_string(),
            embed_model: DEFAULT_EMBED_MODEL.to_string(),
            generation_model: DEFAULT_GENERATION_MODEL.to_string(),
            index_dir: None,
            sources_root: None,
            top_k: DEFAULT_TOP_K,
            chunk_size: DEFAULT_CHUNK_SIZE,
            chunk_overlap: DEFAULT_CHUNK_OVERLAP,
            max_context_chars: DEFAULT_MAX_CONTEXT_CHARS,
            ingest_mode: IngestMode::default(),
            validation: ValidationMode::default(),
        }
    }
}

impl Config {
    pub fn chunk_params(&self) -> ChunkParams {
        ChunkParams::new(self.chunk_size, self.chunk_overlap)
    }

    /// Configured sources directory, if one was set.
    pub fn sources_path(&self) -> Option<PathBuf> {
        self.sources_root
            .as_deref()
            .filter(|s| !s.is_empty())
            .map(PathBuf::from)
    }

    /// Record `path` as the sources directory. Stored canonicalized; must be a directory.
    pub fn set_sources_path(&mut self, path: &Path) -> Result<PathBuf, ConfigError> {
        let path = path.canonicalize().map_err(ConfigError::Canonicalize)?;
        if !path.is_dir() {
            return Err(ConfigError::NotADirectory(path));
        }
        self.sources_root = Some(path.to_string_lossy().into_owned());
        Ok(path)
    }

    /// Configured index directory, or `index/` under the app data directory.
    pub fn index_path(&self) -> Option<PathBuf> {
        match self.index_dir.as_deref().filter(|s| !s.is_empty()) {
            Some(dir) => Some(PathBuf::from(dir)),
            None => app_data::app_data_dir().map(|d| d.join(INDEX_DIRNAME)),
        }
    }
}

/// Load config from the app data directory. Returns default config if missing or invalid.
pub fn load_config() -> Config {
    let Some(data_dir) = app_data::app_data_dir() else {
        return Config::default();
    };
    load_config_from(&data_dir.join(CONFIG_FILENAME))
}

/// Load config from an explicit file. Missing or invalid files give defaults.
pub fn load_config_from(path: &Path) -> Config {
    let Ok(s) = std::fs::read_to_string(path) else {
        return Config::default();
    };
    match toml::from_str(&s) {
        Ok(config) => config,
        Err(e) => {
            tracing::warn!(path = %path.display(), error = %e, "invalid config, using defaults");
            Config::default()
        }
    }
}

/// Save config to the app data directory.
pub fn save_config(config: &Config) -> Result<(), ConfigError> {
    let data_dir = app_data::app_data_dir().ok_or(ConfigError::NoDataDir)?;
    save_config_to(config, &data_dir.join(CONFIG_FILENAME))
}

pub fn save_config_to(config: &Config, path: &Path) -> Result<(), ConfigError> {
    let s = toml::to_string_pretty(config).map_err(ConfigError::Serialize)?;
    std::fs::write(path, s).map_err(ConfigError::Write)
}

/// Set and persist the sources root. Returns the stored (canonical) path.
pub fn set_sources_root(path: &Path) -> Result<PathBuf, ConfigError> {
    let mut config = load_config();
    let path = config.set_sources_path(path)?;
    save_config(&config)?;
    Ok(path)
}

#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("could not determine app data directory")]
    NoDataDir,
    #[error("failed to serialize config: {0}")]
    Serialize(toml::ser::Error),
    #[error("failed to write config: {0}")]
    Write(std::io::Error),
    #[error("failed to resolve path: {0}")]
    Canonicalize(std::io::Error),
    #[error("not a directory: {0}")]
    NotADirectory(PathBuf),
}
