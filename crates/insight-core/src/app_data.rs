//! Where insight stores its own data (config, persisted index).
//!
//! Source files stay in the folder the user picks. We only store app state here.

use std::path::PathBuf;

/// Returns the directory where insight stores config, the index and other app data.
/// On macOS: `~/Library/Application Support/Insight/`.
/// Creates the directory if it doesn't exist; returns `None` if we can't determine the path.
pub fn app_data_dir() -> Option<PathBuf> {
    let dir = directories::ProjectDirs::from("app", "Insight", "Insight")?.data_local_dir().to_path_buf();
    std::fs::create_dir_all(&dir).ok()?;
    Some(dir)
}
