use anyhow::{Context, Result};
use std::fs;
use std::path::{Path, PathBuf};

pub const STATE_DIR: &str = ".batchscribe";
pub const JOBS_FILE: &str = "jobs.db";
pub const VOCABULARY_FILE: &str = "vocabulary.json";

pub fn ensure_dir(path: &Path) -> Result<()> {
    fs::create_dir_all(path).with_context(|| format!("create dir {}", path.display()))?;
    Ok(())
}

/// Hidden per-output-directory state folder.
pub fn state_dir(output_root: &Path) -> PathBuf {
    output_root.join(STATE_DIR)
}

pub fn jobs_db_path(output_root: &Path) -> PathBuf {
    state_dir(output_root).join(JOBS_FILE)
}

pub fn vocabulary_path(output_root: &Path) -> PathBuf {
    state_dir(output_root).join(VOCABULARY_FILE)
}

/// Canonical absolute form of a root directory given on the command line.
pub fn resolve_dir(path: &Path) -> Result<PathBuf> {
    fs::canonicalize(path).with_context(|| format!("resolve {}", path.display()))
}
