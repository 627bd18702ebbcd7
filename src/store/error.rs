//! Job store error types.

use std::path::PathBuf;
use thiserror::Error;

/// Errors from job store operations.
#[derive(Error, Debug)]
pub enum StoreError {
    /// SQLite error from rusqlite.
    #[error("sqlite error: {0}")]
    Sqlite(#[from] rusqlite::Error),

    /// IO error when creating the state directory.
    #[error("io error for path '{path}': {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    /// A status column held a value outside the known set.
    #[error("invalid job status '{0}'")]
    InvalidStatus(String),
}
