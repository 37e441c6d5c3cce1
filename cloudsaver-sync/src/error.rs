//! Error types for cloudsaver-sync.

use std::path::PathBuf;

use thiserror::Error;

use cloudsaver_core::{NameError, SaveName};

/// All errors that can arise from fragment and sync operations.
#[derive(Debug, Error)]
pub enum SyncError {
    /// A single read/write/rename/delete failed, with annotated path for context.
    #[error("I/O error at {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    /// A file name that breaks the fragment naming grammar.
    #[error(transparent)]
    Name(#[from] NameError),

    /// Not every member of a fragment set is on disk.
    #[error("fragment set '{name}' is incomplete: {present} of {expected} fragment(s) present")]
    IncompleteFragmentSet {
        name: SaveName,
        expected: u32,
        present: u32,
    },

    /// Fragment cap and quantum do not form a usable layout.
    #[error("invalid fragment layout: max {max_fragment_bytes} bytes, quantum {quantum_bytes} bytes")]
    InvalidLayout {
        max_fragment_bytes: u64,
        quantum_bytes: u64,
    },
}

/// Convenience constructor for [`SyncError::Io`].
pub(crate) fn io_err(path: impl Into<PathBuf>, source: std::io::Error) -> SyncError {
    SyncError::Io {
        path: path.into(),
        source,
    }
}

/// Log every failure collected by a best-effort operation.
pub fn log_failures(context: &str, failures: &[SyncError]) {
    for failure in failures {
        tracing::warn!("{context}: {failure}");
    }
}
