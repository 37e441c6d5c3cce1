use std::path::{Path, PathBuf};

use cloudsaver_core::Layout;

use crate::error::{io_err, SessionError};

/// Sibling used to stage the journal before it replaces the live file.
pub fn journal_tmp_path(layout: &Layout) -> PathBuf {
    with_suffix(&layout.journal, ".tmp")
}

pub fn logs_dir(layout: &Layout) -> PathBuf {
    layout
        .log_file
        .parent()
        .map(Path::to_path_buf)
        .unwrap_or_else(|| layout.root.clone())
}

/// Create `dir` (and parents) if missing.
pub fn ensure_dir(dir: &Path) -> Result<(), SessionError> {
    std::fs::create_dir_all(dir).map_err(|e| io_err(dir, e))
}

fn with_suffix(path: &Path, suffix: &str) -> PathBuf {
    let mut name = path.file_name().map(|n| n.to_os_string()).unwrap_or_default();
    name.push(suffix);
    path.with_file_name(name)
}
