//! Size-based rotation of the session log file.
//!
//! Runs once per session, before the file layer is attached:
//!   cloudsaver.log → cloudsaver.log.1 → … → cloudsaver.log.5

use std::fs;
use std::io;
use std::path::{Path, PathBuf};

/// Rotate once the log has grown past this size (10 MiB).
pub const MAX_LOG_BYTES: u64 = 10 * 1024 * 1024;

/// Rotated copies kept next to the live log.
pub const MAX_ROTATED_FILES: usize = 5;

/// Shift `log_path` into `<name>.1` if it is at least `max_bytes` long.
///
/// The oldest copy beyond `max_files` is dropped. A missing log is not an
/// error. Returns whether a rotation happened.
pub fn rotate_if_needed(log_path: &Path, max_bytes: u64, max_files: usize) -> io::Result<bool> {
    let size = match fs::metadata(log_path) {
        Ok(meta) => meta.len(),
        Err(err) if err.kind() == io::ErrorKind::NotFound => return Ok(false),
        Err(err) => return Err(err),
    };
    if size < max_bytes || max_files == 0 {
        return Ok(false);
    }

    let oldest = numbered_path(log_path, max_files);
    if oldest.exists() {
        fs::remove_file(&oldest)?;
    }
    for n in (1..max_files).rev() {
        let src = numbered_path(log_path, n);
        if src.exists() {
            fs::rename(&src, numbered_path(log_path, n + 1))?;
        }
    }
    fs::rename(log_path, numbered_path(log_path, 1))?;
    Ok(true)
}

/// Rotate the session log with the default limits, reporting on stderr since
/// no subscriber is installed yet.
pub fn rotate_session_log(log_path: &Path) {
    if let Err(err) = rotate_if_needed(log_path, MAX_LOG_BYTES, MAX_ROTATED_FILES) {
        eprintln!(
            "cloudsaver: log rotation failed for {}: {err}",
            log_path.display()
        );
    }
}

fn numbered_path(base: &Path, n: usize) -> PathBuf {
    let mut name = base
        .file_name()
        .map(|s| s.to_os_string())
        .unwrap_or_else(|| "cloudsaver.log".into());
    name.push(format!(".{n}"));
    base.with_file_name(name)
}
