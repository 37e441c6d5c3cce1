//! Settings file and directory layout.
//!
//! # Storage layout
//!
//! ```text
//! <game>/
//!   saves/                    native: the directory the game and the sync client use
//!   cloudsaver/               install root
//!     cloudsaver.yaml         optional settings (every key has a default)
//!     saves/                  staging: full-size working copies between sessions
//!     fragments/              store alias: only exists while a session runs
//!     redirect.json           redirect journal: only exists while a session runs
//!     logs/cloudsaver.log
//! ```
//!
//! Every directory role is relative to the install root and can be moved in
//! `cloudsaver.yaml`.

use std::path::{Component, Path, PathBuf};
use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::error::ConfigError;

pub const SETTINGS_FILE: &str = "cloudsaver.yaml";
pub const JOURNAL_FILE: &str = "redirect.json";

const MIB: u64 = 1024 * 1024;

/// Tunables for fragmenting, polling and autosave retention.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct Settings {
    /// Hard per-file cap enforced by the sync client.
    pub max_fragment_bytes: u64,
    /// Fragment sizes are multiples of this; must divide `max_fragment_bytes`.
    pub quantum_bytes: u64,
    /// How often the child process is polled for liveness.
    pub poll_interval_secs: f64,
    /// How often an incremental sync cycle runs.
    pub scan_interval_secs: f64,
    pub keep_last: usize,
    pub keep_hourly: usize,
    pub keep_daily: usize,
    /// Daily autosaves (excluding today) that are mirrored to the store.
    pub sync_daily: usize,
    pub save_extension: String,
    pub autosave_prefix: String,
    pub terminate_grace_secs: f64,
    pub kill_grace_secs: f64,
    pub native_dir: PathBuf,
    pub store_dir: PathBuf,
    pub staging_dir: PathBuf,
    pub log_file: PathBuf,
}

impl Default for Settings {
    fn default() -> Self {
        Self {
            max_fragment_bytes: 100 * MIB,
            quantum_bytes: MIB,
            poll_interval_secs: 1.0,
            scan_interval_secs: 10.0,
            keep_last: 5,
            keep_hourly: 12,
            keep_daily: 14,
            sync_daily: 3,
            save_extension: "zip".to_string(),
            autosave_prefix: "_autosave".to_string(),
            terminate_grace_secs: 10.0,
            kill_grace_secs: 5.0,
            native_dir: PathBuf::from("../saves"),
            store_dir: PathBuf::from("fragments"),
            staging_dir: PathBuf::from("saves"),
            log_file: PathBuf::from("logs/cloudsaver.log"),
        }
    }
}

impl Settings {
    /// Load `<root>/cloudsaver.yaml`, falling back to defaults if absent.
    ///
    /// The result is validated; an invalid file is an error, not a fallback.
    pub fn load_at(root: &Path) -> Result<Self, ConfigError> {
        let path = root.join(SETTINGS_FILE);
        if !path.exists() {
            let settings = Settings::default();
            settings.validate()?;
            return Ok(settings);
        }
        let contents = std::fs::read_to_string(&path).map_err(|source| ConfigError::Io {
            path: path.clone(),
            source,
        })?;
        let settings: Settings = serde_yaml::from_str(&contents)
            .map_err(|source| ConfigError::Parse { path, source })?;
        settings.validate()?;
        Ok(settings)
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        let invalid = |msg: String| Err(ConfigError::Invalid(msg));

        if self.quantum_bytes == 0 {
            return invalid("quantum_bytes must be greater than zero".into());
        }
        if self.max_fragment_bytes < self.quantum_bytes {
            return invalid(format!(
                "max_fragment_bytes ({}) must be at least quantum_bytes ({})",
                self.max_fragment_bytes, self.quantum_bytes
            ));
        }
        if self.max_fragment_bytes % self.quantum_bytes != 0 {
            return invalid(format!(
                "quantum_bytes ({}) must evenly divide max_fragment_bytes ({})",
                self.quantum_bytes, self.max_fragment_bytes
            ));
        }
        if self.keep_last == 0 {
            return invalid("keep_last must be at least 1".into());
        }
        for (key, secs) in [
            ("poll_interval_secs", self.poll_interval_secs),
            ("scan_interval_secs", self.scan_interval_secs),
        ] {
            if !(secs.is_finite() && secs > 0.0) {
                return invalid(format!("{key} must be a positive number of seconds"));
            }
        }
        for (key, secs) in [
            ("terminate_grace_secs", self.terminate_grace_secs),
            ("kill_grace_secs", self.kill_grace_secs),
        ] {
            if !(secs.is_finite() && secs >= 0.0) {
                return invalid(format!("{key} must not be negative"));
            }
        }
        for (key, value) in [
            ("save_extension", &self.save_extension),
            ("autosave_prefix", &self.autosave_prefix),
        ] {
            if value.is_empty() || value.contains('.') {
                return invalid(format!("{key} must be non-empty and must not contain '.'"));
            }
        }

        let roles = [
            normalize(&self.native_dir),
            normalize(&self.store_dir),
            normalize(&self.staging_dir),
        ];
        if roles[0] == roles[1] || roles[0] == roles[2] || roles[1] == roles[2] {
            return invalid("native_dir, store_dir and staging_dir must be distinct".into());
        }
        Ok(())
    }

    pub fn poll_interval(&self) -> Duration {
        Duration::from_secs_f64(self.poll_interval_secs)
    }

    pub fn scan_interval(&self) -> Duration {
        Duration::from_secs_f64(self.scan_interval_secs)
    }

    pub fn terminate_grace(&self) -> Duration {
        Duration::from_secs_f64(self.terminate_grace_secs)
    }

    pub fn kill_grace(&self) -> Duration {
        Duration::from_secs_f64(self.kill_grace_secs)
    }

    pub fn layout(&self, root: &Path) -> Layout {
        Layout {
            root: root.to_path_buf(),
            native: normalize(&root.join(&self.native_dir)),
            store: normalize(&root.join(&self.store_dir)),
            staging: normalize(&root.join(&self.staging_dir)),
            journal: root.join(JOURNAL_FILE),
            log_file: root.join(&self.log_file),
        }
    }
}

/// Absolute directory roles for one install root.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Layout {
    pub root: PathBuf,
    /// Game-facing directory; holds fragments while no session runs.
    pub native: PathBuf,
    /// Where the fragment store lives during a session.
    pub store: PathBuf,
    /// Where the full-size working copies live between sessions.
    pub staging: PathBuf,
    pub journal: PathBuf,
    pub log_file: PathBuf,
}

/// Lexically resolve `.` and `..` so `root/../saves` compares sanely.
fn normalize(path: &Path) -> PathBuf {
    let mut out = PathBuf::new();
    for component in path.components() {
        match component {
            Component::CurDir => {}
            Component::ParentDir => {
                if !out.pop() {
                    out.push("..");
                }
            }
            other => out.push(other.as_os_str()),
        }
    }
    out
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
