//! Domain types shared by the sync engine and the session supervisor.
//!
//! Timestamps on files are `SystemTime`; equality of two fingerprints is exact
//! (nanosecond) equality, which is what the change detector relies on.

use std::collections::BTreeMap;
use std::fmt;
use std::time::SystemTime;

use serde::{Deserialize, Serialize};

// ---------------------------------------------------------------------------
// Newtypes
// ---------------------------------------------------------------------------

/// A logical save identifier: the file stem of a whole save, without the
/// extension and without any fragment suffix.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct SaveName(pub String);

impl SaveName {
    pub fn as_str(&self) -> &str {
        &self.0
    }

    /// File name of the whole (unfragmented) save, e.g. `foo.zip`.
    pub fn file_name(&self, ext: &str) -> String {
        format!("{}.{ext}", self.0)
    }
}

impl fmt::Display for SaveName {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        self.0.fmt(f)
    }
}

impl From<String> for SaveName {
    fn from(s: String) -> Self {
        Self(s)
    }
}

impl From<&str> for SaveName {
    fn from(s: &str) -> Self {
        Self(s.to_owned())
    }
}

// ---------------------------------------------------------------------------
// Fingerprints and the stamp table
// ---------------------------------------------------------------------------

/// Cheap change signal for a whole save file.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Fingerprint {
    pub size: u64,
    pub mtime: SystemTime,
}

/// What was last synced for one save.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct StampEntry {
    /// Number of fragment files in the store (1 = not fragmented).
    pub fragments: u32,
    /// Sum of all fragment sizes, i.e. the size of the whole save.
    pub total_size: u64,
    /// Modification time stamped on every fragment.
    pub mtime: SystemTime,
}

impl StampEntry {
    pub fn fingerprint(&self) -> Fingerprint {
        Fingerprint {
            size: self.total_size,
            mtime: self.mtime,
        }
    }

    pub fn matches(&self, fingerprint: &Fingerprint) -> bool {
        self.fingerprint() == *fingerprint
    }
}

/// Process-lifetime record of the fragment store contents, keyed by save.
pub type StampTable = BTreeMap<SaveName, StampEntry>;

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
