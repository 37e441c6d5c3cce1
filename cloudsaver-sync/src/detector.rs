//! Change detection for the game-facing save directory.
//!
//! A save is identified by its `(size, mtime)` fingerprint. Comparing the
//! fingerprint with the stamp table is the only gate between a poll tick and
//! a full re-split of the save, so unchanged saves are never read.

use std::collections::BTreeMap;
use std::fs;
use std::path::{Path, PathBuf};

use cloudsaver_core::{Fingerprint, FragmentName, NameError, SaveName, StampTable};

use crate::error::{io_err, SyncError};

/// Whole saves found in a directory.
#[derive(Debug, Default)]
pub struct Scan {
    pub saves: BTreeMap<SaveName, Fingerprint>,
    /// Names that break the grammar.
    pub rejected: Vec<NameError>,
    /// Fragment-named files, which do not belong in a save directory.
    pub misplaced: Vec<PathBuf>,
    pub failures: Vec<SyncError>,
}

/// Names to add, re-fragment, or drop, each sorted.
#[derive(Debug, Default, Clone, PartialEq, Eq)]
pub struct ChangeSet {
    pub added: Vec<SaveName>,
    pub changed: Vec<SaveName>,
    pub removed: Vec<SaveName>,
}

impl ChangeSet {
    pub fn is_empty(&self) -> bool {
        self.added.is_empty() && self.changed.is_empty() && self.removed.is_empty()
    }

    /// Added and changed names, in name order.
    pub fn upserts(&self) -> Vec<SaveName> {
        let mut names: Vec<SaveName> = self.added.iter().chain(&self.changed).cloned().collect();
        names.sort();
        names
    }
}

/// Fingerprint every whole save (`<name>.<ext>`) in `dir`.
pub fn scan(dir: &Path, ext: &str) -> Result<Scan, SyncError> {
    let mut result = Scan::default();
    for entry in fs::read_dir(dir).map_err(|e| io_err(dir, e))? {
        let entry = match entry {
            Ok(entry) => entry,
            Err(err) => {
                result.failures.push(io_err(dir, err));
                continue;
            }
        };
        let file_name = entry.file_name().to_string_lossy().into_owned();
        let name = match FragmentName::parse(&file_name, ext) {
            Ok(Some(FragmentName::Whole(name))) => name,
            Ok(Some(_)) => {
                result.misplaced.push(entry.path());
                continue;
            }
            Ok(None) => continue,
            Err(err) => {
                result.rejected.push(err);
                continue;
            }
        };

        let meta = match entry.metadata() {
            Ok(meta) if meta.is_file() => meta,
            Ok(_) => continue,
            Err(err) => {
                result.failures.push(io_err(entry.path(), err));
                continue;
            }
        };
        match meta.modified() {
            Ok(mtime) => {
                result.saves.insert(
                    name,
                    Fingerprint {
                        size: meta.len(),
                        mtime,
                    },
                );
            }
            Err(err) => result.failures.push(io_err(entry.path(), err)),
        }
    }
    Ok(result)
}

/// Compare what was last synced with what is on disk now.
pub fn diff(table: &StampTable, current: &BTreeMap<SaveName, Fingerprint>) -> ChangeSet {
    let mut changes = ChangeSet::default();
    for (name, fingerprint) in current {
        match table.get(name) {
            None => changes.added.push(name.clone()),
            Some(entry) if !entry.matches(fingerprint) => changes.changed.push(name.clone()),
            Some(_) => {}
        }
    }
    changes.removed = table
        .keys()
        .filter(|name| !current.contains_key(*name))
        .cloned()
        .collect();
    changes
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use super::*;
    use cloudsaver_core::StampEntry;
    use std::time::{Duration, SystemTime};
    use tempfile::TempDir;

    fn at(secs: u64) -> SystemTime {
        SystemTime::UNIX_EPOCH + Duration::from_secs(secs)
    }

    #[test]
    fn scan_fingerprints_whole_saves_only() {
        let dir = TempDir::new().unwrap();
        fs::write(dir.path().join("foo.zip"), vec![0u8; 42]).unwrap();
        fs::write(dir.path().join("bar.firstof.2.zip"), b"x").unwrap();
        fs::write(dir.path().join("bad.a.zip"), b"x").unwrap();
        fs::write(dir.path().join("notes.txt"), b"x").unwrap();
        fs::create_dir(dir.path().join("folder.zip")).unwrap();

        let scan = scan(dir.path(), "zip").unwrap();
        assert_eq!(scan.saves.len(), 1);
        assert_eq!(scan.saves[&SaveName::from("foo")].size, 42);
        assert_eq!(scan.misplaced, vec![dir.path().join("bar.firstof.2.zip")]);
        assert_eq!(scan.rejected.len(), 1);
    }

    #[test]
    fn diff_classifies_added_changed_removed() {
        let mut table = StampTable::new();
        for (name, size) in [("same", 10), ("grown", 10), ("gone", 10)] {
            table.insert(
                SaveName::from(name),
                StampEntry {
                    fragments: 1,
                    total_size: size,
                    mtime: at(100),
                },
            );
        }
        let mut current = BTreeMap::new();
        current.insert(SaveName::from("same"), Fingerprint { size: 10, mtime: at(100) });
        current.insert(SaveName::from("grown"), Fingerprint { size: 20, mtime: at(100) });
        current.insert(SaveName::from("new"), Fingerprint { size: 5, mtime: at(200) });

        let changes = diff(&table, &current);
        assert_eq!(changes.added, vec![SaveName::from("new")]);
        assert_eq!(changes.changed, vec![SaveName::from("grown")]);
        assert_eq!(changes.removed, vec![SaveName::from("gone")]);
        assert_eq!(
            changes.upserts(),
            vec![SaveName::from("grown"), SaveName::from("new")]
        );
    }

    #[test]
    fn touched_mtime_alone_counts_as_change() {
        let mut table = StampTable::new();
        table.insert(
            SaveName::from("foo"),
            StampEntry {
                fragments: 1,
                total_size: 10,
                mtime: at(100),
            },
        );
        let mut current = BTreeMap::new();
        current.insert(SaveName::from("foo"), Fingerprint { size: 10, mtime: at(101) });
        assert_eq!(diff(&table, &current).changed, vec![SaveName::from("foo")]);
    }

    #[test]
    fn identical_state_yields_empty_change_set() {
        let mut table = StampTable::new();
        table.insert(
            SaveName::from("foo"),
            StampEntry {
                fragments: 2,
                total_size: 10,
                mtime: at(100),
            },
        );
        let mut current = BTreeMap::new();
        current.insert(SaveName::from("foo"), Fingerprint { size: 10, mtime: at(100) });
        assert!(diff(&table, &current).is_empty());
    }
}
