//! Fragment store: a directory of size-capped save fragments.
//!
//! ## Write protocol
//!
//! 1. Delete every existing member of the save's fragment set.
//! 2. Split the blob with [`FragmentLayout`].
//! 3. Write parts `N..=2`, then the `firstof` fragment last.
//! 4. Each fragment goes to `<file>.cloudsaver.tmp`, has its mtime set to the
//!    save's mtime, then is renamed into place (atomic on POSIX).
//!
//! A crash anywhere in step 3 leaves parts without a first fragment, which
//! [`FragmentStore::discover`] treats as dangling and deletes.
//!
//! ## Failure policy
//!
//! Deletes during cleanup are best-effort: failures are collected and
//! returned, never raised. A stray file is picked up by the next `discover`.

use std::collections::{BTreeMap, BTreeSet};
use std::fs;
use std::io::ErrorKind;
use std::path::{Path, PathBuf};
use std::time::SystemTime;

use filetime::{set_file_mtime, FileTime};

use cloudsaver_core::naming::{is_temp_file, TEMP_SUFFIX};
use cloudsaver_core::{FragmentName, NameError, SaveName, StampEntry, StampTable};

use crate::codec::{reassemble, FragmentLayout};
use crate::error::{io_err, SyncError};

// ---------------------------------------------------------------------------
// Inspection results
// ---------------------------------------------------------------------------

/// One file belonging to a fragment set.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Member {
    pub fragment: FragmentName,
    pub path: PathBuf,
    pub size: u64,
    pub mtime: SystemTime,
}

/// A fragment set with every index `1..=N` on disk.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CompleteSet {
    pub entry: StampEntry,
    /// Accepted members in index order.
    pub members: Vec<Member>,
}

/// A fragment set that can never be reassembled.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DanglingSet {
    /// Largest count announced by a member; `None` if no member announces one.
    pub expected: Option<u32>,
    pub members: Vec<Member>,
}

/// Read-only classification of everything in a store directory.
#[derive(Debug, Default)]
pub struct Inspection {
    pub complete: BTreeMap<SaveName, CompleteSet>,
    pub dangling: BTreeMap<SaveName, DanglingSet>,
    /// Members of a complete save that are not part of its accepted set
    /// (e.g. a whole file next to a newer `firstof` set).
    pub stale: Vec<Member>,
    pub rejected: Vec<NameError>,
    pub temp_files: Vec<PathBuf>,
    /// Entries whose metadata could not be read; their sets are left alone.
    pub failures: Vec<SyncError>,
}

impl Inspection {
    pub fn stamp_table(&self) -> StampTable {
        self.complete
            .iter()
            .map(|(name, set)| (name.clone(), set.entry))
            .collect()
    }
}

/// Outcome of [`FragmentStore::discover`].
#[derive(Debug, Default)]
pub struct Discovery {
    pub sets: StampTable,
    /// Saves whose dangling fragments were deleted.
    pub pruned: Vec<SaveName>,
    pub rejected: Vec<NameError>,
    pub failures: Vec<SyncError>,
}

/// Outcome of [`FragmentStore::prune`].
#[derive(Debug, Default)]
pub struct PruneReport {
    pub removed: Vec<SaveName>,
    pub failures: Vec<SyncError>,
}

// ---------------------------------------------------------------------------
// FragmentStore
// ---------------------------------------------------------------------------

/// Maps logical saves onto fragment files in one directory.
#[derive(Debug, Clone)]
pub struct FragmentStore {
    dir: PathBuf,
    ext: String,
}

impl FragmentStore {
    pub fn new(dir: impl Into<PathBuf>, ext: impl Into<String>) -> Self {
        Self {
            dir: dir.into(),
            ext: ext.into(),
        }
    }

    pub fn dir(&self) -> &Path {
        &self.dir
    }

    pub fn path_of(&self, fragment: &FragmentName) -> PathBuf {
        self.dir.join(fragment.file_name(&self.ext))
    }

    /// Classify the directory without modifying it.
    pub fn inspect(&self) -> Result<Inspection, SyncError> {
        let mut inspection = Inspection::default();
        let mut groups: BTreeMap<SaveName, Vec<Member>> = BTreeMap::new();
        let mut unreadable: BTreeSet<SaveName> = BTreeSet::new();

        for entry in fs::read_dir(&self.dir).map_err(|e| io_err(&self.dir, e))? {
            let entry = match entry {
                Ok(entry) => entry,
                Err(err) => {
                    inspection.failures.push(io_err(&self.dir, err));
                    continue;
                }
            };
            let path = entry.path();
            let file_name = entry.file_name().to_string_lossy().into_owned();

            if is_temp_file(&file_name) {
                inspection.temp_files.push(path);
                continue;
            }
            let fragment = match FragmentName::parse(&file_name, &self.ext) {
                Ok(Some(fragment)) => fragment,
                Ok(None) => continue,
                Err(err) => {
                    inspection.rejected.push(err);
                    continue;
                }
            };

            let meta = entry.metadata().and_then(|m| {
                let mtime = m.modified()?;
                Ok((m.is_file(), m.len(), mtime))
            });
            let meta = match meta {
                Ok(meta) => meta,
                Err(err) => {
                    unreadable.insert(fragment.save_name().clone());
                    inspection.failures.push(io_err(&path, err));
                    continue;
                }
            };
            let (is_file, size, mtime) = meta;
            if !is_file {
                continue;
            }
            groups
                .entry(fragment.save_name().clone())
                .or_default()
                .push(Member {
                    fragment,
                    path,
                    size,
                    mtime,
                });
        }

        for (name, members) in groups {
            if unreadable.contains(&name) {
                continue;
            }
            classify_group(name, members, &mut inspection);
        }
        inspection.temp_files.sort();
        Ok(inspection)
    }

    /// Rebuild the table of complete sets, deleting dangling sets, stale
    /// members and leftover temp files on the way.
    pub fn discover(&self) -> Result<Discovery, SyncError> {
        let inspection = self.inspect()?;
        let mut discovery = Discovery {
            sets: inspection.stamp_table(),
            rejected: inspection.rejected,
            failures: inspection.failures,
            ..Discovery::default()
        };

        for (name, dangling) in inspection.dangling {
            let present = dangling.members.len() as u32;
            tracing::warn!(
                "{}",
                SyncError::IncompleteFragmentSet {
                    name: name.clone(),
                    expected: dangling.expected.unwrap_or(0),
                    present,
                }
            );
            for member in &dangling.members {
                remove_quietly(&member.path, &mut discovery.failures);
            }
            discovery.pruned.push(name);
        }
        for member in &inspection.stale {
            tracing::info!("removing stale fragment: {}", member.path.display());
            remove_quietly(&member.path, &mut discovery.failures);
        }
        for tmp in &inspection.temp_files {
            tracing::info!("removing leftover temp file: {}", tmp.display());
            remove_quietly(tmp, &mut discovery.failures);
        }
        for rejected in &discovery.rejected {
            tracing::warn!("ignoring file in fragment store: {rejected}");
        }
        Ok(discovery)
    }

    /// Read fragments `1..=count` and reassemble the save.
    pub fn read(&self, name: &SaveName, count: u32) -> Result<Vec<u8>, SyncError> {
        let mut fragments = Vec::with_capacity(count as usize);
        for index in 1..=count {
            let path = self.path_of(&FragmentName::for_index(name, index, count));
            match fs::read(&path) {
                Ok(bytes) => fragments.push(bytes),
                Err(err) if err.kind() == ErrorKind::NotFound => {
                    let present = (1..=count)
                        .filter(|i| self.path_of(&FragmentName::for_index(name, *i, count)).exists())
                        .count() as u32;
                    return Err(SyncError::IncompleteFragmentSet {
                        name: name.clone(),
                        expected: count,
                        present,
                    });
                }
                Err(err) => return Err(io_err(&path, err)),
            }
        }
        Ok(reassemble(&fragments))
    }

    /// Replace the fragment set for `name` with `blob`, stamping every
    /// fragment with `mtime`. Returns the fragment count.
    pub fn write(
        &self,
        name: &SaveName,
        blob: &[u8],
        mtime: SystemTime,
        layout: &FragmentLayout,
    ) -> Result<u32, SyncError> {
        let cleanup = self.remove(name);
        for failure in &cleanup {
            tracing::warn!("could not clear old fragments of '{name}': {failure}");
        }

        let fragments = layout.split(blob);
        let count = fragments.len() as u32;
        let mut written: Vec<PathBuf> = Vec::with_capacity(fragments.len());

        for (offset, bytes) in fragments.iter().enumerate().rev() {
            let fragment = FragmentName::for_index(name, offset as u32 + 1, count);
            let path = self.path_of(&fragment);
            if let Err(err) = write_stamped(&path, bytes, mtime) {
                let mut ignored = Vec::new();
                for done in &written {
                    remove_quietly(done, &mut ignored);
                }
                return Err(err);
            }
            written.push(path);
        }

        tracing::info!("wrote: {name} ({count} fragment(s), {} bytes)", blob.len());
        Ok(count)
    }

    /// Delete every file that belongs to `name`, whatever its role.
    pub fn remove(&self, name: &SaveName) -> Vec<SyncError> {
        let mut failures = Vec::new();
        let entries = match fs::read_dir(&self.dir) {
            Ok(entries) => entries,
            Err(err) => return vec![io_err(&self.dir, err)],
        };
        for entry in entries {
            let entry = match entry {
                Ok(entry) => entry,
                Err(err) => {
                    failures.push(io_err(&self.dir, err));
                    continue;
                }
            };
            let file_name = entry.file_name().to_string_lossy().into_owned();
            if let Ok(Some(fragment)) = FragmentName::parse(&file_name, &self.ext) {
                if fragment.save_name() == name {
                    remove_quietly(&entry.path(), &mut failures);
                }
            }
        }
        failures
    }

    /// Delete every complete set whose save is not in `keep`.
    pub fn prune(&self, keep: &BTreeSet<SaveName>) -> Result<PruneReport, SyncError> {
        let inspection = self.inspect()?;
        let mut report = PruneReport {
            failures: inspection.failures,
            ..PruneReport::default()
        };
        for (name, set) in inspection.complete {
            if keep.contains(&name) {
                continue;
            }
            for member in &set.members {
                remove_quietly(&member.path, &mut report.failures);
            }
            tracing::info!("pruned: {name}");
            report.removed.push(name);
        }
        Ok(report)
    }
}

fn classify_group(name: SaveName, members: Vec<Member>, inspection: &mut Inspection) {
    let Some(count) = members.iter().filter_map(|m| m.fragment.declared_count()).max() else {
        inspection.dangling.insert(
            name,
            DanglingSet {
                expected: None,
                members,
            },
        );
        return;
    };

    let (mut accepted, stale): (Vec<Member>, Vec<Member>) =
        members.into_iter().partition(|m| match m.fragment.declared_count() {
            Some(declared) => declared == count,
            None => m.fragment.index() <= count,
        });

    if accepted.len() as u32 != count {
        accepted.extend(stale);
        inspection.dangling.insert(
            name,
            DanglingSet {
                expected: Some(count),
                members: accepted,
            },
        );
        return;
    }

    accepted.sort_by_key(|m| m.fragment.index());
    let entry = StampEntry {
        fragments: count,
        total_size: accepted.iter().map(|m| m.size).sum(),
        mtime: accepted[0].mtime,
    };
    inspection.stale.extend(stale);
    inspection.complete.insert(
        name,
        CompleteSet {
            entry,
            members: accepted,
        },
    );
}

/// Write `bytes` to `path` via a stamped temp file and an atomic rename.
pub(crate) fn write_stamped(path: &Path, bytes: &[u8], mtime: SystemTime) -> Result<(), SyncError> {
    write_stamped_if(path, bytes, mtime, || true).map(|_| ())
}

/// Like [`write_stamped`], but `still_current` is asked right before the
/// rename; when it says no, the temp file is dropped and `path` is left
/// untouched. Returns whether `path` was replaced.
pub(crate) fn write_stamped_if(
    path: &Path,
    bytes: &[u8],
    mtime: SystemTime,
    still_current: impl FnOnce() -> bool,
) -> Result<bool, SyncError> {
    let tmp = PathBuf::from(format!("{}{TEMP_SUFFIX}", path.display()));
    let staged = fs::write(&tmp, bytes)
        .map_err(|e| io_err(&tmp, e))
        .and_then(|()| {
            set_file_mtime(&tmp, FileTime::from_system_time(mtime)).map_err(|e| io_err(&tmp, e))
        });
    let result = staged.and_then(|()| {
        if !still_current() {
            return Ok(false);
        }
        fs::rename(&tmp, path)
            .map(|()| true)
            .map_err(|e| io_err(path, e))
    });
    if !matches!(result, Ok(true)) {
        let _ = fs::remove_file(&tmp);
    }
    result
}

/// Delete a file, treating "already gone" as success.
pub(crate) fn remove_quietly(path: &Path, failures: &mut Vec<SyncError>) {
    match fs::remove_file(path) {
        Ok(()) => {}
        Err(err) if err.kind() == ErrorKind::NotFound => {}
        Err(err) => failures.push(io_err(path, err)),
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
