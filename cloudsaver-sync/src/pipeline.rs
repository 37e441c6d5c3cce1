//! Blocking sync pipeline shared by the session runtime and the tests.
//!
//! ## Incremental cycle
//!
//! 1. Scan the save directory.
//! 2. Promote numbered autosaves to timestamped names.
//! 3. Apply autosave retention: delete expired autosaves, and keep only the
//!    sync set of autosaves as candidates for the store.
//! 4. Diff candidates against the stamp table.
//! 5. Removals: delete the fragment set, drop the table entry.
//! 6. Additions and changes: re-fragment, update the table entry.
//! 7. Prune any other complete set from the store, such as one left by an
//!    earlier failed removal.
//!
//! Removals always run before additions. Per-file failures are collected in
//! the report; only an unreadable save directory fails the cycle.

use std::collections::{BTreeMap, BTreeSet};
use std::fs;
use std::path::{Path, PathBuf};

use chrono::{DateTime, Local, NaiveDate};

use cloudsaver_core::naming::stamped_autosave_name;
use cloudsaver_core::{AutosaveKind, Fingerprint, SaveName, Settings, StampEntry, StampTable};

use crate::codec::FragmentLayout;
use crate::detector::{self, Scan};
use crate::error::{io_err, SyncError};
use crate::retention::{autosave_records, RetentionPolicy};
use crate::store::{remove_quietly, write_stamped_if, FragmentStore};

// ---------------------------------------------------------------------------
// Context and state
// ---------------------------------------------------------------------------

/// Everything a cycle needs that does not change during a session.
#[derive(Debug, Clone)]
pub struct SyncContext {
    /// Directory the game reads and writes whole saves in.
    pub saves_dir: PathBuf,
    pub store: FragmentStore,
    pub layout: FragmentLayout,
    pub retention: RetentionPolicy,
    pub ext: String,
    pub autosave_prefix: String,
}

impl SyncContext {
    pub fn new(
        settings: &Settings,
        saves_dir: impl Into<PathBuf>,
        store_dir: impl Into<PathBuf>,
    ) -> Result<Self, SyncError> {
        Ok(Self {
            saves_dir: saves_dir.into(),
            store: FragmentStore::new(store_dir, settings.save_extension.clone()),
            layout: FragmentLayout::from_settings(settings)?,
            retention: RetentionPolicy::from_settings(settings),
            ext: settings.save_extension.clone(),
            autosave_prefix: settings.autosave_prefix.clone(),
        })
    }

    fn save_path(&self, name: &SaveName) -> PathBuf {
        self.saves_dir.join(name.file_name(&self.ext))
    }

    fn is_autosave(&self, name: &SaveName) -> bool {
        AutosaveKind::classify(name, &self.autosave_prefix).is_some()
    }
}

/// Per-session state owned by the sync loop.
#[derive(Debug, Default)]
pub struct SessionState {
    /// What the fragment store holds, as of the last cycle.
    pub table: StampTable,
    pub cycles: u64,
}

// ---------------------------------------------------------------------------
// Reports
// ---------------------------------------------------------------------------

/// Outcome of one incremental cycle.
#[derive(Debug, Default)]
pub struct CycleReport {
    /// `(old, new)` names of promoted autosaves.
    pub promoted: Vec<(SaveName, SaveName)>,
    /// Autosaves deleted from the save directory by retention.
    pub expired: Vec<SaveName>,
    /// Saves whose fragment sets were deleted.
    pub removed: Vec<SaveName>,
    /// Saves re-fragmented, with their new fragment count.
    pub written: Vec<(SaveName, u32)>,
    /// Saves that changed while being read; retried next cycle.
    pub skipped: Vec<SaveName>,
    pub failures: Vec<SyncError>,
}

impl CycleReport {
    pub fn is_quiet(&self) -> bool {
        self.promoted.is_empty()
            && self.expired.is_empty()
            && self.removed.is_empty()
            && self.written.is_empty()
            && self.skipped.is_empty()
            && self.failures.is_empty()
    }
}

/// Outcome of the initial resynchronization.
#[derive(Debug, Default)]
pub struct ResyncReport {
    /// Complete fragment sets found in the store.
    pub discovered: usize,
    /// Saves whose dangling fragments were deleted.
    pub pruned: Vec<SaveName>,
    /// Saves reassembled into the save directory.
    pub restored: Vec<SaveName>,
    pub failures: Vec<SyncError>,
    pub cycle: CycleReport,
}

// ---------------------------------------------------------------------------
// Initial resynchronization
// ---------------------------------------------------------------------------

/// Rebuild the stamp table from the store, restore saves the store has a
/// newer copy of, then run one cycle to upload anything newer locally.
pub fn resync(ctx: &SyncContext, state: &mut SessionState) -> Result<ResyncReport, SyncError> {
    let discovery = ctx.store.discover()?;
    state.table = discovery.sets;

    let mut report = ResyncReport {
        discovered: state.table.len(),
        pruned: discovery.pruned,
        failures: discovery.failures,
        ..ResyncReport::default()
    };

    let scan = detector::scan(&ctx.saves_dir, &ctx.ext)?;
    report.failures.extend(scan.failures);

    for (name, entry) in &state.table {
        let scanned = scan.saves.get(name).copied();
        if !needs_restore(entry, scanned.as_ref()) {
            continue;
        }
        match restore(ctx, name, entry, scanned) {
            Ok(true) => {
                tracing::info!("restored: {name} ({} bytes)", entry.total_size);
                report.restored.push(name.clone());
            }
            Ok(false) => tracing::info!("not restoring {name}: the save changed since the scan"),
            Err(err) => report.failures.push(err),
        }
    }

    report.cycle = run_cycle(ctx, state)?;
    Ok(report)
}

fn needs_restore(stored: &StampEntry, local: Option<&Fingerprint>) -> bool {
    match local {
        None => true,
        Some(local) => !stored.matches(local) && stored.mtime > local.mtime,
    }
}

/// Reassemble `name` over its local copy, unless the local copy no longer
/// has the `scanned` fingerprint (`None`: absent) when the rename is due.
fn restore(
    ctx: &SyncContext,
    name: &SaveName,
    entry: &StampEntry,
    scanned: Option<Fingerprint>,
) -> Result<bool, SyncError> {
    let blob = ctx.store.read(name, entry.fragments)?;
    let path = ctx.save_path(name);
    write_stamped_if(&path, &blob, entry.mtime, || {
        matches!(current_fingerprint(&path), Ok(now) if now == scanned)
    })
}

fn current_fingerprint(path: &Path) -> std::io::Result<Option<Fingerprint>> {
    match fs::metadata(path) {
        Ok(meta) => Ok(Some(Fingerprint {
            size: meta.len(),
            mtime: meta.modified()?,
        })),
        Err(err) if err.kind() == std::io::ErrorKind::NotFound => Ok(None),
        Err(err) => Err(err),
    }
}

// ---------------------------------------------------------------------------
// Incremental cycle
// ---------------------------------------------------------------------------

/// Run one incremental cycle against today's local date.
pub fn run_cycle(ctx: &SyncContext, state: &mut SessionState) -> Result<CycleReport, SyncError> {
    run_cycle_on(ctx, state, Local::now().date_naive())
}

/// Run one incremental cycle; `today` decides which autosaves are mirrored.
pub fn run_cycle_on(
    ctx: &SyncContext,
    state: &mut SessionState,
    today: NaiveDate,
) -> Result<CycleReport, SyncError> {
    let mut report = CycleReport::default();
    state.cycles += 1;

    let mut scan = detector::scan(&ctx.saves_dir, &ctx.ext)?;
    report.failures.append(&mut scan.failures);
    for rejected in &scan.rejected {
        tracing::warn!("ignoring file in save directory: {rejected}");
    }
    for misplaced in &scan.misplaced {
        tracing::warn!("fragment file in save directory: {}", misplaced.display());
    }

    promote_autosaves(ctx, &mut scan, &mut report);

    // Retention.
    let records = autosave_records(&scan.saves, &ctx.autosave_prefix);
    let plan = ctx.retention.plan(&records, today);
    for name in &plan.delete {
        remove_quietly(&ctx.save_path(name), &mut report.failures);
        scan.saves.remove(name);
        tracing::info!("expired autosave: {name}");
        report.expired.push(name.clone());
    }
    let candidates: BTreeMap<SaveName, Fingerprint> = scan
        .saves
        .into_iter()
        .filter(|(name, _)| !ctx.is_autosave(name) || plan.sync.contains(name))
        .collect();

    let changes = detector::diff(&state.table, &candidates);

    for name in &changes.removed {
        report.failures.extend(ctx.store.remove(name));
        state.table.remove(name);
        tracing::info!("removed: {name}");
        report.removed.push(name.clone());
    }

    for name in changes.upserts() {
        let fingerprint = candidates[&name];
        let path = ctx.save_path(&name);
        let blob = match fs::read(&path) {
            Ok(blob) => blob,
            Err(err) => {
                report.failures.push(io_err(&path, err));
                continue;
            }
        };
        if blob.len() as u64 != fingerprint.size || !mtime_unchanged(&path, &fingerprint) {
            tracing::debug!("save changed while reading, retrying next cycle: {name}");
            report.skipped.push(name);
            continue;
        }
        match ctx
            .store
            .write(&name, &blob, fingerprint.mtime, &ctx.layout)
        {
            Ok(fragments) => {
                state.table.insert(
                    name.clone(),
                    StampEntry {
                        fragments,
                        total_size: fingerprint.size,
                        mtime: fingerprint.mtime,
                    },
                );
                report.written.push((name, fragments));
            }
            Err(err) => report.failures.push(err),
        }
    }

    let keep: BTreeSet<SaveName> = candidates.into_keys().collect();
    match ctx.store.prune(&keep) {
        Ok(mut pruned) => {
            report.failures.append(&mut pruned.failures);
            for name in pruned.removed {
                state.table.remove(&name);
                report.removed.push(name);
            }
        }
        Err(err) => report.failures.push(err),
    }

    Ok(report)
}

fn mtime_unchanged(path: &Path, fingerprint: &Fingerprint) -> bool {
    fs::metadata(path)
        .and_then(|meta| meta.modified())
        .map(|mtime| mtime == fingerprint.mtime)
        .unwrap_or(false)
}

/// Rename `<prefix><digits>` autosaves to their timestamped form.
fn promote_autosaves(ctx: &SyncContext, scan: &mut Scan, report: &mut CycleReport) {
    let numbered: Vec<(SaveName, Fingerprint)> = scan
        .saves
        .iter()
        .filter(|(name, _)| {
            matches!(
                AutosaveKind::classify(name, &ctx.autosave_prefix),
                Some(AutosaveKind::Numbered(_))
            )
        })
        .map(|(name, fingerprint)| (name.clone(), *fingerprint))
        .collect();

    for (name, fingerprint) in numbered {
        let created = DateTime::<Local>::from(fingerprint.mtime).fixed_offset();
        let promoted = stamped_autosave_name(&ctx.autosave_prefix, created);
        let from = ctx.save_path(&name);
        let to = ctx.save_path(&promoted);
        if to.exists() {
            tracing::warn!(
                "cannot promote {}: {} already exists",
                from.display(),
                to.display()
            );
            continue;
        }
        if let Err(err) = fs::rename(&from, &to) {
            report.failures.push(io_err(&from, err));
            continue;
        }
        tracing::info!("promoted autosave: {name} -> {promoted}");
        scan.saves.remove(&name);
        scan.saves.insert(promoted.clone(), fingerprint);
        report.promoted.push((name, promoted));
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
