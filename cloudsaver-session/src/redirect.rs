//! Directory role swap around a game session.
//!
//! Between sessions the game-facing directory (`native`) holds the fragment
//! store, which is what the sync client mirrors. During a session:
//!
//! ```text
//!   native  -> store    (fragments move aside)
//!   staging -> native   (full-size working copies take their place)
//! ```
//!
//! Exit reverses both renames. Every phase is recorded in a journal file
//! written before the first rename and removed only after both restoring
//! renames succeed, so a crash leaves an explicit recovery marker behind.

use std::fs;
use std::path::{Path, PathBuf};

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use cloudsaver_core::Layout;

use crate::error::{io_err, SessionError};
use crate::paths::{ensure_dir, journal_tmp_path};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum RedirectPhase {
    Entering,
    Active,
    Exiting,
}

/// Contents of `redirect.json`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RedirectJournal {
    pub phase: RedirectPhase,
    pub started_at: DateTime<Utc>,
    pub native: PathBuf,
    pub store: PathBuf,
    pub staging: PathBuf,
}

impl RedirectJournal {
    fn new(layout: &Layout) -> Self {
        Self {
            phase: RedirectPhase::Entering,
            started_at: Utc::now(),
            native: layout.native.clone(),
            store: layout.store.clone(),
            staging: layout.staging.clone(),
        }
    }
}

/// Read the journal of an unfinished session, if any.
pub fn read_journal(layout: &Layout) -> Result<Option<RedirectJournal>, SessionError> {
    match fs::read(&layout.journal) {
        Ok(bytes) => Ok(Some(serde_json::from_slice(&bytes)?)),
        Err(err) if err.kind() == std::io::ErrorKind::NotFound => Ok(None),
        Err(err) => Err(io_err(&layout.journal, err)),
    }
}

fn write_journal(layout: &Layout, journal: &RedirectJournal) -> Result<(), SessionError> {
    let tmp = journal_tmp_path(layout);
    let bytes = serde_json::to_vec_pretty(journal)?;
    fs::write(&tmp, bytes).map_err(|e| io_err(&tmp, e))?;
    fs::rename(&tmp, &layout.journal).map_err(|e| io_err(&layout.journal, e))
}

fn remove_journal(layout: &Layout) -> Result<(), SessionError> {
    match fs::remove_file(&layout.journal) {
        Ok(()) => Ok(()),
        Err(err) if err.kind() == std::io::ErrorKind::NotFound => Ok(()),
        Err(err) => Err(io_err(&layout.journal, err)),
    }
}

/// Operator-facing steps for recovering from an unfinished session.
pub fn recovery_instructions(layout: &Layout) -> String {
    format!(
        "To recover:\n\
         \x20 1. Inspect {store} (fragment store) and {native} (game saves).\n\
         \x20 2. If {store} exists, move any full-size saves from {native} into {staging},\n\
         \x20    then delete {native} and rename {store} to {native}.\n\
         \x20 3. Delete {journal}.\n\
         \x20 4. Run cloudsaver again.",
        store = layout.store.display(),
        native = layout.native.display(),
        staging = layout.staging.display(),
        journal = layout.journal.display(),
    )
}

/// Refuse to start when an earlier session left its journal or store alias.
pub fn check_preconditions(layout: &Layout) -> Result<(), SessionError> {
    if layout.journal.exists() || layout.store.exists() {
        return Err(SessionError::PreexistingStagingConflict {
            store: layout.store.clone(),
            journal: layout.journal.clone(),
            instructions: recovery_instructions(layout),
        });
    }
    Ok(())
}

/// Swap the directory roles for a session.
///
/// On success the returned guard restores the roles when dropped, unless
/// [`ActiveRedirect::exit`] already did.
pub fn enter(layout: &Layout) -> Result<ActiveRedirect, SessionError> {
    check_preconditions(layout)?;
    ensure_dir(&layout.native)?;
    ensure_dir(&layout.staging)?;
    if let Some(parent) = layout.store.parent() {
        ensure_dir(parent)?;
    }

    let mut journal = RedirectJournal::new(layout);
    write_journal(layout, &journal)?;

    if let Err(err) = fs::rename(&layout.native, &layout.store) {
        let _ = remove_journal(layout);
        return Err(io_err(&layout.native, err));
    }

    if let Err(err) = fs::rename(&layout.staging, &layout.native) {
        let failure = io_err(&layout.staging, err);
        match fs::rename(&layout.store, &layout.native) {
            Ok(()) => {
                let _ = remove_journal(layout);
            }
            Err(rollback) => tracing::error!(
                store = %layout.store.display(),
                error = %rollback,
                "rollback of directory swap failed; journal kept for recovery"
            ),
        }
        return Err(failure);
    }

    journal.phase = RedirectPhase::Active;
    write_journal(layout, &journal)?;
    tracing::info!(
        native = %layout.native.display(),
        store = %layout.store.display(),
        "directories redirected"
    );

    Ok(ActiveRedirect {
        layout: layout.clone(),
        restored: false,
    })
}

/// Put the directories back in their original roles.
///
/// Each rename is attempted independently and skipped when it has already
/// happened, so this can be re-run after a partial failure.
pub fn restore_roles(layout: &Layout) -> Result<(), SessionError> {
    if let Some(mut journal) = read_journal(layout).ok().flatten() {
        journal.phase = RedirectPhase::Exiting;
        if let Err(err) = write_journal(layout, &journal) {
            tracing::warn!(error = %err, "could not mark journal as exiting");
        }
    }

    let mut failures = Vec::new();
    if layout.store.exists() {
        if layout.native.exists() && !layout.staging.exists() {
            if let Err(err) = fs::rename(&layout.native, &layout.staging) {
                failures.push(io_err(&layout.native, err).to_string());
            }
        }
        if !layout.native.exists() {
            if let Err(err) = fs::rename(&layout.store, &layout.native) {
                failures.push(io_err(&layout.store, err).to_string());
            }
        } else {
            failures.push(format!(
                "{} still occupied; fragment store left at {}",
                layout.native.display(),
                layout.store.display()
            ));
        }
    }

    if !failures.is_empty() {
        return Err(SessionError::Restore(failures.join("; ")));
    }
    remove_journal(layout)?;
    tracing::info!(native = %layout.native.display(), "directory roles restored");
    Ok(())
}

/// A live directory swap. Dropping it restores the roles.
#[derive(Debug)]
pub struct ActiveRedirect {
    layout: Layout,
    restored: bool,
}

impl ActiveRedirect {
    /// Where the game reads and writes full-size saves.
    pub fn saves_dir(&self) -> &Path {
        &self.layout.native
    }

    /// Where the fragment store lives for the rest of the session.
    pub fn store_dir(&self) -> &Path {
        &self.layout.store
    }

    pub fn exit(mut self) -> Result<(), SessionError> {
        self.restored = true;
        restore_roles(&self.layout)
    }
}

impl Drop for ActiveRedirect {
    fn drop(&mut self) {
        if self.restored {
            return;
        }
        tracing::warn!("session ended without an orderly exit; restoring directories");
        if let Err(err) = restore_roles(&self.layout) {
            tracing::error!(error = %err, "{}", recovery_instructions(&self.layout));
        }
    }
}

/// Run `f` with the roles swapped, restoring them however `f` ends.
pub fn with_redirect<T, E>(
    layout: &Layout,
    f: impl FnOnce(&ActiveRedirect) -> Result<T, E>,
) -> Result<T, SessionError>
where
    E: Into<SessionError>,
{
    let redirect = enter(layout)?;
    let result = f(&redirect).map_err(Into::into);
    let restored = redirect.exit();
    let value = result?;
    restored?;
    Ok(value)
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
