//! `cloudsaver status`: directory roles and fragment store contents.

use std::path::{Path, PathBuf};
use std::time::SystemTime;

use anyhow::{Context, Result};
use chrono::{DateTime, Local};
use clap::Args;
use colored::Colorize;
use serde::Serialize;
use tabled::{settings::Style, Table, Tabled};

use cloudsaver_core::Layout;
use cloudsaver_session::{read_journal, RedirectPhase};
use cloudsaver_sync::{FragmentStore, Inspection};

use super::load_settings;

/// Arguments for `cloudsaver status`.
#[derive(Args, Debug)]
pub struct StatusArgs {
    /// Emit machine-readable JSON.
    #[arg(long)]
    pub json: bool,
}

impl StatusArgs {
    pub fn run(self, root: &Path) -> Result<()> {
        let settings = load_settings(root)?;
        let layout = settings.layout(root);
        let report = build_report(&layout, &settings.save_extension)?;
        if self.json {
            println!(
                "{}",
                serde_json::to_string_pretty(&report).context("failed to encode status")?
            );
            return Ok(());
        }
        print_table(&report);
        Ok(())
    }
}

#[derive(Debug, Serialize)]
struct StatusReport {
    root: PathBuf,
    native: PathBuf,
    staging: PathBuf,
    /// Directory the fragment store was read from.
    store: PathBuf,
    session_active: bool,
    journal_phase: Option<RedirectPhase>,
    sets: Vec<SetStatus>,
    dangling: Vec<DanglingStatus>,
    rejected: Vec<String>,
    temp_files: Vec<PathBuf>,
}

#[derive(Debug, Serialize)]
struct SetStatus {
    name: String,
    fragments: u32,
    total_size: u64,
    modified: String,
}

#[derive(Debug, Serialize)]
struct DanglingStatus {
    name: String,
    expected: Option<u32>,
    present: usize,
}

#[derive(Tabled)]
struct SetRow {
    #[tabled(rename = "save")]
    name: String,
    #[tabled(rename = "fragments")]
    fragments: u32,
    #[tabled(rename = "size")]
    size: String,
    #[tabled(rename = "modified")]
    modified: String,
}

fn build_report(layout: &Layout, ext: &str) -> Result<StatusReport> {
    let (journal_present, journal_phase) = match read_journal(layout) {
        Ok(journal) => (journal.is_some(), journal.map(|j| j.phase)),
        Err(err) => {
            eprintln!("{} unreadable journal: {err}", "warning:".yellow().bold());
            (true, None)
        }
    };
    let store_dir = if layout.store.exists() {
        layout.store.clone()
    } else {
        layout.native.clone()
    };

    let inspection = if store_dir.is_dir() {
        FragmentStore::new(&store_dir, ext)
            .inspect()
            .with_context(|| format!("failed to inspect {}", store_dir.display()))?
    } else {
        Inspection::default()
    };

    Ok(StatusReport {
        root: layout.root.clone(),
        native: layout.native.clone(),
        staging: layout.staging.clone(),
        session_active: journal_present || layout.store.exists(),
        journal_phase,
        sets: inspection
            .complete
            .iter()
            .map(|(name, set)| SetStatus {
                name: name.to_string(),
                fragments: set.entry.fragments,
                total_size: set.entry.total_size,
                modified: format_time(set.entry.mtime),
            })
            .collect(),
        dangling: inspection
            .dangling
            .iter()
            .map(|(name, set)| DanglingStatus {
                name: name.to_string(),
                expected: set.expected,
                present: set.members.len(),
            })
            .collect(),
        rejected: inspection.rejected.iter().map(ToString::to_string).collect(),
        temp_files: inspection.temp_files,
        store: store_dir,
    })
}

fn format_time(time: SystemTime) -> String {
    DateTime::<Local>::from(time).to_rfc3339()
}

fn format_size(bytes: u64) -> String {
    const MIB: f64 = 1024.0 * 1024.0;
    if bytes as f64 >= MIB {
        format!("{:.1} MiB", bytes as f64 / MIB)
    } else {
        format!("{:.1} KiB", bytes as f64 / 1024.0)
    }
}

fn print_table(report: &StatusReport) {
    let session = if report.session_active {
        "SESSION ACTIVE".yellow().bold()
    } else {
        "IDLE".green().bold()
    };
    println!("{} {}", "cloudsaver".bold(), session);
    println!("  root     {}", report.root.display());
    println!("  native   {}", report.native.display());
    println!("  staging  {}", report.staging.display());
    println!("  store    {}", report.store.display());
    if let Some(phase) = report.journal_phase {
        println!("  journal  {phase:?}");
    }

    if report.sets.is_empty() {
        println!("{}", "no fragment sets".bright_black());
    } else {
        let rows: Vec<SetRow> = report
            .sets
            .iter()
            .map(|set| SetRow {
                name: set.name.clone(),
                fragments: set.fragments,
                size: format_size(set.total_size),
                modified: set.modified.clone(),
            })
            .collect();
        let mut table = Table::new(rows);
        table.with(Style::rounded());
        println!("{table}");
    }

    for set in &report.dangling {
        let expected = set
            .expected
            .map_or_else(|| "?".to_string(), |n| n.to_string());
        println!(
            "{} {} ({} of {} fragment(s) present)",
            "DANGLING".red().bold(),
            set.name,
            set.present,
            expected
        );
    }
    for name in &report.rejected {
        println!("{} {name}", "REJECTED".magenta().bold());
    }
    for path in &report.temp_files {
        println!("{} {}", "LEFTOVER".bright_black(), path.display());
    }
}
