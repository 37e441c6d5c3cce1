//! cloudsaver: keeps oversized game saves under a cloud sync client's file
//! size cap.
//!
//! # Usage
//!
//! ```text
//! cloudsaver [--root <dir>] run -- <game> [args...]
//! cloudsaver [--root <dir>] status [--json]
//! ```

mod commands;

use std::path::{Path, PathBuf};

use anyhow::{Context, Result};
use clap::{Parser, Subcommand};

use commands::{run::RunArgs, status::StatusArgs};

// ---------------------------------------------------------------------------
// CLI entry point
// ---------------------------------------------------------------------------

#[derive(Parser, Debug)]
#[command(
    name = "cloudsaver",
    version,
    about = "Run a game while mirroring its saves as size-capped fragments",
    long_about = None,
)]
struct Cli {
    /// Install root holding cloudsaver.yaml (defaults to the executable's directory).
    #[arg(long, global = true)]
    root: Option<PathBuf>,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand, Debug)]
enum Commands {
    /// Launch the game with its save directory redirected and synced.
    Run(RunArgs),

    /// Show the directory roles and the fragment sets in the store.
    Status(StatusArgs),
}

// ---------------------------------------------------------------------------
// Main
// ---------------------------------------------------------------------------

fn main() -> Result<()> {
    let cli = Cli::parse();
    let root = resolve_root(cli.root.as_deref())?;
    match cli.command {
        Commands::Run(args) => {
            let code = args.run(&root)?;
            std::process::exit(code)
        }
        Commands::Status(args) => args.run(&root),
    }
}

fn resolve_root(explicit: Option<&Path>) -> Result<PathBuf> {
    match explicit {
        Some(root) if root.is_absolute() => Ok(root.to_path_buf()),
        Some(root) => Ok(std::env::current_dir()
            .context("could not determine current directory")?
            .join(root)),
        None => {
            let exe = std::env::current_exe().context("could not locate the cloudsaver executable")?;
            exe.parent()
                .map(Path::to_path_buf)
                .context("executable has no parent directory")
        }
    }
}
