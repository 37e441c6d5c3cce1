//! `cloudsaver run`: wrap one game session.

use std::ffi::OsString;
use std::path::Path;

use anyhow::{Context, Result};
use clap::Args;

use cloudsaver_session::{start_blocking, SessionOptions};

use super::load_settings;

/// Arguments for `cloudsaver run`.
#[derive(Args, Debug)]
pub struct RunArgs {
    /// Game executable followed by its arguments, forwarded verbatim.
    #[arg(
        required = true,
        trailing_var_arg = true,
        allow_hyphen_values = true,
        value_name = "COMMAND"
    )]
    pub command: Vec<OsString>,
}

impl RunArgs {
    /// Returns the exit code the wrapper should terminate with.
    pub fn run(self, root: &Path) -> Result<i32> {
        let settings = load_settings(root)?;
        let layout = settings.layout(root);
        let summary = start_blocking(SessionOptions {
            settings,
            layout,
            command: self.command,
        })
        .context("session did not start")?;
        Ok(summary.exit_code())
    }
}
