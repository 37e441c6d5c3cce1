pub mod run;
pub mod status;

use std::path::Path;

use anyhow::{Context, Result};

use cloudsaver_core::Settings;

/// Load and validate `cloudsaver.yaml` under `root`.
pub fn load_settings(root: &Path) -> Result<Settings> {
    Settings::load_at(root)
        .with_context(|| format!("failed to load settings from {}", root.display()))
}
