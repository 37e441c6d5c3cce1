//! Error types for cloudsaver-core.

use std::path::PathBuf;

use thiserror::Error;

/// Errors raised while loading or validating [`crate::config::Settings`].
#[derive(Debug, Error)]
pub enum ConfigError {
    /// The settings file exists but could not be read.
    #[error("I/O error at {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    /// YAML parse error on load: includes file path and line context from serde_yaml.
    #[error("failed to parse settings at {path}: {source}")]
    Parse {
        path: PathBuf,
        #[source]
        source: serde_yaml::Error,
    },

    /// A value is out of range or inconsistent with another value.
    #[error("invalid setting: {0}")]
    Invalid(String),
}

/// A file name that looks like a save fragment but violates the naming grammar.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum NameError {
    #[error("unparseable save name '{name}': {reason}")]
    Unparseable { name: String, reason: &'static str },
}
