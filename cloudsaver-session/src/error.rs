use std::path::PathBuf;

use thiserror::Error;

/// Error surface for directory redirection, child supervision, and the
/// session runtime.
#[derive(Debug, Error)]
pub enum SessionError {
    #[error("I/O error at {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("sync error: {0}")]
    Sync(#[from] cloudsaver_sync::SyncError),

    #[error("configuration error: {0}")]
    Config(#[from] cloudsaver_core::ConfigError),

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    #[error(
        "an earlier session did not restore its directories \
         (store: {store}, journal: {journal}); refusing to start\n{instructions}"
    )]
    PreexistingStagingConflict {
        store: PathBuf,
        journal: PathBuf,
        instructions: String,
    },

    #[error("could not restore directory roles: {0}")]
    Restore(String),

    #[error("failed to launch {program}: {source}")]
    Spawn {
        program: String,
        #[source]
        source: std::io::Error,
    },

    #[error("no command given to launch")]
    EmptyCommand,

    #[error("child process {pid} did not exit after terminate and kill")]
    ChildUnresponsive { pid: u32 },

    #[error("{task} task join failure: {source}")]
    Join {
        task: &'static str,
        #[source]
        source: tokio::task::JoinError,
    },
}

pub(crate) fn io_err(path: impl Into<PathBuf>, source: std::io::Error) -> SessionError {
    SessionError::Io {
        path: path.into(),
        source,
    }
}
