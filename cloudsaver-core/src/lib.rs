//! Cloudsaver core library: domain types, fragment naming, settings.
//!
//! - [`types`]: newtypes and the per-session stamp table
//! - [`naming`]: the on-disk fragment naming grammar and autosave names
//! - [`config`]: [`Settings`] and the resolved directory [`Layout`]
//! - [`error`]: [`ConfigError`], [`NameError`]

pub mod config;
pub mod error;
pub mod naming;
pub mod types;

pub use config::{Layout, Settings};
pub use error::{ConfigError, NameError};
pub use naming::{AutosaveKind, FragmentName};
pub use types::{Fingerprint, SaveName, StampEntry, StampTable};
