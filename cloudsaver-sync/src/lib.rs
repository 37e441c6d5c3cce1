//! # cloudsaver-sync
//!
//! Fragment store and incremental sync pipeline.
//!
//! Saves larger than the fragment cap are split into quantum-aligned
//! fragments ([`codec`]) and mirrored into a flat directory ([`store`]).
//! Call [`resync`] once at session start, then [`run_cycle`] on every scan
//! tick.

pub mod codec;
pub mod detector;
pub mod error;
pub mod pipeline;
pub mod retention;
pub mod store;

pub use codec::{reassemble, FragmentLayout};
pub use detector::{ChangeSet, Scan};
pub use error::{log_failures, SyncError};
pub use pipeline::{
    resync, run_cycle, run_cycle_on, CycleReport, ResyncReport, SessionState, SyncContext,
};
pub use retention::{AutosaveRecord, RetentionPlan, RetentionPolicy};
pub use store::{FragmentStore, Inspection};
