//! Session runtime: directory redirection, child supervision, and the
//! polling sync loop that ties them together.

pub mod child;
mod error;
pub mod log_rotation;
pub mod paths;
pub mod redirect;
mod runtime;

pub use child::{GameProcess, StopOutcome};
pub use error::SessionError;
pub use redirect::{
    check_preconditions, read_journal, recovery_instructions, restore_roles, with_redirect,
    ActiveRedirect, RedirectJournal, RedirectPhase,
};
pub use runtime::{
    init_tracing, run_session, run_session_until, start_blocking, SessionOptions, SessionPhase,
    SessionSummary,
};
