//! Core of the hostdeck console: path confinement, background job
//! supervision and interactive session shells.
//!
//! Nothing here knows about HTTP; the request layer in the `hostdeck` crate
//! maps requests onto these types.

pub mod error;
pub mod jobs;
pub mod sandbox;
pub mod terminal;

mod process;

pub use error::{CoreError, Result};
pub use jobs::{JobRecord, JobStatus, JobSummary, JobSupervisor, SupervisorConfig};
pub use sandbox::{Sandbox, sanitize_filename};
pub use terminal::{CommandOutcome, SessionSnapshot, SessionStore, ShellKind, TerminalConfig};
