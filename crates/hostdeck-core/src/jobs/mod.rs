//! Background job supervision for scripts in the scripts directory.

mod launcher;
mod models;
mod supervisor;

pub use launcher::{Interpreters, ScriptKind, split_args};
pub use models::{JobRecord, JobStatus, JobSummary};
pub use supervisor::{JobSupervisor, SupervisorConfig};
