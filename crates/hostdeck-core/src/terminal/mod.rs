//! Interactive session shell: per-session working directory and histories,
//! one command at a time.

mod command;
mod session;
mod store;

pub use command::{ShellKind, TerminalCommand};
pub use session::{CommandOutcome, SessionSnapshot, SessionState, TerminalConfig};
pub use store::SessionStore;
