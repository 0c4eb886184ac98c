//! hostdeck: a browser-facing remote administration console for one host.
//!
//! The [`api`] module serves JSON over HTTP on top of `hostdeck-core`, which
//! does the path confinement, job supervision and terminal sessions.

pub mod api;
pub mod archive;
pub mod config;
pub mod logs;

pub use api::{AppState, create_router};
pub use config::AppConfig;
