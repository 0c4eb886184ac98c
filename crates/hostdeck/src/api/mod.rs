//! HTTP API module.
//!
//! JSON endpoints for the file manager, the terminal and script jobs.

mod error;
mod handlers;
mod routes;
mod session;
mod state;

pub use error::{ApiError, ApiResult, ErrorResponse};
pub use routes::create_router;
pub use session::{SESSION_COOKIE, SessionId};
pub use state::AppState;
