use std::time::Duration;

use thiserror::Error;

#[derive(Error, Debug)]
pub enum CoreError {
    #[error("Path is outside the sandbox root")]
    PathEscape,

    #[error("Not found: {0}")]
    NotFound(String),

    #[error("Job is already running: {0}")]
    AlreadyRunning(String),

    #[error("Job is not running: {0}")]
    NotRunning(String),

    #[error("Unsupported script extension: {0}")]
    UnsupportedExtension(String),

    #[error("Invalid name: {0}")]
    InvalidName(String),

    #[error("Failed to launch {name}: {source}")]
    LaunchFailed {
        name: String,
        #[source]
        source: std::io::Error,
    },

    #[error("Command timed out after {}s", .0.as_secs())]
    Timeout(Duration),

    #[error("Execution error: {0}")]
    ExecutionError(String),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

pub type Result<T> = std::result::Result<T, CoreError>;
