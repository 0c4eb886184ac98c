//! Log viewer handlers.

use axum::{
    Json,
    extract::{Query, State},
};
use serde::{Deserialize, Serialize};
use tracing::debug;

use crate::api::error::{ApiError, ApiResult};
use crate::api::state::AppState;
use crate::logs::{LogFile, find_log_files_blocking, tail_file_blocking};

#[derive(Debug, Serialize)]
pub struct LogListing {
    pub files: Vec<LogFile>,
}

#[derive(Debug, Deserialize)]
pub struct TailQuery {
    pub path: String,
    /// Defaults to, and is capped at, the configured tail length.
    #[serde(default)]
    pub lines: Option<usize>,
}

#[derive(Debug, Serialize)]
pub struct LogTail {
    pub path: String,
    pub lines: usize,
    pub content: String,
}

/// GET /api/logs - `.log` and `.txt` files under the root, newest first
pub async fn list_logs(State(state): State<AppState>) -> Json<LogListing> {
    let root = state.sandbox.root().to_path_buf();
    let files = find_log_files_blocking(root, state.config.logs.max_files).await;
    debug!("Found {} log files", files.len());
    Json(LogListing { files })
}

/// GET /api/logs/tail - last lines of one file
pub async fn tail_log(
    State(state): State<AppState>,
    Query(query): Query<TailQuery>,
) -> ApiResult<Json<LogTail>> {
    let path = state.sandbox.resolve_existing(&query.path)?;
    if !path.is_file() {
        return Err(ApiError::not_found(query.path));
    }

    let max_lines = state.config.logs.tail_lines;
    let lines = query.lines.unwrap_or(max_lines).clamp(1, max_lines.max(1));
    let content = tail_file_blocking(path.clone(), lines).await?;

    Ok(Json(LogTail {
        path: state.sandbox.relative_display(&path),
        lines,
        content,
    }))
}
