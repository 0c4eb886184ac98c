//! Terminal session handlers.

use axum::{Extension, Json, extract::State};
use serde::{Deserialize, Serialize};

use hostdeck_core::{CommandOutcome, ShellKind};

use crate::api::error::{ApiError, ApiResult};
use crate::api::session::SessionId;
use crate::api::state::AppState;

#[derive(Debug, Serialize)]
pub struct TerminalView {
    /// Absolute working directory.
    pub cwd: String,
    /// Working directory relative to the sandbox root.
    pub relative_cwd: String,
    pub command_history: Vec<String>,
    pub output_history: Vec<CommandOutcome>,
    pub default_shell: ShellKind,
    pub shells: Vec<ShellKind>,
}

#[derive(Debug, Deserialize)]
pub struct ExecRequest {
    pub cmd: String,
    /// Shell name such as `bash`, `sh`, `powershell` or `cmd`.
    #[serde(default)]
    pub shell: Option<String>,
}

#[derive(Debug, Serialize)]
pub struct ExecResponse {
    pub command: String,
    pub output: String,
    pub exit_code: i32,
    /// Working directory after the command.
    pub cwd: String,
    pub relative_cwd: String,
}

#[derive(Debug, Serialize)]
pub struct StatusResponse {
    pub status: &'static str,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub cwd: Option<String>,
}

/// GET /api/terminal - this session's directory and histories
pub async fn get_terminal(
    State(state): State<AppState>,
    Extension(session): Extension<SessionId>,
) -> Json<TerminalView> {
    let snapshot = state.terminals.snapshot(session.as_str()).await;
    Json(TerminalView {
        cwd: snapshot.working_directory.display().to_string(),
        relative_cwd: state.sandbox.relative_display(&snapshot.working_directory),
        command_history: snapshot.command_history,
        output_history: snapshot.output_history,
        default_shell: state.terminals.config().default_shell,
        shells: ShellKind::ALL.to_vec(),
    })
}

/// POST /api/terminal/exec - run one line and wait for it
pub async fn exec_command(
    State(state): State<AppState>,
    Extension(session): Extension<SessionId>,
    Json(request): Json<ExecRequest>,
) -> ApiResult<Json<ExecResponse>> {
    let shell = request
        .shell
        .as_deref()
        .filter(|s| !s.trim().is_empty())
        .map(str::parse::<ShellKind>)
        .transpose()
        .map_err(ApiError::bad_request)?;

    let outcome = state
        .terminals
        .execute(session.as_str(), &request.cmd, shell)
        .await
        .ok_or_else(|| ApiError::bad_request("Command is empty"))?;

    let cwd = outcome.working_directory_after;
    Ok(Json(ExecResponse {
        command: outcome.command,
        output: outcome.output,
        exit_code: outcome.exit_code,
        relative_cwd: state.sandbox.relative_display(&cwd),
        cwd: cwd.display().to_string(),
    }))
}

/// POST /api/terminal/clear - drop output, keep command recall
pub async fn clear_terminal(
    State(state): State<AppState>,
    Extension(session): Extension<SessionId>,
) -> Json<StatusResponse> {
    state.terminals.clear(session.as_str()).await;
    Json(StatusResponse {
        status: "cleared",
        cwd: None,
    })
}

/// POST /api/terminal/reset - back to the sandbox root with empty histories
pub async fn reset_terminal(
    State(state): State<AppState>,
    Extension(session): Extension<SessionId>,
) -> Json<StatusResponse> {
    let snapshot = state.terminals.reset(session.as_str()).await;
    Json(StatusResponse {
        status: "reset",
        cwd: Some(snapshot.working_directory.display().to_string()),
    })
}
