//! Script catalog and background job handlers.

use axum::{
    Json,
    extract::{Multipart, Path, State},
    http::StatusCode,
};
use serde::{Deserialize, Serialize};
use tracing::{info, warn};

use hostdeck_core::jobs::split_args;
use hostdeck_core::{JobRecord, JobSummary};

use super::SuccessResponse;
use crate::api::error::{ApiError, ApiResult};
use crate::api::state::AppState;

#[derive(Debug, Serialize)]
pub struct ScriptsResponse {
    pub scripts_dir: String,
    pub scripts: Vec<JobSummary>,
}

#[derive(Debug, Serialize)]
pub struct JobsResponse {
    pub jobs: Vec<JobSummary>,
}

/// Launch request. `args` wins over `args_line` when both are given.
#[derive(Debug, Deserialize)]
pub struct RunScriptRequest {
    pub script: String,
    #[serde(default)]
    pub args: Option<Vec<String>>,
    /// Whitespace-separated arguments, as typed in a single input box.
    #[serde(default)]
    pub args_line: Option<String>,
}

/// GET /api/scripts - scripts on disk merged with their job state
pub async fn list_scripts(State(state): State<AppState>) -> ApiResult<Json<ScriptsResponse>> {
    let scripts = state.jobs.catalog().await?;
    Ok(Json(ScriptsResponse {
        scripts_dir: state.jobs.scripts_dir().display().to_string(),
        scripts,
    }))
}

/// GET /api/jobs - every job launched since start
pub async fn list_jobs(State(state): State<AppState>) -> Json<JobsResponse> {
    Json(JobsResponse {
        jobs: state.jobs.list().await,
    })
}

/// POST /api/scripts/run - launch without waiting
pub async fn run_script(
    State(state): State<AppState>,
    Json(request): Json<RunScriptRequest>,
) -> ApiResult<(StatusCode, Json<JobRecord>)> {
    if request.script.trim().is_empty() {
        return Err(ApiError::bad_request("script is required"));
    }

    let args = match (request.args, request.args_line) {
        (Some(args), _) => args,
        (None, Some(line)) => split_args(&line),
        (None, None) => Vec::new(),
    };

    let record = state.jobs.launch(&request.script, args).await?;
    Ok((StatusCode::ACCEPTED, Json(record)))
}

/// GET /api/scripts/{name} - full record including captured output
pub async fn script_status(
    State(state): State<AppState>,
    Path(name): Path<String>,
) -> ApiResult<Json<JobRecord>> {
    Ok(Json(state.jobs.status(&name).await?))
}

/// POST /api/scripts/{name}/stop - terminate and return the final record
pub async fn stop_script(
    State(state): State<AppState>,
    Path(name): Path<String>,
) -> ApiResult<Json<JobRecord>> {
    Ok(Json(state.jobs.stop(&name).await?))
}

/// POST /api/scripts/upload - add a script to the scripts directory
pub async fn upload_script(
    State(state): State<AppState>,
    mut multipart: Multipart,
) -> ApiResult<Json<SuccessResponse>> {
    let limit = state.config.files.max_upload_size;

    while let Some(field) = multipart
        .next_field()
        .await
        .map_err(|e| ApiError::bad_request(format!("Invalid multipart body: {}", e)))?
    {
        let Some(file_name) = field.file_name().map(str::to_string) else {
            continue;
        };
        if file_name.is_empty() {
            return Err(ApiError::bad_request("No file selected"));
        }

        let data = field
            .bytes()
            .await
            .map_err(|e| ApiError::bad_request(format!("Failed to read upload: {}", e)))?;
        let size = data.len() as u64;
        if size > limit {
            return Err(ApiError::PayloadTooLarge { size, limit });
        }

        let name = state.jobs.install_script(&file_name, &data).await?;
        info!("Uploaded script {} ({} bytes)", name, size);
        return Ok(Json(SuccessResponse {
            success: true,
            message: format!("Script uploaded: {}", name),
            path: Some(name),
        }));
    }

    warn!("Script upload without a file field");
    Err(ApiError::bad_request("Missing file upload data"))
}
