//! File management handlers. Every path goes through the sandbox first.

use std::path::{Path, PathBuf};
use std::time::UNIX_EPOCH;

use axum::{
    Json,
    body::{Body, Bytes},
    extract::{Multipart, Query, State, multipart::Field},
    http::{StatusCode, header},
    response::{IntoResponse, Response},
};
use serde::{Deserialize, Serialize};
use tokio::fs;
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio_util::io::ReaderStream;
use tracing::{debug, error, info, warn};
use uuid::Uuid;

use hostdeck_core::sanitize_filename;

use super::SuccessResponse;
use crate::api::error::{ApiError, ApiResult};
use crate::api::state::AppState;
use crate::archive::{ArchiveError, ArchiveLimits, archive_name, create_archive};

/// Bytes inspected when deciding whether a file is text.
const TEXT_PROBE_BYTES: usize = 1024;

#[derive(Debug, Deserialize)]
pub struct PathQuery {
    /// Path relative to the sandbox root (defaults to the root)
    #[serde(default)]
    pub path: String,
}

#[derive(Debug, Serialize, Clone, Copy, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum FileType {
    File,
    Directory,
}

/// One directory entry in a listing.
#[derive(Debug, Serialize)]
pub struct FileEntry {
    pub name: String,
    pub path: String,
    #[serde(rename = "type")]
    pub node_type: FileType,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub size: Option<u64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub modified: Option<u64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub extension: Option<String>,
}

#[derive(Debug, Serialize)]
pub struct DirectoryListing {
    pub path: String,
    /// Parent path, absent at the root.
    pub parent: Option<String>,
    pub entries: Vec<FileEntry>,
}

#[derive(Debug, Serialize)]
pub struct FileView {
    pub path: String,
    pub name: String,
    pub size: u64,
    pub mime: String,
    pub is_text: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub content: Option<String>,
}

impl From<ArchiveError> for ApiError {
    fn from(err: ArchiveError) -> Self {
        match err {
            ArchiveError::TooLarge { size, limit } => ApiError::PayloadTooLarge { size, limit },
            ArchiveError::TooManyEntries { entries, limit } => ApiError::BadRequest(format!(
                "Backup has too many files: {} exceeds limit of {}",
                entries, limit
            )),
            ArchiveError::NotFound(path) => ApiError::NotFound(path),
            ArchiveError::Io(e) => ApiError::from(e),
            ArchiveError::Zip(e) => ApiError::Internal(e.to_string()),
        }
    }
}

fn file_name_of(path: &Path) -> String {
    path.file_name()
        .map(|n| n.to_string_lossy().to_string())
        .unwrap_or_default()
}

fn looks_like_text(prefix: &[u8]) -> bool {
    !prefix.contains(&0)
}

async fn sniff_text(path: &Path) -> std::io::Result<bool> {
    let mut file = fs::File::open(path).await?;
    let mut buffer = vec![0u8; TEXT_PROBE_BYTES];
    let mut filled = 0;
    while filled < buffer.len() {
        let n = file.read(&mut buffer[filled..]).await?;
        if n == 0 {
            break;
        }
        filled += n;
    }
    Ok(looks_like_text(&buffer[..filled]))
}

fn attachment(name: &str) -> String {
    format!("attachment; filename=\"{}\"", name.replace('"', "'"))
}

/// GET /api/files - list a directory, directories first
pub async fn browse(
    State(state): State<AppState>,
    Query(query): Query<PathQuery>,
) -> ApiResult<Json<DirectoryListing>> {
    let path = state.sandbox.resolve_existing(&query.path)?;

    if !path.exists() {
        return Err(ApiError::not_found(query.path));
    }
    if !path.is_dir() {
        return Err(ApiError::bad_request(format!(
            "Not a directory: {}",
            query.path
        )));
    }

    debug!("Listing directory: {}", path.display());

    let mut entries = Vec::new();
    let mut dir = fs::read_dir(&path).await?;
    while let Some(entry) = dir.next_entry().await? {
        let entry_path = entry.path();
        let metadata = match fs::metadata(&entry_path).await {
            Ok(metadata) => metadata,
            // Dangling symlink or a race with deletion
            Err(_) => match fs::symlink_metadata(&entry_path).await {
                Ok(metadata) => metadata,
                Err(_) => continue,
            },
        };

        let name = entry.file_name().to_string_lossy().to_string();
        let is_dir = metadata.is_dir();
        let modified = metadata
            .modified()
            .ok()
            .and_then(|t| t.duration_since(UNIX_EPOCH).ok())
            .map(|d| d.as_secs());
        let extension = (!is_dir)
            .then(|| {
                entry_path
                    .extension()
                    .map(|e| format!(".{}", e.to_string_lossy().to_lowercase()))
            })
            .flatten();

        entries.push(FileEntry {
            path: state.sandbox.relative_display(&path.join(&name)),
            name,
            node_type: if is_dir {
                FileType::Directory
            } else {
                FileType::File
            },
            size: (!is_dir).then_some(metadata.len()),
            modified,
            extension,
        });
    }

    entries.sort_by(|a, b| {
        (a.node_type != FileType::Directory, a.name.to_lowercase())
            .cmp(&(b.node_type != FileType::Directory, b.name.to_lowercase()))
    });

    let relative = state.sandbox.relative_display(&path);
    let parent = if path == state.sandbox.root() {
        None
    } else {
        path.parent()
            .map(|parent| state.sandbox.relative_display(parent))
    };

    Ok(Json(DirectoryListing {
        path: relative,
        parent,
        entries,
    }))
}

/// GET /api/files/view - file metadata and, for text files, the content
pub async fn view_file(
    State(state): State<AppState>,
    Query(query): Query<PathQuery>,
) -> ApiResult<Json<FileView>> {
    let path = state.sandbox.resolve_existing(&query.path)?;
    if !path.is_file() {
        return Err(ApiError::not_found(query.path));
    }

    let size = fs::metadata(&path).await?.len();
    let limit = state.config.files.max_view_size;
    let is_text = sniff_text(&path).await?;

    let content = if is_text {
        if size > limit {
            return Err(ApiError::PayloadTooLarge { size, limit });
        }
        let bytes = fs::read(&path).await?;
        Some(String::from_utf8_lossy(&bytes).into_owned())
    } else {
        None
    };

    Ok(Json(FileView {
        path: state.sandbox.relative_display(&path),
        name: file_name_of(&path),
        size,
        mime: mime_guess::from_path(&path)
            .first_or_octet_stream()
            .to_string(),
        is_text,
        content,
    }))
}

/// PUT /api/files/edit - overwrite an existing text file with the request body
pub async fn edit_file(
    State(state): State<AppState>,
    Query(query): Query<PathQuery>,
    body: Bytes,
) -> ApiResult<Json<SuccessResponse>> {
    let size = body.len() as u64;
    let limit = state.config.files.max_upload_size;
    if size > limit {
        return Err(ApiError::PayloadTooLarge { size, limit });
    }

    let path = state.sandbox.resolve_existing(&query.path)?;
    if !path.is_file() {
        return Err(ApiError::not_found(query.path));
    }
    if !sniff_text(&path).await? {
        return Err(ApiError::bad_request("Refusing to edit a binary file"));
    }
    if std::str::from_utf8(&body).is_err() {
        return Err(ApiError::bad_request("Content is not valid UTF-8"));
    }

    info!("Writing file: {} ({} bytes)", path.display(), size);

    let mut file = fs::File::create(&path).await.map_err(|e| {
        error!("Failed to open file for writing: {}", e);
        ApiError::from(e)
    })?;
    file.write_all(&body).await?;
    file.flush().await?;

    let relative = state.sandbox.relative_display(&path);
    Ok(Json(SuccessResponse {
        success: true,
        message: format!("Saved: {} ({} bytes)", relative, size),
        path: Some(relative),
    }))
}

/// POST /api/files/upload - store a multipart `file` field in a directory
pub async fn upload_file(
    State(state): State<AppState>,
    Query(query): Query<PathQuery>,
    mut multipart: Multipart,
) -> ApiResult<Json<SuccessResponse>> {
    let dir = state.sandbox.resolve_existing(&query.path)?;
    if !dir.is_dir() {
        return Err(ApiError::bad_request(format!(
            "Upload target is not a directory: {}",
            query.path
        )));
    }

    while let Some(field) = multipart.next_field().await.map_err(|e| {
        warn!("Multipart error parsing field: {:?}", e);
        ApiError::bad_request(format!("Invalid multipart body: {}", e))
    })? {
        if field.file_name().is_none() {
            continue;
        }
        return store_upload(&state, &dir, field).await;
    }

    Err(ApiError::bad_request("Missing file upload data"))
}

/// Stream one uploaded file into `dir` via a temporary file, then rename.
async fn store_upload(
    state: &AppState,
    dir: &Path,
    mut field: Field<'_>,
) -> ApiResult<Json<SuccessResponse>> {
    let raw_filename = field.file_name().unwrap_or_default().to_string();
    let file_name = sanitize_filename(&raw_filename).ok_or_else(|| {
        warn!("Rejected invalid filename: {:?}", raw_filename);
        ApiError::bad_request(format!("Invalid filename: {}", raw_filename))
    })?;

    let final_path = state.sandbox.confine(&dir.join(&file_name))?;
    if let Ok(metadata) = fs::symlink_metadata(&final_path).await {
        if metadata.file_type().is_symlink() {
            warn!("Refusing to overwrite symlink: {:?}", final_path);
            return Err(ApiError::forbidden("Refusing to overwrite a symlink"));
        }
        if metadata.is_dir() {
            return Err(ApiError::conflict(format!(
                "A directory named {} already exists",
                file_name
            )));
        }
    }

    let temp_path: PathBuf = dir.join(format!(".upload-{}-{}", file_name, Uuid::new_v4()));
    let mut temp_file = fs::File::create(&temp_path).await?;

    let limit = state.config.files.max_upload_size;
    let mut total_size = 0u64;
    loop {
        let chunk = match field.chunk().await {
            Ok(Some(chunk)) => chunk,
            Ok(None) => break,
            Err(e) => {
                let _ = fs::remove_file(&temp_path).await;
                return Err(ApiError::bad_request(format!(
                    "Failed to read upload data: {}",
                    e
                )));
            }
        };
        total_size = total_size.saturating_add(chunk.len() as u64);
        if total_size > limit {
            let _ = fs::remove_file(&temp_path).await;
            return Err(ApiError::PayloadTooLarge {
                size: total_size,
                limit,
            });
        }
        if let Err(e) = temp_file.write_all(&chunk).await {
            let _ = fs::remove_file(&temp_path).await;
            return Err(e.into());
        }
    }
    temp_file.flush().await?;
    drop(temp_file);

    info!(
        "Uploaded file: {} ({} bytes)",
        final_path.display(),
        total_size
    );

    if let Err(e) = fs::rename(&temp_path, &final_path).await {
        let _ = fs::remove_file(&temp_path).await;
        return Err(e.into());
    }

    Ok(Json(SuccessResponse {
        success: true,
        message: format!("File uploaded: {}", file_name),
        path: Some(state.sandbox.relative_display(&final_path)),
    }))
}

/// GET /api/files/download - stream a file as an attachment
pub async fn download_file(
    State(state): State<AppState>,
    Query(query): Query<PathQuery>,
) -> ApiResult<Response> {
    let path = state.sandbox.resolve_existing(&query.path)?;
    if !path.is_file() {
        return Err(ApiError::not_found(query.path));
    }

    debug!("Downloading file: {}", path.display());

    let file_size = fs::metadata(&path).await?.len();
    let file = fs::File::open(&path).await?;
    let body = Body::from_stream(ReaderStream::new(file));
    let mime = mime_guess::from_path(&path)
        .first_or_octet_stream()
        .to_string();

    Ok((
        StatusCode::OK,
        [
            (header::CONTENT_TYPE, mime),
            (header::CONTENT_LENGTH, file_size.to_string()),
            (header::CONTENT_DISPOSITION, attachment(&file_name_of(&path))),
        ],
        body,
    )
        .into_response())
}

/// GET /api/files/backup - zip a file or directory, subject to size limits
pub async fn backup(
    State(state): State<AppState>,
    Query(query): Query<PathQuery>,
) -> ApiResult<Response> {
    let path = state.sandbox.resolve_existing(&query.path)?;
    if !path.exists() {
        return Err(ApiError::not_found(query.path));
    }

    let limits = ArchiveLimits {
        max_bytes: state.config.files.max_backup_bytes,
        max_entries: state.config.files.max_backup_entries,
    };
    let zip_name = archive_name(&path);

    info!("Creating backup of {}", path.display());
    let (zip_file, zip_size) = create_archive(path, limits).await?;
    let body = Body::from_stream(ReaderStream::new(zip_file));

    Ok((
        StatusCode::OK,
        [
            (header::CONTENT_TYPE, "application/zip".to_string()),
            (header::CONTENT_LENGTH, zip_size.to_string()),
            (header::CONTENT_DISPOSITION, attachment(&zip_name)),
        ],
        body,
    )
        .into_response())
}
