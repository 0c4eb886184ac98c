//! Zip backups of files and directory trees.
//!
//! Archives are written to an anonymous temporary file so large backups are
//! never buffered in memory. Size and entry limits are checked before any
//! data is written.

use std::io::{Seek, SeekFrom, Write};
use std::path::{Component, Path, PathBuf};

use thiserror::Error;
use tokio::fs;
use tracing::debug;
use walkdir::WalkDir;
use zip::ZipWriter;
use zip::write::SimpleFileOptions;

#[derive(Error, Debug)]
pub enum ArchiveError {
    #[error("Archive too large: {size} bytes exceeds limit of {limit} bytes")]
    TooLarge { size: u64, limit: u64 },

    #[error("Archive has too many entries: {entries} exceeds limit of {limit}")]
    TooManyEntries { entries: u64, limit: u64 },

    #[error("Nothing to archive at {0}")]
    NotFound(String),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Zip error: {0}")]
    Zip(#[from] zip::result::ZipError),
}

/// Upper bounds for one archive. Zero disables a limit.
#[derive(Debug, Clone, Copy)]
pub struct ArchiveLimits {
    pub max_bytes: u64,
    pub max_entries: u64,
}

/// Build a zip of `target` on a blocking thread.
///
/// A file is stored under its own name; a directory is stored with its name
/// as the top-level folder. Symlinks inside a directory are not followed.
pub async fn create_archive(
    target: PathBuf,
    limits: ArchiveLimits,
) -> Result<(fs::File, u64), ArchiveError> {
    let (file, size) = tokio::task::spawn_blocking(move || build_archive(&target, limits))
        .await
        .map_err(|err| ArchiveError::Io(std::io::Error::other(err.to_string())))??;

    Ok((fs::File::from_std(file), size))
}

/// Name offered for the downloaded archive.
pub fn archive_name(target: &Path) -> String {
    let base = target
        .file_name()
        .map(|n| n.to_string_lossy().to_string())
        .filter(|n| !n.is_empty())
        .unwrap_or_else(|| "backup".to_string());
    format!("{}.zip", base)
}

fn build_archive(target: &Path, limits: ArchiveLimits) -> Result<(std::fs::File, u64), ArchiveError> {
    enforce_limits(target, limits)?;

    let file = tempfile::tempfile()?;
    let mut zip = ZipWriter::new(file);
    let options = SimpleFileOptions::default()
        .compression_method(zip::CompressionMethod::Deflated)
        .unix_permissions(0o644);

    if target.is_file() {
        let name = target
            .file_name()
            .map(|n| n.to_string_lossy().to_string())
            .unwrap_or_else(|| "file".to_string());
        zip.start_file(name, options)?;
        let mut input = std::fs::File::open(target)?;
        std::io::copy(&mut input, &mut zip)?;
    } else {
        let base = target.parent().unwrap_or(target);
        add_directory(&mut zip, base, target, options)?;
    }

    let mut file = zip.finish()?;
    file.flush()?;
    let size = file.seek(SeekFrom::End(0))?;
    file.seek(SeekFrom::Start(0))?;

    debug!("Built archive of {} ({} bytes)", target.display(), size);
    Ok((file, size))
}

fn add_directory<W: Write + Seek>(
    zip: &mut ZipWriter<W>,
    base: &Path,
    dir: &Path,
    options: SimpleFileOptions,
) -> Result<(), ArchiveError> {
    for entry in WalkDir::new(dir).into_iter().filter_map(|e| e.ok()) {
        let entry_path = entry.path();
        let name = entry_name(base, entry_path);
        if name.is_empty() {
            continue;
        }

        if entry.file_type().is_file() {
            zip.start_file(name.as_str(), options)?;
            let mut input = std::fs::File::open(entry_path)?;
            std::io::copy(&mut input, zip)?;
        } else if entry.file_type().is_dir() {
            zip.add_directory(format!("{}/", name), options)?;
        }
    }

    Ok(())
}

/// `/`-joined path of `path` below `base`.
fn entry_name(base: &Path, path: &Path) -> String {
    let Ok(relative) = path.strip_prefix(base) else {
        return String::new();
    };
    relative
        .components()
        .filter_map(|c| match c {
            Component::Normal(part) => Some(part.to_string_lossy().to_string()),
            _ => None,
        })
        .collect::<Vec<_>>()
        .join("/")
}

fn enforce_limits(target: &Path, limits: ArchiveLimits) -> Result<(), ArchiveError> {
    let mut total_bytes = 0u64;
    let mut total_entries = 0u64;

    if target.is_file() {
        return track_entry(target, &mut total_bytes, &mut total_entries, limits);
    }
    if !target.is_dir() {
        return Err(ArchiveError::NotFound(target.display().to_string()));
    }

    for entry in WalkDir::new(target).into_iter().filter_map(|e| e.ok()) {
        if entry.file_type().is_file() {
            track_entry(entry.path(), &mut total_bytes, &mut total_entries, limits)?;
        }
    }
    Ok(())
}

fn track_entry(
    path: &Path,
    total_bytes: &mut u64,
    total_entries: &mut u64,
    limits: ArchiveLimits,
) -> Result<(), ArchiveError> {
    let size = std::fs::metadata(path)?.len();
    *total_entries = total_entries.saturating_add(1);
    *total_bytes = total_bytes.saturating_add(size);

    if limits.max_entries > 0 && *total_entries > limits.max_entries {
        return Err(ArchiveError::TooManyEntries {
            entries: *total_entries,
            limit: limits.max_entries,
        });
    }

    if limits.max_bytes > 0 && *total_bytes > limits.max_bytes {
        return Err(ArchiveError::TooLarge {
            size: *total_bytes,
            limit: limits.max_bytes,
        });
    }

    Ok(())
}
