//! Log discovery and tailing below the sandbox root.

use std::io::{Read, Seek, SeekFrom};
use std::path::{Path, PathBuf};
use std::time::UNIX_EPOCH;

use serde::Serialize;
use tracing::warn;
use walkdir::WalkDir;

/// Extensions treated as log files (lowercase, without the dot).
const LOG_EXTENSIONS: [&str; 2] = ["log", "txt"];

/// Block size used when reading a file backwards.
const TAIL_BLOCK: u64 = 4096;

/// A log file found under the root.
#[derive(Debug, Clone, Serialize, PartialEq, Eq)]
pub struct LogFile {
    /// `/`-joined path relative to the root.
    pub path: String,
    pub size: u64,
    /// Modification time in seconds since the epoch.
    pub modified: u64,
}

fn is_log_file(path: &Path) -> bool {
    path.extension()
        .map(|ext| ext.to_string_lossy().to_lowercase())
        .is_some_and(|ext| LOG_EXTENSIONS.contains(&ext.as_str()))
}

fn relative_path(root: &Path, path: &Path) -> Option<String> {
    let relative = path.strip_prefix(root).ok()?;
    let parts: Vec<String> = relative
        .components()
        .map(|c| c.as_os_str().to_string_lossy().to_string())
        .collect();
    Some(parts.join("/"))
}

/// Walk `root` for `.log` and `.txt` files, newest first.
///
/// The walk stops once more than `max_files` candidates were seen, so on very
/// large trees the result covers the part walked first. Symlinks are not
/// followed and unreadable entries are skipped.
pub fn find_log_files(root: &Path, max_files: usize) -> Vec<LogFile> {
    let mut files = Vec::new();

    for entry in WalkDir::new(root).into_iter().filter_map(|e| e.ok()) {
        if !entry.file_type().is_file() || !is_log_file(entry.path()) {
            continue;
        }
        let Ok(metadata) = entry.metadata() else {
            continue;
        };
        let Some(path) = relative_path(root, entry.path()) else {
            continue;
        };
        let modified = metadata
            .modified()
            .ok()
            .and_then(|t| t.duration_since(UNIX_EPOCH).ok())
            .map(|d| d.as_secs())
            .unwrap_or(0);

        files.push(LogFile {
            path,
            size: metadata.len(),
            modified,
        });
        if files.len() > max_files {
            break;
        }
    }

    files.sort_by(|a, b| b.modified.cmp(&a.modified).then_with(|| a.path.cmp(&b.path)));
    files.truncate(max_files);
    files
}

/// Last `lines` lines of a file, decoded lossily.
///
/// Reads backwards in blocks so only the tail of a large file is loaded.
pub fn tail_file(path: &Path, lines: usize) -> std::io::Result<String> {
    let mut file = std::fs::File::open(path)?;
    let mut position = file.seek(SeekFrom::End(0))?;
    let mut data: Vec<u8> = Vec::new();

    while position > 0 && data.iter().filter(|&&b| b == b'\n').count() <= lines {
        let read_size = TAIL_BLOCK.min(position);
        position -= read_size;
        file.seek(SeekFrom::Start(position))?;

        let mut block = vec![0u8; read_size as usize];
        file.read_exact(&mut block)?;
        block.extend_from_slice(&data);
        data = block;
    }

    let text = String::from_utf8_lossy(&data);
    let all: Vec<&str> = text.lines().collect();
    let start = all.len().saturating_sub(lines);
    Ok(all[start..].join("\n"))
}

/// Run [`find_log_files`] on a blocking thread.
pub async fn find_log_files_blocking(root: PathBuf, max_files: usize) -> Vec<LogFile> {
    match tokio::task::spawn_blocking(move || find_log_files(&root, max_files)).await {
        Ok(files) => files,
        Err(e) => {
            warn!("Log file scan failed: {}", e);
            Vec::new()
        }
    }
}

/// Run [`tail_file`] on a blocking thread.
pub async fn tail_file_blocking(path: PathBuf, lines: usize) -> std::io::Result<String> {
    tokio::task::spawn_blocking(move || tail_file(&path, lines))
        .await
        .map_err(|e| std::io::Error::other(e.to_string()))?
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::fs::{File, FileTimes};
    use std::time::{Duration, SystemTime};
    use tempfile::TempDir;

    fn touch(path: &Path, body: &str, age_secs: u64) {
        std::fs::write(path, body).unwrap();
        let when = SystemTime::now() - Duration::from_secs(age_secs);
        File::options()
            .write(true)
            .open(path)
            .unwrap()
            .set_times(FileTimes::new().set_modified(when))
            .unwrap();
    }

    #[test]
    fn test_find_log_files_newest_first() {
        let dir = TempDir::new().unwrap();
        std::fs::create_dir(dir.path().join("app")).unwrap();
        touch(&dir.path().join("old.log"), "a", 300);
        touch(&dir.path().join("app/new.TXT"), "bb", 10);
        touch(&dir.path().join("notes.md"), "c", 0);

        let files = find_log_files(dir.path(), 500);
        let paths: Vec<&str> = files.iter().map(|f| f.path.as_str()).collect();
        assert_eq!(paths, ["app/new.TXT", "old.log"]);
        assert_eq!(files[0].size, 2);
    }

    #[test]
    fn test_find_log_files_is_capped() {
        let dir = TempDir::new().unwrap();
        for i in 0..5 {
            std::fs::write(dir.path().join(format!("{i}.log")), "x").unwrap();
        }
        assert_eq!(find_log_files(dir.path(), 3).len(), 3);
    }

    #[test]
    fn test_tail_file_keeps_last_lines() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("big.log");
        let body: String = (0..5000).map(|i| format!("line {i}\n")).collect();
        std::fs::write(&path, body).unwrap();

        let tail = tail_file(&path, 3).unwrap();
        assert_eq!(tail, "line 4997\nline 4998\nline 4999");
    }

    #[test]
    fn test_tail_file_short_and_empty() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("short.log");
        std::fs::write(&path, "one\ntwo").unwrap();
        assert_eq!(tail_file(&path, 400).unwrap(), "one\ntwo");

        std::fs::write(&path, "").unwrap();
        assert_eq!(tail_file(&path, 400).unwrap(), "");
    }
}
