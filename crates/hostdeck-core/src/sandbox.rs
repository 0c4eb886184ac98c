//! Path confinement.
//!
//! Every path that reaches the filesystem from a request, a script name or a
//! terminal `cd` goes through a [`Sandbox`]. Resolution is lexical: segments
//! are joined onto the root, `.` is dropped and `..` pops a component, and the
//! result must equal the root or descend from it component by component.
//! [`Sandbox::resolve_existing`] additionally canonicalizes existing targets so
//! a symlink inside the root cannot be used to reach outside it.

use std::path::{Component, Path, PathBuf};

use tracing::{error, warn};

use crate::error::{CoreError, Result};

/// A fixed directory that confined paths may never leave.
#[derive(Debug, Clone)]
pub struct Sandbox {
    root: PathBuf,
}

impl Sandbox {
    /// Create a sandbox rooted at an existing directory.
    ///
    /// The root is canonicalized once so later prefix comparisons are made
    /// against the same spelling the OS reports for descendants.
    pub fn new(root: impl AsRef<Path>) -> Result<Self> {
        let root = root.as_ref();
        let canonical = root
            .canonicalize()
            .map_err(|_| CoreError::NotFound(root.display().to_string()))?;
        if !canonical.is_dir() {
            return Err(CoreError::NotFound(format!(
                "{} is not a directory",
                root.display()
            )));
        }
        Ok(Self { root: canonical })
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    /// Resolve a single relative path against the root.
    pub fn resolve(&self, relative: &str) -> Result<PathBuf> {
        self.resolve_segments([relative])
    }

    /// Resolve several relative segments, joined in order, against the root.
    ///
    /// A leading `/` on a segment is stripped rather than treated as absolute,
    /// so `"/sub/file"` means `<root>/sub/file`. The empty path and `"."` both
    /// resolve to the root itself.
    pub fn resolve_segments<I, S>(&self, segments: I) -> Result<PathBuf>
    where
        I: IntoIterator<Item = S>,
        S: AsRef<str>,
    {
        let mut candidate = self.root.clone();
        for segment in segments {
            let segment = segment.as_ref();
            if segment.contains('\0') {
                warn!("Path segment contains null byte: {:?}", segment);
                return Err(CoreError::PathEscape);
            }
            let segment = segment.trim_start_matches(['/', '\\']);
            if !segment.is_empty() {
                candidate.push(segment);
            }
        }
        self.confine(&candidate)
    }

    /// Check an absolute candidate path, returning its normalized form.
    ///
    /// Relative candidates are interpreted against the root.
    pub fn confine(&self, candidate: &Path) -> Result<PathBuf> {
        let joined = if candidate.is_absolute() {
            candidate.to_path_buf()
        } else {
            self.root.join(candidate)
        };
        let normalized = normalize_lexically(&joined);

        if !normalized.starts_with(&self.root) {
            warn!(
                "Path escape attempt: {:?} resolves outside {:?}",
                candidate, self.root
            );
            return Err(CoreError::PathEscape);
        }

        Ok(normalized)
    }

    /// Resolve a path and, if it exists, verify its canonical form is still
    /// inside the root. For paths that do not exist yet (uploads) the parent
    /// directory is verified instead.
    pub fn resolve_existing(&self, relative: &str) -> Result<PathBuf> {
        let built = self.resolve(relative)?;

        if built.exists() {
            let canonical = built.canonicalize()?;
            if !canonical.starts_with(&self.root) {
                warn!(
                    "Symlink escape attempt: {:?} resolved to {:?} which is outside {:?}",
                    built, canonical, self.root
                );
                return Err(CoreError::PathEscape);
            }
            return Ok(canonical);
        }

        if let Some(parent) = built.parent()
            && parent.exists()
        {
            let canonical_parent = parent.canonicalize()?;
            if !canonical_parent.starts_with(&self.root) {
                warn!(
                    "Parent directory escape: {:?} parent resolved outside root",
                    built
                );
                return Err(CoreError::PathEscape);
            }
        }

        Ok(built)
    }

    /// Path relative to the root, `/`-separated. Empty for the root itself.
    pub fn relative_display(&self, full_path: &Path) -> String {
        let Ok(relative) = full_path.strip_prefix(&self.root) else {
            error!("Path {:?} is not under root {:?}", full_path, self.root);
            return String::new();
        };

        let mut parts = Vec::new();
        for component in relative.components() {
            if let Component::Normal(part) = component {
                parts.push(part.to_string_lossy().to_string());
            }
        }

        parts.join("/")
    }
}

/// Resolve `.` and `..` without touching the filesystem.
///
/// `..` at the filesystem root stays at the root, mirroring how the OS treats
/// `/..`.
pub fn normalize_lexically(path: &Path) -> PathBuf {
    let mut out = PathBuf::new();
    for component in path.components() {
        match component {
            Component::Prefix(_) | Component::RootDir => out.push(component.as_os_str()),
            Component::CurDir => {}
            Component::ParentDir => {
                out.pop();
            }
            Component::Normal(name) => out.push(name),
        }
    }
    out
}

/// Sanitize a filename by removing dangerous characters and path components.
/// Returns None if the filename is invalid or empty after sanitization.
pub fn sanitize_filename(filename: &str) -> Option<String> {
    if filename.is_empty() {
        return None;
    }

    let sanitized: String = filename
        .chars()
        .filter(|c| !c.is_control())
        .map(|c| match c {
            '/' | '\\' | ':' | '*' | '?' | '"' | '<' | '>' | '|' => '_',
            _ => c,
        })
        .collect();

    // Leading/trailing dots and spaces (Windows compatibility + hidden traversal)
    let sanitized = sanitized.trim_matches(|c| c == '.' || c == ' ');
    if sanitized.is_empty() {
        return None;
    }

    let upper = sanitized.to_uppercase();
    let stem = upper.split('.').next().unwrap_or_default();
    let reserved = [
        "CON", "PRN", "AUX", "NUL", "COM1", "COM2", "COM3", "COM4", "COM5", "COM6", "COM7",
        "COM8", "COM9", "LPT1", "LPT2", "LPT3", "LPT4", "LPT5", "LPT6", "LPT7", "LPT8", "LPT9",
    ];
    if reserved.contains(&stem) {
        return None;
    }

    if sanitized.len() > 255 {
        let mut end = 255;
        while !sanitized.is_char_boundary(end) {
            end -= 1;
        }
        return Some(sanitized[..end].to_string());
    }

    Some(sanitized.to_string())
}
