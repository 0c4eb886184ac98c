//! Maps a script's extension to the interpreter invocation that runs it.
//!
//! The script path and its arguments are always passed as separate argv
//! entries; nothing here is ever handed to a shell as a single string.

use std::path::Path;

use serde::{Deserialize, Serialize};

use crate::error::{CoreError, Result};

/// Script types that can be launched as jobs.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ScriptKind {
    Python,
    Shell,
    Batch,
    PowerShell,
}

impl ScriptKind {
    pub const EXTENSIONS: [&'static str; 4] = [".py", ".sh", ".bat", ".ps1"];

    /// Classify a path by extension (case-insensitive).
    pub fn from_path(path: &Path) -> Result<Self> {
        let ext = path
            .extension()
            .map(|e| e.to_string_lossy().to_ascii_lowercase())
            .unwrap_or_default();
        match ext.as_str() {
            "py" => Ok(Self::Python),
            "sh" => Ok(Self::Shell),
            "bat" => Ok(Self::Batch),
            "ps1" => Ok(Self::PowerShell),
            _ => Err(CoreError::UnsupportedExtension(
                path.file_name()
                    .map(|n| n.to_string_lossy().to_string())
                    .unwrap_or_default(),
            )),
        }
    }

    pub fn is_supported(path: &Path) -> bool {
        Self::from_path(path).is_ok()
    }
}

/// Interpreter binaries used to run each script type.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct Interpreters {
    pub python: String,
    pub shell: String,
    pub batch: String,
    pub powershell: String,
}

impl Default for Interpreters {
    fn default() -> Self {
        Self {
            python: if cfg!(windows) { "python" } else { "python3" }.to_string(),
            shell: if cfg!(windows) { "bash" } else { "sh" }.to_string(),
            batch: "cmd".to_string(),
            powershell: "powershell".to_string(),
        }
    }
}

impl Interpreters {
    /// Build the full argument vector: program first, then its arguments.
    pub fn argv(&self, kind: ScriptKind, script: &Path, args: &[String]) -> Vec<String> {
        let script = script.display().to_string();
        let mut argv = match kind {
            ScriptKind::Python => vec![self.python.clone(), "-u".to_string(), script],
            ScriptKind::Shell => vec![self.shell.clone(), script],
            ScriptKind::Batch => vec![self.batch.clone(), "/c".to_string(), script],
            ScriptKind::PowerShell => vec![
                self.powershell.clone(),
                "-ExecutionPolicy".to_string(),
                "Bypass".to_string(),
                "-File".to_string(),
                script,
            ],
        };
        argv.extend(args.iter().cloned());
        argv
    }
}

/// Split a free-form argument line on whitespace.
pub fn split_args(line: &str) -> Vec<String> {
    line.split_whitespace().map(str::to_string).collect()
}
