//! Per-session shell state and command execution.

use std::collections::VecDeque;
use std::path::{Path, PathBuf};
use std::process::Stdio;
use std::time::{Duration, Instant};

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tokio::process::Command;
use tracing::{debug, warn};

use super::command::{ShellKind, TerminalCommand};
use crate::error::{CoreError, Result};
use crate::process::{
    CAPTURE_DRAIN, capture_notes, exit_code, finish_capture, isolate_process_group, kill_tree,
    spawn_capture,
};
use crate::sandbox::Sandbox;

/// Limits applied to every session.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct TerminalConfig {
    /// Hard limit for one shell command.
    pub timeout_secs: u64,
    /// Distinct commands remembered for recall.
    pub command_history_limit: usize,
    /// Output entries kept per session.
    pub output_history_limit: usize,
    /// Maximum bytes captured per output stream.
    pub output_limit_bytes: usize,
    /// Sessions unused for longer than this are dropped.
    pub session_idle_secs: u64,
    /// Shell used when a request does not pick one.
    pub default_shell: ShellKind,
}

impl Default for TerminalConfig {
    fn default() -> Self {
        Self {
            timeout_secs: 60,
            command_history_limit: 20,
            output_history_limit: 50,
            output_limit_bytes: 256 * 1024,
            session_idle_secs: 24 * 60 * 60,
            default_shell: ShellKind::default(),
        }
    }
}

impl TerminalConfig {
    pub fn timeout(&self) -> Duration {
        Duration::from_secs(self.timeout_secs)
    }

    pub fn session_idle(&self) -> Duration {
        Duration::from_secs(self.session_idle_secs)
    }
}

/// Result of one executed line, also stored in the output history.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct CommandOutcome {
    pub command: String,
    pub output: String,
    pub exit_code: i32,
    /// Directory the command ran in.
    pub working_directory: PathBuf,
    /// Session directory once the command finished.
    pub working_directory_after: PathBuf,
    pub executed_at: DateTime<Utc>,
}

/// Read-only copy of a session for rendering.
#[derive(Debug, Clone, Serialize)]
pub struct SessionSnapshot {
    pub working_directory: PathBuf,
    pub command_history: Vec<String>,
    pub output_history: Vec<CommandOutcome>,
}

#[derive(Debug)]
pub struct SessionState {
    working_directory: PathBuf,
    command_history: VecDeque<String>,
    output_history: VecDeque<CommandOutcome>,
    last_active: Instant,
}

impl SessionState {
    pub fn new(root: &Path) -> Self {
        Self {
            working_directory: root.to_path_buf(),
            command_history: VecDeque::new(),
            output_history: VecDeque::new(),
            last_active: Instant::now(),
        }
    }

    pub fn working_directory(&self) -> &Path {
        &self.working_directory
    }

    pub fn last_active(&self) -> Instant {
        self.last_active
    }

    pub fn snapshot(&self) -> SessionSnapshot {
        SessionSnapshot {
            working_directory: self.working_directory.clone(),
            command_history: self.command_history.iter().cloned().collect(),
            output_history: self.output_history.iter().cloned().collect(),
        }
    }

    /// Run one input line in this session.
    ///
    /// Returns `None` for blank input, which leaves the session untouched.
    pub async fn execute(
        &mut self,
        sandbox: &Sandbox,
        line: &str,
        shell: ShellKind,
        config: &TerminalConfig,
    ) -> Option<CommandOutcome> {
        let command = TerminalCommand::parse(line)?;
        self.last_active = Instant::now();

        let ran_in = self.working_directory.clone();
        let (output, code) = match command {
            TerminalCommand::ChangeDirectory { target } => {
                self.change_directory(sandbox, target.as_deref())
            }
            TerminalCommand::Shell { line } => {
                match run_shell(shell, &line, &ran_in, config).await {
                    Ok(result) => result,
                    Err(CoreError::Timeout(limit)) => (
                        format!("Timeout: command exceeded {}s", limit.as_secs()),
                        -1,
                    ),
                    Err(CoreError::ExecutionError(msg)) => {
                        (format!("Execution error: {}", msg), -1)
                    }
                    Err(e) => (format!("Execution error: {}", e), -1),
                }
            }
        };

        let outcome = CommandOutcome {
            command: line.trim().to_string(),
            output,
            exit_code: code,
            working_directory: ran_in,
            working_directory_after: self.working_directory.clone(),
            executed_at: Utc::now(),
        };
        self.record(&outcome, config);
        Some(outcome)
    }

    /// Empty the output history; command recall is kept.
    pub fn clear_output(&mut self) {
        self.output_history.clear();
        self.last_active = Instant::now();
    }

    /// Back to a fresh session at `root`.
    pub fn reset(&mut self, root: &Path) {
        self.working_directory = root.to_path_buf();
        self.command_history.clear();
        self.output_history.clear();
        self.last_active = Instant::now();
    }

    fn change_directory(&mut self, sandbox: &Sandbox, target: Option<&str>) -> (String, i32) {
        let Some(target) = target else {
            self.working_directory = sandbox.root().to_path_buf();
            return (String::new(), 0);
        };

        let target_path = Path::new(target);
        let candidate = if target_path.is_absolute() {
            target_path.to_path_buf()
        } else {
            self.working_directory.join(target_path)
        };

        let denied = || {
            (
                format!("cd: {}: Permission denied (outside sandbox root)", target),
                1,
            )
        };
        let missing = || (format!("cd: {}: No such file or directory", target), 1);

        let confined = match sandbox.confine(&candidate) {
            Ok(path) => path,
            Err(_) => return denied(),
        };
        if !confined.is_dir() {
            return missing();
        }
        // A symlinked directory may point outside the root
        let canonical = match confined.canonicalize() {
            Ok(path) => path,
            Err(_) => return missing(),
        };
        if !canonical.starts_with(sandbox.root()) {
            warn!("cd into symlink leaving the sandbox: {:?}", confined);
            return denied();
        }

        self.working_directory = canonical;
        (String::new(), 0)
    }

    fn record(&mut self, outcome: &CommandOutcome, config: &TerminalConfig) {
        if !self.command_history.contains(&outcome.command) {
            self.command_history.push_back(outcome.command.clone());
            while self.command_history.len() > config.command_history_limit {
                self.command_history.pop_front();
            }
        }

        self.output_history.push_back(outcome.clone());
        while self.output_history.len() > config.output_history_limit {
            self.output_history.pop_front();
        }
    }
}

/// Run a line in `shell`, returning the combined output and exit code.
async fn run_shell(
    shell: ShellKind,
    line: &str,
    cwd: &Path,
    config: &TerminalConfig,
) -> Result<(String, i32)> {
    let argv = shell.argv(line);
    debug!("Executing in {:?}: {:?}", cwd, argv);

    let mut command = Command::new(&argv[0]);
    command
        .args(&argv[1..])
        .current_dir(cwd)
        .stdin(Stdio::null())
        .stdout(Stdio::piped())
        .stderr(Stdio::piped())
        .kill_on_drop(true);
    isolate_process_group(&mut command);

    let mut child = command
        .spawn()
        .map_err(|e| CoreError::ExecutionError(e.to_string()))?;

    let limit = config.output_limit_bytes;
    let stdout_task = spawn_capture(child.stdout.take(), limit);
    let stderr_task = spawn_capture(child.stderr.take(), limit);

    let status = match tokio::time::timeout(config.timeout(), child.wait()).await {
        Ok(status) => status.map_err(|e| CoreError::ExecutionError(e.to_string()))?,
        Err(_) => {
            warn!("Command timed out after {:?}: {}", config.timeout(), line);
            kill_tree(&mut child);
            let _ = child.wait().await;
            if let Some(task) = stdout_task {
                task.abort();
            }
            if let Some(task) = stderr_task {
                task.abort();
            }
            return Err(CoreError::Timeout(config.timeout()));
        }
    };

    let (stdout, stderr) = tokio::join!(
        finish_capture(stdout_task, CAPTURE_DRAIN, limit),
        finish_capture(stderr_task, CAPTURE_DRAIN, limit)
    );
    let mut stderr_text = stderr.text;
    for note in capture_notes(stdout.note, stderr.note) {
        if !stderr_text.is_empty() && !stderr_text.ends_with('\n') {
            stderr_text.push('\n');
        }
        stderr_text.push_str(&note);
    }
    let stderr = stderr_text;

    let mut output = stdout.text;
    if !stderr.is_empty() {
        output.push('\n');
        output.push_str(&stderr);
    }
    Ok((output, exit_code(&status)))
}
