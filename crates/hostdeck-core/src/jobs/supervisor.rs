//! Background job supervision.
//!
//! A job is a script from the scripts directory launched without waiting for
//! it. Each launch spawns one watcher task that owns the child process for its
//! whole life: it drains output, waits for exit or a stop request, and then
//! performs the only transition out of `Running`. Stop requests are messages
//! to the watcher, so the process handle is never shared.
//!
//! The job table holds both the public record and the private active handle
//! for each name under a single mutex. Launch checks-and-inserts, the watcher
//! finalizes, and stop signals, all under that lock.

use std::collections::HashMap;
use std::path::Path;
use std::process::Stdio;
use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Duration;

use chrono::Utc;
use serde::{Deserialize, Serialize};
use tokio::process::{Child, Command};
use tokio::sync::{Mutex, oneshot, watch};
use tokio::task::JoinSet;
use tracing::{debug, error, info, warn};

use super::launcher::{Interpreters, ScriptKind};
use super::models::{JobRecord, JobStatus, JobSummary, sort_summaries};
use crate::error::{CoreError, Result};
use crate::process::{
    CAPTURE_DRAIN, capture_notes, describe_exit, exit_code, finish_capture,
    isolate_process_group, spawn_capture, terminate,
};
use crate::sandbox::{Sandbox, sanitize_filename};

/// Tunables for job execution.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct SupervisorConfig {
    /// Time between SIGTERM and SIGKILL when stopping a job.
    pub stop_grace_ms: u64,
    /// Maximum bytes kept per output stream (tail is kept).
    pub output_limit_bytes: usize,
    /// Interpreter used for each script type.
    pub interpreters: Interpreters,
}

impl Default for SupervisorConfig {
    fn default() -> Self {
        Self {
            stop_grace_ms: 2000,
            output_limit_bytes: 1024 * 1024,
            interpreters: Interpreters::default(),
        }
    }
}

impl SupervisorConfig {
    fn stop_grace(&self) -> Duration {
        Duration::from_millis(self.stop_grace_ms)
    }
}

/// Handle to a job whose watcher is still alive.
#[derive(Debug)]
struct ActiveJob {
    /// Distinguishes successive launches of the same name.
    generation: u64,
    /// Taken by the first stop request.
    stop_tx: Option<oneshot::Sender<()>>,
    /// Flips to true once the watcher has finalized the record.
    done_rx: watch::Receiver<bool>,
}

#[derive(Debug)]
struct JobEntry {
    record: JobRecord,
    active: Option<ActiveJob>,
}

/// What the watcher observed by the time the process was gone.
#[derive(Debug)]
struct Outcome {
    status: JobStatus,
    exit_code: Option<i32>,
    stdout: String,
    stderr: String,
}

impl Outcome {
    fn crashed(reason: String) -> Self {
        Self {
            status: JobStatus::Errored,
            exit_code: None,
            stdout: String::new(),
            stderr: reason,
        }
    }
}

/// Launches scripts as detached jobs and tracks them by name.
///
/// Cloning is cheap; all clones share the same job table.
#[derive(Debug, Clone)]
pub struct JobSupervisor {
    scripts: Sandbox,
    config: Arc<SupervisorConfig>,
    jobs: Arc<Mutex<HashMap<String, JobEntry>>>,
    generation: Arc<AtomicU64>,
}

impl JobSupervisor {
    /// Create a supervisor for the given scripts directory, creating it if needed.
    pub fn new(scripts_dir: impl AsRef<Path>, config: SupervisorConfig) -> Result<Self> {
        let scripts_dir = scripts_dir.as_ref();
        std::fs::create_dir_all(scripts_dir)?;
        let scripts = Sandbox::new(scripts_dir)?;
        info!("Scripts directory: {}", scripts.root().display());

        Ok(Self {
            scripts,
            config: Arc::new(config),
            jobs: Arc::new(Mutex::new(HashMap::new())),
            generation: Arc::new(AtomicU64::new(1)),
        })
    }

    pub fn scripts_dir(&self) -> &Path {
        self.scripts.root()
    }

    /// Launch a script and return immediately with its `Running` record.
    ///
    /// Fails without touching the job table when the script is missing, has an
    /// unsupported extension, is already running, or cannot be spawned.
    pub async fn launch(&self, name: &str, args: Vec<String>) -> Result<JobRecord> {
        let name = sanitize_filename(name.trim())
            .ok_or_else(|| CoreError::InvalidName(name.to_string()))?;
        let path = self.scripts.resolve_existing(&name)?;
        if !path.is_file() {
            return Err(CoreError::NotFound(name));
        }
        let kind = ScriptKind::from_path(&path)?;
        let argv = self.config.interpreters.argv(kind, &path, &args);

        let mut jobs = self.jobs.lock().await;
        if jobs
            .get(&name)
            .is_some_and(|entry| entry.record.status.is_running())
        {
            debug!("Rejecting launch of {}: already running", name);
            return Err(CoreError::AlreadyRunning(name));
        }

        let mut command = Command::new(&argv[0]);
        command
            .args(&argv[1..])
            .current_dir(self.scripts.root())
            .stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .kill_on_drop(true);
        isolate_process_group(&mut command);

        let child = command.spawn().map_err(|source| {
            warn!("Failed to launch {} ({:?}): {}", name, argv, source);
            CoreError::LaunchFailed {
                name: name.clone(),
                source,
            }
        })?;

        let generation = self.generation.fetch_add(1, Ordering::Relaxed);
        let (stop_tx, stop_rx) = oneshot::channel();
        let (done_tx, done_rx) = watch::channel(false);
        let record = JobRecord::running(&name, args, child.id());

        jobs.insert(
            name.clone(),
            JobEntry {
                record: record.clone(),
                active: Some(ActiveJob {
                    generation,
                    stop_tx: Some(stop_tx),
                    done_rx,
                }),
            },
        );
        drop(jobs);

        info!(
            job = %name,
            pid = ?record.pid,
            generation,
            "Launched job: {}",
            argv.join(" ")
        );

        let table = self.jobs.clone();
        let config = self.config.clone();
        tokio::spawn(async move {
            let watcher = tokio::spawn(supervise(child, stop_rx, config));
            let outcome = match watcher.await {
                Ok(outcome) => outcome,
                Err(e) => {
                    error!(job = %name, "Job watcher failed: {}", e);
                    Outcome::crashed(format!("job watcher failed: {}", e))
                }
            };
            finalize(&table, &name, generation, outcome).await;
            let _ = done_tx.send(true);
        });

        Ok(record)
    }

    /// Stop a running job and return its final record.
    ///
    /// Sends SIGTERM to the job's process group, escalating to SIGKILL after
    /// the grace period. If the process exits on its own first, its natural
    /// terminal state is kept.
    pub async fn stop(&self, name: &str) -> Result<JobRecord> {
        let mut done_rx = {
            let mut jobs = self.jobs.lock().await;
            let Some(active) = jobs.get_mut(name).and_then(|entry| entry.active.as_mut()) else {
                return Err(CoreError::NotRunning(name.to_string()));
            };
            if let Some(stop_tx) = active.stop_tx.take() {
                info!(job = %name, "Stop requested");
                let _ = stop_tx.send(());
            }
            active.done_rx.clone()
        };

        if done_rx.wait_for(|done| *done).await.is_err() {
            warn!(job = %name, "Watcher went away before finalizing");
        }

        self.status(name).await
    }

    /// Stop every running job. Used on shutdown.
    pub async fn stop_all(&self) {
        let running: Vec<String> = {
            let jobs = self.jobs.lock().await;
            jobs.iter()
                .filter(|(_, entry)| entry.active.is_some())
                .map(|(name, _)| name.clone())
                .collect()
        };

        if running.is_empty() {
            return;
        }
        info!("Stopping {} running jobs", running.len());

        let mut set = JoinSet::new();
        for name in running {
            let supervisor = self.clone();
            set.spawn(async move {
                if let Err(e) = supervisor.stop(&name).await {
                    debug!(job = %name, "Stop during shutdown: {}", e);
                }
            });
        }
        while set.join_next().await.is_some() {}
    }

    /// Current record for a job, including captured output.
    pub async fn status(&self, name: &str) -> Result<JobRecord> {
        let jobs = self.jobs.lock().await;
        jobs.get(name)
            .map(|entry| entry.record.clone())
            .ok_or_else(|| CoreError::NotFound(name.to_string()))
    }

    /// Summaries of every job launched since start; running first, then by name.
    pub async fn list(&self) -> Vec<JobSummary> {
        let mut entries: Vec<JobSummary> = {
            let jobs = self.jobs.lock().await;
            jobs.values().map(|entry| entry.record.summary()).collect()
        };
        sort_summaries(&mut entries);
        entries
    }

    /// Every launchable script on disk merged with its job state.
    ///
    /// Scripts never launched are reported as `Idle`. Jobs whose file was
    /// removed after launch are still listed.
    pub async fn catalog(&self) -> Result<Vec<JobSummary>> {
        let mut names = Vec::new();
        let mut dir = tokio::fs::read_dir(self.scripts.root()).await?;
        while let Some(entry) = dir.next_entry().await? {
            let path = entry.path();
            if entry.file_type().await?.is_file() && ScriptKind::is_supported(&path) {
                names.push(entry.file_name().to_string_lossy().to_string());
            }
        }

        let mut entries = {
            let jobs = self.jobs.lock().await;
            let mut entries: Vec<JobSummary> = names
                .iter()
                .map(|name| {
                    jobs.get(name)
                        .map(|entry| entry.record.summary())
                        .unwrap_or_else(|| JobSummary::idle(name))
                })
                .collect();
            entries.extend(
                jobs.iter()
                    .filter(|(name, _)| !names.contains(name))
                    .map(|(_, entry)| entry.record.summary()),
            );
            entries
        };
        sort_summaries(&mut entries);
        Ok(entries)
    }

    /// Write an uploaded script into the scripts directory.
    ///
    /// Returns the sanitized file name actually used.
    pub async fn install_script(&self, file_name: &str, contents: &[u8]) -> Result<String> {
        let name = sanitize_filename(file_name)
            .ok_or_else(|| CoreError::InvalidName(file_name.to_string()))?;
        ScriptKind::from_path(Path::new(&name))?;
        let path = self.scripts.resolve_existing(&name)?;

        let jobs = self.jobs.lock().await;
        if jobs
            .get(&name)
            .is_some_and(|entry| entry.record.status.is_running())
        {
            return Err(CoreError::AlreadyRunning(name));
        }
        if path.is_dir() {
            return Err(CoreError::InvalidName(name));
        }
        tokio::fs::write(&path, contents).await?;
        drop(jobs);

        info!("Installed script {} ({} bytes)", name, contents.len());
        Ok(name)
    }
}

/// Watcher body: owns the child until it is gone.
async fn supervise(
    mut child: Child,
    mut stop_rx: oneshot::Receiver<()>,
    config: Arc<SupervisorConfig>,
) -> Outcome {
    let limit = config.output_limit_bytes;
    let stdout_task = spawn_capture(child.stdout.take(), limit);
    let stderr_task = spawn_capture(child.stderr.take(), limit);

    let (wait_result, stopped) = tokio::select! {
        biased;
        status = child.wait() => (status, false),
        Ok(()) = &mut stop_rx => (terminate(&mut child, config.stop_grace()).await, true),
    };

    let (out, err) = tokio::join!(
        finish_capture(stdout_task, CAPTURE_DRAIN, limit),
        finish_capture(stderr_task, CAPTURE_DRAIN, limit)
    );

    // A held-open pipe only adds a note; the exit status still decides.
    let read_failed = out.failed || err.failed;
    let stdout = out.text;
    let mut stderr = err.text;
    for note in capture_notes(out.note, err.note) {
        append_line(&mut stderr, &note);
    }

    match wait_result {
        Ok(status) => {
            debug!("Job process {}", describe_exit(&status));
            let job_status = if stopped {
                JobStatus::Stopped
            } else if status.success() && !read_failed {
                JobStatus::Finished
            } else {
                JobStatus::Errored
            };
            Outcome {
                status: job_status,
                exit_code: Some(exit_code(&status)),
                stdout,
                stderr,
            }
        }
        Err(e) => {
            append_line(&mut stderr, &format!("failed to wait for process: {}", e));
            Outcome {
                status: if stopped {
                    JobStatus::Stopped
                } else {
                    JobStatus::Errored
                },
                exit_code: None,
                stdout,
                stderr,
            }
        }
    }
}

/// Apply a watcher outcome to the shared record.
///
/// Only the launch that produced the outcome may finalize, and only once.
async fn finalize(
    table: &Mutex<HashMap<String, JobEntry>>,
    name: &str,
    generation: u64,
    outcome: Outcome,
) {
    let mut jobs = table.lock().await;
    let Some(entry) = jobs.get_mut(name) else {
        warn!(job = %name, "Finalizing job with no record");
        return;
    };

    let current = entry.active.as_ref().map(|active| active.generation);
    if current != Some(generation) || !entry.record.status.is_running() {
        warn!(
            job = %name,
            generation,
            "Ignoring stale watcher outcome (current generation {:?})",
            current
        );
        return;
    }

    let record = &mut entry.record;
    record.status = outcome.status;
    record.exit_code = outcome.exit_code;
    record.stdout = outcome.stdout;
    record.stderr = outcome.stderr;
    record.ended_at = Some(Utc::now());
    entry.active = None;

    info!(
        job = %name,
        status = ?record.status,
        exit_code = ?record.exit_code,
        "Job finished"
    );
}

fn append_line(buffer: &mut String, line: &str) {
    if !buffer.is_empty() && !buffer.ends_with('\n') {
        buffer.push('\n');
    }
    buffer.push_str(line);
}
