//! Job record types.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Lifecycle state of a named job.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "lowercase")]
pub enum JobStatus {
    /// Never launched since process start.
    #[default]
    Idle,
    Running,
    /// Exited with code 0.
    Finished,
    /// Exited nonzero, was killed by a signal, or its output could not be read.
    Errored,
    /// Terminated by a stop request before it exited on its own.
    Stopped,
}

impl JobStatus {
    pub fn is_running(self) -> bool {
        matches!(self, Self::Running)
    }

    pub fn is_terminal(self) -> bool {
        matches!(self, Self::Finished | Self::Errored | Self::Stopped)
    }
}

/// Full state of one job, including captured output.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct JobRecord {
    pub name: String,
    pub status: JobStatus,
    #[serde(default)]
    pub args: Vec<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub pid: Option<u32>,
    pub started_at: Option<DateTime<Utc>>,
    pub ended_at: Option<DateTime<Utc>>,
    pub exit_code: Option<i32>,
    #[serde(default)]
    pub stdout: String,
    #[serde(default)]
    pub stderr: String,
}

impl JobRecord {
    pub(crate) fn running(name: &str, args: Vec<String>, pid: Option<u32>) -> Self {
        Self {
            name: name.to_string(),
            status: JobStatus::Running,
            args,
            pid,
            started_at: Some(Utc::now()),
            ended_at: None,
            exit_code: None,
            stdout: String::new(),
            stderr: String::new(),
        }
    }

    pub fn summary(&self) -> JobSummary {
        JobSummary {
            name: self.name.clone(),
            status: self.status,
            pid: self.pid,
            started_at: self.started_at,
            ended_at: self.ended_at,
            exit_code: self.exit_code,
        }
    }
}

/// A job record without its captured output.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct JobSummary {
    pub name: String,
    pub status: JobStatus,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub pid: Option<u32>,
    pub started_at: Option<DateTime<Utc>>,
    pub ended_at: Option<DateTime<Utc>>,
    pub exit_code: Option<i32>,
}

impl JobSummary {
    pub(crate) fn idle(name: &str) -> Self {
        Self {
            name: name.to_string(),
            status: JobStatus::Idle,
            pid: None,
            started_at: None,
            ended_at: None,
            exit_code: None,
        }
    }
}

/// Running jobs first, then case-insensitive by name.
pub(crate) fn sort_summaries(entries: &mut [JobSummary]) {
    entries.sort_by(|a, b| {
        (!a.status.is_running(), a.name.to_lowercase())
            .cmp(&(!b.status.is_running(), b.name.to_lowercase()))
    });
}
