//! Application state shared across handlers.

use std::sync::Arc;

use anyhow::{Context, Result};
use tracing::info;

use hostdeck_core::{JobSupervisor, Sandbox, SessionStore};

use crate::config::AppConfig;

/// Everything a handler may touch. Cloned per request.
#[derive(Clone)]
pub struct AppState {
    /// Confinement for file routes and terminal sessions.
    pub sandbox: Sandbox,
    /// Background jobs launched from the scripts directory.
    pub jobs: JobSupervisor,
    /// Per-browser terminal sessions.
    pub terminals: SessionStore,
    pub config: Arc<AppConfig>,
}

impl AppState {
    /// Build state from configuration. The sandbox root must already exist;
    /// the scripts directory is created if missing.
    pub fn new(config: AppConfig) -> Result<Self> {
        let root = config.sandbox.root_path()?;
        let sandbox = Sandbox::new(&root)
            .with_context(|| format!("opening sandbox root {}", root.display()))?;
        let scripts_dir = config.sandbox.scripts_path()?;
        let jobs = JobSupervisor::new(&scripts_dir, config.jobs.clone())
            .with_context(|| format!("opening scripts directory {}", scripts_dir.display()))?;
        let terminals = SessionStore::new(sandbox.clone(), config.terminal.clone());

        info!("Sandbox root: {}", sandbox.root().display());

        Ok(Self {
            sandbox,
            jobs,
            terminals,
            config: Arc::new(config),
        })
    }
}
