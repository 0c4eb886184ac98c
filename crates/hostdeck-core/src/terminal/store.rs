//! Shared registry of terminal sessions keyed by session id.

use std::sync::Arc;
use std::time::Duration;

use dashmap::DashMap;
use tokio::sync::{Mutex, OwnedMutexGuard};
use tracing::{debug, info};

use super::command::ShellKind;
use super::session::{CommandOutcome, SessionSnapshot, SessionState, TerminalConfig};
use crate::sandbox::Sandbox;

/// All terminal sessions of the process.
///
/// Each session sits behind its own async mutex, held for the whole of a
/// command so one session's commands run one at a time. The map itself is
/// only locked long enough to clone a session handle out of it.
#[derive(Debug, Clone)]
pub struct SessionStore {
    sandbox: Sandbox,
    config: Arc<TerminalConfig>,
    sessions: Arc<DashMap<String, Arc<Mutex<SessionState>>>>,
}

impl SessionStore {
    pub fn new(sandbox: Sandbox, config: TerminalConfig) -> Self {
        Self {
            sandbox,
            config: Arc::new(config),
            sessions: Arc::new(DashMap::new()),
        }
    }

    pub fn config(&self) -> &TerminalConfig {
        &self.config
    }

    pub fn sandbox(&self) -> &Sandbox {
        &self.sandbox
    }

    /// Number of live sessions.
    pub fn len(&self) -> usize {
        self.sessions.len()
    }

    pub fn is_empty(&self) -> bool {
        self.sessions.is_empty()
    }

    fn session(&self, key: &str) -> Arc<Mutex<SessionState>> {
        if let Some(session) = self.sessions.get(key) {
            return session.value().clone();
        }
        self.sessions
            .entry(key.to_string())
            .or_insert_with(|| {
                debug!("Creating terminal session {}", key);
                Arc::new(Mutex::new(SessionState::new(self.sandbox.root())))
            })
            .value()
            .clone()
    }

    /// Lock the session registered under `key`, creating it if needed.
    async fn lock_session(&self, key: &str) -> OwnedMutexGuard<SessionState> {
        self.lock_registered(key, self.session(key)).await
    }

    /// Lock `session`, falling back to a fresh lookup if it was pruned from
    /// the map between the lookup and the lock.
    async fn lock_registered(
        &self,
        key: &str,
        mut session: Arc<Mutex<SessionState>>,
    ) -> OwnedMutexGuard<SessionState> {
        loop {
            let guard = session.clone().lock_owned().await;
            let registered = self
                .sessions
                .get(key)
                .is_some_and(|current| Arc::ptr_eq(current.value(), &session));
            if registered {
                return guard;
            }
            debug!("Terminal session {} was pruned before use, reopening", key);
            drop(guard);
            session = self.session(key);
        }
    }

    /// Run a line in the given session with `shell` (or the configured default).
    pub async fn execute(
        &self,
        key: &str,
        line: &str,
        shell: Option<ShellKind>,
    ) -> Option<CommandOutcome> {
        let shell = shell.unwrap_or(self.config.default_shell);
        let mut state = self.lock_session(key).await;
        state.execute(&self.sandbox, line, shell, &self.config).await
    }

    pub async fn clear(&self, key: &str) {
        self.lock_session(key).await.clear_output();
    }

    pub async fn reset(&self, key: &str) -> SessionSnapshot {
        let mut state = self.lock_session(key).await;
        state.reset(self.sandbox.root());
        state.snapshot()
    }

    pub async fn snapshot(&self, key: &str) -> SessionSnapshot {
        self.lock_session(key).await.snapshot()
    }

    /// Drop sessions unused for longer than `max_idle`. Busy sessions are kept.
    pub fn prune_idle(&self, max_idle: Duration) -> usize {
        let before = self.sessions.len();
        self.sessions.retain(|_, session| match session.try_lock() {
            Ok(state) => state.last_active().elapsed() <= max_idle,
            Err(_) => true,
        });
        let removed = before.saturating_sub(self.sessions.len());
        if removed > 0 {
            info!("Pruned {} idle terminal sessions", removed);
        }
        removed
    }
}
