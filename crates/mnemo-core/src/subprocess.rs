// SPDX-FileCopyrightText: 2026 Mnemo Contributors
// SPDX-License-Identifier: MIT OR Apache-2.0

//! Subprocess registry shared by every provider crate, the stale/orphan
//! reapers in `mnemo-cron`, and the shutdown coordinator (spec §4.6/§4.7).
//!
//! Providers register the child they spawn for a generator call keyed by
//! `session_db_id`. Exactly one entry exists per session at a time -- a
//! provider replaces its own entry across restarts; it does not share one
//! with another provider.

use std::sync::Arc;

use dashmap::DashMap;
use tokio::process::Child;
use tokio::sync::Mutex;
use tokio::time::{Duration, Instant};
use tracing::{debug, warn};

/// A tracked child process, keyed by the owning session's database id.
pub struct ManagedChild {
    pub session_db_id: i64,
    pub provider_name: String,
    pub pid: Option<u32>,
    child: Mutex<Child>,
    spawned_at: Instant,
}

impl ManagedChild {
    pub fn new(session_db_id: i64, provider_name: impl Into<String>, child: Child) -> Self {
        let pid = child.id();
        Self {
            session_db_id,
            provider_name: provider_name.into(),
            pid,
            child: Mutex::new(child),
            spawned_at: Instant::now(),
        }
    }

    pub fn age(&self) -> Duration {
        self.spawned_at.elapsed()
    }

    /// True if the OS process is still alive, without blocking.
    pub async fn is_alive(&self) -> bool {
        let mut guard = self.child.lock().await;
        matches!(guard.try_wait(), Ok(None))
    }

    /// Sends a kill signal and waits up to `bound` for the process to exit.
    /// Returns true if the process was confirmed dead within the bound.
    pub async fn ensure_exit(&self, bound: Duration) -> bool {
        let mut guard = self.child.lock().await;
        if let Ok(Some(_)) = guard.try_wait() {
            return true;
        }
        if let Err(e) = guard.start_kill() {
            debug!(error = %e, pid = ?self.pid, "failed to signal child, it may already be gone");
        }
        match tokio::time::timeout(bound, guard.wait()).await {
            Ok(Ok(_)) => true,
            Ok(Err(e)) => {
                warn!(error = %e, pid = ?self.pid, "error waiting on killed child");
                false
            }
            Err(_) => {
                warn!(pid = ?self.pid, bound_ms = bound.as_millis() as u64, "child did not exit within bound");
                false
            }
        }
    }
}

/// Registry of live provider subprocesses, one entry per active session.
#[derive(Default, Clone)]
pub struct SubprocessRegistry {
    children: Arc<DashMap<i64, Arc<ManagedChild>>>,
}

impl SubprocessRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Registers a freshly spawned child, replacing any prior entry for the
    /// same session (a stale-recovery restart supersedes the old handle;
    /// the caller is responsible for having killed it first).
    pub fn register(&self, session_db_id: i64, provider_name: impl Into<String>, child: Child) -> Arc<ManagedChild> {
        let handle = Arc::new(ManagedChild::new(session_db_id, provider_name, child));
        self.children.insert(session_db_id, handle.clone());
        handle
    }

    pub fn get(&self, session_db_id: i64) -> Option<Arc<ManagedChild>> {
        self.children.get(&session_db_id).map(|e| e.clone())
    }

    pub fn remove(&self, session_db_id: i64) -> Option<Arc<ManagedChild>> {
        self.children.remove(&session_db_id).map(|(_, v)| v)
    }

    /// All session ids with a currently tracked subprocess.
    pub fn tracked_session_ids(&self) -> Vec<i64> {
        self.children.iter().map(|e| *e.key()).collect()
    }

    pub fn len(&self) -> usize {
        self.children.len()
    }

    pub fn is_empty(&self) -> bool {
        self.children.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn spawn_sleep() -> Child {
        tokio::process::Command::new("sleep")
            .arg("5")
            .kill_on_drop(true)
            .spawn()
            .expect("spawn sleep")
    }

    #[tokio::test]
    async fn register_and_lookup_roundtrips() {
        let registry = SubprocessRegistry::new();
        let child = spawn_sleep();
        let handle = registry.register(1, "anthropic", child);
        assert_eq!(handle.session_db_id, 1);
        assert!(registry.get(1).is_some());
        assert_eq!(registry.tracked_session_ids(), vec![1]);
    }

    #[tokio::test]
    async fn ensure_exit_kills_process() {
        let registry = SubprocessRegistry::new();
        let child = spawn_sleep();
        let handle = registry.register(2, "anthropic", child);
        assert!(handle.is_alive().await);
        let exited = handle.ensure_exit(Duration::from_secs(5)).await;
        assert!(exited);
    }

    #[tokio::test]
    async fn remove_drops_entry() {
        let registry = SubprocessRegistry::new();
        let child = spawn_sleep();
        registry.register(3, "anthropic", child);
        assert!(registry.remove(3).is_some());
        assert!(registry.get(3).is_none());
        assert!(registry.is_empty());
    }
}
