// SPDX-FileCopyrightText: 2026 Mnemo Contributors
// SPDX-License-Identifier: MIT OR Apache-2.0

//! Periodic orphan-subprocess and stale-session reapers (spec §4.6).
//!
//! Both reapers are independent periodic tasks sharing the worker's
//! shutdown [`CancellationToken`] (spec §4.7 step 1: "stop orphan and
//! stale-session reapers" happens before anything else tears down).

use std::sync::Arc;
use std::time::Duration;

use mnemo_core::subprocess::SubprocessRegistry;
use mnemo_session::SessionManager;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

const ORPHAN_REAP_INTERVAL: Duration = Duration::from_secs(5 * 60);
const STALE_SESSION_REAP_INTERVAL: Duration = Duration::from_secs(2 * 60);
const SUBPROCESS_EXIT_BOUND: Duration = Duration::from_secs(5);

/// Kills any subprocess in `registry` whose owning session is no longer in
/// `manager`'s active-session map. A session lingering in memory makes
/// this a no-op for its subprocess -- which is exactly why the
/// stale-session reaper runs more frequently and is the thing that
/// actually unblocks this one (spec §4.6).
pub async fn reap_orphan_subprocesses(manager: &Arc<SessionManager>, registry: &SubprocessRegistry) {
    let active: std::collections::HashSet<i64> = manager.active_session_ids().into_iter().collect();
    let tracked = registry.tracked_session_ids();
    let mut reaped = 0u32;

    for session_db_id in tracked {
        if active.contains(&session_db_id) {
            continue;
        }
        let Some(child) = registry.get(session_db_id) else { continue };
        debug!(session_db_id, pid = ?child.pid, "reaping orphaned subprocess");
        if !child.ensure_exit(SUBPROCESS_EXIT_BOUND).await {
            warn!(session_db_id, "orphan subprocess did not exit within 5s bound");
        }
        registry.remove(session_db_id);
        reaped += 1;
    }

    if reaped > 0 {
        info!(reaped, "orphan reaper: subprocesses reclaimed");
    }
}

/// Spawns the two periodic reaper tasks described in spec §4.6, returning
/// their join handles so the caller can await them after cancellation.
pub fn spawn_reapers(
    manager: Arc<SessionManager>,
    registry: SubprocessRegistry,
    cancellation: CancellationToken,
) -> Vec<JoinHandle<()>> {
    let orphan_manager = manager.clone();
    let orphan_registry = registry.clone();
    let orphan_cancellation = cancellation.clone();
    let orphan_handle = tokio::spawn(async move {
        let mut ticker = tokio::time::interval(ORPHAN_REAP_INTERVAL);
        ticker.tick().await; // first tick fires immediately; skip it
        loop {
            tokio::select! {
                _ = orphan_cancellation.cancelled() => {
                    debug!("orphan reaper stopping");
                    break;
                }
                _ = ticker.tick() => {
                    reap_orphan_subprocesses(&orphan_manager, &orphan_registry).await;
                }
            }
        }
    });

    let stale_manager = manager;
    let stale_cancellation = cancellation;
    let stale_handle = tokio::spawn(async move {
        let mut ticker = tokio::time::interval(STALE_SESSION_REAP_INTERVAL);
        ticker.tick().await;
        loop {
            tokio::select! {
                _ = stale_cancellation.cancelled() => {
                    debug!("stale-session reaper stopping");
                    break;
                }
                _ = ticker.tick() => {
                    stale_manager.reap_stale_sessions().await;
                }
            }
        }
    });

    vec![orphan_handle, stale_handle]
}

#[cfg(test)]
mod tests {
    use super::*;
    use mnemo_session::{NullSink, SessionManager};
    use mnemo_storage::SqliteStorage;
    use tempfile::tempdir;

    async fn test_manager() -> (Arc<SessionManager>, tempfile::TempDir) {
        let dir = tempdir().unwrap();
        let storage = SqliteStorage::new(dir.path().join("t.db").to_str().unwrap());
        storage.initialize().await.unwrap();
        let manager = Arc::new(SessionManager::new(
            Arc::new(storage),
            Arc::new(NullSink),
            SubprocessRegistry::new(),
        ));
        (manager, dir)
    }

    #[tokio::test]
    async fn reap_orphan_subprocesses_kills_untracked_session_children() {
        let (manager, _dir) = test_manager().await;
        let registry = SubprocessRegistry::new();
        let child = tokio::process::Command::new("sleep")
            .arg("5")
            .kill_on_drop(true)
            .spawn()
            .unwrap();
        registry.register(999, "anthropic", child);

        reap_orphan_subprocesses(&manager, &registry).await;

        assert!(registry.get(999).is_none());
    }

    #[tokio::test]
    async fn reap_orphan_subprocesses_skips_active_sessions() {
        let (manager, _dir) = test_manager().await;
        let (row, _active, _created) = manager.initialize_session("c1", "proj", None).await.unwrap();
        let registry = SubprocessRegistry::new();
        let child = tokio::process::Command::new("sleep")
            .arg("5")
            .kill_on_drop(true)
            .spawn()
            .unwrap();
        registry.register(row.session_db_id, "anthropic", child);

        reap_orphan_subprocesses(&manager, &registry).await;

        assert!(registry.get(row.session_db_id).is_some());
    }

    #[tokio::test]
    async fn spawn_reapers_stops_on_cancellation() {
        let (manager, _dir) = test_manager().await;
        let registry = SubprocessRegistry::new();
        let cancellation = CancellationToken::new();
        let handles = spawn_reapers(manager, registry, cancellation.clone());
        cancellation.cancel();
        for handle in handles {
            tokio::time::timeout(Duration::from_secs(5), handle).await.unwrap().unwrap();
        }
    }
}
