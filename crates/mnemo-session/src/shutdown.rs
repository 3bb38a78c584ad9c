// SPDX-FileCopyrightText: 2026 Mnemo Contributors
// SPDX-License-Identifier: MIT OR Apache-2.0

//! Graceful shutdown coordination (spec §4.7).
//!
//! The eight-step ordering in [`ShutdownCoordinator::shutdown`] matters:
//! cron stops spawning new reaper work before the HTTP surface stops
//! accepting requests, sessions are torn down before storage closes, and
//! subprocesses are confirmed dead only after storage has flushed (so a
//! provider crash mid-flush can't race the checkpoint).

use std::path::PathBuf;
use std::sync::Arc;

use mnemo_config::model::RuntimeMode;
use mnemo_core::traits::StorageAdapter;
use mnemo_core::SubprocessRegistry;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use crate::manager::SessionManager;

/// Windows holds a brief grace period after releasing a listening socket
/// before the OS allows a rebind (spec §4.7 "Windows port-reuse delay").
#[cfg(windows)]
const PORT_REUSE_DELAY: std::time::Duration = std::time::Duration::from_millis(500);

/// Bound on waiting for a tracked subprocess to exit during the final
/// sweep.
const SUBPROCESS_EXIT_BOUND: std::time::Duration = std::time::Duration::from_secs(5);

/// Orchestrates the ordered shutdown sequence (spec §4.7).
pub struct ShutdownCoordinator {
    pub cron_cancellation: CancellationToken,
    pub http_cancellation: CancellationToken,
    pub manager: Arc<SessionManager>,
    pub storage: Arc<dyn StorageAdapter>,
    pub subprocess_registry: SubprocessRegistry,
    pub pid_file_path: PathBuf,
}

impl ShutdownCoordinator {
    /// Runs the eight-step shutdown sequence once, in order. Idempotent in
    /// the sense that a second call is harmless (the session map and
    /// subprocess registry are already empty), but callers should only
    /// invoke this once per process.
    pub async fn shutdown(&self) {
        info!("shutdown: step 1/8 stopping cron");
        self.cron_cancellation.cancel();

        let tracked_before = self.subprocess_registry.tracked_session_ids();
        debug!(count = tracked_before.len(), "shutdown: step 2/8 captured tracked subprocesses");

        info!("shutdown: step 3/8 stopping HTTP surface");
        self.http_cancellation.cancel();
        #[cfg(windows)]
        tokio::time::sleep(PORT_REUSE_DELAY).await;

        let active_ids = self.manager.active_session_ids();
        info!(count = active_ids.len(), "shutdown: step 4/8 tearing down active sessions");
        for session_db_id in active_ids {
            self.manager.delete_session(session_db_id).await;
        }

        debug!("shutdown: step 5/8 no external collaborators to notify");

        info!("shutdown: step 6/8 closing storage");
        if let Err(e) = self.storage.close().await {
            warn!(error = %e, "shutdown: storage close failed");
        }

        info!("shutdown: step 7/8 confirming tracked subprocesses exited");
        for session_db_id in tracked_before {
            if let Some(child) = self.subprocess_registry.get(session_db_id) {
                if !child.ensure_exit(SUBPROCESS_EXIT_BOUND).await {
                    warn!(session_db_id, "shutdown: subprocess still alive after 5s bound");
                }
                self.subprocess_registry.remove(session_db_id);
            }
        }
        #[cfg(windows)]
        tokio::time::sleep(PORT_REUSE_DELAY).await;

        info!(path = %self.pid_file_path.display(), "shutdown: step 8/8 removing pid file");
        if let Err(e) = std::fs::remove_file(&self.pid_file_path) {
            if e.kind() != std::io::ErrorKind::NotFound {
                warn!(error = %e, "shutdown: failed to remove pid file");
            }
        }
    }
}

/// Installs the platform signal handlers named in spec §4.7 "Signal
/// handling" and returns a token cancelled when a shutdown-triggering
/// signal arrives.
///
/// On Unix, SIGTERM always triggers shutdown; SIGHUP is ignored in
/// [`RuntimeMode::Daemon`] (where it would otherwise fire on the
/// controlling terminal closing) and treated as a shutdown trigger in
/// [`RuntimeMode::Interactive`]. Non-Unix platforms fall back to Ctrl+C
/// only.
pub fn install_signal_handler(runtime_mode: RuntimeMode) -> CancellationToken {
    let token = CancellationToken::new();
    let token_clone = token.clone();

    tokio::spawn(async move {
        let ctrl_c = tokio::signal::ctrl_c();

        #[cfg(unix)]
        {
            use tokio::signal::unix::{signal, SignalKind};
            let mut sigterm = signal(SignalKind::terminate()).expect("failed to install SIGTERM handler");
            let mut sighup = signal(SignalKind::hangup()).expect("failed to install SIGHUP handler");

            loop {
                tokio::select! {
                    _ = &mut ctrl_c => {
                        info!("received SIGINT (Ctrl+C), initiating shutdown");
                        break;
                    }
                    _ = sigterm.recv() => {
                        info!("received SIGTERM, initiating shutdown");
                        break;
                    }
                    _ = sighup.recv() => {
                        match runtime_mode {
                            RuntimeMode::Daemon => {
                                debug!("received SIGHUP while daemonized, ignoring");
                                continue;
                            }
                            RuntimeMode::Interactive => {
                                info!("received SIGHUP in interactive mode, initiating shutdown");
                                break;
                            }
                        }
                    }
                }
            }
        }

        #[cfg(not(unix))]
        {
            let _ = ctrl_c.await;
            info!("received Ctrl+C, initiating shutdown");
        }

        token_clone.cancel();
        debug!("shutdown signal handler completed");
    });

    token
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::events::NullSink;
    use mnemo_storage::SqliteStorage;
    use tempfile::tempdir;

    #[tokio::test]
    async fn install_signal_handler_returns_uncancelled_token() {
        let token = install_signal_handler(RuntimeMode::Daemon);
        assert!(!token.is_cancelled());
        token.cancel();
    }

    #[tokio::test]
    async fn shutdown_runs_all_steps_with_no_active_sessions() {
        let dir = tempdir().unwrap();
        let db_path = dir.path().join("t.db");
        let storage = SqliteStorage::new(db_path.to_str().unwrap());
        storage.initialize().await.unwrap();
        let storage: Arc<dyn StorageAdapter> = Arc::new(storage);
        let manager = Arc::new(SessionManager::new(
            storage.clone(),
            Arc::new(NullSink),
            SubprocessRegistry::new(),
        ));

        let pid_file_path = dir.path().join("mnemo.pid");
        std::fs::write(&pid_file_path, b"1234").unwrap();

        let coordinator = ShutdownCoordinator {
            cron_cancellation: CancellationToken::new(),
            http_cancellation: CancellationToken::new(),
            manager,
            storage,
            subprocess_registry: SubprocessRegistry::new(),
            pid_file_path: pid_file_path.clone(),
        };

        coordinator.shutdown().await;
        assert!(coordinator.cron_cancellation.is_cancelled());
        assert!(coordinator.http_cancellation.is_cancelled());
        assert!(!pid_file_path.exists());
    }
}
