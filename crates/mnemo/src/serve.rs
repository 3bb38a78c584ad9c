// SPDX-FileCopyrightText: 2026 Mnemo Contributors
// SPDX-License-Identifier: MIT OR Apache-2.0

//! The `--daemon` in-process entrypoint.
//!
//! Opens storage, runs the two startup crash-recovery sweeps (spec §4.2
//! item 6, §5 "Session stale threshold (storage)"), constructs the three
//! LLM providers into one [`ProviderSet`], wires the session manager, the
//! gateway, and the two periodic reapers, then blocks until a shutdown
//! signal (OS signal or `POST /api/admin/shutdown`) runs the ordered
//! [`ShutdownCoordinator`] sequence.

use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use mnemo_config::model::Settings;
use mnemo_core::error::MnemoError;
use mnemo_core::traits::StorageAdapter;
use mnemo_core::SubprocessRegistry;
use mnemo_gateway::server::{start_server, GatewayState, InitGate};
use mnemo_gateway::sse::{new_event_channel, BroadcastSink};
use mnemo_session::events::EventSink;
use mnemo_session::generator::ProviderSet;
use mnemo_session::manager::SessionManager;
use mnemo_session::shutdown::{install_signal_handler, ShutdownCoordinator};
use mnemo_storage::SqliteStorage;
use serde::{Deserialize, Serialize};
use tokio_util::sync::CancellationToken;
use tracing::{info, warn};

/// Storage-level stale-session threshold (spec §5): a session still
/// `active` this long after start is treated as crashed, not running.
const STALE_SESSION_AGE_SECS: i64 = 6 * 60 * 60;

/// Persisted alongside the database so `mnemo status`/`stop` can find the
/// running daemon without guessing its port (spec §6 "Persisted state
/// layout").
#[derive(Debug, Serialize, Deserialize)]
pub struct PidFile {
    pub pid: u32,
    pub port: u16,
    pub started_at: chrono::DateTime<chrono::Utc>,
    pub version: Option<String>,
}

impl PidFile {
    pub fn path(data_dir: &std::path::Path) -> PathBuf {
        data_dir.join("worker.pid")
    }

    pub fn read(data_dir: &std::path::Path) -> Option<Self> {
        let content = std::fs::read_to_string(Self::path(data_dir)).ok()?;
        serde_json::from_str(&content).ok()
    }

    fn write(&self, data_dir: &std::path::Path) -> std::io::Result<()> {
        let content = serde_json::to_string(self).unwrap_or_default();
        std::fs::write(Self::path(data_dir), content)
    }
}

/// Runs the daemon until a shutdown signal is received. Fatal startup
/// errors are logged and returned; the caller (the `--daemon` branch of
/// `main`) always exits 0 regardless, per spec §7 "Fatal startup".
pub async fn run_daemon(settings: Settings) -> Result<(), MnemoError> {
    init_tracing(&settings.worker.log_level);
    info!(port = settings.worker.port, "starting mnemo daemon");

    let data_dir = PathBuf::from(&settings.worker.data_dir);
    std::fs::create_dir_all(&data_dir)
        .map_err(|e| MnemoError::Fatal(format!("failed to create data dir {}: {e}", data_dir.display())))?;
    std::fs::create_dir_all(data_dir.join("logs")).ok();

    let db_path = data_dir.join("mnemo.db");
    let storage = SqliteStorage::new(
        db_path
            .to_str()
            .ok_or_else(|| MnemoError::Fatal("data dir path is not valid UTF-8".to_string()))?,
    );
    mnemo_core::traits::StorageAdapter::initialize(&storage).await?;
    let storage: Arc<dyn StorageAdapter> = Arc::new(storage);

    let reset = storage.reset_stale(0).await?;
    if reset > 0 {
        info!(reset, "reset stale processing rows left behind by a prior crash");
    }
    let failed = storage.fail_stale_active_sessions(STALE_SESSION_AGE_SECS).await?;
    if failed > 0 {
        warn!(failed, "failed sessions left active past the 6h stale threshold");
    }

    let registry = SubprocessRegistry::new();
    let providers = Arc::new(build_providers(registry.clone(), &settings)?);

    let (events_tx, _events_rx) = new_event_channel();
    let sink: Arc<dyn EventSink> = Arc::new(BroadcastSink(events_tx.clone()));
    let manager = Arc::new(SessionManager::new(storage.clone(), sink, registry.clone()));

    let cron_cancellation = CancellationToken::new();
    let reaper_handles = mnemo_cron::spawn_reapers(manager.clone(), registry.clone(), cron_cancellation.clone());

    let init_gate = InitGate::new();
    let admin_shutdown_trigger = CancellationToken::new();
    let http_cancellation = CancellationToken::new();
    let settings = Arc::new(settings);

    let state = GatewayState::new(
        manager.clone(),
        storage.clone(),
        settings.clone(),
        providers,
        events_tx,
        init_gate.clone(),
        admin_shutdown_trigger.clone(),
    );

    let server_handle = tokio::spawn(start_server(
        settings.worker.host.clone(),
        settings.worker.port,
        state,
        http_cancellation.clone(),
    ));

    init_gate.mark_ready();

    let pid_file = PidFile {
        pid: std::process::id(),
        port: settings.worker.port,
        started_at: chrono::Utc::now(),
        version: Some(env!("CARGO_PKG_VERSION").to_string()),
    };
    pid_file
        .write(&data_dir)
        .map_err(|e| MnemoError::Fatal(format!("failed to write pid file: {e}")))?;
    info!(pid = pid_file.pid, "mnemo daemon ready");

    let signal_trigger = install_signal_handler(settings.worker.runtime_mode);
    tokio::select! {
        _ = signal_trigger.cancelled() => info!("shutdown triggered by signal"),
        _ = admin_shutdown_trigger.cancelled() => info!("shutdown triggered via /api/admin/shutdown"),
    }

    let coordinator = ShutdownCoordinator {
        cron_cancellation,
        http_cancellation,
        manager,
        storage,
        subprocess_registry: registry,
        pid_file_path: PidFile::path(&data_dir),
    };
    coordinator.shutdown().await;

    for handle in reaper_handles {
        let _ = handle.await;
    }
    match tokio::time::timeout(Duration::from_secs(5), server_handle).await {
        Ok(Ok(Ok(()))) => {}
        Ok(Ok(Err(e))) => warn!(error = %e, "gateway server exited with an error"),
        Ok(Err(e)) => warn!(error = %e, "gateway server task panicked"),
        Err(_) => warn!("gateway server did not exit within 5s of shutdown"),
    }

    info!("mnemo daemon shutdown complete");
    Ok(())
}

/// Constructs the three providers named by spec §4.4 into a [`ProviderSet`].
/// Every provider is constructed eagerly at startup when it has credentials
/// (not just the selected one) so a mid-session provider switch or a
/// terminated-upstream fallback never needs a fresh process restart to pick
/// up credentials. A provider with no configured credentials is left `None`
/// rather than failing the whole daemon: per spec §4.4, "unavailable"
/// (missing key) is a per-generator-start typed error, not a startup gate --
/// most real deployments configure only one of the three.
fn build_providers(registry: SubprocessRegistry, settings: &Settings) -> Result<ProviderSet, MnemoError> {
    let anthropic = match mnemo_anthropic::AnthropicProvider::new(registry.clone(), &settings.provider.anthropic) {
        Ok(p) => Some(Arc::new(p) as Arc<dyn mnemo_core::traits::ProviderAdapter>),
        Err(e) => {
            warn!(error = %e, "anthropic provider unavailable at startup");
            None
        }
    };
    let openai = match mnemo_openai::OpenAiProvider::new(registry.clone(), &settings.provider.openai) {
        Ok(p) => Some(Arc::new(p) as Arc<dyn mnemo_core::traits::ProviderAdapter>),
        Err(e) => {
            warn!(error = %e, "openai provider unavailable at startup");
            None
        }
    };
    let gemini = match mnemo_gemini::GeminiProvider::new(registry, &settings.provider.gemini) {
        Ok(p) => Some(Arc::new(p) as Arc<dyn mnemo_core::traits::ProviderAdapter>),
        Err(e) => {
            warn!(error = %e, "gemini provider unavailable at startup");
            None
        }
    };

    if anthropic.is_none() && openai.is_none() && gemini.is_none() {
        return Err(MnemoError::Fatal(
            "no LLM provider has credentials configured (anthropic/openai/gemini)".to_string(),
        ));
    }

    Ok(ProviderSet { anthropic, openai, gemini })
}

fn init_tracing(log_level: &str) {
    use tracing_subscriber::EnvFilter;

    let filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new(format!("mnemo={log_level},warn")));

    let _ = tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_target(true)
        .with_thread_names(false)
        .try_init();
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn pid_file_round_trips_through_json() {
        let dir = tempfile::tempdir().unwrap();
        let pid_file = PidFile {
            pid: 4242,
            port: 37777,
            started_at: chrono::Utc::now(),
            version: Some("0.1.0".to_string()),
        };
        pid_file.write(dir.path()).unwrap();

        let read_back = PidFile::read(dir.path()).expect("pid file should be readable");
        assert_eq!(read_back.pid, 4242);
        assert_eq!(read_back.port, 37777);
    }

    #[test]
    fn pid_file_read_returns_none_when_absent() {
        let dir = tempfile::tempdir().unwrap();
        assert!(PidFile::read(dir.path()).is_none());
    }
}
