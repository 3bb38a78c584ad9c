// SPDX-FileCopyrightText: 2026 Mnemo Contributors
// SPDX-License-Identifier: MIT OR Apache-2.0

//! Router assembly and the loopback HTTP listener.
//!
//! Three route groups (spec §4.5/§6):
//! - public: `/api/health`, `/api/readiness`, `/api/version`,
//!   `/api/context/inject` -- reachable even before the worker finishes
//!   initializing.
//! - gated: everything else under `/api/*` -- blocked behind
//!   [`auth::init_gate_middleware`] until the worker signals readiness, or
//!   for 30s, whichever comes first.
//! - `/stream` -- the SSE fan-out, deliberately outside `/api/*` so it is
//!   never subject to the init gate.

use std::net::SocketAddr;
use std::process;
use std::sync::Arc;
use std::time::Instant;

use axum::middleware::from_fn_with_state;
use axum::routing::{get, post};
use axum::Router;
use mnemo_config::model::Settings;
use mnemo_core::error::MnemoError;
use mnemo_core::traits::StorageAdapter;
use mnemo_session::generator::ProviderSet;
use mnemo_session::manager::SessionManager;
use mnemo_session::events::SessionEvent;
use tokio::net::TcpListener;
use tokio::sync::{broadcast, watch};
use tokio_util::sync::CancellationToken;
use tower_http::trace::TraceLayer;
use tracing::info;

use crate::{auth, handlers, sse};

/// Gates `/api/*` routes (other than the always-public ones) until the
/// worker has finished initializing, per spec §4.5 "30s initialization
/// gate". Backed by a `watch` channel so every waiter observes the same
/// one-shot flip from not-ready to ready.
pub struct InitGate {
    tx: watch::Sender<bool>,
}

impl InitGate {
    pub fn new() -> Arc<Self> {
        let (tx, _rx) = watch::channel(false);
        Arc::new(Self { tx })
    }

    /// Flips the gate open. Idempotent; later calls are no-ops.
    pub fn mark_ready(&self) {
        let _ = self.tx.send(true);
    }

    pub fn is_ready(&self) -> bool {
        *self.tx.borrow()
    }

    /// Waits until ready or `timeout` elapses, whichever comes first.
    /// Returns whether the gate was open when this call returned.
    pub async fn wait_ready(&self, timeout: std::time::Duration) -> bool {
        if self.is_ready() {
            return true;
        }
        let mut rx = self.tx.subscribe();
        let _ = tokio::time::timeout(timeout, async {
            while !*rx.borrow() {
                if rx.changed().await.is_err() {
                    break;
                }
            }
        })
        .await;
        self.is_ready()
    }
}

/// Shared state threaded through every handler via axum's `State` extractor.
#[derive(Clone)]
pub struct GatewayState {
    pub manager: Arc<SessionManager>,
    pub storage: Arc<dyn StorageAdapter>,
    pub settings: Arc<Settings>,
    pub providers: Arc<ProviderSet>,
    pub events_tx: broadcast::Sender<SessionEvent>,
    pub init_gate: Arc<InitGate>,
    pub start_time: Instant,
    pub pid: u32,
    /// Cancelled by `POST /api/admin/shutdown`. Distinct from the
    /// `http_cancellation` token passed to [`start_server`], which the
    /// `mnemo` binary's `ShutdownCoordinator` cancels in its own step 3 --
    /// this token is the *trigger* the binary's signal-select loop watches
    /// alongside OS signals before invoking the coordinator at all.
    pub shutdown_trigger: CancellationToken,
}

impl GatewayState {
    /// Constructs gateway state around an already-created broadcast
    /// channel. The channel is created before this call -- typically by
    /// [`crate::sse::new_event_channel`] -- so the same `Sender` half can
    /// also back the [`crate::sse::BroadcastSink`] wired into
    /// `SessionManager::new` before the manager, and hence this state,
    /// exist.
    pub fn new(
        manager: Arc<SessionManager>,
        storage: Arc<dyn StorageAdapter>,
        settings: Arc<Settings>,
        providers: Arc<ProviderSet>,
        events_tx: broadcast::Sender<SessionEvent>,
        init_gate: Arc<InitGate>,
        shutdown_trigger: CancellationToken,
    ) -> Self {
        Self {
            manager,
            storage,
            settings,
            providers,
            events_tx,
            init_gate,
            start_time: Instant::now(),
            pid: process::id(),
            shutdown_trigger,
        }
    }
}

/// Builds the full router: public routes, the init-gated routes, and the
/// SSE stream, each merged under a shared [`TraceLayer`].
pub fn build_router(state: GatewayState) -> Router {
    let public = Router::new()
        .route("/api/health", get(handlers::get_health))
        .route("/api/readiness", get(handlers::get_readiness))
        .route("/api/version", get(handlers::get_version))
        .route("/api/context/inject", get(handlers::get_context_inject));

    let gated = Router::new()
        .route("/api/sessions/init", post(handlers::post_session_init))
        .route(
            "/api/sessions/observations",
            post(handlers::post_session_observations),
        )
        .route(
            "/api/sessions/summarize",
            post(handlers::post_session_summarize),
        )
        .route(
            "/api/sessions/complete",
            post(handlers::post_session_complete),
        )
        .route("/api/search", get(handlers::get_search))
        .route("/api/timeline", get(handlers::get_timeline))
        .route(
            "/api/observations/batch",
            get(handlers::get_observations_batch),
        )
        .route("/api/search/by-file", get(handlers::get_search_by_file))
        .route("/api/admin/shutdown", post(handlers::post_admin_shutdown))
        .route_layer(from_fn_with_state(state.clone(), auth::init_gate_middleware));

    let stream = Router::new().route("/stream", get(sse::stream_handler));

    Router::new()
        .merge(public)
        .merge(gated)
        .merge(stream)
        .layer(TraceLayer::new_for_http())
        .with_state(state)
}

/// Binds the loopback listener and serves until `shutdown` is cancelled
/// (spec §4.7 step 3, "stop accepting new HTTP connections").
pub async fn start_server(
    host: String,
    port: u16,
    state: GatewayState,
    shutdown: CancellationToken,
) -> Result<(), MnemoError> {
    let addr: SocketAddr = format!("{host}:{port}")
        .parse()
        .map_err(|e| MnemoError::Fatal(format!("invalid bind address {host}:{port}: {e}")))?;

    let listener = TcpListener::bind(addr)
        .await
        .map_err(|e| MnemoError::Fatal(format!("failed to bind {addr}: {e}")))?;

    info!(%addr, "gateway listening");
    let router = build_router(state);

    axum::serve(listener, router)
        .with_graceful_shutdown(async move { shutdown.cancelled().await })
        .await
        .map_err(|e| MnemoError::Fatal(format!("gateway server error: {e}")))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn init_gate_starts_closed_and_opens_once() {
        let gate = InitGate::new();
        assert!(!gate.is_ready());
        gate.mark_ready();
        assert!(gate.is_ready());
        assert!(gate.wait_ready(std::time::Duration::from_millis(10)).await);
    }

    #[tokio::test]
    async fn init_gate_wait_times_out_while_closed() {
        let gate = InitGate::new();
        let ready = gate.wait_ready(std::time::Duration::from_millis(20)).await;
        assert!(!ready);
    }

    #[tokio::test]
    async fn init_gate_wait_unblocks_on_late_mark_ready() {
        let gate = InitGate::new();
        let waiter_gate = Arc::clone(&gate);
        let waiter = tokio::spawn(async move { waiter_gate.wait_ready(std::time::Duration::from_secs(5)).await });
        tokio::time::sleep(std::time::Duration::from_millis(10)).await;
        gate.mark_ready();
        assert!(waiter.await.unwrap());
    }
}
