// SPDX-FileCopyrightText: 2026 Mnemo Contributors
// SPDX-License-Identifier: MIT OR Apache-2.0

//! Initialization-gate middleware for the gateway.
//!
//! The HTTP surface binds before storage is opened, migrations run, and
//! stale state is recovered, so most `/api/*` routes wait behind this
//! middleware until [`crate::server::InitGate::mark_ready`] fires or 30s
//! elapses (spec §4.5), whichever comes first. A few routes are mounted
//! outside the gated router entirely and never pass through here:
//! `/api/health`, `/api/readiness`, `/api/version`, and
//! `/api/context/inject` (which fails open with an empty body instead of
//! blocking).

use std::time::Duration;

use axum::extract::{Request, State};
use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use axum::middleware::Next;
use axum::Json;
use serde_json::json;

use crate::server::GatewayState;

/// Worker startup (storage open, migrations, stale-session recovery,
/// provider construction) is expected to finish well under this bound; past
/// it, callers get a 503 rather than hanging indefinitely.
const INIT_GATE_TIMEOUT: Duration = Duration::from_secs(30);

pub async fn init_gate_middleware(
    State(state): State<GatewayState>,
    request: Request,
    next: Next,
) -> Response {
    if state.init_gate.wait_ready(INIT_GATE_TIMEOUT).await {
        return next.run(request).await;
    }

    (
        StatusCode::SERVICE_UNAVAILABLE,
        Json(json!({ "error": "Service initializing" })),
    )
        .into_response()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::server::InitGate;
    use axum::body::Body;
    use axum::routing::get;
    use axum::Router;
    use axum::middleware::from_fn_with_state;
    use mnemo_config::model::Settings;
    use mnemo_core::traits::StorageAdapter;
    use mnemo_session::events::NullSink;
    use mnemo_session::manager::SessionManager;
    use mnemo_core::SubprocessRegistry;
    use mnemo_test_utils::MockProvider;
    use std::sync::Arc;
    use tokio_util::sync::CancellationToken;
    use tower::ServiceExt;

    async fn test_state(storage: Arc<dyn StorageAdapter>) -> GatewayState {
        let manager = Arc::new(SessionManager::new(
            storage.clone(),
            Arc::new(NullSink),
            SubprocessRegistry::new(),
        ));
        let providers = Arc::new(mnemo_session::generator::ProviderSet {
            anthropic: Some(Arc::new(MockProvider::new("anthropic", mnemo_core::types::ProviderSlot::Primary))),
            openai: Some(Arc::new(MockProvider::new("openai", mnemo_core::types::ProviderSlot::AlternateA))),
            gemini: Some(Arc::new(MockProvider::new("gemini", mnemo_core::types::ProviderSlot::AlternateB))),
        });
        let (events_tx, _events_rx) = crate::sse::new_event_channel();
        GatewayState::new(
            manager,
            storage,
            Arc::new(Settings::default()),
            providers,
            events_tx,
            InitGate::new(),
            CancellationToken::new(),
        )
    }

    #[tokio::test]
    async fn blocks_until_gate_opens() {
        let storage: Arc<dyn StorageAdapter> = Arc::new(mnemo_storage::SqliteStorage::new(":memory:"));
        let state = test_state(storage).await;
        let app = Router::new()
            .route("/api/gated", get(|| async { "ok" }))
            .route_layer(from_fn_with_state(state.clone(), init_gate_middleware))
            .with_state(state.clone());

        let req = Request::builder().uri("/api/gated").body(Body::empty()).unwrap();
        let resp = tokio::time::timeout(Duration::from_millis(200), app.clone().oneshot(req))
            .await
            .expect_err("should still be blocked within the gate's first 200ms");
        let _ = resp;

        state.init_gate.mark_ready();
        let req = Request::builder().uri("/api/gated").body(Body::empty()).unwrap();
        let resp = app.oneshot(req).await.unwrap();
        assert_eq!(resp.status(), StatusCode::OK);
    }
}
