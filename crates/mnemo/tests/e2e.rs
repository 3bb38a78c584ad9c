// SPDX-FileCopyrightText: 2026 Mnemo Contributors
// SPDX-License-Identifier: MIT OR Apache-2.0

//! End-to-end tests of the mnemo pipeline through the real HTTP surface:
//! `POST /api/sessions/init` -> `POST /api/sessions/observations` ->
//! generator drains the durable queue -> storage assertions (spec §8).
//!
//! These drive a real [`axum::Router`] built by
//! `mnemo_gateway::server::build_router` over a [`TestHarness`] with
//! [`mnemo_test_utils::MockProvider`]s standing in for the LLM subprocess,
//! via `tower::ServiceExt::oneshot` -- no socket is bound.

use std::sync::Arc;

use axum::body::{to_bytes, Body};
use axum::http::{Request, StatusCode};
use mnemo_core::types::{ObservationDraft, ObservationType, ProviderOutcome, SummaryDraft};
use mnemo_gateway::server::{build_router, GatewayState, InitGate};
use mnemo_gateway::sse::new_event_channel;
use mnemo_test_utils::TestHarness;
use serde_json::{json, Value};
use tokio_util::sync::CancellationToken;
use tower::ServiceExt;

async fn gateway_state(harness: &TestHarness) -> GatewayState {
    let init_gate = InitGate::new();
    init_gate.mark_ready();
    let (events_tx, _events_rx) = new_event_channel();
    GatewayState::new(
        harness.manager.clone(),
        harness.storage.clone(),
        harness.settings.clone(),
        harness.providers.clone(),
        events_tx,
        init_gate,
        CancellationToken::new(),
    )
}

async fn call(router: &axum::Router, method: &str, uri: &str, body: Option<Value>) -> (StatusCode, Value) {
    let request = match body {
        Some(b) => Request::builder()
            .method(method)
            .uri(uri)
            .header("content-type", "application/json")
            .body(Body::from(serde_json::to_vec(&b).unwrap()))
            .unwrap(),
        None => Request::builder().method(method).uri(uri).body(Body::empty()).unwrap(),
    };
    let response = router.clone().oneshot(request).await.unwrap();
    let status = response.status();
    let bytes = to_bytes(response.into_body(), usize::MAX).await.unwrap();
    let value = if bytes.is_empty() {
        Value::Null
    } else {
        serde_json::from_slice(&bytes).unwrap_or(Value::Null)
    };
    (status, value)
}

fn discovery_outcome(memory_session_id: &str) -> ProviderOutcome {
    ProviderOutcome {
        memory_session_id: Some(memory_session_id.to_string()),
        observations: vec![ObservationDraft {
            observation_type: ObservationType::Discovery,
            title: "found it".to_string(),
            subtitle: None,
            narrative: "traced the bug to line 42".to_string(),
            facts: Vec::new(),
            concepts: Vec::new(),
            files_read: vec!["src/lib.rs".to_string()],
            files_modified: Vec::new(),
            discovery_tokens: 3,
        }],
        summaries: Vec::new(),
    }
}

/// Scenario 1 (spec §8): happy path. Init creates a session, an observation
/// is queued over HTTP, the generator drains it against a mocked provider,
/// and the observation lands in storage -- then complete tears the session
/// down.
#[tokio::test]
async fn happy_path_init_observe_drain_complete() {
    let harness = TestHarness::new().await.unwrap();
    harness.anthropic.push_outcome(discovery_outcome("mem-1")).await;
    let router = build_router(gateway_state(&harness).await);

    let (status, init) = call(
        &router,
        "POST",
        "/api/sessions/init",
        Some(json!({ "content_session_id": "s1", "project": "p", "prompt": "do X" })),
    )
    .await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(init["skipped"], json!(false));
    let session_db_id = init["session_db_id"].as_i64().unwrap();
    assert!(session_db_id >= 1);

    let (status, queued) = call(
        &router,
        "POST",
        "/api/sessions/observations",
        Some(json!({
            "content_session_id": "s1",
            "tool_name": "Read",
            "tool_input": "{\"file\": \"src/lib.rs\"}",
            "tool_response": "ok",
        })),
    )
    .await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(queued["status"], json!("queued"));

    harness.drive_to_idle(session_db_id).await.unwrap();
    assert_eq!(harness.anthropic.call_count(), 1);

    let observations = harness
        .storage
        .list_observations_by_time_window("p", chrono::Utc::now() - chrono::Duration::hours(1))
        .await
        .unwrap();
    assert_eq!(observations.len(), 1);
    assert_eq!(observations[0].title, "found it");

    let (status, complete) = call(
        &router,
        "POST",
        "/api/sessions/complete",
        Some(json!({ "content_session_id": "s1" })),
    )
    .await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(complete["status"], json!("completed"));
    assert!(harness.manager.get(session_db_id).is_none());
}

/// Scenario (spec §8): summarize request drains through the same queue and
/// persists a session summary row independent of the observation path.
#[tokio::test]
async fn summarize_drains_to_session_summary() {
    let harness = TestHarness::new().await.unwrap();
    harness
        .anthropic
        .push_outcome(ProviderOutcome {
            memory_session_id: Some("mem-2".to_string()),
            observations: Vec::new(),
            summaries: vec![SummaryDraft {
                title: "turn recap".to_string(),
                narrative: "fixed the off-by-one".to_string(),
                files_modified: vec!["src/lib.rs".to_string()],
            }],
        })
        .await;
    let router = build_router(gateway_state(&harness).await);

    let (status, init) = call(
        &router,
        "POST",
        "/api/sessions/init",
        Some(json!({ "content_session_id": "s2", "project": "p" })),
    )
    .await;
    assert_eq!(status, StatusCode::OK);
    let session_db_id = init["session_db_id"].as_i64().unwrap();

    let (status, queued) = call(
        &router,
        "POST",
        "/api/sessions/summarize",
        Some(json!({ "content_session_id": "s2", "last_assistant_message": "done" })),
    )
    .await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(queued["status"], json!("queued"));

    harness.drive_to_idle(session_db_id).await.unwrap();
    assert_eq!(harness.anthropic.call_count(), 1);

    let session = harness.storage.get_session_by_content_id("s2").await.unwrap().unwrap();
    assert_eq!(session.memory_session_id.as_deref(), Some("mem-2"));
}

/// Scenario (spec §8): an unknown `content_session_id` on the observation
/// route is a 400, never a silent no-op -- the gateway never invents a
/// session outside the init path.
#[tokio::test]
async fn observations_for_unknown_session_is_rejected() {
    let harness = TestHarness::new().await.unwrap();
    let router = build_router(gateway_state(&harness).await);

    let (status, body) = call(
        &router,
        "POST",
        "/api/sessions/observations",
        Some(json!({
            "content_session_id": "does-not-exist",
            "tool_name": "Read",
            "tool_input": "{}",
            "tool_response": "ok",
        })),
    )
    .await;
    assert_eq!(status, StatusCode::BAD_REQUEST);
    assert!(body["error"].as_str().unwrap().contains("unknown content_session_id"));
}

/// Scenario 2/6 (spec §8): a row stuck `processing` past the stale
/// threshold is reclaimed with `retry_count` incremented rather than lost,
/// and a subsequent drain still completes it.
#[tokio::test]
async fn stale_processing_row_self_heals_and_still_drains() {
    let harness = TestHarness::new().await.unwrap();
    harness.anthropic.push_outcome(discovery_outcome("mem-3")).await;
    let router = build_router(gateway_state(&harness).await);

    let (_, init) = call(
        &router,
        "POST",
        "/api/sessions/init",
        Some(json!({ "content_session_id": "s3", "project": "p" })),
    )
    .await;
    let session_db_id = init["session_db_id"].as_i64().unwrap();

    call(
        &router,
        "POST",
        "/api/sessions/observations",
        Some(json!({
            "content_session_id": "s3",
            "tool_name": "Read",
            "tool_input": "{}",
            "tool_response": "ok",
        })),
    )
    .await;

    // Claim the row directly (as a crashed generator would have) without
    // confirming it, leaving it stuck `processing`.
    let claimed = harness
        .storage
        .claim_next(session_db_id, 0)
        .await
        .unwrap()
        .expect("row should be claimable");
    assert_eq!(claimed.retry_count, 0);

    // A zero-second stale threshold treats the just-claimed row as stale
    // immediately, so the next claim_next call self-heals it.
    let reclaimed = harness
        .storage
        .claim_next(session_db_id, 0)
        .await
        .unwrap()
        .expect("stale row should be reclaimed");
    assert_eq!(reclaimed.retry_count, 1);

    harness.start_generator(session_db_id).await;
    harness.drive_to_idle(session_db_id).await.unwrap();
    assert_eq!(harness.anthropic.call_count(), 1);
}
