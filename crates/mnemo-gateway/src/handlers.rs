// SPDX-FileCopyrightText: 2026 Mnemo Contributors
// SPDX-License-Identifier: MIT OR Apache-2.0

//! HTTP request handlers for the mnemo REST API (spec §4.5/§6).
//!
//! Session lifecycle handlers enforce the privacy boundary described in
//! [`crate::privacy`] before anything reaches `mnemo-session`'s manager:
//! excluded projects, excluded tools, paths that touch the service's own
//! data directory, and bracketed-private-region stripping are all applied
//! here, not downstream.

use axum::extract::{Query, State};
use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use axum::Json;
use chrono::{Duration as ChronoDuration, Utc};
use mnemo_core::error::MnemoError;
use mnemo_session::events::SessionEvent;
use mnemo_session::generator::ensure_generator_running;
use serde::{Deserialize, Serialize};
use serde_json::json;

use crate::privacy;
use crate::server::GatewayState;

// --- Unauthenticated routes ---

#[derive(Debug, Serialize)]
pub struct LastInteractionResponse {
    pub success: bool,
    pub error: Option<String>,
    pub at: chrono::DateTime<Utc>,
}

#[derive(Debug, Serialize)]
pub struct AiHealth {
    pub provider: String,
    pub auth_method: &'static str,
    pub last_interaction: Option<LastInteractionResponse>,
}

#[derive(Debug, Serialize)]
pub struct HealthResponse {
    pub version: String,
    pub initialized: bool,
    pub pid: u32,
    pub uptime_ms: u128,
    pub ai: AiHealth,
    pub failed_messages: u64,
}

fn auth_method_for(creds: &mnemo_config::model::ProviderCredentials) -> &'static str {
    if creds.api_key.is_some() {
        "config"
    } else {
        "env"
    }
}

fn provider_name(kind: mnemo_config::model::ProviderKind) -> &'static str {
    match kind {
        mnemo_config::model::ProviderKind::Anthropic => "anthropic",
        mnemo_config::model::ProviderKind::Openai => "openai",
        mnemo_config::model::ProviderKind::Gemini => "gemini",
    }
}

/// `GET /api/health` -- never gated, always 200 once the listener is up
/// (spec §4.5/§7 "User-visible behavior").
pub async fn get_health(State(state): State<GatewayState>) -> Json<HealthResponse> {
    let selected = state.settings.provider.selected;
    let creds = match selected {
        mnemo_config::model::ProviderKind::Anthropic => &state.settings.provider.anthropic,
        mnemo_config::model::ProviderKind::Openai => &state.settings.provider.openai,
        mnemo_config::model::ProviderKind::Gemini => &state.settings.provider.gemini,
    };

    let mut last_interaction: Option<LastInteractionResponse> = None;
    for session_db_id in state.manager.active_session_ids() {
        let Some(active) = state.manager.get(session_db_id) else {
            continue;
        };
        let guard = active.state.lock().await;
        if let Some(li) = &guard.last_interaction {
            let newer = last_interaction.as_ref().map(|l| li.at > l.at).unwrap_or(true);
            if newer {
                last_interaction = Some(LastInteractionResponse {
                    success: li.success,
                    error: li.error.clone(),
                    at: li.at,
                });
            }
        }
    }

    let failed_messages = state.storage.count_failed_messages().await.unwrap_or(0);

    Json(HealthResponse {
        version: env!("CARGO_PKG_VERSION").to_string(),
        initialized: state.init_gate.is_ready(),
        pid: state.pid,
        uptime_ms: state.start_time.elapsed().as_millis(),
        ai: AiHealth {
            provider: provider_name(selected).to_string(),
            auth_method: auth_method_for(creds),
            last_interaction,
        },
        failed_messages,
    })
}

/// `GET /api/readiness` -- 200 once initialized, 503 otherwise. Unlike the
/// gated routes this never blocks; it reports the gate's current state
/// immediately (spec §4.5).
pub async fn get_readiness(State(state): State<GatewayState>) -> Response {
    if state.init_gate.is_ready() {
        (StatusCode::OK, Json(json!({ "ready": true }))).into_response()
    } else {
        (StatusCode::SERVICE_UNAVAILABLE, Json(json!({ "ready": false }))).into_response()
    }
}

#[derive(Debug, Serialize)]
pub struct VersionResponse {
    pub version: &'static str,
}

pub async fn get_version() -> Json<VersionResponse> {
    Json(VersionResponse {
        version: env!("CARGO_PKG_VERSION"),
    })
}

#[derive(Debug, Deserialize)]
pub struct ContextInjectQuery {
    pub project: String,
}

#[derive(Debug, Serialize)]
pub struct ContextInjectResponse {
    pub context: String,
}

/// `GET /api/context/inject` -- fails open with an empty context rather
/// than blocking behind the init gate (spec §4.5 "fail-open context"):
/// a hook calling this before the worker finishes initializing should
/// never stall the user's prompt.
pub async fn get_context_inject(
    State(state): State<GatewayState>,
    Query(query): Query<ContextInjectQuery>,
) -> Json<ContextInjectResponse> {
    if !state.init_gate.is_ready() {
        return Json(ContextInjectResponse { context: String::new() });
    }

    let since = Utc::now() - ChronoDuration::hours(state.settings.context.injection_lookback_hours);
    let observations = state
        .storage
        .list_observations_by_time_window(&query.project, since)
        .await
        .unwrap_or_default();

    Json(ContextInjectResponse {
        context: render_context(&observations, &state.settings.context),
    })
}

fn render_context(
    observations: &[mnemo_core::types::Observation],
    cfg: &mnemo_config::model::ContextConfig,
) -> String {
    let mut out = String::new();
    for obs in observations.iter().take(cfg.injection_max_items) {
        if out.len() >= cfg.injection_max_chars {
            break;
        }
        if cfg.show_timestamps {
            out.push_str(&format!("[{}] ", obs.created_at.to_rfc3339()));
        }
        out.push_str(&format!("{}: {}\n", obs.title, obs.narrative));
        if cfg.show_file_paths && !obs.files_modified.is_empty() {
            out.push_str(&format!("  modified: {}\n", obs.files_modified.join(", ")));
        }
    }
    out.truncate(cfg.injection_max_chars.min(out.len()));
    out
}

// --- Session lifecycle routes (gated) ---

fn excluded_project(state: &GatewayState, project: &str) -> bool {
    state.settings.privacy.excluded_projects.iter().any(|p| p == project)
}

#[derive(Debug, Deserialize)]
pub struct InitRequest {
    pub content_session_id: String,
    #[serde(default)]
    pub project: Option<String>,
    #[serde(default)]
    pub prompt: Option<String>,
    #[serde(default)]
    pub custom_title: Option<String>,
}

#[derive(Debug, Serialize)]
pub struct InitResponse {
    pub session_db_id: i64,
    pub prompt_number: i64,
    pub skipped: bool,
    pub reason: Option<String>,
    pub context_injected: bool,
}

fn default_project(project: Option<String>) -> String {
    project.filter(|p| !p.trim().is_empty()).unwrap_or_else(|| "default".to_string())
}

/// `POST /api/sessions/init` -- idempotent create-or-resume (spec §4.3
/// "initialize-session"). Every call increments `prompt_counter`, including
/// the first, so `prompt_number` returned here is always >= 1.
pub async fn post_session_init(
    State(state): State<GatewayState>,
    Json(body): Json<InitRequest>,
) -> Result<Json<InitResponse>, ApiError> {
    let project = default_project(body.project);

    let stripped_prompt = body.prompt.as_deref().map(privacy::strip_private);
    let prompt_fully_private = stripped_prompt
        .as_ref()
        .map(|s| privacy::is_fully_private(body.prompt.as_deref().unwrap_or(""), &s.text))
        .unwrap_or(false);

    let project_excluded = excluded_project(&state, &project);

    let init_prompt = if project_excluded || prompt_fully_private {
        None
    } else {
        stripped_prompt.as_ref().map(|s| s.text.as_str())
    };

    let (row, _active, _created) = state
        .manager
        .initialize_session(&body.content_session_id, &project, init_prompt)
        .await?;

    let prompt_number = state.storage.increment_prompt_counter(row.session_db_id).await?;

    if let Some(custom_title) = &body.custom_title {
        tracing::debug!(session_db_id = row.session_db_id, custom_title, "custom_title supplied on init");
    }

    let (skipped, reason) = if project_excluded {
        (true, Some("excluded_project".to_string()))
    } else if prompt_fully_private {
        (true, Some("private".to_string()))
    } else {
        (false, None)
    };

    if !skipped {
        if let Some(text) = init_prompt {
            state
                .storage
                .save_user_prompt(&body.content_session_id, prompt_number, text)
                .await?;
        }
        state.events_tx_emit(SessionEvent::NewPrompt {
            session_db_id: row.session_db_id,
            content_session_id: body.content_session_id.clone(),
            prompt_number,
        });
    }

    let context_injected = !project_excluded
        && !state
            .storage
            .list_observations_by_time_window(
                &project,
                Utc::now() - ChronoDuration::hours(state.settings.context.injection_lookback_hours),
            )
            .await
            .unwrap_or_default()
            .is_empty();

    Ok(Json(InitResponse {
        session_db_id: row.session_db_id,
        prompt_number,
        skipped,
        reason,
        context_injected,
    }))
}

#[derive(Debug, Deserialize)]
pub struct ObservationRequest {
    pub content_session_id: String,
    pub tool_name: String,
    pub tool_input: String,
    pub tool_response: String,
    #[serde(default)]
    pub cwd: Option<String>,
}

#[derive(Debug, Serialize)]
pub struct QueueResponse {
    pub status: &'static str,
    pub reason: Option<String>,
}

/// `POST /api/sessions/observations` -- enqueues one tool-use observation
/// for the generator to process, applying every privacy exclusion before
/// anything is persisted (spec §4.5 item 4).
pub async fn post_session_observations(
    State(state): State<GatewayState>,
    Json(body): Json<ObservationRequest>,
) -> Result<Json<QueueResponse>, ApiError> {
    let Some(session) = state.storage.get_session_by_content_id(&body.content_session_id).await? else {
        return Err(ApiError::Validation("unknown content_session_id".to_string()));
    };

    if let Some(reason) = skip_reason(&state, &session.project, &body.tool_name, body.cwd.as_deref(), &body.tool_input) {
        return Ok(Json(QueueResponse { status: "skipped", reason: Some(reason) }));
    }

    let stripped_input = privacy::strip_private(&body.tool_input);
    let stripped_response = privacy::strip_private(&body.tool_response);
    if privacy::is_fully_private(&body.tool_input, &stripped_input.text)
        && privacy::is_fully_private(&body.tool_response, &stripped_response.text)
    {
        return Ok(Json(QueueResponse { status: "skipped", reason: Some("private".to_string()) }));
    }

    state
        .manager
        .queue_observation(
            session.session_db_id,
            &body.content_session_id,
            session.prompt_counter,
            body.tool_name,
            stripped_input.text,
            stripped_response.text,
            body.cwd,
        )
        .await?;

    state.spawn_generator(session.session_db_id, "post_session_observations");

    Ok(Json(QueueResponse { status: "queued", reason: None }))
}

#[derive(Debug, Deserialize)]
pub struct SummarizeRequest {
    pub content_session_id: String,
    #[serde(default)]
    pub last_assistant_message: Option<String>,
}

/// `POST /api/sessions/summarize` -- enqueues a turn-boundary summary
/// request (spec §4.3).
pub async fn post_session_summarize(
    State(state): State<GatewayState>,
    Json(body): Json<SummarizeRequest>,
) -> Result<Json<QueueResponse>, ApiError> {
    let Some(session) = state.storage.get_session_by_content_id(&body.content_session_id).await? else {
        return Err(ApiError::Validation("unknown content_session_id".to_string()));
    };

    if excluded_project(&state, &session.project) {
        return Ok(Json(QueueResponse { status: "skipped", reason: Some("excluded_project".to_string()) }));
    }

    let stripped = body.last_assistant_message.as_deref().map(privacy::strip_private);

    state
        .manager
        .queue_summarize(
            session.session_db_id,
            &body.content_session_id,
            session.prompt_counter,
            stripped.map(|s| s.text),
        )
        .await?;

    state.spawn_generator(session.session_db_id, "post_session_summarize");

    Ok(Json(QueueResponse { status: "queued", reason: None }))
}

#[derive(Debug, Deserialize)]
pub struct CompleteRequest {
    pub content_session_id: String,
}

#[derive(Debug, Serialize)]
pub struct CompleteResponse {
    pub status: &'static str,
}

/// `POST /api/sessions/complete` -- idempotent removal from the active map
/// plus a storage-level status transition (spec §4.3 "delete-session").
pub async fn post_session_complete(
    State(state): State<GatewayState>,
    Json(body): Json<CompleteRequest>,
) -> Result<Json<CompleteResponse>, ApiError> {
    let Some(session) = state.storage.get_session_by_content_id(&body.content_session_id).await? else {
        return Ok(Json(CompleteResponse { status: "skipped" }));
    };

    if state.manager.get(session.session_db_id).is_some() {
        state.manager.delete_session(session.session_db_id).await;
    }

    if session.status != mnemo_core::types::SessionStatus::Completed {
        state.storage.complete_session(session.session_db_id).await?;
    }

    Ok(Json(CompleteResponse { status: "completed" }))
}

/// Returns the first privacy exclusion reason that applies, if any.
fn skip_reason(
    state: &GatewayState,
    project: &str,
    tool_name: &str,
    cwd: Option<&str>,
    tool_input: &str,
) -> Option<String> {
    if excluded_project(state, project) {
        return Some("excluded_project".to_string());
    }
    if state.settings.privacy.skip_tools.iter().any(|t| t == tool_name) {
        return Some("excluded_tool".to_string());
    }
    if privacy::touches_memory_dir(tool_input, cwd, &state.settings.worker.data_dir) {
        return Some("memory_directory".to_string());
    }
    None
}

// --- Search / timeline routes (gated, no external search collaborator) ---

#[derive(Debug, Serialize)]
struct NotImplementedResponse {
    error: &'static str,
}

fn not_implemented() -> Response {
    (
        StatusCode::NOT_IMPLEMENTED,
        Json(NotImplementedResponse {
            error: "no search collaborator configured for this build",
        }),
    )
        .into_response()
}

pub async fn get_search() -> Response {
    not_implemented()
}

pub async fn get_timeline() -> Response {
    not_implemented()
}

pub async fn get_observations_batch() -> Response {
    not_implemented()
}

pub async fn get_search_by_file() -> Response {
    not_implemented()
}

// --- Admin ---

#[derive(Debug, Serialize)]
pub struct ShutdownResponse {
    pub status: &'static str,
}

/// `POST /api/admin/shutdown` -- triggers the same ordered shutdown
/// sequence a SIGTERM would (spec §4.7).
pub async fn post_admin_shutdown(State(state): State<GatewayState>) -> Json<ShutdownResponse> {
    state.shutdown_trigger.cancel();
    Json(ShutdownResponse { status: "shutting_down" })
}

// --- Error mapping ---

pub enum ApiError {
    Validation(String),
    Internal(MnemoError),
}

impl From<MnemoError> for ApiError {
    fn from(e: MnemoError) -> Self {
        match e {
            MnemoError::Validation(msg) => ApiError::Validation(msg),
            other => ApiError::Internal(other),
        }
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        match self {
            ApiError::Validation(msg) => {
                (StatusCode::BAD_REQUEST, Json(json!({ "error": msg }))).into_response()
            }
            ApiError::Internal(e) => {
                tracing::error!(error = %e, "handler failed");
                (StatusCode::INTERNAL_SERVER_ERROR, Json(json!({ "error": e.to_string() }))).into_response()
            }
        }
    }
}

impl GatewayState {
    /// Best-effort emit: no subscribers is not an error (spec §4.5).
    fn events_tx_emit(&self, event: SessionEvent) {
        let _ = self.events_tx.send(event);
    }

    /// Kicks the session's generator in the background so the handler
    /// returns as soon as the message is durably enqueued (spec §4.4
    /// "single-writer-per-session invariant" is enforced inside
    /// `ensure_generator_running` itself, not by this call site).
    fn spawn_generator(&self, session_db_id: i64, source: &'static str) {
        let manager = self.manager.clone();
        let providers = self.providers.clone();
        let settings = self.settings.clone();
        tokio::spawn(async move {
            ensure_generator_running(manager, providers, settings, session_db_id, source).await;
        });
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn default_project_falls_back_when_blank_or_absent() {
        assert_eq!(default_project(None), "default");
        assert_eq!(default_project(Some("   ".to_string())), "default");
        assert_eq!(default_project(Some("acme".to_string())), "acme");
    }

    #[test]
    fn auth_method_prefers_config_over_env() {
        let with_key = mnemo_config::model::ProviderCredentials {
            api_key: Some("x".to_string()),
            model: None,
        };
        let without_key = mnemo_config::model::ProviderCredentials::default();
        assert_eq!(auth_method_for(&with_key), "config");
        assert_eq!(auth_method_for(&without_key), "env");
    }
}
