// SPDX-FileCopyrightText: 2026 Mnemo Contributors
// SPDX-License-Identifier: MIT OR Apache-2.0

//! The provider-agnostic generator loop (spec §4.4).
//!
//! One task per active session, serialized onto the session by
//! [`ensure_generator_running`] so a message never sees two generators
//! racing to claim it. Restart/fallback policy lives in
//! [`attempt_with_fallback`]; see spec §4.4 "exit conditions" and §7 for
//! the error-taxonomy decisions this implements.

use std::sync::atomic::Ordering;
use std::sync::Arc;
use std::time::{Duration, Instant};

use mnemo_config::model::{ProviderKind, Settings};
use mnemo_core::traits::ProviderAdapter;
use mnemo_core::types::{ConversationTurn, ProviderErrorKind, ProviderOutcome, ProviderRequest};
use tracing::{debug, info, warn};

use crate::events::SessionEvent;
use crate::manager::{ClaimedMessage, SessionManager};
use crate::session::{ActiveSession, LastInteraction};

/// Past this much inactivity, a `generator_handle` is assumed dead-locked
/// or abandoned and is superseded rather than waited on.
const STALE_ACTIVITY_THRESHOLD: Duration = Duration::from_secs(30);
const SUBPROCESS_EXIT_BOUND: Duration = Duration::from_secs(5);
/// Bounded crash-recovery restarts before a session is given up on (spec
/// §4.4 "bounded crash-recovery restarts").
const MAX_CONSECUTIVE_RESTARTS: u32 = 3;
const BACKOFF_STEPS_SECS: [u64; 3] = [1, 2, 4];
const BACKOFF_CAP_SECS: u64 = 8;

/// The three fixed provider slots, wired up once at startup by the `mnemo`
/// binary and shared read-only by every session's generator task. A slot
/// is `None` when its credentials are absent (spec §4.4 "If the selected
/// provider is unavailable (missing key or runtime), starting fails with
/// a typed error") -- this is a per-generator-start check, not a gate on
/// the whole daemon booting, so most deployments that configure only one
/// provider still run.
pub struct ProviderSet {
    pub anthropic: Option<Arc<dyn ProviderAdapter>>,
    pub openai: Option<Arc<dyn ProviderAdapter>>,
    pub gemini: Option<Arc<dyn ProviderAdapter>>,
}

impl ProviderSet {
    pub fn get(&self, kind: ProviderKind) -> Option<Arc<dyn ProviderAdapter>> {
        match kind {
            ProviderKind::Anthropic => self.anthropic.clone(),
            ProviderKind::Openai => self.openai.clone(),
            ProviderKind::Gemini => self.gemini.clone(),
        }
    }
}

fn backoff_for(consecutive_restarts: u32) -> Duration {
    let idx = (consecutive_restarts.saturating_sub(1)) as usize;
    let secs = BACKOFF_STEPS_SECS.get(idx).copied().unwrap_or(BACKOFF_CAP_SECS);
    Duration::from_secs(secs.min(BACKOFF_CAP_SECS))
}

/// Ensures exactly one generator task is running (or about to run) for this
/// session, per spec §4.4 "single-writer-per-session invariant". Uses a
/// compare-exchange flag rather than a lock held across the spawn decision,
/// so a concurrent caller never blocks behind one that is merely deciding.
pub async fn ensure_generator_running(
    manager: Arc<SessionManager>,
    providers: Arc<ProviderSet>,
    settings: Arc<Settings>,
    session_db_id: i64,
    source: &'static str,
) {
    let Some(active) = manager.get(session_db_id) else {
        warn!(session_db_id, source, "ensure_generator_running: no active session");
        return;
    };

    if active
        .spawn_in_progress
        .compare_exchange(false, true, Ordering::AcqRel, Ordering::Acquire)
        .is_err()
    {
        debug!(session_db_id, source, "spawn already in progress, skipping");
        return;
    }

    let mut handle_guard = active.generator_handle.lock().await;
    let decision = match handle_guard.as_ref() {
        None => "spawn",
        Some(h) if h.is_finished() => "respawn-finished",
        Some(_) => {
            let last_activity = active.state.lock().await.last_generator_activity;
            if last_activity.elapsed() > STALE_ACTIVITY_THRESHOLD {
                if let Some(old) = handle_guard.take() {
                    old.abort();
                }
                "respawn-stale"
            } else {
                "noop"
            }
        }
    };

    if decision != "noop" {
        let task_active = active.clone();
        let task_manager = manager.clone();
        let task_providers = providers.clone();
        let task_settings = settings.clone();
        let handle = tokio::spawn(async move {
            run_generator(task_manager, task_providers, task_settings, task_active, source).await;
        });
        *handle_guard = Some(handle);
        drop(handle_guard);
        info!(session_db_id, source, decision, "generator (re)started");
    }
    active.spawn_in_progress.store(false, Ordering::Release);
}

/// One session's generator loop: claims messages until the queue idles out
/// or the session is cancelled, switching providers and restarting per
/// [`attempt_with_fallback`]'s verdict.
async fn run_generator(
    manager: Arc<SessionManager>,
    providers: Arc<ProviderSet>,
    settings: Arc<Settings>,
    active: Arc<ActiveSession>,
    source: &'static str,
) {
    let session_db_id = active.session_db_id;
    debug!(session_db_id, source, "generator loop starting");

    'outer: loop {
        {
            let mut state = active.state.lock().await;
            state.last_generator_activity = Instant::now();
        }

        let Some(claimed) = manager.next_message(session_db_id).await else {
            let idle_timed_out = active.state.lock().await.idle_timed_out;
            debug!(session_db_id, idle_timed_out, "generator loop: no more work, exiting");
            break 'outer;
        };

        let initial_kind = {
            let state = active.state.lock().await;
            state.current_provider.unwrap_or(settings.provider.selected)
        };

        let outcome = match providers.get(initial_kind) {
            Some(initial_provider) => {
                attempt_with_fallback(
                    &manager,
                    &providers,
                    &settings,
                    &active,
                    initial_kind,
                    initial_provider,
                    &claimed,
                )
                .await
            }
            None => AttemptOutcome::Unrecoverable(format!(
                "provider {initial_kind:?} has no credentials configured"
            )),
        };

        match outcome {
            AttemptOutcome::Success => {
                let mut state = active.state.lock().await;
                state.consecutive_restarts = 0;
                state.last_interaction = Some(LastInteraction {
                    success: true,
                    error: None,
                    at: chrono::Utc::now(),
                });
                state.processing_message_ids.remove(&claimed.message.id);
                drop(state);
                if let Ok(false) = manager.storage().any_session_has_work(session_db_id).await {
                    let mut state = active.state.lock().await;
                    state.earliest_pending_timestamp = None;
                }
            }
            AttemptOutcome::Unrecoverable(msg) => {
                warn!(session_db_id, error = %msg, "generator: unrecoverable provider error, leaving message for self-heal");
                let mut state = active.state.lock().await;
                state.last_interaction = Some(LastInteraction {
                    success: false,
                    error: Some(msg),
                    at: chrono::Utc::now(),
                });
                drop(state);
                break 'outer;
            }
            AttemptOutcome::FallbackExhausted => {
                warn!(session_db_id, "generator: fallback chain exhausted, abandoning session");
                if let Err(e) = manager.storage().mark_abandoned(session_db_id).await {
                    warn!(session_db_id, error = %e, "mark_abandoned failed");
                }
                manager.remove_session_immediate(session_db_id);
                break 'outer;
            }
            AttemptOutcome::RetryableFailure(msg) => {
                if let Err(e) = manager.storage().mark_failed(session_db_id).await {
                    warn!(session_db_id, error = %e, "mark_failed failed");
                }
                let mut state = active.state.lock().await;
                state.last_interaction = Some(LastInteraction {
                    success: false,
                    error: Some(msg),
                    at: chrono::Utc::now(),
                });
                state.consecutive_restarts += 1;
                let restarts = state.consecutive_restarts;
                drop(state);

                let pending = manager.storage().pending_count(session_db_id).await.unwrap_or(0);
                if pending > 0 && restarts <= MAX_CONSECUTIVE_RESTARTS {
                    let backoff = backoff_for(restarts);
                    info!(session_db_id, restarts, backoff_secs = backoff.as_secs(), "generator: retrying after backoff");
                    tokio::time::sleep(backoff).await;
                    continue 'outer;
                }
                warn!(session_db_id, restarts, "generator: giving up after max consecutive restarts");
                break 'outer;
            }
        }
    }

    if let Some(child) = manager.subprocess_registry().get(session_db_id) {
        if !child.ensure_exit(SUBPROCESS_EXIT_BOUND).await {
            warn!(session_db_id, "generator exit: tracked subprocess still alive after 5s bound");
        }
        manager.subprocess_registry().remove(session_db_id);
    }

    let (is_processing, queue_depth) = manager.processing_status().await;
    manager.events().emit(SessionEvent::ProcessingStatus { is_processing, queue_depth });
    debug!(session_db_id, "generator loop exiting");
}

/// Verdict of one claimed message's processing attempt, driving
/// `run_generator`'s restart/fallback/give-up decision.
enum AttemptOutcome {
    Success,
    /// Never restarted; the claimed row is left in `processing` so it
    /// self-heals via the stale-claim threshold on the next claim (spec §7
    /// taxonomy item 2).
    Unrecoverable(String),
    FallbackExhausted,
    RetryableFailure(String),
}

/// Tries `initial_kind`/`initial_provider` first, then walks
/// `ProviderKind::fallback_order()` on a `Terminated` classification,
/// assigning a synthetic memory-session-id if the session never had one
/// (spec Scenario 5: "both messages are processed without user-visible
/// failure").
async fn attempt_with_fallback(
    manager: &Arc<SessionManager>,
    providers: &Arc<ProviderSet>,
    settings: &Arc<Settings>,
    active: &Arc<ActiveSession>,
    initial_kind: ProviderKind,
    initial_provider: Arc<dyn ProviderAdapter>,
    claimed: &ClaimedMessage,
) -> AttemptOutcome {
    let mut kind = initial_kind;
    let mut provider = initial_provider;
    let mut tried = vec![kind];

    loop {
        let request = build_request(active, claimed).await;
        {
            let mut state = active.state.lock().await;
            state.current_provider = Some(kind);
        }

        match provider.generate(active.session_db_id, request).await {
            Ok(outcome) => {
                return match persist_outcome(manager, settings, active, claimed, outcome, kind).await {
                    Ok(()) => AttemptOutcome::Success,
                    Err(e) => AttemptOutcome::RetryableFailure(e.to_string()),
                };
            }
            Err(e) => match provider.classify_error(&e) {
                ProviderErrorKind::Unrecoverable => return AttemptOutcome::Unrecoverable(e.to_string()),
                ProviderErrorKind::StaleResume => {
                    let mut state = active.state.lock().await;
                    state.memory_session_id = None;
                    state.force_init = true;
                    drop(state);
                    if let Err(update_err) = manager
                        .storage()
                        .update_memory_session_id(active.session_db_id, None)
                        .await
                    {
                        warn!(session_db_id = active.session_db_id, error = %update_err, "failed to clear stale memory_session_id");
                    }
                    return AttemptOutcome::RetryableFailure(e.to_string());
                }
                ProviderErrorKind::Terminated => {
                    let next = kind
                        .fallback_order()
                        .into_iter()
                        .filter(|k| !tried.contains(k))
                        .find_map(|k| providers.get(k).map(|p| (k, p)));
                    match next {
                        Some((next_kind, next_provider)) => {
                            info!(
                                session_db_id = active.session_db_id,
                                from = ?kind,
                                to = ?next_kind,
                                "provider session terminated upstream, falling back"
                            );
                            let needs_synthetic_id = active.state.lock().await.memory_session_id.is_none();
                            if needs_synthetic_id {
                                let synthetic = uuid::Uuid::new_v4().to_string();
                                active.state.lock().await.memory_session_id = Some(synthetic);
                            }
                            tried.push(next_kind);
                            kind = next_kind;
                            provider = next_provider;
                            continue;
                        }
                        None => return AttemptOutcome::FallbackExhausted,
                    }
                }
                ProviderErrorKind::Other => return AttemptOutcome::RetryableFailure(e.to_string()),
            },
        }
    }
}

async fn build_request(active: &Arc<ActiveSession>, claimed: &ClaimedMessage) -> ProviderRequest {
    let state = active.state.lock().await;
    ProviderRequest {
        conversation_history: state.conversation_history.clone(),
        payload: claimed.message.payload.clone(),
        memory_session_id: state.memory_session_id.clone(),
        project: state.project.clone(),
        prompt_number: claimed.message.prompt_number,
    }
}

/// Persists a provider's structured output: captures a newly assigned
/// `memory_session_id`, writes observations (deduplicated per
/// `settings.context.dedup_window_minutes`) and summaries, extends the
/// shared conversation history, and confirms the message processed.
async fn persist_outcome(
    manager: &Arc<SessionManager>,
    settings: &Arc<Settings>,
    active: &Arc<ActiveSession>,
    claimed: &ClaimedMessage,
    outcome: ProviderOutcome,
    provider_kind: ProviderKind,
) -> Result<(), mnemo_core::MnemoError> {
    let session_db_id = active.session_db_id;
    let dedup_window_secs = settings.context.dedup_window_minutes * 60;

    if let Some(new_id) = outcome.memory_session_id.clone() {
        let mut state = active.state.lock().await;
        if state.memory_session_id.as_deref() != Some(new_id.as_str()) {
            state.memory_session_id = Some(new_id.clone());
            drop(state);
            manager
                .storage()
                .update_memory_session_id(session_db_id, Some(&new_id))
                .await?;
        }
    }

    let (project, memory_session_id) = {
        let state = active.state.lock().await;
        (
            state.project.clone(),
            state
                .memory_session_id
                .clone()
                .unwrap_or_else(|| claimed.message.id.clone()),
        )
    };

    for draft in outcome.observations {
        let summary_note = format!("{}: {}", draft.observation_type, draft.title);
        let observation = manager
            .storage()
            .append_observation(&memory_session_id, &project, claimed.message.prompt_number, draft, dedup_window_secs)
            .await?;
        if let Some(observation) = observation {
            manager.events().emit(SessionEvent::NewObservation {
                session_db_id,
                observation,
            });
            let mut state = active.state.lock().await;
            state.conversation_history.push(ConversationTurn {
                role: "assistant".to_string(),
                content: summary_note,
            });
            state.cumulative_output_tokens += 1;
        }
    }

    for draft in outcome.summaries {
        let note = draft.request.clone();
        manager
            .storage()
            .append_summary(&memory_session_id, &project, claimed.message.prompt_number, draft)
            .await?;
        let mut state = active.state.lock().await;
        state.conversation_history.push(ConversationTurn {
            role: "assistant".to_string(),
            content: note,
        });
        state.cumulative_output_tokens += 1;
    }

    manager.storage().confirm_processed(&claimed.message.id).await?;
    debug!(session_db_id, provider = ?provider_kind, message_id = %claimed.message.id, "message confirmed processed");
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn backoff_steps_match_spec() {
        assert_eq!(backoff_for(1), Duration::from_secs(1));
        assert_eq!(backoff_for(2), Duration::from_secs(2));
        assert_eq!(backoff_for(3), Duration::from_secs(4));
        assert_eq!(backoff_for(4), Duration::from_secs(8));
        assert_eq!(backoff_for(10), Duration::from_secs(8));
    }
}
