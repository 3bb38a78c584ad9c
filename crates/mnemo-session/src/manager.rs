// SPDX-FileCopyrightText: 2026 Mnemo Contributors
// SPDX-License-Identifier: MIT OR Apache-2.0

//! `SessionManager`: the in-memory map of [`ActiveSession`]s (spec §4.3).
//!
//! Backed by the durable pending-message store (`mnemo-storage`), it owns
//! the per-session queue notifier and cancellation token, and exposes the
//! message-iterator the generator loop drains.

use std::sync::Arc;
use std::time::Duration;

use chrono::Utc;
use dashmap::DashMap;
use mnemo_core::error::MnemoError;
use mnemo_core::traits::StorageAdapter;
use mnemo_core::types::{MessagePayload, PendingMessage, Session};
use mnemo_core::SubprocessRegistry;
use tokio::time::timeout;
use tracing::{debug, info, warn};

use crate::events::{EventSink, SessionEvent};
use crate::session::ActiveSession;

/// Idle timeout before the message iterator gives up and the generator
/// exits cleanly without restarting (spec §5).
pub const IDLE_TIMEOUT: Duration = Duration::from_secs(180);
/// Self-heal threshold for `processing` rows claimed by a dead generator
/// (spec §4.2 item 2 / invariant I4).
pub const CLAIM_STALE_THRESHOLD_SECS: i64 = 60;
/// In-memory reap threshold: a session with no generator and no pending
/// work this long is dropped from the active map (spec §4.3/§5).
const REAP_AGE: Duration = Duration::from_secs(15 * 60);
/// Bound on awaiting a session's generator during `delete_session`.
const GENERATOR_JOIN_BOUND: Duration = Duration::from_secs(30);
/// Bound on confirming a tracked subprocess actually exited.
const SUBPROCESS_EXIT_BOUND: Duration = Duration::from_secs(5);

/// One message claimed off the durable queue, with enough context for the
/// generator to timestamp output accurately even mid-backlog-drain (spec
/// §4.3 "earliestPendingTimestamp").
pub struct ClaimedMessage {
    pub message: PendingMessage,
    pub original_timestamp: chrono::DateTime<chrono::Utc>,
}

/// Owns the in-memory map of [`ActiveSession`]s (spec §4.3).
pub struct SessionManager {
    storage: Arc<dyn StorageAdapter>,
    sessions: DashMap<i64, Arc<ActiveSession>>,
    events: Arc<dyn EventSink>,
    subprocess_registry: SubprocessRegistry,
}

impl SessionManager {
    pub fn new(
        storage: Arc<dyn StorageAdapter>,
        events: Arc<dyn EventSink>,
        subprocess_registry: SubprocessRegistry,
    ) -> Self {
        Self {
            storage,
            sessions: DashMap::new(),
            events,
            subprocess_registry,
        }
    }

    pub fn storage(&self) -> &Arc<dyn StorageAdapter> {
        &self.storage
    }

    pub fn events(&self) -> &Arc<dyn EventSink> {
        &self.events
    }

    pub fn subprocess_registry(&self) -> &SubprocessRegistry {
        &self.subprocess_registry
    }

    pub fn get(&self, session_db_id: i64) -> Option<Arc<ActiveSession>> {
        self.sessions.get(&session_db_id).map(|e| e.clone())
    }

    pub fn active_session_ids(&self) -> Vec<i64> {
        self.sessions.iter().map(|e| *e.key()).collect()
    }

    pub fn len(&self) -> usize {
        self.sessions.len()
    }

    pub fn is_empty(&self) -> bool {
        self.sessions.is_empty()
    }

    /// Idempotently creates or resumes an in-memory session (spec §4.3
    /// "initialize-session"). A `memory_session_id` already present on the
    /// storage row is never carried into a freshly constructed
    /// [`ActiveSession`] -- it is stale after any worker restart (spec §9
    /// "Avoid stale resume", invariant tested as "I-SESSION-RESTART" in
    /// spec §8).
    pub async fn initialize_session(
        &self,
        content_session_id: &str,
        project: &str,
        user_prompt: Option<&str>,
    ) -> Result<(Session, Arc<ActiveSession>, bool), MnemoError> {
        let (row, created) = self
            .storage
            .create_or_get_session(content_session_id, project, user_prompt)
            .await?;

        if let Some(existing) = self.sessions.get(&row.session_db_id) {
            let mut state = existing.state.lock().await;
            if state.project != project {
                debug!(
                    session_db_id = row.session_db_id,
                    old = %state.project,
                    new = %project,
                    "project changed on re-init, refreshing"
                );
                state.project = project.to_string();
            }
            if let Some(p) = user_prompt {
                state.user_prompt = Some(p.to_string());
            }
            drop(state);
            return Ok((row, existing.clone(), created));
        }

        if row.memory_session_id.is_some() {
            info!(
                session_db_id = row.session_db_id,
                "discarding stale memory_session_id from storage on fresh in-memory init"
            );
        }

        let active = Arc::new(ActiveSession::new(
            row.session_db_id,
            content_session_id.to_string(),
            project.to_string(),
            user_prompt.map(|s| s.to_string()),
        ));
        self.sessions.insert(row.session_db_id, active.clone());
        self.events.emit(SessionEvent::SessionStarted {
            session_db_id: row.session_db_id,
            content_session_id: content_session_id.to_string(),
        });
        Ok((row, active, created))
    }

    /// Auto-initializes an [`ActiveSession`] from storage if not already
    /// resident, per §4.3 "queue-observation ... auto-initializes the
    /// session from storage if not resident".
    async fn resolve_active(&self, session_db_id: i64) -> Result<Arc<ActiveSession>, MnemoError> {
        if let Some(existing) = self.sessions.get(&session_db_id) {
            return Ok(existing.clone());
        }
        let row = self
            .storage
            .get_session_by_db_id(session_db_id)
            .await?
            .ok_or_else(|| MnemoError::Internal(format!("session {session_db_id} not found in storage")))?;
        let active = Arc::new(ActiveSession::new(
            row.session_db_id,
            row.content_session_id.clone(),
            row.project.clone(),
            None,
        ));
        self.sessions.insert(session_db_id, active.clone());
        Ok(active)
    }

    /// Persists the message to the durable queue before returning (I2),
    /// then wakes the session's generator. No in-memory fallback queue
    /// exists: a persistence failure propagates to the caller.
    async fn enqueue(
        &self,
        session_db_id: i64,
        content_session_id: &str,
        prompt_number: i64,
        payload: MessagePayload,
    ) -> Result<PendingMessage, MnemoError> {
        let active = self.resolve_active(session_db_id).await?;
        let msg = self
            .storage
            .enqueue(session_db_id, content_session_id, prompt_number, payload)
            .await?;
        {
            let mut state = active.state.lock().await;
            if state.earliest_pending_timestamp.is_none() {
                state.earliest_pending_timestamp = Some(Utc::now());
            }
        }
        active.wake();
        Ok(msg)
    }

    pub async fn queue_observation(
        &self,
        session_db_id: i64,
        content_session_id: &str,
        prompt_number: i64,
        tool_name: String,
        tool_input: String,
        tool_response: String,
        cwd: Option<String>,
    ) -> Result<PendingMessage, MnemoError> {
        let msg = self
            .enqueue(
                session_db_id,
                content_session_id,
                prompt_number,
                MessagePayload::Observation {
                    tool_name,
                    tool_input,
                    tool_response,
                    cwd,
                },
            )
            .await?;
        self.events.emit(SessionEvent::ObservationQueued {
            session_db_id,
            content_session_id: content_session_id.to_string(),
        });
        Ok(msg)
    }

    pub async fn queue_summarize(
        &self,
        session_db_id: i64,
        content_session_id: &str,
        prompt_number: i64,
        last_assistant_message: Option<String>,
    ) -> Result<PendingMessage, MnemoError> {
        let msg = self
            .enqueue(
                session_db_id,
                content_session_id,
                prompt_number,
                MessagePayload::Summarize { last_assistant_message },
            )
            .await?;
        self.events.emit(SessionEvent::SummarizeQueued {
            session_db_id,
            content_session_id: content_session_id.to_string(),
        });
        Ok(msg)
    }

    /// Blocks until a message is claimable, the session is cancelled, or
    /// the idle timeout elapses (spec §4.3 "message-iterator"). Self-heals
    /// any `processing` row left behind by a crashed generator on every
    /// claim attempt (spec §4.2 item 2).
    pub async fn next_message(&self, session_db_id: i64) -> Option<ClaimedMessage> {
        let active = self.get(session_db_id)?;
        loop {
            match self
                .storage
                .claim_next(session_db_id, CLAIM_STALE_THRESHOLD_SECS)
                .await
            {
                Ok(Some(message)) => {
                    let original_timestamp =
                        chrono::DateTime::from_timestamp(message.created_at_epoch, 0).unwrap_or_else(Utc::now);
                    let mut state = active.state.lock().await;
                    state.processing_message_ids.insert(message.id.clone());
                    return Some(ClaimedMessage { message, original_timestamp });
                }
                Ok(None) => {}
                Err(e) => {
                    warn!(session_db_id, error = %e, "claim_next failed, will retry on next wake");
                }
            }

            let notified = active.notify.notified();
            tokio::select! {
                _ = notified => continue,
                _ = active.cancellation.cancelled() => return None,
                _ = tokio::time::sleep(IDLE_TIMEOUT) => {
                    let mut state = active.state.lock().await;
                    state.idle_timed_out = true;
                    drop(state);
                    active.cancellation.cancel();
                    return None;
                }
            }
        }
    }

    /// Aborts cancellation, awaits the generator (bounded), confirms the
    /// tracked subprocess is gone, and drops the session from the map
    /// (spec §4.3 "delete-session").
    pub async fn delete_session(&self, session_db_id: i64) {
        let Some((_, active)) = self.sessions.remove(&session_db_id) else {
            return;
        };
        active.cancellation.cancel();

        let handle = active.generator_handle.lock().await.take();
        if let Some(handle) = handle {
            if timeout(GENERATOR_JOIN_BOUND, handle).await.is_err() {
                warn!(session_db_id, "generator did not exit within 30s during delete_session, continuing");
            }
        }

        if let Some(child) = self.subprocess_registry.get(session_db_id) {
            if !child.ensure_exit(SUBPROCESS_EXIT_BOUND).await {
                warn!(session_db_id, "tracked subprocess still alive after 5s bound during delete_session");
            }
            self.subprocess_registry.remove(session_db_id);
        }

        self.events.emit(SessionEvent::SessionCompleted {
            session_db_id,
            content_session_id: active.content_session_id.clone(),
        });
    }

    /// Non-blocking removal used by the generator task itself -- awaiting
    /// its own handle the way `delete_session` does would deadlock (spec
    /// §4.3 "remove-session-immediate").
    pub fn remove_session_immediate(&self, session_db_id: i64) {
        if let Some((_, active)) = self.sessions.remove(&session_db_id) {
            active.cancellation.cancel();
            self.events.emit(SessionEvent::SessionCompleted {
                session_db_id,
                content_session_id: active.content_session_id.clone(),
            });
        }
    }

    /// Periodic sweep (spec §4.3, run every 2 minutes by `mnemo-cron`):
    /// drops in-memory sessions with no generator and no pending work,
    /// older than 15 minutes. This is what unblocks the orphan subprocess
    /// reaper (spec §4.6) -- a session lingering in memory makes that
    /// reaper a no-op for its subprocess.
    pub async fn reap_stale_sessions(&self) {
        let candidates: Vec<i64> = self
            .sessions
            .iter()
            .filter(|e| e.age() > REAP_AGE)
            .map(|e| *e.key())
            .collect();

        for session_db_id in candidates {
            let Some(active) = self.get(session_db_id) else { continue };
            let has_generator = active.generator_handle.lock().await.is_some();
            if has_generator {
                continue;
            }
            match self.storage.any_session_has_work(session_db_id).await {
                Ok(true) => continue,
                Ok(false) => {}
                Err(e) => {
                    warn!(session_db_id, error = %e, "reap_stale_sessions: storage check failed, skipping");
                    continue;
                }
            }
            debug!(session_db_id, "reaping stale in-memory session");
            self.sessions.remove(&session_db_id);
        }
    }

    /// Aggregate processing status across all active sessions, for the
    /// `processing_status` SSE event (spec §4.5).
    pub async fn processing_status(&self) -> (bool, u64) {
        let mut is_processing = false;
        let mut queue_depth = 0u64;
        for entry in self.sessions.iter() {
            let session_db_id = *entry.key();
            if entry.generator_handle.lock().await.is_some() {
                is_processing = true;
            }
            if let Ok(count) = self.storage.pending_count(session_db_id).await {
                queue_depth += count;
            }
        }
        (is_processing, queue_depth)
    }
}
