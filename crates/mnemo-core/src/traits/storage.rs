// SPDX-FileCopyrightText: 2026 Mnemo Contributors
// SPDX-License-Identifier: MIT OR Apache-2.0

//! Storage adapter trait: the typed surface the session manager and
//! generator use against the embedded relational store (spec §4.1/§4.2).

use async_trait::async_trait;

use crate::error::MnemoError;
use crate::traits::adapter::PluginAdapter;
use crate::types::{
    Observation, ObservationDraft, PendingMessage, Session, SessionSummary, SummaryDraft,
    UserPrompt,
};

/// Adapter for the embedded relational store.
///
/// `initialize()` opens (or creates) the database and runs all migrations;
/// `close()` flushes and releases the handle. Everything else is a typed
/// accessor over the five entities in spec §3.
#[async_trait]
pub trait StorageAdapter: PluginAdapter {
    /// Opens/creates the database file and runs migrations to the latest
    /// schema version. Fails with a `Fatal`-classified error if the file is
    /// corrupt or a migration aborts mid-transaction.
    async fn initialize(&self) -> Result<(), MnemoError>;

    /// Flushes and releases the handle (checkpoints the write-ahead log).
    async fn close(&self) -> Result<(), MnemoError>;

    // --- Sessions ---

    /// Idempotently creates or fetches a session by `content_session_id`.
    /// Returns `(session, created)`.
    async fn create_or_get_session(
        &self,
        content_session_id: &str,
        project: &str,
        first_user_prompt: Option<&str>,
    ) -> Result<(Session, bool), MnemoError>;

    async fn get_session_by_content_id(
        &self,
        content_session_id: &str,
    ) -> Result<Option<Session>, MnemoError>;

    async fn get_session_by_db_id(&self, session_db_id: i64) -> Result<Option<Session>, MnemoError>;

    async fn update_memory_session_id(
        &self,
        session_db_id: i64,
        memory_session_id: Option<&str>,
    ) -> Result<(), MnemoError>;

    async fn increment_prompt_counter(&self, session_db_id: i64) -> Result<i64, MnemoError>;

    async fn complete_session(&self, session_db_id: i64) -> Result<(), MnemoError>;

    /// Lists sessions by status, oldest first.
    async fn list_sessions_by_status(
        &self,
        status: crate::types::SessionStatus,
    ) -> Result<Vec<Session>, MnemoError>;

    /// Marks sessions with `status = active` and `started_at` older than
    /// `max_age_secs` as `failed`, failing their processing/pending
    /// messages along with them (storage-level stale threshold, §5).
    async fn fail_stale_active_sessions(&self, max_age_secs: i64) -> Result<u64, MnemoError>;

    // --- Observations / summaries / prompts ---

    /// Inserts an observation, deduplicating by `content_hash` within
    /// `dedup_window_secs`. Returns `None` if rejected as a duplicate.
    async fn append_observation(
        &self,
        memory_session_id: &str,
        project: &str,
        prompt_number: i64,
        draft: ObservationDraft,
        dedup_window_secs: i64,
    ) -> Result<Option<Observation>, MnemoError>;

    async fn append_summary(
        &self,
        memory_session_id: &str,
        project: &str,
        prompt_number: i64,
        draft: SummaryDraft,
    ) -> Result<SessionSummary, MnemoError>;

    async fn save_user_prompt(
        &self,
        content_session_id: &str,
        prompt_number: i64,
        prompt_text: &str,
    ) -> Result<UserPrompt, MnemoError>;

    async fn get_latest_user_prompt(
        &self,
        content_session_id: &str,
    ) -> Result<Option<UserPrompt>, MnemoError>;

    async fn list_observations_by_time_window(
        &self,
        project: &str,
        since: chrono::DateTime<chrono::Utc>,
    ) -> Result<Vec<Observation>, MnemoError>;

    // --- Pending-message queue (claim-confirm protocol, §4.2) ---

    /// Transactional insert with status=pending, retry_count=0. Must
    /// complete before the enqueuing HTTP handler returns 2xx (I2).
    async fn enqueue(
        &self,
        session_db_id: i64,
        content_session_id: &str,
        prompt_number: i64,
        payload: crate::types::MessagePayload,
    ) -> Result<PendingMessage, MnemoError>;

    /// Self-heals stale `processing` rows for this session (older than
    /// `stale_threshold_secs`), then claims the oldest `pending` row.
    async fn claim_next(
        &self,
        session_db_id: i64,
        stale_threshold_secs: i64,
    ) -> Result<Option<PendingMessage>, MnemoError>;

    async fn confirm_processed(&self, message_id: &str) -> Result<(), MnemoError>;

    /// Bulk-transitions all `processing` messages for a session to
    /// `failed`.
    async fn mark_failed(&self, session_db_id: i64) -> Result<u64, MnemoError>;

    /// Bulk-transitions all `pending`+`processing` messages for a session
    /// to `abandoned`.
    async fn mark_abandoned(&self, session_db_id: i64) -> Result<u64, MnemoError>;

    /// Resets all `processing` rows whose age exceeds `threshold_secs`
    /// back to `pending`. Called with `threshold_secs=0` on worker startup
    /// so no row remains stuck across a crash.
    async fn reset_stale(&self, threshold_secs: i64) -> Result<u64, MnemoError>;

    async fn pending_count(&self, session_db_id: i64) -> Result<u64, MnemoError>;

    async fn any_session_has_work(&self, session_db_id: i64) -> Result<bool, MnemoError>;

    /// Returns the set of session_db_ids with at least one pending or
    /// processing message.
    async fn sessions_with_pending(&self) -> Result<Vec<i64>, MnemoError>;

    /// Count of messages in terminal `failed` status, surfaced through
    /// `/api/health` per the mark-failed open-question decision.
    async fn count_failed_messages(&self) -> Result<u64, MnemoError>;
}
