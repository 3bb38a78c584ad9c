// SPDX-FileCopyrightText: 2026 Mnemo Contributors
// SPDX-License-Identifier: MIT OR Apache-2.0

//! Test harness for end-to-end session/generator integration testing.
//!
//! `TestHarness` assembles a temp-dir-backed [`SqliteStorage`], a
//! [`SessionManager`], and a full [`ProviderSet`] of [`MockProvider`]s
//! behind one struct, so a test can enqueue work and drive the generator
//! loop to completion without a real LLM binary on PATH.

use std::sync::Arc;
use std::time::Duration;

use mnemo_config::model::Settings;
use mnemo_core::error::MnemoError;
use mnemo_core::types::{ProviderSlot, Session};
use mnemo_core::SubprocessRegistry;
use mnemo_session::events::NullSink;
use mnemo_session::generator::{ensure_generator_running, ProviderSet};
use mnemo_session::manager::SessionManager;
use mnemo_session::session::ActiveSession;
use mnemo_storage::SqliteStorage;

use crate::mock_provider::MockProvider;

/// Bound on [`TestHarness::drive_to_idle`]'s poll loop, well past any
/// generator work a test harness should ever produce.
const DRIVE_TIMEOUT: Duration = Duration::from_secs(10);
const POLL_INTERVAL: Duration = Duration::from_millis(20);

/// A complete test environment: temp SQLite storage, a `SessionManager`,
/// and three scriptable `MockProvider`s wired as a `ProviderSet`.
pub struct TestHarness {
    pub storage: Arc<dyn mnemo_core::traits::StorageAdapter>,
    pub manager: Arc<SessionManager>,
    pub providers: Arc<ProviderSet>,
    pub anthropic: Arc<MockProvider>,
    pub openai: Arc<MockProvider>,
    pub gemini: Arc<MockProvider>,
    pub settings: Arc<Settings>,
    _temp_dir: tempfile::TempDir,
}

impl TestHarness {
    /// Builds a harness with default `Settings` and empty mock provider
    /// queues (each call to `generate` falls back to a default outcome
    /// until a test scripts one via `push_outcome`/`push_error`).
    pub async fn new() -> Result<Self, MnemoError> {
        Self::with_settings(Settings::default()).await
    }

    pub async fn with_settings(settings: Settings) -> Result<Self, MnemoError> {
        let temp_dir = tempfile::TempDir::new()
            .map_err(|e| MnemoError::Storage { source: Box::new(e) })?;
        let db_path = temp_dir.path().join("test.db");

        let storage = SqliteStorage::new(db_path.to_str().expect("utf8 temp path"));
        mnemo_core::traits::StorageAdapter::initialize(&storage).await?;
        let storage: Arc<dyn mnemo_core::traits::StorageAdapter> = Arc::new(storage);

        let anthropic = Arc::new(MockProvider::new("anthropic", ProviderSlot::Primary));
        let openai = Arc::new(MockProvider::new("openai", ProviderSlot::AlternateA));
        let gemini = Arc::new(MockProvider::new("gemini", ProviderSlot::AlternateB));

        let providers = Arc::new(ProviderSet {
            anthropic: Some(anthropic.clone()),
            openai: Some(openai.clone()),
            gemini: Some(gemini.clone()),
        });

        let manager = Arc::new(SessionManager::new(
            storage.clone(),
            Arc::new(NullSink),
            SubprocessRegistry::new(),
        ));

        Ok(Self {
            storage,
            manager,
            providers,
            anthropic,
            openai,
            gemini,
            settings: Arc::new(settings),
            _temp_dir: temp_dir,
        })
    }

    /// Idempotently creates or resumes a session (spec §4.3 "initialize-session").
    pub async fn init_session(
        &self,
        content_session_id: &str,
        project: &str,
        user_prompt: Option<&str>,
    ) -> Result<(Session, Arc<ActiveSession>), MnemoError> {
        let (row, active, _created) = self
            .manager
            .initialize_session(content_session_id, project, user_prompt)
            .await?;
        Ok((row, active))
    }

    /// Starts (or confirms already running) the generator for `session_db_id`.
    pub async fn start_generator(&self, session_db_id: i64) {
        ensure_generator_running(
            self.manager.clone(),
            self.providers.clone(),
            self.settings.clone(),
            session_db_id,
            "test_harness",
        )
        .await;
    }

    /// Polls until the session's durable queue is empty or `DRIVE_TIMEOUT`
    /// elapses. Used after enqueueing work and starting the generator to
    /// let a test assert on persisted state without a fixed sleep.
    pub async fn drive_to_idle(&self, session_db_id: i64) -> Result<(), MnemoError> {
        let deadline = tokio::time::Instant::now() + DRIVE_TIMEOUT;
        loop {
            if !self.storage.any_session_has_work(session_db_id).await? {
                return Ok(());
            }
            if tokio::time::Instant::now() >= deadline {
                return Err(MnemoError::Timeout { duration: DRIVE_TIMEOUT });
            }
            tokio::time::sleep(POLL_INTERVAL).await;
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use mnemo_core::types::{MessagePayload, ObservationDraft, ObservationType, ProviderOutcome};

    #[tokio::test]
    async fn harness_builds_independent_temp_databases() {
        let h1 = TestHarness::new().await.unwrap();
        let h2 = TestHarness::new().await.unwrap();
        let (row1, _) = h1.init_session("c1", "proj", None).await.unwrap();
        let sessions2 = h2
            .storage
            .list_sessions_by_status(mnemo_core::types::SessionStatus::Active)
            .await
            .unwrap();
        assert!(sessions2.is_empty());
        assert!(row1.session_db_id >= 1);
    }

    #[tokio::test]
    async fn drive_to_idle_waits_for_generator_to_drain_queue() {
        let harness = TestHarness::new().await.unwrap();
        harness
            .anthropic
            .push_outcome(ProviderOutcome {
                memory_session_id: Some("mem-1".to_string()),
                observations: vec![ObservationDraft {
                    observation_type: ObservationType::Discovery,
                    title: "t".to_string(),
                    subtitle: None,
                    narrative: "n".to_string(),
                    facts: Vec::new(),
                    concepts: Vec::new(),
                    files_read: Vec::new(),
                    files_modified: Vec::new(),
                    discovery_tokens: 1,
                }],
                summaries: Vec::new(),
            })
            .await;

        let (row, _active) = harness.init_session("c1", "proj", None).await.unwrap();
        harness
            .manager
            .queue_observation(row.session_db_id, "c1", 1, "Read".to_string(), "{}".to_string(), "ok".to_string(), None)
            .await
            .unwrap();
        harness.start_generator(row.session_db_id).await;
        harness.drive_to_idle(row.session_db_id).await.unwrap();

        assert_eq!(harness.anthropic.call_count(), 1);
        let observations = harness
            .storage
            .list_observations_by_time_window("proj", chrono::Utc::now() - chrono::Duration::hours(1))
            .await
            .unwrap();
        assert_eq!(observations.len(), 1);
        let _ = MessagePayload::Summarize { last_assistant_message: None };
    }

    #[tokio::test]
    async fn missing_selected_provider_leaves_message_processing_for_self_heal() {
        let mut harness = TestHarness::new().await.unwrap();
        harness.providers = Arc::new(ProviderSet {
            anthropic: None,
            openai: Some(harness.openai.clone()),
            gemini: Some(harness.gemini.clone()),
        });

        let (row, _active) = harness.init_session("c1", "proj", None).await.unwrap();
        harness
            .manager
            .queue_observation(row.session_db_id, "c1", 1, "Read".to_string(), "{}".to_string(), "ok".to_string(), None)
            .await
            .unwrap();
        harness.start_generator(row.session_db_id).await;

        // The generator exits immediately on an unavailable selected provider
        // without confirming or failing the claimed row -- it stays claimable
        // by the 60s stale-claim self-heal (spec §4.4/§7 taxonomy item 2).
        tokio::time::sleep(Duration::from_millis(100)).await;
        assert!(harness.storage.any_session_has_work(row.session_db_id).await.unwrap());
        assert_eq!(harness.anthropic.call_count(), 0);
        assert_eq!(harness.openai.call_count(), 0);
    }
}
