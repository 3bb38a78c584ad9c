// SPDX-FileCopyrightText: 2026 Mnemo Contributors
// SPDX-License-Identifier: MIT OR Apache-2.0

//! SQLite implementation of `mnemo_core::traits::StorageAdapter`.

use async_trait::async_trait;
use mnemo_core::types::{
    AdapterType, HealthStatus, MessagePayload, Observation, ObservationDraft, PendingMessage,
    Session, SessionStatus, SessionSummary, SummaryDraft, UserPrompt,
};
use mnemo_core::{MnemoError, PluginAdapter, StorageAdapter};
use tokio::sync::OnceCell;
use tracing::debug;

use crate::database::{map_tr_err, Database};
use crate::queries;

/// SQLite-backed storage adapter.
///
/// Wraps a [`Database`] handle and delegates all query operations to the
/// typed query modules. The database is lazily initialized on the first
/// call to [`StorageAdapter::initialize`].
pub struct SqliteStorage {
    database_path: String,
    db: OnceCell<Database>,
}

impl SqliteStorage {
    pub fn new(database_path: impl Into<String>) -> Self {
        Self {
            database_path: database_path.into(),
            db: OnceCell::new(),
        }
    }

    fn db(&self) -> Result<&Database, MnemoError> {
        self.db.get().ok_or_else(|| MnemoError::Storage {
            source: "storage not initialized -- call initialize() first".into(),
        })
    }
}

#[async_trait]
impl PluginAdapter for SqliteStorage {
    fn name(&self) -> &str {
        "sqlite"
    }

    fn version(&self) -> semver::Version {
        semver::Version::new(0, 1, 0)
    }

    fn adapter_type(&self) -> AdapterType {
        AdapterType::Storage
    }

    async fn health_check(&self) -> Result<HealthStatus, MnemoError> {
        let db = self.db()?;
        db.connection()
            .call(|conn| -> Result<(), rusqlite::Error> {
                conn.execute_batch("SELECT 1;")?;
                Ok(())
            })
            .await
            .map_err(map_tr_err)?;
        Ok(HealthStatus::Healthy)
    }

    async fn shutdown(&self) -> Result<(), MnemoError> {
        if let Some(db) = self.db.get() {
            db.connection()
                .call(|conn| -> Result<(), rusqlite::Error> {
                    conn.execute_batch("PRAGMA wal_checkpoint(TRUNCATE);")?;
                    Ok(())
                })
                .await
                .map_err(map_tr_err)?;
            debug!("shutdown: WAL checkpoint complete");
        }
        Ok(())
    }
}

#[async_trait]
impl StorageAdapter for SqliteStorage {
    async fn initialize(&self) -> Result<(), MnemoError> {
        let db = Database::open(&self.database_path).await?;
        self.db.set(db).map_err(|_| MnemoError::Storage {
            source: "storage already initialized".into(),
        })?;
        debug!(path = %self.database_path, "SQLite storage initialized");
        Ok(())
    }

    async fn close(&self) -> Result<(), MnemoError> {
        let db = self.db()?;
        db.connection()
            .call(|conn| -> Result<(), rusqlite::Error> {
                conn.execute_batch("PRAGMA wal_checkpoint(TRUNCATE);")?;
                Ok(())
            })
            .await
            .map_err(map_tr_err)?;
        debug!("WAL checkpoint complete");
        Ok(())
    }

    async fn create_or_get_session(
        &self,
        content_session_id: &str,
        project: &str,
        first_user_prompt: Option<&str>,
    ) -> Result<(Session, bool), MnemoError> {
        queries::sessions::create_or_get_session(self.db()?, content_session_id, project, first_user_prompt).await
    }

    async fn get_session_by_content_id(
        &self,
        content_session_id: &str,
    ) -> Result<Option<Session>, MnemoError> {
        queries::sessions::get_session_by_content_id(self.db()?, content_session_id).await
    }

    async fn get_session_by_db_id(&self, session_db_id: i64) -> Result<Option<Session>, MnemoError> {
        queries::sessions::get_session_by_db_id(self.db()?, session_db_id).await
    }

    async fn update_memory_session_id(
        &self,
        session_db_id: i64,
        memory_session_id: Option<&str>,
    ) -> Result<(), MnemoError> {
        queries::sessions::update_memory_session_id(self.db()?, session_db_id, memory_session_id).await
    }

    async fn increment_prompt_counter(&self, session_db_id: i64) -> Result<i64, MnemoError> {
        queries::sessions::increment_prompt_counter(self.db()?, session_db_id).await
    }

    async fn complete_session(&self, session_db_id: i64) -> Result<(), MnemoError> {
        queries::sessions::complete_session(self.db()?, session_db_id).await
    }

    async fn list_sessions_by_status(&self, status: SessionStatus) -> Result<Vec<Session>, MnemoError> {
        queries::sessions::list_sessions_by_status(self.db()?, status).await
    }

    async fn fail_stale_active_sessions(&self, max_age_secs: i64) -> Result<u64, MnemoError> {
        queries::sessions::fail_stale_active_sessions(self.db()?, max_age_secs).await
    }

    async fn append_observation(
        &self,
        memory_session_id: &str,
        project: &str,
        prompt_number: i64,
        draft: ObservationDraft,
        dedup_window_secs: i64,
    ) -> Result<Option<Observation>, MnemoError> {
        queries::observations::append_observation(
            self.db()?,
            memory_session_id,
            project,
            prompt_number,
            draft,
            dedup_window_secs,
        )
        .await
    }

    async fn append_summary(
        &self,
        memory_session_id: &str,
        project: &str,
        prompt_number: i64,
        draft: SummaryDraft,
    ) -> Result<SessionSummary, MnemoError> {
        queries::observations::append_summary(self.db()?, memory_session_id, project, prompt_number, draft).await
    }

    async fn save_user_prompt(
        &self,
        content_session_id: &str,
        prompt_number: i64,
        prompt_text: &str,
    ) -> Result<UserPrompt, MnemoError> {
        queries::observations::save_user_prompt(self.db()?, content_session_id, prompt_number, prompt_text).await
    }

    async fn get_latest_user_prompt(
        &self,
        content_session_id: &str,
    ) -> Result<Option<UserPrompt>, MnemoError> {
        queries::observations::get_latest_user_prompt(self.db()?, content_session_id).await
    }

    async fn list_observations_by_time_window(
        &self,
        project: &str,
        since: chrono::DateTime<chrono::Utc>,
    ) -> Result<Vec<Observation>, MnemoError> {
        queries::observations::list_observations_by_time_window(self.db()?, project, since).await
    }

    async fn enqueue(
        &self,
        session_db_id: i64,
        content_session_id: &str,
        prompt_number: i64,
        payload: MessagePayload,
    ) -> Result<PendingMessage, MnemoError> {
        queries::queue::enqueue(self.db()?, session_db_id, content_session_id, prompt_number, payload).await
    }

    async fn claim_next(
        &self,
        session_db_id: i64,
        stale_threshold_secs: i64,
    ) -> Result<Option<PendingMessage>, MnemoError> {
        queries::queue::claim_next(self.db()?, session_db_id, stale_threshold_secs).await
    }

    async fn confirm_processed(&self, message_id: &str) -> Result<(), MnemoError> {
        queries::queue::confirm_processed(self.db()?, message_id).await
    }

    async fn mark_failed(&self, session_db_id: i64) -> Result<u64, MnemoError> {
        queries::queue::mark_failed(self.db()?, session_db_id).await
    }

    async fn mark_abandoned(&self, session_db_id: i64) -> Result<u64, MnemoError> {
        queries::queue::mark_abandoned(self.db()?, session_db_id).await
    }

    async fn reset_stale(&self, threshold_secs: i64) -> Result<u64, MnemoError> {
        queries::queue::reset_stale(self.db()?, threshold_secs).await
    }

    async fn pending_count(&self, session_db_id: i64) -> Result<u64, MnemoError> {
        queries::queue::pending_count(self.db()?, session_db_id).await
    }

    async fn any_session_has_work(&self, session_db_id: i64) -> Result<bool, MnemoError> {
        queries::queue::any_session_has_work(self.db()?, session_db_id).await
    }

    async fn sessions_with_pending(&self) -> Result<Vec<i64>, MnemoError> {
        queries::queue::sessions_with_pending(self.db()?).await
    }

    async fn count_failed_messages(&self) -> Result<u64, MnemoError> {
        queries::queue::count_failed_messages(self.db()?).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use mnemo_core::types::MessagePayload;
    use tempfile::tempdir;

    #[tokio::test]
    async fn adapter_implements_plugin_adapter() {
        let dir = tempdir().unwrap();
        let storage = SqliteStorage::new(dir.path().join("t.db").to_str().unwrap());
        assert_eq!(storage.name(), "sqlite");
        assert_eq!(storage.adapter_type(), AdapterType::Storage);
    }

    #[tokio::test]
    async fn initialize_twice_returns_error() {
        let dir = tempdir().unwrap();
        let storage = SqliteStorage::new(dir.path().join("t.db").to_str().unwrap());
        storage.initialize().await.unwrap();
        assert!(storage.initialize().await.is_err());
    }

    #[tokio::test]
    async fn full_session_and_queue_lifecycle_through_adapter() {
        let dir = tempdir().unwrap();
        let storage = SqliteStorage::new(dir.path().join("t.db").to_str().unwrap());
        storage.initialize().await.unwrap();

        let (session, created) = storage
            .create_or_get_session("content-1", "proj", Some("hi"))
            .await
            .unwrap();
        assert!(created);

        let msg = storage
            .enqueue(
                session.session_db_id,
                "content-1",
                1,
                MessagePayload::Summarize {
                    last_assistant_message: None,
                },
            )
            .await
            .unwrap();

        let claimed = storage
            .claim_next(session.session_db_id, 1800)
            .await
            .unwrap()
            .unwrap();
        assert_eq!(claimed.id, msg.id);

        storage.confirm_processed(&msg.id).await.unwrap();
        storage.complete_session(session.session_db_id).await.unwrap();

        let fetched = storage
            .get_session_by_db_id(session.session_db_id)
            .await
            .unwrap()
            .unwrap();
        assert_eq!(fetched.status, SessionStatus::Completed);

        storage.close().await.unwrap();
    }
}
