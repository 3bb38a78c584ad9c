// SPDX-FileCopyrightText: 2026 Mnemo Contributors
// SPDX-License-Identifier: MIT OR Apache-2.0

//! Session CRUD and lifecycle queries.

use chrono::Utc;
use mnemo_core::types::{Session, SessionStatus};
use mnemo_core::MnemoError;
use rusqlite::{params, OptionalExtension, Row};

use crate::database::{map_tr_err, Database};

fn row_to_session(row: &Row) -> rusqlite::Result<Session> {
    let status_text: String = row.get(7)?;
    let status = status_text
        .parse::<SessionStatus>()
        .unwrap_or(SessionStatus::Active);
    Ok(Session {
        session_db_id: row.get(0)?,
        content_session_id: row.get(1)?,
        memory_session_id: row.get(2)?,
        project: row.get(3)?,
        first_user_prompt: row.get(4)?,
        started_at: row.get(5)?,
        completed_at: row.get(6)?,
        status,
        prompt_counter: row.get(8)?,
        custom_title: row.get(9)?,
    })
}

const SELECT_COLUMNS: &str = "session_db_id, content_session_id, memory_session_id, project, \
     first_user_prompt, started_at, completed_at, status, prompt_counter, custom_title";

/// Idempotently creates or fetches a session keyed by `content_session_id`.
pub async fn create_or_get_session(
    db: &Database,
    content_session_id: &str,
    project: &str,
    first_user_prompt: Option<&str>,
) -> Result<(Session, bool), MnemoError> {
    let content_session_id = content_session_id.to_string();
    let project = project.to_string();
    let first_user_prompt = first_user_prompt.map(|s| s.to_string());

    db.connection()
        .call(move |conn| {
            let tx = conn.transaction()?;
            let existing = tx
                .query_row(
                    &format!("SELECT {SELECT_COLUMNS} FROM sessions WHERE content_session_id = ?1"),
                    params![content_session_id],
                    row_to_session,
                )
                .optional()?;

            if let Some(session) = existing {
                tx.commit()?;
                return Ok((session, false));
            }

            let now = Utc::now();
            tx.execute(
                "INSERT INTO sessions (content_session_id, project, first_user_prompt, started_at, status, prompt_counter)
                 VALUES (?1, ?2, ?3, ?4, 'active', 0)",
                params![content_session_id, project, first_user_prompt, now.to_rfc3339()],
            )?;
            let session_db_id = tx.last_insert_rowid();
            let session = tx.query_row(
                &format!("SELECT {SELECT_COLUMNS} FROM sessions WHERE session_db_id = ?1"),
                params![session_db_id],
                row_to_session,
            )?;
            tx.commit()?;
            Ok((session, true))
        })
        .await
        .map_err(map_tr_err)
}

pub async fn get_session_by_content_id(
    db: &Database,
    content_session_id: &str,
) -> Result<Option<Session>, MnemoError> {
    let content_session_id = content_session_id.to_string();
    db.connection()
        .call(move |conn| {
            conn.query_row(
                &format!("SELECT {SELECT_COLUMNS} FROM sessions WHERE content_session_id = ?1"),
                params![content_session_id],
                row_to_session,
            )
            .optional()
        })
        .await
        .map_err(map_tr_err)
}

pub async fn get_session_by_db_id(
    db: &Database,
    session_db_id: i64,
) -> Result<Option<Session>, MnemoError> {
    db.connection()
        .call(move |conn| {
            conn.query_row(
                &format!("SELECT {SELECT_COLUMNS} FROM sessions WHERE session_db_id = ?1"),
                params![session_db_id],
                row_to_session,
            )
            .optional()
        })
        .await
        .map_err(map_tr_err)
}

pub async fn update_memory_session_id(
    db: &Database,
    session_db_id: i64,
    memory_session_id: Option<&str>,
) -> Result<(), MnemoError> {
    let memory_session_id = memory_session_id.map(|s| s.to_string());
    db.connection()
        .call(move |conn| {
            conn.execute(
                "UPDATE sessions SET memory_session_id = ?1 WHERE session_db_id = ?2",
                params![memory_session_id, session_db_id],
            )?;
            Ok(())
        })
        .await
        .map_err(map_tr_err)
}

pub async fn increment_prompt_counter(
    db: &Database,
    session_db_id: i64,
) -> Result<i64, MnemoError> {
    db.connection()
        .call(move |conn| {
            conn.execute(
                "UPDATE sessions SET prompt_counter = prompt_counter + 1 WHERE session_db_id = ?1",
                params![session_db_id],
            )?;
            conn.query_row(
                "SELECT prompt_counter FROM sessions WHERE session_db_id = ?1",
                params![session_db_id],
                |row| row.get(0),
            )
        })
        .await
        .map_err(map_tr_err)
}

pub async fn complete_session(db: &Database, session_db_id: i64) -> Result<(), MnemoError> {
    let now = Utc::now().to_rfc3339();
    db.connection()
        .call(move |conn| {
            conn.execute(
                "UPDATE sessions SET status = 'completed', completed_at = ?1 WHERE session_db_id = ?2",
                params![now, session_db_id],
            )?;
            Ok(())
        })
        .await
        .map_err(map_tr_err)
}

pub async fn list_sessions_by_status(
    db: &Database,
    status: SessionStatus,
) -> Result<Vec<Session>, MnemoError> {
    let status = status.to_string();
    db.connection()
        .call(move |conn| {
            let mut stmt = conn.prepare(&format!(
                "SELECT {SELECT_COLUMNS} FROM sessions WHERE status = ?1 ORDER BY started_at ASC"
            ))?;
            let rows = stmt.query_map(params![status], row_to_session)?;
            rows.collect()
        })
        .await
        .map_err(map_tr_err)
}

/// Marks active sessions older than `max_age_secs` as failed, along with
/// any pending/processing messages they still own.
pub async fn fail_stale_active_sessions(
    db: &Database,
    max_age_secs: i64,
) -> Result<u64, MnemoError> {
    db.connection()
        .call(move |conn| {
            let cutoff = (Utc::now() - chrono::Duration::seconds(max_age_secs)).to_rfc3339();
            let tx = conn.transaction()?;

            let stale_ids: Vec<i64> = {
                let mut stmt = tx.prepare(
                    "SELECT session_db_id FROM sessions WHERE status = 'active' AND started_at < ?1",
                )?;
                let rows = stmt.query_map(params![cutoff], |row| row.get::<_, i64>(0))?;
                rows.collect::<rusqlite::Result<_>>()?
            };

            for id in &stale_ids {
                tx.execute(
                    "UPDATE sessions SET status = 'failed', completed_at = ?1 WHERE session_db_id = ?2",
                    params![Utc::now().to_rfc3339(), id],
                )?;
                tx.execute(
                    "UPDATE pending_messages SET status = 'failed', failed_at_epoch = ?1
                     WHERE session_db_id = ?2 AND status IN ('pending', 'processing')",
                    params![Utc::now().timestamp(), id],
                )?;
            }

            tx.commit()?;
            Ok(stale_ids.len() as u64)
        })
        .await
        .map_err(map_tr_err)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn create_or_get_is_idempotent() {
        let db = Database::open_in_memory().await.unwrap();
        let (s1, created1) = create_or_get_session(&db, "content-1", "proj-a", Some("hello"))
            .await
            .unwrap();
        assert!(created1);
        assert_eq!(s1.project, "proj-a");
        assert_eq!(s1.status, SessionStatus::Active);

        let (s2, created2) = create_or_get_session(&db, "content-1", "proj-a", Some("ignored"))
            .await
            .unwrap();
        assert!(!created2);
        assert_eq!(s2.session_db_id, s1.session_db_id);
        assert_eq!(s2.first_user_prompt, Some("hello".to_string()));
    }

    #[tokio::test]
    async fn memory_session_id_round_trips() {
        let db = Database::open_in_memory().await.unwrap();
        let (s, _) = create_or_get_session(&db, "c1", "p", None).await.unwrap();
        assert!(s.memory_session_id.is_none());

        update_memory_session_id(&db, s.session_db_id, Some("mem-abc"))
            .await
            .unwrap();
        let fetched = get_session_by_db_id(&db, s.session_db_id).await.unwrap().unwrap();
        assert_eq!(fetched.memory_session_id, Some("mem-abc".to_string()));

        update_memory_session_id(&db, s.session_db_id, None).await.unwrap();
        let cleared = get_session_by_db_id(&db, s.session_db_id).await.unwrap().unwrap();
        assert!(cleared.memory_session_id.is_none());
    }

    #[tokio::test]
    async fn prompt_counter_increments() {
        let db = Database::open_in_memory().await.unwrap();
        let (s, _) = create_or_get_session(&db, "c1", "p", None).await.unwrap();
        assert_eq!(increment_prompt_counter(&db, s.session_db_id).await.unwrap(), 1);
        assert_eq!(increment_prompt_counter(&db, s.session_db_id).await.unwrap(), 2);
    }

    #[tokio::test]
    async fn complete_session_sets_status_and_timestamp() {
        let db = Database::open_in_memory().await.unwrap();
        let (s, _) = create_or_get_session(&db, "c1", "p", None).await.unwrap();
        complete_session(&db, s.session_db_id).await.unwrap();
        let fetched = get_session_by_db_id(&db, s.session_db_id).await.unwrap().unwrap();
        assert_eq!(fetched.status, SessionStatus::Completed);
        assert!(fetched.completed_at.is_some());
    }

    #[tokio::test]
    async fn list_by_status_filters() {
        let db = Database::open_in_memory().await.unwrap();
        let (s1, _) = create_or_get_session(&db, "c1", "p", None).await.unwrap();
        let (_s2, _) = create_or_get_session(&db, "c2", "p", None).await.unwrap();
        complete_session(&db, s1.session_db_id).await.unwrap();

        let active = list_sessions_by_status(&db, SessionStatus::Active).await.unwrap();
        assert_eq!(active.len(), 1);
        let completed = list_sessions_by_status(&db, SessionStatus::Completed).await.unwrap();
        assert_eq!(completed.len(), 1);
    }

    #[tokio::test]
    async fn fail_stale_active_sessions_marks_old_ones() {
        let db = Database::open_in_memory().await.unwrap();
        let (s, _) = create_or_get_session(&db, "c1", "p", None).await.unwrap();
        // max_age_secs = 0 makes any active session immediately stale.
        let n = fail_stale_active_sessions(&db, 0).await.unwrap();
        assert_eq!(n, 1);
        let fetched = get_session_by_db_id(&db, s.session_db_id).await.unwrap().unwrap();
        assert_eq!(fetched.status, SessionStatus::Failed);
    }
}
