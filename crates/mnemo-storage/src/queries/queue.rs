// SPDX-FileCopyrightText: 2026 Mnemo Contributors
// SPDX-License-Identifier: MIT OR Apache-2.0

//! Crash-safe per-session pending-message queue: claim-confirm protocol.
//!
//! A row moves pending -> processing -> processed|failed, or pending ->
//! abandoned on session teardown. `claim_next` self-heals rows stuck in
//! `processing` past `stale_threshold_secs` before claiming -- this is what
//! lets a crashed generator's in-flight message get reclaimed by the next
//! worker without an explicit crash-recovery pass.

use mnemo_core::types::{MessagePayload, PendingMessage, PendingMessageStatus};
use mnemo_core::MnemoError;
use rusqlite::{params, OptionalExtension, Row};
use uuid::Uuid;

use crate::database::{map_tr_err, Database};

fn row_to_message(row: &Row) -> rusqlite::Result<PendingMessage> {
    let status_text: String = row.get(5)?;
    let status = status_text
        .parse::<PendingMessageStatus>()
        .unwrap_or(PendingMessageStatus::Pending);
    let payload_json: String = row.get(3)?;
    let payload: MessagePayload = serde_json::from_str(&payload_json).map_err(|e| {
        rusqlite::Error::FromSqlConversionFailure(3, rusqlite::types::Type::Text, Box::new(e))
    })?;

    Ok(PendingMessage {
        id: row.get(0)?,
        session_db_id: row.get(1)?,
        content_session_id: row.get(2)?,
        payload,
        prompt_number: row.get(4)?,
        status,
        retry_count: row.get(6)?,
        created_at_epoch: row.get(7)?,
        started_processing_at_epoch: row.get(8)?,
        completed_at_epoch: row.get(9)?,
        failed_at_epoch: row.get(10)?,
    })
}

const SELECT_COLUMNS: &str = "id, session_db_id, content_session_id, payload, prompt_number, \
     status, retry_count, created_at_epoch, started_processing_at_epoch, completed_at_epoch, failed_at_epoch";

pub async fn enqueue(
    db: &Database,
    session_db_id: i64,
    content_session_id: &str,
    prompt_number: i64,
    payload: MessagePayload,
) -> Result<PendingMessage, MnemoError> {
    let content_session_id = content_session_id.to_string();
    let id = Uuid::new_v4().to_string();
    let payload_json = serde_json::to_string(&payload).map_err(|e| MnemoError::Internal(e.to_string()))?;

    db.connection()
        .call(move |conn| {
            let now = chrono::Utc::now().timestamp();
            conn.execute(
                "INSERT INTO pending_messages
                 (id, session_db_id, content_session_id, payload, prompt_number, status, retry_count, created_at_epoch)
                 VALUES (?1, ?2, ?3, ?4, ?5, 'pending', 0, ?6)",
                params![id, session_db_id, content_session_id, payload_json, prompt_number, now],
            )?;
            conn.query_row(
                &format!("SELECT {SELECT_COLUMNS} FROM pending_messages WHERE id = ?1"),
                params![id],
                row_to_message,
            )
        })
        .await
        .map_err(map_tr_err)
}

pub async fn claim_next(
    db: &Database,
    session_db_id: i64,
    stale_threshold_secs: i64,
) -> Result<Option<PendingMessage>, MnemoError> {
    db.connection()
        .call(move |conn| {
            let tx = conn.transaction()?;
            let now = chrono::Utc::now().timestamp();
            let stale_cutoff = now - stale_threshold_secs;

            tx.execute(
                "UPDATE pending_messages SET status = 'pending', started_processing_at_epoch = NULL,
                 retry_count = retry_count + 1
                 WHERE session_db_id = ?1 AND status = 'processing' AND started_processing_at_epoch < ?2",
                params![session_db_id, stale_cutoff],
            )?;

            let claimed: Option<String> = tx
                .query_row(
                    "SELECT id FROM pending_messages
                     WHERE session_db_id = ?1 AND status = 'pending'
                     ORDER BY created_at_epoch ASC LIMIT 1",
                    params![session_db_id],
                    |row| row.get(0),
                )
                .optional()?;

            let Some(id) = claimed else {
                tx.commit()?;
                return Ok(None);
            };

            tx.execute(
                "UPDATE pending_messages SET status = 'processing', started_processing_at_epoch = ?1 WHERE id = ?2",
                params![now, id],
            )?;
            let message = tx.query_row(
                &format!("SELECT {SELECT_COLUMNS} FROM pending_messages WHERE id = ?1"),
                params![id],
                row_to_message,
            )?;
            tx.commit()?;
            Ok(Some(message))
        })
        .await
        .map_err(map_tr_err)
}

pub async fn confirm_processed(db: &Database, message_id: &str) -> Result<(), MnemoError> {
    let message_id = message_id.to_string();
    db.connection()
        .call(move |conn| {
            let now = chrono::Utc::now().timestamp();
            conn.execute(
                "UPDATE pending_messages SET status = 'processed', completed_at_epoch = ?1 WHERE id = ?2",
                params![now, message_id],
            )?;
            Ok(())
        })
        .await
        .map_err(map_tr_err)
}

pub async fn mark_failed(db: &Database, session_db_id: i64) -> Result<u64, MnemoError> {
    db.connection()
        .call(move |conn| {
            let now = chrono::Utc::now().timestamp();
            let n = conn.execute(
                "UPDATE pending_messages SET status = 'failed', failed_at_epoch = ?1, retry_count = retry_count + 1
                 WHERE session_db_id = ?2 AND status = 'processing'",
                params![now, session_db_id],
            )?;
            Ok(n as u64)
        })
        .await
        .map_err(map_tr_err)
}

pub async fn mark_abandoned(db: &Database, session_db_id: i64) -> Result<u64, MnemoError> {
    db.connection()
        .call(move |conn| {
            let n = conn.execute(
                "UPDATE pending_messages SET status = 'abandoned'
                 WHERE session_db_id = ?1 AND status IN ('pending', 'processing')",
                params![session_db_id],
            )?;
            Ok(n as u64)
        })
        .await
        .map_err(map_tr_err)
}

pub async fn reset_stale(db: &Database, threshold_secs: i64) -> Result<u64, MnemoError> {
    db.connection()
        .call(move |conn| {
            let cutoff = chrono::Utc::now().timestamp() - threshold_secs;
            let n = conn.execute(
                "UPDATE pending_messages SET status = 'pending', started_processing_at_epoch = NULL
                 WHERE status = 'processing' AND started_processing_at_epoch < ?1",
                params![cutoff],
            )?;
            Ok(n as u64)
        })
        .await
        .map_err(map_tr_err)
}

pub async fn pending_count(db: &Database, session_db_id: i64) -> Result<u64, MnemoError> {
    db.connection()
        .call(move |conn| {
            conn.query_row(
                "SELECT COUNT(*) FROM pending_messages WHERE session_db_id = ?1 AND status = 'pending'",
                params![session_db_id],
                |row| row.get::<_, i64>(0),
            )
            .map(|n| n as u64)
        })
        .await
        .map_err(map_tr_err)
}

pub async fn any_session_has_work(db: &Database, session_db_id: i64) -> Result<bool, MnemoError> {
    db.connection()
        .call(move |conn| {
            conn.query_row(
                "SELECT 1 FROM pending_messages WHERE session_db_id = ?1 AND status IN ('pending', 'processing') LIMIT 1",
                params![session_db_id],
                |_| Ok(()),
            )
            .optional()
            .map(|r| r.is_some())
        })
        .await
        .map_err(map_tr_err)
}

pub async fn sessions_with_pending(db: &Database) -> Result<Vec<i64>, MnemoError> {
    db.connection()
        .call(|conn| {
            let mut stmt = conn.prepare(
                "SELECT DISTINCT session_db_id FROM pending_messages WHERE status IN ('pending', 'processing')",
            )?;
            let rows = stmt.query_map([], |row| row.get::<_, i64>(0))?;
            rows.collect()
        })
        .await
        .map_err(map_tr_err)
}

pub async fn count_failed_messages(db: &Database) -> Result<u64, MnemoError> {
    db.connection()
        .call(|conn| {
            conn.query_row(
                "SELECT COUNT(*) FROM pending_messages WHERE status = 'failed'",
                [],
                |row| row.get::<_, i64>(0),
            )
            .map(|n| n as u64)
        })
        .await
        .map_err(map_tr_err)
}

#[cfg(test)]
mod tests {
    use super::*;
    use mnemo_core::types::SessionStatus;
    use crate::queries::sessions::create_or_get_session;

    fn summarize_payload() -> MessagePayload {
        MessagePayload::Summarize {
            last_assistant_message: None,
        }
    }

    async fn setup_session(db: &Database) -> i64 {
        let (s, _) = create_or_get_session(db, "c1", "p", None).await.unwrap();
        assert_eq!(s.status, SessionStatus::Active);
        s.session_db_id
    }

    #[tokio::test]
    async fn enqueue_then_claim_moves_to_processing() {
        let db = Database::open_in_memory().await.unwrap();
        let sid = setup_session(&db).await;

        enqueue(&db, sid, "c1", 1, summarize_payload()).await.unwrap();
        let claimed = claim_next(&db, sid, 1800).await.unwrap().unwrap();
        assert_eq!(claimed.status, PendingMessageStatus::Processing);

        let nothing_left = claim_next(&db, sid, 1800).await.unwrap();
        assert!(nothing_left.is_none());
    }

    #[tokio::test]
    async fn confirm_processed_marks_terminal() {
        let db = Database::open_in_memory().await.unwrap();
        let sid = setup_session(&db).await;
        let msg = enqueue(&db, sid, "c1", 1, summarize_payload()).await.unwrap();
        claim_next(&db, sid, 1800).await.unwrap();
        confirm_processed(&db, &msg.id).await.unwrap();

        assert!(!any_session_has_work(&db, sid).await.unwrap());
    }

    #[tokio::test]
    async fn claim_next_self_heals_stale_processing_rows() {
        let db = Database::open_in_memory().await.unwrap();
        let sid = setup_session(&db).await;
        let msg = enqueue(&db, sid, "c1", 1, summarize_payload()).await.unwrap();
        claim_next(&db, sid, 1800).await.unwrap();

        // Force the started_processing_at_epoch far in the past to simulate a crash.
        db.connection()
            .call(move |conn| {
                conn.execute(
                    "UPDATE pending_messages SET started_processing_at_epoch = 0 WHERE id = ?1",
                    params![msg.id.clone()],
                )
            })
            .await
            .unwrap();

        let reclaimed = claim_next(&db, sid, 1800).await.unwrap();
        let reclaimed = reclaimed.expect("stale processing row should be reclaimed");
        assert_eq!(reclaimed.retry_count, 1);
    }

    #[tokio::test]
    async fn mark_failed_transitions_processing_only() {
        let db = Database::open_in_memory().await.unwrap();
        let sid = setup_session(&db).await;
        enqueue(&db, sid, "c1", 1, summarize_payload()).await.unwrap();
        claim_next(&db, sid, 1800).await.unwrap();

        let n = mark_failed(&db, sid).await.unwrap();
        assert_eq!(n, 1);
        assert_eq!(count_failed_messages(&db).await.unwrap(), 1);
    }

    #[tokio::test]
    async fn mark_abandoned_covers_pending_and_processing() {
        let db = Database::open_in_memory().await.unwrap();
        let sid = setup_session(&db).await;
        enqueue(&db, sid, "c1", 1, summarize_payload()).await.unwrap();
        enqueue(&db, sid, "c1", 2, summarize_payload()).await.unwrap();
        claim_next(&db, sid, 1800).await.unwrap();

        let n = mark_abandoned(&db, sid).await.unwrap();
        assert_eq!(n, 2);
        assert!(!any_session_has_work(&db, sid).await.unwrap());
    }

    #[tokio::test]
    async fn reset_stale_on_startup_clears_all_sessions() {
        let db = Database::open_in_memory().await.unwrap();
        let sid = setup_session(&db).await;
        enqueue(&db, sid, "c1", 1, summarize_payload()).await.unwrap();
        claim_next(&db, sid, 1800).await.unwrap();

        let n = reset_stale(&db, 0).await.unwrap();
        assert_eq!(n, 1);
        let pending = pending_count(&db, sid).await.unwrap();
        assert_eq!(pending, 1);
    }

    #[tokio::test]
    async fn sessions_with_pending_lists_distinct_sessions() {
        let db = Database::open_in_memory().await.unwrap();
        let s1 = setup_session(&db).await;
        let (s2, _) = create_or_get_session(&db, "c2", "p", None).await.unwrap();
        enqueue(&db, s1, "c1", 1, summarize_payload()).await.unwrap();
        enqueue(&db, s2.session_db_id, "c2", 1, summarize_payload()).await.unwrap();

        let mut ids = sessions_with_pending(&db).await.unwrap();
        ids.sort();
        assert_eq!(ids, vec![s1, s2.session_db_id]);
    }
}
