// SPDX-FileCopyrightText: 2026 Mnemo Contributors
// SPDX-License-Identifier: MIT OR Apache-2.0

//! Observation, session-summary, and user-prompt queries.

use chrono::{DateTime, Utc};
use mnemo_core::types::{
    Observation, ObservationDraft, ObservationType, SessionSummary, SummaryDraft, UserPrompt,
};
use mnemo_core::MnemoError;
use rusqlite::{params, OptionalExtension, Row};
use uuid::Uuid;

use crate::database::{map_tr_err, Database};

fn json_vec(v: &[String]) -> String {
    serde_json::to_string(v).unwrap_or_else(|_| "[]".to_string())
}

fn parse_json_vec(text: &str) -> Vec<String> {
    serde_json::from_str(text).unwrap_or_default()
}

fn row_to_observation(row: &Row) -> rusqlite::Result<Observation> {
    let type_text: String = row.get(3)?;
    let observation_type = type_text
        .parse::<ObservationType>()
        .unwrap_or(ObservationType::Change);
    let facts: String = row.get(6)?;
    let concepts: String = row.get(7)?;
    let files_read: String = row.get(8)?;
    let files_modified: String = row.get(9)?;

    Ok(Observation {
        id: row.get(0)?,
        memory_session_id: row.get(1)?,
        project: row.get(2)?,
        observation_type,
        title: row.get(4)?,
        subtitle: row.get(5)?,
        narrative: row.get(10)?,
        facts: parse_json_vec(&facts),
        concepts: parse_json_vec(&concepts),
        files_read: parse_json_vec(&files_read),
        files_modified: parse_json_vec(&files_modified),
        prompt_number: row.get(11)?,
        discovery_tokens: row.get(12)?,
        content_hash: row.get(13)?,
        created_at: row.get(14)?,
    })
}

const OBSERVATION_COLUMNS: &str = "id, memory_session_id, project, observation_type, title, subtitle, \
     facts, concepts, files_read, files_modified, narrative, prompt_number, discovery_tokens, content_hash, created_at";

/// Inserts an observation unless a row with the same `content_hash` already
/// exists for this project within `dedup_window_secs`.
pub async fn append_observation(
    db: &Database,
    memory_session_id: &str,
    project: &str,
    prompt_number: i64,
    draft: ObservationDraft,
    dedup_window_secs: i64,
) -> Result<Option<Observation>, MnemoError> {
    let memory_session_id = memory_session_id.to_string();
    let project = project.to_string();

    db.connection()
        .call(move |conn| {
            let content_hash = Observation::compute_content_hash(
                &project,
                &draft.title,
                draft.subtitle.as_deref(),
                &draft.narrative,
                &draft.concepts,
            );

            let cutoff = (Utc::now() - chrono::Duration::seconds(dedup_window_secs)).to_rfc3339();
            let duplicate: Option<String> = conn
                .query_row(
                    "SELECT id FROM observations WHERE content_hash = ?1 AND created_at > ?2",
                    params![content_hash, cutoff],
                    |row| row.get(0),
                )
                .optional()?;
            if duplicate.is_some() {
                return Ok(None);
            }

            let id = Uuid::new_v4().to_string();
            let now = Utc::now();
            conn.execute(
                "INSERT INTO observations
                 (id, memory_session_id, project, observation_type, title, subtitle, narrative,
                  facts, concepts, files_read, files_modified, prompt_number, discovery_tokens, content_hash, created_at)
                 VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10, ?11, ?12, ?13, ?14, ?15)",
                params![
                    id,
                    memory_session_id,
                    project,
                    draft.observation_type.to_string(),
                    draft.title,
                    draft.subtitle,
                    draft.narrative,
                    json_vec(&draft.facts),
                    json_vec(&draft.concepts),
                    json_vec(&draft.files_read),
                    json_vec(&draft.files_modified),
                    prompt_number,
                    draft.discovery_tokens,
                    content_hash,
                    now.to_rfc3339(),
                ],
            )?;

            let observation = conn.query_row(
                &format!("SELECT {OBSERVATION_COLUMNS} FROM observations WHERE id = ?1"),
                params![id],
                row_to_observation,
            )?;
            Ok(Some(observation))
        })
        .await
        .map_err(map_tr_err)
}

pub async fn list_observations_by_time_window(
    db: &Database,
    project: &str,
    since: DateTime<Utc>,
) -> Result<Vec<Observation>, MnemoError> {
    let project = project.to_string();
    db.connection()
        .call(move |conn| {
            let mut stmt = conn.prepare(&format!(
                "SELECT {OBSERVATION_COLUMNS} FROM observations
                 WHERE project = ?1 AND created_at >= ?2
                 ORDER BY created_at ASC"
            ))?;
            let rows = stmt.query_map(params![project, since.to_rfc3339()], row_to_observation)?;
            rows.collect()
        })
        .await
        .map_err(map_tr_err)
}

fn row_to_summary(row: &Row) -> rusqlite::Result<SessionSummary> {
    let files_read: String = row.get(7)?;
    let files_edited: String = row.get(8)?;
    Ok(SessionSummary {
        id: row.get(0)?,
        memory_session_id: row.get(1)?,
        project: row.get(2)?,
        request: row.get(3)?,
        investigated: row.get(4)?,
        learned: row.get(5)?,
        completed: row.get(6)?,
        next_steps: row.get(9)?,
        files_read: parse_json_vec(&files_read),
        files_edited: parse_json_vec(&files_edited),
        notes: row.get(10)?,
        prompt_number: row.get(11)?,
        discovery_tokens: row.get(12)?,
        created_at: row.get(13)?,
    })
}

const SUMMARY_COLUMNS: &str = "id, memory_session_id, project, request, investigated, learned, completed, \
     files_read, files_edited, next_steps, notes, prompt_number, discovery_tokens, created_at";

pub async fn append_summary(
    db: &Database,
    memory_session_id: &str,
    project: &str,
    prompt_number: i64,
    draft: SummaryDraft,
) -> Result<SessionSummary, MnemoError> {
    let memory_session_id = memory_session_id.to_string();
    let project = project.to_string();

    db.connection()
        .call(move |conn| {
            let id = Uuid::new_v4().to_string();
            let now = Utc::now();
            conn.execute(
                "INSERT INTO session_summaries
                 (id, memory_session_id, project, request, investigated, learned, completed, next_steps,
                  files_read, files_edited, notes, prompt_number, discovery_tokens, created_at)
                 VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10, ?11, ?12, ?13, ?14)",
                params![
                    id,
                    memory_session_id,
                    project,
                    draft.request,
                    draft.investigated,
                    draft.learned,
                    draft.completed,
                    draft.next_steps,
                    json_vec(&draft.files_read),
                    json_vec(&draft.files_edited),
                    draft.notes,
                    prompt_number,
                    draft.discovery_tokens,
                    now.to_rfc3339(),
                ],
            )?;
            conn.query_row(
                &format!("SELECT {SUMMARY_COLUMNS} FROM session_summaries WHERE id = ?1"),
                params![id],
                row_to_summary,
            )
        })
        .await
        .map_err(map_tr_err)
}

fn row_to_prompt(row: &Row) -> rusqlite::Result<UserPrompt> {
    Ok(UserPrompt {
        id: row.get(0)?,
        content_session_id: row.get(1)?,
        prompt_number: row.get(2)?,
        prompt_text: row.get(3)?,
        created_at: row.get(4)?,
    })
}

const PROMPT_COLUMNS: &str = "id, content_session_id, prompt_number, prompt_text, created_at";

pub async fn save_user_prompt(
    db: &Database,
    content_session_id: &str,
    prompt_number: i64,
    prompt_text: &str,
) -> Result<UserPrompt, MnemoError> {
    let content_session_id = content_session_id.to_string();
    let prompt_text = prompt_text.to_string();
    db.connection()
        .call(move |conn| {
            let id = Uuid::new_v4().to_string();
            let now = Utc::now().to_rfc3339();
            conn.execute(
                "INSERT INTO user_prompts (id, content_session_id, prompt_number, prompt_text, created_at)
                 VALUES (?1, ?2, ?3, ?4, ?5)
                 ON CONFLICT(content_session_id, prompt_number) DO UPDATE SET prompt_text = excluded.prompt_text",
                params![id, content_session_id, prompt_number, prompt_text, now],
            )?;
            conn.query_row(
                &format!(
                    "SELECT {PROMPT_COLUMNS} FROM user_prompts WHERE content_session_id = ?1 AND prompt_number = ?2"
                ),
                params![content_session_id, prompt_number],
                row_to_prompt,
            )
        })
        .await
        .map_err(map_tr_err)
}

pub async fn get_latest_user_prompt(
    db: &Database,
    content_session_id: &str,
) -> Result<Option<UserPrompt>, MnemoError> {
    let content_session_id = content_session_id.to_string();
    db.connection()
        .call(move |conn| {
            conn.query_row(
                &format!(
                    "SELECT {PROMPT_COLUMNS} FROM user_prompts WHERE content_session_id = ?1
                     ORDER BY prompt_number DESC LIMIT 1"
                ),
                params![content_session_id],
                row_to_prompt,
            )
            .optional()
        })
        .await
        .map_err(map_tr_err)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn draft(title: &str) -> ObservationDraft {
        ObservationDraft {
            observation_type: ObservationType::Bugfix,
            title: title.to_string(),
            subtitle: None,
            narrative: "fixed a thing".to_string(),
            facts: vec!["fact1".to_string()],
            concepts: vec!["concept1".to_string()],
            files_read: vec!["a.rs".to_string()],
            files_modified: vec!["b.rs".to_string()],
            discovery_tokens: 42,
        }
    }

    #[tokio::test]
    async fn append_observation_dedupes_within_window() {
        let db = Database::open_in_memory().await.unwrap();
        let first = append_observation(&db, "mem-1", "proj", 1, draft("same bug"), 3600)
            .await
            .unwrap();
        assert!(first.is_some());

        let second = append_observation(&db, "mem-1", "proj", 2, draft("same bug"), 3600)
            .await
            .unwrap();
        assert!(second.is_none(), "duplicate within window should be rejected");
    }

    #[tokio::test]
    async fn append_observation_allows_outside_window() {
        let db = Database::open_in_memory().await.unwrap();
        append_observation(&db, "mem-1", "proj", 1, draft("same bug"), 0)
            .await
            .unwrap();
        // A zero-width window means "now" already excludes the first insert.
        let second = append_observation(&db, "mem-1", "proj", 2, draft("same bug"), 0)
            .await
            .unwrap();
        assert!(second.is_some());
    }

    #[tokio::test]
    async fn list_observations_by_time_window_filters_project_and_time() {
        let db = Database::open_in_memory().await.unwrap();
        append_observation(&db, "mem-1", "proj-a", 1, draft("a"), 3600).await.unwrap();
        append_observation(&db, "mem-1", "proj-b", 1, draft("b"), 3600).await.unwrap();

        let since = Utc::now() - chrono::Duration::hours(1);
        let results = list_observations_by_time_window(&db, "proj-a", since).await.unwrap();
        assert_eq!(results.len(), 1);
        assert_eq!(results[0].project, "proj-a");
    }

    #[tokio::test]
    async fn append_summary_round_trips_vecs() {
        let db = Database::open_in_memory().await.unwrap();
        let draft = SummaryDraft {
            request: "do the thing".to_string(),
            investigated: Some("looked around".to_string()),
            learned: None,
            completed: Some("done".to_string()),
            next_steps: None,
            files_read: vec!["a.rs".to_string(), "b.rs".to_string()],
            files_edited: vec!["c.rs".to_string()],
            notes: None,
            discovery_tokens: 10,
        };
        let summary = append_summary(&db, "mem-1", "proj", 3, draft).await.unwrap();
        assert_eq!(summary.files_read, vec!["a.rs", "b.rs"]);
        assert_eq!(summary.files_edited, vec!["c.rs"]);
        assert_eq!(summary.prompt_number, 3);
    }

    #[tokio::test]
    async fn user_prompt_latest_and_upsert() {
        let db = Database::open_in_memory().await.unwrap();
        save_user_prompt(&db, "content-1", 1, "first prompt").await.unwrap();
        save_user_prompt(&db, "content-1", 2, "second prompt").await.unwrap();

        let latest = get_latest_user_prompt(&db, "content-1").await.unwrap().unwrap();
        assert_eq!(latest.prompt_number, 2);
        assert_eq!(latest.prompt_text, "second prompt");

        save_user_prompt(&db, "content-1", 2, "second prompt edited").await.unwrap();
        let latest = get_latest_user_prompt(&db, "content-1").await.unwrap().unwrap();
        assert_eq!(latest.prompt_text, "second prompt edited");
    }
}
