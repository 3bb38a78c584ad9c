// SPDX-FileCopyrightText: 2026 Mnemo Contributors
// SPDX-License-Identifier: MIT OR Apache-2.0

//! Data model shared by storage, the session manager, and the generator.
//!
//! Mirrors spec §3: two distinct session identifiers (content-session-id,
//! the external observed session; memory-session-id, the generator's own
//! resumable identity) and five persisted entities (Session, Observation,
//! SessionSummary, UserPrompt, PendingMessage).

use serde::{Deserialize, Serialize};
use strum::{Display, EnumString};

/// Lifecycle status of a [`Session`] row. Never deleted, only transitioned.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Display, EnumString, Serialize, Deserialize)]
#[strum(serialize_all = "snake_case")]
#[serde(rename_all = "snake_case")]
pub enum SessionStatus {
    Active,
    Completed,
    Failed,
}

/// A content-session row. `memory_session_id` is the generator's own
/// resumable identity and is never trusted across a worker restart -- see
/// `mnemo-session::manager::initialize_session`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Session {
    pub session_db_id: i64,
    pub content_session_id: String,
    pub memory_session_id: Option<String>,
    pub project: String,
    pub first_user_prompt: Option<String>,
    pub started_at: chrono::DateTime<chrono::Utc>,
    pub completed_at: Option<chrono::DateTime<chrono::Utc>>,
    pub status: SessionStatus,
    pub prompt_counter: i64,
    pub custom_title: Option<String>,
}

/// The kind of a structured observation extracted from one tool use.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Display, EnumString, Serialize, Deserialize)]
#[strum(serialize_all = "snake_case")]
#[serde(rename_all = "snake_case")]
pub enum ObservationType {
    Bugfix,
    Feature,
    Refactor,
    Change,
    Discovery,
    Decision,
    Session,
    Prompt,
}

/// One structured record produced by the generator from a single tool use.
/// Never mutated after insert; deduplicated by `content_hash` within a
/// recency window (`mnemo-config::model::StorageSettings::observation_dedup_window_secs`).
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Observation {
    pub id: String,
    pub memory_session_id: String,
    pub project: String,
    pub observation_type: ObservationType,
    pub title: String,
    pub subtitle: Option<String>,
    pub narrative: String,
    pub facts: Vec<String>,
    pub concepts: Vec<String>,
    pub files_read: Vec<String>,
    pub files_modified: Vec<String>,
    pub prompt_number: i64,
    pub discovery_tokens: i64,
    pub content_hash: String,
    pub created_at: chrono::DateTime<chrono::Utc>,
}

impl Observation {
    /// Computes the dedup hash over the fields the spec names: project,
    /// title, subtitle, narrative, concepts.
    pub fn compute_content_hash(
        project: &str,
        title: &str,
        subtitle: Option<&str>,
        narrative: &str,
        concepts: &[String],
    ) -> String {
        use sha2::{Digest, Sha256};
        let mut hasher = Sha256::new();
        hasher.update(project.as_bytes());
        hasher.update(b"\0");
        hasher.update(title.as_bytes());
        hasher.update(b"\0");
        hasher.update(subtitle.unwrap_or("").as_bytes());
        hasher.update(b"\0");
        hasher.update(narrative.as_bytes());
        hasher.update(b"\0");
        hasher.update(concepts.join(",").as_bytes());
        hex::encode(hasher.finalize())
    }
}

/// A multi-field record produced by the generator at turn boundaries.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SessionSummary {
    pub id: String,
    pub memory_session_id: String,
    pub project: String,
    pub request: String,
    pub investigated: Option<String>,
    pub learned: Option<String>,
    pub completed: Option<String>,
    pub next_steps: Option<String>,
    pub files_read: Vec<String>,
    pub files_edited: Vec<String>,
    pub notes: Option<String>,
    pub prompt_number: i64,
    pub discovery_tokens: i64,
    pub created_at: chrono::DateTime<chrono::Utc>,
}

/// One user prompt captured at session init, privacy-tag-stripped before
/// storage.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct UserPrompt {
    pub id: String,
    pub content_session_id: String,
    pub prompt_number: i64,
    pub prompt_text: String,
    pub created_at: chrono::DateTime<chrono::Utc>,
}

/// Lifecycle status of a [`PendingMessage`] row.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Display, EnumString, Serialize, Deserialize)]
#[strum(serialize_all = "snake_case")]
#[serde(rename_all = "snake_case")]
pub enum PendingMessageStatus {
    Pending,
    Processing,
    Processed,
    Failed,
    Abandoned,
}

/// The two shapes a queued unit of work can take. Modeled as a tagged sum
/// rather than an optional-everywhere struct per the re-architecture
/// guidance in spec §9.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "message_type", rename_all = "snake_case")]
pub enum MessagePayload {
    Observation {
        tool_name: String,
        tool_input: String,
        tool_response: String,
        cwd: Option<String>,
    },
    Summarize {
        last_assistant_message: Option<String>,
    },
}

impl MessagePayload {
    pub fn kind(&self) -> &'static str {
        match self {
            MessagePayload::Observation { .. } => "observation",
            MessagePayload::Summarize { .. } => "summarize",
        }
    }
}

/// A row in the durable per-session pending-message queue.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PendingMessage {
    pub id: String,
    pub session_db_id: i64,
    pub content_session_id: String,
    pub payload: MessagePayload,
    pub prompt_number: i64,
    pub status: PendingMessageStatus,
    pub retry_count: i64,
    pub created_at_epoch: i64,
    pub started_processing_at_epoch: Option<i64>,
    pub completed_at_epoch: Option<i64>,
    pub failed_at_epoch: Option<i64>,
}

/// One exchange turn fed to / produced by a provider, shared across
/// provider switches on the owning `ActiveSession`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ConversationTurn {
    pub role: String,
    pub content: String,
}

/// A request to a provider for one queued message.
#[derive(Debug, Clone)]
pub struct ProviderRequest {
    pub conversation_history: Vec<ConversationTurn>,
    pub payload: MessagePayload,
    pub memory_session_id: Option<String>,
    pub project: String,
    pub prompt_number: i64,
}

/// A fully structured output drained from one provider stream: the
/// resumable memory-session-id (captured once, on first response) plus
/// zero or more observations/summaries.
#[derive(Debug, Clone, Default)]
pub struct ProviderOutcome {
    pub memory_session_id: Option<String>,
    pub observations: Vec<ObservationDraft>,
    pub summaries: Vec<SummaryDraft>,
}

/// An observation as emitted by a provider, before content-hash/id/session
/// binding is applied by the generator.
#[derive(Debug, Clone)]
pub struct ObservationDraft {
    pub observation_type: ObservationType,
    pub title: String,
    pub subtitle: Option<String>,
    pub narrative: String,
    pub facts: Vec<String>,
    pub concepts: Vec<String>,
    pub files_read: Vec<String>,
    pub files_modified: Vec<String>,
    pub discovery_tokens: i64,
}

/// A session summary as emitted by a provider, before id/session binding.
#[derive(Debug, Clone)]
pub struct SummaryDraft {
    pub request: String,
    pub investigated: Option<String>,
    pub learned: Option<String>,
    pub completed: Option<String>,
    pub next_steps: Option<String>,
    pub files_read: Vec<String>,
    pub files_edited: Vec<String>,
    pub notes: Option<String>,
    pub discovery_tokens: i64,
}

/// Classification of a provider failure, used by the generator's restart
/// policy (spec §4.4). Each provider crate classifies its own errors into
/// this set using a curated error-signature match.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ProviderErrorKind {
    /// Missing binary, bad credentials, spawn refused -- never restarted.
    Unrecoverable,
    /// Upstream session no longer resumable -- triggers the fallback chain.
    Terminated,
    /// "aborted by user" / "no conversation found" while a memory-session-id
    /// was set -- clear it and retry.
    StaleResume,
    /// Everything else -- bounded-backoff restart.
    Other,
}

/// Health status reported by adapter health checks.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum HealthStatus {
    Healthy,
    Degraded(String),
    Unhealthy(String),
}

/// Identifies the kind of pluggable adapter behind a trait object.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Display, EnumString, Serialize, Deserialize)]
#[strum(serialize_all = "snake_case")]
#[serde(rename_all = "snake_case")]
pub enum AdapterType {
    Storage,
    Provider,
}

/// Identifies the configured provider slot in use for a session.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Display, EnumString, Serialize, Deserialize)]
#[strum(serialize_all = "snake_case")]
#[serde(rename_all = "snake_case")]
pub enum ProviderSlot {
    Primary,
    AlternateA,
    AlternateB,
}
