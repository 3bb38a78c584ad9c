// SPDX-FileCopyrightText: 2026 Mnemo Contributors
// SPDX-License-Identifier: MIT OR Apache-2.0

//! Wire types exchanged with the `codex` CLI subprocess.

use serde::{Deserialize, Serialize};

/// One turn of conversation history, mirrors `mnemo_core::types::ConversationTurn`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct WireTurn {
    pub role: String,
    pub content: String,
}

/// Request written to the subprocess's stdin.
#[derive(Debug, Clone, Serialize)]
pub struct GenerateRequest {
    pub system_prompt: String,
    pub conversation_history: Vec<WireTurn>,
    pub message: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub resume_session_id: Option<String>,
}

/// One structured observation as emitted by the subprocess.
#[derive(Debug, Clone, Deserialize)]
pub struct WireObservation {
    #[serde(rename = "type")]
    pub observation_type: String,
    pub title: String,
    #[serde(default)]
    pub subtitle: Option<String>,
    pub narrative: String,
    #[serde(default)]
    pub facts: Vec<String>,
    #[serde(default)]
    pub concepts: Vec<String>,
    #[serde(default)]
    pub files_read: Vec<String>,
    #[serde(default)]
    pub files_modified: Vec<String>,
    #[serde(default)]
    pub discovery_tokens: i64,
}

/// One session summary as emitted by the subprocess.
#[derive(Debug, Clone, Deserialize)]
pub struct WireSummary {
    pub request: String,
    #[serde(default)]
    pub investigated: Option<String>,
    #[serde(default)]
    pub learned: Option<String>,
    #[serde(default)]
    pub completed: Option<String>,
    #[serde(default)]
    pub next_steps: Option<String>,
    #[serde(default)]
    pub files_read: Vec<String>,
    #[serde(default)]
    pub files_edited: Vec<String>,
    #[serde(default)]
    pub notes: Option<String>,
    #[serde(default)]
    pub discovery_tokens: i64,
}

/// The full JSON document printed to stdout by a successful run.
#[derive(Debug, Clone, Deserialize, Default)]
pub struct GenerateResponse {
    #[serde(default)]
    pub session_id: Option<String>,
    #[serde(default)]
    pub observations: Vec<WireObservation>,
    #[serde(default)]
    pub summaries: Vec<WireSummary>,
}

/// Curated error-signature set matched against stderr/exit output to
/// classify a failed run.
pub fn classify_signature(stderr: &str) -> mnemo_core::types::ProviderErrorKind {
    use mnemo_core::types::ProviderErrorKind;

    let lower = stderr.to_lowercase();

    const STALE_RESUME: &[&str] = &["aborted by user", "no conversation found", "thread not found"];
    const UNRECOVERABLE: &[&str] = &[
        "no api key configured",
        "invalid api key",
        "incorrect api key",
        "permission denied",
        "command not found",
        "no such file or directory",
    ];
    const TERMINATED: &[&str] = &[
        "session not found upstream",
        "process exited unexpectedly",
        "connection reset",
        "upstream session terminated",
    ];

    if STALE_RESUME.iter().any(|s| lower.contains(s)) {
        return ProviderErrorKind::StaleResume;
    }
    if UNRECOVERABLE.iter().any(|s| lower.contains(s)) {
        return ProviderErrorKind::Unrecoverable;
    }
    if TERMINATED.iter().any(|s| lower.contains(s)) {
        return ProviderErrorKind::Terminated;
    }
    ProviderErrorKind::Other
}

#[cfg(test)]
mod tests {
    use super::*;
    use mnemo_core::types::ProviderErrorKind;

    #[test]
    fn classifies_stale_resume() {
        assert_eq!(
            classify_signature("thread not found for id xyz"),
            ProviderErrorKind::StaleResume
        );
    }

    #[test]
    fn classifies_unrecoverable() {
        assert_eq!(
            classify_signature("Error: incorrect API key provided"),
            ProviderErrorKind::Unrecoverable
        );
    }

    #[test]
    fn classifies_terminated() {
        assert_eq!(
            classify_signature("upstream session terminated"),
            ProviderErrorKind::Terminated
        );
    }

    #[test]
    fn classifies_other_by_default() {
        assert_eq!(classify_signature("mystery failure"), ProviderErrorKind::Other);
    }
}
