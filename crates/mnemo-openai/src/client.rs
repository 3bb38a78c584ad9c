// SPDX-FileCopyrightText: 2026 Mnemo Contributors
// SPDX-License-Identifier: MIT OR Apache-2.0

//! Spawns and drives the `codex` CLI subprocess for one generator turn.

use std::process::Stdio;
use std::str::FromStr;
use std::time::Duration;

use mnemo_core::error::MnemoError;
use mnemo_core::subprocess::SubprocessRegistry;
use mnemo_core::types::{
    ConversationTurn, ObservationDraft, ObservationType, ProviderOutcome, ProviderRequest,
    SummaryDraft,
};
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tracing::{debug, warn};

use crate::types::{classify_signature, GenerateRequest, GenerateResponse, WireTurn};

const GENERATE_TIMEOUT: Duration = Duration::from_secs(120);

/// Drives one `codex` subprocess invocation for a queued message. Mirrors
/// the Anthropic provider's protocol: JSON request on stdin, JSON response
/// on stdout, tracked in `registry` for the call's lifetime.
pub async fn run_turn(
    registry: &SubprocessRegistry,
    session_db_id: i64,
    provider_name: &str,
    binary: &str,
    model: Option<&str>,
    system_prompt: &str,
    request: &ProviderRequest,
) -> Result<ProviderOutcome, MnemoError> {
    let mut command = tokio::process::Command::new(binary);
    command
        .arg("exec")
        .arg("--json")
        .stdin(Stdio::piped())
        .stdout(Stdio::piped())
        .stderr(Stdio::piped())
        .kill_on_drop(true);

    if let Some(model) = model {
        command.arg("--model").arg(model);
    }
    if let Some(resume_id) = &request.memory_session_id {
        command.arg("--resume").arg(resume_id);
    }

    let mut child = command
        .spawn()
        .map_err(|e| MnemoError::Subprocess(format!("failed to spawn {binary}: {e}")))?;

    let mut stdin = child
        .stdin
        .take()
        .ok_or_else(|| MnemoError::Subprocess("subprocess stdin unavailable".into()))?;
    let mut stdout = child
        .stdout
        .take()
        .ok_or_else(|| MnemoError::Subprocess("subprocess stdout unavailable".into()))?;
    let mut stderr = child
        .stderr
        .take()
        .ok_or_else(|| MnemoError::Subprocess("subprocess stderr unavailable".into()))?;

    let wire_request = GenerateRequest {
        system_prompt: system_prompt.to_string(),
        conversation_history: request
            .conversation_history
            .iter()
            .map(to_wire_turn)
            .collect(),
        message: payload_message(request),
        resume_session_id: request.memory_session_id.clone(),
    };
    let payload = serde_json::to_vec(&wire_request)
        .map_err(|e| MnemoError::Internal(format!("failed to encode provider request: {e}")))?;

    let handle = registry.register(session_db_id, provider_name, child);

    stdin
        .write_all(&payload)
        .await
        .map_err(|e| MnemoError::Subprocess(format!("failed to write stdin: {e}")))?;
    drop(stdin);

    let mut stdout_buf = Vec::new();
    let mut stderr_buf = String::new();
    let read_result = tokio::time::timeout(GENERATE_TIMEOUT, async {
        stdout.read_to_end(&mut stdout_buf).await?;
        stderr.read_to_string(&mut stderr_buf).await?;
        std::io::Result::Ok(())
    })
    .await;

    let exited = handle.ensure_exit(Duration::from_secs(5)).await;
    if !exited {
        warn!(session_db_id, provider = provider_name, "subprocess did not exit after stdout EOF");
    }
    registry.remove(session_db_id);

    match read_result {
        Err(_) => Err(MnemoError::Timeout {
            duration: GENERATE_TIMEOUT,
        }),
        Ok(Err(e)) => Err(MnemoError::Subprocess(format!(
            "failed to read subprocess output: {e}"
        ))),
        Ok(Ok(())) => {
            if !stderr_buf.trim().is_empty() {
                debug!(provider = provider_name, stderr = %stderr_buf.trim(), "subprocess wrote to stderr");
            }
            if stdout_buf.is_empty() {
                let kind = classify_signature(&stderr_buf);
                return Err(classified_error(kind, &stderr_buf));
            }
            let response: GenerateResponse = serde_json::from_slice(&stdout_buf).map_err(|e| {
                MnemoError::Provider {
                    message: format!("malformed subprocess output: {e}"),
                    source: None,
                }
            })?;
            Ok(to_outcome(response))
        }
    }
}

fn payload_message(request: &ProviderRequest) -> String {
    use mnemo_core::types::MessagePayload;
    match &request.payload {
        MessagePayload::Observation {
            tool_name,
            tool_input,
            tool_response,
            cwd,
        } => format!(
            "tool={tool_name}\ncwd={}\ninput={tool_input}\nresponse={tool_response}",
            cwd.as_deref().unwrap_or("-")
        ),
        MessagePayload::Summarize {
            last_assistant_message,
        } => last_assistant_message.clone().unwrap_or_default(),
    }
}

fn to_wire_turn(turn: &ConversationTurn) -> WireTurn {
    WireTurn {
        role: turn.role.clone(),
        content: turn.content.clone(),
    }
}

fn to_outcome(response: GenerateResponse) -> ProviderOutcome {
    ProviderOutcome {
        memory_session_id: response.session_id,
        observations: response
            .observations
            .into_iter()
            .map(|o| ObservationDraft {
                observation_type: ObservationType::from_str(&o.observation_type)
                    .unwrap_or(ObservationType::Change),
                title: o.title,
                subtitle: o.subtitle,
                narrative: o.narrative,
                facts: o.facts,
                concepts: o.concepts,
                files_read: o.files_read,
                files_modified: o.files_modified,
                discovery_tokens: o.discovery_tokens,
            })
            .collect(),
        summaries: response
            .summaries
            .into_iter()
            .map(|s| SummaryDraft {
                request: s.request,
                investigated: s.investigated,
                learned: s.learned,
                completed: s.completed,
                next_steps: s.next_steps,
                files_read: s.files_read,
                files_edited: s.files_edited,
                notes: s.notes,
                discovery_tokens: s.discovery_tokens,
            })
            .collect(),
    }
}

fn classified_error(kind: mnemo_core::types::ProviderErrorKind, stderr: &str) -> MnemoError {
    use mnemo_core::types::ProviderErrorKind;
    match kind {
        ProviderErrorKind::Unrecoverable => MnemoError::Fatal(format!(
            "provider subprocess failed unrecoverably: {}",
            stderr.trim()
        )),
        ProviderErrorKind::Terminated => {
            MnemoError::ProviderSessionTerminated(stderr.trim().to_string())
        }
        ProviderErrorKind::StaleResume | ProviderErrorKind::Other => MnemoError::Provider {
            message: stderr.trim().to_string(),
            source: None,
        },
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn classified_error_maps_unrecoverable_to_fatal() {
        let err = classified_error(
            mnemo_core::types::ProviderErrorKind::Unrecoverable,
            "incorrect API key provided",
        );
        assert!(matches!(err, MnemoError::Fatal(_)));
    }

    #[test]
    fn classified_error_maps_terminated_to_session_terminated() {
        let err = classified_error(
            mnemo_core::types::ProviderErrorKind::Terminated,
            "upstream session terminated",
        );
        assert!(matches!(err, MnemoError::ProviderSessionTerminated(_)));
    }
}
