// SPDX-FileCopyrightText: 2026 Mnemo Contributors
// SPDX-License-Identifier: MIT OR Apache-2.0

//! Mock LLM provider adapter for deterministic generator tests.
//!
//! `MockProvider` implements `ProviderAdapter` against a scripted FIFO
//! queue of outcomes instead of spawning a subprocess, so the generator
//! loop in `mnemo-session` can be driven end-to-end without a real `claude`
//! / `codex` / `gemini` binary on PATH.

use std::collections::VecDeque;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;

use async_trait::async_trait;
use mnemo_core::error::MnemoError;
use mnemo_core::traits::{PluginAdapter, ProviderAdapter};
use mnemo_core::types::{
    AdapterType, HealthStatus, ObservationDraft, ObservationType, ProviderErrorKind,
    ProviderOutcome, ProviderRequest, ProviderSlot,
};
use tokio::sync::Mutex;

/// One scripted result for a single `generate` call.
pub enum ScriptedTurn {
    Outcome(ProviderOutcome),
    Error(MnemoError, ProviderErrorKind),
}

/// A mock LLM provider that returns pre-scripted outcomes or errors.
///
/// Turns are popped from a FIFO queue. When the queue is empty, a single
/// default observation outcome is returned, so a test that only cares
/// about "the generator produced *something*" doesn't need to script a
/// response for every call.
pub struct MockProvider {
    slot: ProviderSlot,
    name: &'static str,
    turns: Arc<Mutex<VecDeque<ScriptedTurn>>>,
    calls: Arc<AtomicUsize>,
}

impl MockProvider {
    pub fn new(name: &'static str, slot: ProviderSlot) -> Self {
        Self {
            slot,
            name,
            turns: Arc::new(Mutex::new(VecDeque::new())),
            calls: Arc::new(AtomicUsize::new(0)),
        }
    }

    /// Queues a successful outcome to be returned on the next `generate` call.
    pub async fn push_outcome(&self, outcome: ProviderOutcome) {
        self.turns.lock().await.push_back(ScriptedTurn::Outcome(outcome));
    }

    /// Queues a failure, classified as `kind` by [`ProviderAdapter::classify_error`].
    pub async fn push_error(&self, error: MnemoError, kind: ProviderErrorKind) {
        self.turns.lock().await.push_back(ScriptedTurn::Error(error, kind));
    }

    /// Number of `generate` calls this provider has served so far.
    pub fn call_count(&self) -> usize {
        self.calls.load(Ordering::Acquire)
    }

    fn default_outcome() -> ProviderOutcome {
        ProviderOutcome {
            memory_session_id: Some(format!("mock-mem-{}", uuid::Uuid::new_v4())),
            observations: vec![ObservationDraft {
                observation_type: ObservationType::Discovery,
                title: "mock observation".to_string(),
                subtitle: None,
                narrative: "generated by MockProvider".to_string(),
                facts: Vec::new(),
                concepts: Vec::new(),
                files_read: Vec::new(),
                files_modified: Vec::new(),
                discovery_tokens: 1,
            }],
            summaries: Vec::new(),
        }
    }
}

#[async_trait]
impl PluginAdapter for MockProvider {
    fn name(&self) -> &str {
        self.name
    }

    fn version(&self) -> semver::Version {
        semver::Version::new(0, 1, 0)
    }

    fn adapter_type(&self) -> AdapterType {
        AdapterType::Provider
    }

    async fn health_check(&self) -> Result<HealthStatus, MnemoError> {
        Ok(HealthStatus::Healthy)
    }

    async fn shutdown(&self) -> Result<(), MnemoError> {
        Ok(())
    }
}

#[async_trait]
impl ProviderAdapter for MockProvider {
    fn slot(&self) -> ProviderSlot {
        self.slot
    }

    async fn generate(
        &self,
        _session_db_id: i64,
        _request: ProviderRequest,
    ) -> Result<ProviderOutcome, MnemoError> {
        self.calls.fetch_add(1, Ordering::AcqRel);
        let next = self.turns.lock().await.pop_front();
        match next {
            Some(ScriptedTurn::Outcome(outcome)) => Ok(outcome),
            Some(ScriptedTurn::Error(error, _kind)) => Err(error),
            None => Ok(Self::default_outcome()),
        }
    }

    fn classify_error(&self, error: &MnemoError) -> ProviderErrorKind {
        // The scripted kind travels with the error as its message prefix
        // so classify_error, which only sees the error, can recover it.
        // Real providers curate signatures from actual CLI stderr; this
        // mock owns both ends so it just round-trips the tag.
        match error {
            MnemoError::Fatal(_) => ProviderErrorKind::Unrecoverable,
            MnemoError::ProviderSessionTerminated(_) => ProviderErrorKind::Terminated,
            MnemoError::Provider { message, .. } if message.starts_with("stale-resume:") => {
                ProviderErrorKind::StaleResume
            }
            _ => ProviderErrorKind::Other,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn default_outcome_when_queue_empty() {
        let provider = MockProvider::new("mock", ProviderSlot::Primary);
        let request = ProviderRequest {
            conversation_history: Vec::new(),
            payload: mnemo_core::types::MessagePayload::Summarize { last_assistant_message: None },
            memory_session_id: None,
            project: "proj".to_string(),
            prompt_number: 1,
        };
        let outcome = provider.generate(1, request).await.unwrap();
        assert_eq!(outcome.observations.len(), 1);
        assert_eq!(provider.call_count(), 1);
    }

    #[tokio::test]
    async fn queued_outcomes_returned_in_order() {
        let provider = MockProvider::new("mock", ProviderSlot::Primary);
        provider
            .push_outcome(ProviderOutcome {
                memory_session_id: Some("m1".to_string()),
                observations: Vec::new(),
                summaries: Vec::new(),
            })
            .await;
        provider
            .push_error(MnemoError::Fatal("boom".to_string()), ProviderErrorKind::Unrecoverable)
            .await;

        let request = |n| ProviderRequest {
            conversation_history: Vec::new(),
            payload: mnemo_core::types::MessagePayload::Summarize { last_assistant_message: None },
            memory_session_id: None,
            project: "proj".to_string(),
            prompt_number: n,
        };

        let first = provider.generate(1, request(1)).await.unwrap();
        assert_eq!(first.memory_session_id.as_deref(), Some("m1"));

        let second = provider.generate(1, request(2)).await;
        assert!(second.is_err());
        assert_eq!(provider.classify_error(&second.unwrap_err()), ProviderErrorKind::Unrecoverable);
    }

    #[test]
    fn slot_reports_configured_value() {
        let provider = MockProvider::new("mock-alt", ProviderSlot::AlternateA);
        assert_eq!(provider.slot(), ProviderSlot::AlternateA);
        assert_eq!(provider.name(), "mock-alt");
    }
}
