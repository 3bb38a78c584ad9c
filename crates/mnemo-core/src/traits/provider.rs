// SPDX-FileCopyrightText: 2026 Mnemo Contributors
// SPDX-License-Identifier: MIT OR Apache-2.0

//! Provider adapter trait implemented by `mnemo-anthropic`, `mnemo-openai`,
//! and `mnemo-gemini` (spec §4.4).
//!
//! Each provider wraps a subprocess-based LLM agent binary: it spawns a
//! child process per call, feeds it `conversation_history` plus the queued
//! message, and parses the child's structured output into a
//! [`ProviderOutcome`]. The spawned child is registered with a
//! [`crate::subprocess::SubprocessRegistry`] so orphan/stale reapers and the
//! shutdown coordinator can track and kill it.

use async_trait::async_trait;

use crate::error::MnemoError;
use crate::traits::adapter::PluginAdapter;
use crate::types::{ProviderErrorKind, ProviderOutcome, ProviderRequest, ProviderSlot};

/// Adapter for one LLM-provider-backed generator backend.
#[async_trait]
pub trait ProviderAdapter: PluginAdapter {
    /// Which of the three fixed provider slots this adapter fills.
    fn slot(&self) -> ProviderSlot;

    /// Runs one generator turn against this provider: spawns (or reuses,
    /// provider-permitting) a subprocess, sends `request`, and returns the
    /// parsed observations/summaries plus any newly captured
    /// `memory_session_id`. `session_db_id` is used only to key the
    /// subprocess registry entry for this call.
    async fn generate(
        &self,
        session_db_id: i64,
        request: ProviderRequest,
    ) -> Result<ProviderOutcome, MnemoError>;

    /// Classifies a failure from [`generate`] using this provider's curated
    /// error-signature set (spec §4.4 exit conditions / §7 taxonomy).
    fn classify_error(&self, error: &MnemoError) -> ProviderErrorKind;
}
