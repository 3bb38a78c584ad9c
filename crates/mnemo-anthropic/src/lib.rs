// SPDX-FileCopyrightText: 2026 Mnemo Contributors
// SPDX-License-Identifier: MIT OR Apache-2.0

//! Anthropic Claude provider adapter for the mnemo memory service.
//!
//! Wraps the `claude` CLI as a subprocess-based generator backend (spec
//! §4.4): each call spawns a fresh child, feeds it the queued message plus
//! conversation history on stdin, and parses its structured stdout into a
//! [`ProviderOutcome`].

pub mod client;
pub mod types;

use async_trait::async_trait;
use mnemo_config::model::ProviderCredentials;
use mnemo_core::error::MnemoError;
use mnemo_core::subprocess::SubprocessRegistry;
use mnemo_core::traits::{PluginAdapter, ProviderAdapter};
use mnemo_core::types::{AdapterType, HealthStatus, ProviderErrorKind, ProviderOutcome, ProviderRequest, ProviderSlot};
use tracing::{debug, info};

const DEFAULT_BINARY: &str = "claude";
const DEFAULT_SYSTEM_PROMPT: &str =
    "You are an observation extractor for a developer memory service. Read the tool \
     invocation and emit structured observations or session summaries as instructed.";

/// Anthropic Claude provider implementing [`ProviderAdapter`] over the
/// `claude` CLI subprocess.
pub struct AnthropicProvider {
    registry: SubprocessRegistry,
    binary: String,
    model: Option<String>,
    system_prompt: String,
}

impl AnthropicProvider {
    /// Creates a new Anthropic provider from its credentials section.
    ///
    /// Returns [`MnemoError::Fatal`] if no API key is configured: starting
    /// a provider with no credentials fails outright rather than degrading
    /// (spec §4.4 "starting fails with a typed error").
    pub fn new(registry: SubprocessRegistry, credentials: &ProviderCredentials) -> Result<Self, MnemoError> {
        let api_key = credentials
            .api_key
            .clone()
            .or_else(|| std::env::var("ANTHROPIC_API_KEY").ok())
            .ok_or_else(|| {
                MnemoError::Fatal("no Anthropic API key configured (provider.anthropic.api_key or ANTHROPIC_API_KEY)".into())
            })?;

        // The subprocess inherits credentials through its own environment;
        // mnemo never passes the key on the command line.
        // SAFETY: single-threaded at startup, before the generator loop runs.
        unsafe {
            std::env::set_var("ANTHROPIC_API_KEY", api_key);
        }

        info!(model = ?credentials.model, "Anthropic provider initialized");

        Ok(Self {
            registry,
            binary: DEFAULT_BINARY.to_string(),
            model: credentials.model.clone(),
            system_prompt: DEFAULT_SYSTEM_PROMPT.to_string(),
        })
    }

    #[cfg(test)]
    fn with_binary(registry: SubprocessRegistry, binary: impl Into<String>) -> Self {
        Self {
            registry,
            binary: binary.into(),
            model: None,
            system_prompt: DEFAULT_SYSTEM_PROMPT.to_string(),
        }
    }
}

#[async_trait]
impl PluginAdapter for AnthropicProvider {
    fn name(&self) -> &str {
        "anthropic"
    }

    fn version(&self) -> semver::Version {
        semver::Version::new(0, 1, 0)
    }

    fn adapter_type(&self) -> AdapterType {
        AdapterType::Provider
    }

    async fn health_check(&self) -> Result<HealthStatus, MnemoError> {
        // Avoid spending tokens on a health check; confirm the binary
        // resolves on PATH instead of making a live call.
        match tokio::process::Command::new(&self.binary)
            .arg("--version")
            .output()
            .await
        {
            Ok(output) if output.status.success() => Ok(HealthStatus::Healthy),
            Ok(output) => Ok(HealthStatus::Degraded(format!(
                "{} --version exited with {}",
                self.binary, output.status
            ))),
            Err(e) => Ok(HealthStatus::Unhealthy(format!("{} not runnable: {e}", self.binary))),
        }
    }

    async fn shutdown(&self) -> Result<(), MnemoError> {
        debug!("Anthropic provider shutting down");
        Ok(())
    }
}

#[async_trait]
impl ProviderAdapter for AnthropicProvider {
    fn slot(&self) -> ProviderSlot {
        ProviderSlot::Primary
    }

    async fn generate(
        &self,
        session_db_id: i64,
        request: ProviderRequest,
    ) -> Result<ProviderOutcome, MnemoError> {
        client::run_turn(
            &self.registry,
            session_db_id,
            self.name(),
            &self.binary,
            self.model.as_deref(),
            &self.system_prompt,
            &request,
        )
        .await
    }

    fn classify_error(&self, error: &MnemoError) -> ProviderErrorKind {
        match error {
            MnemoError::Fatal(_) => ProviderErrorKind::Unrecoverable,
            MnemoError::ProviderSessionTerminated(_) => ProviderErrorKind::Terminated,
            MnemoError::Provider { message, .. } => crate::types::classify_signature(message),
            _ => ProviderErrorKind::Other,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn health_check_reports_unhealthy_for_missing_binary() {
        let provider = AnthropicProvider::with_binary(SubprocessRegistry::new(), "definitely-not-a-real-binary");
        let status = provider.health_check().await.unwrap();
        assert!(matches!(status, HealthStatus::Unhealthy(_)));
    }

    #[test]
    fn slot_is_primary() {
        let provider = AnthropicProvider::with_binary(SubprocessRegistry::new(), "claude");
        assert_eq!(provider.slot(), ProviderSlot::Primary);
    }

    #[test]
    fn classify_error_maps_fatal_to_unrecoverable() {
        let provider = AnthropicProvider::with_binary(SubprocessRegistry::new(), "claude");
        let err = MnemoError::Fatal("no API key configured".into());
        assert_eq!(provider.classify_error(&err), ProviderErrorKind::Unrecoverable);
    }

    #[test]
    fn classify_error_maps_terminated() {
        let provider = AnthropicProvider::with_binary(SubprocessRegistry::new(), "claude");
        let err = MnemoError::ProviderSessionTerminated("bye".into());
        assert_eq!(provider.classify_error(&err), ProviderErrorKind::Terminated);
    }
}
