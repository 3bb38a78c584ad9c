// SPDX-FileCopyrightText: 2026 Mnemo Contributors
// SPDX-License-Identifier: MIT OR Apache-2.0

//! OpenAI provider adapter for the mnemo memory service.
//!
//! Wraps the `codex` CLI as a subprocess-based generator backend, filling
//! the first alternate provider slot in the fallback chain (spec §4.4).

pub mod client;
pub mod types;

use async_trait::async_trait;
use mnemo_config::model::ProviderCredentials;
use mnemo_core::error::MnemoError;
use mnemo_core::subprocess::SubprocessRegistry;
use mnemo_core::traits::{PluginAdapter, ProviderAdapter};
use mnemo_core::types::{AdapterType, HealthStatus, ProviderErrorKind, ProviderOutcome, ProviderRequest, ProviderSlot};
use tracing::{debug, info};

const DEFAULT_BINARY: &str = "codex";
const DEFAULT_SYSTEM_PROMPT: &str =
    "You are an observation extractor for a developer memory service. Read the tool \
     invocation and emit structured observations or session summaries as instructed.";

/// OpenAI provider implementing [`ProviderAdapter`] over the `codex` CLI subprocess.
pub struct OpenAiProvider {
    registry: SubprocessRegistry,
    binary: String,
    model: Option<String>,
    system_prompt: String,
}

impl OpenAiProvider {
    /// Creates a new OpenAI provider from its credentials section. Returns
    /// [`MnemoError::Fatal`] if no API key is configured.
    pub fn new(registry: SubprocessRegistry, credentials: &ProviderCredentials) -> Result<Self, MnemoError> {
        let api_key = credentials
            .api_key
            .clone()
            .or_else(|| std::env::var("OPENAI_API_KEY").ok())
            .ok_or_else(|| {
                MnemoError::Fatal("no OpenAI API key configured (provider.openai.api_key or OPENAI_API_KEY)".into())
            })?;

        // SAFETY: single-threaded at startup, before the generator loop runs.
        unsafe {
            std::env::set_var("OPENAI_API_KEY", api_key);
        }

        info!(model = ?credentials.model, "OpenAI provider initialized");

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
impl PluginAdapter for OpenAiProvider {
    fn name(&self) -> &str {
        "openai"
    }

    fn version(&self) -> semver::Version {
        semver::Version::new(0, 1, 0)
    }

    fn adapter_type(&self) -> AdapterType {
        AdapterType::Provider
    }

    async fn health_check(&self) -> Result<HealthStatus, MnemoError> {
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
        debug!("OpenAI provider shutting down");
        Ok(())
    }
}

#[async_trait]
impl ProviderAdapter for OpenAiProvider {
    fn slot(&self) -> ProviderSlot {
        ProviderSlot::AlternateA
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
        let provider = OpenAiProvider::with_binary(SubprocessRegistry::new(), "definitely-not-a-real-binary");
        let status = provider.health_check().await.unwrap();
        assert!(matches!(status, HealthStatus::Unhealthy(_)));
    }

    #[test]
    fn slot_is_alternate_a() {
        let provider = OpenAiProvider::with_binary(SubprocessRegistry::new(), "codex");
        assert_eq!(provider.slot(), ProviderSlot::AlternateA);
    }
}
