// SPDX-FileCopyrightText: 2026 Mnemo Contributors
// SPDX-License-Identifier: MIT OR Apache-2.0

//! Error types shared across the memory service.
//!
//! Variants map to the error taxonomy of the generator/storage/HTTP
//! components: transient I/O, provider failures (both retryable and
//! session-terminating), queue/validation problems, and fatal startup
//! conditions that should abort the process rather than degrade.

use thiserror::Error;

/// The primary error type used across storage, provider, and session code.
#[derive(Debug, Error)]
pub enum MnemoError {
    /// Configuration errors (invalid TOML, missing required fields, type mismatches).
    #[error("configuration error: {0}")]
    Config(String),

    /// Storage backend errors (connection, migration, query failure).
    #[error("storage error: {source}")]
    Storage {
        #[from]
        source: Box<dyn std::error::Error + Send + Sync>,
    },

    /// Pending-message queue errors (claim/confirm/abandon protocol violations).
    #[error("queue error: {0}")]
    Queue(String),

    /// LLM provider errors that may be retried against the same provider.
    #[error("provider error: {message}")]
    Provider {
        message: String,
        source: Option<Box<dyn std::error::Error + Send + Sync>>,
    },

    /// The provider has terminated the underlying session/connection; the
    /// generator must fall back to the next provider in the selection order.
    #[error("provider session terminated: {0}")]
    ProviderSessionTerminated(String),

    /// Content was rejected by a privacy/redaction boundary before leaving
    /// the host.
    #[error("privacy rejection: {0}")]
    PrivacyRejection(String),

    /// Subprocess lifecycle errors (spawn failure, unexpected exit, reap
    /// failure).
    #[error("subprocess error: {0}")]
    Subprocess(String),

    /// Input failed validation (malformed request body, out-of-range value).
    #[error("validation error: {0}")]
    Validation(String),

    /// Operation timed out.
    #[error("operation timed out after {duration:?}")]
    Timeout { duration: std::time::Duration },

    /// Unrecoverable startup condition; the process should exit non-zero.
    #[error("fatal startup error: {0}")]
    Fatal(String),

    /// Internal or unexpected errors.
    #[error("internal error: {0}")]
    Internal(String),
}

impl MnemoError {
    /// True for errors the error-handling design classifies as transient and
    /// therefore worth a bounded retry rather than surfacing to the caller.
    pub fn is_transient(&self) -> bool {
        matches!(self, MnemoError::Provider { .. } | MnemoError::Timeout { .. })
    }
}
