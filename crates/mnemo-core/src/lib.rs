// SPDX-FileCopyrightText: 2026 Mnemo Contributors
// SPDX-License-Identifier: MIT OR Apache-2.0

//! Shared error types, data model, adapter traits, and subprocess tracking
//! for the mnemo memory service.
//!
//! This crate has no knowledge of SQLite, HTTP, or any particular LLM
//! provider -- it defines the vocabulary (`types`), the failure taxonomy
//! (`error`), the two seams higher crates implement against (`traits`), and
//! the subprocess registry shared by every provider crate and the reapers
//! in `mnemo-cron` (`subprocess`).

pub mod error;
pub mod subprocess;
pub mod traits;
pub mod types;

pub use error::MnemoError;
pub use subprocess::{ManagedChild, SubprocessRegistry};
pub use traits::{PluginAdapter, ProviderAdapter, StorageAdapter};
pub use types::{AdapterType, HealthStatus};

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn crate_root_reexports_resolve() {
        fn _assert_plugin_adapter<T: PluginAdapter>() {}
        fn _assert_provider_adapter<T: ProviderAdapter>() {}
        fn _assert_storage_adapter<T: StorageAdapter>() {}
        let _ = AdapterType::Provider;
        let _ = HealthStatus::Healthy;
        let _ = MnemoError::Internal("x".into());
    }
}
