// SPDX-FileCopyrightText: 2026 Mnemo Contributors
// SPDX-License-Identifier: MIT OR Apache-2.0

//! Configuration system for the mnemo memory service worker.
//!
//! Settings are layered: compiled defaults < system file < user XDG file <
//! local file < `MNEMO_*` environment variables. See [`loader`] for the
//! merge chain and [`model::Settings`] for the full key surface.

pub mod diagnostic;
pub mod loader;
pub mod model;
pub mod validation;

pub use loader::{build_figment, load_settings, load_settings_from_path, load_settings_from_str};
pub use model::Settings;

use diagnostic::{figment_to_config_errors, ConfigError};
use validation::validate_settings;

/// Load settings from the XDG hierarchy and env, then run semantic validation.
///
/// Combines figment's structural errors (unknown keys, type mismatches) and
/// [`validation::validate_settings`]'s semantic errors into one `Vec<ConfigError>`.
pub fn load_and_validate() -> Result<Settings, Vec<ConfigError>> {
    let settings = load_settings().map_err(|e| figment_to_config_errors(e, &[]))?;
    validate_settings(&settings).map_err(|errs| errs)?;
    Ok(settings)
}

/// Load settings from a TOML string and run semantic validation. Test helper.
pub fn load_and_validate_str(toml_content: &str) -> Result<Settings, Vec<ConfigError>> {
    let settings =
        load_settings_from_str(toml_content).map_err(|e| figment_to_config_errors(e, &[]))?;
    validate_settings(&settings)?;
    Ok(settings)
}
