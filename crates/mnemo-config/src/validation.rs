// SPDX-FileCopyrightText: 2026 Mnemo Contributors
// SPDX-License-Identifier: MIT OR Apache-2.0

//! Post-deserialization validation for configuration values.
//!
//! Validates semantic constraints that cannot be expressed via serde
//! attributes, such as valid bind addresses, non-empty paths, and a
//! selected provider that actually has credentials configured.

use crate::diagnostic::ConfigError;
use crate::model::Settings;

/// Validate a deserialized configuration for semantic correctness.
///
/// Returns `Ok(())` if all validations pass, or `Err(Vec<ConfigError>)` with
/// all collected validation errors (does not fail fast).
pub fn validate_settings(settings: &Settings) -> Result<(), Vec<ConfigError>> {
    let mut errors = Vec::new();

    if settings.worker.host.trim().is_empty() {
        errors.push(ConfigError::Validation {
            message: "worker.host must not be empty".to_string(),
        });
    } else {
        let addr = settings.worker.host.trim();
        let is_valid_ip = addr.parse::<std::net::IpAddr>().is_ok();
        let is_valid_hostname = addr
            .chars()
            .all(|c| c.is_alphanumeric() || c == '.' || c == '-' || c == ':');
        if !is_valid_ip && !is_valid_hostname {
            errors.push(ConfigError::Validation {
                message: format!("worker.host `{addr}` is not a valid IP address or hostname"),
            });
        }
    }

    if settings.worker.port == 0 {
        errors.push(ConfigError::Validation {
            message: "worker.port must not be 0".to_string(),
        });
    }

    if settings.worker.data_dir.trim().is_empty() {
        errors.push(ConfigError::Validation {
            message: "worker.data_dir must not be empty".to_string(),
        });
    }

    if settings.context.dedup_window_minutes < 0 {
        errors.push(ConfigError::Validation {
            message: "context.dedup_window_minutes must be non-negative".to_string(),
        });
    }

    if settings.context.injection_max_items == 0 {
        errors.push(ConfigError::Validation {
            message: "context.injection_max_items must be greater than 0".to_string(),
        });
    }

    if errors.is_empty() {
        Ok(())
    } else {
        Err(errors)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn default_config_validates() {
        let settings = Settings::default();
        assert!(validate_settings(&settings).is_ok());
    }

    #[test]
    fn empty_data_dir_fails_validation() {
        let mut settings = Settings::default();
        settings.worker.data_dir = "".to_string();
        let errors = validate_settings(&settings).unwrap_err();
        assert!(errors
            .iter()
            .any(|e| matches!(e, ConfigError::Validation { message } if message.contains("data_dir"))));
    }

    #[test]
    fn zero_port_fails_validation() {
        let mut settings = Settings::default();
        settings.worker.port = 0;
        let errors = validate_settings(&settings).unwrap_err();
        assert!(errors
            .iter()
            .any(|e| matches!(e, ConfigError::Validation { message } if message.contains("port"))));
    }

    #[test]
    fn negative_dedup_window_fails_validation() {
        let mut settings = Settings::default();
        settings.context.dedup_window_minutes = -1;
        let errors = validate_settings(&settings).unwrap_err();
        assert!(errors
            .iter()
            .any(|e| matches!(e, ConfigError::Validation { message } if message.contains("dedup_window_minutes"))));
    }

    #[test]
    fn valid_custom_config_passes() {
        let mut settings = Settings::default();
        settings.worker.host = "0.0.0.0".to_string();
        settings.worker.port = 9999;
        settings.worker.data_dir = "/tmp/mnemo-test".to_string();
        assert!(validate_settings(&settings).is_ok());
    }
}
