// SPDX-FileCopyrightText: 2026 Mnemo Contributors
// SPDX-License-Identifier: MIT OR Apache-2.0

//! Integration tests for the mnemo configuration system.

use mnemo_config::diagnostic::{suggest_key, ConfigError};
use mnemo_config::model::{ProviderKind, Settings};
use mnemo_config::{load_and_validate_str, load_settings_from_str};

/// Valid TOML with all known fields deserializes successfully.
#[test]
fn valid_toml_deserializes_into_settings() {
    let toml = r#"
[worker]
data_dir = "/tmp/mnemo"
host = "0.0.0.0"
port = 9999
log_level = "debug"
runtime_mode = "interactive"

[provider]
selected = "openai"

[provider.anthropic]
api_key = "sk-ant-123"
model = "claude-sonnet-4-20250514"

[context]
injection_max_items = 5
injection_max_chars = 1000
dedup_window_minutes = 30

[privacy]
skip_tools = ["TodoWrite"]
excluded_projects = ["secret-project"]
"#;

    let settings = load_settings_from_str(toml).expect("valid TOML should deserialize");
    assert_eq!(settings.worker.data_dir, "/tmp/mnemo");
    assert_eq!(settings.worker.host, "0.0.0.0");
    assert_eq!(settings.worker.port, 9999);
    assert_eq!(settings.worker.log_level, "debug");
    assert_eq!(settings.provider.selected, ProviderKind::Openai);
    assert_eq!(
        settings.provider.anthropic.api_key.as_deref(),
        Some("sk-ant-123")
    );
    assert_eq!(settings.context.injection_max_items, 5);
    assert_eq!(settings.context.dedup_window_minutes, 30);
    assert_eq!(settings.privacy.skip_tools, vec!["TodoWrite"]);
    assert_eq!(settings.privacy.excluded_projects, vec!["secret-project"]);
}

/// Unknown field in [worker] section produces an UnknownField error.
#[test]
fn unknown_field_in_worker_produces_error() {
    let toml = r#"
[worker]
hsot = "test"
"#;

    let err = load_settings_from_str(toml).expect_err("should reject unknown field");
    let err_str = format!("{err}");
    assert!(
        err_str.contains("unknown field") || err_str.contains("hsot"),
        "error should mention unknown field or the bad key, got: {err_str}"
    );
}

/// Missing optional sections use defaults without error.
#[test]
fn missing_optional_sections_use_defaults() {
    let toml = "";
    let settings = load_settings_from_str(toml).expect("empty TOML should use defaults");

    assert_eq!(settings.worker.host, "127.0.0.1");
    assert_eq!(settings.worker.port, 37777);
    assert_eq!(settings.worker.log_level, "info");
    assert_eq!(settings.provider.selected, ProviderKind::Anthropic);
    assert!(settings.provider.anthropic.api_key.is_none());
    assert_eq!(settings.context.injection_max_items, 20);
    assert!(settings.privacy.excluded_projects.is_empty());
}

/// Environment variable override via dot-notation merge (simulating
/// MNEMO_WORKER_PORT) overrides worker.port in TOML.
#[test]
fn env_var_overrides_worker_port() {
    use figment::{
        providers::{Format, Serialized, Toml},
        Figment,
    };

    let toml_content = r#"
[worker]
port = 1111
"#;

    let settings: Settings = Figment::new()
        .merge(Serialized::defaults(Settings::default()))
        .merge(Toml::string(toml_content))
        .merge(("worker.port", 2222))
        .extract()
        .expect("should merge env override");

    assert_eq!(settings.worker.port, 2222);
}

/// Dot-notation override reaches a nested provider credential
/// (provider.anthropic.api_key, not provider.anthropic_api.key).
#[test]
fn env_var_overrides_nested_provider_credential() {
    use figment::{providers::Serialized, Figment};

    let settings: Settings = Figment::new()
        .merge(Serialized::defaults(Settings::default()))
        .merge(("provider.anthropic.api_key", "xyz-from-env"))
        .extract()
        .expect("should set api_key via dot notation");

    assert_eq!(
        settings.provider.anthropic.api_key.as_deref(),
        Some("xyz-from-env")
    );
}

/// Serialized defaults provide sensible values for all required fields.
#[test]
fn serialized_defaults_are_sensible() {
    let settings = Settings::default();

    assert_eq!(settings.worker.port, 37777);
    assert_eq!(settings.worker.log_level, "info");
    assert_eq!(settings.provider.selected, ProviderKind::Anthropic);
    assert!(settings.provider.anthropic.api_key.is_none());
    assert!(!settings.privacy.skip_tools.is_empty());
}

/// Missing config files are silently skipped (Figment's Toml::file() behavior).
#[test]
fn missing_config_files_silently_skipped() {
    use figment::{
        providers::{Format, Serialized, Toml},
        Figment,
    };

    let settings: Settings = Figment::new()
        .merge(Serialized::defaults(Settings::default()))
        .merge(Toml::file("/nonexistent/path/mnemo.toml"))
        .extract()
        .expect("missing file should be silently skipped");

    assert_eq!(settings.worker.port, 37777);
}

/// Unexpected top-level section is rejected by deny_unknown_fields.
#[test]
fn deny_unknown_fields_at_top_level() {
    let toml = r#"
[logging]
level = "debug"
"#;

    let err =
        load_settings_from_str(toml).expect_err("unknown top-level section should be rejected");
    let err_str = format!("{err}");
    assert!(
        err_str.contains("unknown field") || err_str.contains("logging"),
        "error should mention unknown field, got: {err_str}"
    );
}

// ============================================================================
// Diagnostic tests
// ============================================================================

/// Unknown key "hsot" in [worker] produces suggestion "did you mean `host`?"
#[test]
fn diagnostic_hsot_suggests_host() {
    let valid_keys = &["host", "port", "log_level"];
    let suggestion = suggest_key("hsot", valid_keys);
    assert_eq!(suggestion, Some("host".to_string()));
}

/// Unknown key "zzzzzz" with no close match does NOT produce a suggestion.
#[test]
fn diagnostic_no_suggestion_for_distant_typo() {
    let valid_keys = &["host", "port", "log_level"];
    let suggestion = suggest_key("zzzzzz", valid_keys);
    assert!(suggestion.is_none(), "should not suggest for distant typo");
}

/// Error output from load_and_validate_str includes the unknown key name.
#[test]
fn diagnostic_error_includes_unknown_key() {
    let toml = r#"
[worker]
hsot = "test"
"#;

    let errors = load_and_validate_str(toml).expect_err("should produce errors");
    assert!(!errors.is_empty(), "should have at least one error");

    let has_unknown_key = errors.iter().any(|e| {
        matches!(e, ConfigError::UnknownKey { key, suggestion, valid_keys, .. } if {
            key == "hsot"
                && suggestion.as_deref() == Some("host")
                && valid_keys.contains("host")
        })
    });
    assert!(
        has_unknown_key,
        "should have UnknownKey error for 'hsot' with suggestion 'host', got: {errors:?}"
    );
}

/// ConfigError implements miette::Diagnostic (can be rendered).
#[test]
fn config_error_implements_diagnostic() {
    use miette::Diagnostic;

    let error = ConfigError::UnknownKey {
        key: "hsot".to_string(),
        suggestion: Some("host".to_string()),
        valid_keys: "host, port, log_level".to_string(),
        span: None,
        src: None,
    };

    let code = error.code();
    assert!(code.is_some(), "should have diagnostic code");

    let help = error.help();
    assert!(help.is_some(), "should have help text");
    let help_str = help.unwrap().to_string();
    assert!(
        help_str.contains("did you mean `host`"),
        "help should contain suggestion, got: {help_str}"
    );
}

/// ConfigError can be rendered using miette's graphical handler.
#[test]
fn config_error_renders_with_miette() {
    use miette::GraphicalReportHandler;

    let error = ConfigError::UnknownKey {
        key: "hsot".to_string(),
        suggestion: Some("host".to_string()),
        valid_keys: "host, port, log_level".to_string(),
        span: None,
        src: None,
    };

    let handler = GraphicalReportHandler::new();
    let mut buf = String::new();
    handler
        .render_report(&mut buf, &error)
        .expect("should render without error");
    assert!(!buf.is_empty(), "rendered report should not be empty");
    assert!(buf.contains("hsot"), "rendered report should mention the key");
}

/// load_and_validate_str with valid TOML returns Ok settings.
#[test]
fn load_and_validate_valid_toml() {
    let toml = r#"
[worker]
host = "0.0.0.0"
"#;

    let settings = load_and_validate_str(toml).expect("valid TOML should validate");
    assert_eq!(settings.worker.host, "0.0.0.0");
}

/// load_and_validate with defaults works (no config file needed).
#[test]
fn load_and_validate_defaults() {
    let settings = mnemo_config::load_and_validate().expect("defaults should validate");
    assert_eq!(settings.worker.port, 37777);
}

/// Validation catches a zero port.
#[test]
fn validation_catches_zero_port() {
    let toml = r#"
[worker]
port = 0
"#;

    let errors = load_and_validate_str(toml).expect_err("zero port should fail");
    let has_validation_error = errors
        .iter()
        .any(|e| matches!(e, ConfigError::Validation { message } if message.contains("port")));
    assert!(has_validation_error, "should have validation error for port 0");
}
