// SPDX-FileCopyrightText: 2026 Mnemo Contributors
// SPDX-License-Identifier: MIT OR Apache-2.0

//! Configuration model structs for the mnemo memory service.
//!
//! All structs use `#[serde(deny_unknown_fields)]` to reject unrecognized
//! config keys at startup, providing actionable error messages via
//! [`crate::diagnostic`].

use serde::{Deserialize, Serialize};

/// Top-level mnemo worker configuration.
///
/// Loaded from a flat TOML file following the XDG hierarchy, with
/// environment variable overrides. All sections are optional and default
/// to sensible values (spec §6 "Environment and settings").
#[derive(Debug, Clone, Default, Deserialize, Serialize)]
#[serde(deny_unknown_fields)]
pub struct Settings {
    /// Worker process settings: data directory, bind address, logging.
    #[serde(default)]
    pub worker: WorkerConfig,

    /// Which LLM provider generates observations, and its credentials.
    #[serde(default)]
    pub provider: ProviderConfig,

    /// Context-injection display and size limits for `/api/context/inject`.
    #[serde(default)]
    pub context: ContextConfig,

    /// Privacy and filtering lists (skip-tools, exclusions, whitelists).
    #[serde(default)]
    pub privacy: PrivacyConfig,
}

/// Worker process configuration.
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(deny_unknown_fields)]
pub struct WorkerConfig {
    /// Directory holding the database file, logs, and PID file.
    #[serde(default = "default_data_dir")]
    pub data_dir: String,

    /// Address to bind the HTTP surface to. Loopback only (spec §1 Non-goals).
    #[serde(default = "default_host")]
    pub host: String,

    /// TCP port for the HTTP surface.
    #[serde(default = "default_port")]
    pub port: u16,

    /// Logging level (trace, debug, info, warn, error).
    #[serde(default = "default_log_level")]
    pub log_level: String,

    /// Daemon mode ignores SIGHUP; interactive mode treats it as terminate
    /// (spec §4.7 "Signal handling").
    #[serde(default = "default_runtime_mode")]
    pub runtime_mode: RuntimeMode,
}

impl Default for WorkerConfig {
    fn default() -> Self {
        Self {
            data_dir: default_data_dir(),
            host: default_host(),
            port: default_port(),
            log_level: default_log_level(),
            runtime_mode: default_runtime_mode(),
        }
    }
}

/// How the worker process was launched.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum RuntimeMode {
    /// Detached background process; survives controlling-terminal exit.
    Daemon,
    /// Attached to an interactive terminal.
    Interactive,
}

fn default_data_dir() -> String {
    dirs::data_dir()
        .map(|p| p.join("mnemo"))
        .unwrap_or_else(|| std::path::PathBuf::from("mnemo-data"))
        .to_string_lossy()
        .into_owned()
}

fn default_host() -> String {
    "127.0.0.1".to_string()
}

fn default_port() -> u16 {
    37777
}

fn default_log_level() -> String {
    "info".to_string()
}

fn default_runtime_mode() -> RuntimeMode {
    RuntimeMode::Daemon
}

/// Which generator provider is active, and credentials for all three
/// (so a mid-session switch, per spec §4.4, doesn't require a restart).
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(deny_unknown_fields)]
pub struct ProviderConfig {
    /// The provider currently selected to run the generator loop.
    #[serde(default = "default_selected_provider")]
    pub selected: ProviderKind,

    /// Primary provider (Anthropic Claude).
    #[serde(default)]
    pub anthropic: ProviderCredentials,

    /// First alternate provider (OpenAI), used by the fallback chain.
    #[serde(default)]
    pub openai: ProviderCredentials,

    /// Second alternate provider (Google Gemini), used by the fallback chain.
    #[serde(default)]
    pub gemini: ProviderCredentials,
}

impl Default for ProviderConfig {
    fn default() -> Self {
        Self {
            selected: default_selected_provider(),
            anthropic: ProviderCredentials::default(),
            openai: ProviderCredentials::default(),
            gemini: ProviderCredentials::default(),
        }
    }
}

/// One of the three generator providers named in spec §4.4.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum ProviderKind {
    Anthropic,
    Openai,
    Gemini,
}

fn default_selected_provider() -> ProviderKind {
    ProviderKind::Anthropic
}

impl ProviderKind {
    /// The fallback order tried after this provider when its session is
    /// terminated upstream (spec §4.4 "Terminated-upstream errors").
    pub fn fallback_order(self) -> [ProviderKind; 2] {
        match self {
            ProviderKind::Anthropic => [ProviderKind::Openai, ProviderKind::Gemini],
            ProviderKind::Openai => [ProviderKind::Anthropic, ProviderKind::Gemini],
            ProviderKind::Gemini => [ProviderKind::Anthropic, ProviderKind::Openai],
        }
    }
}

/// Credentials and model selection for a single provider.
#[derive(Debug, Clone, Default, Deserialize, Serialize)]
#[serde(deny_unknown_fields)]
pub struct ProviderCredentials {
    /// API key. `None` means the provider is unavailable (spec §4.4
    /// "starting fails with a typed error").
    #[serde(default)]
    pub api_key: Option<String>,

    /// Model identifier to request.
    #[serde(default)]
    pub model: Option<String>,
}

/// Context-injection limits and display toggles for `/api/context/inject`.
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(deny_unknown_fields)]
pub struct ContextConfig {
    /// Maximum number of observations/summaries returned per injection.
    #[serde(default = "default_injection_max_items")]
    pub injection_max_items: usize,

    /// Maximum character length of the injected context blob.
    #[serde(default = "default_injection_max_chars")]
    pub injection_max_chars: usize,

    /// Show file paths (filesRead/filesModified) in injected context.
    #[serde(default = "default_true")]
    pub show_file_paths: bool,

    /// Show timestamps in injected context.
    #[serde(default = "default_true")]
    pub show_timestamps: bool,

    /// Dedup window for observation contentHash collisions (spec §4.1,
    /// Open Question: "not pinned down in the source; set conservatively").
    #[serde(default = "default_dedup_window_minutes")]
    pub dedup_window_minutes: i64,

    /// How far back `/api/context/inject` looks for prior observations.
    #[serde(default = "default_injection_lookback_hours")]
    pub injection_lookback_hours: i64,
}

impl Default for ContextConfig {
    fn default() -> Self {
        Self {
            injection_max_items: default_injection_max_items(),
            injection_max_chars: default_injection_max_chars(),
            show_file_paths: true,
            show_timestamps: true,
            dedup_window_minutes: default_dedup_window_minutes(),
            injection_lookback_hours: default_injection_lookback_hours(),
        }
    }
}

fn default_injection_max_items() -> usize {
    20
}

fn default_injection_max_chars() -> usize {
    8_000
}

fn default_dedup_window_minutes() -> i64 {
    10
}

fn default_injection_lookback_hours() -> i64 {
    24
}

fn default_true() -> bool {
    true
}

/// Privacy stripping, tool/path/project exclusions, and whitelists.
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(deny_unknown_fields)]
pub struct PrivacyConfig {
    /// Tool names that never produce an observation (spec §4.5,
    /// "skips tools on a configurable exclusion set").
    #[serde(default = "default_skip_tools")]
    pub skip_tools: Vec<String>,

    /// Project names/paths excluded from observation entirely.
    #[serde(default)]
    pub excluded_projects: Vec<String>,

    /// Allowed observation `type` values. Empty means no restriction.
    #[serde(default)]
    pub observation_type_whitelist: Vec<String>,

    /// Allowed concept tags. Empty means no restriction.
    #[serde(default)]
    pub concept_whitelist: Vec<String>,
}

impl Default for PrivacyConfig {
    fn default() -> Self {
        Self {
            skip_tools: default_skip_tools(),
            excluded_projects: Vec::new(),
            observation_type_whitelist: Vec::new(),
            concept_whitelist: Vec::new(),
        }
    }
}

fn default_skip_tools() -> Vec<String> {
    vec!["TodoWrite".to_string(), "BashOutput".to_string()]
}
