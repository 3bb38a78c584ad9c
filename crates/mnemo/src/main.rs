// SPDX-FileCopyrightText: 2026 Mnemo Contributors
// SPDX-License-Identifier: MIT OR Apache-2.0

//! Mnemo -- a persistent memory service for AI coding agents.
//!
//! This is the binary entry point: a thin CLI (spec §6 "CLI surface")
//! around [`serve::run_daemon`], the actual worker.

#[cfg(not(target_env = "msvc"))]
use tikv_jemallocator::Jemalloc;

#[cfg(not(target_env = "msvc"))]
#[global_allocator]
static GLOBAL: Jemalloc = Jemalloc;

mod serve;
mod status;

use std::path::PathBuf;
use std::time::Duration;

use clap::{Parser, Subcommand};
use mnemo_config::model::Settings;
use serde::Serialize;

/// Mnemo -- a persistent memory service for AI coding agents.
#[derive(Parser, Debug)]
#[command(name = "mnemo", version, about, long_about = None)]
struct Cli {
    /// Run as the in-process daemon. Used internally by `start`; not
    /// meant to be passed directly by an interactive caller.
    #[arg(long, hide = true)]
    daemon: bool,

    #[command(subcommand)]
    command: Option<Commands>,
}

/// Available subcommands (spec §6 "CLI surface").
#[derive(Subcommand, Debug)]
enum Commands {
    /// Spawn the daemon if the configured port is free. Idempotent.
    Start,
    /// Trigger graceful shutdown of a running daemon.
    Stop,
    /// Stop, then start.
    Restart,
    /// Report whether the daemon is running and its health summary.
    Status,
    /// Inspect or validate the resolved configuration.
    Config {
        #[command(subcommand)]
        action: Option<ConfigCommands>,
    },
}

/// Config inspection subcommands.
#[derive(Subcommand, Debug)]
enum ConfigCommands {
    /// Print the resolved value for a dotted config key path.
    Get { key: String },
    /// Validate the configuration and report any errors.
    Validate,
}

/// Upstream callers treat a `start`/`stop`/`restart` invocation as a
/// non-blocking integration step: the JSON line on stdout carries the real
/// result, and the process always exits 0 (spec §6 "CLI surface", §7
/// "Fatal startup").
#[derive(Debug, Serialize)]
struct StartStatus {
    #[serde(rename = "continue")]
    continue_: bool,
    #[serde(rename = "suppressOutput")]
    suppress_output: bool,
    status: &'static str,
    #[serde(skip_serializing_if = "Option::is_none")]
    message: Option<String>,
}

impl StartStatus {
    fn ready() -> Self {
        Self { continue_: true, suppress_output: true, status: "ready", message: None }
    }

    fn error(message: impl Into<String>) -> Self {
        Self { continue_: true, suppress_output: true, status: "error", message: Some(message.into()) }
    }

    fn print(&self) {
        println!("{}", serde_json::to_string(self).unwrap_or_else(|_| "{}".to_string()));
    }
}

const HEALTH_POLL_INTERVAL: Duration = Duration::from_millis(150);
const HEALTH_POLL_TIMEOUT: Duration = Duration::from_secs(10);

#[tokio::main]
async fn main() {
    let cli = Cli::parse();

    if cli.daemon {
        run_as_daemon().await;
        std::process::exit(0);
    }

    match cli.command {
        Some(Commands::Start) | None => cmd_start().await,
        Some(Commands::Stop) => cmd_stop().await,
        Some(Commands::Restart) => {
            cmd_stop().await;
            cmd_start().await;
        }
        Some(Commands::Status) => status::run_status().await,
        Some(Commands::Config { action }) => cmd_config(action).await,
    }

    std::process::exit(0);
}

/// The `--daemon` branch: load settings, run the worker until shutdown.
/// Fatal startup errors are logged but never change the process exit code
/// (spec §7 "Fatal startup": "exit code 0 so integrations do not block").
async fn run_as_daemon() {
    let settings = match load_settings_or_print_error() {
        Some(s) => s,
        None => return,
    };
    if let Err(e) = serve::run_daemon(settings).await {
        eprintln!("mnemo: daemon exited with a fatal startup error: {e}");
    }
}

fn load_settings_or_print_error() -> Option<Settings> {
    match mnemo_config::load_and_validate() {
        Ok(settings) => Some(settings),
        Err(errors) => {
            mnemo_config::render_errors(&errors);
            None
        }
    }
}

/// `mnemo start` -- spawns the daemon as a detached child if nothing is
/// already listening healthily on the configured port, then polls
/// `/api/health` until it responds or [`HEALTH_POLL_TIMEOUT`] elapses.
/// Always emits exactly one JSON line and always returns (the caller
/// exits 0 regardless of `status`).
async fn cmd_start() {
    let settings = match load_settings_or_print_error() {
        Some(s) => s,
        None => {
            StartStatus::error("invalid configuration; see stderr for details").print();
            return;
        }
    };
    let data_dir = PathBuf::from(&settings.worker.data_dir);
    let health_url = health_url(&settings);

    if health_check(&health_url).await {
        StartStatus::ready().print();
        return;
    }

    if let Some(pid_file) = serve::PidFile::read(&data_dir) {
        tracing_free_warn(&format!(
            "stale pid file for pid {} found with no healthy listener; removing and restarting",
            pid_file.pid
        ));
        let _ = std::fs::remove_file(serve::PidFile::path(&data_dir));
    }

    let exe = match std::env::current_exe() {
        Ok(path) => path,
        Err(e) => {
            StartStatus::error(format!("could not resolve current executable: {e}")).print();
            return;
        }
    };

    let spawn_result = std::process::Command::new(exe)
        .arg("--daemon")
        .stdin(std::process::Stdio::null())
        .stdout(std::process::Stdio::null())
        .stderr(std::process::Stdio::null())
        .spawn();

    let mut child = match spawn_result {
        Ok(child) => child,
        Err(e) => {
            StartStatus::error(format!("failed to spawn daemon process: {e}")).print();
            return;
        }
    };
    let deadline = tokio::time::Instant::now() + HEALTH_POLL_TIMEOUT;
    loop {
        if health_check(&health_url).await {
            StartStatus::ready().print();
            return;
        }
        if let Ok(Some(status)) = child.try_wait() {
            StartStatus::error(format!("daemon process exited immediately with {status}")).print();
            return;
        }
        if tokio::time::Instant::now() >= deadline {
            StartStatus::error("daemon did not become healthy within the startup timeout").print();
            return;
        }
        tokio::time::sleep(HEALTH_POLL_INTERVAL).await;
    }
}

/// `mnemo stop` -- triggers the same graceful shutdown sequence a SIGTERM
/// would, via `POST /api/admin/shutdown`, then waits for the pid file to
/// disappear (spec §4.7 step 8).
async fn cmd_stop() {
    let settings = match load_settings_or_print_error() {
        Some(s) => s,
        None => return,
    };
    let data_dir = PathBuf::from(&settings.worker.data_dir);

    if serve::PidFile::read(&data_dir).is_none() {
        println!("mnemo: not running");
        return;
    }

    let shutdown_url = format!(
        "http://{}:{}/api/admin/shutdown",
        settings.worker.host, settings.worker.port
    );
    let client = match reqwest::Client::builder().timeout(Duration::from_secs(3)).build() {
        Ok(c) => c,
        Err(e) => {
            eprintln!("mnemo: failed to build HTTP client: {e}");
            return;
        }
    };

    if client.post(&shutdown_url).send().await.is_err() {
        println!("mnemo: not reachable; nothing to stop");
        return;
    }

    let deadline = tokio::time::Instant::now() + Duration::from_secs(10);
    while serve::PidFile::read(&data_dir).is_some() {
        if tokio::time::Instant::now() >= deadline {
            eprintln!("mnemo: daemon did not shut down within 10s");
            return;
        }
        tokio::time::sleep(HEALTH_POLL_INTERVAL).await;
    }
    println!("mnemo: stopped");
}

async fn cmd_config(action: Option<ConfigCommands>) {
    match action {
        Some(ConfigCommands::Get { key }) => match load_settings_or_print_error() {
            Some(settings) => print_config_key(&settings, &key),
            None => {}
        },
        Some(ConfigCommands::Validate) => match mnemo_config::load_and_validate() {
            Ok(_) => println!("configuration is valid"),
            Err(errors) => mnemo_config::render_errors(&errors),
        },
        None => println!("mnemo config: use --help for available config commands"),
    }
}

/// Resolves a dotted config key path (e.g. `worker.port`) against the
/// loaded settings via generic JSON traversal.
fn print_config_key(settings: &Settings, key: &str) {
    let value = match serde_json::to_value(settings) {
        Ok(v) => v,
        Err(e) => {
            eprintln!("mnemo: failed to serialize configuration: {e}");
            return;
        }
    };
    let mut current = &value;
    for part in key.split('.') {
        match current.get(part) {
            Some(v) => current = v,
            None => {
                eprintln!("mnemo: unknown config key: {key}");
                return;
            }
        }
    }
    match current {
        serde_json::Value::String(s) => println!("{s}"),
        other => println!("{other}"),
    }
}

fn health_url(settings: &Settings) -> String {
    format!("http://{}:{}/api/health", settings.worker.host, settings.worker.port)
}

async fn health_check(url: &str) -> bool {
    let Ok(client) = reqwest::Client::builder().timeout(Duration::from_secs(2)).build() else {
        return false;
    };
    client.get(url).send().await.map(|r| r.status().is_success()).unwrap_or(false)
}

/// `start` runs before tracing is initialized (that happens inside the
/// daemon process), so diagnostics from this short-lived process go
/// straight to stderr.
fn tracing_free_warn(message: &str) {
    eprintln!("mnemo: {message}");
}
