// SPDX-FileCopyrightText: 2026 Mnemo Contributors
// SPDX-License-Identifier: MIT OR Apache-2.0

//! `mnemo status` -- queries `/api/health` and renders a human or JSON
//! summary. Falls back gracefully when the daemon is not running.

use std::io::IsTerminal;
use std::time::Duration;

use serde::Deserialize;

/// Mirrors `mnemo_gateway::handlers::HealthResponse` field for field --
/// this binary doesn't depend on `mnemo-gateway` just to parse its own
/// wire format back out.
#[derive(Debug, Deserialize)]
struct HealthResponse {
    version: String,
    initialized: bool,
    pid: u32,
    uptime_ms: u128,
    ai: AiHealth,
    failed_messages: u64,
}

#[derive(Debug, Deserialize)]
struct AiHealth {
    provider: String,
    auth_method: String,
    last_interaction: Option<LastInteraction>,
}

#[derive(Debug, Deserialize)]
struct LastInteraction {
    success: bool,
    error: Option<String>,
}

fn format_uptime(ms: u128) -> String {
    let secs = ms / 1000;
    let days = secs / 86400;
    let hours = (secs % 86400) / 3600;
    let minutes = (secs % 3600) / 60;

    if days > 0 {
        format!("{days}d {hours}h {minutes}m")
    } else if hours > 0 {
        format!("{hours}h {minutes}m")
    } else {
        format!("{minutes}m")
    }
}

/// Loads settings, queries the health endpoint, and prints a summary.
/// Always exits the process normally (callers of `main` exit 0 on every
/// path per spec §6).
pub async fn run_status() {
    let settings = match mnemo_config::load_and_validate() {
        Ok(s) => s,
        Err(errors) => {
            mnemo_config::render_errors(&errors);
            return;
        }
    };

    let url = format!("http://{}:{}/api/health", settings.worker.host, settings.worker.port);
    let client = match reqwest::Client::builder().timeout(Duration::from_secs(3)).build() {
        Ok(c) => c,
        Err(e) => {
            eprintln!("mnemo: failed to build HTTP client: {e}");
            return;
        }
    };

    match client.get(&url).send().await {
        Ok(resp) if resp.status().is_success() => match resp.json::<HealthResponse>().await {
            Ok(health) => print_running(&health),
            Err(e) => eprintln!("mnemo: failed to parse health response: {e}"),
        },
        _ => print_offline(&settings.worker.host, settings.worker.port),
    }
}

fn print_running(health: &HealthResponse) {
    let use_color = std::io::stdout().is_terminal();
    let uptime = format_uptime(health.uptime_ms);

    println!();
    println!("  mnemo status");
    println!("  {}", "-".repeat(35));
    if use_color {
        use colored::Colorize;
        println!("    State:    {} running (uptime: {})", "\u{2713}".green(), uptime);
    } else {
        println!("    State:    [OK] running (uptime: {uptime})");
    }
    println!("    Version:  {}", health.version);
    println!("    PID:      {}", health.pid);
    println!("    Provider: {} (auth: {})", health.ai.provider, health.ai.auth_method);
    println!("    Initialized: {}", health.initialized);
    println!("    Failed messages: {}", health.failed_messages);
    if let Some(last) = &health.ai.last_interaction {
        if !last.success {
            let reason = last.error.clone().unwrap_or_else(|| "unknown error".to_string());
            println!("    Last interaction: FAILED ({reason})");
        }
    }
    println!();
}

fn print_offline(host: &str, port: u16) {
    let use_color = std::io::stdout().is_terminal();

    println!();
    println!("  mnemo status");
    println!("  {}", "-".repeat(35));
    if use_color {
        use colored::Colorize;
        println!("    State:    {} {}", "\u{2717}".red(), "not running".red());
    } else {
        println!("    State:    [FAIL] not running");
    }
    println!("    Endpoint: http://{host}:{port}/api/health");
    println!();
    println!("  Start with: mnemo start");
    println!();
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn format_uptime_minutes() {
        assert_eq!(format_uptime(120_000), "2m");
    }

    #[test]
    fn format_uptime_hours() {
        assert_eq!(format_uptime(3_720_000), "1h 2m");
    }

    #[test]
    fn format_uptime_days() {
        assert_eq!(format_uptime(90_060_000), "1d 1h 1m");
    }

}
