//! Terminal rendering for the human-readable CLI output.

#![allow(missing_docs)]

use std::fmt::Write as _;

use colored::{ColoredString, Colorize};

use crate::control::ControlOutcome;
use crate::daemon::aggregator::{DashboardSnapshot, GatewayState};
use crate::monitor::gateway_config::ConfigSummary;
use crate::monitor::host::HostSnapshot;
use crate::monitor::jobs::JobListing;
use crate::monitor::process::ProcessSnapshot;
use crate::monitor::reachability::ReachabilityInfo;
use crate::monitor::sessions::{ConversationStatus, SessionActivitySummary};

const GAUGE_WIDTH: usize = 20;
const LABEL_WIDTH: usize = 14;

/// Horizontal gauge with a percentage label.
#[must_use]
#[allow(clippy::cast_possible_truncation, clippy::cast_sign_loss, clippy::cast_precision_loss)]
pub fn gauge(used_pct: f64, width: usize) -> String {
    let clamped_pct = if used_pct.is_finite() {
        used_pct.clamp(0.0, 100.0)
    } else {
        0.0
    };
    let filled = ((clamped_pct / 100.0) * width as f64).round() as usize;
    let filled = filled.min(width);
    let empty = width.saturating_sub(filled);

    format!(
        "[{}{}] {:>5.1}%",
        "█".repeat(filled),
        "░".repeat(empty),
        clamped_pct,
    )
}

/// `3d 04h 05m`, `4h 05m`, or `5m 06s`.
#[must_use]
pub fn format_uptime(seconds: u64) -> String {
    let days = seconds / 86_400;
    let hours = (seconds % 86_400) / 3_600;
    let minutes = (seconds % 3_600) / 60;
    let secs = seconds % 60;
    if days > 0 {
        format!("{days}d {hours:02}h {minutes:02}m")
    } else if hours > 0 {
        format!("{hours}h {minutes:02}m")
    } else {
        format!("{minutes}m {secs:02}s")
    }
}

fn status_word(status: ConversationStatus) -> ColoredString {
    match status {
        ConversationStatus::Thinking => status.as_str().yellow().bold(),
        ConversationStatus::Processing => status.as_str().magenta().bold(),
        ConversationStatus::Active => status.as_str().green().bold(),
        ConversationStatus::Idle => status.as_str().dimmed(),
    }
}

fn running_word(state: GatewayState) -> ColoredString {
    if state.running {
        state.status.green().bold()
    } else {
        state.status.red().bold()
    }
}

fn row(out: &mut String, label: &str, value: impl std::fmt::Display) {
    let _ = writeln!(out, "  {label:<LABEL_WIDTH$}{value}");
}

fn heading(out: &mut String, title: &str) {
    let _ = writeln!(out, "{}", title.bold());
}

fn or_dash(value: Option<&str>) -> &str {
    value.unwrap_or("-")
}

// ──────────────────── sections ────────────────────

#[must_use]
pub fn format_process(process: &ProcessSnapshot) -> String {
    let mut out = String::new();
    heading(&mut out, "Process");
    match process.pid {
        Some(pid) if process.running => {
            row(&mut out, "pid", pid);
            row(&mut out, "cpu", gauge(f64::from(process.cpu_percent), GAUGE_WIDTH));
            row(
                &mut out,
                "memory",
                format!(
                    "{} {:.2} MB",
                    gauge(process.memory_percent, GAUGE_WIDTH),
                    process.memory_mb
                ),
            );
            row(&mut out, "uptime", format_uptime(process.uptime_seconds));
        }
        _ => row(&mut out, "state", "not running".red()),
    }
    out
}

#[must_use]
pub fn format_system(system: &HostSnapshot) -> String {
    let mut out = String::new();
    heading(&mut out, "System");
    row(&mut out, "cpu", gauge(f64::from(system.cpu_percent), GAUGE_WIDTH));
    row(
        &mut out,
        "memory",
        format!(
            "{} {:.0}/{:.0} MB",
            gauge(system.memory_percent, GAUGE_WIDTH),
            system.memory_used_mb,
            system.memory_total_mb
        ),
    );
    row(&mut out, "disk /", gauge(system.disk_percent, GAUGE_WIDTH));
    out
}

pub fn format_sessions(sessions: &SessionActivitySummary) -> String {
    let mut out = String::new();
    heading(&mut out, "Sessions");
    row(&mut out, "status", status_word(sessions.status));
    row(&mut out, "sessions", sessions.session_count);
    row(&mut out, "messages", sessions.total_messages);
    row(
        &mut out,
        "active",
        format!(
            "{} ({} thinking)",
            sessions.active_sessions, sessions.thinking_sessions
        ),
    );
    row(
        &mut out,
        "latest",
        sessions
            .latest_timestamp
            .map_or_else(|| "-".to_string(), |t| t.to_rfc3339()),
    );
    for detail in &sessions.details {
        let role = detail.last_role.map_or("-", |r| r.as_str());
        let latest = detail
            .last_timestamp
            .map_or_else(|| "-".to_string(), |t| t.format("%Y-%m-%d %H:%M:%S").to_string());
        let _ = writeln!(
            out,
            "    {:<28} {:>6} msgs  {:<9} {latest}",
            detail.id, detail.message_count, role
        );
    }
    out
}

#[must_use]
pub fn format_reachability(info: &ReachabilityInfo) -> String {
    let mut out = String::new();
    heading(&mut out, "Reachability");
    let online = if info.online {
        "online".green().bold()
    } else {
        "offline".red().bold()
    };
    row(&mut out, "mesh", format!("{online} ({})", info.backend_state));
    row(&mut out, "ip", or_dash(info.self_address.as_deref()));
    row(&mut out, "hostname", or_dash(info.hostname.as_deref()));
    row(&mut out, "url", or_dash(info.public_url.as_deref()));
    row(&mut out, "peers", info.peer_count);
    out
}

#[must_use]
pub fn format_jobs(listing: &JobListing) -> String {
    let mut out = String::new();
    heading(&mut out, "Jobs");
    row(
        &mut out,
        "count",
        format!("{} ({} enabled)", listing.count, listing.enabled_count()),
    );
    for job in &listing.jobs {
        let marker = if job.enabled { "on ".green() } else { "off".dimmed() };
        let next = job
            .next_run_at
            .map_or_else(|| "-".to_string(), |t| t.format("%Y-%m-%d %H:%M").to_string());
        let _ = writeln!(
            out,
            "    {marker} {:<20} {:<14} next {next}  {}",
            job.id,
            or_dash(job.schedule_expr.as_deref()),
            job.short_description
        );
        if let Some(err) = &job.last_error {
            let _ = writeln!(out, "        last error: {}", err.red());
        }
    }
    out
}

#[must_use]
pub fn format_config(config: &ConfigSummary) -> String {
    let mut out = String::new();
    heading(&mut out, "Gateway config");
    row(&mut out, "model", &config.model);
    let enabled = config.enabled_channels();
    row(
        &mut out,
        "channels",
        if enabled.is_empty() {
            "-".to_string()
        } else {
            enabled.join(", ")
        },
    );
    if let Some(port) = config.gateway.get("port") {
        row(&mut out, "port", port);
    }
    out
}

/// Full dashboard, one section per source.
#[must_use]
pub fn format_dashboard(snapshot: &DashboardSnapshot) -> String {
    let mut out = String::new();
    let _ = writeln!(
        out,
        "{} {}  gateway {}  at {}",
        "gwmon".bold(),
        snapshot.app_info.version,
        running_word(snapshot.gateway),
        snapshot.timestamp.format("%Y-%m-%d %H:%M:%S UTC"),
    );
    let _ = writeln!(out);
    for section in [
        format_process(&snapshot.process),
        format_system(&snapshot.system),
        format_sessions(&snapshot.sessions),
        format_reachability(&snapshot.reachability),
        format_jobs(&snapshot.cron_jobs),
        format_config(&snapshot.config),
    ] {
        out.push_str(&section);
        out.push('\n');
    }
    out
}

/// One-line outcome of a control action.
#[must_use]
pub fn format_control(action: &str, outcome: &ControlOutcome) -> String {
    let icon = if outcome.success { "[ OK ]" } else { "[FAIL]" };
    format!("  {icon} {action}: {}\n", outcome.message)
}
