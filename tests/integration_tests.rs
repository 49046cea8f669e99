//! Integration tests for the `gwmon` CLI surface.

mod common;

use std::path::Path;

use serde_json::Value;

/// Agent home with one session, a wrapped job registry, and a gateway config,
/// plus a monitor config that keeps every external probe local and fast.
struct Fixture {
    dir: tempfile::TempDir,
}

impl Fixture {
    fn new() -> Self {
        let dir = tempfile::tempdir().expect("tempdir");
        let home = dir.path().join("agent");
        std::fs::create_dir_all(home.join("sessions")).expect("sessions dir");
        std::fs::create_dir_all(home.join("cron")).expect("cron dir");

        let now = chrono::Utc::now().timestamp();
        std::fs::write(
            home.join("sessions").join("telegram_42.jsonl"),
            format!(
                "{{\"role\":\"assistant\",\"timestamp\":{}}}\n{{\"role\":\"user\",\"timestamp\":{}}}\n",
                now - 120,
                now - 2
            ),
        )
        .expect("session log");
        std::fs::write(
            home.join("cron").join("jobs.json"),
            r#"{"version":1,"jobs":[{"id":"digest","schedule":{"everyMs":3600000},"payload":{"message":"Daily\ndigest"}}]}"#,
        )
        .expect("jobs");
        std::fs::write(
            home.join("config.json"),
            r#"{"gateway":{"port":18790},"channels":{"telegram":{"enabled":true}},"agents":{"defaults":{"model":"test-model"}}}"#,
        )
        .expect("gateway config");

        let config = format!(
            "[paths]\nagent_home = {home:?}\n\n\
             [gateway]\nprocess_tokens = [\"gwmon-fixture-no-such-process\"]\ntmux_session = \"gwmon-fixture-session\"\n\n\
             [sampler]\ninterval_ms = 50\n\n\
             [reachability]\nbinary = \"gwmon-no-such-mesh-cli\"\n",
            home = home.display().to_string()
        );
        std::fs::write(dir.path().join("gwmon.toml"), config).expect("monitor config");
        Self { dir }
    }

    fn config_path(&self) -> String {
        self.dir.path().join("gwmon.toml").display().to_string()
    }

    fn home(&self) -> &Path {
        self.dir.path()
    }
}

fn parse_json(stdout: &str, log_path: &Path) -> Value {
    serde_json::from_str(stdout)
        .unwrap_or_else(|e| panic!("stdout is not JSON ({e}); log: {}", log_path.display()))
}

#[test]
fn help_command_prints_usage() {
    let result = common::run_cli_case("help_command_prints_usage", &["--help"]);
    assert!(
        result.status.success(),
        "expected success; log: {}",
        result.log_path.display()
    );
    assert!(
        result.stdout.contains("Usage: gwmon [OPTIONS] <COMMAND>"),
        "missing help banner; log: {}",
        result.log_path.display()
    );
}

#[test]
fn version_command_prints_version() {
    let result = common::run_cli_case("version_command_prints_version", &["--version"]);
    assert!(result.status.success(), "log: {}", result.log_path.display());
    assert!(
        result.stdout.contains(env!("CARGO_PKG_VERSION")),
        "missing version output; log: {}",
        result.log_path.display()
    );
}

#[test]
fn completions_command_generates_shell_script() {
    let result = common::run_cli_case(
        "completions_command_generates_shell_script",
        &["completions", "bash"],
    );
    assert!(result.status.success(), "log: {}", result.log_path.display());
    assert!(
        result.stdout.contains("gwmon"),
        "expected completion script contents; log: {}",
        result.log_path.display()
    );
}

#[test]
fn status_json_has_full_dashboard_shape() {
    let fixture = Fixture::new();
    let config = fixture.config_path();
    let result = common::run_cli_case(
        "status_json_has_full_dashboard_shape",
        &["--config", &config, "status", "--json", "--settle-ms", "400"],
    );
    assert!(result.status.success(), "log: {}", result.log_path.display());

    let value = parse_json(&result.stdout, &result.log_path);
    assert_eq!(value["status"], "ok");
    assert_eq!(value["process"]["running"], false);
    assert!(value["system"]["memory_total_mb"].as_f64().is_some_and(|mb| mb > 0.0));
    assert!(value["system"]["disk_percent"].is_number());
    assert_eq!(value["sessions"]["count"], 1);
    assert_eq!(value["sessions"]["messages"], 2);
    assert_eq!(value["sessions"]["status"], "thinking");
    assert_eq!(
        value["reachability"],
        serde_json::json!({
            "online": false, "ip": null, "hostname": null, "url": null,
            "peers": 0, "backend_state": "Unknown"
        })
    );
    assert_eq!(value["cron_jobs"]["count"], 1);
    assert_eq!(value["cron_jobs"]["jobs"][0]["expr"], "60m");
    assert_eq!(value["cron_jobs"]["jobs"][0]["command"], "Daily digest");
    assert_eq!(value["config"]["model"], "test-model");
    assert_eq!(value["config"]["channels"]["telegram"]["enabled"], true);
    assert_eq!(value["app_info"]["version"], env!("CARGO_PKG_VERSION"));
    assert!(value["gateway"]["status"].is_string());
}

#[test]
fn status_text_renders_sections() {
    let fixture = Fixture::new();
    let config = fixture.config_path();
    let result = common::run_cli_case(
        "status_text_renders_sections",
        &["--config", &config, "status", "--settle-ms", "200"],
    );
    assert!(result.status.success(), "log: {}", result.log_path.display());
    for section in ["Process", "System", "Sessions", "Reachability", "Jobs", "Gateway config"] {
        assert!(
            result.stdout.contains(section),
            "missing section {section}; log: {}",
            result.log_path.display()
        );
    }
    assert!(result.stdout.contains("not running"));
}

#[test]
fn sessions_and_jobs_commands_read_fixtures() {
    let fixture = Fixture::new();
    let config = fixture.config_path();

    let sessions = common::run_cli_case(
        "sessions_and_jobs_commands_read_fixtures_sessions",
        &["--config", &config, "sessions", "--json"],
    );
    assert!(sessions.status.success(), "log: {}", sessions.log_path.display());
    let value = parse_json(&sessions.stdout, &sessions.log_path);
    assert_eq!(value["active_sessions"], 1);
    assert_eq!(value["details"][0]["id"], "telegram_42");
    assert_eq!(value["details"][0]["role"], "user");

    let jobs = common::run_cli_case(
        "sessions_and_jobs_commands_read_fixtures_jobs",
        &["--config", &config, "jobs", "--json"],
    );
    assert!(jobs.status.success(), "log: {}", jobs.log_path.display());
    assert_eq!(parse_json(&jobs.stdout, &jobs.log_path)["jobs"][0]["id"], "digest");
}

#[test]
fn environment_overrides_paths() {
    let fixture = Fixture::new();
    let config = fixture.config_path();
    let empty = fixture.home().join("elsewhere");
    std::fs::create_dir_all(&empty).expect("dir");
    let empty = empty.display().to_string();

    let result = common::run_cli_case_with_env(
        "environment_overrides_paths",
        &["--config", &config, "sessions", "--json"],
        &[("GWMON_SESSIONS_DIR", &empty)],
    );
    assert!(result.status.success(), "log: {}", result.log_path.display());
    let value = parse_json(&result.stdout, &result.log_path);
    assert_eq!(
        value,
        serde_json::json!({
            "count": 0, "messages": 0, "active_sessions": 0, "thinking_sessions": 0,
            "latest": null, "status": "idle", "details": []
        })
    );
}

#[test]
fn reachability_command_degrades_without_mesh_cli() {
    let fixture = Fixture::new();
    let config = fixture.config_path();
    let result = common::run_cli_case(
        "reachability_command_degrades_without_mesh_cli",
        &["--config", &config, "reachability", "--json"],
    );
    assert!(result.status.success(), "log: {}", result.log_path.display());
    let value = parse_json(&result.stdout, &result.log_path);
    assert_eq!(value["online"], false);
    assert_eq!(value["backend_state"], "Unknown");
}

#[test]
fn unknown_control_action_is_rejected() {
    let fixture = Fixture::new();
    let config = fixture.config_path();
    let result = common::run_cli_case(
        "unknown_control_action_is_rejected",
        &["--config", &config, "control", "reboot"],
    );
    assert!(!result.status.success(), "log: {}", result.log_path.display());
    assert!(
        result.stdout.contains("[FAIL]") && result.stdout.contains("Invalid action"),
        "log: {}",
        result.log_path.display()
    );
}

#[test]
fn missing_explicit_config_is_an_error() {
    let result = common::run_cli_case(
        "missing_explicit_config_is_an_error",
        &["--config", "/nonexistent/gwmon.toml", "jobs"],
    );
    assert!(!result.status.success(), "log: {}", result.log_path.display());
    assert!(
        result.stderr.contains("GWM-1002"),
        "expected stable error code; log: {}",
        result.log_path.display()
    );
}

#[test]
fn config_show_reflects_file_values() {
    let fixture = Fixture::new();
    let config = fixture.config_path();
    let result = common::run_cli_case(
        "config_show_reflects_file_values",
        &["--config", &config, "config", "show", "--json"],
    );
    assert!(result.status.success(), "log: {}", result.log_path.display());
    let value = parse_json(&result.stdout, &result.log_path);
    assert_eq!(value["sampler"]["interval_ms"], 50);
    assert_eq!(value["reachability"]["binary"], "gwmon-no-such-mesh-cli");
    assert_eq!(value["cache"]["sessions_ttl_ms"], 3000);
}

#[test]
fn watch_stops_after_requested_count() {
    let fixture = Fixture::new();
    let config = fixture.config_path();
    let result = common::run_cli_case(
        "watch_stops_after_requested_count",
        &["--config", &config, "watch", "--json", "-n", "1"],
    );
    assert!(result.status.success(), "log: {}", result.log_path.display());
    let lines: Vec<&str> = result.stdout.lines().filter(|l| !l.trim().is_empty()).collect();
    assert_eq!(lines.len(), 1, "log: {}", result.log_path.display());
    assert_eq!(parse_json(lines[0], &result.log_path)["status"], "ok");
}
