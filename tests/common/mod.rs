//! Shared harness for CLI integration tests: runs the `gwmon` binary and keeps
//! a per-case log of the invocation and its output.

#![allow(dead_code)]

use std::fmt::Write as _;
use std::path::PathBuf;
use std::process::{Command, ExitStatus};

pub struct CliResult {
    pub status: ExitStatus,
    pub stdout: String,
    pub stderr: String,
    pub log_path: PathBuf,
}

pub fn run_cli_case(case_name: &str, args: &[&str]) -> CliResult {
    run_cli_case_with_env(case_name, args, &[])
}

pub fn run_cli_case_with_env(case_name: &str, args: &[&str], env: &[(&str, &str)]) -> CliResult {
    let mut command = Command::new(env!("CARGO_BIN_EXE_gwmon"));
    command
        .args(args)
        .env_remove("GWMON_LOG")
        .env_remove("GWMON_AGENT_HOME")
        .env_remove("GWMON_SESSIONS_DIR")
        .env_remove("GWMON_JOBS_FILE")
        .env_remove("GWMON_MESH_BIN")
        .env("NO_COLOR", "1");
    for (key, value) in env {
        command.env(key, value);
    }
    let output = command.output().expect("failed to run gwmon binary");

    let stdout = String::from_utf8_lossy(&output.stdout).into_owned();
    let stderr = String::from_utf8_lossy(&output.stderr).into_owned();

    let log_dir = std::env::temp_dir().join("gwmon-cli-cases");
    std::fs::create_dir_all(&log_dir).expect("create log dir");
    let log_path = log_dir.join(format!("{case_name}.log"));
    let mut log = String::new();
    let _ = writeln!(log, "case: {case_name}");
    let _ = writeln!(log, "args: {args:?}");
    let _ = writeln!(log, "env: {env:?}");
    let _ = writeln!(log, "status: {}", output.status);
    let _ = writeln!(log, "--- stdout ---\n{stdout}");
    let _ = writeln!(log, "--- stderr ---\n{stderr}");
    std::fs::write(&log_path, log).expect("write case log");

    CliResult {
        status: output.status,
        stdout,
        stderr,
        log_path,
    }
}
