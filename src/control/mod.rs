//! Gateway lifecycle control through a tmux session.
//!
//! The gateway runs inside a named tmux session started by a shell script.
//! Liveness is `tmux has-session`; stop kills the session. Every external call
//! goes through the [`CommandRunner`] under one deadline, and a timed-out call
//! is reported as a failed outcome rather than an error.

#![allow(missing_docs)]

use std::fmt;
use std::path::{Path, PathBuf};
use std::str::FromStr;
use std::sync::Arc;
use std::thread;
use std::time::Duration;

use serde::Serialize;
use tracing::{info, warn};

use crate::core::command::CommandRunner;
use crate::core::config::{ControlConfig, GatewayConfig, expand_home};
use crate::core::errors::GwError;

const TMUX: &str = "tmux";
const SHELL: &str = "bash";

/// Result of a control action, as shown to the operator.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ControlOutcome {
    pub success: bool,
    pub message: String,
}

impl ControlOutcome {
    #[must_use]
    pub fn ok(message: impl Into<String>) -> Self {
        Self {
            success: true,
            message: message.into(),
        }
    }

    #[must_use]
    pub fn failed(message: impl Into<String>) -> Self {
        Self {
            success: false,
            message: message.into(),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ControlAction {
    Start,
    Stop,
    Restart,
}

impl ControlAction {
    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Start => "start",
            Self::Stop => "stop",
            Self::Restart => "restart",
        }
    }
}

impl fmt::Display for ControlAction {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Rejected action string.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct InvalidAction(pub String);

impl fmt::Display for InvalidAction {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "Invalid action: {}", self.0)
    }
}

impl std::error::Error for InvalidAction {}

impl FromStr for ControlAction {
    type Err = InvalidAction;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "start" => Ok(Self::Start),
            "stop" => Ok(Self::Stop),
            "restart" => Ok(Self::Restart),
            _ => Err(InvalidAction(s.to_string())),
        }
    }
}

/// Start/stop/restart/liveness of the gateway.
pub trait GatewayControl: Send + Sync {
    fn is_running(&self) -> bool;
    fn start(&self) -> ControlOutcome;
    fn stop(&self) -> ControlOutcome;
    fn restart(&self) -> ControlOutcome;

    /// Dispatch a parsed action.
    fn apply(&self, action: ControlAction) -> ControlOutcome {
        match action {
            ControlAction::Start => self.start(),
            ControlAction::Stop => self.stop(),
            ControlAction::Restart => self.restart(),
        }
    }
}

/// Parse and dispatch a raw action string; unknown strings fail without
/// touching the gateway.
pub fn apply_action(control: &dyn GatewayControl, raw: &str) -> ControlOutcome {
    match raw.parse::<ControlAction>() {
        Ok(action) => control.apply(action),
        Err(_) => ControlOutcome::failed("Invalid action"),
    }
}

// ──────────────────── tmux adapter ────────────────────

pub struct TmuxControl {
    runner: Arc<dyn CommandRunner>,
    session: String,
    start_script: PathBuf,
    timeout: Duration,
    restart_pause: Duration,
}

impl fmt::Debug for TmuxControl {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("TmuxControl")
            .field("session", &self.session)
            .field("start_script", &self.start_script)
            .field("timeout", &self.timeout)
            .finish_non_exhaustive()
    }
}

impl TmuxControl {
    #[must_use]
    pub fn new(runner: Arc<dyn CommandRunner>, gateway: &GatewayConfig, control: &ControlConfig) -> Self {
        Self {
            runner,
            session: gateway.tmux_session.clone(),
            start_script: expand_home(&gateway.start_script),
            timeout: Duration::from_millis(control.timeout_ms),
            restart_pause: Duration::from_millis(control.restart_pause_ms),
        }
    }

    #[must_use]
    pub fn start_script(&self) -> &Path {
        &self.start_script
    }

    fn tmux(&self, args: &[&str]) -> crate::core::errors::Result<()> {
        self.runner.run(TMUX, args, self.timeout).map(|_| ())
    }
}

fn describe(action: &str, err: &GwError) -> String {
    match err {
        GwError::CommandTimeout { .. } => format!("{action} timed out"),
        other => format!("{action} failed: {other}"),
    }
}

impl GatewayControl for TmuxControl {
    fn is_running(&self) -> bool {
        self.tmux(&["has-session", "-t", &self.session]).is_ok()
    }

    fn start(&self) -> ControlOutcome {
        if self.is_running() {
            return ControlOutcome::failed("Already running");
        }
        if !self.start_script.is_file() {
            warn!(script = %self.start_script.display(), "gateway start script missing");
            return ControlOutcome::failed("Startup script not found");
        }
        let script = self.start_script.to_string_lossy();
        match self.runner.run(SHELL, &[script.as_ref()], self.timeout) {
            Ok(_) => {
                info!(session = %self.session, "gateway started");
                ControlOutcome::ok("Started")
            }
            Err(err) => {
                warn!(code = err.code(), error = %err, "gateway start failed");
                ControlOutcome::failed(describe("Start", &err))
            }
        }
    }

    fn stop(&self) -> ControlOutcome {
        if !self.is_running() {
            return ControlOutcome::failed("Not running");
        }
        match self.tmux(&["kill-session", "-t", &self.session]) {
            Ok(()) => {
                info!(session = %self.session, "gateway stopped");
                ControlOutcome::ok("Stopped")
            }
            Err(err) => {
                warn!(code = err.code(), error = %err, "gateway stop failed");
                ControlOutcome::failed(describe("Stop", &err))
            }
        }
    }

    fn restart(&self) -> ControlOutcome {
        let stopped = self.stop();
        if !stopped.success && stopped.message != "Not running" {
            return stopped;
        }
        thread::sleep(self.restart_pause);
        let started = self.start();
        if started.success {
            ControlOutcome::ok("Restarted")
        } else {
            started
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::command::{Scripted, ScriptedRunner};

    fn control(runner: &Arc<ScriptedRunner>, script: &Path) -> TmuxControl {
        let gateway = GatewayConfig {
            start_script: script.to_path_buf(),
            ..GatewayConfig::default()
        };
        let control = ControlConfig {
            restart_pause_ms: 0,
            ..ControlConfig::default()
        };
        TmuxControl::new(Arc::clone(runner) as Arc<dyn CommandRunner>, &gateway, &control)
    }

    fn script_file() -> (tempfile::TempDir, PathBuf) {
        let dir = tempfile::tempdir().expect("tempdir");
        let path = dir.path().join("start.sh");
        std::fs::write(&path, "#!/bin/sh\n").expect("write");
        (dir, path)
    }

    const HAS: &str = "tmux has-session -t nanobot-gateway";
    const KILL: &str = "tmux kill-session -t nanobot-gateway";

    #[test]
    fn parses_actions_and_rejects_unknown() {
        assert_eq!("Start".parse::<ControlAction>(), Ok(ControlAction::Start));
        assert_eq!(" restart ".parse::<ControlAction>(), Ok(ControlAction::Restart));
        assert!("reboot".parse::<ControlAction>().is_err());

        let runner = Arc::new(ScriptedRunner::new());
        let (_dir, script) = script_file();
        let outcome = apply_action(&control(&runner, &script), "reboot");
        assert_eq!(outcome, ControlOutcome::failed("Invalid action"));
        assert!(runner.calls().is_empty());
    }

    #[test]
    fn start_runs_script_when_not_running() {
        let (_dir, script) = script_file();
        let line = format!("bash {}", script.display());
        let runner = Arc::new(
            ScriptedRunner::new()
                .on(HAS, Scripted::Fail)
                .on(&line, Scripted::Stdout(String::new())),
        );
        let outcome = control(&runner, &script).start();
        assert_eq!(outcome, ControlOutcome::ok("Started"));
        assert_eq!(runner.calls(), vec![HAS.to_string(), line]);
    }

    #[test]
    fn start_refuses_when_already_running() {
        let (_dir, script) = script_file();
        let runner = Arc::new(ScriptedRunner::new().on(HAS, Scripted::Stdout(String::new())));
        assert_eq!(control(&runner, &script).start().message, "Already running");
    }

    #[test]
    fn start_reports_missing_script() {
        let runner = Arc::new(ScriptedRunner::new().on(HAS, Scripted::Fail));
        let outcome = control(&runner, Path::new("/nonexistent/start-gw.sh")).start();
        assert_eq!(outcome, ControlOutcome::failed("Startup script not found"));
    }

    #[test]
    fn stop_kills_running_session_and_refuses_otherwise() {
        let (_dir, script) = script_file();
        let runner = Arc::new(
            ScriptedRunner::new()
                .on(HAS, Scripted::Stdout(String::new()))
                .on(KILL, Scripted::Stdout(String::new())),
        );
        assert_eq!(control(&runner, &script).stop(), ControlOutcome::ok("Stopped"));

        let idle = Arc::new(ScriptedRunner::new().on(HAS, Scripted::Fail));
        assert_eq!(control(&idle, &script).stop().message, "Not running");
    }

    #[test]
    fn timed_out_stop_is_a_failure() {
        let (_dir, script) = script_file();
        let runner = Arc::new(
            ScriptedRunner::new()
                .on(HAS, Scripted::Stdout(String::new()))
                .on(KILL, Scripted::Timeout),
        );
        let outcome = control(&runner, &script).stop();
        assert!(!outcome.success);
        assert_eq!(outcome.message, "Stop timed out");
    }

    #[test]
    fn restart_stops_then_starts() {
        let (_dir, script) = script_file();
        let line = format!("bash {}", script.display());
        let runner = Arc::new(
            ScriptedRunner::new()
                // running for stop, then gone for start
                .on(HAS, Scripted::Stdout(String::new()))
                .on(HAS, Scripted::Fail)
                .on(KILL, Scripted::Stdout(String::new()))
                .on(&line, Scripted::Stdout(String::new())),
        );
        let outcome = control(&runner, &script).restart();
        assert_eq!(outcome, ControlOutcome::ok("Restarted"));
        assert_eq!(runner.calls(), vec![HAS.to_string(), KILL.to_string(), HAS.to_string(), line]);
    }

    #[test]
    fn restart_of_stopped_gateway_just_starts() {
        let (_dir, script) = script_file();
        let line = format!("bash {}", script.display());
        let runner = Arc::new(
            ScriptedRunner::new()
                .on(HAS, Scripted::Fail)
                .on(&line, Scripted::Stdout(String::new())),
        );
        assert!(control(&runner, &script).restart().success);
    }
}
