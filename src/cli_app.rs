//! Top-level CLI definition and dispatch.

use std::io::{self, Write as _};
use std::path::PathBuf;
use std::process::ExitCode;
use std::sync::Arc;
use std::time::Duration;

use clap::{ArgAction, Args, CommandFactory, Parser, Subcommand};
use clap_complete::Shell;
use crossbeam_channel::RecvTimeoutError;
use serde::Serialize;
use tracing::info;

use crate::cli::render;
use crate::control::ControlAction;
use crate::core::command::{CommandRunner, SystemRunner};
use crate::core::config::{Config, default_config_path};
use crate::core::errors::{GwError, Result};
use crate::daemon::runtime::Runtime;
use crate::daemon::signals::ShutdownFlag;
use crate::monitor::jobs::JobRegistryReader;
use crate::monitor::reachability::ReachabilityPoller;
use crate::monitor::sessions::SessionAnalyzer;

/// Poll step while waiting on subscriptions or signals.
const WAIT_STEP: Duration = Duration::from_millis(200);

/// Live status of a local agent gateway: process vitals, session activity,
/// mesh reachability, and scheduled jobs.
#[derive(Debug, Parser)]
#[command(name = "gwmon", version, about)]
pub struct Cli {
    /// Monitor config file (default: ~/.config/gwmon/config.toml).
    #[arg(long, global = true, value_name = "PATH")]
    pub config: Option<PathBuf>,
    /// Increase log verbosity (-v info, -vv debug, -vvv trace).
    #[arg(short, long, global = true, action = ArgAction::Count)]
    pub verbose: u8,
    /// Print machine-readable JSON instead of text.
    #[arg(long, global = true)]
    pub json: bool,
    /// Emit logs as JSON lines on stderr.
    #[arg(long, global = true)]
    pub log_json: bool,
    #[command(subcommand)]
    pub command: Command,
}

/// Available subcommands.
#[derive(Debug, Subcommand)]
pub enum Command {
    /// Print one dashboard snapshot.
    Status(StatusArgs),
    /// Stream dashboard snapshots as they are broadcast.
    Watch(WatchArgs),
    /// Run the sampler and broadcast loops in the foreground until signalled.
    Daemon,
    /// Show session activity.
    Sessions,
    /// List scheduled jobs.
    Jobs,
    /// Probe mesh-network reachability.
    Reachability,
    /// Start, stop, or restart the gateway.
    Control {
        /// One of: start, stop, restart.
        action: String,
    },
    /// Show monitor configuration.
    #[command(subcommand)]
    Config(ConfigCommand),
    /// Generate shell completions.
    Completions {
        shell: Shell,
    },
}

#[derive(Debug, Args)]
pub struct StatusArgs {
    /// Wait this long for CPU sampling to settle (default: two sampler ticks).
    #[arg(long, value_name = "MS")]
    pub settle_ms: Option<u64>,
}

#[derive(Debug, Args)]
pub struct WatchArgs {
    /// Stop after this many snapshots.
    #[arg(long, short = 'n')]
    pub count: Option<usize>,
}

#[derive(Debug, Subcommand)]
pub enum ConfigCommand {
    /// Print the effective configuration (file, defaults, and env overrides).
    Show,
    /// Print the default config file location.
    Path,
}

/// Dispatch a parsed command line.
///
/// # Errors
/// Configuration, startup, and output failures. Sub-source failures are not
/// errors; they show up as defaults in the output.
pub fn run(cli: &Cli) -> Result<ExitCode> {
    match &cli.command {
        Command::Completions { shell } => {
            clap_complete::generate(*shell, &mut Cli::command(), "gwmon", &mut io::stdout());
            Ok(ExitCode::SUCCESS)
        }
        Command::Config(ConfigCommand::Path) => {
            let path = cli.config.clone().or_else(default_config_path);
            match path {
                Some(path) => emit_line(&path.display().to_string())?,
                None => emit_line("-")?,
            }
            Ok(ExitCode::SUCCESS)
        }
        command => {
            let config = Config::load(cli.config.as_deref())?;
            run_with_config(cli, command, config)
        }
    }
}

fn run_with_config(cli: &Cli, command: &Command, config: Config) -> Result<ExitCode> {
    match command {
        Command::Status(args) => cmd_status(cli, args, config),
        Command::Watch(args) => cmd_watch(cli, args, config),
        Command::Daemon => cmd_daemon(config),
        Command::Sessions => {
            let summary = SessionAnalyzer::from_config(&config).scan();
            emit(cli, &summary, || render::format_sessions(&summary))
        }
        Command::Jobs => {
            let listing = JobRegistryReader::new(config.paths.jobs_file()).read();
            emit(cli, &listing, || render::format_jobs(&listing))
        }
        Command::Reachability => {
            let runner: Arc<dyn CommandRunner> = Arc::new(SystemRunner);
            let info = ReachabilityPoller::new(runner, &config.reachability).poll();
            emit(cli, &info, || render::format_reachability(&info))
        }
        Command::Control { action } => cmd_control(cli, action, config),
        Command::Config(ConfigCommand::Show) => {
            if cli.json {
                emit_json(&config)?;
            } else {
                let text = toml::to_string_pretty(&config).map_err(|e| GwError::Serialization {
                    context: "toml",
                    details: e.to_string(),
                })?;
                emit_text(&text)?;
            }
            Ok(ExitCode::SUCCESS)
        }
        Command::Completions { .. } | Command::Config(ConfigCommand::Path) => Ok(ExitCode::SUCCESS),
    }
}

// ──────────────────── commands ────────────────────

fn cmd_status(cli: &Cli, args: &StatusArgs, config: Config) -> Result<ExitCode> {
    let settle = args.settle_ms.map_or_else(
        || config.sampler.interval() * 2 + Duration::from_millis(500),
        Duration::from_millis,
    );
    let runtime = Runtime::start(config)?;
    if !runtime.wait_for_samples(2, settle) {
        info!(?settle, "sampler did not settle; reporting latest sample");
    }
    let snapshot = runtime.aggregator().snapshot();
    runtime.shutdown();
    emit(cli, &*snapshot, || render::format_dashboard(&snapshot))
}

fn cmd_watch(cli: &Cli, args: &WatchArgs, config: Config) -> Result<ExitCode> {
    let shutdown = ShutdownFlag::on_termination()?;
    let runtime = Runtime::start(config)?;
    let subscription = runtime.subscribe();
    let mut seen = 0_usize;

    while !shutdown.is_raised() {
        match subscription.receiver().recv_timeout(WAIT_STEP) {
            Ok(snapshot) => {
                if cli.json {
                    emit_json_line(&*snapshot)?;
                } else {
                    emit_text(&render::format_dashboard(&snapshot))?;
                }
                seen += 1;
                if args.count.is_some_and(|limit| seen >= limit) {
                    break;
                }
            }
            Err(RecvTimeoutError::Timeout) => {}
            Err(RecvTimeoutError::Disconnected) => break,
        }
    }
    runtime.unsubscribe(&subscription);
    runtime.shutdown();
    Ok(ExitCode::SUCCESS)
}

fn cmd_daemon(config: Config) -> Result<ExitCode> {
    let shutdown = ShutdownFlag::on_termination()?;
    let runtime = Runtime::start(config)?;
    let subscription = runtime.subscribe();

    while !shutdown.is_raised() {
        match subscription.receiver().recv_timeout(WAIT_STEP) {
            Ok(snapshot) => info!(
                gateway = snapshot.gateway.status,
                cpu = snapshot.process.cpu_percent,
                memory_mb = snapshot.process.memory_mb,
                sessions = snapshot.sessions.session_count,
                activity = %snapshot.sessions.status,
                online = snapshot.reachability.online,
                jobs = snapshot.cron_jobs.count,
                "status"
            ),
            Err(RecvTimeoutError::Timeout) => {}
            Err(RecvTimeoutError::Disconnected) => break,
        }
    }
    info!("shutdown requested");
    runtime.unsubscribe(&subscription);
    runtime.shutdown();
    Ok(ExitCode::SUCCESS)
}

fn cmd_control(cli: &Cli, raw_action: &str, config: Config) -> Result<ExitCode> {
    let runtime = Runtime::start(config)?;
    let outcome = runtime.apply_control(raw_action);
    runtime.shutdown();
    let label = raw_action
        .parse::<ControlAction>()
        .map_or_else(|_| raw_action.to_string(), |a| a.to_string());

    emit(cli, &outcome, || render::format_control(&label, &outcome))?;
    Ok(if outcome.success {
        ExitCode::SUCCESS
    } else {
        ExitCode::FAILURE
    })
}

// ──────────────────── output ────────────────────

fn emit<T: Serialize + ?Sized>(cli: &Cli, value: &T, text: impl FnOnce() -> String) -> Result<ExitCode> {
    if cli.json {
        emit_json(value)?;
    } else {
        emit_text(&text())?;
    }
    Ok(ExitCode::SUCCESS)
}

fn emit_json<T: Serialize + ?Sized>(value: &T) -> Result<()> {
    let text = serde_json::to_string_pretty(value)?;
    emit_line(&text)
}

fn emit_json_line<T: Serialize + ?Sized>(value: &T) -> Result<()> {
    let text = serde_json::to_string(value)?;
    emit_line(&text)
}

fn emit_line(text: &str) -> Result<()> {
    let mut stdout = io::stdout().lock();
    writeln!(stdout, "{text}")
        .and_then(|()| stdout.flush())
        .map_err(|e| GwError::io("<stdout>", e))
}

fn emit_text(text: &str) -> Result<()> {
    let mut stdout = io::stdout().lock();
    stdout
        .write_all(text.as_bytes())
        .and_then(|()| stdout.flush())
        .map_err(|e| GwError::io("<stdout>", e))
}
