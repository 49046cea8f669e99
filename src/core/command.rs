//! Command runner abstraction for external programs with hard deadlines.
//!
//! `CommandRunner` is the seam the reachability poller and the gateway
//! control adapter shell out through. `SystemRunner` spawns real processes
//! and kills them when they overrun; `ScriptedRunner` is the test double that
//! records invocations and replays canned results.

use std::collections::VecDeque;
use std::io::Read;
use std::process::{Command, ExitStatus, Stdio};
use std::thread;
use std::time::{Duration, Instant};

use crossbeam_channel::RecvTimeoutError;
use parking_lot::Mutex;
use tracing::debug;

use crate::core::errors::{GwError, Result};

/// Poll cadence while waiting for a child to exit.
const WAIT_POLL: Duration = Duration::from_millis(10);
/// Grace period for the stdout reader once the child has exited.
const DRAIN_GRACE: Duration = Duration::from_millis(250);

/// Captured result of a successful command.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct CommandOutput {
    /// Standard output, lossily decoded as UTF-8.
    pub stdout: String,
}

/// Executes an external program with arguments under a deadline.
///
/// Implementations return `Ok` only for a zero exit status. Spawn failure,
/// non-zero exit, and deadline overrun are all errors; callers that treat
/// external tools as best-effort collapse every error into a default.
pub trait CommandRunner: Send + Sync {
    /// Run `program args...`, killing it if it exceeds `timeout`.
    ///
    /// # Errors
    /// `CommandSpawn`, `CommandFailed`, or `CommandTimeout`.
    fn run(&self, program: &str, args: &[&str], timeout: Duration) -> Result<CommandOutput>;
}

/// Production runner backed by `std::process`.
#[derive(Debug, Default, Clone, Copy)]
pub struct SystemRunner;

impl CommandRunner for SystemRunner {
    fn run(&self, program: &str, args: &[&str], timeout: Duration) -> Result<CommandOutput> {
        let mut child = Command::new(program)
            .args(args)
            .stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::null())
            .spawn()
            .map_err(|e| GwError::CommandSpawn {
                program: program.to_string(),
                details: e.to_string(),
            })?;

        // Drain stdout off-thread so a chatty child cannot block on a full pipe.
        let (tx, rx) = crossbeam_channel::bounded::<Vec<u8>>(1);
        if let Some(mut stdout) = child.stdout.take() {
            thread::spawn(move || {
                let mut buf = Vec::new();
                let _ = stdout.read_to_end(&mut buf);
                let _ = tx.send(buf);
            });
        } else {
            drop(tx);
        }

        let deadline = Instant::now() + timeout;
        let status = loop {
            match child.try_wait() {
                Ok(Some(status)) => break status,
                Ok(None) if Instant::now() >= deadline => {
                    let _ = child.kill();
                    let _ = child.wait();
                    debug!(program, ?timeout, "command exceeded deadline, killed");
                    return Err(GwError::CommandTimeout {
                        program: program.to_string(),
                        timeout,
                    });
                }
                Ok(None) => thread::sleep(WAIT_POLL),
                Err(e) => {
                    let _ = child.kill();
                    return Err(GwError::CommandSpawn {
                        program: program.to_string(),
                        details: e.to_string(),
                    });
                }
            }
        };

        check_status(program, status)?;

        let stdout = match rx.recv_timeout(DRAIN_GRACE) {
            Ok(bytes) => String::from_utf8_lossy(&bytes).into_owned(),
            // A grandchild may still hold the pipe open; the exit status is
            // what matters, so report whatever was (not) collected.
            Err(RecvTimeoutError::Timeout | RecvTimeoutError::Disconnected) => String::new(),
        };
        Ok(CommandOutput { stdout })
    }
}

fn check_status(program: &str, status: ExitStatus) -> Result<()> {
    if status.success() {
        Ok(())
    } else {
        Err(GwError::CommandFailed {
            program: program.to_string(),
            status: status.to_string(),
        })
    }
}

// ──────────────────── test double ────────────────────

/// One canned response keyed by the joined command line.
#[derive(Debug, Clone)]
pub enum Scripted {
    /// Exit zero with this stdout.
    Stdout(String),
    /// Exit non-zero.
    Fail,
    /// Overrun the deadline.
    Timeout,
    /// Binary not found.
    Missing,
}

/// Test-double runner that records command lines and replays canned results.
///
/// Responses are matched by exact `"program arg1 arg2"` string and consumed
/// in order; unmatched commands behave as a missing binary.
#[derive(Debug, Default)]
pub struct ScriptedRunner {
    responses: Mutex<Vec<(String, VecDeque<Scripted>)>>,
    calls: Mutex<Vec<String>>,
}

impl ScriptedRunner {
    /// Runner with no scripted responses.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Queue a response for an exact command line.
    #[must_use]
    pub fn on(self, command_line: &str, response: Scripted) -> Self {
        {
            let mut responses = self.responses.lock();
            if let Some((_, queue)) = responses.iter_mut().find(|(line, _)| line == command_line) {
                queue.push_back(response);
            } else {
                responses.push((command_line.to_string(), VecDeque::from([response])));
            }
        }
        self
    }

    /// Command lines executed so far, in order.
    #[must_use]
    pub fn calls(&self) -> Vec<String> {
        self.calls.lock().clone()
    }
}

impl CommandRunner for ScriptedRunner {
    fn run(&self, program: &str, args: &[&str], timeout: Duration) -> Result<CommandOutput> {
        let line = std::iter::once(program)
            .chain(args.iter().copied())
            .collect::<Vec<_>>()
            .join(" ");
        self.calls.lock().push(line.clone());

        let next = {
            let mut responses = self.responses.lock();
            responses.iter_mut().find(|(l, _)| *l == line).and_then(|(_, queue)| {
                // The last queued response sticks once earlier ones are used up.
                if queue.len() > 1 { queue.pop_front() } else { queue.front().cloned() }
            })
        };

        match next {
            Some(Scripted::Stdout(stdout)) => Ok(CommandOutput { stdout }),
            Some(Scripted::Fail) => Err(GwError::CommandFailed {
                program: program.to_string(),
                status: "exit status: 1".to_string(),
            }),
            Some(Scripted::Timeout) => Err(GwError::CommandTimeout {
                program: program.to_string(),
                timeout,
            }),
            Some(Scripted::Missing) | None => Err(GwError::CommandSpawn {
                program: program.to_string(),
                details: "No such file or directory (os error 2)".to_string(),
            }),
        }
    }
}
