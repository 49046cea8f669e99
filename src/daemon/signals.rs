//! SIGINT/SIGTERM handling for the long-running commands.

use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::thread;
use std::time::{Duration, Instant};

use signal_hook::consts::{SIGINT, SIGTERM};

use crate::core::errors::{GwError, Result};

/// Shutdown request flag, raised by a termination signal or by hand.
#[derive(Debug, Clone, Default)]
pub struct ShutdownFlag {
    raised: Arc<AtomicBool>,
}

impl ShutdownFlag {
    /// Flag that is only raised through [`ShutdownFlag::raise`].
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Flag raised on SIGINT or SIGTERM.
    ///
    /// # Errors
    /// `Runtime` if a handler cannot be installed.
    pub fn on_termination() -> Result<Self> {
        let flag = Self::new();
        for signal in [SIGINT, SIGTERM] {
            signal_hook::flag::register(signal, Arc::clone(&flag.raised)).map_err(|e| {
                GwError::Runtime {
                    details: format!("failed to register handler for signal {signal}: {e}"),
                }
            })?;
        }
        Ok(flag)
    }

    pub fn raise(&self) {
        self.raised.store(true, Ordering::SeqCst);
    }

    #[must_use]
    pub fn is_raised(&self) -> bool {
        self.raised.load(Ordering::SeqCst)
    }

    /// Sleep in `poll` steps until raised or `timeout` elapses. Returns whether
    /// the flag was raised.
    pub fn wait(&self, poll: Duration, timeout: Option<Duration>) -> bool {
        let deadline = timeout.map(|t| Instant::now() + t);
        loop {
            if self.is_raised() {
                return true;
            }
            if deadline.is_some_and(|d| Instant::now() >= d) {
                return false;
            }
            thread::sleep(poll);
        }
    }
}
