//! Structured diagnostics on stderr via `tracing`.
//!
//! Human output and `--json` documents go to stdout; everything logged here
//! goes to stderr so the two never interleave in a pipe.

use tracing_subscriber::EnvFilter;

use crate::core::errors::{GwError, Result};

/// Environment variable holding an `EnvFilter` directive that overrides `-v`.
pub const LOG_ENV: &str = "GWMON_LOG";

/// Default directive for a `-v` count.
#[must_use]
pub const fn verbosity_directive(verbosity: u8) -> &'static str {
    match verbosity {
        0 => "warn",
        1 => "info",
        2 => "debug",
        _ => "trace",
    }
}

/// Resolve the filter: a non-empty `env_value` wins over the verbosity.
///
/// # Errors
/// `InvalidConfig` when the directive does not parse.
pub fn build_filter(verbosity: u8, env_value: Option<&str>) -> Result<EnvFilter> {
    let directive = env_value
        .map(str::trim)
        .filter(|v| !v.is_empty())
        .unwrap_or_else(|| verbosity_directive(verbosity));
    EnvFilter::try_new(directive).map_err(|e| GwError::InvalidConfig {
        details: format!("{LOG_ENV}={directive}: {e}"),
    })
}

/// Install the global subscriber. Call once, before starting the runtime.
///
/// # Errors
/// `InvalidConfig` for a bad filter, `Runtime` if a subscriber is already set.
pub fn init_logging(verbosity: u8, json: bool) -> Result<()> {
    let env_value = std::env::var(LOG_ENV).ok();
    let filter = build_filter(verbosity, env_value.as_deref())?;
    let builder = tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .with_target(false);
    let installed = if json {
        builder.json().try_init()
    } else {
        builder.try_init()
    };
    installed.map_err(|e| GwError::Runtime {
        details: format!("logging init failed: {e}"),
    })
}
