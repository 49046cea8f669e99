//! GWM-prefixed error types with structured error codes.

#![allow(missing_docs)]

use std::path::{Path, PathBuf};
use std::time::Duration;

use thiserror::Error;

/// Shared `Result` alias for the project.
pub type Result<T> = std::result::Result<T, GwError>;

/// Top-level error type for the gateway monitor.
///
/// Sub-source failures (missing files, absent CLIs, vanished processes) are
/// degraded to defaults inside the monitors and never surface as `GwError`
/// from the aggregator. These variants cover startup, configuration, and the
/// thin adapters that do report failure (command runner, control surface).
#[derive(Debug, Error)]
pub enum GwError {
    #[error("[GWM-1001] invalid configuration: {details}")]
    InvalidConfig { details: String },

    #[error("[GWM-1002] missing configuration file: {path}")]
    MissingConfig { path: PathBuf },

    #[error("[GWM-1003] configuration parse failure in {context}: {details}")]
    ConfigParse {
        context: &'static str,
        details: String,
    },

    #[error("[GWM-2001] command `{program}` could not be started: {details}")]
    CommandSpawn { program: String, details: String },

    #[error("[GWM-2002] command `{program}` timed out after {timeout:?}")]
    CommandTimeout { program: String, timeout: Duration },

    #[error("[GWM-2003] command `{program}` exited unsuccessfully ({status})")]
    CommandFailed { program: String, status: String },

    #[error("[GWM-2004] process {pid} is no longer inspectable")]
    ProcessGone { pid: u32 },

    #[error("[GWM-2101] serialization failure in {context}: {details}")]
    Serialization {
        context: &'static str,
        details: String,
    },

    #[error("[GWM-3002] IO failure at {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("[GWM-3003] channel closed in component {component}")]
    ChannelClosed { component: &'static str },

    #[error("[GWM-3101] failed to spawn background thread {name}: {source}")]
    ThreadSpawn {
        name: &'static str,
        #[source]
        source: std::io::Error,
    },

    #[error("[GWM-3900] runtime failure: {details}")]
    Runtime { details: String },
}

impl GwError {
    /// Stable machine-parseable error code.
    #[must_use]
    pub const fn code(&self) -> &'static str {
        match self {
            Self::InvalidConfig { .. } => "GWM-1001",
            Self::MissingConfig { .. } => "GWM-1002",
            Self::ConfigParse { .. } => "GWM-1003",
            Self::CommandSpawn { .. } => "GWM-2001",
            Self::CommandTimeout { .. } => "GWM-2002",
            Self::CommandFailed { .. } => "GWM-2003",
            Self::ProcessGone { .. } => "GWM-2004",
            Self::Serialization { .. } => "GWM-2101",
            Self::Io { .. } => "GWM-3002",
            Self::ChannelClosed { .. } => "GWM-3003",
            Self::ThreadSpawn { .. } => "GWM-3101",
            Self::Runtime { .. } => "GWM-3900",
        }
    }

    /// Whether retrying might resolve the failure.
    #[must_use]
    pub const fn is_retryable(&self) -> bool {
        matches!(
            self,
            Self::Io { .. }
                | Self::CommandTimeout { .. }
                | Self::CommandFailed { .. }
                | Self::ProcessGone { .. }
                | Self::ChannelClosed { .. }
                | Self::Runtime { .. }
        )
    }

    /// Convenience constructor for IO errors with a known path.
    #[must_use]
    pub fn io(path: impl AsRef<Path>, source: std::io::Error) -> Self {
        Self::Io {
            path: path.as_ref().to_path_buf(),
            source,
        }
    }
}

impl From<serde_json::Error> for GwError {
    fn from(value: serde_json::Error) -> Self {
        Self::Serialization {
            context: "serde_json",
            details: value.to_string(),
        }
    }
}

impl From<toml::de::Error> for GwError {
    fn from(value: toml::de::Error) -> Self {
        Self::ConfigParse {
            context: "toml",
            details: value.to_string(),
        }
    }
}
