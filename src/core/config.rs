//! Monitor configuration: TOML file with full defaults plus environment overrides.
//!
//! Every field has a default so an absent file yields a working monitor that
//! watches `~/.nanobot`. Durations are stored as millisecond integers to keep
//! the file format flat.

#![allow(missing_docs)]

use std::path::{Path, PathBuf};
use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::core::errors::{GwError, Result};

/// Environment variable overriding the agent home directory.
pub const ENV_AGENT_HOME: &str = "GWMON_AGENT_HOME";
/// Environment variable overriding the session log directory.
pub const ENV_SESSIONS_DIR: &str = "GWMON_SESSIONS_DIR";
/// Environment variable overriding the job registry file.
pub const ENV_JOBS_FILE: &str = "GWMON_JOBS_FILE";
/// Environment variable overriding the mesh CLI binary.
pub const ENV_MESH_BIN: &str = "GWMON_MESH_BIN";

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct Config {
    pub paths: PathsConfig,
    pub gateway: GatewayConfig,
    pub sampler: SamplerConfig,
    pub sessions: SessionsConfig,
    pub reachability: ReachabilityConfig,
    pub cache: CacheConfig,
    pub broadcast: BroadcastConfig,
    pub control: ControlConfig,
}

// ──────────────────── sections ────────────────────

/// Filesystem inputs. Unset paths resolve relative to `agent_home`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct PathsConfig {
    pub agent_home: PathBuf,
    pub config_file: Option<PathBuf>,
    pub jobs_file: Option<PathBuf>,
    pub sessions_dir: Option<PathBuf>,
}

impl Default for PathsConfig {
    fn default() -> Self {
        Self {
            agent_home: PathBuf::from("~/.nanobot"),
            config_file: None,
            jobs_file: None,
            sessions_dir: None,
        }
    }
}

impl PathsConfig {
    #[must_use]
    pub fn agent_home(&self) -> PathBuf {
        expand_home(&self.agent_home)
    }

    #[must_use]
    pub fn config_file(&self) -> PathBuf {
        self.config_file
            .as_deref()
            .map_or_else(|| self.agent_home().join("config.json"), expand_home)
    }

    #[must_use]
    pub fn jobs_file(&self) -> PathBuf {
        self.jobs_file
            .as_deref()
            .map_or_else(|| self.agent_home().join("cron").join("jobs.json"), expand_home)
    }

    #[must_use]
    pub fn sessions_dir(&self) -> PathBuf {
        self.sessions_dir
            .as_deref()
            .map_or_else(|| self.agent_home().join("sessions"), expand_home)
    }
}

/// How the gateway process and its tmux session are identified.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct GatewayConfig {
    /// All tokens must appear in the lowercased command line.
    pub process_tokens: Vec<String>,
    pub tmux_session: String,
    pub start_script: PathBuf,
}

impl Default for GatewayConfig {
    fn default() -> Self {
        Self {
            process_tokens: vec!["gateway".to_string(), "nanobot".to_string()],
            tmux_session: "nanobot-gateway".to_string(),
            start_script: PathBuf::from("~/nano-board/start-nanobot.sh"),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct SamplerConfig {
    pub interval_ms: u64,
}

impl Default for SamplerConfig {
    fn default() -> Self {
        Self { interval_ms: 1_000 }
    }
}

impl SamplerConfig {
    #[must_use]
    pub const fn interval(&self) -> Duration {
        Duration::from_millis(self.interval_ms)
    }
}

/// Activity windows for the session analyzer, in seconds.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct SessionsConfig {
    pub active_window_secs: u64,
    pub thinking_window_secs: u64,
    pub marker_window_secs: u64,
    pub assistant_active_secs: u64,
    pub detail_cap: usize,
    /// Scan only the N most recently modified logs. `None` scans all.
    pub scan_limit: Option<usize>,
}

impl Default for SessionsConfig {
    fn default() -> Self {
        Self {
            active_window_secs: 300,
            thinking_window_secs: 30,
            marker_window_secs: 300,
            assistant_active_secs: 60,
            detail_cap: 20,
            scan_limit: None,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ReachabilityConfig {
    pub binary: String,
    pub ip_timeout_ms: u64,
    pub status_timeout_ms: u64,
    pub funnel_timeout_ms: u64,
}

impl Default for ReachabilityConfig {
    fn default() -> Self {
        Self {
            binary: "tailscale".to_string(),
            ip_timeout_ms: 2_000,
            status_timeout_ms: 3_000,
            funnel_timeout_ms: 2_000,
        }
    }
}

/// Per-source TTLs for the aggregator cache.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct CacheConfig {
    pub process_ttl_ms: u64,
    pub sessions_ttl_ms: u64,
    pub reachability_ttl_ms: u64,
    pub jobs_ttl_ms: u64,
    pub config_ttl_ms: u64,
    pub gateway_ttl_ms: u64,
}

impl Default for CacheConfig {
    fn default() -> Self {
        Self {
            process_ttl_ms: 1_000,
            sessions_ttl_ms: 3_000,
            reachability_ttl_ms: 5_000,
            jobs_ttl_ms: 10_000,
            config_ttl_ms: 10_000,
            gateway_ttl_ms: 5_000,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct BroadcastConfig {
    pub interval_ms: u64,
    pub subscriber_capacity: usize,
}

impl Default for BroadcastConfig {
    fn default() -> Self {
        Self {
            interval_ms: 2_000,
            subscriber_capacity: 8,
        }
    }
}

impl BroadcastConfig {
    #[must_use]
    pub const fn interval(&self) -> Duration {
        Duration::from_millis(self.interval_ms)
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ControlConfig {
    pub timeout_ms: u64,
    pub restart_pause_ms: u64,
}

impl Default for ControlConfig {
    fn default() -> Self {
        Self {
            timeout_ms: 3_000,
            restart_pause_ms: 1_000,
        }
    }
}

// ──────────────────── loading ────────────────────

impl Config {
    /// Load configuration.
    ///
    /// An explicit `path` must exist. Without one, the default location is
    /// tried and its absence yields defaults. Environment overrides are applied
    /// last, then the result is validated.
    ///
    /// # Errors
    /// Returns `MissingConfig` for an absent explicit path, `ConfigParse` for
    /// malformed TOML, and `InvalidConfig` when validation fails.
    pub fn load(path: Option<&Path>) -> Result<Self> {
        let mut config = match path {
            Some(explicit) => {
                if !explicit.exists() {
                    return Err(GwError::MissingConfig {
                        path: explicit.to_path_buf(),
                    });
                }
                Self::from_file(explicit)?
            }
            None => match default_config_path() {
                Some(default) if default.exists() => Self::from_file(&default)?,
                _ => Self::default(),
            },
        };
        config.apply_env_overrides(|key| std::env::var(key).ok());
        config.validate()?;
        Ok(config)
    }

    /// Parse a TOML file without applying overrides.
    ///
    /// # Errors
    /// Returns IO or parse errors.
    pub fn from_file(path: &Path) -> Result<Self> {
        let raw = std::fs::read_to_string(path).map_err(|source| GwError::io(path, source))?;
        Ok(toml::from_str(&raw)?)
    }

    /// Apply environment overrides through `lookup` so tests need not touch
    /// the process environment.
    pub fn apply_env_overrides(&mut self, lookup: impl Fn(&str) -> Option<String>) {
        if let Some(home) = lookup(ENV_AGENT_HOME).filter(|v| !v.is_empty()) {
            self.paths.agent_home = PathBuf::from(home);
        }
        if let Some(dir) = lookup(ENV_SESSIONS_DIR).filter(|v| !v.is_empty()) {
            self.paths.sessions_dir = Some(PathBuf::from(dir));
        }
        if let Some(file) = lookup(ENV_JOBS_FILE).filter(|v| !v.is_empty()) {
            self.paths.jobs_file = Some(PathBuf::from(file));
        }
        if let Some(bin) = lookup(ENV_MESH_BIN).filter(|v| !v.is_empty()) {
            self.reachability.binary = bin;
        }
    }

    /// Reject configurations the loops cannot run with.
    ///
    /// # Errors
    /// Returns `InvalidConfig` describing the first violated constraint.
    pub fn validate(&self) -> Result<()> {
        let invalid = |details: &str| {
            Err(GwError::InvalidConfig {
                details: details.to_string(),
            })
        };
        if self.sampler.interval_ms == 0 {
            return invalid("sampler.interval_ms must be positive");
        }
        if self.broadcast.interval_ms == 0 {
            return invalid("broadcast.interval_ms must be positive");
        }
        if self.broadcast.subscriber_capacity == 0 {
            return invalid("broadcast.subscriber_capacity must be positive");
        }
        if self.sessions.thinking_window_secs > self.sessions.active_window_secs {
            return invalid("sessions.thinking_window_secs must not exceed active_window_secs");
        }
        if self.sessions.detail_cap == 0 {
            return invalid("sessions.detail_cap must be positive");
        }
        if self.gateway.process_tokens.iter().all(|t| t.trim().is_empty()) {
            return invalid("gateway.process_tokens must contain at least one token");
        }
        if self.reachability.binary.trim().is_empty() {
            return invalid("reachability.binary must not be empty");
        }
        Ok(())
    }
}

/// `$XDG_CONFIG_HOME/gwmon/config.toml`, falling back to `~/.config`.
#[must_use]
pub fn default_config_path() -> Option<PathBuf> {
    if let Some(xdg) = std::env::var_os("XDG_CONFIG_HOME").filter(|v| !v.is_empty()) {
        return Some(PathBuf::from(xdg).join("gwmon").join("config.toml"));
    }
    std::env::var_os("HOME").map(|home| {
        PathBuf::from(home)
            .join(".config")
            .join("gwmon")
            .join("config.toml")
    })
}

/// Expand a leading `~` to `$HOME`. Other paths pass through untouched.
#[must_use]
pub fn expand_home(path: &Path) -> PathBuf {
    let Ok(rest) = path.strip_prefix("~") else {
        return path.to_path_buf();
    };
    std::env::var_os("HOME").map_or_else(|| path.to_path_buf(), |home| PathBuf::from(home).join(rest))
}
