//! Mesh-network reachability, probed through the mesh CLI.
//!
//! Three sub-probes run independently, each under its own deadline. A probe
//! that fails for any reason (missing binary, non-zero exit, timeout,
//! unparseable output) leaves its fields at their defaults; whatever the other
//! probes learned is kept.

#![allow(missing_docs)]

use std::sync::Arc;
use std::time::Duration;

use serde::Serialize;
use serde_json::Value;
use tracing::debug;

use crate::core::command::CommandRunner;
use crate::core::config::ReachabilityConfig;

/// Backend state reported when the status probe yields nothing.
pub const UNKNOWN_BACKEND: &str = "Unknown";

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ReachabilityInfo {
    pub online: bool,
    #[serde(rename = "ip")]
    pub self_address: Option<String>,
    pub hostname: Option<String>,
    #[serde(rename = "url")]
    pub public_url: Option<String>,
    #[serde(rename = "peers")]
    pub peer_count: usize,
    pub backend_state: String,
}

impl Default for ReachabilityInfo {
    fn default() -> Self {
        Self {
            online: false,
            self_address: None,
            hostname: None,
            public_url: None,
            peer_count: 0,
            backend_state: UNKNOWN_BACKEND.to_string(),
        }
    }
}

/// Fields learned from `status --json`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MeshStatus {
    pub online: bool,
    pub hostname: Option<String>,
    pub peer_count: usize,
    pub backend_state: String,
}

#[derive(Clone)]
pub struct ReachabilityPoller {
    runner: Arc<dyn CommandRunner>,
    binary: String,
    ip_timeout: Duration,
    status_timeout: Duration,
    funnel_timeout: Duration,
}

impl std::fmt::Debug for ReachabilityPoller {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ReachabilityPoller")
            .field("binary", &self.binary)
            .field("ip_timeout", &self.ip_timeout)
            .field("status_timeout", &self.status_timeout)
            .field("funnel_timeout", &self.funnel_timeout)
            .finish_non_exhaustive()
    }
}

impl ReachabilityPoller {
    #[must_use]
    pub fn new(runner: Arc<dyn CommandRunner>, config: &ReachabilityConfig) -> Self {
        Self {
            runner,
            binary: config.binary.clone(),
            ip_timeout: Duration::from_millis(config.ip_timeout_ms),
            status_timeout: Duration::from_millis(config.status_timeout_ms),
            funnel_timeout: Duration::from_millis(config.funnel_timeout_ms),
        }
    }

    /// Run all three probes. Never fails.
    #[must_use]
    pub fn poll(&self) -> ReachabilityInfo {
        let mut info = ReachabilityInfo {
            self_address: self.probe(&["ip", "-4"], self.ip_timeout, parse_self_address),
            public_url: self.probe(&["funnel", "status"], self.funnel_timeout, parse_funnel_url),
            ..ReachabilityInfo::default()
        };
        if let Some(status) = self.probe(&["status", "--json"], self.status_timeout, parse_status) {
            info.online = status.online;
            info.hostname = status.hostname;
            info.peer_count = status.peer_count;
            info.backend_state = status.backend_state;
        }
        info
    }

    fn probe<T>(&self, args: &[&str], timeout: Duration, parse: fn(&str) -> Option<T>) -> Option<T> {
        match self.runner.run(&self.binary, args, timeout) {
            Ok(output) => parse(&output.stdout),
            Err(err) => {
                debug!(binary = %self.binary, ?args, code = err.code(), error = %err, "mesh probe failed");
                None
            }
        }
    }
}

/// First non-empty line of `ip -4` output.
#[must_use]
pub fn parse_self_address(stdout: &str) -> Option<String> {
    stdout
        .lines()
        .map(str::trim)
        .find(|line| !line.is_empty())
        .map(str::to_string)
}

/// First token of the first line starting with `https://`.
#[must_use]
pub fn parse_funnel_url(stdout: &str) -> Option<String> {
    stdout
        .lines()
        .map(str::trim)
        .find(|line| line.starts_with("https://"))
        .and_then(|line| line.split_whitespace().next())
        .map(str::to_string)
}

/// Parse `status --json`. Invalid JSON or a non-object document is `None`.
#[must_use]
pub fn parse_status(stdout: &str) -> Option<MeshStatus> {
    let doc: Value = serde_json::from_str(stdout).ok()?;
    let doc = doc.as_object()?;
    let self_node = doc.get("Self").and_then(Value::as_object);

    let backend_state = doc
        .get("BackendState")
        .and_then(Value::as_str)
        .filter(|s| !s.is_empty())
        .unwrap_or(UNKNOWN_BACKEND)
        .to_string();

    let online = self_node
        .and_then(|node| node.get("Online"))
        .and_then(Value::as_bool)
        .unwrap_or(backend_state == "Running");

    let non_empty = |key: &str| {
        self_node
            .and_then(|node| node.get(key))
            .and_then(Value::as_str)
            .map(|s| s.trim_end_matches('.'))
            .filter(|s| !s.is_empty())
            .map(str::to_string)
    };
    let hostname = non_empty("DNSName").or_else(|| non_empty("HostName"));

    let peer_count = match doc.get("Peer") {
        Some(Value::Object(peers)) => peers.len(),
        Some(Value::Array(peers)) => peers.len(),
        _ => 0,
    };

    Some(MeshStatus {
        online,
        hostname,
        peer_count,
        backend_state,
    })
}
