//! Summary of the gateway's own JSON configuration.

#![allow(missing_docs)]

use std::collections::BTreeMap;
use std::path::{Path, PathBuf};

use serde::Serialize;
use serde_json::{Map, Value};
use tracing::{debug, warn};

/// Model name reported when none is configured.
pub const UNKNOWN_MODEL: &str = "Unknown";

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct ChannelSummary {
    pub enabled: bool,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ConfigSummary {
    /// `gateway` section, copied through as-is.
    pub gateway: Value,
    pub channels: BTreeMap<String, ChannelSummary>,
    pub model: String,
}

impl Default for ConfigSummary {
    fn default() -> Self {
        Self {
            gateway: Value::Object(Map::new()),
            channels: BTreeMap::new(),
            model: UNKNOWN_MODEL.to_string(),
        }
    }
}

impl ConfigSummary {
    /// Names of enabled channels, sorted.
    #[must_use]
    pub fn enabled_channels(&self) -> Vec<&str> {
        self.channels
            .iter()
            .filter(|(_, ch)| ch.enabled)
            .map(|(name, _)| name.as_str())
            .collect()
    }
}

#[derive(Debug, Clone)]
pub struct GatewayConfigReader {
    path: PathBuf,
}

impl GatewayConfigReader {
    #[must_use]
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }

    #[must_use]
    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Read and summarize. Missing or malformed files give the default summary.
    #[must_use]
    pub fn read(&self) -> ConfigSummary {
        let raw = match std::fs::read(&self.path) {
            Ok(raw) => raw,
            Err(err) => {
                debug!(path = %self.path.display(), error = %err, "gateway config unavailable");
                return ConfigSummary::default();
            }
        };
        match serde_json::from_slice::<Value>(&raw) {
            Ok(doc) => summarize_config(&doc),
            Err(err) => {
                warn!(path = %self.path.display(), error = %err, "gateway config is not valid JSON");
                ConfigSummary::default()
            }
        }
    }
}

#[must_use]
pub fn summarize_config(doc: &Value) -> ConfigSummary {
    let Some(doc) = doc.as_object() else {
        return ConfigSummary::default();
    };

    let gateway = doc
        .get("gateway")
        .filter(|g| g.is_object())
        .cloned()
        .unwrap_or_else(|| Value::Object(Map::new()));

    let channels = doc
        .get("channels")
        .and_then(Value::as_object)
        .map(|channels| {
            channels
                .iter()
                .map(|(name, channel)| {
                    let enabled = channel
                        .get("enabled")
                        .and_then(Value::as_bool)
                        .unwrap_or(false);
                    (name.clone(), ChannelSummary { enabled })
                })
                .collect()
        })
        .unwrap_or_default();

    let model = doc
        .get("agents")
        .and_then(|a| a.get("defaults"))
        .and_then(|d| d.get("model"))
        .and_then(Value::as_str)
        .unwrap_or(UNKNOWN_MODEL)
        .to_string();

    ConfigSummary {
        gateway,
        channels,
        model,
    }
}
