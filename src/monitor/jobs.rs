//! Scheduled-job registry reader.
//!
//! The registry is JSON, either a bare list of jobs or an object wrapping the
//! list under `jobs`. Both shapes normalize to the same [`JobListing`].
//! Anything unreadable yields an empty listing.

#![allow(missing_docs)]

use std::path::{Path, PathBuf};

use chrono::{DateTime, Utc};
use serde::Serialize;
use serde_json::{Map, Value};
use tracing::{debug, warn};

/// Maximum characters kept from a job's payload message.
pub const DESCRIPTION_LIMIT: usize = 50;
const DEFAULT_JOB_ID: &str = "job";
const MS_PER_MINUTE: u64 = 60_000;

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct JobSummary {
    pub id: String,
    pub name: Option<String>,
    pub enabled: bool,
    #[serde(rename = "expr")]
    pub schedule_expr: Option<String>,
    pub next_run_at: Option<DateTime<Utc>>,
    pub last_run_at: Option<DateTime<Utc>>,
    pub last_status: Option<String>,
    pub last_error: Option<String>,
    #[serde(rename = "command")]
    pub short_description: String,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct JobListing {
    pub count: usize,
    pub jobs: Vec<JobSummary>,
}

impl JobListing {
    #[must_use]
    pub fn from_jobs(jobs: Vec<JobSummary>) -> Self {
        Self {
            count: jobs.len(),
            jobs,
        }
    }

    /// Jobs with `enabled == true`.
    #[must_use]
    pub fn enabled_count(&self) -> usize {
        self.jobs.iter().filter(|job| job.enabled).count()
    }
}

#[derive(Debug, Clone)]
pub struct JobRegistryReader {
    path: PathBuf,
}

impl JobRegistryReader {
    #[must_use]
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }

    #[must_use]
    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Read and normalize the registry. Never fails.
    #[must_use]
    pub fn read(&self) -> JobListing {
        let raw = match std::fs::read(&self.path) {
            Ok(raw) => raw,
            Err(err) if err.kind() == std::io::ErrorKind::NotFound => {
                debug!(path = %self.path.display(), "job registry absent");
                return JobListing::default();
            }
            Err(err) => {
                warn!(path = %self.path.display(), error = %err, "job registry unreadable");
                return JobListing::default();
            }
        };
        match serde_json::from_slice::<Value>(&raw) {
            Ok(doc) => parse_registry(&doc),
            Err(err) => {
                warn!(path = %self.path.display(), error = %err, "job registry is not valid JSON");
                JobListing::default()
            }
        }
    }
}

/// Normalize a registry document. Non-object entries are skipped.
#[must_use]
pub fn parse_registry(doc: &Value) -> JobListing {
    let entries = match doc {
        Value::Array(list) => list.as_slice(),
        Value::Object(wrapper) => match wrapper.get("jobs") {
            Some(Value::Array(list)) => list.as_slice(),
            _ => &[],
        },
        _ => &[],
    };
    JobListing::from_jobs(
        entries
            .iter()
            .filter_map(Value::as_object)
            .map(parse_job)
            .collect(),
    )
}

fn parse_job(job: &Map<String, Value>) -> JobSummary {
    let state = job.get("state").and_then(Value::as_object);
    let state_str = |key: &str| {
        state
            .and_then(|s| s.get(key))
            .and_then(Value::as_str)
            .map(str::to_string)
    };
    let state_instant = |key: &str| {
        state
            .and_then(|s| s.get(key))
            .and_then(Value::as_i64)
            .and_then(DateTime::<Utc>::from_timestamp_millis)
    };

    JobSummary {
        id: job
            .get("id")
            .and_then(value_as_text)
            .unwrap_or_else(|| DEFAULT_JOB_ID.to_string()),
        name: job.get("name").and_then(Value::as_str).map(str::to_string),
        enabled: job.get("enabled").and_then(Value::as_bool).unwrap_or(true),
        schedule_expr: job
            .get("schedule")
            .and_then(Value::as_object)
            .and_then(schedule_expr),
        next_run_at: state_instant("nextRunAtMs"),
        last_run_at: state_instant("lastRunAtMs"),
        last_status: state_str("lastStatus"),
        last_error: state_str("lastError"),
        short_description: job
            .get("payload")
            .and_then(|p| p.get("message"))
            .and_then(Value::as_str)
            .map(short_description)
            .unwrap_or_default(),
    }
}

fn value_as_text(value: &Value) -> Option<String> {
    match value {
        Value::String(s) => Some(s.clone()),
        Value::Number(n) => Some(n.to_string()),
        _ => None,
    }
}

fn schedule_expr(schedule: &Map<String, Value>) -> Option<String> {
    if let Some(expr) = schedule.get("expr").and_then(Value::as_str).filter(|e| !e.is_empty()) {
        return Some(expr.to_string());
    }
    schedule
        .get("everyMs")
        .and_then(Value::as_u64)
        .map(|every| format!("{}m", every / MS_PER_MINUTE))
}

/// Newlines flattened to spaces, truncated to [`DESCRIPTION_LIMIT`] chars.
#[must_use]
pub fn short_description(message: &str) -> String {
    message
        .chars()
        .map(|c| if c == '\n' || c == '\r' { ' ' } else { c })
        .take(DESCRIPTION_LIMIT)
        .collect()
}
