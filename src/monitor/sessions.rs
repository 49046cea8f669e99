//! Session activity analyzer: append-only JSONL logs → one conversation status.
//!
//! Each `*.jsonl` file in the session directory is one conversation. A scan
//! reads every non-blank line, keeps the newest timestamped event per file,
//! and derives per-session flags and a single global [`ConversationStatus`].
//! Nothing is carried between scans; the result is recomputed from the files
//! every time, and the aggregator bounds scan frequency with a short TTL.

#![allow(missing_docs)]

use std::fmt;
use std::path::{Path, PathBuf};
use std::time::SystemTime;

use chrono::{DateTime, TimeDelta, Utc};
use serde::Serialize;
use serde_json::Value;
use tracing::{debug, warn};

use crate::core::config::{Config, SessionsConfig};
use crate::monitor::timestamp::event_timestamp;

/// File extension of session logs.
pub const SESSION_LOG_EXTENSION: &str = "jsonl";

// ──────────────────── types ────────────────────

/// Author of an event, as far as activity detection cares.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum Role {
    User,
    Assistant,
    Other,
}

impl Role {
    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::User => "user",
            Self::Assistant => "assistant",
            Self::Other => "other",
        }
    }

    fn from_event(event: &serde_json::Map<String, Value>) -> Option<Self> {
        match event.get("role")?.as_str()? {
            "user" => Some(Self::User),
            "assistant" => Some(Self::Assistant),
            _ => Some(Self::Other),
        }
    }
}

/// Global conversational state of the gateway.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum ConversationStatus {
    /// Nothing recent.
    #[default]
    Idle,
    /// The assistant answered within the last minute.
    Active,
    /// A user message just arrived, or a session is explicitly marked thinking.
    Thinking,
    /// A user message is waiting on a reply for longer than the thinking window.
    Processing,
}

impl ConversationStatus {
    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Idle => "idle",
            Self::Active => "active",
            Self::Thinking => "thinking",
            Self::Processing => "processing",
        }
    }
}

impl fmt::Display for ConversationStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Per-file result of one scan. Never persisted.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct SessionRecord {
    pub id: String,
    #[serde(rename = "messages")]
    pub message_count: usize,
    #[serde(rename = "latest")]
    pub last_timestamp: Option<DateTime<Utc>>,
    #[serde(rename = "role")]
    pub last_role: Option<Role>,
    #[serde(skip)]
    pub thinking_marker: bool,
}

impl SessionRecord {
    fn empty(id: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            message_count: 0,
            last_timestamp: None,
            last_role: None,
            thinking_marker: false,
        }
    }
}

/// Aggregate activity over the session directory.
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct SessionActivitySummary {
    #[serde(rename = "count")]
    pub session_count: usize,
    #[serde(rename = "messages")]
    pub total_messages: usize,
    pub active_sessions: usize,
    pub thinking_sessions: usize,
    #[serde(rename = "latest")]
    pub latest_timestamp: Option<DateTime<Utc>>,
    pub status: ConversationStatus,
    /// Newest first, capped.
    pub details: Vec<SessionRecord>,
}

/// Time windows driving the activity state machine.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ActivityWindows {
    /// A user-last session younger than this is active.
    pub active: TimeDelta,
    /// A user-last event younger than this is thinking.
    pub thinking: TimeDelta,
    /// An explicit `status: thinking` marker stays valid this long.
    pub marker: TimeDelta,
    /// An assistant-last event younger than this makes the gateway active.
    pub assistant_active: TimeDelta,
}

impl Default for ActivityWindows {
    fn default() -> Self {
        Self::from_config(&SessionsConfig::default())
    }
}

impl ActivityWindows {
    #[must_use]
    #[allow(clippy::cast_possible_wrap)]
    pub fn from_config(config: &SessionsConfig) -> Self {
        let secs = |value: u64| TimeDelta::seconds(value.min(i64::MAX as u64 / 1_000) as i64);
        Self {
            active: secs(config.active_window_secs),
            thinking: secs(config.thinking_window_secs),
            marker: secs(config.marker_window_secs),
            assistant_active: secs(config.assistant_active_secs),
        }
    }
}

// ──────────────────── analyzer ────────────────────

/// On-demand scanner over one session directory.
#[derive(Debug, Clone)]
pub struct SessionAnalyzer {
    dir: PathBuf,
    windows: ActivityWindows,
    detail_cap: usize,
    scan_limit: Option<usize>,
}

impl SessionAnalyzer {
    #[must_use]
    pub fn new(dir: impl Into<PathBuf>, config: &SessionsConfig) -> Self {
        Self {
            dir: dir.into(),
            windows: ActivityWindows::from_config(config),
            detail_cap: config.detail_cap,
            scan_limit: config.scan_limit,
        }
    }

    #[must_use]
    pub fn from_config(config: &Config) -> Self {
        Self::new(config.paths.sessions_dir(), &config.sessions)
    }

    #[must_use]
    pub fn dir(&self) -> &Path {
        &self.dir
    }

    /// Scan against the current wall clock.
    #[must_use]
    pub fn scan(&self) -> SessionActivitySummary {
        self.scan_at(Utc::now())
    }

    /// Scan with an explicit notion of "now".
    #[must_use]
    pub fn scan_at(&self, now: DateTime<Utc>) -> SessionActivitySummary {
        let Some(files) = list_session_files(&self.dir) else {
            return SessionActivitySummary::default();
        };

        let session_count = files.len();
        let take = self.scan_limit.unwrap_or(usize::MAX);
        let records: Vec<SessionRecord> = files
            .iter()
            .take(take)
            .map(|file| {
                read_session_log(file).unwrap_or_else(|err| {
                    warn!(path = %file.display(), error = %err, "session log unreadable");
                    SessionRecord::empty(session_id(file))
                })
            })
            .collect();

        summarize(session_count, records, now, &self.windows, self.detail_cap)
    }
}

/// Fold per-session records into a summary. Records must be in enumeration
/// order: on equal timestamps the later record is the global latest.
#[must_use]
pub fn summarize(
    session_count: usize,
    mut records: Vec<SessionRecord>,
    now: DateTime<Utc>,
    windows: &ActivityWindows,
    detail_cap: usize,
) -> SessionActivitySummary {
    let mut total_messages = 0;
    let mut active_sessions = 0;
    let mut thinking_sessions = 0;
    let mut latest: Option<(DateTime<Utc>, Option<Role>)> = None;

    for record in &records {
        total_messages += record.message_count;
        let Some(ts) = record.last_timestamp else {
            continue;
        };
        if latest.is_none_or(|(current, _)| ts >= current) {
            latest = Some((ts, record.last_role));
        }
        let (active, thinking) = session_flags(record, now, windows);
        active_sessions += usize::from(active);
        thinking_sessions += usize::from(thinking);
    }

    let status = global_status(latest, thinking_sessions, now, windows);

    // Stable sort: newest first, untimestamped sessions last.
    records.sort_by(|a, b| b.last_timestamp.cmp(&a.last_timestamp));
    records.truncate(detail_cap);

    debug!(
        sessions = session_count,
        messages = total_messages,
        active_sessions,
        thinking_sessions,
        %status,
        "session scan complete"
    );

    SessionActivitySummary {
        session_count,
        total_messages,
        active_sessions,
        thinking_sessions,
        latest_timestamp: latest.map(|(ts, _)| ts),
        status,
        details: records,
    }
}

/// `(active, thinking)` for one session.
#[must_use]
pub fn session_flags(
    record: &SessionRecord,
    now: DateTime<Utc>,
    windows: &ActivityWindows,
) -> (bool, bool) {
    let Some(ts) = record.last_timestamp else {
        return (false, false);
    };
    let age = age_since(ts, now);
    let active = record.last_role == Some(Role::User) && age < windows.active;
    let thinking = (active && age < windows.thinking)
        || (record.thinking_marker && age < windows.marker);
    (active, thinking)
}

/// Derive the global status from the single most recent event.
#[must_use]
pub fn global_status(
    latest: Option<(DateTime<Utc>, Option<Role>)>,
    thinking_sessions: usize,
    now: DateTime<Utc>,
    windows: &ActivityWindows,
) -> ConversationStatus {
    if thinking_sessions > 0 {
        return ConversationStatus::Thinking;
    }
    let Some((ts, role)) = latest else {
        return ConversationStatus::Idle;
    };
    let age = age_since(ts, now);
    match role {
        Some(Role::User) if age < windows.thinking => ConversationStatus::Thinking,
        Some(Role::User) if age < windows.active => ConversationStatus::Processing,
        Some(Role::Assistant) if age < windows.assistant_active => ConversationStatus::Active,
        _ => ConversationStatus::Idle,
    }
}

/// Events stamped in the future count as brand new.
fn age_since(ts: DateTime<Utc>, now: DateTime<Utc>) -> TimeDelta {
    (now - ts).max(TimeDelta::zero())
}

// ──────────────────── file access ────────────────────

/// Session logs sorted by modification time, newest first. `None` when the
/// directory is missing or unreadable.
fn list_session_files(dir: &Path) -> Option<Vec<PathBuf>> {
    let entries = match std::fs::read_dir(dir) {
        Ok(entries) => entries,
        Err(err) => {
            if err.kind() != std::io::ErrorKind::NotFound {
                warn!(dir = %dir.display(), error = %err, "session directory unreadable");
            }
            return None;
        }
    };

    let mut files: Vec<(PathBuf, SystemTime)> = entries
        .filter_map(Result::ok)
        .filter(|entry| entry.file_type().is_ok_and(|t| t.is_file()))
        .map(|entry| entry.path())
        .filter(|path| path.extension().is_some_and(|ext| ext == SESSION_LOG_EXTENSION))
        .map(|path| {
            let mtime = std::fs::metadata(&path)
                .and_then(|m| m.modified())
                .unwrap_or(SystemTime::UNIX_EPOCH);
            (path, mtime)
        })
        .collect();

    files.sort_by(|(pa, ma), (pb, mb)| mb.cmp(ma).then_with(|| pa.cmp(pb)));
    Some(files.into_iter().map(|(path, _)| path).collect())
}

fn session_id(path: &Path) -> String {
    path.file_stem()
        .map(|stem| stem.to_string_lossy().into_owned())
        .unwrap_or_default()
}

/// Read and parse one session log.
///
/// # Errors
/// Returns the underlying IO error when the file cannot be read.
pub fn read_session_log(path: &Path) -> std::io::Result<SessionRecord> {
    let bytes = std::fs::read(path)?;
    Ok(parse_session_bytes(session_id(path), &bytes))
}

/// Parse raw log bytes. Every non-blank line counts as a message; lines that
/// are not JSON objects are skipped for timestamp/role purposes.
#[must_use]
pub fn parse_session_bytes(id: impl Into<String>, bytes: &[u8]) -> SessionRecord {
    let mut record = SessionRecord::empty(id);
    let mut start = 0;

    for end in memchr::memchr_iter(b'\n', bytes).chain(std::iter::once(bytes.len())) {
        let line = bytes[start..end].trim_ascii();
        start = end + 1;
        if line.is_empty() {
            continue;
        }
        record.message_count += 1;

        let Ok(Value::Object(event)) = serde_json::from_slice::<Value>(line) else {
            continue;
        };
        let Some(ts) = event_timestamp(&event) else {
            continue;
        };
        if record.last_timestamp.is_none_or(|current| ts >= current) {
            record.last_timestamp = Some(ts);
            record.last_role = Role::from_event(&event);
            record.thinking_marker =
                event.get("status").and_then(Value::as_str) == Some("thinking");
        }
    }
    record
}
