//! Status aggregation: one dashboard snapshot from every source.
//!
//! Each source is fronted by the shared [`TtlCache`] with its own TTL, so a
//! burst of status requests costs at most one load per source per window.
//! Sources never fail; their own defaults stand in for anything unavailable,
//! which keeps [`StatusAggregator::snapshot`] infallible.

#![allow(missing_docs)]

use std::sync::Arc;
use std::time::Duration;

use chrono::{DateTime, Utc};
use parking_lot::Mutex;
use serde::Serialize;

use crate::cache::TtlCache;
use crate::control::GatewayControl;
use crate::core::config::{CacheConfig, Config};
use crate::monitor::gateway_config::{ConfigSummary, GatewayConfigReader};
use crate::monitor::host::HostSnapshot;
use crate::monitor::jobs::{JobListing, JobRegistryReader};
use crate::monitor::process::{ProcessSnapshot, SnapshotCell};
use crate::monitor::reachability::{ReachabilityInfo, ReachabilityPoller};
use crate::monitor::sessions::{SessionActivitySummary, SessionAnalyzer};

const KEY_PROCESS: &str = "process";
const KEY_HOST: &str = "host";
const KEY_SESSIONS: &str = "sessions";
const KEY_REACHABILITY: &str = "reachability";
const KEY_JOBS: &str = "jobs";
const KEY_CONFIG: &str = "config";
const KEY_GATEWAY: &str = "gateway";

// ──────────────────── snapshot types ────────────────────

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct GatewayState {
    pub running: bool,
    pub status: &'static str,
}

impl GatewayState {
    #[must_use]
    pub const fn from_running(running: bool) -> Self {
        Self {
            running,
            status: if running { "Running" } else { "Stopped" },
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct AppInfo {
    pub version: String,
}

impl Default for AppInfo {
    fn default() -> Self {
        Self {
            version: env!("CARGO_PKG_VERSION").to_string(),
        }
    }
}

/// Everything a dashboard shows, built fresh per request or tick.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct DashboardSnapshot {
    pub status: &'static str,
    pub timestamp: DateTime<Utc>,
    pub process: ProcessSnapshot,
    pub system: HostSnapshot,
    pub sessions: SessionActivitySummary,
    pub reachability: ReachabilityInfo,
    pub cron_jobs: JobListing,
    pub gateway: GatewayState,
    pub config: ConfigSummary,
    pub app_info: AppInfo,
}

// ──────────────────── sources ────────────────────

/// The raw status sources behind the aggregator.
pub trait StatusSources: Send + Sync {
    fn process(&self) -> ProcessSnapshot;
    fn host(&self) -> HostSnapshot;
    fn sessions(&self) -> SessionActivitySummary;
    fn reachability(&self) -> ReachabilityInfo;
    fn jobs(&self) -> JobListing;
    fn config(&self) -> ConfigSummary;
    fn gateway_running(&self) -> bool;
}

/// Production sources: sampler cell, analyzers, readers, and control adapter.
pub struct LiveSources {
    pub process: Arc<SnapshotCell>,
    pub sessions: SessionAnalyzer,
    pub reachability: ReachabilityPoller,
    pub jobs: JobRegistryReader,
    pub config: GatewayConfigReader,
    /// Liveness via the control surface; `None` falls back to the sampler.
    pub control: Option<Arc<dyn GatewayControl>>,
}

impl std::fmt::Debug for LiveSources {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("LiveSources")
            .field("sessions", &self.sessions)
            .field("reachability", &self.reachability)
            .field("jobs", &self.jobs)
            .field("config", &self.config)
            .field("control", &self.control.is_some())
            .finish_non_exhaustive()
    }
}

impl LiveSources {
    #[must_use]
    pub fn new(
        config: &Config,
        process: Arc<SnapshotCell>,
        reachability: ReachabilityPoller,
        control: Option<Arc<dyn GatewayControl>>,
    ) -> Self {
        Self {
            process,
            sessions: SessionAnalyzer::from_config(config),
            reachability,
            jobs: JobRegistryReader::new(config.paths.jobs_file()),
            config: GatewayConfigReader::new(config.paths.config_file()),
            control,
        }
    }
}

impl StatusSources for LiveSources {
    fn process(&self) -> ProcessSnapshot {
        (*self.process.latest()).clone()
    }

    fn host(&self) -> HostSnapshot {
        (*self.process.latest_host()).clone()
    }

    fn sessions(&self) -> SessionActivitySummary {
        self.sessions.scan()
    }

    fn reachability(&self) -> ReachabilityInfo {
        self.reachability.poll()
    }

    fn jobs(&self) -> JobListing {
        self.jobs.read()
    }

    fn config(&self) -> ConfigSummary {
        self.config.read()
    }

    fn gateway_running(&self) -> bool {
        match &self.control {
            Some(control) => control.is_running(),
            None => self.process.latest().running,
        }
    }
}

// ──────────────────── aggregator ────────────────────

/// TTL per source.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SourceTtls {
    pub process: Duration,
    pub sessions: Duration,
    pub reachability: Duration,
    pub jobs: Duration,
    pub config: Duration,
    pub gateway: Duration,
}

impl From<&CacheConfig> for SourceTtls {
    fn from(cfg: &CacheConfig) -> Self {
        Self {
            process: Duration::from_millis(cfg.process_ttl_ms),
            sessions: Duration::from_millis(cfg.sessions_ttl_ms),
            reachability: Duration::from_millis(cfg.reachability_ttl_ms),
            jobs: Duration::from_millis(cfg.jobs_ttl_ms),
            config: Duration::from_millis(cfg.config_ttl_ms),
            gateway: Duration::from_millis(cfg.gateway_ttl_ms),
        }
    }
}

impl Default for SourceTtls {
    fn default() -> Self {
        Self::from(&CacheConfig::default())
    }
}

pub struct StatusAggregator {
    sources: Arc<dyn StatusSources>,
    cache: TtlCache,
    ttls: SourceTtls,
    last_timestamp: Mutex<Option<DateTime<Utc>>>,
    app_info: AppInfo,
}

impl std::fmt::Debug for StatusAggregator {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("StatusAggregator")
            .field("cache", &self.cache)
            .field("ttls", &self.ttls)
            .finish_non_exhaustive()
    }
}

impl StatusAggregator {
    #[must_use]
    pub fn new(sources: Arc<dyn StatusSources>, ttls: SourceTtls) -> Self {
        Self::with_cache(sources, ttls, TtlCache::new())
    }

    /// Aggregator over a caller-supplied cache (e.g. one with a manual clock).
    #[must_use]
    pub fn with_cache(sources: Arc<dyn StatusSources>, ttls: SourceTtls, cache: TtlCache) -> Self {
        Self {
            sources,
            cache,
            ttls,
            last_timestamp: Mutex::new(None),
            app_info: AppInfo::default(),
        }
    }

    /// Compose a snapshot stamped with the current time.
    #[must_use]
    pub fn snapshot(&self) -> Arc<DashboardSnapshot> {
        self.snapshot_at(Utc::now())
    }

    /// Compose a snapshot stamped no earlier than any previously issued one.
    #[must_use]
    pub fn snapshot_at(&self, now: DateTime<Utc>) -> Arc<DashboardSnapshot> {
        let sources = &self.sources;
        let ttl = &self.ttls;

        let process = self.cache.get(KEY_PROCESS, ttl.process, || sources.process());
        let host = self.cache.get(KEY_HOST, ttl.process, || sources.host());
        let sessions = self.cache.get(KEY_SESSIONS, ttl.sessions, || sources.sessions());
        let reachability = self
            .cache
            .get(KEY_REACHABILITY, ttl.reachability, || sources.reachability());
        let jobs = self.cache.get(KEY_JOBS, ttl.jobs, || sources.jobs());
        let config = self.cache.get(KEY_CONFIG, ttl.config, || sources.config());
        let running = self
            .cache
            .get(KEY_GATEWAY, ttl.gateway, || sources.gateway_running());

        Arc::new(DashboardSnapshot {
            status: "ok",
            timestamp: self.issue_timestamp(now),
            process: (*process).clone(),
            system: (*host).clone(),
            sessions: (*sessions).clone(),
            reachability: (*reachability).clone(),
            cron_jobs: (*jobs).clone(),
            gateway: GatewayState::from_running(*running),
            config: (*config).clone(),
            app_info: self.app_info.clone(),
        })
    }

    /// Drop the cached gateway liveness and process view so the next
    /// snapshot reflects a control action.
    pub fn invalidate_gateway(&self) {
        self.cache.invalidate(KEY_GATEWAY);
        self.cache.invalidate(KEY_PROCESS);
    }

    fn issue_timestamp(&self, now: DateTime<Utc>) -> DateTime<Utc> {
        let mut last = self.last_timestamp.lock();
        let issued = match *last {
            Some(prev) if prev > now => prev,
            _ => now,
        };
        *last = Some(issued);
        issued
    }
}

#[cfg(test)]
pub(crate) mod tests {
    use std::sync::atomic::{AtomicUsize, Ordering};

    use chrono::TimeDelta;

    use super::*;
    use crate::cache::{Clock, ManualClock};

    /// Sources returning defaults while counting loads per source.
    #[derive(Default)]
    pub(crate) struct CountingSources {
        pub process: AtomicUsize,
        pub sessions: AtomicUsize,
        pub reachability: AtomicUsize,
        pub jobs: AtomicUsize,
        pub config: AtomicUsize,
        pub gateway: AtomicUsize,
    }

    impl StatusSources for CountingSources {
        fn process(&self) -> ProcessSnapshot {
            self.process.fetch_add(1, Ordering::SeqCst);
            ProcessSnapshot::not_running(Utc::now())
        }
        fn host(&self) -> HostSnapshot {
            HostSnapshot::unavailable(Utc::now())
        }
        fn sessions(&self) -> SessionActivitySummary {
            self.sessions.fetch_add(1, Ordering::SeqCst);
            SessionActivitySummary::default()
        }
        fn reachability(&self) -> ReachabilityInfo {
            self.reachability.fetch_add(1, Ordering::SeqCst);
            ReachabilityInfo::default()
        }
        fn jobs(&self) -> JobListing {
            self.jobs.fetch_add(1, Ordering::SeqCst);
            JobListing::default()
        }
        fn config(&self) -> ConfigSummary {
            self.config.fetch_add(1, Ordering::SeqCst);
            ConfigSummary::default()
        }
        fn gateway_running(&self) -> bool {
            self.gateway.fetch_add(1, Ordering::SeqCst);
            true
        }
    }

    fn aggregator() -> (Arc<ManualClock>, Arc<CountingSources>, StatusAggregator) {
        let clock = Arc::new(ManualClock::new());
        let sources = Arc::new(CountingSources::default());
        let agg = StatusAggregator::with_cache(
            Arc::clone(&sources) as Arc<dyn StatusSources>,
            SourceTtls::default(),
            TtlCache::with_clock(Arc::clone(&clock) as Arc<dyn Clock>),
        );
        (clock, sources, agg)
    }

    #[test]
    fn sources_reload_on_their_own_ttls() {
        let (clock, sources, agg) = aggregator();
        let _ = agg.snapshot();
        let _ = agg.snapshot();
        assert_eq!(sources.process.load(Ordering::SeqCst), 1);
        assert_eq!(sources.jobs.load(Ordering::SeqCst), 1);

        clock.advance(Duration::from_millis(1_500));
        let _ = agg.snapshot();
        assert_eq!(sources.process.load(Ordering::SeqCst), 2);
        assert_eq!(sources.sessions.load(Ordering::SeqCst), 1);

        clock.advance(Duration::from_secs(4));
        let _ = agg.snapshot();
        assert_eq!(sources.sessions.load(Ordering::SeqCst), 2);
        assert_eq!(sources.reachability.load(Ordering::SeqCst), 2);
        assert_eq!(sources.jobs.load(Ordering::SeqCst), 1);
        assert_eq!(sources.config.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn timestamps_never_go_backwards() {
        let (_, _, agg) = aggregator();
        let base = DateTime::from_timestamp(1_750_000_000, 0).expect("valid");
        let first = agg.snapshot_at(base).timestamp;
        let skewed = agg.snapshot_at(base - TimeDelta::seconds(30)).timestamp;
        let later = agg.snapshot_at(base + TimeDelta::seconds(1)).timestamp;
        assert!(skewed >= first);
        assert!(later >= skewed);
        assert_eq!(later, base + TimeDelta::seconds(1));
    }

    #[test]
    fn snapshot_serializes_with_dashboard_keys() {
        let (_, _, agg) = aggregator();
        let value = serde_json::to_value(&*agg.snapshot()).expect("serialize");
        for key in [
            "status", "timestamp", "process", "system", "sessions", "reachability", "cron_jobs", "gateway",
            "config", "app_info",
        ] {
            assert!(value.get(key).is_some(), "missing {key}");
        }
        assert_eq!(value["status"], "ok");
        assert_eq!(value["system"]["disk_percent"], 0.0);
        assert_eq!(value["gateway"]["status"], "Running");
        assert_eq!(value["cron_jobs"]["count"], 0);
        assert_eq!(value["sessions"]["status"], "idle");
        assert_eq!(value["reachability"]["backend_state"], "Unknown");
        assert_eq!(value["config"]["model"], "Unknown");
        assert_eq!(value["app_info"]["version"], env!("CARGO_PKG_VERSION"));
    }

    #[test]
    fn gateway_invalidation_reloads_only_liveness_and_process() {
        let (_, sources, agg) = aggregator();
        let _ = agg.snapshot();
        agg.invalidate_gateway();
        let _ = agg.snapshot();
        assert_eq!(sources.gateway.load(Ordering::SeqCst), 2);
        assert_eq!(sources.process.load(Ordering::SeqCst), 2);
        assert_eq!(sources.jobs.load(Ordering::SeqCst), 1);
        assert_eq!(sources.sessions.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn gateway_state_labels() {
        assert_eq!(GatewayState::from_running(false).status, "Stopped");
        assert_eq!(GatewayState::from_running(true).status, "Running");
    }
}
