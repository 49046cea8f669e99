//! Gateway process sampler.
//!
//! A dedicated thread locates the gateway by command line and publishes a
//! fresh [`ProcessSnapshot`] every tick. CPU percentage needs an observation
//! window between two refreshes, which is too slow to pay per status request,
//! so readers only ever take the last published snapshot from the
//! [`SnapshotCell`].
//!
//! The first CPU reading after (re)acquiring a process is a known artifact
//! (zero, or garbage on some platforms); it is clamped and published, never
//! reported as a failure.
//!
//! Host vitals ride along: the same tick reads system CPU, memory, and root
//! disk usage and publishes them into the cell beside the process snapshot.

use std::path::Path;
use std::sync::Arc;
use std::thread::{self, JoinHandle};
use std::time::{Duration, Instant};

use chrono::{DateTime, Utc};
use crossbeam_channel::{RecvTimeoutError, Sender};
use parking_lot::{Condvar, Mutex};
use serde::Serialize;
use sysinfo::{
    CpuRefreshKind, Disks, MemoryRefreshKind, Pid, ProcessRefreshKind, ProcessStatus,
    ProcessesToUpdate, RefreshKind, System, UpdateKind,
};
use tracing::{debug, info};

use crate::core::errors::{GwError, Result};
use crate::monitor::host::{HostSample, HostSnapshot};

const BYTES_PER_MB: f64 = 1024.0 * 1024.0;

// ──────────────────── snapshot ────────────────────

/// Resource view of the gateway process at one tick.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ProcessSnapshot {
    pub pid: Option<u32>,
    pub running: bool,
    pub cpu_percent: f32,
    pub memory_mb: f64,
    pub memory_percent: f64,
    pub uptime_seconds: u64,
    pub sampled_at: DateTime<Utc>,
}

impl ProcessSnapshot {
    /// Explicit "not running" snapshot with zeroed metrics.
    #[must_use]
    pub fn not_running(sampled_at: DateTime<Utc>) -> Self {
        Self {
            pid: None,
            running: false,
            cpu_percent: 0.0,
            memory_mb: 0.0,
            memory_percent: 0.0,
            uptime_seconds: 0,
            sampled_at,
        }
    }

    fn from_sample(pid: u32, sample: &ProcessSample, now: DateTime<Utc>) -> Self {
        let uptime_seconds = u64::try_from(now.timestamp())
            .unwrap_or(0)
            .saturating_sub(sample.start_time);
        #[allow(clippy::cast_precision_loss)]
        let memory_mb = sample.memory_bytes as f64 / BYTES_PER_MB;
        Self {
            pid: Some(pid),
            running: true,
            cpu_percent: round_f32(sanitize_cpu(sample.cpu_percent), 1),
            memory_mb: round_f64(memory_mb, 2),
            memory_percent: round_f64(sample.memory_percent.max(0.0), 1),
            uptime_seconds,
            sampled_at: now,
        }
    }
}

/// Clamp the first-sample artifact and any platform garbage to a finite,
/// non-negative value.
#[must_use]
pub fn sanitize_cpu(raw: f32) -> f32 {
    if raw.is_finite() && raw > 0.0 { raw } else { 0.0 }
}

fn round_f64(value: f64, places: i32) -> f64 {
    let factor = 10_f64.powi(places);
    if value.is_finite() {
        (value * factor).round() / factor
    } else {
        0.0
    }
}

#[allow(clippy::cast_possible_truncation)]
fn round_f32(value: f32, places: i32) -> f32 {
    round_f64(f64::from(value), places) as f32
}

// ──────────────────── inspection ────────────────────

/// Raw per-process readings from the OS.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct ProcessSample {
    pub cpu_percent: f32,
    pub memory_bytes: u64,
    pub memory_percent: f64,
    /// Process start, seconds since the Unix epoch.
    pub start_time: u64,
}

/// Matches a process by command line: every token must appear in the
/// lowercased, space-joined argument vector.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CommandLineMatcher {
    tokens: Vec<String>,
}

impl CommandLineMatcher {
    #[must_use]
    pub fn new<S: AsRef<str>>(tokens: &[S]) -> Self {
        Self {
            tokens: tokens
                .iter()
                .map(|t| t.as_ref().trim().to_lowercase())
                .filter(|t| !t.is_empty())
                .collect(),
        }
    }

    #[must_use]
    pub fn matches<I, S>(&self, args: I) -> bool
    where
        I: IntoIterator<Item = S>,
        S: AsRef<str>,
    {
        if self.tokens.is_empty() {
            return false;
        }
        let joined = args
            .into_iter()
            .map(|a| a.as_ref().to_lowercase())
            .collect::<Vec<_>>()
            .join(" ");
        self.tokens.iter().all(|token| joined.contains(token.as_str()))
    }
}

/// OS process-inspection capability the sampler depends on.
///
/// The sampler calls [`ProcessInspector::refresh`] exactly once at the top of
/// every tick; the other methods read that view and must not refresh again,
/// or "since last refresh" CPU collapses to a near-zero window.
pub trait ProcessInspector: Send {
    /// Take a fresh view of the process table.
    fn refresh(&mut self) {}

    /// Host-wide readings from the last refresh, if this inspector has them.
    fn host(&mut self) -> Option<HostSample> {
        None
    }

    /// Find a process whose command line satisfies `matcher`.
    fn locate(&mut self, matcher: &CommandLineMatcher) -> Option<u32>;

    /// Whether `pid` still refers to a live process.
    fn is_alive(&mut self, pid: u32) -> bool;

    /// Read CPU (since the previous sample of this pid), memory, and start time.
    ///
    /// # Errors
    /// `ProcessGone` when the process vanished or cannot be read.
    fn sample(&mut self, pid: u32) -> Result<ProcessSample>;
}

/// Production inspector backed by `sysinfo`.
///
/// Host CPU is tracked on its own `System` so its refresh never shortens the
/// per-process CPU window.
pub struct SysinfoInspector {
    system: System,
    host: System,
    own_pid: u32,
}

impl std::fmt::Debug for SysinfoInspector {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SysinfoInspector")
            .field("total_memory", &self.system.total_memory())
            .finish_non_exhaustive()
    }
}

impl Default for SysinfoInspector {
    fn default() -> Self {
        Self::new()
    }
}

impl SysinfoInspector {
    #[must_use]
    pub fn new() -> Self {
        let mut system = System::new();
        system.refresh_memory();
        let host = System::new_with_specifics(
            RefreshKind::nothing()
                .with_cpu(CpuRefreshKind::nothing().with_cpu_usage())
                .with_memory(MemoryRefreshKind::nothing().with_ram()),
        );
        Self {
            system,
            host,
            own_pid: std::process::id(),
        }
    }
}

fn root_disk_usage() -> Option<(u64, u64)> {
    let disks = Disks::new_with_refreshed_list();
    disks
        .list()
        .iter()
        .find(|disk| disk.mount_point() == Path::new("/"))
        .map(|disk| {
            let total = disk.total_space();
            (total.saturating_sub(disk.available_space()), total)
        })
}

impl ProcessInspector for SysinfoInspector {
    fn refresh(&mut self) {
        self.system.refresh_processes_specifics(
            ProcessesToUpdate::All,
            true,
            ProcessRefreshKind::nothing()
                .with_cmd(UpdateKind::OnlyIfNotSet)
                .with_cpu()
                .with_memory(),
        );
        self.host.refresh_cpu_usage();
        self.host.refresh_memory();
    }

    fn host(&mut self) -> Option<HostSample> {
        Some(HostSample {
            cpu_percent: self.host.global_cpu_usage(),
            memory_used_bytes: self.host.used_memory(),
            memory_total_bytes: self.host.total_memory(),
            root_disk: root_disk_usage(),
        })
    }

    fn locate(&mut self, matcher: &CommandLineMatcher) -> Option<u32> {
        self.system
            .processes()
            .iter()
            .filter(|(pid, _)| pid.as_u32() != self.own_pid)
            .filter(|(_, process)| process.status() != ProcessStatus::Zombie)
            .filter(|(_, process)| {
                matcher.matches(process.cmd().iter().map(|arg| arg.to_string_lossy()))
            })
            .map(|(pid, _)| pid.as_u32())
            .min()
    }

    fn is_alive(&mut self, pid: u32) -> bool {
        self.system
            .process(Pid::from_u32(pid))
            .is_some_and(|p| p.status() != ProcessStatus::Zombie)
    }

    fn sample(&mut self, pid: u32) -> Result<ProcessSample> {
        let process = self
            .system
            .process(Pid::from_u32(pid))
            .ok_or(GwError::ProcessGone { pid })?;
        let total = self.system.total_memory();
        #[allow(clippy::cast_precision_loss)]
        let memory_percent = if total == 0 {
            0.0
        } else {
            process.memory() as f64 / total as f64 * 100.0
        };
        Ok(ProcessSample {
            cpu_percent: process.cpu_usage(),
            memory_bytes: process.memory(),
            memory_percent,
            start_time: process.start_time(),
        })
    }
}

// ──────────────────── publication ────────────────────

struct Published {
    generation: u64,
    snapshot: Arc<ProcessSnapshot>,
    host: Arc<HostSnapshot>,
}

/// Single-writer, multi-reader cell holding the latest process and host
/// snapshots.
///
/// The lock is held only to swap or clone the `Arc`; a generation counter and
/// condition variable let callers wait for a number of completed ticks.
pub struct SnapshotCell {
    inner: Mutex<Published>,
    changed: Condvar,
}

impl std::fmt::Debug for SnapshotCell {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SnapshotCell")
            .field("generation", &self.generation())
            .finish_non_exhaustive()
    }
}

impl Default for SnapshotCell {
    fn default() -> Self {
        Self::new()
    }
}

impl SnapshotCell {
    /// Cell holding a "not running" snapshot at generation 0.
    #[must_use]
    pub fn new() -> Self {
        let now = Utc::now();
        Self {
            inner: Mutex::new(Published {
                generation: 0,
                snapshot: Arc::new(ProcessSnapshot::not_running(now)),
                host: Arc::new(HostSnapshot::unavailable(now)),
            }),
            changed: Condvar::new(),
        }
    }

    /// Replace both snapshots wholesale and wake waiters.
    pub fn publish(&self, snapshot: ProcessSnapshot, host: HostSnapshot) {
        let snapshot = Arc::new(snapshot);
        let host = Arc::new(host);
        {
            let mut inner = self.inner.lock();
            inner.snapshot = snapshot;
            inner.host = host;
            inner.generation += 1;
        }
        self.changed.notify_all();
    }

    /// Last published snapshot. Never waits on the sampler.
    #[must_use]
    pub fn latest(&self) -> Arc<ProcessSnapshot> {
        Arc::clone(&self.inner.lock().snapshot)
    }

    /// Host vitals published with the last snapshot.
    #[must_use]
    pub fn latest_host(&self) -> Arc<HostSnapshot> {
        Arc::clone(&self.inner.lock().host)
    }

    /// Number of snapshots published so far.
    #[must_use]
    pub fn generation(&self) -> u64 {
        self.inner.lock().generation
    }

    /// Block until at least `min` snapshots have been published or `timeout`
    /// elapses. Returns whether the generation was reached.
    pub fn wait_for_generation(&self, min: u64, timeout: Duration) -> bool {
        let deadline = Instant::now() + timeout;
        let mut inner = self.inner.lock();
        while inner.generation < min {
            if self.changed.wait_until(&mut inner, deadline).timed_out() {
                return inner.generation >= min;
            }
        }
        true
    }
}

// ──────────────────── sampling ────────────────────

/// Tick logic of the sampler, separate from its thread for testability.
#[derive(Debug)]
pub struct SamplerState<I> {
    inspector: I,
    matcher: CommandLineMatcher,
    tracked: Option<u32>,
}

impl<I: ProcessInspector> SamplerState<I> {
    #[must_use]
    pub fn new(inspector: I, matcher: CommandLineMatcher) -> Self {
        Self {
            inspector,
            matcher,
            tracked: None,
        }
    }

    /// Pid currently tracked, if any.
    #[must_use]
    pub const fn tracked(&self) -> Option<u32> {
        self.tracked
    }

    /// One sampling step. Never fails: every inspection problem degrades to a
    /// "not running" snapshot and a fresh lookup on the next tick.
    pub fn tick(&mut self, now: DateTime<Utc>) -> ProcessSnapshot {
        self.inspector.refresh();
        if let Some(pid) = self.tracked {
            if !self.inspector.is_alive(pid) {
                info!(pid, "gateway process exited");
                self.tracked = None;
            }
        }

        let pid = match self.tracked {
            Some(pid) => pid,
            None => match self.inspector.locate(&self.matcher) {
                Some(pid) => {
                    info!(pid, "gateway process acquired");
                    self.tracked = Some(pid);
                    pid
                }
                None => return ProcessSnapshot::not_running(now),
            },
        };

        match self.inspector.sample(pid) {
            Ok(sample) => ProcessSnapshot::from_sample(pid, &sample, now),
            Err(err) => {
                debug!(pid, error = %err, "process sample failed; will relocate");
                self.tracked = None;
                ProcessSnapshot::not_running(now)
            }
        }
    }

    /// Host vitals from the view taken by the last [`SamplerState::tick`].
    pub fn host(&mut self, now: DateTime<Utc>) -> HostSnapshot {
        self.inspector.host().map_or_else(
            || HostSnapshot::unavailable(now),
            |sample| HostSnapshot::from_sample(&sample, now),
        )
    }
}

/// Background sampling loop publishing into a [`SnapshotCell`].
///
/// Started once at process init; stopped by [`ProcessSampler::stop`] or drop.
#[derive(Debug)]
pub struct ProcessSampler {
    cell: Arc<SnapshotCell>,
    stop_tx: Option<Sender<()>>,
    handle: Option<JoinHandle<()>>,
}

impl ProcessSampler {
    /// Spawn the sampling thread. The first tick runs immediately.
    ///
    /// # Errors
    /// `ThreadSpawn` when the OS refuses a new thread; startup should abort.
    pub fn start<I>(inspector: I, matcher: CommandLineMatcher, interval: Duration) -> Result<Self>
    where
        I: ProcessInspector + 'static,
    {
        let cell = Arc::new(SnapshotCell::new());
        let (stop_tx, stop_rx) = crossbeam_channel::bounded::<()>(1);
        let mut state = SamplerState::new(inspector, matcher);
        let publish_to = Arc::clone(&cell);

        let handle = thread::Builder::new()
            .name("gwmon-sampler".to_string())
            .spawn(move || {
                loop {
                    let now = Utc::now();
                    let process = state.tick(now);
                    let host = state.host(now);
                    publish_to.publish(process, host);
                    match stop_rx.recv_timeout(interval) {
                        Err(RecvTimeoutError::Timeout) => {}
                        Ok(()) | Err(RecvTimeoutError::Disconnected) => break,
                    }
                }
                debug!("sampler loop stopped");
            })
            .map_err(|source| GwError::ThreadSpawn {
                name: "gwmon-sampler",
                source,
            })?;

        Ok(Self {
            cell,
            stop_tx: Some(stop_tx),
            handle: Some(handle),
        })
    }

    /// Shared handle to the published snapshot.
    #[must_use]
    pub fn cell(&self) -> Arc<SnapshotCell> {
        Arc::clone(&self.cell)
    }

    /// Last published snapshot.
    #[must_use]
    pub fn latest(&self) -> Arc<ProcessSnapshot> {
        self.cell.latest()
    }

    /// Stop the loop and join the thread.
    pub fn stop(mut self) {
        self.shutdown();
    }

    fn shutdown(&mut self) {
        if let Some(tx) = self.stop_tx.take() {
            let _ = tx.send(());
        }
        if let Some(handle) = self.handle.take() {
            let _ = handle.join();
        }
    }
}

impl Drop for ProcessSampler {
    fn drop(&mut self) {
        self.shutdown();
    }
}

#[cfg(test)]
mod tests {
    use std::collections::VecDeque;

    use super::*;

    /// Inspector replaying scripted lookups and samples.
    #[derive(Default)]
    struct FakeInspector {
        locate: VecDeque<Option<u32>>,
        samples: VecDeque<Result<ProcessSample>>,
        alive: bool,
        locate_calls: usize,
        refreshes: usize,
    }

    impl ProcessInspector for FakeInspector {
        fn refresh(&mut self) {
            self.refreshes += 1;
        }
        fn locate(&mut self, _matcher: &CommandLineMatcher) -> Option<u32> {
            self.locate_calls += 1;
            self.locate.pop_front().flatten()
        }
        fn is_alive(&mut self, _pid: u32) -> bool {
            self.alive
        }
        fn sample(&mut self, pid: u32) -> Result<ProcessSample> {
            self.samples
                .pop_front()
                .unwrap_or(Err(GwError::ProcessGone { pid }))
        }
    }

    fn sample(cpu: f32) -> ProcessSample {
        ProcessSample {
            cpu_percent: cpu,
            memory_bytes: 256 * 1024 * 1024,
            memory_percent: 3.14159,
            start_time: 1_700_000_000,
        }
    }

    fn now() -> DateTime<Utc> {
        DateTime::from_timestamp(1_700_000_600, 0).expect("valid")
    }

    fn matcher() -> CommandLineMatcher {
        CommandLineMatcher::new(&["gateway", "nanobot"])
    }

    #[test]
    fn matcher_requires_every_token() {
        let m = matcher();
        assert!(m.matches(["/usr/bin/python3", "-m", "nanobot", "gateway"]));
        assert!(m.matches(["NanoBot", "Gateway", "--port", "18790"]));
        assert!(!m.matches(["nanobot", "agent"]));
        assert!(!m.matches(["api-gateway"]));
        assert!(!CommandLineMatcher::new(&[" "]).matches(["anything"]));
    }

    #[test]
    fn no_matching_process_publishes_zeroed_not_running() {
        let mut state = SamplerState::new(FakeInspector::default(), matcher());
        let snap = state.tick(now());
        assert_eq!(snap, ProcessSnapshot::not_running(now()));
    }

    #[test]
    fn first_sample_artifact_is_tolerated() {
        let inspector = FakeInspector {
            locate: VecDeque::from([Some(42)]),
            samples: VecDeque::from([Ok(sample(f32::NAN)), Ok(sample(12.34))]),
            alive: true,
            ..FakeInspector::default()
        };
        let mut state = SamplerState::new(inspector, matcher());

        let first = state.tick(now());
        assert!(first.running);
        assert_eq!(first.cpu_percent, 0.0);

        let second = state.tick(now());
        assert!(second.cpu_percent.is_finite() && second.cpu_percent >= 0.0);
        assert!((second.cpu_percent - 12.3).abs() < f32::EPSILON);
        assert_eq!(second.pid, Some(42));
        assert_eq!(second.uptime_seconds, 600);
        assert!((second.memory_mb - 256.0).abs() < f64::EPSILON);
        assert!((second.memory_percent - 3.1).abs() < 1e-9);
    }

    #[test]
    fn sample_failure_resets_handle_and_relocates_next_tick() {
        let inspector = FakeInspector {
            locate: VecDeque::from([Some(7), Some(8)]),
            samples: VecDeque::from([
                Err(GwError::ProcessGone { pid: 7 }),
                Ok(sample(1.0)),
            ]),
            alive: true,
            ..FakeInspector::default()
        };
        let mut state = SamplerState::new(inspector, matcher());

        let failed = state.tick(now());
        assert!(!failed.running);
        assert_eq!(state.tracked(), None);

        let recovered = state.tick(now());
        assert_eq!(recovered.pid, Some(8));
        assert_eq!(state.tracked(), Some(8));
    }

    #[test]
    fn dead_tracked_process_is_relocated_in_the_same_tick() {
        let inspector = FakeInspector {
            locate: VecDeque::from([Some(1), Some(2)]),
            samples: VecDeque::from([Ok(sample(0.0)), Ok(sample(5.0))]),
            alive: false,
            ..FakeInspector::default()
        };
        let mut state = SamplerState::new(inspector, matcher());
        assert_eq!(state.tick(now()).pid, Some(1));
        assert_eq!(state.tick(now()).pid, Some(2));
        assert_eq!(state.inspector.locate_calls, 2);
        assert_eq!(state.inspector.refreshes, 2);
    }

    #[test]
    fn each_tick_refreshes_the_process_table_once() {
        let inspector = FakeInspector {
            locate: VecDeque::from([Some(5)]),
            samples: VecDeque::from([Ok(sample(0.0)), Ok(sample(1.0)), Ok(sample(2.0))]),
            alive: true,
            ..FakeInspector::default()
        };
        let mut state = SamplerState::new(inspector, matcher());
        for _ in 0..3 {
            let _ = state.tick(now());
        }
        assert_eq!(state.inspector.refreshes, 3);
        assert_eq!(state.host(now()), HostSnapshot::unavailable(now()));
    }

    #[test]
    fn negative_and_infinite_cpu_readings_clamp_to_zero() {
        assert_eq!(sanitize_cpu(-3.0), 0.0);
        assert_eq!(sanitize_cpu(f32::INFINITY), 0.0);
        assert_eq!(sanitize_cpu(250.0), 250.0);
    }

    #[test]
    fn cell_waits_for_generations() {
        let cell = Arc::new(SnapshotCell::new());
        assert_eq!(cell.generation(), 0);
        assert!(!cell.wait_for_generation(1, Duration::from_millis(20)));

        let writer = Arc::clone(&cell);
        let publisher = thread::spawn(move || {
            thread::sleep(Duration::from_millis(20));
            let at = Utc::now();
            writer.publish(ProcessSnapshot::not_running(at), HostSnapshot::unavailable(at));
        });
        assert!(cell.wait_for_generation(1, Duration::from_secs(5)));
        publisher.join().expect("join");
    }

    #[test]
    fn background_loop_publishes_and_stops() {
        let inspector = FakeInspector {
            locate: VecDeque::from([Some(99)]),
            samples: VecDeque::from([Ok(sample(0.0)), Ok(sample(4.0)), Ok(sample(4.0))]),
            alive: true,
            ..FakeInspector::default()
        };
        let sampler =
            ProcessSampler::start(inspector, matcher(), Duration::from_millis(10)).expect("start");
        assert!(sampler.cell().wait_for_generation(2, Duration::from_secs(5)));
        let snap = sampler.latest();
        assert!(snap.cpu_percent.is_finite() && snap.cpu_percent >= 0.0);
        sampler.stop();
    }

    #[cfg(target_os = "linux")]
    #[test]
    fn sysinfo_inspector_reports_cpu_of_a_busy_child() {
        let mut child = std::process::Command::new("sh")
            .args(["-c", "while :; do :; done; : gwmon-busy-marker"])
            .spawn()
            .expect("spawn sh");

        let mut state = SamplerState::new(
            SysinfoInspector::new(),
            CommandLineMatcher::new(&["gwmon-busy-marker"]),
        );
        let window = sysinfo::MINIMUM_CPU_UPDATE_INTERVAL.max(Duration::from_millis(500));
        let mut ticks = Vec::new();
        for _ in 0..4 {
            ticks.push(state.tick(Utc::now()));
            thread::sleep(window);
        }
        let host = state.host(Utc::now());

        let _ = child.kill();
        let _ = child.wait();

        assert!(ticks.iter().all(|t| t.pid == Some(child.id())), "ticks: {ticks:?}");
        let busiest = ticks[1..]
            .iter()
            .map(|t| t.cpu_percent)
            .fold(0.0_f32, f32::max);
        assert!(busiest > 20.0, "busy child read as idle: {ticks:?}");
        assert!(ticks.iter().all(|t| t.memory_mb >= 0.0));
        assert!(host.memory_total_mb > 0.0);
        assert!(host.memory_percent > 0.0 && host.memory_percent <= 100.0);
        assert!(host.cpu_percent.is_finite() && host.cpu_percent >= 0.0);
    }
}
