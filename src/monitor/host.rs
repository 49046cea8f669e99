//! Host-level vitals: system CPU, memory, and root-filesystem usage.
//!
//! Sampled on the process sampler's thread so system CPU shares its one-second
//! observation window, then published next to the process snapshot.

#![allow(missing_docs)]

use chrono::{DateTime, Utc};
use serde::Serialize;

const BYTES_PER_MB: f64 = 1024.0 * 1024.0;

/// Raw host readings from the OS.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct HostSample {
    pub cpu_percent: f32,
    pub memory_used_bytes: u64,
    pub memory_total_bytes: u64,
    /// `(used, total)` bytes of the filesystem mounted at `/`, when found.
    pub root_disk: Option<(u64, u64)>,
}

/// Host vitals at one sampler tick.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct HostSnapshot {
    pub cpu_percent: f32,
    pub memory_percent: f64,
    pub memory_used_mb: f64,
    pub memory_total_mb: f64,
    pub disk_percent: f64,
    pub sampled_at: DateTime<Utc>,
}

impl HostSnapshot {
    /// Zeroed vitals for inspectors that cannot read the host.
    #[must_use]
    pub const fn unavailable(sampled_at: DateTime<Utc>) -> Self {
        Self {
            cpu_percent: 0.0,
            memory_percent: 0.0,
            memory_used_mb: 0.0,
            memory_total_mb: 0.0,
            disk_percent: 0.0,
            sampled_at,
        }
    }

    #[must_use]
    #[allow(clippy::cast_precision_loss, clippy::cast_possible_truncation)]
    pub fn from_sample(sample: &HostSample, now: DateTime<Utc>) -> Self {
        let cpu = if sample.cpu_percent.is_finite() && sample.cpu_percent > 0.0 {
            sample.cpu_percent
        } else {
            0.0
        };
        let disk_percent = sample
            .root_disk
            .map_or(0.0, |(used, total)| percent(used as f64, total as f64));
        Self {
            cpu_percent: round(f64::from(cpu), 1) as f32,
            memory_percent: round(
                percent(
                    sample.memory_used_bytes as f64,
                    sample.memory_total_bytes as f64,
                ),
                1,
            ),
            memory_used_mb: round(sample.memory_used_bytes as f64 / BYTES_PER_MB, 2),
            memory_total_mb: round(sample.memory_total_bytes as f64 / BYTES_PER_MB, 2),
            disk_percent: round(disk_percent, 1),
            sampled_at: now,
        }
    }
}

fn percent(part: f64, whole: f64) -> f64 {
    if whole > 0.0 {
        (part / whole * 100.0).clamp(0.0, 100.0)
    } else {
        0.0
    }
}

fn round(value: f64, places: i32) -> f64 {
    let factor = 10_f64.powi(places);
    if value.is_finite() {
        (value * factor).round() / factor
    } else {
        0.0
    }
}
