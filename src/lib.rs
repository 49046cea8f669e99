//! Gateway monitor: live status aggregation for a local agent gateway.
//!
//! A background sampler tracks the gateway process, on-demand analyzers read
//! session logs, the job registry, and the gateway config, and a poller asks
//! the mesh CLI about reachability. The [`daemon::aggregator::StatusAggregator`]
//! composes them into one snapshot behind a TTL cache, and
//! [`daemon::broadcast::BroadcastLoop`] pushes snapshots to subscribers.

pub mod cache;
pub mod control;
pub mod core;
pub mod daemon;
pub mod logger;
pub mod monitor;

#[cfg(feature = "cli")]
pub mod cli;
#[cfg(feature = "cli")]
pub mod cli_app;

pub use crate::core::config::Config;
pub use crate::core::errors::{GwError, Result};
