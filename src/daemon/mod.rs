//! Long-running side of the monitor: aggregation, broadcast, lifecycle.

pub mod aggregator;
pub mod broadcast;
pub mod runtime;
#[cfg(feature = "daemon")]
pub mod signals;

pub use aggregator::{DashboardSnapshot, StatusAggregator};
pub use broadcast::{BroadcastLoop, Subscription};
pub use runtime::Runtime;
