//! Time-windowed memoization for expensive status probes.

pub mod ttl;

pub use ttl::{Clock, ManualClock, SystemClock, TtlCache};
