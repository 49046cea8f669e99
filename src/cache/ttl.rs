//! Keyed TTL memoization shared by every status source.
//!
//! One map holds type-erased values so a single cache instance can front
//! sources of different types. The map lock is taken for the lookup and for
//! the store, never while the loader runs: a slow reachability probe does not
//! block a session lookup. Concurrent misses on one key may each run the
//! loader; loaders here are idempotent reads, so the last store wins.

use std::any::Any;
use std::collections::HashMap;
use std::sync::Arc;
use std::time::{Duration, Instant};

use parking_lot::Mutex;

/// Monotonic time source for expiry decisions.
pub trait Clock: Send + Sync {
    /// Current instant.
    fn now(&self) -> Instant;
}

/// Wall clock backed by [`Instant::now`].
#[derive(Debug, Default, Clone, Copy)]
pub struct SystemClock;

impl Clock for SystemClock {
    fn now(&self) -> Instant {
        Instant::now()
    }
}

/// Hand-advanced clock for deterministic expiry tests.
#[derive(Debug)]
pub struct ManualClock {
    now: Mutex<Instant>,
}

impl ManualClock {
    /// Clock frozen at the current instant.
    #[must_use]
    pub fn new() -> Self {
        Self {
            now: Mutex::new(Instant::now()),
        }
    }

    /// Move time forward.
    pub fn advance(&self, by: Duration) {
        *self.now.lock() += by;
    }
}

impl Default for ManualClock {
    fn default() -> Self {
        Self::new()
    }
}

impl Clock for ManualClock {
    fn now(&self) -> Instant {
        *self.now.lock()
    }
}

struct Entry {
    value: Arc<dyn Any + Send + Sync>,
    expires_at: Instant,
}

/// Time-windowed memoization keyed by string.
pub struct TtlCache {
    entries: Mutex<HashMap<String, Entry>>,
    clock: Arc<dyn Clock>,
}

impl std::fmt::Debug for TtlCache {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("TtlCache")
            .field("entries", &self.entries.lock().len())
            .finish_non_exhaustive()
    }
}

impl Default for TtlCache {
    fn default() -> Self {
        Self::new()
    }
}

impl TtlCache {
    /// Cache driven by the system clock.
    #[must_use]
    pub fn new() -> Self {
        Self::with_clock(Arc::new(SystemClock))
    }

    /// Cache driven by an injected clock.
    #[must_use]
    pub fn with_clock(clock: Arc<dyn Clock>) -> Self {
        Self {
            entries: Mutex::new(HashMap::new()),
            clock,
        }
    }

    /// Return the live value for `key`, or run `loader` and store its result
    /// until `now + ttl`.
    ///
    /// `now` is read before the loader runs, so a slow load does not extend
    /// the entry's lifetime. An entry stored under a different type than `T`
    /// counts as a miss and is replaced.
    pub fn get<T, F>(&self, key: &str, ttl: Duration, loader: F) -> Arc<T>
    where
        T: Send + Sync + 'static,
        F: FnOnce() -> T,
    {
        let now = self.clock.now();
        {
            let entries = self.entries.lock();
            if let Some(entry) = entries.get(key) {
                if now < entry.expires_at {
                    if let Ok(value) = Arc::clone(&entry.value).downcast::<T>() {
                        return value;
                    }
                }
            }
        }

        let value = Arc::new(loader());

        self.entries.lock().insert(
            key.to_string(),
            Entry {
                value: Arc::clone(&value) as Arc<dyn Any + Send + Sync>,
                expires_at: now + ttl,
            },
        );
        value
    }

    /// Drop one entry so the next `get` reloads it.
    pub fn invalidate(&self, key: &str) -> bool {
        self.entries.lock().remove(key).is_some()
    }

    /// Drop every entry.
    pub fn clear(&self) {
        self.entries.lock().clear();
    }

    /// Number of stored entries, live or expired.
    #[must_use]
    pub fn len(&self) -> usize {
        self.entries.lock().len()
    }

    /// Whether no entries are stored.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}
