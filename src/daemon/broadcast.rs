//! Periodic push of dashboard snapshots to subscribers.
//!
//! Every subscriber owns a bounded channel. A subscriber that falls behind has
//! the tick skipped for it (the channel is full), one that went away is
//! dropped from the hub; neither slows the loop or other subscribers.

use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};
use std::thread::{self, JoinHandle};
use std::time::Duration;

use crossbeam_channel::{Receiver, RecvTimeoutError, Sender, TrySendError};
use parking_lot::Mutex;
use tracing::{debug, warn};

use crate::core::config::BroadcastConfig;
use crate::core::errors::{GwError, Result};
use crate::daemon::aggregator::{DashboardSnapshot, StatusAggregator};

/// A subscriber's end of the broadcast.
#[derive(Debug)]
pub struct Subscription {
    id: u64,
    receiver: Receiver<Arc<DashboardSnapshot>>,
}

impl Subscription {
    #[must_use]
    pub const fn id(&self) -> u64 {
        self.id
    }

    #[must_use]
    pub const fn receiver(&self) -> &Receiver<Arc<DashboardSnapshot>> {
        &self.receiver
    }

    /// Wait up to `timeout` for the next snapshot.
    ///
    /// # Errors
    /// `ChannelClosed` once the broadcaster is gone, `Runtime` on timeout.
    pub fn recv_timeout(&self, timeout: Duration) -> Result<Arc<DashboardSnapshot>> {
        self.receiver.recv_timeout(timeout).map_err(|err| match err {
            RecvTimeoutError::Disconnected => GwError::ChannelClosed {
                component: "broadcast subscription",
            },
            RecvTimeoutError::Timeout => GwError::Runtime {
                details: format!("no snapshot within {timeout:?}"),
            },
        })
    }
}

/// Outcome of one fan-out.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct PublishReport {
    pub delivered: usize,
    pub skipped: usize,
    pub removed: usize,
}

/// Registry of subscriber channels.
#[derive(Debug)]
pub struct SubscriberHub {
    subscribers: Mutex<Vec<(u64, Sender<Arc<DashboardSnapshot>>)>>,
    next_id: AtomicU64,
    capacity: usize,
}

impl SubscriberHub {
    /// Hub whose subscriber channels hold up to `capacity` snapshots.
    #[must_use]
    pub fn new(capacity: usize) -> Self {
        Self {
            subscribers: Mutex::new(Vec::new()),
            next_id: AtomicU64::new(1),
            capacity: capacity.max(1),
        }
    }

    /// Register a subscriber whose channel already holds `initial`.
    pub fn subscribe(&self, initial: Option<Arc<DashboardSnapshot>>) -> Subscription {
        let (tx, rx) = crossbeam_channel::bounded(self.capacity);
        if let Some(snapshot) = initial {
            // Fresh channel with capacity >= 1: cannot be full.
            let _ = tx.try_send(snapshot);
        }
        let id = self.next_id.fetch_add(1, Ordering::Relaxed);
        self.subscribers.lock().push((id, tx));
        debug!(id, "subscriber added");
        Subscription { id, receiver: rx }
    }

    pub fn unsubscribe(&self, id: u64) -> bool {
        let mut subscribers = self.subscribers.lock();
        let before = subscribers.len();
        subscribers.retain(|(sid, _)| *sid != id);
        before != subscribers.len()
    }

    #[must_use]
    pub fn len(&self) -> usize {
        self.subscribers.lock().len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Offer `snapshot` to every subscriber without blocking.
    pub fn publish(&self, snapshot: &Arc<DashboardSnapshot>) -> PublishReport {
        let mut report = PublishReport::default();
        self.subscribers.lock().retain(|(id, tx)| match tx.try_send(Arc::clone(snapshot)) {
            Ok(()) => {
                report.delivered += 1;
                true
            }
            Err(TrySendError::Full(_)) => {
                warn!(id, "subscriber lagging; snapshot skipped");
                report.skipped += 1;
                true
            }
            Err(TrySendError::Disconnected(_)) => {
                debug!(id, "subscriber gone");
                report.removed += 1;
                false
            }
        });
        report
    }
}

/// Background loop recomputing and publishing a snapshot every interval.
#[derive(Debug)]
pub struct BroadcastLoop {
    hub: Arc<SubscriberHub>,
    aggregator: Arc<StatusAggregator>,
    stop_tx: Option<Sender<()>>,
    handle: Option<JoinHandle<()>>,
}

impl BroadcastLoop {
    /// Spawn the loop. The first publication happens one interval after start.
    ///
    /// # Errors
    /// `ThreadSpawn` when the thread cannot be created.
    pub fn start(aggregator: Arc<StatusAggregator>, config: &BroadcastConfig) -> Result<Self> {
        let hub = Arc::new(SubscriberHub::new(config.subscriber_capacity));
        let (stop_tx, stop_rx) = crossbeam_channel::bounded::<()>(1);
        let interval = config.interval();

        let loop_hub = Arc::clone(&hub);
        let loop_aggregator = Arc::clone(&aggregator);
        let handle = thread::Builder::new()
            .name("gwmon-broadcast".to_string())
            .spawn(move || {
                loop {
                    match stop_rx.recv_timeout(interval) {
                        Err(RecvTimeoutError::Timeout) => {}
                        Ok(()) | Err(RecvTimeoutError::Disconnected) => break,
                    }
                    if loop_hub.is_empty() {
                        continue;
                    }
                    let snapshot = loop_aggregator.snapshot();
                    let report = loop_hub.publish(&snapshot);
                    debug!(
                        delivered = report.delivered,
                        skipped = report.skipped,
                        removed = report.removed,
                        "broadcast tick"
                    );
                }
                debug!("broadcast loop stopped");
            })
            .map_err(|source| GwError::ThreadSpawn {
                name: "gwmon-broadcast",
                source,
            })?;

        Ok(Self {
            hub,
            aggregator,
            stop_tx: Some(stop_tx),
            handle: Some(handle),
        })
    }

    /// Subscribe and receive the current snapshot immediately.
    #[must_use]
    pub fn subscribe(&self) -> Subscription {
        self.hub.subscribe(Some(self.aggregator.snapshot()))
    }

    pub fn unsubscribe(&self, subscription: &Subscription) -> bool {
        self.hub.unsubscribe(subscription.id())
    }

    #[must_use]
    pub fn hub(&self) -> Arc<SubscriberHub> {
        Arc::clone(&self.hub)
    }

    /// Stop the loop and join its thread.
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

impl Drop for BroadcastLoop {
    fn drop(&mut self) {
        self.shutdown();
    }
}
