//! Session statistics behind a single lock.

use parking_lot::Mutex;
use streamsweep_common::ScanStats;
use tokio::sync::Notify;

/// Shared counters for one session.
///
/// Every update happens under one mutex and wakes the progress monitor.
/// `total` is incremented before an address is handed to the queue, so
/// `valid + invalid <= total` holds at every observation.
#[derive(Debug, Default)]
pub(crate) struct StatsTracker {
    stats: Mutex<ScanStats>,
    changed: Notify,
}

impl StatsTracker {
    pub(crate) fn new() -> Self {
        Self::default()
    }

    pub(crate) fn enqueued(&self) {
        self.stats.lock().total += 1;
    }

    /// Undo [`enqueued`](Self::enqueued) for an address the queue refused.
    pub(crate) fn unenqueued(&self) {
        let mut stats = self.stats.lock();
        stats.total = stats.total.saturating_sub(1);
    }

    /// Record a terminal outcome.
    pub(crate) fn record(&self, valid: bool) {
        {
            let mut stats = self.stats.lock();
            if valid {
                stats.valid += 1;
            } else {
                stats.invalid += 1;
            }
            debug_assert!(stats.completed() <= stats.total);
        }
        self.changed.notify_one();
    }

    pub(crate) fn snapshot(&self) -> ScanStats {
        let mut stats = self.stats.lock().clone();
        stats.touch();
        stats
    }

    /// `(completed, total)`.
    pub(crate) fn progress(&self) -> (u64, u64) {
        let stats = self.stats.lock();
        (stats.completed(), stats.total)
    }

    /// Resolves after the next [`record`](Self::record). Wakeups coalesce.
    pub(crate) async fn changed(&self) {
        self.changed.notified().await;
    }
}
