//! Registry of in-flight probe processes.

use parking_lot::Mutex;
use std::collections::HashMap;
use std::sync::Arc;
use std::time::Instant;
use tokio_util::sync::CancellationToken;

struct ProcessEntry {
    pid: Option<u32>,
    started: Instant,
    token: CancellationToken,
}

#[derive(Default)]
struct TableInner {
    next_id: u64,
    entries: HashMap<u64, ProcessEntry>,
}

/// Table of every process spawned by a [`ProcessRunner`](crate::ProcessRunner).
///
/// Each registration hands out a [`ProcessGuard`] whose token the owning
/// task watches while it waits on the child. [`terminate_all`](Self::terminate_all)
/// fires every token; the owning task then kills and reaps its child.
/// Children are also spawned with `kill_on_drop`, so a task that is aborted
/// outright still takes its process down with it.
#[derive(Default)]
pub struct ProcessTable {
    inner: Mutex<TableInner>,
}

impl ProcessTable {
    /// Create an empty table.
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    /// Register a freshly spawned process.
    pub fn register(self: &Arc<Self>, pid: Option<u32>) -> ProcessGuard {
        let token = CancellationToken::new();
        let mut inner = self.inner.lock();
        inner.next_id += 1;
        let id = inner.next_id;
        inner.entries.insert(
            id,
            ProcessEntry {
                pid,
                started: Instant::now(),
                token: token.clone(),
            },
        );

        ProcessGuard {
            table: Arc::clone(self),
            id,
            token,
        }
    }

    /// Signal every registered process to be killed. Returns how many were signalled.
    pub fn terminate_all(&self) -> usize {
        let entries: Vec<ProcessEntry> = {
            let mut inner = self.inner.lock();
            inner.entries.drain().map(|(_, entry)| entry).collect()
        };

        for entry in &entries {
            tracing::debug!(
                pid = ?entry.pid,
                running_ms = entry.started.elapsed().as_millis() as u64,
                "Terminating probe process"
            );
            entry.token.cancel();
        }

        entries.len()
    }

    /// Number of processes currently registered.
    pub fn active_count(&self) -> usize {
        self.inner.lock().entries.len()
    }

    fn deregister(&self, id: u64) {
        self.inner.lock().entries.remove(&id);
    }
}

/// Registration handle for one process; deregisters on drop.
pub struct ProcessGuard {
    table: Arc<ProcessTable>,
    id: u64,
    token: CancellationToken,
}

impl ProcessGuard {
    /// Resolves once the table asked for this process to be killed.
    pub async fn cancelled(&self) {
        self.token.cancelled().await
    }

    /// Whether termination was requested.
    pub fn is_cancelled(&self) -> bool {
        self.token.is_cancelled()
    }
}

impl Drop for ProcessGuard {
    fn drop(&mut self) {
        self.table.deregister(self.id);
    }
}
