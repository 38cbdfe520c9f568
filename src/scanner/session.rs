//! Session requests, handles, and shared per-session control state.

use super::error::ScanError;
use super::events::{RetryPass, ScanEvent, ScanMode, SessionKind, SessionOutcome, SessionSummary};
use crate::config::Config;
use parking_lot::Mutex;
use std::collections::HashSet;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;
use streamsweep_common::{RecordUpdate, ScanRecord};
use streamsweep_probe::RequestHeaders;
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;
use uuid::Uuid;

/// Engine tuning, normally built from [`Config`].
#[derive(Debug, Clone)]
pub struct EngineSettings {
    pub workers: usize,
    pub timeout: Duration,
    pub batch_size: usize,
    /// Queue capacity; the producer waits while the queue is full.
    pub queue_high_water: usize,
    pub progress_interval: Duration,
    /// Wait for workers after a cancel before warning about them.
    pub join_window: Duration,
    /// Wait after which remaining workers are aborted.
    pub abandon_after: Duration,
    /// Headers used when a request does not bring its own.
    pub headers: RequestHeaders,
}

impl Default for EngineSettings {
    fn default() -> Self {
        Self::from_config(&Config::default())
    }
}

impl EngineSettings {
    pub fn from_config(config: &Config) -> Self {
        let scanner = &config.scanner;
        Self {
            workers: scanner.workers,
            timeout: scanner.timeout(),
            batch_size: scanner.batch_size,
            queue_high_water: scanner.queue_high_water,
            progress_interval: Duration::from_millis(scanner.progress_interval_ms),
            join_window: Duration::from_millis(scanner.join_window_ms),
            abandon_after: Duration::from_millis(scanner.abandon_after_ms),
            headers: RequestHeaders {
                user_agent: config.probe.user_agent.clone(),
                referer: config.probe.referer.clone(),
            },
        }
    }
}

/// Start a scan over an address template.
#[derive(Debug, Clone, Default)]
pub struct ScanRequest {
    pub template: String,
    pub mode: ScanMode,
    pub workers: Option<usize>,
    pub timeout: Option<Duration>,
    pub headers: Option<RequestHeaders>,
}

impl ScanRequest {
    pub fn new(template: impl Into<String>) -> Self {
        Self {
            template: template.into(),
            ..Default::default()
        }
    }

    pub fn append(mut self) -> Self {
        self.mode = ScanMode::Append;
        self
    }

    pub fn with_workers(mut self, workers: usize) -> Self {
        self.workers = Some(workers);
        self
    }

    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = Some(timeout);
        self
    }

    pub fn with_headers(mut self, headers: RequestHeaders) -> Self {
        self.headers = Some(headers);
        self
    }
}

/// Re-probe an explicit list of existing addresses.
#[derive(Debug, Clone, Default)]
pub struct ValidationRequest {
    pub addresses: Vec<String>,
    pub workers: Option<usize>,
    pub timeout: Option<Duration>,
    pub headers: Option<RequestHeaders>,
}

impl ValidationRequest {
    pub fn new(addresses: impl IntoIterator<Item = impl Into<String>>) -> Self {
        Self {
            addresses: addresses.into_iter().map(Into::into).collect(),
            ..Default::default()
        }
    }

    pub fn with_workers(mut self, workers: usize) -> Self {
        self.workers = Some(workers);
        self
    }

    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = Some(timeout);
        self
    }
}

/// Re-probe previously failed addresses, optionally until nothing new turns up.
#[derive(Debug, Clone, Default)]
pub struct RetryRequest {
    pub addresses: Vec<String>,
    pub loop_mode: bool,
    pub workers: Option<usize>,
    pub timeout: Option<Duration>,
    pub headers: Option<RequestHeaders>,
}

impl RetryRequest {
    pub fn new(addresses: impl IntoIterator<Item = impl Into<String>>) -> Self {
        Self {
            addresses: addresses.into_iter().map(Into::into).collect(),
            ..Default::default()
        }
    }

    pub fn looping(mut self) -> Self {
        self.loop_mode = true;
        self
    }

    pub fn with_workers(mut self, workers: usize) -> Self {
        self.workers = Some(workers);
        self
    }

    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = Some(timeout);
        self
    }
}

/// Trimmed, non-empty, first occurrence only.
pub(crate) fn clean_addresses(addresses: Vec<String>) -> Vec<String> {
    let mut seen = HashSet::new();
    addresses
        .into_iter()
        .map(|a| a.trim().to_string())
        .filter(|a| !a.is_empty() && seen.insert(a.clone()))
        .collect()
}

/// State shared by a session's driver, its workers, and its handles.
#[derive(Debug)]
pub(crate) struct SessionControl {
    pub(crate) id: Uuid,
    pub(crate) token: CancellationToken,
    cancel_requested: AtomicBool,
    queue: Mutex<Option<flume::Receiver<String>>>,
    abort: Mutex<Option<ScanError>>,
}

impl SessionControl {
    pub(crate) fn new() -> Arc<Self> {
        Arc::new(Self {
            id: Uuid::new_v4(),
            token: CancellationToken::new(),
            cancel_requested: AtomicBool::new(false),
            queue: Mutex::new(None),
            abort: Mutex::new(None),
        })
    }

    /// `true` on the first call only.
    pub(crate) fn request_cancel(&self) -> bool {
        !self.cancel_requested.swap(true, Ordering::SeqCst)
    }

    pub(crate) fn set_queue(&self, queue: Option<flume::Receiver<String>>) {
        *self.queue.lock() = queue;
    }

    /// Discard everything still queued. Returns how many addresses were dropped.
    pub(crate) fn drain_queue(&self) -> usize {
        self.queue.lock().as_ref().map_or(0, |queue| queue.drain().count())
    }

    /// Record the first resource failure and stop the session.
    pub(crate) fn abort(&self, error: ScanError) {
        {
            let mut abort = self.abort.lock();
            if abort.is_none() {
                *abort = Some(error);
            }
        }
        self.token.cancel();
    }

    pub(crate) fn outcome(&self) -> SessionOutcome {
        if let Some(error) = self.abort.lock().as_ref() {
            return SessionOutcome::Aborted(error.to_string());
        }
        if self.token.is_cancelled() {
            SessionOutcome::Cancelled
        } else {
            SessionOutcome::Completed
        }
    }
}

/// Identifies a running (or finished) session; pass to
/// [`ScanEngine::cancel`](super::ScanEngine::cancel).
#[derive(Debug, Clone)]
pub struct SessionHandle {
    pub(crate) kind: SessionKind,
    pub(crate) control: Arc<SessionControl>,
}

impl SessionHandle {
    pub fn id(&self) -> Uuid {
        self.control.id
    }

    pub fn kind(&self) -> SessionKind {
        self.kind
    }

    pub fn is_cancelled(&self) -> bool {
        self.control.token.is_cancelled()
    }
}

/// A started session: its handle plus the event stream.
///
/// `events` yields `None` once the session has completed and every
/// enrichment task it spawned has finished.
#[derive(Debug)]
pub struct ScanSession {
    pub handle: SessionHandle,
    pub events: mpsc::UnboundedReceiver<ScanEvent>,
}

/// Everything a session emitted, gathered by [`ScanSession::collect`].
#[derive(Debug, Default)]
pub struct SessionReport {
    pub records: Vec<ScanRecord>,
    pub updates: Vec<RecordUpdate>,
    pub progress: Vec<(u64, u64)>,
    pub retry_passes: Vec<RetryPass>,
    pub summary: Option<SessionSummary>,
}

impl SessionReport {
    /// Records with every matching update applied.
    pub fn merged_records(&self) -> Vec<ScanRecord> {
        let mut records = self.records.clone();
        for update in &self.updates {
            if let Some(record) = records.iter_mut().find(|r| r.address == update.address) {
                record.apply(update);
            }
        }
        records
    }
}

impl ScanSession {
    pub fn id(&self) -> Uuid {
        self.handle.id()
    }

    /// Drain the event stream to the end.
    pub async fn collect(mut self) -> SessionReport {
        let mut report = SessionReport::default();
        while let Some(event) = self.events.recv().await {
            match event {
                ScanEvent::Record(record) => report.records.push(record),
                ScanEvent::RecordUpdated(update) => report.updates.push(update),
                ScanEvent::Progress { current, total } => report.progress.push((current, total)),
                ScanEvent::RetryPassCompleted(pass) => report.retry_passes.push(pass),
                ScanEvent::Completed(summary) => report.summary = Some(summary),
                ScanEvent::Started { .. } | ScanEvent::Stats(_) => {}
            }
        }
        report
    }
}
