//! The scan engine: session lifecycle, pass driver, and retry loop.

use super::error::{Result, ScanError};
use super::events::{RetryPass, ScanEvent, ScanMode, SessionKind, SessionOutcome, SessionSummary};
use super::retry::{FailedSet, RetryState};
use super::session::{
    clean_addresses, EngineSettings, RetryRequest, ScanRequest, ScanSession, SessionControl,
    SessionHandle, ValidationRequest,
};
use super::stats::StatsTracker;
use super::worker::{produce, run_worker, PassContext, PassSource};
use crate::identity::IdentityResolver;
use parking_lot::Mutex;
use serde::Serialize;
use std::fmt;
use std::sync::Arc;
use std::time::Duration;
use streamsweep_common::AddressTemplate;
use streamsweep_probe::{ProbeOptions, Prober, RequestHeaders};
use tokio::sync::{mpsc, Semaphore};
use tokio::task::JoinSet;
use tokio::time::MissedTickBehavior;

/// Engine lifecycle. A cancelled session passes through `Draining` while its
/// workers wind down; the engine accepts new sessions only when `Idle`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum EngineState {
    Idle,
    Running,
    Draining,
}

impl fmt::Display for EngineState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Idle => f.write_str("idle"),
            Self::Running => f.write_str("running"),
            Self::Draining => f.write_str("draining"),
        }
    }
}

enum SessionPlan {
    Scan {
        template: AddressTemplate,
        mode: ScanMode,
    },
    Validation {
        addresses: Vec<String>,
    },
    Retry {
        addresses: Vec<String>,
        loop_mode: bool,
    },
}

/// Per-session knobs resolved from a request and the engine defaults.
struct SessionParams {
    workers: usize,
    options: ProbeOptions,
}

struct EngineInner {
    prober: Arc<dyn Prober>,
    resolver: Arc<IdentityResolver>,
    settings: EngineSettings,
    state: Mutex<EngineState>,
    active: Mutex<Option<Arc<SessionControl>>>,
    failed: Arc<Mutex<FailedSet>>,
    retry: Mutex<RetryState>,
}

/// Orchestrates scan, validation, and retry sessions, one at a time.
///
/// Sessions run on the Tokio runtime: one producer feeds a bounded queue, a
/// fixed worker pool probes addresses, and a monitor loop reports progress
/// and detects completion. Events arrive on the session's channel.
///
/// ```rust,ignore
/// let engine = ScanEngine::new(prober, resolver, EngineSettings::default());
/// let mut session = engine.start_scan(ScanRequest::new("http://10.0.0.[1-254]:8080/live"))?;
/// while let Some(event) = session.events.recv().await {
///     // ...
/// }
/// ```
#[derive(Clone)]
pub struct ScanEngine {
    inner: Arc<EngineInner>,
}

impl ScanEngine {
    pub fn new(prober: Arc<dyn Prober>, resolver: Arc<IdentityResolver>, settings: EngineSettings) -> Self {
        Self {
            inner: Arc::new(EngineInner {
                prober,
                resolver,
                settings,
                state: Mutex::new(EngineState::Idle),
                active: Mutex::new(None),
                failed: Arc::new(Mutex::new(FailedSet::default())),
                retry: Mutex::new(RetryState::default()),
            }),
        }
    }

    pub fn state(&self) -> EngineState {
        *self.inner.state.lock()
    }

    pub fn settings(&self) -> &EngineSettings {
        &self.inner.settings
    }

    pub fn resolver(&self) -> &Arc<IdentityResolver> {
        &self.inner.resolver
    }

    /// Start a fresh or append scan over a template.
    ///
    /// # Errors
    ///
    /// Template errors are returned here, before anything is queued.
    pub fn start_scan(&self, request: ScanRequest) -> Result<ScanSession> {
        let template = AddressTemplate::parse(&request.template)?;
        let params = self.params(request.workers, request.timeout, request.headers)?;
        let mode = request.mode;
        self.start(SessionKind::Scan { mode }, params, SessionPlan::Scan { template, mode })
    }

    /// Re-probe an explicit address list.
    pub fn start_validation(&self, request: ValidationRequest) -> Result<ScanSession> {
        let params = self.params(request.workers, request.timeout, request.headers)?;
        let addresses = clean_addresses(request.addresses);
        self.start(SessionKind::Validation, params, SessionPlan::Validation { addresses })
    }

    /// Re-probe failed addresses. In loop mode the still-failing subset is
    /// requeued until an iteration produces no new valid address.
    pub fn start_retry(&self, request: RetryRequest) -> Result<ScanSession> {
        let params = self.params(request.workers, request.timeout, request.headers)?;
        let addresses = clean_addresses(request.addresses);
        let loop_mode = request.loop_mode;
        self.start(
            SessionKind::Retry { loop_mode },
            params,
            SessionPlan::Retry { addresses, loop_mode },
        )
    }

    /// Cancel a session. Idempotent and non-blocking: stops the workers,
    /// empties the queue, and kills in-flight probes, then returns while the
    /// session winds down in the background.
    pub fn cancel(&self, handle: &SessionHandle) {
        let active = self.inner.active.lock();
        let is_active = active
            .as_ref()
            .is_some_and(|control| Arc::ptr_eq(control, &handle.control));
        if !is_active || !handle.control.request_cancel() {
            return;
        }

        handle.control.token.cancel();
        let drained = handle.control.drain_queue();
        let killed = self.inner.prober.terminate_all();
        *self.inner.state.lock() = EngineState::Draining;

        tracing::info!(session = %handle.id(), drained, killed, "Session cancelled");
    }

    pub fn retry_state(&self) -> RetryState {
        self.inner.retry.lock().clone()
    }

    /// End the retry session; the iteration counter starts over.
    pub fn close_retry_session(&self) {
        *self.inner.retry.lock() = RetryState::default();
    }

    /// Addresses that failed in the last pass.
    pub fn failed_addresses(&self) -> Vec<String> {
        self.inner.failed.lock().addresses()
    }

    /// Failed addresses whose error kind the prober considers worth retrying.
    pub fn retry_candidates(&self) -> Vec<String> {
        let prober = &self.inner.prober;
        self.inner.failed.lock().matching(|kind| prober.is_retryable(kind))
    }

    fn params(
        &self,
        workers: Option<usize>,
        timeout: Option<Duration>,
        headers: Option<RequestHeaders>,
    ) -> Result<SessionParams> {
        let settings = &self.inner.settings;
        let workers = workers.unwrap_or(settings.workers);
        if workers == 0 {
            return Err(ScanError::InvalidRequest("worker count must be at least 1".to_string()));
        }
        let timeout = timeout.unwrap_or(settings.timeout);
        if timeout.is_zero() {
            return Err(ScanError::InvalidRequest("timeout must be positive".to_string()));
        }
        Ok(SessionParams {
            workers,
            options: ProbeOptions {
                timeout,
                headers: headers.unwrap_or_else(|| settings.headers.clone()),
            },
        })
    }

    fn start(&self, kind: SessionKind, params: SessionParams, plan: SessionPlan) -> Result<ScanSession> {
        let control = {
            let mut active = self.inner.active.lock();
            let mut state = self.inner.state.lock();
            if *state != EngineState::Idle {
                return Err(ScanError::Busy(*state));
            }
            let control = SessionControl::new();
            *state = EngineState::Running;
            *active = Some(Arc::clone(&control));
            control
        };

        let (events, receiver) = mpsc::unbounded_channel();
        tracing::info!(session = %control.id, kind = %kind, workers = params.workers, "Session started");

        let inner = Arc::clone(&self.inner);
        let driver_control = Arc::clone(&control);
        tokio::spawn(async move {
            inner.drive(driver_control, kind, params, plan, events).await;
        });

        Ok(ScanSession {
            handle: SessionHandle { kind, control },
            events: receiver,
        })
    }
}

/// Counts from one pass.
struct PassReport {
    attempted: u64,
    valid: u64,
}

impl EngineInner {
    async fn drive(
        self: Arc<Self>,
        control: Arc<SessionControl>,
        kind: SessionKind,
        params: SessionParams,
        plan: SessionPlan,
        events: mpsc::UnboundedSender<ScanEvent>,
    ) {
        let _ = events.send(ScanEvent::Started {
            session: control.id,
            kind,
        });

        let stats = Arc::new(StatsTracker::new());
        let mut passes = 1;

        match plan {
            SessionPlan::Scan { template, mode } => {
                if mode == ScanMode::Fresh {
                    self.failed.lock().clear();
                }
                self.run_pass(&control, &stats, &params, &events, PassSource::Template(template), false)
                    .await;
            }
            SessionPlan::Validation { addresses } => {
                self.failed.lock().clear();
                self.run_pass(&control, &stats, &params, &events, PassSource::List(addresses), true)
                    .await;
            }
            SessionPlan::Retry {
                mut addresses,
                loop_mode,
            } => {
                passes = 0;
                loop {
                    let iteration = self.retry.lock().begin_iteration(&addresses);
                    self.failed.lock().clear();

                    let report = self
                        .run_pass(&control, &stats, &params, &events, PassSource::List(addresses), false)
                        .await;
                    passes += 1;

                    let attempted = report.attempted as usize;
                    let still_failing = self.failed.lock().addresses();
                    let new_valid = {
                        let mut retry = self.retry.lock();
                        retry.finish_iteration(report.valid, &still_failing);
                        retry.new_valid()
                    };

                    tracing::info!(
                        session = %control.id,
                        iteration,
                        attempted,
                        new_valid,
                        still_failing = still_failing.len(),
                        "Retry pass completed"
                    );
                    let _ = events.send(ScanEvent::RetryPassCompleted(RetryPass {
                        iteration,
                        attempted,
                        new_valid,
                        still_failing: still_failing.len(),
                    }));

                    if control.token.is_cancelled() || !loop_mode || new_valid == 0 {
                        break;
                    }
                    addresses = still_failing;
                }

                if loop_mode && !control.token.is_cancelled() {
                    *self.retry.lock() = RetryState::default();
                }
            }
        }

        let outcome = control.outcome();
        let summary = SessionSummary {
            session: control.id,
            kind,
            outcome,
            stats: stats.snapshot(),
            passes,
            failed: self.failed.lock().len(),
        };

        {
            let mut active = self.active.lock();
            if active.as_ref().is_some_and(|c| Arc::ptr_eq(c, &control)) {
                *active = None;
            }
            *self.state.lock() = EngineState::Idle;
        }

        match &summary.outcome {
            SessionOutcome::Aborted(reason) => {
                tracing::error!(session = %control.id, reason = %reason, "Session aborted");
            }
            outcome => {
                tracing::info!(session = %control.id, outcome = ?outcome, stats = %summary.stats, "Session finished");
            }
        }
        let _ = events.send(ScanEvent::Completed(summary));
    }

    async fn run_pass(
        &self,
        control: &Arc<SessionControl>,
        stats: &Arc<StatsTracker>,
        params: &SessionParams,
        events: &mpsc::UnboundedSender<ScanEvent>,
        source: PassSource,
        emit_invalid: bool,
    ) -> PassReport {
        let before = stats.snapshot();

        let (sender, queue) = flume::bounded(self.settings.queue_high_water.max(1));
        control.set_queue(Some(queue.clone()));

        let ctx = Arc::new(PassContext {
            prober: Arc::clone(&self.prober),
            resolver: Arc::clone(&self.resolver),
            options: params.options.clone(),
            stats: Arc::clone(stats),
            failed: Arc::clone(&self.failed),
            control: Arc::clone(control),
            events: events.clone(),
            enrich_slots: Arc::new(Semaphore::new(params.workers.max(1))),
            emit_invalid,
        });

        let producer = tokio::spawn(produce(
            source,
            self.settings.batch_size.max(1),
            sender,
            Arc::clone(stats),
            Arc::clone(control),
        ));

        let mut workers = JoinSet::new();
        for id in 0..params.workers {
            workers.spawn(run_worker(id, Arc::clone(&ctx), queue.clone()));
        }
        drop(queue);

        let mut ticker = tokio::time::interval(self.settings.progress_interval);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Skip);
        let mut last = None;

        loop {
            tokio::select! {
                joined = workers.join_next() => match joined {
                    Some(Err(e)) if e.is_panic() => {
                        tracing::error!(session = %control.id, error = %e, "Worker panicked");
                    }
                    Some(_) => {}
                    None => break,
                },
                _ = control.token.cancelled() => break,
                _ = ticker.tick() => {
                    emit_progress(stats, events, &mut last, true);
                }
                _ = stats.changed() => {
                    emit_progress(stats, events, &mut last, false);
                }
            }
        }

        if control.token.is_cancelled() {
            producer.abort();
            self.mark_draining(control);
            self.join_bounded(control, &mut workers).await;
        } else if let Err(e) = producer.await {
            tracing::error!(session = %control.id, error = %e, "Producer task failed");
        }
        control.set_queue(None);

        emit_progress(stats, events, &mut last, false);
        let after = stats.snapshot();
        let _ = events.send(ScanEvent::Stats(after.clone()));

        PassReport {
            attempted: after.total - before.total,
            valid: after.valid - before.valid,
        }
    }

    fn mark_draining(&self, control: &Arc<SessionControl>) {
        let active = self.active.lock();
        if active.as_ref().is_some_and(|c| Arc::ptr_eq(c, control)) {
            *self.state.lock() = EngineState::Draining;
        }
    }

    /// Give workers `join_window` to exit, then up to `abandon_after` in
    /// total before aborting whatever is left.
    async fn join_bounded(&self, control: &SessionControl, workers: &mut JoinSet<()>) {
        let join_window = self.settings.join_window;
        if join_within(workers, join_window).await {
            return;
        }
        tracing::warn!(session = %control.id, remaining = workers.len(), "Workers still running after cancel");

        let rest = self.settings.abandon_after.saturating_sub(join_window);
        if join_within(workers, rest).await {
            return;
        }
        tracing::warn!(session = %control.id, remaining = workers.len(), "Abandoning workers");
        workers.abort_all();
        workers.detach_all();
    }
}

/// `true` when every task finished within `wait`.
async fn join_within(workers: &mut JoinSet<()>, wait: Duration) -> bool {
    tokio::time::timeout(wait, async { while workers.join_next().await.is_some() {} })
        .await
        .is_ok()
}

fn emit_progress(
    stats: &StatsTracker,
    events: &mpsc::UnboundedSender<ScanEvent>,
    last: &mut Option<(u64, u64)>,
    force: bool,
) {
    let progress = stats.progress();
    if force || *last != Some(progress) {
        *last = Some(progress);
        let (current, total) = progress;
        let _ = events.send(ScanEvent::Progress { current, total });
        if force {
            let _ = events.send(ScanEvent::Stats(stats.snapshot()));
        }
    }
}
