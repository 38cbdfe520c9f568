//! Queue producer and the per-address worker step.

use super::enrichment;
use super::error::ScanError;
use super::events::ScanEvent;
use super::retry::FailedSet;
use super::session::SessionControl;
use super::stats::StatsTracker;
use crate::identity::{name_from_address, IdentityResolver};
use parking_lot::Mutex;
use std::sync::Arc;
use streamsweep_common::{AddressTemplate, ScanRecord};
use streamsweep_probe::{ErrorKind, ProbeOptions, ProbeOutcome, Prober};
use tokio::sync::{mpsc, Semaphore};
use uuid::Uuid;

/// Addresses a pass runs over.
#[derive(Debug)]
pub(crate) enum PassSource {
    Template(AddressTemplate),
    List(Vec<String>),
}

/// Everything a worker or enrichment task needs; one per pass.
pub(crate) struct PassContext {
    pub(crate) prober: Arc<dyn Prober>,
    pub(crate) resolver: Arc<IdentityResolver>,
    pub(crate) options: ProbeOptions,
    pub(crate) stats: Arc<StatsTracker>,
    pub(crate) failed: Arc<Mutex<FailedSet>>,
    pub(crate) control: Arc<SessionControl>,
    pub(crate) events: mpsc::UnboundedSender<ScanEvent>,
    /// Enrichment tasks allowed to run at once.
    pub(crate) enrich_slots: Arc<Semaphore>,
    /// Validation passes also report invalid records.
    pub(crate) emit_invalid: bool,
}

impl PassContext {
    pub(crate) fn session(&self) -> Uuid {
        self.control.id
    }

    pub(crate) fn emit(&self, event: ScanEvent) {
        // The subscriber may have gone away; the session still runs to the end.
        let _ = self.events.send(event);
    }
}

/// Feed the queue from `source`. Waits while the queue is full and stops on
/// cancellation. Returns the number of addresses enqueued.
pub(crate) async fn produce(
    source: PassSource,
    batch_size: usize,
    queue: flume::Sender<String>,
    stats: Arc<StatsTracker>,
    control: Arc<SessionControl>,
) -> u64 {
    let mut sent = 0;
    match source {
        PassSource::Template(template) => {
            for batch in template.batches(batch_size) {
                for address in batch {
                    if !enqueue(&queue, &stats, &control, address).await {
                        return sent;
                    }
                    sent += 1;
                }
                tracing::trace!(session = %control.id, enqueued = sent, "Batch enqueued");
            }
        }
        PassSource::List(addresses) => {
            for address in addresses {
                if !enqueue(&queue, &stats, &control, address).await {
                    return sent;
                }
                sent += 1;
            }
        }
    }
    sent
}

async fn enqueue(
    queue: &flume::Sender<String>,
    stats: &StatsTracker,
    control: &SessionControl,
    address: String,
) -> bool {
    // Counted first so a worker can never finish an address that is not in the total.
    stats.enqueued();
    let accepted = tokio::select! {
        biased;
        _ = control.token.cancelled() => false,
        sent = queue.send_async(address) => sent.is_ok(),
    };
    if !accepted {
        stats.unenqueued();
    }
    accepted
}

/// Pull addresses until the queue closes or the session is cancelled.
pub(crate) async fn run_worker(id: usize, ctx: Arc<PassContext>, queue: flume::Receiver<String>) {
    loop {
        let address = tokio::select! {
            biased;
            _ = ctx.control.token.cancelled() => break,
            next = queue.recv_async() => match next {
                Ok(address) => address,
                Err(_) => break,
            },
        };
        probe_address(&ctx, address).await;
    }
    tracing::trace!(session = %ctx.session(), worker = id, "Worker exited");
}

async fn probe_address(ctx: &Arc<PassContext>, address: String) {
    let raw_name = name_from_address(&address);

    match ctx.prober.probe(&address, &ctx.options).await {
        Ok(ProbeOutcome::Valid { latency_ms }) => {
            ctx.stats.record(true);
            ctx.failed.lock().remove(&address);
            tracing::debug!(session = %ctx.session(), address = %address, latency_ms, "Stream valid");

            ctx.emit(ScanEvent::Record(ScanRecord::provisional(
                address.clone(),
                raw_name.clone(),
                latency_ms,
            )));
            enrichment::spawn(Arc::clone(ctx), address, raw_name);
        }
        Ok(ProbeOutcome::Invalid {
            kind: ErrorKind::Cancelled,
            ..
        }) if ctx.control.token.is_cancelled() => {
            tracing::trace!(session = %ctx.session(), address = %address, "Probe killed by cancellation");
        }
        Ok(ProbeOutcome::Invalid {
            latency_ms,
            kind,
            reason,
        }) => {
            ctx.stats.record(false);
            ctx.failed.lock().insert(address.clone(), kind);
            tracing::debug!(session = %ctx.session(), address = %address, kind = %kind, reason = %reason, "Stream invalid");

            if ctx.emit_invalid {
                ctx.emit(ScanEvent::Record(ScanRecord::invalid(
                    address, raw_name, latency_ms, reason,
                )));
            }
        }
        Err(e) => {
            tracing::error!(session = %ctx.session(), address = %address, error = %e, "Probe could not run, aborting session");
            ctx.control.abort(ScanError::Resource { address, source: e });
            ctx.prober.terminate_all();
        }
    }
}
