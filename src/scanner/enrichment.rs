//! Deep probe and identity resolution for records already reported valid.

use super::events::ScanEvent;
use super::worker::PassContext;
use std::sync::Arc;
use streamsweep_common::{RecordUpdate, TechMetadata};

/// Enrich one record in the background. The task holds an event sender, so
/// the session's event stream stays open until it finishes. At most one task
/// per worker runs at a time; the rest wait for a slot.
pub(crate) fn spawn(ctx: Arc<PassContext>, address: String, raw_name: String) {
    tokio::spawn(async move {
        tokio::select! {
            biased;
            _ = ctx.control.token.cancelled() => {}
            _ = enrich_in_slot(&ctx, address, raw_name) => {}
        }
    });
}

async fn enrich_in_slot(ctx: &PassContext, address: String, raw_name: String) {
    let Ok(_slot) = ctx.enrich_slots.acquire().await else {
        return;
    };
    enrich(ctx, address, raw_name).await;
}

async fn enrich(ctx: &PassContext, address: String, address_name: String) {
    let metadata = match ctx.prober.inspect(&address, &ctx.options).await {
        Ok(Some(metadata)) => metadata,
        Ok(None) => TechMetadata::default(),
        Err(e) => {
            tracing::warn!(session = %ctx.session(), address = %address, error = %e, "Metadata probe could not run");
            TechMetadata::default()
        }
    };

    let raw_name = metadata
        .service_name
        .clone()
        .filter(|name| !name.trim().is_empty())
        .unwrap_or(address_name);

    // Resolution writes fingerprint history to the store.
    let resolver = Arc::clone(&ctx.resolver);
    let resolved = tokio::task::spawn_blocking(move || {
        let identity = resolver.resolve(&raw_name, &address, &metadata);
        let fingerprint = resolver.fingerprint(&address, &metadata);
        RecordUpdate {
            address,
            raw_name,
            identity,
            metadata,
            fingerprint,
        }
    })
    .await;

    match resolved {
        Ok(update) => {
            tracing::debug!(
                session = %ctx.session(),
                address = %update.address,
                name = %update.identity.standard_name,
                "Record enriched"
            );
            ctx.emit(ScanEvent::RecordUpdated(update));
        }
        Err(e) => {
            tracing::warn!(session = %ctx.session(), error = %e, "Identity resolution task failed");
        }
    }
}
