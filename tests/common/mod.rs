//! Shared test harness for integration tests.
//!
//! Provides [`StubProber`], a scripted [`Prober`] that never spawns a
//! process, and [`TestHarness`], which wires a prober to a [`ScanEngine`]
//! whose resolver is backed by an in-memory mapping store.

#![allow(dead_code)]

use std::collections::HashMap;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use parking_lot::Mutex;
use tokio::sync::Notify;

use streamsweep::identity::{
    IdentityResolver, MappingEntry, MappingTable, MemoryStore, NoRemote, ResolverSettings,
};
use streamsweep::scanner::{EngineSettings, ScanEngine};
use streamsweep_common::TechMetadata;
use streamsweep_probe::{ErrorKind, ProbeOptions, ProbeOutcome, Prober, RequestHeaders};

type Script = dyn Fn(&str, u32) -> Result<ProbeOutcome, streamsweep_probe::Error> + Send + Sync;
type MetadataScript = dyn Fn(&str) -> Option<TechMetadata> + Send + Sync;

/// A prober driven by a closure of `(address, attempt)`, where `attempt`
/// counts probes of that address starting at 1.
pub struct StubProber {
    script: Box<Script>,
    metadata: Box<MetadataScript>,
    delay: Duration,
    inspect_delay: Duration,
    attempts: Mutex<HashMap<String, u32>>,
    in_flight: AtomicUsize,
    max_in_flight: AtomicUsize,
    inspect_in_flight: AtomicUsize,
    max_inspect_in_flight: AtomicUsize,
    terminate_calls: AtomicUsize,
    killed: Notify,
}

impl StubProber {
    pub fn new(script: impl Fn(&str, u32) -> ProbeOutcome + Send + Sync + 'static) -> Self {
        Self::fallible(move |address, attempt| Ok(script(address, attempt)))
    }

    pub fn fallible(
        script: impl Fn(&str, u32) -> Result<ProbeOutcome, streamsweep_probe::Error> + Send + Sync + 'static,
    ) -> Self {
        Self {
            script: Box::new(script),
            metadata: Box::new(|_| None),
            delay: Duration::ZERO,
            inspect_delay: Duration::ZERO,
            attempts: Mutex::new(HashMap::new()),
            in_flight: AtomicUsize::new(0),
            max_in_flight: AtomicUsize::new(0),
            inspect_in_flight: AtomicUsize::new(0),
            max_inspect_in_flight: AtomicUsize::new(0),
            terminate_calls: AtomicUsize::new(0),
            killed: Notify::new(),
        }
    }

    /// Every address is live.
    pub fn all_valid() -> Self {
        Self::new(|_, _| valid())
    }

    /// Addresses are sorted by their trailing number `n`; address `n` turns
    /// valid on attempt `n / per_pass + 1`, so each pass fixes `per_pass`.
    pub fn fixes_per_pass(per_pass: u32) -> Self {
        Self::new(move |address, attempt| {
            let n = trailing_number(address);
            if attempt > n / per_pass {
                valid()
            } else {
                invalid(ErrorKind::Timeout)
            }
        })
    }

    pub fn with_delay(mut self, delay: Duration) -> Self {
        self.delay = delay;
        self
    }

    pub fn with_inspect_delay(mut self, delay: Duration) -> Self {
        self.inspect_delay = delay;
        self
    }

    pub fn with_metadata(mut self, metadata: impl Fn(&str) -> Option<TechMetadata> + Send + Sync + 'static) -> Self {
        self.metadata = Box::new(metadata);
        self
    }

    pub fn attempts(&self, address: &str) -> u32 {
        self.attempts.lock().get(address).copied().unwrap_or(0)
    }

    pub fn total_probes(&self) -> u32 {
        self.attempts.lock().values().sum()
    }

    pub fn max_in_flight(&self) -> usize {
        self.max_in_flight.load(Ordering::SeqCst)
    }

    pub fn max_inspect_in_flight(&self) -> usize {
        self.max_inspect_in_flight.load(Ordering::SeqCst)
    }

    pub fn terminate_calls(&self) -> usize {
        self.terminate_calls.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl Prober for StubProber {
    fn name(&self) -> &'static str {
        "stub"
    }

    async fn probe(&self, address: &str, _options: &ProbeOptions) -> streamsweep_probe::Result<ProbeOutcome> {
        let attempt = {
            let mut attempts = self.attempts.lock();
            let entry = attempts.entry(address.to_string()).or_insert(0);
            *entry += 1;
            *entry
        };

        let now = self.in_flight.fetch_add(1, Ordering::SeqCst) + 1;
        self.max_in_flight.fetch_max(now, Ordering::SeqCst);

        let killed = if self.delay.is_zero() {
            tokio::task::yield_now().await;
            false
        } else {
            tokio::select! {
                _ = tokio::time::sleep(self.delay) => false,
                _ = self.killed.notified() => true,
            }
        };

        self.in_flight.fetch_sub(1, Ordering::SeqCst);

        if killed {
            return Ok(ProbeOutcome::Invalid {
                latency_ms: 0,
                kind: ErrorKind::Cancelled,
                reason: "killed".to_string(),
            });
        }
        (self.script)(address, attempt)
    }

    async fn inspect(&self, address: &str, _options: &ProbeOptions) -> streamsweep_probe::Result<Option<TechMetadata>> {
        let now = self.inspect_in_flight.fetch_add(1, Ordering::SeqCst) + 1;
        self.max_inspect_in_flight.fetch_max(now, Ordering::SeqCst);
        if !self.inspect_delay.is_zero() {
            tokio::time::sleep(self.inspect_delay).await;
        }
        self.inspect_in_flight.fetch_sub(1, Ordering::SeqCst);
        Ok((self.metadata)(address))
    }

    fn terminate_all(&self) -> usize {
        self.terminate_calls.fetch_add(1, Ordering::SeqCst);
        self.killed.notify_waiters();
        self.in_flight.load(Ordering::SeqCst)
    }
}

pub fn valid() -> ProbeOutcome {
    ProbeOutcome::Valid { latency_ms: 5 }
}

pub fn invalid(kind: ErrorKind) -> ProbeOutcome {
    ProbeOutcome::Invalid {
        latency_ms: 5,
        kind,
        reason: format!("stub {kind}"),
    }
}

/// Digits at the end of an address (`http://h/s17` → 17), 0 if none.
pub fn trailing_number(address: &str) -> u32 {
    let digits: String = address
        .chars()
        .rev()
        .take_while(char::is_ascii_digit)
        .collect::<Vec<_>>()
        .into_iter()
        .rev()
        .collect();
    digits.parse().unwrap_or(0)
}

/// A mapping entry for tests.
pub fn mapping(raw_names: &[&str], group: Option<&str>) -> MappingEntry {
    MappingEntry {
        raw_names: raw_names.iter().map(|s| s.to_string()).collect(),
        group: group.map(str::to_string),
        ..Default::default()
    }
}

/// Engine settings with short timers so tests finish quickly.
pub fn fast_settings() -> EngineSettings {
    EngineSettings {
        workers: 4,
        timeout: Duration::from_secs(2),
        batch_size: 16,
        queue_high_water: 8,
        progress_interval: Duration::from_millis(20),
        join_window: Duration::from_millis(100),
        abandon_after: Duration::from_millis(300),
        headers: RequestHeaders::default(),
    }
}

/// An engine wired to a [`StubProber`] and an in-memory resolver.
pub struct TestHarness {
    pub engine: ScanEngine,
    pub prober: Arc<StubProber>,
    pub resolver: Arc<IdentityResolver>,
    pub store: Arc<MemoryStore>,
}

impl TestHarness {
    pub async fn new(prober: StubProber) -> Self {
        Self::with_mappings(prober, MappingTable::new()).await
    }

    pub async fn with_mappings(prober: StubProber, user: MappingTable) -> Self {
        Self::build(prober, user, fast_settings()).await
    }

    pub async fn build(prober: StubProber, user: MappingTable, settings: EngineSettings) -> Self {
        let store = Arc::new(MemoryStore::with_tables(None, user));
        let resolver = Arc::new(
            IdentityResolver::load(store.clone(), Arc::new(NoRemote), ResolverSettings::default())
                .await
                .expect("resolver loads from memory"),
        );
        let prober = Arc::new(prober);
        let engine = ScanEngine::new(prober.clone(), resolver.clone(), settings);

        Self {
            engine,
            prober,
            resolver,
            store,
        }
    }
}
