//! The [`Prober`] trait and its ffprobe-backed implementation.

use crate::command::{CommandRunner, ProcessRunner, ToolCommand, ToolRun};
use crate::ffprobe::{self, ProbeLimits, RequestHeaders};
use crate::policy::{ClassificationPolicy, ErrorKind, Verdict};
use crate::preflight::{tcp_preflight, Preflight};
use crate::{tools, Error, Result};
use async_trait::async_trait;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::{Duration, Instant};
use streamsweep_common::TechMetadata;
use tokio::sync::Semaphore;

/// Upper bound for the TCP preflight connect.
const PREFLIGHT_CAP: Duration = Duration::from_secs(1);

/// Per-call probe options.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ProbeOptions {
    /// Hard wall-clock limit; the process is killed when it passes.
    pub timeout: Duration,
    pub headers: RequestHeaders,
}

impl ProbeOptions {
    pub fn with_timeout(timeout: Duration) -> Self {
        Self {
            timeout,
            headers: RequestHeaders::default(),
        }
    }
}

/// Result of a validity probe.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ProbeOutcome {
    Valid {
        latency_ms: u64,
    },
    Invalid {
        latency_ms: u64,
        kind: ErrorKind,
        /// Raw diagnostic text.
        reason: String,
    },
}

impl ProbeOutcome {
    pub fn is_valid(&self) -> bool {
        matches!(self, Self::Valid { .. })
    }

    pub fn latency_ms(&self) -> u64 {
        match self {
            Self::Valid { latency_ms } | Self::Invalid { latency_ms, .. } => *latency_ms,
        }
    }
}

/// A stream prober.
///
/// `probe` answers only "is it live"; `inspect` is the slower metadata
/// probe run after validity is known. Both return `Err` only for resource
/// failures such as a tool that cannot be spawned.
#[async_trait]
pub trait Prober: Send + Sync {
    /// Human-readable name identifying this prober implementation.
    fn name(&self) -> &'static str;

    async fn probe(&self, address: &str, options: &ProbeOptions) -> Result<ProbeOutcome>;

    /// Fetch technical metadata. `None` when the stream yields nothing usable.
    async fn inspect(&self, address: &str, options: &ProbeOptions) -> Result<Option<TechMetadata>>;

    /// Kill every in-flight probe process. Returns how many were signalled.
    fn terminate_all(&self) -> usize;

    /// Whether an invalid outcome of this kind is worth probing again.
    fn is_retryable(&self, kind: ErrorKind) -> bool {
        ClassificationPolicy::default().is_retryable(kind)
    }
}

/// Settings for [`FfprobeProber`].
#[derive(Debug, Clone)]
pub struct ProbeSettings {
    /// Explicit ffprobe path; PATH lookup otherwise.
    pub ffprobe_path: Option<PathBuf>,
    /// Concurrent validity probes allowed, independent of the worker count.
    pub max_concurrent: usize,
    /// Concurrent metadata probes. Drawn from a separate pool so a backlog
    /// of `inspect` calls never holds up a validity decision.
    pub max_concurrent_inspect: usize,
    pub probesize: u64,
    pub analyzeduration_us: u64,
    /// Check TCP reachability of http(s) hosts before spawning.
    pub tcp_preflight: bool,
    pub policy: ClassificationPolicy,
}

impl Default for ProbeSettings {
    fn default() -> Self {
        Self {
            ffprobe_path: None,
            max_concurrent: 5,
            max_concurrent_inspect: 2,
            probesize: 500_000,
            analyzeduration_us: 1_000_000,
            tcp_preflight: true,
            policy: ClassificationPolicy::default(),
        }
    }
}

/// [`Prober`] that shells out to ffprobe.
pub struct FfprobeProber {
    runner: Arc<dyn CommandRunner>,
    ffprobe: PathBuf,
    permits: Arc<Semaphore>,
    inspect_permits: Arc<Semaphore>,
    settings: ProbeSettings,
}

impl FfprobeProber {
    pub fn new(runner: Arc<dyn CommandRunner>, ffprobe: impl Into<PathBuf>, settings: ProbeSettings) -> Self {
        Self {
            runner,
            ffprobe: ffprobe.into(),
            permits: Arc::new(Semaphore::new(settings.max_concurrent.max(1))),
            inspect_permits: Arc::new(Semaphore::new(settings.max_concurrent_inspect.max(1))),
            settings,
        }
    }

    /// Locate ffprobe and build a prober around a fresh [`ProcessRunner`].
    ///
    /// # Errors
    ///
    /// Returns [`Error::ToolNotFound`] when ffprobe is neither configured nor on PATH.
    pub fn discover(settings: ProbeSettings) -> Result<Self> {
        let ffprobe = tools::get_tool_path("ffprobe", settings.ffprobe_path.as_deref())?;
        tracing::debug!(path = %ffprobe.display(), "Using ffprobe");
        Ok(Self::new(Arc::new(ProcessRunner::new()), ffprobe, settings))
    }

    pub fn settings(&self) -> &ProbeSettings {
        &self.settings
    }

    /// Processes currently running.
    pub fn active_count(&self) -> usize {
        self.runner.active_count()
    }

    /// Run ffprobe under a permit from `pool`. The returned duration starts
    /// once the permit is held.
    async fn run(&self, pool: &Semaphore, args: Vec<String>, timeout: Duration) -> Result<(ToolRun, Duration)> {
        let _permit = pool
            .acquire()
            .await
            .map_err(|_| Error::spawn("ffprobe", "probe semaphore closed"))?;

        let started = Instant::now();
        let mut cmd = ToolCommand::new(&self.ffprobe);
        cmd.args(args).timeout(timeout);
        let run = self.runner.run(&cmd).await?;
        Ok((run, started.elapsed()))
    }
}

#[async_trait]
impl Prober for FfprobeProber {
    fn name(&self) -> &'static str {
        "ffprobe"
    }

    async fn probe(&self, address: &str, options: &ProbeOptions) -> Result<ProbeOutcome> {
        if self.settings.tcp_preflight {
            let started = Instant::now();
            let budget = PREFLIGHT_CAP.min(options.timeout / 3);
            if let Preflight::Unreachable(reason) = tcp_preflight(address, budget).await {
                return Ok(ProbeOutcome::Invalid {
                    latency_ms: started.elapsed().as_millis() as u64,
                    kind: ErrorKind::TcpUnreachable,
                    reason,
                });
            }
        }

        let limits = ProbeLimits {
            io_timeout_us: options.timeout.as_micros() as u64,
            probesize: self.settings.probesize,
            analyzeduration_us: self.settings.analyzeduration_us,
        };
        let args = ffprobe::validity_args(address, limits, &options.headers);

        let (run, ran_for) = self.run(&self.permits, args, options.timeout).await?;
        let latency_ms = match &run {
            ToolRun::Exited(output) => output.elapsed.as_millis() as u64,
            _ => ran_for.as_millis() as u64,
        };

        Ok(match self.settings.policy.classify(&run) {
            Verdict::Valid => ProbeOutcome::Valid { latency_ms },
            Verdict::Invalid { kind, reason } => ProbeOutcome::Invalid {
                latency_ms,
                kind,
                reason,
            },
        })
    }

    async fn inspect(&self, address: &str, options: &ProbeOptions) -> Result<Option<TechMetadata>> {
        let args = ffprobe::inspect_args(address, &options.headers);
        let output = match self.run(&self.inspect_permits, args, options.timeout).await?.0 {
            ToolRun::Exited(output) if output.success() => output,
            other => {
                tracing::debug!(address = %address, run = ?other, "Metadata probe produced nothing");
                return Ok(None);
            }
        };

        match ffprobe::parse_metadata(&output.stdout) {
            Ok(meta) if !meta.is_empty() => Ok(Some(meta)),
            Ok(_) => Ok(None),
            Err(e) => {
                tracing::debug!(address = %address, error = %e, "Unparseable metadata probe output");
                Ok(None)
            }
        }
    }

    fn terminate_all(&self) -> usize {
        self.runner.terminate_all()
    }

    fn is_retryable(&self, kind: ErrorKind) -> bool {
        self.settings.policy.is_retryable(kind)
    }
}
