use serde::{Deserialize, Serialize};
use std::path::PathBuf;
use std::time::Duration;
use streamsweep_probe::{ClassificationPolicy, ProbeSettings};

/// Mapping dataset published by the upstream channel list project.
pub const DEFAULT_REMOTE_URL: &str =
    "https://raw.githubusercontent.com/sumingyd/IPTV-Scanner-Editor-Pro/main/local_channel_mappings.csv";

#[derive(Debug, Clone, Default, PartialEq, Deserialize, Serialize)]
pub struct Config {
    #[serde(default)]
    pub scanner: ScannerConfig,

    #[serde(default)]
    pub probe: ProbeConfig,

    #[serde(default)]
    pub mappings: MappingsConfig,
}

#[derive(Debug, Clone, PartialEq, Deserialize, Serialize)]
pub struct ScannerConfig {
    /// Worker tasks draining the queue
    #[serde(default = "default_workers")]
    pub workers: usize,

    /// Per-probe wall-clock timeout
    #[serde(default = "default_timeout_ms")]
    pub timeout_ms: u64,

    /// Addresses produced per expansion batch
    #[serde(default = "default_batch_size")]
    pub batch_size: usize,

    /// Queue depth at which the producer pauses
    #[serde(default = "default_queue_high_water")]
    pub queue_high_water: usize,

    #[serde(default = "default_progress_interval_ms")]
    pub progress_interval_ms: u64,

    /// Time workers get to exit after a cancel before being left behind
    #[serde(default = "default_join_window_ms")]
    pub join_window_ms: u64,

    /// Time after which stuck workers are aborted outright
    #[serde(default = "default_abandon_after_ms")]
    pub abandon_after_ms: u64,
}

fn default_workers() -> usize {
    10
}
fn default_timeout_ms() -> u64 {
    10_000
}
fn default_batch_size() -> usize {
    10_000
}
fn default_queue_high_water() -> usize {
    10_000
}
fn default_progress_interval_ms() -> u64 {
    500
}
fn default_join_window_ms() -> u64 {
    500
}
fn default_abandon_after_ms() -> u64 {
    3_000
}

impl Default for ScannerConfig {
    fn default() -> Self {
        Self {
            workers: default_workers(),
            timeout_ms: default_timeout_ms(),
            batch_size: default_batch_size(),
            queue_high_water: default_queue_high_water(),
            progress_interval_ms: default_progress_interval_ms(),
            join_window_ms: default_join_window_ms(),
            abandon_after_ms: default_abandon_after_ms(),
        }
    }
}

impl ScannerConfig {
    pub fn timeout(&self) -> Duration {
        Duration::from_millis(self.timeout_ms)
    }
}

#[derive(Debug, Clone, PartialEq, Deserialize, Serialize)]
pub struct ProbeConfig {
    /// Custom path to ffprobe (PATH lookup when unset)
    #[serde(default)]
    pub ffprobe_path: Option<PathBuf>,

    /// Validity probes allowed at once
    #[serde(default = "default_max_concurrent")]
    pub max_concurrent: usize,

    /// Metadata probes allowed at once, on top of `max_concurrent`
    #[serde(default = "default_max_concurrent_inspect")]
    pub max_concurrent_inspect: usize,

    #[serde(default = "default_probesize")]
    pub probesize: u64,

    #[serde(default = "default_analyzeduration_us")]
    pub analyzeduration_us: u64,

    /// TCP connect check for http(s) hosts before spawning ffprobe
    #[serde(default = "default_true")]
    pub tcp_preflight: bool,

    #[serde(default)]
    pub user_agent: Option<String>,

    #[serde(default)]
    pub referer: Option<String>,

    #[serde(default)]
    pub policy: ClassificationPolicy,
}

fn default_max_concurrent() -> usize {
    5
}
fn default_max_concurrent_inspect() -> usize {
    2
}
fn default_probesize() -> u64 {
    500_000
}
fn default_analyzeduration_us() -> u64 {
    1_000_000
}
fn default_true() -> bool {
    true
}

impl Default for ProbeConfig {
    fn default() -> Self {
        Self {
            ffprobe_path: None,
            max_concurrent: default_max_concurrent(),
            max_concurrent_inspect: default_max_concurrent_inspect(),
            probesize: default_probesize(),
            analyzeduration_us: default_analyzeduration_us(),
            tcp_preflight: true,
            user_agent: None,
            referer: None,
            policy: ClassificationPolicy::default(),
        }
    }
}

impl ProbeConfig {
    /// Settings for an [`FfprobeProber`](streamsweep_probe::FfprobeProber).
    pub fn settings(&self) -> ProbeSettings {
        ProbeSettings {
            ffprobe_path: self
                .ffprobe_path
                .as_ref()
                .map(|p| PathBuf::from(shellexpand::tilde(&p.to_string_lossy()).as_ref())),
            max_concurrent: self.max_concurrent,
            max_concurrent_inspect: self.max_concurrent_inspect,
            probesize: self.probesize,
            analyzeduration_us: self.analyzeduration_us,
            tcp_preflight: self.tcp_preflight,
            policy: self.policy.clone(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Deserialize, Serialize)]
pub struct MappingsConfig {
    /// Remote mapping dataset (CSV, or legacy TXT); empty disables fetching
    #[serde(default = "default_remote_url")]
    pub remote_url: String,

    #[serde(default = "default_fetch_timeout")]
    pub fetch_timeout_secs: u64,

    /// Age after which the cached remote dataset is refetched on load
    #[serde(default = "default_cache_ttl")]
    pub cache_ttl_hours: u64,

    /// Directory holding the mapping cache, user mappings, and fingerprints
    #[serde(default = "default_data_dir")]
    pub data_dir: PathBuf,
}

fn default_remote_url() -> String {
    DEFAULT_REMOTE_URL.to_string()
}
fn default_fetch_timeout() -> u64 {
    5
}
fn default_cache_ttl() -> u64 {
    24
}
fn default_data_dir() -> PathBuf {
    PathBuf::from("~/.local/share/streamsweep")
}

impl Default for MappingsConfig {
    fn default() -> Self {
        Self {
            remote_url: default_remote_url(),
            fetch_timeout_secs: default_fetch_timeout(),
            cache_ttl_hours: default_cache_ttl(),
            data_dir: default_data_dir(),
        }
    }
}

impl MappingsConfig {
    /// The remote URL, `None` when disabled.
    pub fn remote_url(&self) -> Option<&str> {
        let url = self.remote_url.trim();
        (!url.is_empty()).then_some(url)
    }

    /// `data_dir` with `~` expanded.
    pub fn resolved_data_dir(&self) -> PathBuf {
        PathBuf::from(shellexpand::tilde(&self.data_dir.to_string_lossy()).as_ref())
    }

    pub fn fetch_timeout(&self) -> Duration {
        Duration::from_secs(self.fetch_timeout_secs)
    }

    pub fn cache_ttl(&self) -> chrono::Duration {
        chrono::Duration::hours(self.cache_ttl_hours as i64)
    }
}
