//! # streamsweep-probe
//!
//! Out-of-process stream probing.
//!
//! This crate provides functionality for:
//! - Running an inspection tool (ffprobe) against a stream address with a
//!   hard wall-clock timeout that kills the process, not just the caller
//! - Tracking every spawned process in a [`ProcessTable`] so one
//!   [`ProcessTable::terminate_all`] call stops all in-flight probes
//! - Classifying tool results into [`ProbeOutcome::Valid`] or
//!   [`ProbeOutcome::Invalid`] through a configurable [`ClassificationPolicy`]
//! - Extracting technical metadata (resolution, codec, bitrate, service name)
//!   in a separate, deeper probe
//!
//! The engine only depends on the [`Prober`] trait; [`FfprobeProber`] is the
//! production implementation and the process boundary itself sits behind
//! [`CommandRunner`].
//!
//! ## Example
//!
//! ```no_run
//! use std::sync::Arc;
//! use std::time::Duration;
//! use streamsweep_probe::{FfprobeProber, ProbeOptions, ProbeSettings, Prober};
//!
//! # async fn example() -> streamsweep_probe::Result<()> {
//! let prober = FfprobeProber::discover(ProbeSettings::default())?;
//! let options = ProbeOptions::with_timeout(Duration::from_secs(5));
//! let outcome = prober.probe("http://10.0.0.1:8080/live.m3u8", &options).await?;
//! println!("valid: {}", outcome.is_valid());
//! # Ok(())
//! # }
//! ```

mod command;
mod error;
pub mod ffprobe;
mod policy;
mod preflight;
mod process;
mod prober;
pub mod tools;

// Re-exports
pub use command::{CommandRunner, ProcessRunner, ToolCommand, ToolOutput, ToolRun};
pub use error::{Error, Result};
pub use ffprobe::RequestHeaders;
pub use policy::{ClassificationPolicy, ErrorKind, PolicyRule, Verdict};
pub use preflight::{tcp_preflight, Preflight};
pub use process::{ProcessGuard, ProcessTable};
pub use prober::{FfprobeProber, ProbeOptions, ProbeOutcome, ProbeSettings, Prober};
pub use tools::{check_tool, check_tools, require_tool, ToolInfo};
