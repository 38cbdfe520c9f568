//! Stream scanner.
//!
//! This module drives scan, validation, and retry sessions: addresses come
//! from an [`AddressTemplate`](streamsweep_common::AddressTemplate) or an
//! explicit list, pass through a bounded queue to a worker pool that calls
//! the [`Prober`](streamsweep_probe::Prober), and valid streams are enriched
//! with metadata and a resolved identity in the background.

mod engine;
mod enrichment;
mod error;
mod events;
mod retry;
mod session;
mod stats;
mod worker;

pub use engine::{EngineState, ScanEngine};
pub use error::{Result, ScanError};
pub use events::{RetryPass, ScanEvent, ScanMode, SessionKind, SessionOutcome, SessionSummary};
pub use retry::{FailedSet, RetryState};
pub use session::{
    EngineSettings, RetryRequest, ScanRequest, ScanSession, SessionHandle, SessionReport,
    ValidationRequest,
};
