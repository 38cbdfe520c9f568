//! Events pushed to a session's subscriber.

use serde::Serialize;
use std::fmt;
use streamsweep_common::{RecordUpdate, ScanRecord, ScanStats};
use uuid::Uuid;

/// Fresh scans replace the failed set; append scans add to it.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum ScanMode {
    #[default]
    Fresh,
    Append,
}

/// What a session runs over.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum SessionKind {
    Scan { mode: ScanMode },
    Validation,
    Retry { loop_mode: bool },
}

impl fmt::Display for SessionKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Scan { mode: ScanMode::Fresh } => f.write_str("scan"),
            Self::Scan { mode: ScanMode::Append } => f.write_str("append scan"),
            Self::Validation => f.write_str("validation"),
            Self::Retry { loop_mode: false } => f.write_str("retry"),
            Self::Retry { loop_mode: true } => f.write_str("loop retry"),
        }
    }
}

/// How a session ended.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "outcome", content = "reason", rename_all = "snake_case")]
pub enum SessionOutcome {
    Completed,
    Cancelled,
    /// A resource failure ended the session early.
    Aborted(String),
}

/// Sent once when a session reaches its terminal state.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct SessionSummary {
    pub session: Uuid,
    pub kind: SessionKind,
    pub outcome: SessionOutcome,
    pub stats: ScanStats,
    /// Passes run; always 1 outside retry sessions.
    pub passes: u32,
    /// Addresses in the failed set at the end.
    pub failed: usize,
}

/// Result of one retry iteration.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct RetryPass {
    pub iteration: u32,
    pub attempted: usize,
    pub new_valid: u64,
    pub still_failing: usize,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "event", rename_all = "snake_case")]
pub enum ScanEvent {
    Started {
        session: Uuid,
        kind: SessionKind,
    },
    /// Terminal outcomes so far against addresses enqueued so far.
    Progress {
        current: u64,
        total: u64,
    },
    Stats(ScanStats),
    /// A provisional record, sent as soon as validity is known.
    Record(ScanRecord),
    /// Enrichment for a previously sent record, keyed by address.
    RecordUpdated(RecordUpdate),
    RetryPassCompleted(RetryPass),
    Completed(SessionSummary),
}
