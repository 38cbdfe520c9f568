//! Core type definitions for scan records, metadata, and statistics.
//!
//! Records are owned values: the engine emits a provisional [`ScanRecord`]
//! as soon as validity is known and later emits a [`RecordUpdate`] keyed by
//! address once enrichment finishes. Receivers apply updates with
//! [`ScanRecord::apply`].

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;

/// Technical properties extracted from a stream by a probe.
#[derive(Debug, Clone, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct TechMetadata {
    /// Service name embedded in the transport stream, if any.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub service_name: Option<String>,
    /// Video resolution as `WIDTHxHEIGHT`.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub resolution: Option<String>,
    /// Codec name of the primary stream.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub codec: Option<String>,
    /// Bitrate as reported by the probe (bits per second).
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub bitrate: Option<String>,
}

impl TechMetadata {
    /// Whether nothing was extracted.
    pub fn is_empty(&self) -> bool {
        self.service_name.is_none()
            && self.resolution.is_none()
            && self.codec.is_none()
            && self.bitrate.is_none()
    }
}

/// EPG, time-shift, and catch-up attributes carried by a mapping entry.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ExtendedAttrs {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub tvg_id: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub tvg_chno: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub tvg_shift: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub catchup: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub catchup_days: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub catchup_source: Option<String>,
}

impl ExtendedAttrs {
    /// Whether no attribute is set.
    pub fn is_empty(&self) -> bool {
        *self == Self::default()
    }
}

/// Result of resolving a raw name against the mapping tables.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ResolvedIdentity {
    /// Canonical display name (the raw name when nothing matched).
    pub standard_name: String,
    /// Channel group, if the mapping defines one.
    pub group: Option<String>,
    /// Logo reference, if the mapping defines one.
    pub logo: Option<String>,
    /// Optional EPG and catch-up attributes.
    #[serde(default, skip_serializing_if = "ExtendedAttrs::is_empty")]
    pub extended: ExtendedAttrs,
}

impl ResolvedIdentity {
    /// An identity that is just the raw name.
    pub fn unresolved(raw_name: impl Into<String>) -> Self {
        Self {
            standard_name: raw_name.into(),
            ..Default::default()
        }
    }
}

/// A discovered or validated stream.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ScanRecord {
    /// Stream address; the record's key.
    pub address: String,
    /// Whether the last probe found the stream live.
    pub valid: bool,
    /// Probe duration in milliseconds.
    pub latency_ms: Option<u64>,
    /// Name extracted from the address or probe metadata.
    pub raw_name: String,
    /// Display name after identity resolution.
    pub resolved_name: String,
    pub group: Option<String>,
    pub logo: Option<String>,
    pub resolution: Option<String>,
    pub codec: Option<String>,
    pub bitrate: Option<String>,
    /// Content fingerprint, known once metadata has been collected.
    pub fingerprint: Option<String>,
    #[serde(default, skip_serializing_if = "ExtendedAttrs::is_empty")]
    pub extended: ExtendedAttrs,
    /// Probe diagnostics for invalid records.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

impl ScanRecord {
    /// A provisional record created right after the validity probe.
    pub fn provisional(address: impl Into<String>, raw_name: impl Into<String>, latency_ms: u64) -> Self {
        let raw_name = raw_name.into();
        Self {
            address: address.into(),
            valid: true,
            latency_ms: Some(latency_ms),
            resolved_name: raw_name.clone(),
            raw_name,
            group: None,
            logo: None,
            resolution: None,
            codec: None,
            bitrate: None,
            fingerprint: None,
            extended: ExtendedAttrs::default(),
            error: None,
        }
    }

    /// A record for an address that failed its probe.
    pub fn invalid(
        address: impl Into<String>,
        raw_name: impl Into<String>,
        latency_ms: u64,
        error: impl Into<String>,
    ) -> Self {
        let mut record = Self::provisional(address, raw_name, latency_ms);
        record.valid = false;
        record.error = Some(error.into());
        record
    }

    /// Apply an enrichment update. Updates for other addresses are ignored
    /// and `false` is returned.
    pub fn apply(&mut self, update: &RecordUpdate) -> bool {
        if update.address != self.address {
            return false;
        }
        self.raw_name = update.raw_name.clone();
        self.resolved_name = update.identity.standard_name.clone();
        self.group = update.identity.group.clone();
        self.logo = update.identity.logo.clone();
        self.extended = update.identity.extended.clone();
        if update.metadata.resolution.is_some() {
            self.resolution = update.metadata.resolution.clone();
        }
        if update.metadata.codec.is_some() {
            self.codec = update.metadata.codec.clone();
        }
        if update.metadata.bitrate.is_some() {
            self.bitrate = update.metadata.bitrate.clone();
        }
        self.fingerprint = Some(update.fingerprint.clone());
        true
    }
}

/// Enrichment result for a previously emitted record.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RecordUpdate {
    pub address: String,
    pub raw_name: String,
    pub identity: ResolvedIdentity,
    pub metadata: TechMetadata,
    pub fingerprint: String,
}

/// Running statistics for one scan pass.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ScanStats {
    /// Addresses enqueued so far; grows while expansion continues.
    pub total: u64,
    pub valid: u64,
    pub invalid: u64,
    pub started_at: DateTime<Utc>,
    pub elapsed_ms: u64,
}

impl ScanStats {
    /// Fresh statistics starting now.
    pub fn new(total: u64) -> Self {
        Self {
            total,
            valid: 0,
            invalid: 0,
            started_at: Utc::now(),
            elapsed_ms: 0,
        }
    }

    /// Addresses with a terminal outcome.
    pub fn completed(&self) -> u64 {
        self.valid + self.invalid
    }

    /// Refresh `elapsed_ms` from the start time.
    pub fn touch(&mut self) {
        let elapsed = Utc::now() - self.started_at;
        self.elapsed_ms = elapsed.num_milliseconds().max(0) as u64;
    }
}

impl Default for ScanStats {
    fn default() -> Self {
        Self::new(0)
    }
}

impl fmt::Display for ScanStats {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{}/{} (valid {}, invalid {}, {:.1}s)",
            self.completed(),
            self.total,
            self.valid,
            self.invalid,
            self.elapsed_ms as f64 / 1000.0
        )
    }
}
