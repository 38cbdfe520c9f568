//! Content fingerprints and the observation history kept per fingerprint.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use std::collections::{BTreeMap, BTreeSet};
use streamsweep_common::TechMetadata;

/// Observations needed before a conflicting fingerprint is flagged.
pub const UNSTABLE_THRESHOLD: u64 = 3;

/// Fingerprint history keyed by fingerprint hash.
pub type FingerprintTable = BTreeMap<String, FingerprintRecord>;

/// Deterministic hash over an address and its technical metadata.
///
/// Hashes the sorted-key JSON form of the five fields, with absent values as
/// empty strings, so the same stream always yields the same fingerprint.
pub fn fingerprint(address: &str, metadata: &TechMetadata) -> String {
    let fields: BTreeMap<&str, &str> = [
        ("bitrate", metadata.bitrate.as_deref().unwrap_or("")),
        ("codec", metadata.codec.as_deref().unwrap_or("")),
        ("resolution", metadata.resolution.as_deref().unwrap_or("")),
        ("service_name", metadata.service_name.as_deref().unwrap_or("")),
        ("url", address),
    ]
    .into_iter()
    .collect();

    // A map of strings always serializes.
    let canonical = serde_json::to_string(&fields).unwrap_or_default();
    hex::encode(Sha256::digest(canonical.as_bytes()))
}

/// What has been seen for one fingerprint.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct FingerprintRecord {
    pub address: String,
    pub last_raw_name: String,
    pub last_resolved_name: String,
    /// Every raw name observed.
    #[serde(default)]
    pub raw_names: BTreeSet<String>,
    /// Every standard name this fingerprint resolved to.
    #[serde(default)]
    pub resolved_names: BTreeSet<String>,
    pub count: u64,
    pub first_seen: DateTime<Utc>,
    pub last_seen: DateTime<Utc>,
    /// Sticky once set.
    #[serde(default)]
    pub unstable: bool,
}

impl FingerprintRecord {
    pub fn new(address: &str, raw_name: &str, resolved_name: &str, now: DateTime<Utc>) -> Self {
        Self {
            address: address.to_string(),
            last_raw_name: raw_name.to_string(),
            last_resolved_name: resolved_name.to_string(),
            raw_names: BTreeSet::from([raw_name.to_string()]),
            resolved_names: BTreeSet::from([resolved_name.to_string()]),
            count: 1,
            first_seen: now,
            last_seen: now,
            unstable: false,
        }
    }

    /// Record one more observation. Returns `true` when this call made the
    /// record unstable.
    pub fn observe(&mut self, raw_name: &str, resolved_name: &str, now: DateTime<Utc>) -> bool {
        self.count += 1;
        self.last_seen = now;
        self.last_raw_name = raw_name.to_string();
        self.last_resolved_name = resolved_name.to_string();
        self.raw_names.insert(raw_name.to_string());
        self.resolved_names.insert(resolved_name.to_string());

        if !self.unstable && self.count >= UNSTABLE_THRESHOLD && self.resolved_names.len() > 1 {
            self.unstable = true;
            return true;
        }
        false
    }

    /// A previously resolved name usable as a fallback for `raw_name`.
    pub fn fallback_for(&self, raw_name: &str) -> Option<&str> {
        (!self.unstable && self.last_resolved_name != raw_name).then_some(self.last_resolved_name.as_str())
    }
}

/// A flagged fingerprint with its competing names.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct UnstableMapping {
    pub fingerprint: String,
    pub address: String,
    pub names: Vec<String>,
    pub count: u64,
    pub last_seen: DateTime<Utc>,
}

impl UnstableMapping {
    pub fn from_record(fingerprint: &str, record: &FingerprintRecord) -> Self {
        Self {
            fingerprint: fingerprint.to_string(),
            address: record.address.clone(),
            names: record.resolved_names.iter().cloned().collect(),
            count: record.count,
            last_seen: record.last_seen,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn meta() -> TechMetadata {
        TechMetadata {
            service_name: Some("CCTV1".into()),
            resolution: Some("1920x1080".into()),
            codec: Some("h264".into()),
            bitrate: None,
        }
    }

    #[test]
    fn test_fingerprint_is_deterministic() {
        let a = fingerprint("rtp://239.3.1.1:8000", &meta());
        let b = fingerprint("rtp://239.3.1.1:8000", &meta());
        assert_eq!(a, b);
        assert_eq!(a.len(), 64);
        assert_ne!(a, fingerprint("rtp://239.3.1.2:8000", &meta()));

        let mut other = meta();
        other.codec = Some("hevc".into());
        assert_ne!(a, fingerprint("rtp://239.3.1.1:8000", &other));
    }

    #[test]
    fn test_absent_and_empty_fields_hash_alike() {
        let mut with_empty = meta();
        with_empty.bitrate = Some(String::new());
        assert_eq!(
            fingerprint("x", &meta()),
            fingerprint("x", &with_empty)
        );
    }

    #[test]
    fn test_becomes_unstable_on_third_conflicting_observation() {
        let now = Utc::now();
        let mut record = FingerprintRecord::new("a", "r1", "A", now);
        assert!(!record.observe("r2", "B", now));
        assert!(!record.unstable);
        assert!(record.observe("r3", "C", now));
        assert!(record.unstable);
        // Stays flagged; no second transition.
        assert!(!record.observe("r1", "A", now));
        assert!(record.unstable);
        assert_eq!(record.fallback_for("zzz"), None);
    }

    #[test]
    fn test_consistent_observations_stay_stable() {
        let now = Utc::now();
        let mut record = FingerprintRecord::new("a", "raw", "Std", now);
        for _ in 0..5 {
            record.observe("raw", "Std", now);
        }
        assert!(!record.unstable);
        assert_eq!(record.count, 6);
        assert_eq!(record.fallback_for("other raw"), Some("Std"));
        assert_eq!(record.fallback_for("Std"), None);
    }
}
