//! Failed-address bookkeeping and retry session state.

use serde::Serialize;
use std::collections::{BTreeMap, BTreeSet};
use streamsweep_probe::ErrorKind;

/// Addresses that failed in the most recent pass, with why.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct FailedSet {
    entries: BTreeMap<String, ErrorKind>,
}

impl FailedSet {
    pub fn insert(&mut self, address: String, kind: ErrorKind) {
        self.entries.insert(address, kind);
    }

    pub fn remove(&mut self, address: &str) -> Option<ErrorKind> {
        self.entries.remove(address)
    }

    pub fn clear(&mut self) {
        self.entries.clear();
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// All failed addresses in sorted order.
    pub fn addresses(&self) -> Vec<String> {
        self.entries.keys().cloned().collect()
    }

    /// Failed addresses whose kind passes `retryable`.
    pub fn matching(&self, retryable: impl Fn(ErrorKind) -> bool) -> Vec<String> {
        self.entries
            .iter()
            .filter(|(_, kind)| retryable(**kind))
            .map(|(address, _)| address.clone())
            .collect()
    }
}

/// State of the current retry session.
///
/// `iteration` only grows until [`ScanEngine::close_retry_session`]
/// resets the whole state.
///
/// [`ScanEngine::close_retry_session`]: super::ScanEngine::close_retry_session
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct RetryState {
    pub active: bool,
    pub iteration: u32,
    /// Cumulative valid count when the current iteration began.
    pub valid_at_iteration_start: u64,
    /// Valid results across all iterations of this session.
    pub valid_total: u64,
    /// Addresses still failing after the last iteration.
    pub failed: BTreeSet<String>,
}

impl RetryState {
    pub(crate) fn begin_iteration(&mut self, addresses: &[String]) -> u32 {
        self.active = true;
        self.iteration += 1;
        self.valid_at_iteration_start = self.valid_total;
        self.failed = addresses.iter().cloned().collect();
        self.iteration
    }

    pub(crate) fn finish_iteration(&mut self, valid: u64, still_failing: &[String]) {
        self.valid_total += valid;
        self.failed = still_failing.iter().cloned().collect();
    }

    /// Addresses that turned valid in the current iteration.
    pub fn new_valid(&self) -> u64 {
        self.valid_total - self.valid_at_iteration_start
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_failed_set_filters_by_kind() {
        let mut failed = FailedSet::default();
        failed.insert("a".into(), ErrorKind::Timeout);
        failed.insert("b".into(), ErrorKind::NotFound);
        failed.insert("c".into(), ErrorKind::ConnectionFailed);

        assert_eq!(failed.addresses(), vec!["a", "b", "c"]);
        let retryable = failed.matching(|k| matches!(k, ErrorKind::Timeout | ErrorKind::ConnectionFailed));
        assert_eq!(retryable, vec!["a", "c"]);
        assert_eq!(failed.remove("b"), Some(ErrorKind::NotFound));
        assert_eq!(failed.len(), 2);
    }

    #[test]
    fn test_retry_iterations_accumulate() {
        let mut state = RetryState::default();
        let all = vec!["a".to_string(), "b".to_string(), "c".to_string()];

        assert_eq!(state.begin_iteration(&all), 1);
        state.finish_iteration(2, &all[2..]);
        assert_eq!(state.new_valid(), 2);

        assert_eq!(state.begin_iteration(&all[2..]), 2);
        assert_eq!(state.new_valid(), 0);
        state.finish_iteration(1, &[]);
        assert_eq!(state.new_valid(), 1);
        assert_eq!(state.valid_total, 3);
        assert!(state.failed.is_empty());
    }
}
