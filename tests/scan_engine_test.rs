//! Integration tests for the scan engine.

mod common;

use std::collections::BTreeSet;
use std::time::Duration;

use assert_matches::assert_matches;
use common::{invalid, mapping, trailing_number, valid, StubProber, TestHarness};
use streamsweep::identity::MappingTable;
use streamsweep::scanner::{
    EngineState, RetryRequest, ScanError, ScanEvent, ScanRequest, SessionOutcome, ValidationRequest,
};
use streamsweep_common::TechMetadata;
use streamsweep_probe::ErrorKind;

const COLLECT_TIMEOUT: Duration = Duration::from_secs(10);

async fn wait_idle(harness: &TestHarness) {
    for _ in 0..200 {
        if harness.engine.state() == EngineState::Idle {
            return;
        }
        tokio::time::sleep(Duration::from_millis(10)).await;
    }
    panic!("engine did not return to idle");
}

// ---------------------------------------------------------------------------
// Fresh scans
// ---------------------------------------------------------------------------

#[tokio::test]
async fn scan_reports_every_valid_address_with_enrichment() {
    let mut user = MappingTable::new();
    user.insert("News One".into(), mapping(&["svc-1"], Some("News")));

    let prober = StubProber::all_valid().with_metadata(|address| {
        Some(TechMetadata {
            service_name: Some(format!("svc-{}", trailing_number(address.trim_end_matches(":80/s")))),
            resolution: Some("1920x1080".into()),
            codec: Some("h264".into()),
            bitrate: None,
        })
    });
    let harness = TestHarness::with_mappings(prober, user).await;

    let session = harness
        .engine
        .start_scan(ScanRequest::new("http://10.0.0.[1-3]:80/s"))
        .unwrap();
    let report = tokio::time::timeout(COLLECT_TIMEOUT, session.collect()).await.unwrap();

    let summary = report.summary.clone().unwrap();
    assert_eq!(summary.outcome, SessionOutcome::Completed);
    assert_eq!(summary.stats.total, 3);
    assert_eq!(summary.stats.valid, 3);
    assert_eq!(summary.stats.invalid, 0);

    assert_eq!(report.records.len(), 3);
    assert_eq!(report.updates.len(), 3);

    let merged = report.merged_records();
    let first = merged.iter().find(|r| r.address == "http://10.0.0.1:80/s").unwrap();
    assert_eq!(first.raw_name, "svc-1");
    assert_eq!(first.resolved_name, "News One");
    assert_eq!(first.group.as_deref(), Some("News"));
    assert_eq!(first.resolution.as_deref(), Some("1920x1080"));
    assert!(first.fingerprint.is_some());

    let other = merged.iter().find(|r| r.address == "http://10.0.0.2:80/s").unwrap();
    assert_eq!(other.resolved_name, "svc-2");

    assert_eq!(harness.engine.state(), EngineState::Idle);
}

#[tokio::test]
async fn scan_counts_invalid_addresses_without_emitting_them() {
    let prober = StubProber::new(|address, _| {
        if trailing_number(address) % 2 == 0 {
            invalid(ErrorKind::ConnectionFailed)
        } else {
            valid()
        }
    });
    let harness = TestHarness::new(prober).await;

    let session = harness
        .engine
        .start_scan(ScanRequest::new("rtp://239.0.0.1:[1-10]"))
        .unwrap();
    let report = tokio::time::timeout(COLLECT_TIMEOUT, session.collect()).await.unwrap();

    let stats = report.summary.unwrap().stats;
    assert_eq!(stats.total, 10);
    assert_eq!(stats.valid + stats.invalid, stats.total);
    assert_eq!(stats.invalid, 5);

    assert!(report.records.iter().all(|r| r.valid));
    assert_eq!(report.records.len(), 5);

    let failed: BTreeSet<String> = harness.engine.failed_addresses().into_iter().collect();
    let expected: BTreeSet<String> = [2, 4, 6, 8, 10]
        .iter()
        .map(|n| format!("rtp://239.0.0.1:{n}"))
        .collect();
    assert_eq!(failed, expected);
}

#[tokio::test]
async fn progress_never_exceeds_total_and_finishes_complete() {
    let harness = TestHarness::new(StubProber::all_valid().with_delay(Duration::from_millis(1))).await;

    // 200 addresses through a queue of 8.
    let session = harness
        .engine
        .start_scan(ScanRequest::new("http://192.168.[0-1].[1-100]/live"))
        .unwrap();
    let report = tokio::time::timeout(COLLECT_TIMEOUT, session.collect()).await.unwrap();

    assert!(!report.progress.is_empty());
    assert!(report.progress.iter().all(|(current, total)| current <= total));
    assert_eq!(report.progress.last(), Some(&(200, 200)));

    let stats = report.summary.unwrap().stats;
    assert_eq!(stats.total, 200);
    assert_eq!(stats.valid, 200);
}

#[tokio::test]
async fn probe_concurrency_is_bounded_by_worker_count() {
    let harness = TestHarness::new(StubProber::all_valid().with_delay(Duration::from_millis(5))).await;

    let session = harness
        .engine
        .start_scan(ScanRequest::new("http://h/[1-40]").with_workers(3))
        .unwrap();
    tokio::time::timeout(COLLECT_TIMEOUT, session.collect()).await.unwrap();

    assert!(harness.prober.max_in_flight() <= 3);
    assert_eq!(harness.prober.total_probes(), 40);
}

#[tokio::test]
async fn producer_stays_within_the_queue_high_water_mark() {
    let harness = TestHarness::new(StubProber::all_valid().with_delay(Duration::from_millis(10))).await;
    let high_water = harness.engine.settings().queue_high_water as u64;
    let workers = 4;
    let bound = high_water + workers + 1;

    let mut session = harness
        .engine
        .start_scan(ScanRequest::new("http://10.1.0.1/ch[1-10000]").with_workers(workers as usize))
        .unwrap();

    let mut observed = 0;
    while observed < 20 {
        match session.events.recv().await {
            Some(ScanEvent::Progress { current, total }) => {
                assert!(total - current <= bound, "{total} counted with only {current} done");
                observed += 1;
            }
            Some(_) => {}
            None => panic!("session ended early"),
        }
    }

    harness.engine.cancel(&session.handle);
    let report = tokio::time::timeout(COLLECT_TIMEOUT, session.collect()).await.unwrap();
    assert!(report
        .progress
        .iter()
        .all(|(current, total)| total - current <= bound));
    assert!(report.summary.unwrap().stats.total < 10_000);
}

#[tokio::test]
async fn enrichment_runs_at_most_one_task_per_worker() {
    let prober = StubProber::all_valid().with_inspect_delay(Duration::from_millis(30));
    let harness = TestHarness::new(prober).await;

    let session = harness
        .engine
        .start_scan(ScanRequest::new("http://h/[1-40]").with_workers(3))
        .unwrap();
    let report = tokio::time::timeout(COLLECT_TIMEOUT, session.collect()).await.unwrap();

    assert_eq!(report.summary.unwrap().stats.valid, 40);
    assert_eq!(report.updates.len(), 40);
    assert!(harness.prober.max_inspect_in_flight() <= 3);
}

#[tokio::test]
async fn invalid_template_is_rejected_before_starting() {
    let harness = TestHarness::new(StubProber::all_valid()).await;

    let err = harness
        .engine
        .start_scan(ScanRequest::new("http://10.0.0.[9-1]/s"))
        .unwrap_err();
    assert_matches!(err, ScanError::InvalidTemplate(_));
    assert_eq!(harness.engine.state(), EngineState::Idle);
    assert_eq!(harness.prober.total_probes(), 0);
}

#[tokio::test]
async fn zero_workers_is_rejected() {
    let harness = TestHarness::new(StubProber::all_valid()).await;
    let err = harness
        .engine
        .start_scan(ScanRequest::new("http://h/1").with_workers(0))
        .unwrap_err();
    assert_matches!(err, ScanError::InvalidRequest(_));
}

// ---------------------------------------------------------------------------
// Lifecycle and cancellation
// ---------------------------------------------------------------------------

#[tokio::test]
async fn second_session_while_running_is_busy() {
    let harness = TestHarness::new(StubProber::all_valid().with_delay(Duration::from_secs(10))).await;

    let session = harness
        .engine
        .start_scan(ScanRequest::new("http://h/[1-20]"))
        .unwrap();
    assert_eq!(harness.engine.state(), EngineState::Running);

    let err = harness
        .engine
        .start_validation(ValidationRequest::new(["http://h/x"]))
        .unwrap_err();
    assert_matches!(err, ScanError::Busy(EngineState::Running));

    harness.engine.cancel(&session.handle);
    tokio::time::timeout(COLLECT_TIMEOUT, session.collect()).await.unwrap();
}

#[tokio::test]
async fn cancel_is_idempotent_and_returns_to_idle() {
    let harness = TestHarness::new(StubProber::all_valid().with_delay(Duration::from_secs(10))).await;

    let mut session = harness
        .engine
        .start_scan(ScanRequest::new("http://h/[1-500]").with_workers(4))
        .unwrap();

    // Wait until the workers are busy.
    loop {
        match session.events.recv().await {
            Some(ScanEvent::Progress { total, .. }) if total > 4 => break,
            Some(_) => {}
            None => panic!("session ended early"),
        }
    }

    harness.engine.cancel(&session.handle);
    harness.engine.cancel(&session.handle);
    assert_eq!(harness.prober.terminate_calls(), 1);
    assert!(session.handle.is_cancelled());

    let handle = session.handle.clone();
    let report = tokio::time::timeout(COLLECT_TIMEOUT, session.collect()).await.unwrap();
    let summary = report.summary.unwrap();
    assert_eq!(summary.outcome, SessionOutcome::Cancelled);
    assert!(summary.stats.total < 500);

    wait_idle(&harness).await;

    // Cancelling a finished session does nothing.
    harness.engine.cancel(&handle);
    assert_eq!(harness.prober.terminate_calls(), 1);
    assert_eq!(harness.engine.state(), EngineState::Idle);
}

#[tokio::test]
async fn resource_failure_aborts_the_session() {
    let prober = StubProber::fallible(|address, _| {
        if address.ends_with("/3") {
            Err(streamsweep_probe::Error::spawn("ffprobe", "no such file"))
        } else {
            Ok(valid())
        }
    });
    let harness = TestHarness::new(prober).await;

    let session = harness
        .engine
        .start_scan(ScanRequest::new("http://h/[1-5]").with_workers(1))
        .unwrap();
    let report = tokio::time::timeout(COLLECT_TIMEOUT, session.collect()).await.unwrap();

    assert_matches!(report.summary.unwrap().outcome, SessionOutcome::Aborted(reason) => {
        assert!(reason.contains("http://h/3"));
    });
    assert_eq!(harness.engine.state(), EngineState::Idle);

    // The engine accepts new work afterwards.
    let session = harness
        .engine
        .start_validation(ValidationRequest::new(["http://h/1"]))
        .unwrap();
    let report = tokio::time::timeout(COLLECT_TIMEOUT, session.collect()).await.unwrap();
    assert_eq!(report.summary.unwrap().outcome, SessionOutcome::Completed);
}

// ---------------------------------------------------------------------------
// Validation
// ---------------------------------------------------------------------------

#[tokio::test]
async fn validation_reports_invalid_records() {
    let prober = StubProber::new(|address, _| {
        if address.contains("dead") {
            invalid(ErrorKind::NotFound)
        } else {
            valid()
        }
    });
    let harness = TestHarness::new(prober).await;

    let session = harness
        .engine
        .start_validation(ValidationRequest::new([
            "http://a/live",
            "http://b/dead",
            "",
            "http://a/live",
        ]))
        .unwrap();
    let report = tokio::time::timeout(COLLECT_TIMEOUT, session.collect()).await.unwrap();

    let stats = report.summary.unwrap().stats;
    assert_eq!((stats.total, stats.valid, stats.invalid), (2, 1, 1));

    let dead = report.records.iter().find(|r| r.address == "http://b/dead").unwrap();
    assert!(!dead.valid);
    assert_eq!(dead.error.as_deref(), Some("stub not_found"));
}

#[tokio::test]
async fn empty_validation_completes_immediately() {
    let harness = TestHarness::new(StubProber::all_valid()).await;
    let session = harness
        .engine
        .start_validation(ValidationRequest::new(Vec::<String>::new()))
        .unwrap();
    let report = tokio::time::timeout(COLLECT_TIMEOUT, session.collect()).await.unwrap();
    let summary = report.summary.unwrap();
    assert_eq!(summary.outcome, SessionOutcome::Completed);
    assert_eq!(summary.stats.total, 0);
}

// ---------------------------------------------------------------------------
// Failed set and retries
// ---------------------------------------------------------------------------

#[tokio::test]
async fn append_scan_keeps_previous_failures() {
    let harness = TestHarness::new(StubProber::new(|_, _| invalid(ErrorKind::Timeout))).await;

    let session = harness.engine.start_scan(ScanRequest::new("http://a/[1-2]")).unwrap();
    session.collect().await;
    let session = harness
        .engine
        .start_scan(ScanRequest::new("http://b/[1-2]").append())
        .unwrap();
    session.collect().await;
    assert_eq!(harness.engine.failed_addresses().len(), 4);

    let session = harness.engine.start_scan(ScanRequest::new("http://c/1")).unwrap();
    session.collect().await;
    assert_eq!(harness.engine.failed_addresses(), vec!["http://c/1"]);
}

#[tokio::test]
async fn retry_candidates_follow_retryable_kinds() {
    let prober = StubProber::new(|address, _| match trailing_number(address) {
        1 => invalid(ErrorKind::Timeout),
        2 => invalid(ErrorKind::NotFound),
        3 => invalid(ErrorKind::ConnectionFailed),
        4 => invalid(ErrorKind::PermissionDenied),
        _ => valid(),
    });
    let harness = TestHarness::new(prober).await;

    let session = harness.engine.start_scan(ScanRequest::new("http://h/[1-5]")).unwrap();
    session.collect().await;

    assert_eq!(harness.engine.failed_addresses().len(), 4);
    assert_eq!(harness.engine.retry_candidates(), vec!["http://h/1", "http://h/3"]);
}

#[tokio::test]
async fn loop_retry_stops_after_a_pass_with_no_new_valid() {
    // 7 failed addresses, 3 fixed per pass: ceil(7/3) = 3 passes plus one empty pass.
    let harness = TestHarness::new(StubProber::fixes_per_pass(3)).await;
    let failed: Vec<String> = (0..7).map(|n| format!("http://h/s{n}")).collect();

    let session = harness
        .engine
        .start_retry(RetryRequest::new(failed).looping())
        .unwrap();
    let report = tokio::time::timeout(COLLECT_TIMEOUT, session.collect()).await.unwrap();

    let recovered: Vec<u64> = report.retry_passes.iter().map(|p| p.new_valid).collect();
    assert_eq!(recovered, vec![3, 3, 1, 0]);
    assert_eq!(report.retry_passes.last().unwrap().still_failing, 0);

    let summary = report.summary.unwrap();
    assert_eq!(summary.passes, 4);
    assert_eq!(summary.stats.valid, 7);
    assert_eq!(summary.stats.valid + summary.stats.invalid, summary.stats.total);

    // A finished loop closes its retry session.
    assert!(!harness.engine.retry_state().active);
}

#[tokio::test]
async fn loop_retry_stops_when_nothing_recovers() {
    let harness = TestHarness::new(StubProber::new(|_, _| invalid(ErrorKind::Timeout))).await;

    let session = harness
        .engine
        .start_retry(RetryRequest::new(["http://h/1", "http://h/2"]).looping())
        .unwrap();
    let report = tokio::time::timeout(COLLECT_TIMEOUT, session.collect()).await.unwrap();

    assert_eq!(report.retry_passes.len(), 1);
    assert_eq!(report.retry_passes[0].still_failing, 2);
    assert_eq!(harness.engine.failed_addresses().len(), 2);
}

#[tokio::test]
async fn retry_counter_grows_until_session_closed() {
    let harness = TestHarness::new(StubProber::new(|_, _| invalid(ErrorKind::Timeout))).await;

    for expected in 1..=3 {
        let session = harness
            .engine
            .start_retry(RetryRequest::new(["http://h/1"]))
            .unwrap();
        let report = session.collect().await;
        assert_eq!(report.retry_passes[0].iteration, expected);

        let state = harness.engine.retry_state();
        assert!(state.active);
        assert_eq!(state.iteration, expected);
        assert!(state.failed.contains("http://h/1"));
    }

    harness.engine.close_retry_session();
    assert_eq!(harness.engine.retry_state().iteration, 0);

    let session = harness
        .engine
        .start_retry(RetryRequest::new(["http://h/1"]))
        .unwrap();
    assert_eq!(session.collect().await.retry_passes[0].iteration, 1);
}
