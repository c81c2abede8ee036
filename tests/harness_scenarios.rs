//! End-to-end harness runs against mock engines: the three reference scenarios
//! plus determinism, order-independence, completeness, reload tolerance and
//! empty-result behaviour.

mod common;

use std::fs;
use std::path::Path;
use std::sync::Arc;
use std::time::Duration;

use common::{CountingTrigger, MockBehavior, MockEngine};
use hotswap_verify::core::errors::HsvError;
use hotswap_verify::engine::{Engine, ReloadTrigger};
use hotswap_verify::harness::accumulator::fnv1_32;
use hotswap_verify::harness::report::RunReport;
use hotswap_verify::harness::{Harness, HarnessOptions};
use hotswap_verify::logger::activity::spawn_logger;
use hotswap_verify::logger::jsonl::JsonlConfig;
use hotswap_verify::records::source::RecordSource;

fn options(iterations: usize, parallelism: usize) -> HarnessOptions {
    HarnessOptions {
        iterations,
        parallelism,
        reload_interval: Duration::from_millis(10),
        watchdog: None,
        value_separator: ",".to_string(),
    }
}

fn run(
    evidence: &Path,
    engine: &Arc<MockEngine>,
    trigger: &Arc<CountingTrigger>,
    opts: HarnessOptions,
) -> Result<RunReport, HsvError> {
    Harness::new(
        Arc::clone(engine) as Arc<dyn Engine>,
        Arc::clone(trigger) as Arc<dyn ReloadTrigger>,
        RecordSource::new(evidence),
        opts,
    )
    .run()
}

fn assert_all_equal(report: &RunReport) {
    assert_eq!(report.hashes.len(), report.iterations);
    for slot in &report.hashes {
        assert_eq!(
            slot.hash, report.common_hash,
            "iteration {} diverged",
            slot.iteration
        );
    }
}

#[test]
fn scenario_a_three_records_four_iterations() {
    let dir = tempfile::tempdir().unwrap();
    let evidence = common::write_evidence(dir.path(), 3);
    let engine = Arc::new(MockEngine::new(MockBehavior {
        delay_ms: 5,
        ..MockBehavior::default()
    }));
    let trigger = Arc::new(CountingTrigger::default());

    let report = run(&evidence, &engine, &trigger, options(4, 4)).unwrap();

    assert_eq!(report.records, 3);
    assert_eq!(report.expected_total, 12);
    assert_eq!(report.processed, 12);
    assert_all_equal(&report);
    assert_eq!(report.reloads.failed, 0);
    assert_eq!(report.reloads.attempts, trigger.calls());
    assert_eq!(engine.calls(), 12);
}

/// Scenario B pins the divergent pass to iteration 2. The mock diverges on
/// the third call per record, and only a single worker draining the queue in
/// submission order maps that call onto iteration 2. The harness itself makes
/// no such ordering promise; see the multi-worker variant below.
#[test]
fn scenario_b_divergence_on_iteration_two_is_reported() {
    let dir = tempfile::tempdir().unwrap();
    let evidence = common::write_evidence(dir.path(), 3);
    let engine = Arc::new(MockEngine::new(MockBehavior {
        diverge_on_call: Some(2),
        ..MockBehavior::default()
    }));
    let trigger = Arc::new(CountingTrigger::default());
    let single_worker = options(4, 1);

    let err = run(&evidence, &engine, &trigger, single_worker).unwrap_err();

    assert_eq!(err.code(), "HSV-4001");
    assert!(err.is_consistency_failure());
    match err {
        HsvError::HashMismatch {
            baseline,
            mismatches,
        } => {
            assert_eq!(mismatches.len(), 1);
            assert_eq!(mismatches[0].iteration, 2);
            assert_ne!(mismatches[0].hash, baseline);
        }
        other => panic!("unexpected error: {other}"),
    }
    assert_eq!(engine.calls(), 12);
}

#[test]
fn divergence_is_reported_under_any_completion_order() {
    let dir = tempfile::tempdir().unwrap();
    let evidence = common::write_evidence(dir.path(), 3);

    for parallelism in [0, 4] {
        // Each record drifts in exactly one pass, wherever its third call lands,
        // so at least one pass differs from another.
        let engine = Arc::new(MockEngine::new(MockBehavior {
            diverge_on_call: Some(2),
            jitter_ms: 4,
            ..MockBehavior::default()
        }));
        let trigger = Arc::new(CountingTrigger::default());

        let err = run(&evidence, &engine, &trigger, options(4, parallelism)).unwrap_err();
        match err {
            HsvError::HashMismatch {
                baseline,
                mismatches,
            } => {
                assert!(!mismatches.is_empty());
                assert!(mismatches.iter().all(|m| m.iteration > 0));
                assert!(mismatches.iter().all(|m| m.hash != baseline));
            }
            other => panic!("p={parallelism}: unexpected error: {other}"),
        }
        assert_eq!(engine.calls(), 12);
    }
}

#[test]
fn scenario_c_empty_source_verifies_trivially_without_reloads() {
    let dir = tempfile::tempdir().unwrap();
    let evidence = dir.path().join("empty.yml");
    fs::write(&evidence, "").unwrap();
    let engine = Arc::new(MockEngine::new(MockBehavior::default()));
    let trigger = Arc::new(CountingTrigger::default());

    let report = run(&evidence, &engine, &trigger, options(4, 2)).unwrap();

    assert_eq!(report.expected_total, 0);
    assert_eq!(report.processed, 0);
    assert_eq!(report.reloads.attempts, 0);
    assert_eq!(trigger.calls(), 0);
    assert_eq!(report.common_hash, 0);
    assert_all_equal(&report);
    assert_eq!(engine.calls(), 0);
}

#[test]
fn repeated_passes_agree_without_reload_interference() {
    let dir = tempfile::tempdir().unwrap();
    let evidence = common::write_evidence(dir.path(), 7);

    let mut seen = Vec::new();
    for iterations in 2..=5 {
        for parallelism in [0, 1, 3] {
            let engine = Arc::new(MockEngine::new(MockBehavior::default()));
            let trigger = Arc::new(CountingTrigger::default());
            let report = run(&evidence, &engine, &trigger, options(iterations, parallelism))
                .unwrap_or_else(|e| panic!("n={iterations} p={parallelism}: {e}"));
            assert_all_equal(&report);
            seen.push(report.common_hash);
        }
    }
    assert!(seen.windows(2).all(|w| w[0] == w[1]));
}

#[test]
fn completion_order_does_not_change_hash() {
    let dir = tempfile::tempdir().unwrap();
    let evidence = common::write_evidence(dir.path(), 12);

    // Signature layout of MockEngine: "<ua length>\n<ordinal>".
    let expected = (0..12).fold(0_u32, |acc, idx| {
        let ua = common::USER_AGENTS[idx % common::USER_AGENTS.len()];
        acc ^ fnv1_32(&format!("{}\n{idx}", ua.len()))
    });

    for _ in 0..3 {
        let engine = Arc::new(MockEngine::new(MockBehavior {
            jitter_ms: 8,
            ..MockBehavior::default()
        }));
        let trigger = Arc::new(CountingTrigger::default());
        let report = run(&evidence, &engine, &trigger, options(3, 6)).unwrap();
        assert_eq!(report.common_hash, expected);
        assert_all_equal(&report);
    }
}

#[test]
fn every_record_is_processed_exactly_once_per_iteration() {
    let dir = tempfile::tempdir().unwrap();
    let evidence = common::write_evidence(dir.path(), 25);

    for parallelism in [0, 4] {
        let engine = Arc::new(MockEngine::new(MockBehavior {
            jitter_ms: 2,
            ..MockBehavior::default()
        }));
        let trigger = Arc::new(CountingTrigger::default());
        let report = run(&evidence, &engine, &trigger, options(4, parallelism)).unwrap();

        assert_eq!(report.processed, 100);
        assert_eq!(report.processed, report.expected_total);
        assert_eq!(engine.calls(), 100);
        assert_eq!(engine.released(), 100);
    }
}

#[test]
fn failing_reload_trigger_only_moves_the_failure_count() {
    let dir = tempfile::tempdir().unwrap();
    let evidence = common::write_evidence(dir.path(), 20);

    let baseline_engine = Arc::new(MockEngine::new(MockBehavior::default()));
    let baseline = run(
        &evidence,
        &baseline_engine,
        &Arc::new(CountingTrigger::default()),
        options(3, 2),
    )
    .unwrap();

    let engine = Arc::new(MockEngine::new(MockBehavior {
        delay_ms: 5,
        ..MockBehavior::default()
    }));
    let trigger = Arc::new(CountingTrigger::failing());
    let report = run(&evidence, &engine, &trigger, options(3, 2)).unwrap();

    assert!(report.reloads.attempts >= 1);
    assert_eq!(report.reloads.failed, report.reloads.attempts);
    assert_eq!(report.reloads.succeeded, 0);
    assert!(report.reloads.last_error.is_some());
    assert_eq!(report.processed, 60);
    assert_eq!(report.common_hash, baseline.common_hash);
    assert_all_equal(&report);
}

#[test]
fn empty_results_still_fold_and_count() {
    let dir = tempfile::tempdir().unwrap();
    let evidence = common::write_evidence(dir.path(), 3);
    let engine = Arc::new(MockEngine::new(MockBehavior {
        empty: true,
        ..MockBehavior::default()
    }));
    let trigger = Arc::new(CountingTrigger::default());

    let report = run(&evidence, &engine, &trigger, options(4, 2)).unwrap();

    assert_eq!(report.processed, 12);
    // Three folds of the empty signature: h ^ h ^ h == h.
    assert_eq!(report.common_hash, fnv1_32(""));
    assert_all_equal(&report);
    assert_eq!(engine.released(), 12);
}

#[test]
fn engine_error_aborts_the_run() {
    let dir = tempfile::tempdir().unwrap();
    let evidence = common::write_evidence(dir.path(), 10);
    let engine = Arc::new(MockEngine::new(MockBehavior {
        fail_ordinal: Some("4".to_string()),
        ..MockBehavior::default()
    }));
    let trigger = Arc::new(CountingTrigger::default());

    let err = run(&evidence, &engine, &trigger, options(3, 2)).unwrap_err();
    assert_eq!(err.code(), "HSV-3001");
    assert!(err.to_string().contains("engine refused record 4"));
}

#[test]
fn results_are_released_when_reading_values_fails() {
    let dir = tempfile::tempdir().unwrap();
    let evidence = common::write_evidence(dir.path(), 6);

    for parallelism in [0, 3] {
        let engine = Arc::new(MockEngine::new(MockBehavior {
            phantom_property: true,
            jitter_ms: 2,
            ..MockBehavior::default()
        }));
        let trigger = Arc::new(CountingTrigger::default());

        let err = run(&evidence, &engine, &trigger, options(3, parallelism)).unwrap_err();
        assert_eq!(err.code(), "HSV-3001");
        assert!(err.to_string().contains("DeviceId"));
        assert!(engine.calls() >= 1);
        assert_eq!(engine.released() as u64, engine.calls());
    }
}

#[test]
fn malformed_record_aborts_the_run() {
    let dir = tempfile::tempdir().unwrap();
    let evidence = dir.path().join("evidence.yml");
    fs::write(
        &evidence,
        "---\nheader.user-agent: a\n---\nheader.user-agent: [a, b]\n",
    )
    .unwrap();
    let engine = Arc::new(MockEngine::new(MockBehavior::default()));
    let trigger = Arc::new(CountingTrigger::default());

    let err = run(&evidence, &engine, &trigger, options(2, 1)).unwrap_err();
    assert_eq!(err.code(), "HSV-2002");
}

#[test]
fn missing_source_fails_before_dispatch() {
    let dir = tempfile::tempdir().unwrap();
    let engine = Arc::new(MockEngine::new(MockBehavior::default()));
    let trigger = Arc::new(CountingTrigger::default());

    let err = run(
        &dir.path().join("missing.yml"),
        &engine,
        &trigger,
        options(2, 1),
    )
    .unwrap_err();
    assert_eq!(err.code(), "HSV-2001");
    assert_eq!(trigger.calls(), 0);
}

#[test]
fn watchdog_stops_a_slow_run() {
    let dir = tempfile::tempdir().unwrap();
    let evidence = common::write_evidence(dir.path(), 40);
    let engine = Arc::new(MockEngine::new(MockBehavior {
        delay_ms: 20,
        ..MockBehavior::default()
    }));
    let trigger = Arc::new(CountingTrigger::default());
    let mut opts = options(4, 1);
    opts.watchdog = Some(Duration::from_millis(60));

    let err = run(&evidence, &engine, &trigger, opts).unwrap_err();
    assert_eq!(err.code(), "HSV-4004");
    assert!(engine.calls() < 160);
}

#[test]
fn activity_log_records_the_run() {
    let dir = tempfile::tempdir().unwrap();
    let evidence = common::write_evidence(dir.path(), 3);
    let log_path = dir.path().join("activity.jsonl");
    let (logger, join) = spawn_logger(JsonlConfig::new(&log_path)).unwrap();

    let engine = Arc::new(MockEngine::new(MockBehavior::default()));
    let trigger = Arc::new(CountingTrigger::default());
    let report = Harness::new(
        Arc::clone(&engine) as Arc<dyn Engine>,
        Arc::clone(&trigger) as Arc<dyn ReloadTrigger>,
        RecordSource::new(&evidence),
        options(2, 2),
    )
    .with_logger(Some(logger.clone()))
    .with_config_hash("abc123")
    .run()
    .unwrap();
    logger.shutdown();
    join.join().unwrap();

    let events: Vec<serde_json::Value> = fs::read_to_string(&log_path)
        .unwrap()
        .lines()
        .map(|line| serde_json::from_str(line).unwrap())
        .collect();
    let kinds: Vec<&str> = events
        .iter()
        .filter_map(|e| e["event"].as_str())
        .collect();

    assert_eq!(kinds.first(), Some(&"run_start"));
    assert_eq!(kinds.last(), Some(&"run_complete"));
    assert_eq!(kinds.iter().filter(|k| **k == "iteration_queued").count(), 2);
    let complete = events.last().unwrap();
    assert_eq!(complete["processed"], report.processed);
}
