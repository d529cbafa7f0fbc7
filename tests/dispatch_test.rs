//! Pre-warm deduplication and task execution.

mod common;

use std::sync::Arc;
use std::time::Duration;

use assert_matches::assert_matches;
use common::{FakeEncoder, TestHarness};
use derivforge::dispatch::{TaskEnvelope, TaskQueue};
use derivforge::service::{parse_targets, PrepareStatus, TASK_GENERATE, TASK_OFFLOAD};
use derivforge::{DerivativeClass, Error};
use parking_lot::Mutex;
use serde_json::json;

/// Queue double recording submissions.
#[derive(Default)]
struct RecordingQueue {
    submitted: Mutex<Vec<TaskEnvelope>>,
    failing: bool,
}

impl TaskQueue for RecordingQueue {
    fn submit(&self, envelope: &TaskEnvelope) -> derivforge::Result<()> {
        if self.failing {
            return Err(Error::internal("queue down"));
        }
        self.submitted.lock().push(envelope.clone());
        Ok(())
    }
}

// ---------------------------------------------------------------------------
// Local dispatch
// ---------------------------------------------------------------------------

#[test]
fn test_duplicate_prepare_reports_already_running() {
    let harness = TestHarness::with_encoder(
        FakeEncoder::succeeding().with_delay(Duration::from_millis(300)),
    );
    let source = harness.source("clip.mp4");

    let first = harness.service.prepare(&source, &[DerivativeClass::HdProxy]).unwrap();
    let second = harness.service.prepare(&source, &[DerivativeClass::HdProxy]).unwrap();
    assert_eq!(first.outcomes["hd"], PrepareStatus::Started);
    assert_eq!(second.outcomes["hd"], PrepareStatus::AlreadyRunning);

    harness.drain();
    assert_eq!(harness.encoder.count(), 1);

    let third = harness.service.prepare(&source, &[DerivativeClass::HdProxy]).unwrap();
    assert_eq!(third.outcomes["hd"], PrepareStatus::Ready);
}

#[test]
fn test_prepare_several_targets() {
    let harness = TestHarness::new();
    let source = harness.source("clip.mp4");

    let targets = parse_targets(&["fast,adaptive".to_string()]);
    let report = harness.service.prepare(&source, &targets).unwrap();
    assert_eq!(report.outcomes.len(), 2);
    assert!(report.outcomes.values().all(|s| *s == PrepareStatus::Started));

    harness.drain();
    let sources = harness.service.sources(&source).unwrap();
    assert!(sources.fast.ready);
    assert!(sources.hls.ready);
    assert!(!sources.hd.ready);
    assert_eq!(sources.variants.len(), 3);
}

#[test]
fn test_failed_task_clears_its_id() {
    let harness = TestHarness::with_encoder(FakeEncoder::scripted(|_| common::Outcome::Fail));
    let source = harness.source("clip.mp4");

    harness.service.prepare(&source, &[DerivativeClass::FastProxy]).unwrap();
    harness.drain();

    let again = harness.service.prepare(&source, &[DerivativeClass::FastProxy]).unwrap();
    assert_eq!(again.outcomes["fast"], PrepareStatus::Started);
    harness.drain();
    assert_eq!(harness.encoder.count(), 2);
}

// ---------------------------------------------------------------------------
// External queue
// ---------------------------------------------------------------------------

#[test]
fn test_external_queue_receives_envelope() {
    let queue = Arc::new(RecordingQueue::default());
    let harness = TestHarness::with_queue(FakeEncoder::succeeding(), queue.clone());
    let source = harness.source("clip.mp4");

    let first = harness.service.prepare(&source, &[DerivativeClass::Hls]).unwrap();
    let second = harness.service.prepare(&source, &[DerivativeClass::Hls]).unwrap();
    assert_eq!(first.outcomes["hls"], PrepareStatus::Queued);
    assert_eq!(second.outcomes["hls"], PrepareStatus::AlreadyRunning);
    assert_eq!(harness.encoder.count(), 0);

    let submitted = queue.submitted.lock().clone();
    assert_eq!(submitted.len(), 1);
    assert_eq!(submitted[0].name, TASK_GENERATE);
    assert!(submitted[0].id.starts_with("hls:"));
    assert_eq!(submitted[0].payload["class"], "hls");
}

#[test]
fn test_queue_failure_runs_locally() {
    let queue = Arc::new(RecordingQueue {
        failing: true,
        ..Default::default()
    });
    let harness = TestHarness::with_queue(FakeEncoder::succeeding(), queue);
    let source = harness.source("clip.mp4");

    let report = harness.service.prepare(&source, &[DerivativeClass::HdProxy]).unwrap();
    assert_eq!(report.outcomes["hd"], PrepareStatus::Started);
    harness.drain();
    assert_eq!(harness.encoder.count(), 1);
}

// ---------------------------------------------------------------------------
// Worker side
// ---------------------------------------------------------------------------

#[test]
fn test_execute_generate_envelope() {
    let harness = TestHarness::new();
    let source = harness.source("clip.mp4");

    let envelope = TaskEnvelope {
        id: "hd:test".to_string(),
        name: TASK_GENERATE.to_string(),
        payload: json!({ "class": "hd-proxy", "source": source }),
    };
    harness.service.execute(&envelope).unwrap();

    let target = harness.service.target(DerivativeClass::HdProxy, &source).unwrap();
    assert!(target.path.is_file());
}

#[test]
fn test_execute_rejects_unknown_and_stale_tasks() {
    let harness = TestHarness::new();

    let unknown = TaskEnvelope {
        id: "x".to_string(),
        name: "transmogrify".to_string(),
        payload: json!({}),
    };
    assert_matches!(harness.service.execute(&unknown), Err(Error::InvalidInput(_)));

    let stale = TaskEnvelope {
        id: "offload:proxy:gone".to_string(),
        name: TASK_OFFLOAD.to_string(),
        payload: json!({
            "class": "hd-proxy",
            "key": "ab".repeat(32),
            "path": harness.dir.path().join("gone.mp4"),
        }),
    };
    assert_matches!(
        harness.service.execute(&stale),
        Err(Error::CacheCorruption { .. })
    );
}
