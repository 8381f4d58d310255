use std::{
    collections::{BTreeMap, BTreeSet},
    sync::{Arc, Mutex},
    time::Duration,
};

use inventory_events::{
    BatchId, BatchLimits, IngestLimits, LineRecordError, NormalizationContext, RawRecord,
};
use inventory_ingest::{
    BatchStatus, DeliveryError, DeliveryErrorKind, DeliveryTarget, Input, IterSource, Pipeline,
    PipelineConfig, ReaderSource, RetryPolicy, RunState, RunStatus, SourceError, Transport,
};
use serde_json::{json, Value};
use tokio_util::sync::CancellationToken;

#[derive(Default)]
struct Script {
    /// Batches that always fail with a server error.
    failing: BTreeSet<u64>,
    bodies: Vec<(BatchId, Vec<u8>)>,
    calls: BTreeMap<u64, u32>,
    /// Batch whose delivery task panics.
    panic_on: Option<u64>,
    /// Cancels the token while this batch is being sent.
    cancel_during: Option<(u64, CancellationToken)>,
}

#[derive(Clone, Default)]
struct ScriptedTransport(Arc<Mutex<Script>>);

impl ScriptedTransport {
    fn failing(ids: &[u64]) -> Self {
        let transport = Self::default();
        transport.0.lock().unwrap().failing = ids.iter().copied().collect();
        transport
    }

    fn delivered_events(&self) -> Vec<Value> {
        let script = self.0.lock().unwrap();
        let mut bodies = script.bodies.clone();
        bodies.sort_by_key(|(id, _)| *id);
        bodies
            .iter()
            .flat_map(|(_, body)| {
                String::from_utf8(body.clone())
                    .unwrap()
                    .lines()
                    .map(|line| serde_json::from_str::<Value>(line).unwrap())
                    .collect::<Vec<_>>()
            })
            .collect()
    }

    fn calls(&self, id: u64) -> u32 {
        self.0.lock().unwrap().calls.get(&id).copied().unwrap_or(0)
    }
}

impl Transport for ScriptedTransport {
    async fn send(&self, batch_id: BatchId, body: &[u8]) -> Result<(), DeliveryError> {
        let cancel = {
            let mut script = self.0.lock().unwrap();
            *script.calls.entry(batch_id.get()).or_default() += 1;
            if script.panic_on == Some(batch_id.get()) {
                drop(script);
                panic!("transport crashed on batch {batch_id}");
            }
            if script.failing.contains(&batch_id.get()) {
                return Err(DeliveryError::from_status(503, None, "collector busy"));
            }
            script.bodies.push((batch_id, body.to_vec()));
            script
                .cancel_during
                .as_ref()
                .filter(|(id, _)| *id == batch_id.get())
                .map(|(_, token)| token.clone())
        };
        if let Some(token) = cancel {
            token.cancel();
            tokio::time::sleep(Duration::from_millis(20)).await;
        }
        Ok(())
    }
}

fn config(max_events: usize) -> PipelineConfig {
    PipelineConfig {
        resource: "instances".to_string(),
        context: NormalizationContext::new(
            "inventory-host",
            "compute instances list",
            "cloud:compute:instance",
            "inventory",
        )
        .unwrap()
        .with_timestamp(Some("creationTimestamp"), None)
        .unwrap(),
        target: DeliveryTarget::DryRun {
            timeout: Duration::from_secs(5),
        },
        batch: BatchLimits::new(0, max_events).unwrap(),
        ingest: IngestLimits::default(),
        retry: RetryPolicy {
            max_attempts: 3,
            base_delay: Duration::from_millis(1),
            max_delay: Duration::from_millis(2),
            jitter: false,
        },
        concurrency: 1,
        stop_on_failure: false,
        stage_dir: None,
    }
}

fn records(n: usize) -> Vec<RawRecord> {
    (0..n)
        .map(|i| RawRecord::from_value(json!({ "id": i, "zone": "us-central1-a" })).unwrap())
        .collect()
}

#[tokio::test]
async fn timestamps_are_extracted_or_omitted() {
    let transport = ScriptedTransport::default();
    let source = IterSource::new(
        "instances",
        vec![
            RawRecord::from_value(json!({"id": "a", "creationTimestamp": "2022-01-01T00:00:00.000Z"}))
                .unwrap(),
            RawRecord::from_value(json!({"id": "b"})).unwrap(),
        ],
    );

    let mut pipeline = Pipeline::new(config(1000), transport.clone());
    let report = pipeline.run(source).await;

    assert_eq!(report.state, RunState::Completed);
    assert_eq!(pipeline.state(), RunState::Completed);
    assert_eq!(report.status, RunStatus::Success);
    assert_eq!(report.records_read, 2);
    assert_eq!(report.warnings.get("missing_timestamp"), Some(&1));
    assert_eq!(report.exit_code(), 0);

    let events = transport.delivered_events();
    assert_eq!(events.len(), 2);
    assert_eq!(events[0]["time"], json!(1_640_995_200));
    assert_eq!(events[0]["sourcetype"], "cloud:compute:instance");
    assert_eq!(events[0]["event"]["id"], "a");
    assert!(events[1].get("time").is_none());
    assert_eq!(events[1]["event"], json!({"id": "b"}));
}

#[tokio::test]
async fn one_exhausted_batch_out_of_three_is_partial_failure() {
    let transport = ScriptedTransport::failing(&[2]);
    let mut pipeline = Pipeline::new(config(2), transport.clone());
    let report = pipeline.run(IterSource::new("instances", records(6))).await;

    assert_eq!(report.status, RunStatus::PartialFailure);
    assert_eq!(report.summary.total, 3);
    assert_eq!(report.summary.succeeded, 2);
    assert_eq!(report.summary.failed, 1);
    assert_eq!(report.failed_batch_ids(), &[BatchId::new(2)]);
    assert_eq!(report.summary.error_kinds.get("server"), Some(&1));
    assert_eq!(report.batches[1].attempts, 3);
    assert_eq!(transport.calls(2), 3);
    assert_eq!(report.exit_code(), 3);

    let delivered: Vec<Value> = transport
        .delivered_events()
        .into_iter()
        .map(|event| event["event"]["id"].clone())
        .collect();
    assert_eq!(delivered, vec![json!(0), json!(1), json!(4), json!(5)]);
}

#[tokio::test]
async fn stop_on_failure_skips_later_batches() {
    let transport = ScriptedTransport::failing(&[1]);
    let mut config = config(2);
    config.stop_on_failure = true;

    let report = Pipeline::new(config, transport.clone())
        .run(IterSource::new("instances", records(5)))
        .await;

    let statuses: Vec<BatchStatus> = report.batches.iter().map(|r| r.status).collect();
    assert_eq!(
        statuses,
        vec![BatchStatus::Failure, BatchStatus::Skipped, BatchStatus::Skipped]
    );
    assert_eq!(report.status, RunStatus::Failure);
    assert_eq!(report.summary.skipped, 2);
    assert_eq!(transport.calls(2), 0);
    assert_eq!(report.exit_code(), 4);
}

#[tokio::test]
async fn malformed_records_are_counted_not_fatal() {
    let items = vec![
        Ok(records(1).remove(0)),
        Err(SourceError::Malformed {
            line_number: 2,
            source: LineRecordError::JsonParse {
                summary: "expected value at line 1 column 1".to_string(),
            },
        }),
        Ok(records(2).remove(1)),
    ];
    let transport = ScriptedTransport::default();
    let report = Pipeline::new(config(10), transport.clone())
        .run(IterSource::from_results("instances", items))
        .await;

    assert_eq!(report.state, RunState::Completed);
    assert_eq!(report.status, RunStatus::Success);
    assert_eq!(report.records_read, 2);
    assert_eq!(report.records_skipped, 1);
    assert_eq!(transport.delivered_events().len(), 2);
}

#[tokio::test]
async fn fatal_source_error_fails_run_and_keeps_delivered_batches() {
    let mut items: Vec<Result<RawRecord, SourceError>> = records(3).into_iter().map(Ok).collect();
    items.push(Err(SourceError::Malformed {
        line_number: 4,
        source: LineRecordError::Io {
            message: "pipe closed".to_string(),
        },
    }));
    items.extend(records(2).into_iter().map(Ok));

    let transport = ScriptedTransport::default();
    let report = Pipeline::new(config(2), transport.clone())
        .run(IterSource::from_results("instances", items))
        .await;

    assert_eq!(report.state, RunState::Failed);
    assert_eq!(report.failure.as_ref().map(|f| f.kind), Some("io"));
    let statuses: Vec<BatchStatus> = report.batches.iter().map(|r| r.status).collect();
    assert_eq!(statuses, vec![BatchStatus::Success, BatchStatus::Skipped]);
    assert_eq!(report.records_read, 3);
    assert_eq!(transport.delivered_events().len(), 2);
    assert_eq!(report.exit_code(), 5);
}

#[tokio::test]
async fn unreadable_source_fails_before_any_delivery() {
    let dir = tempfile::TempDir::new().expect("temp dir");
    let source = ReaderSource::new("instances", Input::File(dir.path().join("missing.json")));

    let report = Pipeline::new(config(10), ScriptedTransport::default())
        .run(source)
        .await;

    assert_eq!(report.state, RunState::Failed);
    assert_eq!(report.status, RunStatus::Failure);
    assert!(report.batches.is_empty());
    assert!(report.render_text().contains("missing.json"));
    assert_eq!(report.exit_code(), 5);
}

#[tokio::test]
async fn cancelled_run_delivers_nothing() {
    let transport = ScriptedTransport::default();
    let mut pipeline = Pipeline::new(config(2), transport.clone());
    pipeline.cancellation_token().cancel();

    let report = pipeline.run(IterSource::new("instances", records(4))).await;

    assert_eq!(report.state, RunState::Cancelled);
    assert!(transport.delivered_events().is_empty());
    assert_eq!(report.exit_code(), 130);
}

#[tokio::test]
async fn concurrent_delivery_preserves_every_event_once() {
    let transport = ScriptedTransport::default();
    let mut config = config(3);
    config.concurrency = 4;

    let report = Pipeline::new(config, transport.clone())
        .run(IterSource::new("instances", records(29)))
        .await;

    assert_eq!(report.status, RunStatus::Success);
    let ids: Vec<u64> = report.batches.iter().map(|r| r.batch_id.get()).collect();
    assert_eq!(ids, (1..=10).collect::<Vec<_>>());
    assert_eq!(report.summary.events_delivered, 29);

    let delivered: Vec<Value> = transport
        .delivered_events()
        .into_iter()
        .map(|event| event["event"]["id"].clone())
        .collect();
    let expected: Vec<Value> = (0..29).map(|i| json!(i)).collect();
    assert_eq!(delivered, expected);
}

#[tokio::test]
async fn staged_batches_match_delivered_bodies() {
    let dir = tempfile::TempDir::new().expect("temp dir");
    let mut config = config(2);
    config.stage_dir = Some(dir.path().join("staged"));

    let transport = ScriptedTransport::default();
    let report = Pipeline::new(config, transport.clone())
        .run(IterSource::new("instances", records(3)))
        .await;
    assert_eq!(report.summary.total, 2);

    let staged = std::fs::read(dir.path().join("staged/batch-00002.ndjson")).expect("staged");
    let sent = transport.0.lock().unwrap().bodies[1].1.clone();
    assert_eq!(staged, sent);
}

#[tokio::test]
async fn cancelling_mid_run_accounts_for_every_batch() {
    let transport = ScriptedTransport::default();
    let mut pipeline = Pipeline::new(config(2), transport.clone());
    transport.0.lock().unwrap().cancel_during = Some((2, pipeline.cancellation_token()));

    let report = pipeline.run(IterSource::new("instances", records(10))).await;

    assert_eq!(report.state, RunState::Cancelled);
    assert_eq!(report.exit_code(), 130);
    assert!(report.batches.len() >= 3);
    let ids: Vec<u64> = report.batches.iter().map(|r| r.batch_id.get()).collect();
    assert_eq!(ids, (1..=report.batches.len() as u64).collect::<Vec<_>>());
    assert_eq!(report.batches[0].status, BatchStatus::Success);
    assert_eq!(report.batches[1].status, BatchStatus::Success);
    for result in &report.batches[2..] {
        assert_eq!(result.status, BatchStatus::Cancelled, "batch {}", result.batch_id);
        assert_eq!(transport.calls(result.batch_id.get()), 0);
    }
    assert_eq!(
        report.summary.cancelled,
        report.batches.len() - 2,
        "summary counts cancelled batches"
    );
    assert_eq!(transport.delivered_events().len(), 4);
}

#[tokio::test]
async fn panicking_delivery_is_reported_as_internal_failure() {
    let transport = ScriptedTransport::default();
    transport.0.lock().unwrap().panic_on = Some(2);

    let report = Pipeline::new(config(2), transport.clone())
        .run(IterSource::new("instances", records(6)))
        .await;

    assert_eq!(report.state, RunState::Completed);
    assert_eq!(report.status, RunStatus::PartialFailure);
    let ids: Vec<u64> = report.batches.iter().map(|r| r.batch_id.get()).collect();
    assert_eq!(ids, vec![1, 2, 3]);
    let crashed = &report.batches[1];
    assert_eq!(crashed.status, BatchStatus::Failure);
    assert_eq!(
        crashed.error.as_ref().map(|e| e.kind),
        Some(DeliveryErrorKind::Internal)
    );
    assert_eq!(report.summary.error_kinds.get("internal"), Some(&1));
    assert_eq!(report.exit_code(), 3);
}

#[tokio::test]
async fn pretty_printed_object_stream_is_delivered() {
    let dir = tempfile::TempDir::new().expect("temp dir");
    let path = dir.path().join("instances.json");
    std::fs::write(&path, "{\n  \"id\": \"a\"\n}\n{\n  \"id\": \"b\"\n}\n").expect("write");

    let transport = ScriptedTransport::default();
    let report = Pipeline::new(config(10), transport.clone())
        .run(ReaderSource::new("instances", Input::File(path)))
        .await;

    assert_eq!(report.state, RunState::Completed);
    assert_eq!(report.records_read, 2);
    assert_eq!(report.records_skipped, 0);
    let ids: Vec<Value> = transport
        .delivered_events()
        .into_iter()
        .map(|event| event["event"]["id"].clone())
        .collect();
    assert_eq!(ids, vec![json!("a"), json!("b")]);
}

#[tokio::test]
async fn truncated_object_fails_the_run() {
    let dir = tempfile::TempDir::new().expect("temp dir");
    let path = dir.path().join("instances.json");
    std::fs::write(&path, r#"{"id": "a", "creationTimestamp":"#).expect("write");

    let transport = ScriptedTransport::default();
    let report = Pipeline::new(config(10), transport.clone())
        .run(ReaderSource::new("instances", Input::File(path)))
        .await;

    assert_eq!(report.state, RunState::Failed);
    assert_eq!(report.failure.as_ref().map(|f| f.kind), Some("document"));
    assert_eq!(report.records_read, 0);
    assert!(transport.delivered_events().is_empty());
    assert_eq!(report.exit_code(), 5);
}
