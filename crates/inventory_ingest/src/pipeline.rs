use std::{collections::BTreeMap, fmt, sync::Arc};

use inventory_events::{normalize, Batch, BatchId, Batcher};
use serde::Serialize;
use tokio::task::JoinSet;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, trace, warn};

use crate::{
    config::PipelineConfig,
    delivery::{
        BatchStatus, DeliveryClient, DeliveryError, DeliveryErrorKind, DeliveryResult, Transport,
    },
    report::{RunFailure, RunReport},
    source::{RecordSource, SourceError},
    stage::BatchStager,
};

/// Lifecycle of a run. `Completed`, `Failed` and `Cancelled` are terminal.
#[derive(Debug, Clone, Copy, Eq, PartialEq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum RunState {
    Idle,
    Extracting,
    Normalizing,
    Batching,
    Delivering,
    Completed,
    Failed,
    Cancelled,
}

impl RunState {
    pub fn is_terminal(self) -> bool {
        matches!(self, Self::Completed | Self::Failed | Self::Cancelled)
    }

    pub fn as_str(self) -> &'static str {
        match self {
            Self::Idle => "idle",
            Self::Extracting => "extracting",
            Self::Normalizing => "normalizing",
            Self::Batching => "batching",
            Self::Delivering => "delivering",
            Self::Completed => "completed",
            Self::Failed => "failed",
            Self::Cancelled => "cancelled",
        }
    }
}

impl fmt::Display for RunState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Drives one source through normalize, batch and deliver, and reports the outcome.
pub struct Pipeline<T> {
    config: PipelineConfig,
    client: Arc<DeliveryClient<T>>,
    cancel: CancellationToken,
    state: RunState,
}

impl<T: Transport> Pipeline<T> {
    pub fn new(config: PipelineConfig, transport: T) -> Self {
        let cancel = CancellationToken::new();
        let client = DeliveryClient::new(transport, config.retry, config.target.attempt_timeout())
            .with_cancellation(cancel.clone());
        Self {
            config,
            client: Arc::new(client),
            cancel,
            state: RunState::Idle,
        }
    }

    /// Token that cancels the run: no new records are pulled, no new deliveries start,
    /// and remaining batches are reported as cancelled.
    pub fn cancellation_token(&self) -> CancellationToken {
        self.cancel.clone()
    }

    pub fn config(&self) -> &PipelineConfig {
        &self.config
    }

    pub fn state(&self) -> RunState {
        self.state
    }

    /// Runs `source` to completion.
    ///
    /// Never returns an error: source failures, delivery failures and cancellation all end
    /// up in the returned [`RunReport`].
    pub async fn run<S: RecordSource>(&mut self, source: S) -> RunReport {
        let mut report = RunReport::start(source.resource());
        self.state = RunState::Idle;
        info!(
            resource = %report.resource,
            concurrency = self.config.concurrency,
            max_bytes = self.config.batch.max_bytes,
            max_events = self.config.batch.max_events,
            "run started"
        );

        let stager = match self.config.stage_dir.clone() {
            Some(dir) => match BatchStager::create(dir).await {
                Ok(stager) => Some(stager),
                Err(err) => {
                    error!(error = %err, "cannot prepare stage directory");
                    report.fail(RunFailure::new("stage", err.to_string()));
                    return self.finish(report, RunState::Failed);
                }
            },
            None => None,
        };

        self.transition(RunState::Extracting);
        let opened = tokio::select! {
            biased;
            _ = self.cancel.cancelled() => None,
            opened = source.open() => Some(opened),
        };
        let records = match opened {
            None => return self.finish(report, RunState::Cancelled),
            Some(Err(err)) => {
                error!(
                    resource = %report.resource,
                    kind = err.kind(),
                    error = %err,
                    "source failed"
                );
                report.fail(RunFailure::from(&err));
                return self.finish(report, RunState::Failed);
            }
            Some(Ok(records)) => records,
        };

        let mut dispatch = Dispatch {
            client: Arc::clone(&self.client),
            cancel: self.cancel.clone(),
            stager,
            concurrency: self.config.concurrency,
            stop_on_failure: self.config.stop_on_failure,
            halted: false,
            tasks: JoinSet::new(),
            in_flight: BTreeMap::new(),
        };
        let mut batcher = Batcher::new(self.config.batch);
        let mut fatal: Option<SourceError> = None;

        for item in records {
            if self.cancel.is_cancelled() {
                break;
            }
            let raw = match item {
                Ok(raw) => raw,
                Err(err) if err.is_fatal() => {
                    fatal = Some(err);
                    break;
                }
                Err(err) => {
                    warn!(resource = %report.resource, error = %err, "skipping malformed record");
                    report.record_skipped();
                    continue;
                }
            };
            report.record_read();

            self.transition(RunState::Normalizing);
            let normalized = normalize(raw, &self.config.context);
            if let Some(warning) = &normalized.warning {
                report.record_warning(warning.kind());
            }

            self.transition(RunState::Batching);
            match batcher.add(normalized.event) {
                Ok(Some(batch)) => {
                    self.transition(RunState::Delivering);
                    dispatch.submit(batch, &mut report).await;
                }
                Ok(None) => {}
                Err(err) => {
                    warn!(error = %err, "skipping record that cannot be encoded");
                    report.record_skipped();
                }
            }
        }

        self.transition(RunState::Delivering);
        let mut end_state = RunState::Completed;
        if let Some(err) = fatal {
            error!(
                resource = %report.resource,
                kind = err.kind(),
                error = %err,
                "source failed mid-stream"
            );
            report.fail(RunFailure::from(&err));
            end_state = RunState::Failed;
        }

        if let Some(batch) = batcher.flush() {
            if end_state == RunState::Failed {
                report.record(DeliveryResult::undelivered(&batch, BatchStatus::Skipped));
            } else {
                dispatch.submit(batch, &mut report).await;
            }
        }
        dispatch.drain(&mut report).await;

        if end_state == RunState::Completed && self.cancel.is_cancelled() {
            end_state = RunState::Cancelled;
        }
        self.finish(report, end_state)
    }

    fn transition(&mut self, next: RunState) {
        if self.state != next {
            trace!(from = %self.state, to = %next, "run state");
            self.state = next;
        }
    }

    fn finish(&mut self, mut report: RunReport, state: RunState) -> RunReport {
        self.transition(state);
        report.finish(state);
        let summary = &report.summary;
        info!(
            resource = %report.resource,
            state = %report.state,
            status = %report.status,
            records_read = report.records_read,
            records_skipped = report.records_skipped,
            batches = summary.total,
            succeeded = summary.succeeded,
            failed = summary.failed,
            cancelled = summary.cancelled,
            skipped = summary.skipped,
            duration_ms = report.duration_ms,
            "run finished"
        );
        report
    }
}

/// Bounded set of in-flight deliveries for one run.
struct Dispatch<T> {
    client: Arc<DeliveryClient<T>>,
    cancel: CancellationToken,
    stager: Option<BatchStager>,
    concurrency: usize,
    stop_on_failure: bool,
    halted: bool,
    tasks: JoinSet<DeliveryResult>,
    /// Placeholders for spawned deliveries, used if a task dies without a result.
    in_flight: BTreeMap<BatchId, DeliveryResult>,
}

impl<T: Transport> Dispatch<T> {
    async fn submit(&mut self, batch: Batch, report: &mut RunReport) {
        if self.cancel.is_cancelled() {
            report.record(DeliveryResult::undelivered(&batch, BatchStatus::Cancelled));
            return;
        }
        while self.tasks.len() >= self.concurrency {
            if !self.join_one(report).await {
                break;
            }
        }
        if self.cancel.is_cancelled() {
            report.record(DeliveryResult::undelivered(&batch, BatchStatus::Cancelled));
            return;
        }
        if self.halted {
            debug!(batch_id = %batch.id(), "skipping batch after earlier failure");
            report.record(DeliveryResult::undelivered(&batch, BatchStatus::Skipped));
            return;
        }

        if let Some(stager) = &self.stager {
            match stager.stage(&batch).await {
                Ok(path) => debug!(batch_id = %batch.id(), path = %path.display(), "batch staged"),
                Err(err) => warn!(batch_id = %batch.id(), error = %err, "failed to stage batch"),
            }
        }

        debug!(
            batch_id = %batch.id(),
            events = batch.len(),
            bytes = batch.bytes(),
            "dispatching batch"
        );
        self.in_flight.insert(
            batch.id(),
            DeliveryResult::undelivered(&batch, BatchStatus::Failure),
        );
        let client = Arc::clone(&self.client);
        self.tasks
            .spawn(async move { client.deliver(&batch).await });
    }

    /// Waits for one delivery. Returns `false` when nothing was in flight.
    async fn join_one(&mut self, report: &mut RunReport) -> bool {
        match self.tasks.join_next().await {
            None => false,
            Some(Ok(result)) => {
                self.in_flight.remove(&result.batch_id);
                if result.status == BatchStatus::Failure && self.stop_on_failure && !self.halted {
                    warn!(
                        batch_id = %result.batch_id,
                        "batch failed; remaining batches will be skipped"
                    );
                    self.halted = true;
                }
                report.record(result);
                true
            }
            Some(Err(err)) => {
                error!(error = %err, "delivery task ended abnormally");
                true
            }
        }
    }

    async fn drain(&mut self, report: &mut RunReport) {
        while self.join_one(report).await {}
        for (_, mut orphan) in std::mem::take(&mut self.in_flight) {
            orphan.error = Some(DeliveryError::new(
                DeliveryErrorKind::Internal,
                "delivery task ended without a result",
            ));
            report.record(orphan);
        }
    }
}
