use std::{
    collections::BTreeMap,
    fmt::{self, Write as _},
    time::{Duration, Instant},
};

use inventory_events::BatchId;
use serde::Serialize;
use time::{format_description::well_known::Rfc3339, OffsetDateTime};

use crate::{
    delivery::{BatchStatus, DeliveryResult},
    pipeline::RunState,
    source::SourceError,
};

pub const EXIT_SUCCESS: u8 = 0;
pub const EXIT_PARTIAL_FAILURE: u8 = 3;
pub const EXIT_FAILURE: u8 = 4;
pub const EXIT_SOURCE_FAILURE: u8 = 5;
pub const EXIT_CANCELLED: u8 = 130;

#[derive(Debug, Clone, Copy, Eq, PartialEq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum RunStatus {
    Success,
    PartialFailure,
    Failure,
}

impl RunStatus {
    /// `Success` when every batch succeeded (vacuously true for zero batches),
    /// `PartialFailure` when some did, `Failure` when none did.
    pub fn from_results(results: &[DeliveryResult]) -> Self {
        let succeeded = results.iter().filter(|r| r.is_success()).count();
        if succeeded == results.len() {
            Self::Success
        } else if succeeded > 0 {
            Self::PartialFailure
        } else {
            Self::Failure
        }
    }

    pub fn as_str(self) -> &'static str {
        match self {
            Self::Success => "success",
            Self::PartialFailure => "partial_failure",
            Self::Failure => "failure",
        }
    }
}

impl fmt::Display for RunStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Why a run ended in [`RunState::Failed`].
#[derive(Debug, Clone, Eq, PartialEq, Serialize)]
pub struct RunFailure {
    pub kind: &'static str,
    pub message: String,
}

impl RunFailure {
    pub fn new(kind: &'static str, message: impl Into<String>) -> Self {
        Self {
            kind,
            message: message.into(),
        }
    }
}

impl From<&SourceError> for RunFailure {
    fn from(err: &SourceError) -> Self {
        Self::new(err.kind(), err.to_string())
    }
}

/// Counts derived from the per-batch results when the run finishes.
#[derive(Debug, Clone, Default, Eq, PartialEq, Serialize)]
pub struct BatchSummary {
    pub total: usize,
    pub succeeded: usize,
    pub failed: usize,
    pub cancelled: usize,
    pub skipped: usize,
    pub attempts: u64,
    pub events_delivered: usize,
    pub bytes_delivered: usize,
    pub failed_batch_ids: Vec<BatchId>,
    pub error_kinds: BTreeMap<&'static str, usize>,
}

impl BatchSummary {
    fn from_results(results: &[DeliveryResult]) -> Self {
        let mut summary = Self {
            total: results.len(),
            ..Self::default()
        };
        for result in results {
            summary.attempts += u64::from(result.attempts);
            match result.status {
                BatchStatus::Success => {
                    summary.succeeded += 1;
                    summary.events_delivered += result.events;
                    summary.bytes_delivered += result.bytes;
                }
                BatchStatus::Failure => {
                    summary.failed += 1;
                    summary.failed_batch_ids.push(result.batch_id);
                }
                BatchStatus::Cancelled => summary.cancelled += 1,
                BatchStatus::Skipped => summary.skipped += 1,
            }
            if let Some(error) = result.error.as_ref().filter(|_| !result.is_success()) {
                *summary.error_kinds.entry(error.kind.as_str()).or_default() += 1;
            }
        }
        summary
    }
}

/// Aggregate outcome of one run. Created at run start, appended to while the run
/// progresses, and finalized by [`RunReport::finish`].
#[derive(Debug, Clone, Serialize)]
pub struct RunReport {
    pub resource: String,
    pub state: RunState,
    pub status: RunStatus,
    pub started_at: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub finished_at: Option<String>,
    pub duration_ms: u64,
    pub records_read: u64,
    pub records_skipped: u64,
    pub warnings: BTreeMap<&'static str, u64>,
    pub summary: BatchSummary,
    pub batches: Vec<DeliveryResult>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub failure: Option<RunFailure>,
    #[serde(skip)]
    started: Instant,
}

impl RunReport {
    pub fn start(resource: impl Into<String>) -> Self {
        Self {
            resource: resource.into(),
            state: RunState::Idle,
            status: RunStatus::Success,
            started_at: now_rfc3339(),
            finished_at: None,
            duration_ms: 0,
            records_read: 0,
            records_skipped: 0,
            warnings: BTreeMap::new(),
            summary: BatchSummary::default(),
            batches: Vec::new(),
            failure: None,
            started: Instant::now(),
        }
    }

    pub fn record_read(&mut self) {
        self.records_read += 1;
    }

    pub fn record_skipped(&mut self) {
        self.records_skipped += 1;
    }

    pub fn record_warning(&mut self, kind: &'static str) {
        *self.warnings.entry(kind).or_default() += 1;
    }

    pub fn record(&mut self, result: DeliveryResult) {
        self.batches.push(result);
    }

    pub fn fail(&mut self, failure: RunFailure) {
        self.failure = Some(failure);
    }

    /// Orders results by batch id and derives the run status and summary.
    ///
    /// A run that did not complete is never reported as `Success`.
    pub fn finish(&mut self, state: RunState) {
        self.state = state;
        self.batches.sort_by_key(|result| result.batch_id);
        self.summary = BatchSummary::from_results(&self.batches);
        self.status = RunStatus::from_results(&self.batches);
        if state != RunState::Completed && self.status == RunStatus::Success {
            self.status = if self.summary.succeeded > 0 {
                RunStatus::PartialFailure
            } else {
                RunStatus::Failure
            };
        }
        self.finished_at = Some(now_rfc3339());
        self.duration_ms = duration_ms(self.started.elapsed());
    }

    pub fn failed_batch_ids(&self) -> &[BatchId] {
        &self.summary.failed_batch_ids
    }

    /// Process exit code for this outcome.
    pub fn exit_code(&self) -> u8 {
        match self.state {
            RunState::Cancelled => EXIT_CANCELLED,
            RunState::Failed => EXIT_SOURCE_FAILURE,
            _ => match self.status {
                RunStatus::Success => EXIT_SUCCESS,
                RunStatus::PartialFailure => EXIT_PARTIAL_FAILURE,
                RunStatus::Failure => EXIT_FAILURE,
            },
        }
    }

    /// Human-readable summary, one fact per line.
    pub fn render_text(&self) -> String {
        let mut out = String::new();
        let s = &self.summary;
        // Writing to a String cannot fail.
        let _ = writeln!(
            out,
            "run resource={} state={} status={}",
            self.resource, self.state, self.status
        );
        let _ = write!(
            out,
            "records: read={} skipped={}",
            self.records_read, self.records_skipped
        );
        for (kind, count) in &self.warnings {
            let _ = write!(out, " {kind}={count}");
        }
        out.push('\n');
        let _ = writeln!(
            out,
            "batches: total={} succeeded={} failed={} cancelled={} skipped={} attempts={}",
            s.total, s.succeeded, s.failed, s.cancelled, s.skipped, s.attempts
        );
        let _ = writeln!(
            out,
            "delivered: events={} bytes={}",
            s.events_delivered, s.bytes_delivered
        );
        if !s.failed_batch_ids.is_empty() {
            let ids: Vec<String> = s.failed_batch_ids.iter().map(|id| id.to_string()).collect();
            let _ = writeln!(out, "failed batches: {}", ids.join(","));
        }
        if !s.error_kinds.is_empty() {
            let kinds: Vec<String> = s
                .error_kinds
                .iter()
                .map(|(kind, count)| format!("{kind}={count}"))
                .collect();
            let _ = writeln!(out, "error kinds: {}", kinds.join(" "));
        }
        if let Some(failure) = &self.failure {
            let _ = writeln!(out, "error ({}): {}", failure.kind, failure.message);
        }
        let _ = writeln!(out, "duration: {}ms", self.duration_ms);
        out
    }

    pub fn to_json(&self) -> Result<String, serde_json::Error> {
        serde_json::to_string_pretty(self)
    }
}

fn now_rfc3339() -> String {
    OffsetDateTime::now_utc()
        .format(&Rfc3339)
        .unwrap_or_default()
}

fn duration_ms(duration: Duration) -> u64 {
    u64::try_from(duration.as_millis()).unwrap_or(u64::MAX)
}
