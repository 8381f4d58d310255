use std::time::Duration;

use inventory_events::{Batch, BatchId};
use serde::Serialize;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use super::{DeliveryError, RetryPolicy, Transport};

#[derive(Debug, Clone, Copy, Eq, PartialEq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum BatchStatus {
    Success,
    Failure,
    /// The run was cancelled before the batch was delivered.
    Cancelled,
    /// Not dispatched because an earlier batch failed and the run stops on failure.
    Skipped,
}

impl BatchStatus {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Success => "success",
            Self::Failure => "failure",
            Self::Cancelled => "cancelled",
            Self::Skipped => "skipped",
        }
    }
}

/// Final outcome of delivering one batch.
#[derive(Debug, Clone, Eq, PartialEq, Serialize)]
pub struct DeliveryResult {
    pub batch_id: BatchId,
    pub status: BatchStatus,
    pub attempts: u32,
    pub events: usize,
    pub bytes: usize,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<DeliveryError>,
}

impl DeliveryResult {
    /// A result for a batch that never reached the transport.
    pub fn undelivered(batch: &Batch, status: BatchStatus) -> Self {
        Self {
            batch_id: batch.id(),
            status,
            attempts: 0,
            events: batch.len(),
            bytes: batch.bytes(),
            error: None,
        }
    }

    pub fn is_success(&self) -> bool {
        self.status == BatchStatus::Success
    }
}

/// Delivers batches through a [`Transport`], retrying transient failures.
pub struct DeliveryClient<T> {
    transport: T,
    retry: RetryPolicy,
    attempt_timeout: Duration,
    cancel: CancellationToken,
}

impl<T: Transport> DeliveryClient<T> {
    pub fn new(transport: T, retry: RetryPolicy, attempt_timeout: Duration) -> Self {
        Self {
            transport,
            retry,
            attempt_timeout,
            cancel: CancellationToken::new(),
        }
    }

    /// Stops retries and further attempts once `cancel` fires. An attempt already in flight
    /// runs to completion.
    pub fn with_cancellation(mut self, cancel: CancellationToken) -> Self {
        self.cancel = cancel;
        self
    }

    pub fn retry_policy(&self) -> RetryPolicy {
        self.retry
    }

    pub fn transport(&self) -> &T {
        &self.transport
    }

    /// Sends `batch` as a single NDJSON body.
    ///
    /// Never fails: every outcome, including cancellation, is described by the returned
    /// [`DeliveryResult`]. The batch is either accepted as a whole or not at all.
    pub async fn deliver(&self, batch: &Batch) -> DeliveryResult {
        let mut result = DeliveryResult::undelivered(batch, BatchStatus::Failure);
        let body = match batch.to_ndjson() {
            Ok(body) => body,
            Err(err) => {
                result.error = Some(DeliveryError::from(err));
                return result;
            }
        };

        let batch_id = batch.id();
        while result.attempts < self.retry.max_attempts {
            if self.cancel.is_cancelled() {
                result.status = BatchStatus::Cancelled;
                return result;
            }

            result.attempts += 1;
            let attempt = result.attempts;
            let outcome = match tokio::time::timeout(
                self.attempt_timeout,
                self.transport.send(batch_id, &body),
            )
            .await
            {
                Ok(outcome) => outcome,
                Err(_) => Err(DeliveryError::timeout(self.attempt_timeout)),
            };

            let err = match outcome {
                Ok(()) => {
                    info!(
                        batch_id = %batch_id,
                        events = batch.len(),
                        bytes = batch.bytes(),
                        attempt,
                        "batch delivered"
                    );
                    result.status = BatchStatus::Success;
                    result.error = None;
                    return result;
                }
                Err(err) => err,
            };

            if !err.is_transient() {
                warn!(batch_id = %batch_id, attempt, error = %err, "batch rejected");
                result.error = Some(err);
                return result;
            }
            if attempt >= self.retry.max_attempts {
                warn!(
                    batch_id = %batch_id,
                    attempts = attempt,
                    error = %err,
                    "batch failed after exhausting retries"
                );
                result.error = Some(err);
                return result;
            }

            let delay = self.retry.backoff(attempt, err.retry_after);
            debug!(
                batch_id = %batch_id,
                attempt,
                delay_ms = u64::try_from(delay.as_millis()).unwrap_or(u64::MAX),
                error = %err,
                "transient delivery failure, will retry"
            );
            result.error = Some(err);

            tokio::select! {
                _ = self.cancel.cancelled() => {
                    result.status = BatchStatus::Cancelled;
                    return result;
                }
                _ = tokio::time::sleep(delay) => {}
            }
        }
        result
    }
}
