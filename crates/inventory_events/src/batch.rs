use std::fmt;

use serde::Serialize;
use tracing::warn;

use crate::{BatchLimits, EncodeError, NormalizedEvent};

/// Stable, 1-based identifier of a batch within one run.
#[derive(Debug, Clone, Copy, Eq, PartialEq, Ord, PartialOrd, Hash, Serialize)]
#[serde(transparent)]
pub struct BatchId(u64);

impl BatchId {
    pub fn new(sequence: u64) -> Self {
        Self(sequence)
    }

    pub fn get(self) -> u64 {
        self.0
    }
}

impl fmt::Display for BatchId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// An ordered group of events delivered in a single request.
#[derive(Debug, Clone, PartialEq)]
pub struct Batch {
    id: BatchId,
    events: Vec<NormalizedEvent>,
    bytes: usize,
}

impl Batch {
    pub fn id(&self) -> BatchId {
        self.id
    }

    pub fn events(&self) -> &[NormalizedEvent] {
        &self.events
    }

    pub fn len(&self) -> usize {
        self.events.len()
    }

    pub fn is_empty(&self) -> bool {
        self.events.is_empty()
    }

    /// Encoded NDJSON size of the batch body.
    pub fn bytes(&self) -> usize {
        self.bytes
    }

    pub fn into_events(self) -> Vec<NormalizedEvent> {
        self.events
    }

    /// Encodes the batch as newline-delimited JSON, one envelope per line.
    pub fn to_ndjson(&self) -> Result<Vec<u8>, EncodeError> {
        let mut body = Vec::with_capacity(self.bytes);
        for event in &self.events {
            serde_json::to_writer(&mut body, event)?;
            body.push(b'\n');
        }
        Ok(body)
    }
}

/// Groups events into [`Batch`]es bounded by [`BatchLimits`], preserving arrival order.
#[derive(Debug)]
pub struct Batcher {
    limits: BatchLimits,
    next_id: u64,
    pending: Vec<NormalizedEvent>,
    pending_bytes: usize,
}

impl Batcher {
    pub fn new(limits: BatchLimits) -> Self {
        Self {
            limits,
            next_id: 1,
            pending: Vec::new(),
            pending_bytes: 0,
        }
    }

    pub fn limits(&self) -> BatchLimits {
        self.limits
    }

    /// Number of events waiting for the current batch to complete.
    pub fn pending_len(&self) -> usize {
        self.pending.len()
    }

    /// Adds an event, returning the batch it completed, if any.
    ///
    /// An event that would push the current batch over the byte limit completes that batch
    /// and starts the next one. An event larger than the limit on its own is kept whole and
    /// travels alone.
    pub fn add(&mut self, event: NormalizedEvent) -> Result<Option<Batch>, EncodeError> {
        let event_bytes = event.to_ndjson_line()?.len();

        let mut completed = None;
        if !self.pending.is_empty()
            && self
                .limits
                .bytes_exceeded(self.pending_bytes.saturating_add(event_bytes))
        {
            completed = self.take_pending();
        }

        if self.limits.bytes_exceeded(event_bytes) {
            warn!(
                event_bytes,
                max_bytes = self.limits.max_bytes,
                "event exceeds batch byte limit; sending it in its own batch"
            );
        }

        self.pending.push(event);
        self.pending_bytes += event_bytes;

        if completed.is_none() && self.limits.events_reached(self.pending.len()) {
            completed = self.take_pending();
        }
        Ok(completed)
    }

    /// Completes the current partial batch, if it holds any events.
    pub fn flush(&mut self) -> Option<Batch> {
        self.take_pending()
    }

    fn take_pending(&mut self) -> Option<Batch> {
        if self.pending.is_empty() {
            return None;
        }
        let id = BatchId(self.next_id);
        self.next_id += 1;
        let bytes = std::mem::take(&mut self.pending_bytes);
        Some(Batch {
            id,
            events: std::mem::take(&mut self.pending),
            bytes,
        })
    }
}
