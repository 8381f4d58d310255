#![forbid(unsafe_code)]
//! Record normalization and batching primitives for inventory ingestion.
//!
//! This crate has no I/O beyond reading records from a caller-supplied reader. It provides:
//! - [`RawRecord`] and the [`NormalizedEvent`] envelope delivered to the ingestion endpoint.
//! - [`normalize`], a pure and lenient transform driven by a validated [`NormalizationContext`].
//! - [`Batcher`], which groups events into byte/count bounded [`Batch`]es.
//! - [`RecordReader`] and [`parse_document`] for JSON array / JSONL inventory output.

mod batch;
mod config;
mod error;
mod ingest;
mod normalize;
mod normalized;
mod reader;
mod record;
mod routing;
mod timestamp;

pub use batch::{Batch, BatchId, Batcher};
pub use config::{BatchLimits, IngestLimits};
pub use error::{ContextError, EncodeError, LineRecord, LineRecordError};
pub use ingest::{parse_document, DocumentError, RecordReader};
pub use normalize::{normalize, Normalized};
pub use normalized::{NormalizationContext, NormalizationWarning, NormalizedEvent, TimestampSpec};
pub use record::RawRecord;
pub use routing::RoutingName;
pub use timestamp::{parse_timestamp, TimestampFormat, TimestampParseError};
