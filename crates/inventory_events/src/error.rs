use thiserror::Error;

/// Invalid normalization or batching settings. Raised before any record is processed.
#[derive(Debug, Clone, Error, Eq, PartialEq)]
pub enum ContextError {
    #[error("{field} must not be empty")]
    Empty { field: &'static str },
    #[error("{field} exceeds {max_bytes} bytes")]
    TooLong {
        field: &'static str,
        max_bytes: usize,
    },
    #[error("{field} contains control characters")]
    ControlCharacters { field: &'static str },
    #[error("timestamp_format requires timestamp_field")]
    FormatWithoutField,
    #[error("at least one of max_bytes or max_events must be non-zero")]
    UnboundedBatch,
}

/// Failure to encode an event as an NDJSON line.
#[derive(Debug, Error)]
#[error("failed to encode event: {0}")]
pub struct EncodeError(#[from] pub serde_json::Error);

/// Why a single line of source output could not become a record.
#[derive(Debug, Error, Clone, Eq, PartialEq)]
pub enum LineRecordError {
    #[error("I/O error while reading source output: {message}")]
    Io { message: String },
    #[error("invalid UTF-8 in source output")]
    InvalidUtf8,
    #[error("line too long (observed_bytes={observed_bytes}, max_line_bytes={max_line_bytes})")]
    LineTooLong {
        observed_bytes: usize,
        max_line_bytes: usize,
    },
    #[error("malformed JSON: {summary}")]
    JsonParse { summary: String },
    #[error("expected a JSON object, found {found}")]
    NotAnObject { found: &'static str },
}

impl LineRecordError {
    /// An I/O failure ends the stream; every other error only affects its own line.
    pub fn is_fatal(&self) -> bool {
        matches!(self, Self::Io { .. })
    }
}

#[derive(Debug, Clone)]
pub struct LineRecord<T> {
    pub line_number: usize,
    pub outcome: Result<T, LineRecordError>,
}
