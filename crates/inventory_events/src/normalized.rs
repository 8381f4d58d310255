use serde::Serialize;
use thiserror::Error;

use crate::{ContextError, RawRecord, RoutingName, TimestampFormat, TimestampParseError};

/// Where a record's timestamp lives and how to read it.
#[derive(Debug, Clone, Eq, PartialEq)]
pub struct TimestampSpec {
    pub field: String,
    pub format: TimestampFormat,
}

/// Routing metadata applied to every record of one resource category.
///
/// Construction validates every routing value, so normalization itself cannot fail.
#[derive(Debug, Clone, Eq, PartialEq)]
pub struct NormalizationContext {
    pub host: RoutingName,
    pub source: RoutingName,
    pub sourcetype: RoutingName,
    pub index: RoutingName,
    pub timestamp: Option<TimestampSpec>,
}

impl NormalizationContext {
    pub fn new(host: &str, source: &str, sourcetype: &str, index: &str) -> Result<Self, ContextError> {
        Ok(Self {
            host: RoutingName::new("host", host)?,
            source: RoutingName::new("source", source)?,
            sourcetype: RoutingName::new("sourcetype", sourcetype)?,
            index: RoutingName::new("index", index)?,
            timestamp: None,
        })
    }

    /// Configures timestamp extraction. A format without a field is a configuration error.
    pub fn with_timestamp(
        mut self,
        field: Option<&str>,
        format: Option<TimestampFormat>,
    ) -> Result<Self, ContextError> {
        let field = field.map(str::trim).filter(|field| !field.is_empty());
        self.timestamp = match (field, format) {
            (Some(field), format) => Some(TimestampSpec {
                field: field.to_string(),
                format: format.unwrap_or_default(),
            }),
            (None, Some(_)) => return Err(ContextError::FormatWithoutField),
            (None, None) => None,
        };
        Ok(self)
    }
}

/// The envelope delivered to the ingestion endpoint, one per line.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct NormalizedEvent {
    pub host: RoutingName,
    pub source: RoutingName,
    pub sourcetype: RoutingName,
    pub index: RoutingName,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub time: Option<i64>,
    pub event: RawRecord,
}

impl NormalizedEvent {
    /// Encodes the event as one NDJSON line including the trailing newline.
    pub fn to_ndjson_line(&self) -> Result<Vec<u8>, crate::EncodeError> {
        let mut line = serde_json::to_vec(self)?;
        line.push(b'\n');
        Ok(line)
    }
}

/// A non-fatal normalization issue. The event is still produced, without `time`.
#[derive(Debug, Clone, Error, Eq, PartialEq)]
pub enum NormalizationWarning {
    #[error("timestamp field `{field}` is missing")]
    MissingTimestamp { field: String },
    #[error("timestamp field `{field}` could not be parsed: {source}")]
    UnparseableTimestamp {
        field: String,
        #[source]
        source: TimestampParseError,
    },
}

impl NormalizationWarning {
    /// Stable label used when counting warnings in run reports.
    pub fn kind(&self) -> &'static str {
        match self {
            Self::MissingTimestamp { .. } => "missing_timestamp",
            Self::UnparseableTimestamp { .. } => "unparseable_timestamp",
        }
    }
}
