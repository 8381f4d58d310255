use std::{fmt, path::PathBuf};

use inventory_events::{parse_document, IngestLimits};
use tokio::io::AsyncReadExt;
use tracing::{debug, info};

use super::{into_stream, RecordSource, RecordStream, SourceError};

/// Where a [`ReaderSource`] reads from.
#[derive(Debug, Clone, Eq, PartialEq)]
pub enum Input {
    Stdin,
    File(PathBuf),
}

impl Input {
    /// `-` means stdin; anything else is a path.
    pub fn from_arg(arg: &str) -> Self {
        if arg == "-" {
            Self::Stdin
        } else {
            Self::File(PathBuf::from(arg))
        }
    }
}

impl fmt::Display for Input {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Stdin => f.write_str("<stdin>"),
            Self::File(path) => write!(f, "{}", path.display()),
        }
    }
}

/// Reads previously captured inventory output (JSON array, single object, or JSONL).
#[derive(Debug, Clone)]
pub struct ReaderSource {
    resource: String,
    input: Input,
    limits: IngestLimits,
}

impl ReaderSource {
    pub fn new(resource: impl Into<String>, input: Input) -> Self {
        Self {
            resource: resource.into(),
            input,
            limits: IngestLimits::default(),
        }
    }

    pub fn with_limits(mut self, limits: IngestLimits) -> Self {
        self.limits = limits;
        self
    }

    pub fn input(&self) -> &Input {
        &self.input
    }
}

impl RecordSource for ReaderSource {
    fn resource(&self) -> &str {
        &self.resource
    }

    async fn open(self) -> Result<RecordStream, SourceError> {
        info!(resource = %self.resource, input = %self.input, "reading inventory input");
        let read_error = |source| SourceError::Read {
            input: self.input.to_string(),
            source,
        };
        let bytes = match &self.input {
            Input::File(path) => tokio::fs::read(path).await.map_err(read_error)?,
            Input::Stdin => {
                let mut buf = Vec::new();
                tokio::io::stdin()
                    .read_to_end(&mut buf)
                    .await
                    .map_err(read_error)?;
                buf
            }
        };

        let records = parse_document(&bytes, self.limits)?;
        debug!(
            resource = %self.resource,
            bytes = bytes.len(),
            records = records.len(),
            "inventory input parsed"
        );
        Ok(into_stream(records))
    }
}
