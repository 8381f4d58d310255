//! Record sources: where inventory records come from.

mod command;
mod iter;
mod process;
mod reader;

use std::{future::Future, path::PathBuf, process::ExitStatus, time::Duration};

use inventory_events::{DocumentError, LineRecord, LineRecordError, RawRecord};
use thiserror::Error;

pub use command::{CommandSource, CommandSourceBuilder};
pub use iter::IterSource;
pub use process::CommandOutput;
pub use reader::{Input, ReaderSource};

/// A lazily consumed, finite sequence of records.
pub type RecordStream = Box<dyn Iterator<Item = Result<RawRecord, SourceError>> + Send>;

/// Produces the records of one resource category for a single run.
pub trait RecordSource: Send {
    /// Resource category name, e.g. `instances`.
    fn resource(&self) -> &str;

    fn open(self) -> impl Future<Output = Result<RecordStream, SourceError>> + Send;
}

#[derive(Debug, Error)]
pub enum SourceError {
    #[error("failed to spawn source command (program={program:?}): {source}")]
    Spawn {
        program: PathBuf,
        source: std::io::Error,
    },
    #[error("source command timed out after {timeout:?}")]
    Timeout { timeout: Duration },
    #[error("failed waiting for source command: {0}")]
    Wait(std::io::Error),
    #[error("failed reading source command stdout: {0}")]
    StdoutRead(std::io::Error),
    #[error("failed reading source command stderr: {0}")]
    StderrRead(std::io::Error),
    #[error("internal error: missing stdout pipe")]
    MissingStdout,
    #[error("internal error: missing stderr pipe")]
    MissingStderr,
    #[error("internal error: join failure: {0}")]
    Join(String),
    #[error("source command exited with {status}: {stderr}")]
    NonZeroExit { status: ExitStatus, stderr: String },
    #[error("failed to read {input}: {source}")]
    Read {
        input: String,
        source: std::io::Error,
    },
    #[error(transparent)]
    Document(#[from] DocumentError),
    #[error("record {line_number}: {source}")]
    Malformed {
        line_number: usize,
        #[source]
        source: LineRecordError,
    },
}

impl SourceError {
    /// Fatal errors end enumeration; a malformed record only costs that record.
    pub fn is_fatal(&self) -> bool {
        match self {
            Self::Malformed { source, .. } => source.is_fatal(),
            _ => true,
        }
    }

    /// Stable label for run reports.
    pub fn kind(&self) -> &'static str {
        match self {
            Self::Spawn { .. } => "spawn",
            Self::Timeout { .. } => "timeout",
            Self::Wait(_)
            | Self::StdoutRead(_)
            | Self::StderrRead(_)
            | Self::Read { .. } => "io",
            Self::MissingStdout | Self::MissingStderr | Self::Join(_) => "internal",
            Self::NonZeroExit { .. } => "non_zero_exit",
            Self::Document(_) => "document",
            Self::Malformed { source, .. } if source.is_fatal() => "io",
            Self::Malformed { .. } => "malformed_record",
        }
    }
}

pub(crate) fn into_stream(records: Vec<LineRecord<RawRecord>>) -> RecordStream {
    Box::new(records.into_iter().map(|record| {
        record
            .outcome
            .map_err(|source| SourceError::Malformed {
                line_number: record.line_number,
                source,
            })
    }))
}
