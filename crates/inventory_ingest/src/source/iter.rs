use inventory_events::RawRecord;

use super::{RecordSource, RecordStream, SourceError};

/// Records supplied in memory, for embedding and tests.
pub struct IterSource {
    resource: String,
    stream: RecordStream,
}

impl IterSource {
    pub fn new<I>(resource: impl Into<String>, records: I) -> Self
    where
        I: IntoIterator<Item = RawRecord>,
        I::IntoIter: Send + 'static,
    {
        Self::from_results(resource, records.into_iter().map(Ok))
    }

    /// Like [`IterSource::new`], but individual items may already be errors.
    pub fn from_results<I>(resource: impl Into<String>, items: I) -> Self
    where
        I: IntoIterator<Item = Result<RawRecord, SourceError>>,
        I::IntoIter: Send + 'static,
    {
        Self {
            resource: resource.into(),
            stream: Box::new(items.into_iter()),
        }
    }
}

impl RecordSource for IterSource {
    fn resource(&self) -> &str {
        &self.resource
    }

    async fn open(self) -> Result<RecordStream, SourceError> {
        Ok(self.stream)
    }
}
