use crate::error::ContextError;

/// Limits applied while reading line-oriented source output.
#[derive(Debug, Clone, Copy, Eq, PartialEq)]
pub struct IngestLimits {
    pub max_line_bytes: usize,
}

impl Default for IngestLimits {
    fn default() -> Self {
        Self {
            max_line_bytes: 1024 * 1024,
        }
    }
}

/// Completion thresholds for a [`crate::Batch`]. A value of `0` disables that limit.
#[derive(Debug, Clone, Copy, Eq, PartialEq)]
pub struct BatchLimits {
    pub max_bytes: usize,
    pub max_events: usize,
}

impl BatchLimits {
    pub const DEFAULT_MAX_BYTES: usize = 1024 * 1024;
    pub const DEFAULT_MAX_EVENTS: usize = 1000;

    pub fn new(max_bytes: usize, max_events: usize) -> Result<Self, ContextError> {
        let limits = Self {
            max_bytes,
            max_events,
        };
        limits.validate()?;
        Ok(limits)
    }

    pub fn validate(&self) -> Result<(), ContextError> {
        if self.max_bytes == 0 && self.max_events == 0 {
            return Err(ContextError::UnboundedBatch);
        }
        Ok(())
    }

    pub(crate) fn bytes_exceeded(&self, bytes: usize) -> bool {
        self.max_bytes != 0 && bytes > self.max_bytes
    }

    pub(crate) fn events_reached(&self, events: usize) -> bool {
        self.max_events != 0 && events >= self.max_events
    }
}

impl Default for BatchLimits {
    fn default() -> Self {
        Self {
            max_bytes: Self::DEFAULT_MAX_BYTES,
            max_events: Self::DEFAULT_MAX_EVENTS,
        }
    }
}
