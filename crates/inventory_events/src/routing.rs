use serde::{Serialize, Serializer};

use crate::error::ContextError;

/// A validated envelope routing value (`host`, `source`, `sourcetype`, `index`).
///
/// Surrounding whitespace is trimmed; the result must be non-empty, free of control
/// characters and at most [`RoutingName::MAX_BYTES`] long.
#[derive(Clone, Debug, Eq, PartialEq, Hash)]
pub struct RoutingName(String);

impl RoutingName {
    pub const MAX_BYTES: usize = 1024;

    pub fn new(field: &'static str, raw: &str) -> Result<Self, ContextError> {
        let trimmed = raw.trim();
        if trimmed.is_empty() {
            return Err(ContextError::Empty { field });
        }
        if trimmed.len() > Self::MAX_BYTES {
            return Err(ContextError::TooLong {
                field,
                max_bytes: Self::MAX_BYTES,
            });
        }
        if trimmed.chars().any(char::is_control) {
            return Err(ContextError::ControlCharacters { field });
        }
        Ok(Self(trimmed.to_string()))
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl std::fmt::Display for RoutingName {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(&self.0)
    }
}

impl Serialize for RoutingName {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_str(&self.0)
    }
}
