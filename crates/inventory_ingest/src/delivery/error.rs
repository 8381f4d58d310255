use std::{fmt, time::Duration};

use inventory_events::EncodeError;
use serde::Serialize;
use thiserror::Error;

/// Longest response body excerpt kept in an error message.
const MAX_BODY_EXCERPT: usize = 256;

#[derive(Debug, Clone, Copy, Eq, PartialEq, Ord, PartialOrd, Hash, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum DeliveryErrorKind {
    /// The endpoint could not be reached.
    Connect,
    /// The attempt did not complete within its timeout.
    Timeout,
    /// 5xx response.
    Server,
    /// 429 response.
    RateLimited,
    /// Any other failure while sending the request or reading the response.
    Transport,
    /// 4xx response other than 429, or an unexpected status.
    Client,
    /// The batch could not be encoded.
    Encode,
    /// The delivery task ended without producing a result.
    Internal,
}

impl DeliveryErrorKind {
    /// Transient kinds are retried; everything else fails the batch immediately.
    pub fn is_transient(self) -> bool {
        matches!(
            self,
            Self::Connect | Self::Timeout | Self::Server | Self::RateLimited | Self::Transport
        )
    }

    pub fn as_str(self) -> &'static str {
        match self {
            Self::Connect => "connect",
            Self::Timeout => "timeout",
            Self::Server => "server",
            Self::RateLimited => "rate_limited",
            Self::Transport => "transport",
            Self::Client => "client",
            Self::Encode => "encode",
            Self::Internal => "internal",
        }
    }
}

impl fmt::Display for DeliveryErrorKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Outcome of one failed delivery attempt.
#[derive(Debug, Clone, Error, Eq, PartialEq, Serialize)]
#[error("{kind}: {message}")]
pub struct DeliveryError {
    pub kind: DeliveryErrorKind,
    pub message: String,
    /// HTTP status, when a response was received.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub status: Option<u16>,
    /// Server-requested delay from a `Retry-After` header.
    #[serde(skip)]
    pub retry_after: Option<Duration>,
}

impl DeliveryError {
    pub fn new(kind: DeliveryErrorKind, message: impl Into<String>) -> Self {
        Self {
            kind,
            message: message.into(),
            status: None,
            retry_after: None,
        }
    }

    /// Classifies a non-success HTTP response. `Retry-After` is kept only for 429 and 503.
    pub fn from_status(status: u16, retry_after: Option<Duration>, body: &str) -> Self {
        let kind = match status {
            429 => DeliveryErrorKind::RateLimited,
            500..=599 => DeliveryErrorKind::Server,
            _ => DeliveryErrorKind::Client,
        };
        let excerpt = excerpt(body);
        let message = if excerpt.is_empty() {
            format!("endpoint responded with status {status}")
        } else {
            format!("endpoint responded with status {status}: {excerpt}")
        };
        Self {
            kind,
            message,
            status: Some(status),
            retry_after: retry_after.filter(|_| matches!(status, 429 | 503)),
        }
    }

    pub fn timeout(after: Duration) -> Self {
        Self::new(
            DeliveryErrorKind::Timeout,
            format!("attempt timed out after {after:?}"),
        )
    }

    pub fn is_transient(&self) -> bool {
        self.kind.is_transient()
    }
}

impl From<EncodeError> for DeliveryError {
    fn from(err: EncodeError) -> Self {
        Self::new(DeliveryErrorKind::Encode, err.to_string())
    }
}

impl From<reqwest::Error> for DeliveryError {
    fn from(err: reqwest::Error) -> Self {
        let kind = if err.is_timeout() {
            DeliveryErrorKind::Timeout
        } else if err.is_connect() {
            DeliveryErrorKind::Connect
        } else {
            DeliveryErrorKind::Transport
        };
        let status = err.status().map(|status| status.as_u16());
        let mut error = Self::new(kind, err.without_url().to_string());
        error.status = status;
        error
    }
}

fn excerpt(body: &str) -> String {
    let body = body.trim();
    match body.char_indices().nth(MAX_BODY_EXCERPT) {
        Some((cut, _)) => format!("{}...", &body[..cut]),
        None => body.to_string(),
    }
}
