use std::{
    future::Future,
    io::{self, Write},
    sync::Mutex,
    time::Duration,
};

use inventory_events::BatchId;
use reqwest::{
    header::{HeaderMap, HeaderValue, AUTHORIZATION, CONTENT_TYPE, RETRY_AFTER},
    Client, Response, Url,
};
use tracing::debug;

use super::{DeliveryError, DeliveryErrorKind};
use crate::config::{ConfigError, EndpointConfig};

/// Longest prefix of an error response body that is read.
const MAX_ERROR_BODY_BYTES: usize = 4096;

/// Sends one encoded batch body. One call is one attempt; retries live in
/// [`super::DeliveryClient`].
pub trait Transport: Send + Sync + 'static {
    fn send(
        &self,
        batch_id: BatchId,
        body: &[u8],
    ) -> impl Future<Output = Result<(), DeliveryError>> + Send;
}

/// POSTs NDJSON bodies to an HEC-style collector.
#[derive(Debug, Clone)]
pub struct HttpTransport {
    client: Client,
    url: Url,
}

impl HttpTransport {
    pub fn new(endpoint: &EndpointConfig) -> Result<Self, ConfigError> {
        let mut authorization = HeaderValue::from_str(&endpoint.authorization())
            .map_err(|_| ConfigError::InvalidToken)?;
        authorization.set_sensitive(true);

        let mut headers = HeaderMap::new();
        headers.insert(AUTHORIZATION, authorization);
        headers.insert(CONTENT_TYPE, HeaderValue::from_static("application/json"));

        let client = Client::builder()
            .default_headers(headers)
            .timeout(endpoint.timeout)
            .danger_accept_invalid_certs(endpoint.tls_insecure)
            .user_agent(concat!("inventory-ingest/", env!("CARGO_PKG_VERSION")))
            .build()
            .map_err(ConfigError::HttpClient)?;

        Ok(Self {
            client,
            url: endpoint.url.clone(),
        })
    }
}

impl Transport for HttpTransport {
    async fn send(&self, batch_id: BatchId, body: &[u8]) -> Result<(), DeliveryError> {
        let response = self
            .client
            .post(self.url.clone())
            .body(body.to_vec())
            .send()
            .await?;

        let status = response.status();
        if status.is_success() {
            debug!(batch_id = %batch_id, status = status.as_u16(), "batch accepted");
            return Ok(());
        }

        let retry_after = response
            .headers()
            .get(RETRY_AFTER)
            .and_then(|value| value.to_str().ok())
            .and_then(|value| value.trim().parse::<u64>().ok())
            .map(Duration::from_secs);
        let text = body_prefix(response, MAX_ERROR_BODY_BYTES).await;
        Err(DeliveryError::from_status(
            status.as_u16(),
            retry_after,
            &text,
        ))
    }
}

/// Reads at most `limit` bytes of a response body. Read errors end the prefix early.
async fn body_prefix(mut response: Response, limit: usize) -> String {
    let mut prefix = Vec::new();
    while prefix.len() < limit {
        match response.chunk().await {
            Ok(Some(chunk)) => {
                let take = chunk.len().min(limit - prefix.len());
                prefix.extend_from_slice(&chunk[..take]);
            }
            Ok(None) | Err(_) => break,
        }
    }
    String::from_utf8_lossy(&prefix).into_owned()
}

/// Writes each batch body to a writer (stdout by default) instead of sending it.
pub struct DryRunTransport {
    out: Mutex<Box<dyn Write + Send>>,
}

impl DryRunTransport {
    pub fn stdout() -> Self {
        Self::new(io::stdout())
    }

    pub fn new(writer: impl Write + Send + 'static) -> Self {
        Self {
            out: Mutex::new(Box::new(writer)),
        }
    }
}

impl Transport for DryRunTransport {
    async fn send(&self, batch_id: BatchId, body: &[u8]) -> Result<(), DeliveryError> {
        let mut out = self.out.lock().map_err(|_| {
            DeliveryError::new(DeliveryErrorKind::Internal, "dry-run writer lock poisoned")
        })?;
        out.write_all(body)
            .and_then(|()| out.flush())
            .map_err(|err| DeliveryError::new(DeliveryErrorKind::Transport, err.to_string()))?;
        debug!(batch_id = %batch_id, bytes = body.len(), "dry run: batch written");
        Ok(())
    }
}
