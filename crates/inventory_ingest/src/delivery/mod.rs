//! Batch delivery: the [`Transport`] seam, its HTTP and dry-run implementations, and the
//! retrying [`DeliveryClient`].

mod client;
mod error;
mod retry;
mod transport;

pub use client::{BatchStatus, DeliveryClient, DeliveryResult};
pub use error::{DeliveryError, DeliveryErrorKind};
pub use retry::{RetryPolicy, DEFAULT_BASE_DELAY, DEFAULT_MAX_ATTEMPTS, DEFAULT_MAX_DELAY};
pub use transport::{DryRunTransport, HttpTransport, Transport};
