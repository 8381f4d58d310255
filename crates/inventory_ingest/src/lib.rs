#![forbid(unsafe_code)]
//! Batch ingestion of cloud inventory records into an HEC-style collector.
//!
//! A run pulls records from a [`RecordSource`] (an external inventory command, a captured
//! JSON/JSONL file, or memory), normalizes each into a [`inventory_events::NormalizedEvent`],
//! groups the events into bounded batches, and delivers every batch through a
//! [`Transport`] with retry and backoff. The outcome of every batch lands in a
//! [`RunReport`].
//!
//! ```rust,no_run
//! use inventory_ingest::{
//!     CommandSource, ConfigOverrides, DeliveryTarget, FileConfig, HttpTransport, Pipeline,
//!     PipelineConfig,
//! };
//!
//! # async fn demo() -> Result<(), Box<dyn std::error::Error>> {
//! let file = FileConfig::load("ingest.toml")?;
//! let overrides = ConfigOverrides::default().with_env(|key| std::env::var(key).ok());
//! let config = PipelineConfig::resolve(file, overrides, "instances")?;
//! let DeliveryTarget::Http(endpoint) = &config.target else {
//!     return Ok(());
//! };
//! let transport = HttpTransport::new(endpoint)?;
//!
//! let source = CommandSource::builder("instances", "gcloud")
//!     .args(["compute", "instances", "list", "--format=json"])
//!     .build();
//! let report = Pipeline::new(config, transport).run(source).await;
//! println!("{}", report.render_text());
//! # Ok(())
//! # }
//! ```

mod config;
mod delivery;
mod pipeline;
mod report;
mod source;
mod stage;

pub use config::{
    BatchSection, ConfigError, ConfigOverrides, DeliveryTarget, EndpointConfig, EndpointSection,
    FileConfig, PipelineConfig, RedactedConfig, RedactedEndpoint, ResourceSection, RetrySection,
    RunSection, DEFAULT_AUTH_SCHEME, DEFAULT_CONCURRENCY, DEFAULT_HOST, DEFAULT_TIMEOUT_SECS,
    ENV_INDEX, ENV_TOKEN, ENV_URL,
};
pub use delivery::{
    BatchStatus, DeliveryClient, DeliveryError, DeliveryErrorKind, DeliveryResult,
    DryRunTransport, HttpTransport, RetryPolicy, Transport, DEFAULT_BASE_DELAY,
    DEFAULT_MAX_ATTEMPTS, DEFAULT_MAX_DELAY,
};
pub use pipeline::{Pipeline, RunState};
pub use report::{
    BatchSummary, RunFailure, RunReport, RunStatus, EXIT_CANCELLED, EXIT_FAILURE,
    EXIT_PARTIAL_FAILURE, EXIT_SOURCE_FAILURE, EXIT_SUCCESS,
};
pub use source::{
    CommandOutput, CommandSource, CommandSourceBuilder, Input, IterSource, ReaderSource,
    RecordSource, RecordStream, SourceError,
};
pub use stage::{BatchStager, StageError};
