use std::{
    collections::BTreeMap,
    fmt, fs,
    path::{Path, PathBuf},
    time::Duration,
};

use inventory_events::{
    BatchLimits, ContextError, IngestLimits, NormalizationContext, TimestampFormat,
};
use reqwest::Url;
use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::delivery::RetryPolicy;

pub const ENV_URL: &str = "INGEST_URL";
pub const ENV_TOKEN: &str = "INGEST_TOKEN";
pub const ENV_INDEX: &str = "INGEST_INDEX";

pub const DEFAULT_HOST: &str = "localhost";
pub const DEFAULT_AUTH_SCHEME: &str = "Bearer";
pub const DEFAULT_TIMEOUT_SECS: u64 = 30;
pub const DEFAULT_CONCURRENCY: usize = 1;

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("failed to read config file {path:?}: {source}")]
    Read {
        path: PathBuf,
        source: std::io::Error,
    },
    #[error("failed to parse config file {path:?}: {source}")]
    Parse {
        path: PathBuf,
        source: toml::de::Error,
    },
    #[error("endpoint url is required (set [endpoint].url, INGEST_URL, or --url)")]
    MissingUrl,
    #[error("endpoint url {url:?} is invalid: {reason}")]
    InvalidUrl { url: String, reason: String },
    #[error("endpoint token must not be empty (set [endpoint].token, INGEST_TOKEN, or --token)")]
    EmptyToken,
    #[error("endpoint token or auth scheme is not a valid header value")]
    InvalidToken,
    #[error("endpoint timeout must be greater than zero")]
    ZeroTimeout,
    #[error("retry.max_attempts must be at least 1")]
    ZeroAttempts,
    #[error("run.concurrency must be at least 1")]
    ZeroConcurrency,
    #[error("resource {name:?} is not configured and no sourcetype was given")]
    UnknownResource { name: String },
    #[error("failed to build HTTP client: {0}")]
    HttpClient(#[source] reqwest::Error),
    #[error(transparent)]
    Context(#[from] ContextError),
}

/// The on-disk TOML configuration. Every field is optional; [`PipelineConfig::resolve`]
/// applies overrides and defaults and validates the result.
#[derive(Debug, Clone, Default, Deserialize, Serialize)]
#[serde(default, deny_unknown_fields)]
pub struct FileConfig {
    pub host: Option<String>,
    pub index: Option<String>,
    pub endpoint: EndpointSection,
    pub batch: BatchSection,
    pub retry: RetrySection,
    pub run: RunSection,
    pub resources: BTreeMap<String, ResourceSection>,
}

#[derive(Debug, Clone, Default, Deserialize, Serialize)]
#[serde(default, deny_unknown_fields)]
pub struct EndpointSection {
    pub url: Option<String>,
    pub token: Option<String>,
    pub auth_scheme: Option<String>,
    pub tls_insecure: Option<bool>,
    pub timeout_secs: Option<u64>,
}

#[derive(Debug, Clone, Default, Deserialize, Serialize)]
#[serde(default, deny_unknown_fields)]
pub struct BatchSection {
    pub max_bytes: Option<usize>,
    pub max_events: Option<usize>,
    pub max_line_bytes: Option<usize>,
}

#[derive(Debug, Clone, Default, Deserialize, Serialize)]
#[serde(default, deny_unknown_fields)]
pub struct RetrySection {
    pub max_attempts: Option<u32>,
    pub base_delay_ms: Option<u64>,
    pub max_delay_ms: Option<u64>,
    pub jitter: Option<bool>,
}

#[derive(Debug, Clone, Default, Deserialize, Serialize)]
#[serde(default, deny_unknown_fields)]
pub struct RunSection {
    pub concurrency: Option<usize>,
    pub stop_on_failure: Option<bool>,
    pub stage_dir: Option<PathBuf>,
}

/// Per-resource routing: `[resources.<name>]`.
#[derive(Debug, Clone, Default, Deserialize, Serialize)]
#[serde(default, deny_unknown_fields)]
pub struct ResourceSection {
    pub sourcetype: Option<String>,
    pub source: Option<String>,
    pub index: Option<String>,
    pub timestamp_field: Option<String>,
    pub timestamp_format: Option<String>,
}

impl FileConfig {
    pub fn load(path: impl AsRef<Path>) -> Result<Self, ConfigError> {
        let path = path.as_ref();
        let text = fs::read_to_string(path).map_err(|source| ConfigError::Read {
            path: path.to_path_buf(),
            source,
        })?;
        Self::parse(&text).map_err(|source| ConfigError::Parse {
            path: path.to_path_buf(),
            source,
        })
    }

    pub fn parse(text: &str) -> Result<Self, toml::de::Error> {
        toml::from_str(text)
    }
}

/// Values that take precedence over the config file, from CLI flags or the environment.
#[derive(Debug, Clone, Default)]
pub struct ConfigOverrides {
    pub url: Option<String>,
    pub token: Option<String>,
    pub index: Option<String>,
    pub host: Option<String>,
    pub auth_scheme: Option<String>,
    pub tls_insecure: Option<bool>,
    pub timeout_secs: Option<u64>,
    pub sourcetype: Option<String>,
    pub source: Option<String>,
    pub timestamp_field: Option<String>,
    pub timestamp_format: Option<String>,
    pub max_bytes: Option<usize>,
    pub max_events: Option<usize>,
    pub max_attempts: Option<u32>,
    pub concurrency: Option<usize>,
    pub stop_on_failure: Option<bool>,
    pub stage_dir: Option<PathBuf>,
    pub dry_run: bool,
}

impl ConfigOverrides {
    /// Fills fields not already set from `INGEST_URL`, `INGEST_TOKEN` and `INGEST_INDEX`.
    ///
    /// Explicit values win over the environment, so call this after applying CLI flags.
    pub fn with_env<F>(mut self, lookup: F) -> Self
    where
        F: Fn(&str) -> Option<String>,
    {
        let lookup = |key: &str| lookup(key).filter(|value| !value.is_empty());
        if self.url.is_none() {
            self.url = lookup(ENV_URL);
        }
        if self.token.is_none() {
            self.token = lookup(ENV_TOKEN);
        }
        if self.index.is_none() {
            self.index = lookup(ENV_INDEX);
        }
        self
    }
}

/// Connection settings for the ingestion endpoint.
#[derive(Clone, Eq, PartialEq)]
pub struct EndpointConfig {
    pub url: Url,
    pub token: String,
    pub auth_scheme: String,
    pub tls_insecure: bool,
    pub timeout: Duration,
}

impl EndpointConfig {
    /// The `Authorization` header value, `<scheme> <token>`.
    pub fn authorization(&self) -> String {
        format!("{} {}", self.auth_scheme, self.token)
    }
}

impl fmt::Debug for EndpointConfig {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("EndpointConfig")
            .field("url", &self.url.as_str())
            .field("token", &"<redacted>")
            .field("auth_scheme", &self.auth_scheme)
            .field("tls_insecure", &self.tls_insecure)
            .field("timeout", &self.timeout)
            .finish()
    }
}

/// Where batches go.
#[derive(Debug, Clone, Eq, PartialEq)]
pub enum DeliveryTarget {
    Http(EndpointConfig),
    /// Batches are written to stdout as NDJSON instead of being sent.
    DryRun { timeout: Duration },
}

impl DeliveryTarget {
    pub fn attempt_timeout(&self) -> Duration {
        match self {
            Self::Http(endpoint) => endpoint.timeout,
            Self::DryRun { timeout } => *timeout,
        }
    }
}

/// Immutable, validated settings for one run.
#[derive(Debug, Clone)]
pub struct PipelineConfig {
    pub resource: String,
    pub context: NormalizationContext,
    pub target: DeliveryTarget,
    pub batch: BatchLimits,
    pub ingest: IngestLimits,
    pub retry: RetryPolicy,
    pub concurrency: usize,
    pub stop_on_failure: bool,
    pub stage_dir: Option<PathBuf>,
}

impl PipelineConfig {
    /// Builds the run configuration for `resource`.
    ///
    /// Precedence is overrides, then the file, then defaults. A resource missing from
    /// `[resources]` is accepted only when a sourcetype override is supplied.
    pub fn resolve(
        file: FileConfig,
        overrides: ConfigOverrides,
        resource: &str,
    ) -> Result<Self, ConfigError> {
        let section = file.resources.get(resource).cloned();
        if section.is_none() && overrides.sourcetype.is_none() {
            return Err(ConfigError::UnknownResource {
                name: resource.to_string(),
            });
        }
        let section = section.unwrap_or_default();

        let sourcetype = overrides
            .sourcetype
            .or(section.sourcetype)
            .unwrap_or_default();
        let source = overrides
            .source
            .or(section.source)
            .unwrap_or_else(|| resource.to_string());
        let index = overrides
            .index
            .or(section.index)
            .or(file.index)
            .unwrap_or_default();
        let host = overrides
            .host
            .or(file.host)
            .unwrap_or_else(|| DEFAULT_HOST.to_string());

        let timestamp_field = overrides.timestamp_field.or(section.timestamp_field);
        let timestamp_format = overrides
            .timestamp_format
            .or(section.timestamp_format)
            .map(|name| TimestampFormat::from_name(&name));
        let context = NormalizationContext::new(&host, &source, &sourcetype, &index)?
            .with_timestamp(timestamp_field.as_deref(), timestamp_format)?;

        let timeout_secs = overrides
            .timeout_secs
            .or(file.endpoint.timeout_secs)
            .unwrap_or(DEFAULT_TIMEOUT_SECS);
        if timeout_secs == 0 {
            return Err(ConfigError::ZeroTimeout);
        }
        let timeout = Duration::from_secs(timeout_secs);

        let target = if overrides.dry_run {
            DeliveryTarget::DryRun { timeout }
        } else {
            let url = overrides
                .url
                .or(file.endpoint.url)
                .ok_or(ConfigError::MissingUrl)?;
            let token = overrides
                .token
                .or(file.endpoint.token)
                .map(|token| token.trim().to_string())
                .unwrap_or_default();
            if token.is_empty() {
                return Err(ConfigError::EmptyToken);
            }
            let auth_scheme = overrides
                .auth_scheme
                .or(file.endpoint.auth_scheme)
                .unwrap_or_else(|| DEFAULT_AUTH_SCHEME.to_string());
            DeliveryTarget::Http(EndpointConfig {
                url: parse_url(&url)?,
                token,
                auth_scheme,
                tls_insecure: overrides
                    .tls_insecure
                    .or(file.endpoint.tls_insecure)
                    .unwrap_or(false),
                timeout,
            })
        };

        let batch = BatchLimits::new(
            overrides
                .max_bytes
                .or(file.batch.max_bytes)
                .unwrap_or(BatchLimits::DEFAULT_MAX_BYTES),
            overrides
                .max_events
                .or(file.batch.max_events)
                .unwrap_or(BatchLimits::DEFAULT_MAX_EVENTS),
        )?;
        let mut ingest = IngestLimits::default();
        if let Some(max_line_bytes) = file.batch.max_line_bytes {
            ingest.max_line_bytes = max_line_bytes;
        }

        let defaults = RetryPolicy::default();
        let retry = RetryPolicy {
            max_attempts: overrides
                .max_attempts
                .or(file.retry.max_attempts)
                .unwrap_or(defaults.max_attempts),
            base_delay: file
                .retry
                .base_delay_ms
                .map(Duration::from_millis)
                .unwrap_or(defaults.base_delay),
            max_delay: file
                .retry
                .max_delay_ms
                .map(Duration::from_millis)
                .unwrap_or(defaults.max_delay),
            jitter: file.retry.jitter.unwrap_or(defaults.jitter),
        };
        if retry.max_attempts == 0 {
            return Err(ConfigError::ZeroAttempts);
        }

        let concurrency = overrides
            .concurrency
            .or(file.run.concurrency)
            .unwrap_or(DEFAULT_CONCURRENCY);
        if concurrency == 0 {
            return Err(ConfigError::ZeroConcurrency);
        }

        Ok(Self {
            resource: resource.to_string(),
            context,
            target,
            batch,
            ingest,
            retry,
            concurrency,
            stop_on_failure: overrides
                .stop_on_failure
                .or(file.run.stop_on_failure)
                .unwrap_or(false),
            stage_dir: overrides.stage_dir.or(file.run.stage_dir),
        })
    }

    /// A serializable view with the token redacted, for `check` output.
    pub fn redacted(&self) -> RedactedConfig {
        let endpoint = match &self.target {
            DeliveryTarget::Http(endpoint) => Some(RedactedEndpoint {
                url: endpoint.url.to_string(),
                token: "<redacted>",
                auth_scheme: endpoint.auth_scheme.clone(),
                tls_insecure: endpoint.tls_insecure,
            }),
            DeliveryTarget::DryRun { .. } => None,
        };
        let timestamp = self.context.timestamp.as_ref();
        RedactedConfig {
            resource: self.resource.clone(),
            host: self.context.host.to_string(),
            source: self.context.source.to_string(),
            sourcetype: self.context.sourcetype.to_string(),
            index: self.context.index.to_string(),
            timestamp_field: timestamp.map(|spec| spec.field.clone()),
            timestamp_format: timestamp.map(|spec| spec.format.to_string()),
            dry_run: endpoint.is_none(),
            endpoint,
            timeout_secs: self.target.attempt_timeout().as_secs(),
            max_bytes: self.batch.max_bytes,
            max_events: self.batch.max_events,
            max_line_bytes: self.ingest.max_line_bytes,
            max_attempts: self.retry.max_attempts,
            base_delay_ms: duration_ms(self.retry.base_delay),
            max_delay_ms: duration_ms(self.retry.max_delay),
            jitter: self.retry.jitter,
            concurrency: self.concurrency,
            stop_on_failure: self.stop_on_failure,
            stage_dir: self.stage_dir.clone(),
        }
    }
}

#[derive(Debug, Clone, Serialize)]
pub struct RedactedConfig {
    pub resource: String,
    pub host: String,
    pub source: String,
    pub sourcetype: String,
    pub index: String,
    pub timestamp_field: Option<String>,
    pub timestamp_format: Option<String>,
    pub dry_run: bool,
    pub timeout_secs: u64,
    pub max_bytes: usize,
    pub max_events: usize,
    pub max_line_bytes: usize,
    pub max_attempts: u32,
    pub base_delay_ms: u64,
    pub max_delay_ms: u64,
    pub jitter: bool,
    pub concurrency: usize,
    pub stop_on_failure: bool,
    pub stage_dir: Option<PathBuf>,
    pub endpoint: Option<RedactedEndpoint>,
}

#[derive(Debug, Clone, Serialize)]
pub struct RedactedEndpoint {
    pub url: String,
    pub token: &'static str,
    pub auth_scheme: String,
    pub tls_insecure: bool,
}

fn parse_url(raw: &str) -> Result<Url, ConfigError> {
    let invalid = |reason: String| ConfigError::InvalidUrl {
        url: raw.to_string(),
        reason,
    };
    let url = Url::parse(raw.trim()).map_err(|err| invalid(err.to_string()))?;
    match url.scheme() {
        "http" | "https" => {}
        other => return Err(invalid(format!("unsupported scheme `{other}`"))),
    }
    if url.host_str().is_none() {
        return Err(invalid("missing host".to_string()));
    }
    Ok(url)
}

fn duration_ms(duration: Duration) -> u64 {
    u64::try_from(duration.as_millis()).unwrap_or(u64::MAX)
}

#[cfg(test)]
mod tests {
    use super::*;

    const SAMPLE: &str = r#"
host = "inventory-host"
index = "cloud_inventory"

[endpoint]
url = "https://hec.example.com:8088/services/collector/event"
token = "file-token"
auth_scheme = "Splunk"
timeout_secs = 10

[batch]
max_events = 500

[retry]
max_attempts = 3
base_delay_ms = 100
jitter = false

[run]
concurrency = 2

[resources.instances]
sourcetype = "cloud:compute:instance"
source = "compute instances list"
timestamp_field = "creationTimestamp"
timestamp_format = "iso8601"
"#;

    fn sample() -> FileConfig {
        FileConfig::parse(SAMPLE).unwrap()
    }

    #[test]
    fn file_values_are_applied() {
        let config = PipelineConfig::resolve(sample(), ConfigOverrides::default(), "instances")
            .unwrap();

        assert_eq!(config.context.host.as_str(), "inventory-host");
        assert_eq!(config.context.sourcetype.as_str(), "cloud:compute:instance");
        assert_eq!(config.context.source.as_str(), "compute instances list");
        assert_eq!(config.context.index.as_str(), "cloud_inventory");
        let timestamp = config.context.timestamp.as_ref().unwrap();
        assert_eq!(timestamp.field, "creationTimestamp");
        assert_eq!(timestamp.format, TimestampFormat::Iso8601);

        let DeliveryTarget::Http(endpoint) = &config.target else {
            panic!("expected http target");
        };
        assert_eq!(endpoint.authorization(), "Splunk file-token");
        assert_eq!(endpoint.timeout, Duration::from_secs(10));

        assert_eq!(config.batch.max_events, 500);
        assert_eq!(config.batch.max_bytes, BatchLimits::DEFAULT_MAX_BYTES);
        assert_eq!(config.retry.max_attempts, 3);
        assert_eq!(config.retry.base_delay, Duration::from_millis(100));
        assert!(!config.retry.jitter);
        assert_eq!(config.concurrency, 2);
        assert!(!config.stop_on_failure);
    }

    #[test]
    fn overrides_beat_env_and_env_beats_file() {
        let env = |key: &str| match key {
            ENV_TOKEN => Some("env-token".to_string()),
            ENV_INDEX => Some("env_index".to_string()),
            _ => None,
        };
        let overrides = ConfigOverrides {
            index: Some("flag_index".to_string()),
            ..Default::default()
        }
        .with_env(env);

        let config = PipelineConfig::resolve(sample(), overrides, "instances").unwrap();
        assert_eq!(config.context.index.as_str(), "flag_index");
        let DeliveryTarget::Http(endpoint) = &config.target else {
            panic!("expected http target");
        };
        assert_eq!(endpoint.token, "env-token");
    }

    #[test]
    fn defaults_fill_everything_else() {
        let overrides = ConfigOverrides {
            url: Some("http://127.0.0.1:8088/services/collector".to_string()),
            token: Some("t".to_string()),
            index: Some("main".to_string()),
            sourcetype: Some("cloud:disk".to_string()),
            ..Default::default()
        };
        let config = PipelineConfig::resolve(FileConfig::default(), overrides, "disks").unwrap();

        assert_eq!(config.context.host.as_str(), DEFAULT_HOST);
        assert_eq!(config.context.source.as_str(), "disks");
        assert!(config.context.timestamp.is_none());
        assert_eq!(config.batch, BatchLimits::default());
        assert_eq!(config.retry, RetryPolicy::default());
        assert_eq!(config.concurrency, DEFAULT_CONCURRENCY);
        let DeliveryTarget::Http(endpoint) = &config.target else {
            panic!("expected http target");
        };
        assert_eq!(endpoint.auth_scheme, DEFAULT_AUTH_SCHEME);
        assert!(!endpoint.tls_insecure);
    }

    #[test]
    fn validation_errors() {
        let resolve = |overrides: ConfigOverrides| {
            PipelineConfig::resolve(sample(), overrides, "instances").unwrap_err()
        };

        assert!(matches!(
            PipelineConfig::resolve(sample(), ConfigOverrides::default(), "buckets").unwrap_err(),
            ConfigError::UnknownResource { ref name } if name == "buckets"
        ));
        assert!(matches!(
            resolve(ConfigOverrides {
                url: Some("ftp://example.com".to_string()),
                ..Default::default()
            }),
            ConfigError::InvalidUrl { .. }
        ));
        assert!(matches!(
            resolve(ConfigOverrides {
                token: Some("   ".to_string()),
                ..Default::default()
            }),
            ConfigError::EmptyToken
        ));
        assert!(matches!(
            resolve(ConfigOverrides {
                max_attempts: Some(0),
                ..Default::default()
            }),
            ConfigError::ZeroAttempts
        ));
        assert!(matches!(
            resolve(ConfigOverrides {
                concurrency: Some(0),
                ..Default::default()
            }),
            ConfigError::ZeroConcurrency
        ));
        assert!(matches!(
            resolve(ConfigOverrides {
                max_bytes: Some(0),
                max_events: Some(0),
                ..Default::default()
            }),
            ConfigError::Context(ContextError::UnboundedBatch)
        ));
        assert!(matches!(
            resolve(ConfigOverrides {
                sourcetype: Some(" ".to_string()),
                ..Default::default()
            }),
            ConfigError::Context(ContextError::Empty {
                field: "sourcetype"
            })
        ));
    }

    #[test]
    fn missing_url_is_rejected_unless_dry_run() {
        let mut file = sample();
        file.endpoint.url = None;

        let err = PipelineConfig::resolve(file.clone(), ConfigOverrides::default(), "instances")
            .unwrap_err();
        assert!(matches!(err, ConfigError::MissingUrl));

        let config = PipelineConfig::resolve(
            file,
            ConfigOverrides {
                dry_run: true,
                ..Default::default()
            },
            "instances",
        )
        .unwrap();
        assert!(matches!(config.target, DeliveryTarget::DryRun { .. }));
    }

    #[test]
    fn unknown_keys_are_rejected() {
        assert!(FileConfig::parse("[endpoint]\nurll = \"x\"\n").is_err());
    }

    #[test]
    fn redacted_view_hides_token() {
        let config = PipelineConfig::resolve(sample(), ConfigOverrides::default(), "instances")
            .unwrap();
        let rendered = toml::to_string(&config.redacted()).unwrap();
        assert!(rendered.contains("<redacted>"));
        assert!(!rendered.contains("file-token"));
        assert!(!format!("{config:?}").contains("file-token"));
    }
}
