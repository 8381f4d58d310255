use std::{ffi::OsString, path::PathBuf};

use clap::{Args, Parser, Subcommand, ValueEnum};
use inventory_ingest::ConfigOverrides;

#[derive(Debug, Parser)]
#[command(name = "inventory-ingest", version)]
#[command(about = "Extract cloud inventory records and deliver them to an HEC-style collector")]
pub struct Cli {
    /// Log level used when `RUST_LOG` is not set.
    #[arg(long, global = true, default_value = "info")]
    pub log_level: String,

    #[command(subcommand)]
    pub command: Command,
}

#[derive(Debug, Subcommand)]
pub enum Command {
    /// Extract, normalize, batch and deliver one resource category.
    Run(RunArgs),
    /// Validate configuration and print the resolved settings (token redacted).
    Check(CheckArgs),
}

#[derive(Debug, Clone, Copy, Default, Eq, PartialEq, ValueEnum)]
pub enum OutputFormat {
    #[default]
    Text,
    Json,
}

#[derive(Debug, Args)]
pub struct RunArgs {
    #[command(flatten)]
    pub settings: SettingsArgs,

    /// Read records from a JSON/JSONL file, or `-` for stdin, instead of running a command.
    #[arg(long, conflicts_with = "command")]
    pub input: Option<String>,

    /// Kill the inventory command if it runs longer than this.
    #[arg(long, default_value_t = 300)]
    pub command_timeout_secs: u64,

    /// Summary format.
    #[arg(long, value_enum, default_value_t)]
    pub format: OutputFormat,

    /// Inventory command and its arguments, after `--`.
    #[arg(last = true, value_name = "COMMAND")]
    pub command: Vec<OsString>,
}

#[derive(Debug, Args)]
pub struct CheckArgs {
    #[command(flatten)]
    pub settings: SettingsArgs,

    #[arg(long, value_enum, default_value_t)]
    pub format: OutputFormat,
}

/// Config file location plus per-run overrides. Flags win over `INGEST_*` variables,
/// which win over the file.
#[derive(Debug, Args)]
pub struct SettingsArgs {
    /// Resource category, selecting `[resources.<name>]`.
    #[arg(long, short)]
    pub resource: String,

    /// TOML configuration file.
    #[arg(long, short)]
    pub config: Option<PathBuf>,

    #[arg(long)]
    pub url: Option<String>,
    #[arg(long)]
    pub token: Option<String>,
    #[arg(long)]
    pub index: Option<String>,
    #[arg(long)]
    pub host: Option<String>,
    /// Authorization scheme, e.g. `Splunk` or `Bearer`.
    #[arg(long)]
    pub auth_scheme: Option<String>,
    /// Accept invalid TLS certificates.
    #[arg(long)]
    pub tls_insecure: bool,
    /// Per-attempt request timeout.
    #[arg(long)]
    pub timeout_secs: Option<u64>,

    #[arg(long)]
    pub sourcetype: Option<String>,
    #[arg(long)]
    pub source: Option<String>,
    #[arg(long)]
    pub timestamp_field: Option<String>,
    /// `iso8601`, `epoch`, `epoch_millis`, or a strftime pattern.
    #[arg(long)]
    pub timestamp_format: Option<String>,

    /// Maximum encoded batch size; `0` disables the limit.
    #[arg(long)]
    pub max_bytes: Option<usize>,
    /// Maximum events per batch; `0` disables the limit.
    #[arg(long)]
    pub max_events: Option<usize>,
    #[arg(long)]
    pub max_attempts: Option<u32>,
    /// Batches delivered in parallel.
    #[arg(long)]
    pub concurrency: Option<usize>,
    /// Skip remaining batches after the first failed one.
    #[arg(long)]
    pub stop_on_failure: bool,
    /// Also write every batch to `<dir>/batch-NNNNN.ndjson`.
    #[arg(long)]
    pub stage_dir: Option<PathBuf>,
    /// Write batches to stdout as NDJSON instead of sending them.
    #[arg(long)]
    pub dry_run: bool,
}

impl SettingsArgs {
    pub fn overrides(&self) -> ConfigOverrides {
        ConfigOverrides {
            url: self.url.clone(),
            token: self.token.clone(),
            index: self.index.clone(),
            host: self.host.clone(),
            auth_scheme: self.auth_scheme.clone(),
            tls_insecure: self.tls_insecure.then_some(true),
            timeout_secs: self.timeout_secs,
            sourcetype: self.sourcetype.clone(),
            source: self.source.clone(),
            timestamp_field: self.timestamp_field.clone(),
            timestamp_format: self.timestamp_format.clone(),
            max_bytes: self.max_bytes,
            max_events: self.max_events,
            max_attempts: self.max_attempts,
            concurrency: self.concurrency,
            stop_on_failure: self.stop_on_failure.then_some(true),
            stage_dir: self.stage_dir.clone(),
            dry_run: self.dry_run,
        }
    }
}
