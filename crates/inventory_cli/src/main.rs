mod cli;
mod logging;

use std::{io::Write, process::ExitCode, time::Duration};

use clap::Parser;
use inventory_ingest::{
    CommandSource, ConfigError, DeliveryTarget, DryRunTransport, FileConfig, HttpTransport, Input,
    Pipeline, PipelineConfig, ReaderSource, RecordSource, RecordStream, RunReport, SourceError,
    Transport,
};
use thiserror::Error;
use tokio_util::sync::CancellationToken;
use tracing::warn;

use crate::cli::{CheckArgs, Cli, Command, OutputFormat, RunArgs, SettingsArgs};

const EXIT_USAGE: u8 = 1;

#[derive(Debug, Error)]
enum CliError {
    #[error(transparent)]
    Config(#[from] ConfigError),
    #[error("no record source: pass --input <file|-> or an inventory command after `--`")]
    NoSource,
    #[error("failed to render output: {0}")]
    Render(String),
    #[error("failed to write output: {0}")]
    Output(#[from] std::io::Error),
    #[error("failed to start async runtime: {0}")]
    Runtime(std::io::Error),
}

fn main() -> ExitCode {
    let cli = match Cli::try_parse() {
        Ok(cli) => cli,
        Err(err) => {
            // --help and --version print to stdout and are not failures.
            let _ = err.print();
            return if err.use_stderr() {
                ExitCode::from(EXIT_USAGE)
            } else {
                ExitCode::SUCCESS
            };
        }
    };
    logging::init(&cli.log_level);

    let result = match cli.command {
        Command::Run(args) => run(args),
        Command::Check(args) => check(args),
    };
    match result {
        Ok(code) => ExitCode::from(code),
        Err(err) => {
            eprintln!("error: {err}");
            ExitCode::from(EXIT_USAGE)
        }
    }
}

fn resolve(settings: &SettingsArgs) -> Result<PipelineConfig, CliError> {
    let file = match settings.config.as_ref() {
        Some(path) => FileConfig::load(path)?,
        None => FileConfig::default(),
    };
    let overrides = settings
        .overrides()
        .with_env(|key| std::env::var(key).ok());
    Ok(PipelineConfig::resolve(file, overrides, &settings.resource)?)
}

fn check(args: CheckArgs) -> Result<u8, CliError> {
    let config = resolve(&args.settings)?;
    let redacted = config.redacted();
    let rendered = match args.format {
        OutputFormat::Text => {
            toml::to_string_pretty(&redacted).map_err(|err| CliError::Render(err.to_string()))?
        }
        OutputFormat::Json => serde_json::to_string_pretty(&redacted)
            .map_err(|err| CliError::Render(err.to_string()))?,
    };
    let mut stdout = std::io::stdout().lock();
    writeln!(stdout, "{}", rendered.trim_end())?;
    Ok(0)
}

fn run(args: RunArgs) -> Result<u8, CliError> {
    let config = resolve(&args.settings)?;
    let resource = config.resource.clone();

    let source = if let Some(input) = args.input.as_deref() {
        Source::Reader(
            ReaderSource::new(resource, Input::from_arg(input)).with_limits(config.ingest),
        )
    } else {
        let builder = CommandSource::from_argv(resource, args.command.iter().cloned())
            .ok_or(CliError::NoSource)?;
        Source::Command(
            builder
                .timeout(Some(Duration::from_secs(args.command_timeout_secs)))
                .limits(config.ingest)
                .build(),
        )
    };

    let runtime = tokio::runtime::Builder::new_multi_thread()
        .enable_all()
        .build()
        .map_err(CliError::Runtime)?;

    // Dry-run batches own stdout, so the summary moves to stderr.
    let summary_to_stderr = matches!(config.target, DeliveryTarget::DryRun { .. });
    let report = runtime.block_on(async {
        match &config.target {
            DeliveryTarget::Http(endpoint) => {
                let transport = HttpTransport::new(endpoint)?;
                Ok::<_, CliError>(execute(config.clone(), transport, source).await)
            }
            DeliveryTarget::DryRun { .. } => {
                Ok(execute(config.clone(), DryRunTransport::stdout(), source).await)
            }
        }
    })?;

    print_report(&report, args.format, summary_to_stderr)?;
    Ok(report.exit_code())
}

enum Source {
    Reader(ReaderSource),
    Command(CommandSource),
}

impl RecordSource for Source {
    fn resource(&self) -> &str {
        match self {
            Self::Reader(source) => source.resource(),
            Self::Command(source) => source.resource(),
        }
    }

    async fn open(self) -> Result<RecordStream, SourceError> {
        match self {
            Self::Reader(source) => source.open().await,
            Self::Command(source) => source.open().await,
        }
    }
}

async fn execute<T: Transport>(config: PipelineConfig, transport: T, source: Source) -> RunReport {
    let mut pipeline = Pipeline::new(config, transport);
    let signals = tokio::spawn(cancel_on_signal(pipeline.cancellation_token()));
    let report = pipeline.run(source).await;
    signals.abort();
    report
}

async fn cancel_on_signal(cancel: CancellationToken) {
    let ctrl_c = async {
        if let Err(err) = tokio::signal::ctrl_c().await {
            warn!(error = %err, "cannot listen for Ctrl+C");
            std::future::pending::<()>().await;
        }
    };

    #[cfg(unix)]
    let terminate = async {
        match tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate()) {
            Ok(mut sig) => {
                sig.recv().await;
            }
            Err(err) => {
                warn!(error = %err, "cannot listen for SIGTERM");
                std::future::pending::<()>().await;
            }
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => {},
        _ = terminate => {},
    }
    warn!("shutdown requested; no new batches will be sent");
    cancel.cancel();
}

fn print_report(
    report: &RunReport,
    format: OutputFormat,
    to_stderr: bool,
) -> Result<(), CliError> {
    let rendered = match format {
        OutputFormat::Text => report.render_text(),
        OutputFormat::Json => report
            .to_json()
            .map_err(|err| CliError::Render(err.to_string()))?,
    };
    if to_stderr {
        let mut stderr = std::io::stderr().lock();
        writeln!(stderr, "{}", rendered.trim_end())?;
    } else {
        let mut stdout = std::io::stdout().lock();
        writeln!(stdout, "{}", rendered.trim_end())?;
    }
    Ok(())
}
