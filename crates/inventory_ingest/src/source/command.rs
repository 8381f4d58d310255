use std::{
    collections::BTreeMap,
    ffi::OsString,
    path::PathBuf,
    time::Duration,
};

use inventory_events::{parse_document, IngestLimits};
use tokio::process::Command;
use tracing::{debug, info};

use super::{
    into_stream,
    process::{apply_env, run_command},
    RecordSource, RecordStream, SourceError,
};

/// Longest stderr excerpt carried in a [`SourceError::NonZeroExit`].
const MAX_STDERR_EXCERPT: usize = 2048;

/// Runs an external inventory command (for example a cloud CLI `list` with JSON output)
/// and parses its stdout as a JSON array, a single object, or JSONL.
#[derive(Debug, Clone)]
pub struct CommandSource {
    resource: String,
    program: PathBuf,
    args: Vec<OsString>,
    env: BTreeMap<String, String>,
    working_dir: Option<PathBuf>,
    timeout: Option<Duration>,
    limits: IngestLimits,
}

impl CommandSource {
    pub fn builder(resource: impl Into<String>, program: impl Into<PathBuf>) -> CommandSourceBuilder {
        CommandSourceBuilder {
            resource: resource.into(),
            program: program.into(),
            args: Vec::new(),
            env: BTreeMap::new(),
            working_dir: None,
            timeout: Some(Duration::from_secs(300)),
            limits: IngestLimits::default(),
        }
    }

    /// Builds a source from an argv vector; the first element is the program.
    pub fn from_argv<I, S>(resource: impl Into<String>, argv: I) -> Option<CommandSourceBuilder>
    where
        I: IntoIterator<Item = S>,
        S: Into<OsString>,
    {
        let mut argv = argv.into_iter().map(Into::into);
        let program = argv.next()?;
        Some(Self::builder(resource, program).args(argv))
    }

    pub fn program(&self) -> &PathBuf {
        &self.program
    }

    pub fn args(&self) -> &[OsString] {
        &self.args
    }

    fn command(&self) -> Command {
        let mut command = Command::new(&self.program);
        command.args(&self.args);
        if let Some(dir) = self.working_dir.as_ref() {
            command.current_dir(dir);
        }
        apply_env(&mut command, &self.env);
        command
    }
}

impl RecordSource for CommandSource {
    fn resource(&self) -> &str {
        &self.resource
    }

    async fn open(self) -> Result<RecordStream, SourceError> {
        info!(
            resource = %self.resource,
            program = %self.program.display(),
            args = self.args.len(),
            "running inventory command"
        );
        let output = run_command(self.command(), &self.program, self.timeout).await?;

        if !output.status.success() {
            return Err(SourceError::NonZeroExit {
                status: output.status,
                stderr: stderr_excerpt(&output.stderr),
            });
        }
        if !output.stderr.is_empty() {
            debug!(
                resource = %self.resource,
                stderr = %stderr_excerpt(&output.stderr),
                "inventory command wrote to stderr"
            );
        }

        let records = parse_document(&output.stdout, self.limits)?;
        debug!(
            resource = %self.resource,
            stdout_bytes = output.stdout.len(),
            records = records.len(),
            "inventory command output parsed"
        );
        Ok(into_stream(records))
    }
}

#[derive(Debug, Clone)]
pub struct CommandSourceBuilder {
    resource: String,
    program: PathBuf,
    args: Vec<OsString>,
    env: BTreeMap<String, String>,
    working_dir: Option<PathBuf>,
    timeout: Option<Duration>,
    limits: IngestLimits,
}

impl CommandSourceBuilder {
    pub fn arg(mut self, arg: impl Into<OsString>) -> Self {
        self.args.push(arg.into());
        self
    }

    pub fn args<I, S>(mut self, args: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<OsString>,
    {
        self.args.extend(args.into_iter().map(Into::into));
        self
    }

    pub fn env(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.env.insert(key.into(), value.into());
        self
    }

    pub fn working_dir(mut self, dir: impl Into<PathBuf>) -> Self {
        self.working_dir = Some(dir.into());
        self
    }

    /// `None` waits indefinitely.
    pub fn timeout(mut self, timeout: Option<Duration>) -> Self {
        self.timeout = timeout;
        self
    }

    pub fn limits(mut self, limits: IngestLimits) -> Self {
        self.limits = limits;
        self
    }

    pub fn build(self) -> CommandSource {
        CommandSource {
            resource: self.resource,
            program: self.program,
            args: self.args,
            env: self.env,
            working_dir: self.working_dir,
            timeout: self.timeout,
            limits: self.limits,
        }
    }
}

fn stderr_excerpt(stderr: &[u8]) -> String {
    let text = String::from_utf8_lossy(stderr);
    let text = text.trim();
    match text.char_indices().nth(MAX_STDERR_EXCERPT) {
        Some((cut, _)) => format!("{}...", &text[..cut]),
        None => text.to_string(),
    }
}
