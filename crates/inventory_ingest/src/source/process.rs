use std::{
    collections::BTreeMap,
    io,
    path::Path,
    process::{ExitStatus, Stdio},
    time::Duration,
};

use tokio::{
    io::{AsyncRead, AsyncReadExt},
    process::{Child, Command},
    time,
};

use super::SourceError;

#[derive(Debug, Clone)]
pub struct CommandOutput {
    pub status: ExitStatus,
    pub stdout: Vec<u8>,
    pub stderr: Vec<u8>,
}

async fn drain<R>(mut reader: R) -> Result<Vec<u8>, io::Error>
where
    R: AsyncRead + Unpin,
{
    let mut buffer = Vec::new();
    reader.read_to_end(&mut buffer).await?;
    Ok(buffer)
}

/// `ETXTBSY`: a freshly written script may still be open for writing.
const TEXT_FILE_BUSY: i32 = 26;
const BUSY_RETRIES: u32 = 4;

async fn retry_busy<T>(mut op: impl FnMut() -> io::Result<T>) -> io::Result<T> {
    let mut backoff = Duration::from_millis(2);
    let mut attempt = 0;
    loop {
        match op() {
            Err(err) if err.raw_os_error() == Some(TEXT_FILE_BUSY) && attempt < BUSY_RETRIES => {
                attempt += 1;
                time::sleep(backoff).await;
                backoff = std::cmp::min(backoff * 2, Duration::from_millis(50));
            }
            other => return other,
        }
    }
}

async fn spawn_with_retry(command: &mut Command, program: &Path) -> Result<Child, SourceError> {
    retry_busy(|| command.spawn())
        .await
        .map_err(|source| SourceError::Spawn {
            program: program.to_path_buf(),
            source,
        })
}

/// Runs `command` to completion with stdin closed, capturing both output streams.
///
/// The child is killed if `timeout` expires or the returned future is dropped.
pub(crate) async fn run_command(
    mut command: Command,
    program: &Path,
    timeout: Option<Duration>,
) -> Result<CommandOutput, SourceError> {
    command
        .stdin(Stdio::null())
        .stdout(Stdio::piped())
        .stderr(Stdio::piped())
        .kill_on_drop(true);

    let mut child = spawn_with_retry(&mut command, program).await?;

    let stdout = child.stdout.take().ok_or(SourceError::MissingStdout)?;
    let stderr = child.stderr.take().ok_or(SourceError::MissingStderr)?;

    let stdout_task = tokio::spawn(drain(stdout));
    let stderr_task = tokio::spawn(drain(stderr));

    let wait_fut = child.wait();
    let status = if let Some(dur) = timeout {
        time::timeout(dur, wait_fut)
            .await
            .map_err(|_| SourceError::Timeout { timeout: dur })?
            .map_err(SourceError::Wait)?
    } else {
        wait_fut.await.map_err(SourceError::Wait)?
    };

    let stdout = stdout_task
        .await
        .map_err(|e| SourceError::Join(e.to_string()))?
        .map_err(SourceError::StdoutRead)?;
    let stderr = stderr_task
        .await
        .map_err(|e| SourceError::Join(e.to_string()))?
        .map_err(SourceError::StderrRead)?;

    Ok(CommandOutput {
        status,
        stdout,
        stderr,
    })
}

pub(crate) fn apply_env(command: &mut Command, env: &BTreeMap<String, String>) {
    for (k, v) in env {
        command.env(k, v);
    }
}

#[cfg(test)]
mod tests {
    use std::sync::{
        atomic::{AtomicBool, AtomicU32, Ordering},
        Arc,
    };

    use super::*;

    #[tokio::test(start_paused = true)]
    async fn busy_executable_is_retried_without_blocking_the_runtime() {
        let ran = Arc::new(AtomicBool::new(false));
        let other = tokio::spawn({
            let ran = Arc::clone(&ran);
            async move { ran.store(true, Ordering::SeqCst) }
        });

        let calls = AtomicU32::new(0);
        let result = retry_busy(|| {
            if calls.fetch_add(1, Ordering::SeqCst) < 2 {
                Err(io::Error::from_raw_os_error(TEXT_FILE_BUSY))
            } else {
                Ok("spawned")
            }
        })
        .await;

        assert_eq!(result.unwrap(), "spawned");
        assert_eq!(calls.load(Ordering::SeqCst), 3);
        assert!(ran.load(Ordering::SeqCst), "other tasks ran during the backoff");
        other.await.unwrap();
    }

    #[tokio::test(start_paused = true)]
    async fn busy_retries_are_bounded() {
        let calls = AtomicU32::new(0);
        let result: io::Result<()> = retry_busy(|| {
            calls.fetch_add(1, Ordering::SeqCst);
            Err(io::Error::from_raw_os_error(TEXT_FILE_BUSY))
        })
        .await;

        assert_eq!(result.unwrap_err().raw_os_error(), Some(TEXT_FILE_BUSY));
        assert_eq!(calls.load(Ordering::SeqCst), BUSY_RETRIES + 1);
    }

    #[tokio::test]
    async fn other_spawn_errors_are_not_retried() {
        let calls = AtomicU32::new(0);
        let result: io::Result<()> = retry_busy(|| {
            calls.fetch_add(1, Ordering::SeqCst);
            Err(io::Error::from(io::ErrorKind::NotFound))
        })
        .await;

        assert_eq!(result.unwrap_err().kind(), io::ErrorKind::NotFound);
        assert_eq!(calls.load(Ordering::SeqCst), 1);
    }
}
