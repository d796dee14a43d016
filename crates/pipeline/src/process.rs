//! Supervised external tool processes.
//!
//! A [`ToolCommand`] describes one invocation with a fixed argument list.
//! Spawning it yields a [`SupervisedProcess`] whose stdout and stderr are
//! streamed line by line into a [`JobLog`]. Stopping a tool means sending
//! it SIGINT (so recorders can finalize their output) and awaiting the
//! actual exit.

use std::ffi::{OsStr, OsString};
use std::fmt;
use std::io;
use std::path::{Path, PathBuf};
use std::process::{ExitStatus, Stdio};

use tokio::io::{AsyncBufReadExt, AsyncRead, BufReader};
use tokio::process::{Child, Command};
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;

use crate::log::JobLog;

/// Errors from launching or supervising an external tool.
#[derive(Debug, thiserror::Error)]
pub enum ProcessError {
    #[error("Failed to launch {program}: {source}")]
    Spawn {
        program: String,
        #[source]
        source: io::Error,
    },

    /// The tool exited with a nonzero code or was killed by a signal.
    #[error("{program} exited abnormally ({status})")]
    Failed { program: String, status: ExitStatus },

    #[error("Failed to supervise {program}: {source}")]
    Io {
        program: String,
        #[source]
        source: io::Error,
    },

    /// The tool was interrupted because its job was cancelled.
    #[error("{program} was interrupted by cancellation")]
    Cancelled { program: String },
}

/// One external tool invocation.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ToolCommand {
    program: PathBuf,
    args: Vec<OsString>,
}

impl ToolCommand {
    pub fn new(program: impl Into<PathBuf>) -> Self {
        Self {
            program: program.into(),
            args: Vec::new(),
        }
    }

    pub fn arg(mut self, arg: impl AsRef<OsStr>) -> Self {
        self.args.push(arg.as_ref().to_os_string());
        self
    }

    pub fn args<I, S>(mut self, args: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: AsRef<OsStr>,
    {
        self.args
            .extend(args.into_iter().map(|a| a.as_ref().to_os_string()));
        self
    }

    pub fn program(&self) -> &Path {
        &self.program
    }

    pub fn get_args(&self) -> &[OsString] {
        &self.args
    }

    /// Launch the tool with its output streamed into `log`.
    pub fn spawn(&self, log: &JobLog) -> Result<SupervisedProcess, ProcessError> {
        let program = self.program.display().to_string();

        let mut child = Command::new(&self.program)
            .args(&self.args)
            .stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .kill_on_drop(true)
            .spawn()
            .map_err(|source| ProcessError::Spawn {
                program: program.clone(),
                source,
            })?;

        tracing::debug!(program = %program, pid = ?child.id(), "Spawned tool process");

        let mut pumps = Vec::with_capacity(2);
        if let Some(stdout) = child.stdout.take() {
            pumps.push(pump_lines(stdout, log.clone()));
        }
        if let Some(stderr) = child.stderr.take() {
            pumps.push(pump_lines(stderr, log.clone()));
        }

        Ok(SupervisedProcess {
            program,
            child,
            pumps,
            interrupted: false,
        })
    }

    /// Run the tool to completion.
    ///
    /// Cancelling `cancel` interrupts the tool and returns
    /// [`ProcessError::Cancelled`] once it has exited. A nonzero exit is
    /// reported as [`ProcessError::Failed`].
    pub async fn run(&self, log: &JobLog, cancel: &CancellationToken) -> Result<(), ProcessError> {
        let mut process = self.spawn(log)?;
        let status = process.wait_or_interrupt(cancel).await?;
        if status.success() {
            Ok(())
        } else {
            Err(ProcessError::Failed {
                program: process.program,
                status,
            })
        }
    }
}

impl fmt::Display for ToolCommand {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.program.display())?;
        for arg in &self.args {
            write!(f, " {}", arg.to_string_lossy())?;
        }
        Ok(())
    }
}

/// A running tool whose output is being copied into a job log.
///
/// The process is killed if this handle is dropped before it exited.
#[derive(Debug)]
pub struct SupervisedProcess {
    program: String,
    child: Child,
    pumps: Vec<JoinHandle<()>>,
    interrupted: bool,
}

impl SupervisedProcess {
    pub fn program(&self) -> &str {
        &self.program
    }

    pub fn id(&self) -> Option<u32> {
        self.child.id()
    }

    /// Whether [`interrupt`](Self::interrupt) has been called. An exit
    /// after our own interrupt is the normal way to end a recording.
    pub fn interrupt_requested(&self) -> bool {
        self.interrupted
    }

    /// Ask the tool to terminate gracefully (SIGINT). Does not wait.
    pub fn interrupt(&mut self) -> Result<(), ProcessError> {
        self.interrupted = true;
        send_interrupt(&mut self.child).map_err(|source| ProcessError::Io {
            program: self.program.clone(),
            source,
        })
    }

    /// Wait for the tool to exit and for its output to be fully logged.
    pub async fn wait(&mut self) -> Result<ExitStatus, ProcessError> {
        let status = self.child.wait().await.map_err(|source| ProcessError::Io {
            program: self.program.clone(),
            source,
        })?;
        self.drain_output().await;
        Ok(status)
    }

    /// Interrupt the tool and wait for it to exit.
    pub async fn stop(&mut self) -> Result<ExitStatus, ProcessError> {
        self.interrupt()?;
        self.wait().await
    }

    /// Wait for the tool to exit, interrupting it if `cancel` fires first.
    pub async fn wait_or_interrupt(
        &mut self,
        cancel: &CancellationToken,
    ) -> Result<ExitStatus, ProcessError> {
        let exited = tokio::select! {
            status = self.child.wait() => Some(status),
            _ = cancel.cancelled() => None,
        };

        match exited {
            Some(status) => {
                let status = status.map_err(|source| ProcessError::Io {
                    program: self.program.clone(),
                    source,
                })?;
                self.drain_output().await;
                Ok(status)
            }
            None => {
                tracing::debug!(program = %self.program, "Interrupting tool on cancellation");
                self.stop().await?;
                Err(ProcessError::Cancelled {
                    program: self.program.clone(),
                })
            }
        }
    }

    async fn drain_output(&mut self) {
        for pump in self.pumps.drain(..) {
            if let Err(e) = pump.await {
                tracing::warn!(program = %self.program, error = %e, "Output pump task failed");
            }
        }
    }
}

// ---- private helpers ----

fn pump_lines<R>(reader: R, log: JobLog) -> JoinHandle<()>
where
    R: AsyncRead + Unpin + Send + 'static,
{
    tokio::spawn(async move {
        let mut segments = BufReader::new(reader).split(b'\n');
        loop {
            match segments.next_segment().await {
                Ok(Some(bytes)) => {
                    let line = String::from_utf8_lossy(&bytes);
                    log.line(line.trim_end_matches('\r')).await;
                }
                Ok(None) => break,
                Err(e) => {
                    tracing::debug!(error = %e, "Stopped reading tool output");
                    break;
                }
            }
        }
    })
}

#[cfg(unix)]
fn send_interrupt(child: &mut Child) -> io::Result<()> {
    // Already reaped; nothing to signal.
    let Some(pid) = child.id() else {
        return Ok(());
    };

    // SAFETY: kill(2) has no memory-safety preconditions; `pid` is our
    // own child and has not been reaped yet, so it cannot be recycled.
    let rc = unsafe { libc::kill(pid as libc::pid_t, libc::SIGINT) };
    if rc == 0 {
        return Ok(());
    }

    let err = io::Error::last_os_error();
    if err.raw_os_error() == Some(libc::ESRCH) {
        Ok(())
    } else {
        Err(err)
    }
}

#[cfg(not(unix))]
fn send_interrupt(child: &mut Child) -> io::Result<()> {
    child.start_kill()
}

#[cfg(all(test, unix))]
mod tests {
    use std::time::Duration;

    use assert_matches::assert_matches;

    use super::*;

    fn scratch_log() -> (tempfile::TempDir, JobLog) {
        let dir = tempfile::tempdir().unwrap();
        let log = JobLog::create(dir.path().join("log.txt")).unwrap();
        (dir, log)
    }

    #[test]
    fn command_displays_program_and_args() {
        let command = ToolCommand::new("/usr/bin/gw")
            .arg("read")
            .args(["--tracks", "c=0-79"])
            .arg(Path::new("/tmp/out.scp"));
        assert_eq!(command.to_string(), "/usr/bin/gw read --tracks c=0-79 /tmp/out.scp");
        assert_eq!(command.get_args().len(), 4);
    }

    #[tokio::test]
    async fn output_lines_reach_the_log() {
        let (_dir, log) = scratch_log();
        let cancel = CancellationToken::new();

        ToolCommand::new("/bin/sh")
            .args(["-c", "echo out-line; echo err-line >&2"])
            .run(&log, &cancel)
            .await
            .unwrap();

        let content = tokio::fs::read_to_string(log.path()).await.unwrap();
        assert!(content.contains("out-line\n"));
        assert!(content.contains("err-line\n"));
    }

    #[tokio::test]
    async fn nonzero_exit_is_a_failure() {
        let (_dir, log) = scratch_log();
        let result = ToolCommand::new("/bin/sh")
            .args(["-c", "exit 3"])
            .run(&log, &CancellationToken::new())
            .await;

        assert_matches!(result, Err(ProcessError::Failed { status, .. }) if status.code() == Some(3));
    }

    #[tokio::test]
    async fn missing_binary_fails_to_spawn() {
        let (_dir, log) = scratch_log();
        let result = ToolCommand::new("/nonexistent/tool").spawn(&log);
        assert_matches!(result, Err(ProcessError::Spawn { .. }));
    }

    #[tokio::test]
    async fn cancellation_interrupts_and_awaits_exit() {
        let (_dir, log) = scratch_log();
        let cancel = CancellationToken::new();
        let mut process = ToolCommand::new("/bin/sleep").arg("30").spawn(&log).unwrap();

        let canceller = cancel.clone();
        tokio::spawn(async move {
            tokio::time::sleep(Duration::from_millis(50)).await;
            canceller.cancel();
        });

        let result = tokio::time::timeout(Duration::from_secs(5), process.wait_or_interrupt(&cancel))
            .await
            .expect("sleep should be interrupted promptly");
        assert_matches!(result, Err(ProcessError::Cancelled { .. }));
        assert!(process.interrupt_requested());
        assert_eq!(process.id(), None);
    }

    #[tokio::test]
    async fn stopping_an_exited_process_is_harmless() {
        let (_dir, log) = scratch_log();
        let mut process = ToolCommand::new("/bin/sh").args(["-c", "exit 0"]).spawn(&log).unwrap();
        let status = process.wait().await.unwrap();
        assert!(status.success());

        let status = process.stop().await.unwrap();
        assert!(status.success());
    }
}
