//! Builder for executing external tool commands with a hard timeout.
//!
//! Unlike a plain `tokio::time::timeout` around `wait_with_output`, the
//! runner keeps ownership of the child and kills it when the deadline passes
//! or when its [`ProcessTable`] asks for termination.

use crate::process::ProcessTable;
use crate::{Error, Result};
use async_trait::async_trait;
use std::path::PathBuf;
use std::process::Stdio;
use std::sync::Arc;
use std::time::{Duration, Instant};
use tokio::io::AsyncReadExt;
use tokio::process::{Child, Command};

/// Default command timeout.
const DEFAULT_TIMEOUT: Duration = Duration::from_secs(10);

/// Output captured from a tool that exited on its own.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ToolOutput {
    /// Exit code, `None` when the process was ended by a signal.
    pub exit_code: Option<i32>,
    /// Captured standard output (lossy UTF-8).
    pub stdout: String,
    /// Captured standard error (lossy UTF-8).
    pub stderr: String,
    /// Wall-clock time from spawn to exit.
    pub elapsed: Duration,
}

impl ToolOutput {
    /// Whether the process exited with status zero.
    pub fn success(&self) -> bool {
        self.exit_code == Some(0)
    }
}

/// How a tool invocation ended.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ToolRun {
    /// The process exited by itself.
    Exited(ToolOutput),
    /// The deadline passed and the process was killed.
    TimedOut { after: Duration },
    /// The process was killed through its process table.
    Cancelled,
}

/// A builder for constructing external tool invocations.
///
/// # Example
///
/// ```no_run
/// use streamsweep_probe::{CommandRunner, ProcessRunner, ToolCommand};
/// use std::time::Duration;
///
/// # async fn example() -> streamsweep_probe::Result<()> {
/// let mut cmd = ToolCommand::new("ffprobe");
/// cmd.args(["-v", "error", "-of", "json", "http://10.0.0.1/live"])
///     .timeout(Duration::from_secs(3));
/// let run = ProcessRunner::new().run(&cmd).await?;
/// println!("{run:?}");
/// # Ok(())
/// # }
/// ```
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ToolCommand {
    program: PathBuf,
    args: Vec<String>,
    timeout: Duration,
}

impl ToolCommand {
    /// Create a new command for the given program path.
    pub fn new(program: impl Into<PathBuf>) -> Self {
        Self {
            program: program.into(),
            args: Vec::new(),
            timeout: DEFAULT_TIMEOUT,
        }
    }

    /// Append a single argument.
    pub fn arg(&mut self, s: impl Into<String>) -> &mut Self {
        self.args.push(s.into());
        self
    }

    /// Append multiple arguments.
    pub fn args(&mut self, iter: impl IntoIterator<Item = impl Into<String>>) -> &mut Self {
        self.args.extend(iter.into_iter().map(Into::into));
        self
    }

    /// Set the maximum execution time.
    pub fn timeout(&mut self, d: Duration) -> &mut Self {
        self.timeout = d;
        self
    }

    pub fn program(&self) -> &std::path::Path {
        &self.program
    }

    pub fn get_args(&self) -> &[String] {
        &self.args
    }

    pub fn get_timeout(&self) -> Duration {
        self.timeout
    }

    /// File name of the program, for logs and errors.
    pub fn program_name(&self) -> String {
        self.program
            .file_name()
            .map(|n| n.to_string_lossy().to_string())
            .unwrap_or_else(|| self.program.to_string_lossy().to_string())
    }
}

/// Executes [`ToolCommand`]s.
///
/// Implementations return `Err` only when the process could not be run at
/// all; timeouts and cancellations are ordinary [`ToolRun`] values.
#[async_trait]
pub trait CommandRunner: Send + Sync {
    async fn run(&self, command: &ToolCommand) -> Result<ToolRun>;

    /// Kill every process this runner has in flight. Returns how many were signalled.
    fn terminate_all(&self) -> usize {
        0
    }

    /// Number of processes currently running.
    fn active_count(&self) -> usize {
        0
    }
}

/// Runs commands as real child processes tracked in a [`ProcessTable`].
#[derive(Clone, Default)]
pub struct ProcessRunner {
    table: Arc<ProcessTable>,
}

impl ProcessRunner {
    pub fn new() -> Self {
        Self::default()
    }

    /// Create a runner sharing an existing table.
    pub fn with_table(table: Arc<ProcessTable>) -> Self {
        Self { table }
    }

    pub fn table(&self) -> &Arc<ProcessTable> {
        &self.table
    }
}

enum Finished {
    Done(std::io::Result<ToolOutput>),
    TimedOut,
    Cancelled,
}

#[async_trait]
impl CommandRunner for ProcessRunner {
    async fn run(&self, command: &ToolCommand) -> Result<ToolRun> {
        let tool = command.program_name();

        let mut cmd = Command::new(command.program());
        cmd.args(command.get_args())
            .stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .kill_on_drop(true);

        let started = Instant::now();
        let mut child = cmd.spawn().map_err(|e| Error::spawn(&tool, e.to_string()))?;
        let guard = self.table.register(child.id());

        let finished = tokio::select! {
            res = collect_output(&mut child, started) => Finished::Done(res),
            _ = tokio::time::sleep(command.get_timeout()) => Finished::TimedOut,
            _ = guard.cancelled() => Finished::Cancelled,
        };

        match finished {
            Finished::Done(Ok(output)) => Ok(ToolRun::Exited(output)),
            Finished::Done(Err(e)) => Err(Error::spawn(&tool, format!("waiting for process: {e}"))),
            Finished::TimedOut => {
                kill_child(&mut child, &tool).await;
                tracing::trace!(tool = %tool, timeout_ms = command.get_timeout().as_millis() as u64, "Tool timed out");
                Ok(ToolRun::TimedOut {
                    after: command.get_timeout(),
                })
            }
            Finished::Cancelled => {
                kill_child(&mut child, &tool).await;
                Ok(ToolRun::Cancelled)
            }
        }
    }

    fn terminate_all(&self) -> usize {
        self.table.terminate_all()
    }

    fn active_count(&self) -> usize {
        self.table.active_count()
    }
}

async fn collect_output(child: &mut Child, started: Instant) -> std::io::Result<ToolOutput> {
    let mut stdout_pipe = child.stdout.take();
    let mut stderr_pipe = child.stderr.take();
    let mut stdout = Vec::new();
    let mut stderr = Vec::new();

    let read_stdout = async {
        if let Some(pipe) = stdout_pipe.as_mut() {
            pipe.read_to_end(&mut stdout).await?;
        }
        Ok::<_, std::io::Error>(())
    };
    let read_stderr = async {
        if let Some(pipe) = stderr_pipe.as_mut() {
            pipe.read_to_end(&mut stderr).await?;
        }
        Ok::<_, std::io::Error>(())
    };

    let (status, out_res, err_res) = tokio::join!(child.wait(), read_stdout, read_stderr);
    let status = status?;
    out_res?;
    err_res?;

    Ok(ToolOutput {
        exit_code: status.code(),
        stdout: String::from_utf8_lossy(&stdout).to_string(),
        stderr: String::from_utf8_lossy(&stderr).to_string(),
        elapsed: started.elapsed(),
    })
}

async fn kill_child(child: &mut Child, tool: &str) {
    if let Err(e) = child.kill().await {
        // Already exited between the deadline and the kill.
        tracing::debug!(tool = %tool, error = %e, "Failed to kill tool process");
    }
}
