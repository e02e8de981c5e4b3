//! External process execution
//!
//! The single place where external tools are spawned. Every invocation gets an
//! explicit environment, a wall-clock timeout, and is killed if the run is
//! cancelled while it executes.

use std::collections::BTreeMap;
use std::ffi::OsString;
use std::process::Stdio;
use std::time::Duration;
use thiserror::Error;
use tokio::io::{AsyncBufReadExt, AsyncRead, BufReader};
use tokio::process::{Child, Command};
use tokio::time::Instant;

use crate::config::defaults::PROGRESS_KEYWORDS;
use crate::core::cancel::CancellationToken;

/// Consecutive read errors tolerated before a stream is abandoned
const MAX_READ_ERRORS: u32 = 3;

/// Process execution errors
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum ProcessError {
    /// The executable could not be started
    #[error("Failed to launch '{program}': {error}")]
    Spawn { program: String, error: String },

    /// The process outlived its timeout and was killed
    #[error("'{program}' timed out after {}s", timeout.as_secs_f64())]
    TimedOut { program: String, timeout: Duration },

    /// The process was killed because cancellation was requested
    #[error("'{program}' terminated on cancellation")]
    Cancelled { program: String },

    /// Waiting on the process failed
    #[error("IO error while running '{program}': {error}")]
    Io { program: String, error: String },
}

/// How tool output is handled while the tool runs
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum OutputMode {
    /// Buffer stdout and stderr; callers surface them on failure
    #[default]
    Captured,
    /// Print every line as it arrives, echoing progress lines through the log
    Streamed,
}

/// A fully specified external command
#[derive(Debug, Clone)]
pub struct Invocation {
    /// Executable name or path
    pub program: String,
    /// Arguments
    pub args: Vec<OsString>,
    /// Wall-clock budget
    pub timeout: Duration,
    /// Output handling
    pub mode: OutputMode,
}

impl Invocation {
    /// Create a captured invocation
    pub fn new(program: impl Into<String>, timeout: Duration) -> Self {
        Self {
            program: program.into(),
            args: Vec::new(),
            timeout,
            mode: OutputMode::Captured,
        }
    }

    /// Append one argument
    #[must_use]
    pub fn arg(mut self, arg: impl Into<OsString>) -> Self {
        self.args.push(arg.into());
        self
    }

    /// Append several arguments
    #[must_use]
    pub fn args<I, S>(mut self, args: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<OsString>,
    {
        self.args.extend(args.into_iter().map(Into::into));
        self
    }

    /// Set the output mode
    #[must_use]
    pub fn with_mode(mut self, mode: OutputMode) -> Self {
        self.mode = mode;
        self
    }

    /// Command line for log messages
    pub fn display(&self) -> String {
        let mut line = self.program.clone();
        for arg in &self.args {
            line.push(' ');
            line.push_str(&arg.to_string_lossy());
        }
        line
    }
}

/// Result of a process that ran to completion
#[derive(Debug, Clone)]
pub struct ToolOutput {
    /// Exit status was zero
    pub success: bool,
    /// Exit code, `None` when killed by a signal
    pub code: Option<i32>,
    /// Interleaved stdout and stderr
    pub output: String,
    /// Wall-clock time spent
    pub elapsed: Duration,
}

/// Run `invocation` with exactly the variables in `env`.
///
/// Completion with a non-zero exit is `Ok` with `success == false`; timeouts
/// and cancellation kill the child and return an error.
pub async fn run(
    invocation: &Invocation,
    env: &BTreeMap<String, String>,
    token: &CancellationToken,
) -> Result<ToolOutput, ProcessError> {
    let program = invocation.program.clone();
    if token.is_requested() {
        return Err(ProcessError::Cancelled { program });
    }

    tracing::debug!("Executing: {}", invocation.display());

    let mut child = Command::new(&invocation.program)
        .args(&invocation.args)
        .env_clear()
        .envs(env)
        .stdin(Stdio::null())
        .stdout(Stdio::piped())
        .stderr(Stdio::piped())
        .kill_on_drop(true)
        .spawn()
        .map_err(|e| ProcessError::Spawn {
            program: program.clone(),
            error: e.to_string(),
        })?;

    let start = Instant::now();
    let deadline = tokio::time::sleep(invocation.timeout);
    tokio::pin!(deadline);

    let mut stdout = child.stdout.take().map(LineStream::new);
    let mut stderr = child.stderr.take().map(LineStream::new);
    let mut output = String::new();

    while stdout.is_some() || stderr.is_some() {
        tokio::select! {
            line = next_line(&mut stdout), if stdout.is_some() => {
                match line {
                    Some(line) => record_line(&mut output, &line, invocation.mode),
                    None => stdout = None,
                }
            }
            line = next_line(&mut stderr), if stderr.is_some() => {
                match line {
                    Some(line) => record_line(&mut output, &line, invocation.mode),
                    None => stderr = None,
                }
            }
            () = &mut deadline => {
                terminate(&mut child, &program).await;
                return Err(ProcessError::TimedOut { program, timeout: invocation.timeout });
            }
            () = token.requested() => {
                terminate(&mut child, &program).await;
                return Err(ProcessError::Cancelled { program });
            }
        }
    }

    let status = tokio::select! {
        status = child.wait() => status.map_err(|e| ProcessError::Io {
            program: program.clone(),
            error: e.to_string(),
        })?,
        () = &mut deadline => {
            terminate(&mut child, &program).await;
            return Err(ProcessError::TimedOut { program, timeout: invocation.timeout });
        }
        () = token.requested() => {
            terminate(&mut child, &program).await;
            return Err(ProcessError::Cancelled { program });
        }
    };

    Ok(ToolOutput {
        success: status.success(),
        code: status.code(),
        output,
        elapsed: start.elapsed(),
    })
}

/// Whether a line of tool output reports progress worth highlighting
pub fn is_progress_line(line: &str) -> bool {
    PROGRESS_KEYWORDS.iter().any(|keyword| line.contains(keyword))
}

/// Line reader that tolerates output which is not valid UTF-8
struct LineStream<R> {
    reader: BufReader<R>,
    buf: Vec<u8>,
    errors: u32,
}

impl<R: AsyncRead + Unpin> LineStream<R> {
    fn new(inner: R) -> Self {
        Self {
            reader: BufReader::new(inner),
            buf: Vec::new(),
            errors: 0,
        }
    }

    /// Next line without its terminator, `None` at end of stream.
    ///
    /// Cancel safe: a partially read line stays in `buf` until completed.
    async fn next(&mut self) -> Option<String> {
        loop {
            match self.reader.read_until(b'\n', &mut self.buf).await {
                Ok(0) if self.buf.is_empty() => return None,
                Ok(_) => {
                    self.errors = 0;
                    let line = String::from_utf8_lossy(&self.buf)
                        .trim_end_matches(['\n', '\r'])
                        .to_string();
                    self.buf.clear();
                    return Some(line);
                }
                Err(e) if e.kind() == std::io::ErrorKind::Interrupted => {}
                Err(e) => {
                    self.errors += 1;
                    if self.errors >= MAX_READ_ERRORS {
                        tracing::warn!("Giving up on tool output after repeated errors: {e}");
                        return None;
                    }
                    tracing::warn!("Error reading tool output: {e}");
                }
            }
        }
    }
}

async fn next_line<R>(stream: &mut Option<LineStream<R>>) -> Option<String>
where
    R: AsyncRead + Unpin,
{
    match stream {
        Some(stream) => stream.next().await,
        None => None,
    }
}

fn record_line(output: &mut String, line: &str, mode: OutputMode) {
    if mode == OutputMode::Streamed {
        if is_progress_line(line) {
            tracing::info!("{line}");
        } else {
            println!("{line}");
        }
    }
    output.push_str(line);
    output.push('\n');
}

async fn terminate(child: &mut Child, program: &str) {
    if let Err(e) = child.kill().await {
        tracing::warn!("Failed to kill '{program}': {e}");
    }
}
