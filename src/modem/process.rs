//! # Process Invocation
//!
//! Runs one external tool to completion for a one-shot unit of work.
//!
//! ## Lifecycle:
//! 1. **Spawn** with a literal argument vector. Nothing goes through a shell.
//! 2. **Feed** the optional stdin payload, then close the pipe so the tool sees EOF.
//! 3. **Drain** stdout and stderr until the tool exits.
//! 4. **Resolve** to exactly one outcome: success, nonzero exit, launch failure
//!    or watchdog timeout.
//!
//! The completion sources (exit, stdin error, watchdog) run as separate tasks
//! and report through a [`Responder`], so the first to fire decides the outcome.
//! Children are spawned with `kill_on_drop`, so cancelling the waiting task
//! (watchdog expiry) also kills the tool.

use super::guard::{single_response, Responder};
use std::ffi::{OsStr, OsString};
use std::fmt;
use std::io;
use std::path::{Path, PathBuf};
use std::process::{Output, Stdio};
use std::sync::Arc;
use std::time::Duration;
use tokio::io::AsyncWriteExt;
use tokio::process::Command;
use tracing::{debug, warn};

/// Does `path` point at an executable regular file?
///
/// This is a fixed-cost metadata lookup, fine to call inline on the event loop.
pub fn is_executable(path: &Path) -> bool {
    let Ok(metadata) = std::fs::metadata(path) else {
        return false;
    };
    if !metadata.is_file() {
        return false;
    }

    #[cfg(unix)]
    {
        use std::os::unix::fs::PermissionsExt;
        metadata.permissions().mode() & 0o111 != 0
    }

    #[cfg(not(unix))]
    {
        true
    }
}

/// Everything needed to run one tool once.
#[derive(Debug, Clone)]
pub struct Invocation {
    program: PathBuf,
    args: Vec<OsString>,
    stdin: Option<Vec<u8>>,
    timeout: Option<Duration>,
}

impl Invocation {
    pub fn new(program: impl Into<PathBuf>) -> Self {
        Self {
            program: program.into(),
            args: Vec::new(),
            stdin: None,
            timeout: None,
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
            .extend(args.into_iter().map(|arg| arg.as_ref().to_os_string()));
        self
    }

    /// Payload written to the tool's stdin before it is closed.
    pub fn stdin(mut self, payload: impl Into<Vec<u8>>) -> Self {
        self.stdin = Some(payload.into());
        self
    }

    pub fn timeout(mut self, timeout: Option<Duration>) -> Self {
        self.timeout = timeout;
        self
    }
}

/// Captured output of a tool that exited with status 0.
#[derive(Debug, Clone, Default)]
pub struct ProcessOutput {
    pub stdout: String,
    pub stderr: String,
}

/// Why a tool run did not succeed.
#[derive(Debug)]
pub enum ProcessError {
    /// The executable could not be started at all.
    Launch { program: PathBuf, source: io::Error },

    /// The tool ran and exited nonzero (or was killed by a signal: `code` is `None`).
    Failed {
        code: Option<i32>,
        stdout: String,
        stderr: String,
    },

    /// The watchdog fired first; the tool was killed.
    Timeout(Duration),

    /// Talking to the tool failed (stdin write, waiting on exit).
    Io(io::Error),
}

impl ProcessError {
    /// Whatever the tool printed on stdout before failing.
    pub fn stdout(&self) -> &str {
        match self {
            ProcessError::Failed { stdout, .. } => stdout,
            _ => "",
        }
    }
}

impl fmt::Display for ProcessError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ProcessError::Launch { program, source } => {
                write!(f, "failed to launch {}: {}", program.display(), source)
            }
            ProcessError::Failed { code: Some(code), .. } => {
                write!(f, "process exited with code {}", code)
            }
            ProcessError::Failed { code: None, .. } => write!(f, "process terminated by signal"),
            ProcessError::Timeout(limit) => {
                write!(f, "process timed out after {}s", limit.as_secs_f64())
            }
            ProcessError::Io(err) => write!(f, "process I/O failed: {}", err),
        }
    }
}

impl std::error::Error for ProcessError {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        match self {
            ProcessError::Launch { source, .. } => Some(source),
            ProcessError::Io(err) => Some(err),
            _ => None,
        }
    }
}

type Outcome = Result<ProcessOutput, ProcessError>;

/// Run the invocation to completion.
pub async fn run(invocation: Invocation) -> Outcome {
    let Invocation {
        program,
        args,
        stdin,
        timeout,
    } = invocation;

    let mut command = Command::new(&program);
    command
        .args(&args)
        .stdin(if stdin.is_some() {
            Stdio::piped()
        } else {
            Stdio::null()
        })
        .stdout(Stdio::piped())
        .stderr(Stdio::piped())
        .kill_on_drop(true);

    let mut child = command.spawn().map_err(|source| ProcessError::Launch {
        program: program.clone(),
        source,
    })?;
    debug!(program = %program.display(), pid = ?child.id(), "external tool spawned");

    let (responder, outcome) = single_response::<Outcome>();
    let responder = Arc::new(responder);

    let feeder = match (stdin, child.stdin.take()) {
        (Some(payload), Some(pipe)) => Some(tokio::spawn(feed_stdin(
            pipe,
            payload,
            responder.clone(),
        ))),
        _ => None,
    };

    let waiter = {
        let responder = responder.clone();
        tokio::spawn(async move {
            let outcome = match child.wait_with_output().await {
                Ok(output) => classify(output),
                Err(err) => Err(ProcessError::Io(err)),
            };
            responder.deliver(outcome);
        })
    };

    let watchdog = timeout.map(|limit| {
        let responder = responder.clone();
        tokio::spawn(async move {
            tokio::time::sleep(limit).await;
            if responder.deliver(Err(ProcessError::Timeout(limit))) {
                warn!(limit_secs = limit.as_secs_f64(), "external tool hit the watchdog");
            }
        })
    });

    drop(responder);

    let result = outcome.await.unwrap_or_else(|_| {
        Err(ProcessError::Io(io::Error::new(
            io::ErrorKind::Other,
            "process completion was never reported",
        )))
    });

    // Dropping the waiter's future kills the child if it is still running.
    waiter.abort();
    if let Some(watchdog) = watchdog {
        watchdog.abort();
    }
    if let Some(feeder) = feeder {
        feeder.abort();
    }

    result
}

async fn feed_stdin(
    mut pipe: tokio::process::ChildStdin,
    payload: Vec<u8>,
    responder: Arc<Responder<Outcome>>,
) {
    let written = pipe.write_all(&payload).await;
    drop(pipe);

    match written {
        Ok(()) => {}
        // The tool closed its input early; its exit status tells the story.
        Err(err) if err.kind() == io::ErrorKind::BrokenPipe => {
            debug!("external tool closed stdin before reading the whole payload");
        }
        Err(err) => {
            responder.deliver(Err(ProcessError::Io(err)));
        }
    }
}

fn classify(output: Output) -> Outcome {
    let stdout = String::from_utf8_lossy(&output.stdout).into_owned();
    let stderr = String::from_utf8_lossy(&output.stderr).into_owned();

    if output.status.success() {
        Ok(ProcessOutput { stdout, stderr })
    } else {
        Err(ProcessError::Failed {
            code: output.status.code(),
            stdout,
            stderr,
        })
    }
}
