//! Binary executor: runs one [`Invocation`] as an isolated child process.
//!
//! Guarantees:
//! - no shell: the argument vector is passed to the OS as-is;
//! - allowlisted environment only (see [`env`]);
//! - stdin is either the invocation's payload or closed immediately;
//! - stdout/stderr capped at [`MAX_OUTPUT_BYTES`] each, escape sequences
//!   stripped;
//! - on timeout SIGTERM, then SIGKILL after a grace period;
//! - never fails: spawn errors come back as an [`ExecResult`] with
//!   [`SPAWN_FAILURE_EXIT_CODE`].

pub mod active;
pub mod capture;
pub mod env;

use std::process::{ExitStatus, Stdio};
use std::time::{Duration, Instant};

use async_trait::async_trait;
use serde::Serialize;
use tokio::io::AsyncWriteExt;
use tokio::process::{Child, Command};
use tracing::{debug, warn};

use crate::adapter::Invocation;

pub use active::terminate_all;
pub use capture::{TRUNCATION_MARKER, strip_ansi};

/// Per-stream capture ceiling.
pub const MAX_OUTPUT_BYTES: usize = 10 * 1024 * 1024;

/// Time between SIGTERM and SIGKILL for a timed-out child.
pub const DEFAULT_KILL_GRACE: Duration = Duration::from_secs(10);

/// How long to keep reading pipes after the child has exited.
const PIPE_DRAIN_GRACE: Duration = Duration::from_secs(2);

/// Exit code reported when the process could not be started at all.
pub const SPAWN_FAILURE_EXIT_CODE: i32 = 127;

/// Outcome of running one invocation.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ExecResult {
    /// Process exit code; `128 + signal` for signal deaths on Unix.
    pub exit_code: i32,
    pub stdout: String,
    pub stderr: String,
    /// The process was terminated for exceeding its deadline.
    pub timed_out: bool,
    pub duration_ms: u64,
}

impl ExecResult {
    fn spawn_failure(program: &str, error: &std::io::Error, elapsed: Duration) -> Self {
        Self {
            exit_code: SPAWN_FAILURE_EXIT_CODE,
            stdout: String::new(),
            stderr: format!("failed to spawn {program:?}: {error}"),
            timed_out: false,
            duration_ms: millis(elapsed),
        }
    }
}

fn millis(d: Duration) -> u64 {
    u64::try_from(d.as_millis()).unwrap_or(u64::MAX)
}

/// Runs invocations. The dispatcher depends on this trait so tests can
/// substitute scripted results.
#[async_trait]
pub trait Executor: Send + Sync {
    /// Run `invocation` to completion or until `timeout` elapses.
    ///
    /// Must resolve in every case; "could not start" is an [`ExecResult`]
    /// too.
    async fn execute(&self, invocation: Invocation, timeout: Duration) -> ExecResult;
}

/// The real executor, backed by `tokio::process`.
#[derive(Debug, Clone)]
pub struct ProcessExecutor {
    kill_grace: Duration,
    output_limit: usize,
}

impl Default for ProcessExecutor {
    fn default() -> Self {
        Self::new()
    }
}

impl ProcessExecutor {
    pub fn new() -> Self {
        Self {
            kill_grace: DEFAULT_KILL_GRACE,
            output_limit: MAX_OUTPUT_BYTES,
        }
    }

    pub fn with_kill_grace(mut self, grace: Duration) -> Self {
        self.kill_grace = grace;
        self
    }

    pub fn with_output_limit(mut self, bytes: usize) -> Self {
        self.output_limit = bytes;
        self
    }

    fn command(invocation: &Invocation) -> Command {
        let mut cmd = Command::new(&invocation.program);
        cmd.args(&invocation.args)
            .current_dir(&invocation.cwd)
            .env_clear()
            .envs(env::child_env(&invocation.env))
            .stdin(if invocation.stdin.is_some() {
                Stdio::piped()
            } else {
                Stdio::null()
            })
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .kill_on_drop(true);
        // Own process group: signals reach the agent's children too, and a
        // terminal Ctrl-C does not bypass the interrupt handler.
        #[cfg(unix)]
        cmd.process_group(0);
        cmd
    }

    /// Wait for exit; on deadline escalate SIGTERM -> SIGKILL.
    ///
    /// Both timers are plain futures owned by this call, so they are dropped
    /// on every return path.
    async fn wait_with_deadline(
        &self,
        child: &mut Child,
        pid: u32,
        timeout: Duration,
    ) -> (std::io::Result<ExitStatus>, bool) {
        tokio::select! {
            status = child.wait() => return (status, false),
            _ = tokio::time::sleep(timeout) => {}
        }

        warn!(pid, timeout_secs = timeout.as_secs(), "process exceeded deadline, sending SIGTERM");
        active::signal_terminate(pid);
        #[cfg(not(unix))]
        let _ = child.start_kill();

        match tokio::time::timeout(self.kill_grace, child.wait()).await {
            Ok(status) => (status, true),
            Err(_) => {
                warn!(pid, grace_secs = self.kill_grace.as_secs(), "process ignored SIGTERM, sending SIGKILL");
                active::signal_kill(pid);
                let _ = child.start_kill();
                (child.wait().await, true)
            }
        }
    }
}

#[async_trait]
impl Executor for ProcessExecutor {
    async fn execute(&self, invocation: Invocation, timeout: Duration) -> ExecResult {
        let start = Instant::now();
        debug!(
            program = %invocation.program,
            args = ?invocation.args,
            cwd = %invocation.cwd.display(),
            "spawning child"
        );

        let mut child = match Self::command(&invocation).spawn() {
            Ok(child) => child,
            Err(e) => {
                warn!(program = %invocation.program, error = %e, "failed to spawn child");
                return ExecResult::spawn_failure(&invocation.program, &e, start.elapsed());
            }
        };
        // `id()` is only `None` after the child has been reaped.
        let pid = child.id().unwrap_or_default();
        let _registration = active::ActiveChild::register(pid);

        let stdin_writer = match (child.stdin.take(), invocation.stdin) {
            (Some(mut pipe), Some(payload)) => Some(tokio::spawn(async move {
                if let Err(e) = pipe.write_all(payload.as_bytes()).await {
                    debug!(error = %e, "child closed stdin before the prompt was written");
                }
                // Dropping the pipe closes it.
            })),
            _ => None,
        };
        let stdout = capture::Capture::spawn(child.stdout.take(), self.output_limit);
        let stderr = capture::Capture::spawn(child.stderr.take(), self.output_limit);

        let (status, timed_out) = self.wait_with_deadline(&mut child, pid, timeout).await;

        if let Some(writer) = stdin_writer {
            writer.abort();
        }
        let stdout = stdout.finish(PIPE_DRAIN_GRACE).await;
        let mut stderr = stderr.finish(PIPE_DRAIN_GRACE).await;

        let exit_code = match status {
            Ok(status) => exit_code_of(status),
            Err(e) => {
                warn!(pid, error = %e, "failed to wait on child");
                if !stderr.is_empty() {
                    stderr.push('\n');
                }
                stderr.push_str(&format!("failed to wait on child: {e}"));
                -1
            }
        };

        let duration_ms = millis(start.elapsed());
        debug!(pid, exit_code, timed_out, duration_ms, "child finished");
        ExecResult {
            exit_code,
            stdout,
            stderr,
            timed_out,
            duration_ms,
        }
    }
}

fn exit_code_of(status: ExitStatus) -> i32 {
    if let Some(code) = status.code() {
        return code;
    }
    #[cfg(unix)]
    {
        use std::os::unix::process::ExitStatusExt;
        if let Some(signal) = status.signal() {
            return 128 + signal;
        }
    }
    -1
}
