//! Shared test utilities for quorum integration tests.
//!
//! - [`FakeExecutor`]: scripted [`Executor`] keyed by program name. Records
//!   every invocation and the peak number of concurrent calls.
//! - [`FakeUsageProbe`]: hands out a fixed sequence of usage snapshots.
//! - [`write_script`]: drop an executable shell script into a directory.

use std::collections::{HashMap, VecDeque};
use std::path::{Path, PathBuf};
use std::sync::Mutex;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::time::Duration;

use async_trait::async_trait;

use quorum_core::adapter::Invocation;
use quorum_core::cost::{UsageProbe, UsageSnapshot};
use quorum_core::executor::{ExecResult, Executor};

/// What a [`FakeExecutor`] does for one program.
#[derive(Debug, Clone)]
pub struct FakeResponse {
    result: ExecResult,
    delay: Duration,
    panic: bool,
}

impl FakeResponse {
    /// Exit 0 with `stdout`.
    pub fn ok(stdout: &str) -> Self {
        Self::exit(0, stdout, "")
    }

    pub fn exit(code: i32, stdout: &str, stderr: &str) -> Self {
        Self {
            result: ExecResult {
                exit_code: code,
                stdout: stdout.to_string(),
                stderr: stderr.to_string(),
                timed_out: false,
                duration_ms: 1,
            },
            delay: Duration::ZERO,
            panic: false,
        }
    }

    /// Killed for exceeding its deadline.
    pub fn timed_out() -> Self {
        let mut response = Self::exit(143, "", "");
        response.result.timed_out = true;
        response
    }

    /// Panic inside `execute`.
    pub fn panics() -> Self {
        Self {
            panic: true,
            ..Self::ok("")
        }
    }

    pub fn with_delay(mut self, delay: Duration) -> Self {
        self.delay = delay;
        self
    }
}

/// Scripted executor. Programs without a scripted response exit 0 with
/// `OK`.
#[derive(Debug, Default)]
pub struct FakeExecutor {
    responses: Mutex<HashMap<String, FakeResponse>>,
    calls: Mutex<Vec<Invocation>>,
    in_flight: AtomicUsize,
    peak: AtomicUsize,
}

impl FakeExecutor {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn on(self, program: &str, response: FakeResponse) -> Self {
        self.responses
            .lock()
            .unwrap()
            .insert(program.to_string(), response);
        self
    }

    /// Every invocation received, in call order.
    pub fn invocations(&self) -> Vec<Invocation> {
        self.calls.lock().unwrap().clone()
    }

    pub fn invocations_of(&self, program: &str) -> Vec<Invocation> {
        self.invocations()
            .into_iter()
            .filter(|inv| inv.program == program)
            .collect()
    }

    /// Highest number of `execute` calls observed running at once.
    pub fn max_concurrency(&self) -> usize {
        self.peak.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl Executor for FakeExecutor {
    async fn execute(&self, invocation: Invocation, _timeout: Duration) -> ExecResult {
        let response = self
            .responses
            .lock()
            .unwrap()
            .get(&invocation.program)
            .cloned()
            .unwrap_or_else(|| FakeResponse::ok("OK"));
        self.calls.lock().unwrap().push(invocation);

        let now = self.in_flight.fetch_add(1, Ordering::SeqCst) + 1;
        self.peak.fetch_max(now, Ordering::SeqCst);
        if !response.delay.is_zero() {
            tokio::time::sleep(response.delay).await;
        }
        self.in_flight.fetch_sub(1, Ordering::SeqCst);

        if response.panic {
            panic!("scripted executor panic");
        }
        response.result
    }
}

/// Returns scripted snapshots in order, then `None`.
#[derive(Debug, Default)]
pub struct FakeUsageProbe {
    snapshots: Mutex<VecDeque<Option<UsageSnapshot>>>,
    calls: AtomicUsize,
}

impl FakeUsageProbe {
    pub fn new(snapshots: Vec<Option<UsageSnapshot>>) -> Self {
        Self {
            snapshots: Mutex::new(snapshots.into()),
            calls: AtomicUsize::new(0),
        }
    }

    /// Before/after pair.
    pub fn pair(before: UsageSnapshot, after: UsageSnapshot) -> Self {
        Self::new(vec![Some(before), Some(after)])
    }

    pub fn calls(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl UsageProbe for FakeUsageProbe {
    async fn snapshot(&self, _binary: &str) -> Option<UsageSnapshot> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        self.snapshots.lock().unwrap().pop_front().flatten()
    }
}

/// Convenience constructor for a snapshot.
pub fn snapshot(free_remaining: f64, free_total: f64, credits_remaining: f64) -> UsageSnapshot {
    UsageSnapshot {
        free_remaining,
        free_total,
        credits_remaining,
    }
}

/// Write `body` as an executable `/bin/sh` script named `name` in `dir`.
pub fn write_script(dir: &Path, name: &str, body: &str) -> PathBuf {
    let path = dir.join(name);
    std::fs::write(&path, format!("#!/bin/sh\n{body}\n")).expect("failed to write script");
    #[cfg(unix)]
    {
        use std::os::unix::fs::PermissionsExt;
        std::fs::set_permissions(&path, std::fs::Permissions::from_mode(0o755))
            .expect("failed to chmod script");
    }
    path
}
