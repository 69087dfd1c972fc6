//! Process-wide registry of running children.
//!
//! Every spawned child is registered for exactly as long as the executor
//! owns it; the [`ActiveChild`] guard removes it on every exit path. The
//! only operation exposed outside this module is [`terminate_all`], used by
//! the top-level interrupt handler.
//!
//! Children run in their own process group, so signals are delivered to the
//! whole group (the agent and anything it spawned).

use std::collections::HashSet;
use std::sync::{LazyLock, Mutex};
use std::time::Duration;

use tracing::{debug, info, warn};

static ACTIVE: LazyLock<Mutex<HashSet<u32>>> = LazyLock::new(|| Mutex::new(HashSet::new()));

fn active() -> std::sync::MutexGuard<'static, HashSet<u32>> {
    ACTIVE.lock().unwrap_or_else(|e| e.into_inner())
}

/// Registration guard for one running child.
#[derive(Debug)]
pub(crate) struct ActiveChild {
    pid: u32,
}

impl ActiveChild {
    pub(crate) fn register(pid: u32) -> Self {
        active().insert(pid);
        Self { pid }
    }
}

impl Drop for ActiveChild {
    fn drop(&mut self) {
        active().remove(&self.pid);
    }
}

/// Ask a child's process group to exit (SIGTERM).
pub(crate) fn signal_terminate(pid: u32) {
    #[cfg(unix)]
    send_group_signal(pid, libc::SIGTERM);
    #[cfg(not(unix))]
    let _ = pid;
}

/// Force a child's process group to exit (SIGKILL).
pub(crate) fn signal_kill(pid: u32) {
    #[cfg(unix)]
    send_group_signal(pid, libc::SIGKILL);
    #[cfg(not(unix))]
    let _ = pid;
}

#[cfg(unix)]
fn send_group_signal(pid: u32, signal: libc::c_int) {
    // kill(0, ..) would signal our own process group.
    let pgid = match i32::try_from(pid) {
        Ok(pgid) if pgid > 0 => pgid,
        _ => return,
    };
    // SAFETY: kill(2) has no memory-safety preconditions; a negative pid
    // addresses the process group created for this child at spawn.
    let ret = unsafe { libc::kill(-pgid, signal) };
    if ret != 0 {
        debug!(pid, signal, "group signal not delivered (already exited?)");
    }
}

/// Terminate every registered child: SIGTERM now, SIGKILL for whatever is
/// still registered after `grace`.
///
/// Returns the number of children that were running when called.
pub async fn terminate_all(grace: Duration) -> usize {
    let pids: Vec<u32> = active().iter().copied().collect();
    if pids.is_empty() {
        return 0;
    }
    info!(count = pids.len(), "terminating active child processes");
    for pid in &pids {
        signal_terminate(*pid);
    }

    let deadline = tokio::time::Instant::now() + grace;
    while tokio::time::Instant::now() < deadline {
        let drained = active().is_empty();
        if drained {
            return pids.len();
        }
        tokio::time::sleep(Duration::from_millis(50)).await;
    }

    let remaining: Vec<u32> = active().iter().copied().collect();
    for pid in &remaining {
        warn!(pid, "child ignored SIGTERM during shutdown, sending SIGKILL");
        signal_kill(*pid);
    }
    pids.len()
}
