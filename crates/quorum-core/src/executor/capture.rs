//! Bounded output capture and terminal-escape stripping.

use std::sync::{Arc, LazyLock, Mutex};
use std::time::Duration;

use regex::Regex;
use tokio::io::{AsyncRead, AsyncReadExt};
use tokio::task::JoinHandle;
use tracing::debug;

/// Appended once a stream hits its byte ceiling.
pub const TRUNCATION_MARKER: &str = "\n[output truncated: byte limit reached]";

/// CSI, OSC, DCS/SOS/PM/APC strings and two-byte escapes.
static ANSI_ESCAPE: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(
        r"\x1b\[[0-?]*[ -/]*[@-~]|\x1b\][^\x07\x1b]*(?:\x07|\x1b\\)|\x1b[PX^_][^\x1b]*\x1b\\|\x1b[@-Z\\-_]",
    )
    .expect("ANSI escape pattern is valid")
});

/// Remove terminal control sequences from captured text.
pub fn strip_ansi(text: &str) -> String {
    ANSI_ESCAPE.replace_all(text, "").into_owned()
}

#[derive(Default)]
struct Captured {
    bytes: Vec<u8>,
    truncated: bool,
}

/// A pipe being drained in the background into a size-capped buffer.
pub(crate) struct Capture {
    buf: Arc<Mutex<Captured>>,
    task: Option<JoinHandle<()>>,
}

impl Capture {
    /// Start draining `pipe`. Bytes past `limit` are read and discarded so a
    /// chatty child never blocks on a full pipe.
    pub(crate) fn spawn<R>(pipe: Option<R>, limit: usize) -> Self
    where
        R: AsyncRead + Unpin + Send + 'static,
    {
        let buf = Arc::new(Mutex::new(Captured::default()));
        let task = pipe.map(|mut pipe| {
            let buf = Arc::clone(&buf);
            tokio::spawn(async move {
                let mut chunk = [0u8; 8192];
                loop {
                    let n = match pipe.read(&mut chunk).await {
                        Ok(0) => break,
                        Ok(n) => n,
                        Err(e) => {
                            debug!(error = %e, "error reading child pipe");
                            break;
                        }
                    };
                    let mut captured = buf.lock().unwrap_or_else(|e| e.into_inner());
                    let room = limit.saturating_sub(captured.bytes.len());
                    if n > room {
                        captured.truncated = true;
                    }
                    let take = n.min(room);
                    captured.bytes.extend_from_slice(&chunk[..take]);
                }
            })
        });
        Self { buf, task }
    }

    /// Wait up to `grace` for the pipe to reach EOF, then return the text.
    ///
    /// A pipe can stay open after the child exits if a grandchild inherited
    /// it; in that case whatever was captured so far is returned.
    pub(crate) async fn finish(mut self, grace: Duration) -> String {
        if let Some(mut task) = self.task.take() {
            if tokio::time::timeout(grace, &mut task).await.is_err() {
                debug!("child pipe still open after exit, keeping partial output");
                task.abort();
            }
        }
        let mut captured = self.buf.lock().unwrap_or_else(|e| e.into_inner());
        let bytes = std::mem::take(&mut captured.bytes);
        render(bytes, captured.truncated)
    }
}

fn render(mut bytes: Vec<u8>, truncated: bool) -> String {
    if truncated {
        // Drop a multi-byte character split by the cut.
        if let Err(e) = std::str::from_utf8(&bytes) {
            if e.error_len().is_none() {
                bytes.truncate(e.valid_up_to());
            }
        }
    }
    let mut text = strip_ansi(&String::from_utf8_lossy(&bytes));
    if truncated {
        text.push_str(TRUNCATION_MARKER);
    }
    text
}
