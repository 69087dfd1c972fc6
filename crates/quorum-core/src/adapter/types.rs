use std::collections::BTreeMap;
use std::path::PathBuf;
use std::time::Duration;

use serde::Serialize;

use crate::dispatch::report::ToolStatus;
use crate::policy::ReadOnlyLevel;

/// Everything an adapter needs to turn one dispatch target into a process.
///
/// Built fresh by the dispatcher per tool per run and never mutated after.
/// Use [`RunRequest::new`] for the required fields, then chain the optional
/// setters.
#[derive(Debug, Clone)]
pub struct RunRequest {
    /// Logical tool id (also the base of output filenames, after sanitising).
    pub tool_id: String,
    /// The full prompt text.
    pub prompt: String,
    /// The same prompt persisted on disk, for "read this file" delivery.
    pub prompt_file: PathBuf,
    pub output_dir: PathBuf,
    pub read_only_policy: ReadOnlyLevel,
    pub timeout: Duration,
    pub cwd: PathBuf,
    /// Resolved binary. `None` falls back to the adapter's command name.
    pub binary: Option<String>,
    /// Configured flags, positioned before the prompt payload verbatim.
    pub extra_flags: Vec<String>,
}

impl RunRequest {
    /// Create a request with the required fields.
    ///
    /// Optional fields default to:
    /// - `read_only_policy`: `BestEffort`
    /// - `timeout`: 540s
    /// - `cwd`: the output directory
    /// - `binary`: `None`
    /// - `extra_flags`: empty
    pub fn new(
        tool_id: impl Into<String>,
        prompt: impl Into<String>,
        prompt_file: impl Into<PathBuf>,
        output_dir: impl Into<PathBuf>,
    ) -> Self {
        let output_dir = output_dir.into();
        Self {
            tool_id: tool_id.into(),
            prompt: prompt.into(),
            prompt_file: prompt_file.into(),
            cwd: output_dir.clone(),
            output_dir,
            read_only_policy: ReadOnlyLevel::BestEffort,
            timeout: Duration::from_secs(crate::config::Defaults::DEFAULT_TIMEOUT_SECS),
            binary: None,
            extra_flags: Vec::new(),
        }
    }

    pub fn read_only_policy(mut self, level: ReadOnlyLevel) -> Self {
        self.read_only_policy = level;
        self
    }

    pub fn timeout(mut self, timeout: Duration) -> Self {
        self.timeout = timeout;
        self
    }

    pub fn cwd(mut self, cwd: impl Into<PathBuf>) -> Self {
        self.cwd = cwd.into();
        self
    }

    pub fn binary(mut self, binary: impl Into<String>) -> Self {
        self.binary = Some(binary.into());
        self
    }

    pub fn extra_flags(mut self, flags: Vec<String>) -> Self {
        self.extra_flags = flags;
        self
    }
}

/// A concrete process invocation, consumed exactly once by an executor.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct Invocation {
    pub program: String,
    pub args: Vec<String>,
    /// Variables layered over the executor's allowlisted environment.
    #[serde(skip_serializing_if = "BTreeMap::is_empty")]
    pub env: BTreeMap<String, String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub stdin: Option<String>,
    pub cwd: PathBuf,
}

impl Invocation {
    pub fn new(program: impl Into<String>, cwd: impl Into<PathBuf>) -> Self {
        Self {
            program: program.into(),
            args: Vec::new(),
            env: BTreeMap::new(),
            stdin: None,
            cwd: cwd.into(),
        }
    }

    /// Human-readable command line for dry runs and logs. Not shell input.
    pub fn display_command(&self) -> String {
        let mut parts = Vec::with_capacity(self.args.len() + 1);
        parts.push(quote_for_display(&self.program));
        parts.extend(self.args.iter().map(|a| quote_for_display(a)));
        parts.join(" ")
    }
}

fn quote_for_display(s: &str) -> String {
    let plain = !s.is_empty()
        && s.chars()
            .all(|c| c.is_ascii_alphanumeric() || "-_./=:,@+%".contains(c));
    if plain {
        s.to_string()
    } else {
        format!("'{}'", s.replace('\'', r"'\''"))
    }
}

/// Report fields an adapter derives from a finished process.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ParsedResult {
    pub status: ToolStatus,
    pub word_count: usize,
}
