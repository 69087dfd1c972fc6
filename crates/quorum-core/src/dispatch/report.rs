//! Per-tool results and progress notifications.

use std::fmt;
use std::path::PathBuf;

use serde::{Deserialize, Serialize};

use crate::cost::CostInfo;

/// Maximum characters of error text kept on a report.
pub const ERROR_EXCERPT_CHARS: usize = 500;

/// Terminal state of one tool in one run.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ToolStatus {
    Success,
    Error,
    Timeout,
    /// Never started: the run was cancelled while the tool was queued.
    Skipped,
}

impl ToolStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Success => "success",
            Self::Error => "error",
            Self::Timeout => "timeout",
            Self::Skipped => "skipped",
        }
    }
}

impl fmt::Display for ToolStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// The permanent record of one tool's attempt.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ToolReport {
    pub tool_id: String,
    pub status: ToolStatus,
    pub exit_code: Option<i32>,
    pub duration_ms: u64,
    pub word_count: usize,
    pub output_file: Option<PathBuf>,
    pub stderr_file: Option<PathBuf>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub stats_file: Option<PathBuf>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub cost: Option<CostInfo>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

impl ToolReport {
    /// A report for a tool whose task failed before producing a result.
    pub fn failed(tool_id: impl Into<String>, error: impl fmt::Display) -> Self {
        Self {
            tool_id: tool_id.into(),
            status: ToolStatus::Error,
            exit_code: None,
            duration_ms: 0,
            word_count: 0,
            output_file: None,
            stderr_file: None,
            stats_file: None,
            cost: None,
            error: Some(excerpt(&error.to_string())),
        }
    }

    /// A report for a tool that never ran.
    pub fn skipped(tool_id: impl Into<String>, reason: &str) -> Self {
        Self {
            status: ToolStatus::Skipped,
            ..Self::failed(tool_id, reason)
        }
    }

    pub fn is_success(&self) -> bool {
        self.status == ToolStatus::Success
    }
}

/// First [`ERROR_EXCERPT_CHARS`] characters of `text`, trimmed.
pub fn excerpt(text: &str) -> String {
    let trimmed = text.trim();
    match trimmed.char_indices().nth(ERROR_EXCERPT_CHARS) {
        Some((cut, _)) => trimmed[..cut].to_string(),
        None => trimmed.to_string(),
    }
}

/// Emitted to the dispatch observer. For any one tool, `Started` always
/// precedes `Completed`; nothing is promised across tools.
///
/// A tool cancelled while still queued for a slot gets a lone `Completed`
/// carrying a [`ToolStatus::Skipped`] report, with no `Started` before it.
#[derive(Debug, Clone)]
pub enum ProgressEvent {
    Started { tool_id: String },
    Completed { tool_id: String, report: ToolReport },
}

impl ProgressEvent {
    pub fn tool_id(&self) -> &str {
        match self {
            Self::Started { tool_id } | Self::Completed { tool_id, .. } => tool_id,
        }
    }
}
