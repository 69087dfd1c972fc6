//! Output files for one tool inside the shared run directory.

use std::path::{Path, PathBuf};

use anyhow::{Context, Result};

use crate::cost::CostInfo;
use crate::executor::ExecResult;

/// Stems the run directory already uses for `prompt.md` and `run.json`.
pub const RESERVED_STEMS: &[&str] = &["prompt", "run"];

/// Map a tool id to a filename stem.
///
/// Every character outside `[A-Za-z0-9_-]` becomes `_`, so ids from a
/// project config can never address a path outside the run directory.
pub fn sanitize_tool_id(tool_id: &str) -> String {
    let safe: String = tool_id
        .chars()
        .map(|c| {
            if c.is_ascii_alphanumeric() || c == '_' || c == '-' {
                c
            } else {
                '_'
            }
        })
        .collect();
    if safe.is_empty() { "_".to_string() } else { safe }
}

/// Paths written for one tool.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct OutputFiles {
    pub output: PathBuf,
    pub stderr: PathBuf,
    pub stats: Option<PathBuf>,
}

/// Write stdout, stderr and (when known) cost for one tool.
pub async fn write_outputs(
    output_dir: &Path,
    tool_id: &str,
    result: &ExecResult,
    cost: Option<&CostInfo>,
) -> Result<OutputFiles> {
    let stem = sanitize_tool_id(tool_id);
    let output = output_dir.join(format!("{stem}.md"));
    let stderr = output_dir.join(format!("{stem}.stderr"));

    tokio::fs::write(&output, &result.stdout)
        .await
        .with_context(|| format!("failed to write {}", output.display()))?;
    tokio::fs::write(&stderr, &result.stderr)
        .await
        .with_context(|| format!("failed to write {}", stderr.display()))?;

    let stats = match cost {
        Some(cost) => {
            let path = output_dir.join(format!("{stem}.stats.json"));
            let json = serde_json::to_string_pretty(cost).context("failed to serialize cost")?;
            tokio::fs::write(&path, json)
                .await
                .with_context(|| format!("failed to write {}", path.display()))?;
            Some(path)
        }
        None => None,
    };

    Ok(OutputFiles {
        output,
        stderr,
        stats,
    })
}
