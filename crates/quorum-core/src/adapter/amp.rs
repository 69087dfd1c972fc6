//! Sourcegraph Amp adapter.
//!
//! Amp runs in execute mode (`amp -x`) and reads the whole prompt from stdin.
//! Read-only mode points it at a settings file that rejects every tool except
//! reading and searching.
//!
//! Deep mode (`-m deep`) reads files through a mechanism that is also able to
//! write, so no settings file fully sandboxes it. In that mode the adapter
//! switches to a stricter settings file, adds a mandatory safety sentence to
//! the prompt, and reports its guarantee as `bestEffort`.

use std::path::{Path, PathBuf};

use anyhow::{Context, Result};

use super::begin;
use super::types::{Invocation, RunRequest};
use crate::policy::{ReadOnlyLevel, attaches_read_only_flags};

const READONLY_SETTINGS_NAME: &str = "amp-readonly-settings.json";
const DEEP_SETTINGS_NAME: &str = "amp-deep-settings.json";

static READONLY_SETTINGS: &str = include_str!("amp-readonly-settings.json");
static DEEP_SETTINGS: &str = include_str!("amp-deep-settings.json");

const ORACLE_SUFFIX: &str = "Use the oracle tool to provide deeper reasoning and analysis on the most complex or critical aspects of this review.";
const DEEP_SAFETY_SENTENCE: &str =
    "MANDATORY: Do not change any files. You are in read-only mode.";

#[derive(Debug, Clone)]
pub struct AmpAdapter {
    /// Directory the settings files are written to before execution.
    settings_dir: PathBuf,
}

impl AmpAdapter {
    pub const DEFAULT_BINARY: &str = "amp";
    pub const CEILING: ReadOnlyLevel = ReadOnlyLevel::Enforced;

    pub fn new(settings_dir: impl Into<PathBuf>) -> Self {
        Self {
            settings_dir: settings_dir.into(),
        }
    }

    pub fn settings_dir(&self) -> &Path {
        &self.settings_dir
    }

    /// Deep mode is `deep` immediately preceded by `-m` or `--mode`.
    pub fn is_deep_mode(flags: &[String]) -> bool {
        flags
            .windows(2)
            .any(|w| (w[0] == "-m" || w[0] == "--mode") && w[1] == "deep")
    }

    pub fn level_for_flags(&self, extra_flags: &[String]) -> ReadOnlyLevel {
        if Self::is_deep_mode(extra_flags) {
            ReadOnlyLevel::BestEffort
        } else {
            Self::CEILING
        }
    }

    pub fn read_only_flags(&self, deep: bool) -> Vec<String> {
        let name = if deep { DEEP_SETTINGS_NAME } else { READONLY_SETTINGS_NAME };
        vec![
            "--settings-file".to_string(),
            self.settings_dir.join(name).to_string_lossy().into_owned(),
        ]
    }

    pub fn build_invocation(&self, req: &RunRequest) -> Invocation {
        let deep = Self::is_deep_mode(&req.extra_flags);
        let protect = attaches_read_only_flags(req.read_only_policy);

        let mut inv = begin(req, Self::DEFAULT_BINARY, &["-x"]);
        if protect {
            inv.args.extend(self.read_only_flags(deep));
        }

        let mut payload = req.prompt.trim_end().to_string();
        payload.push_str("\n\n");
        payload.push_str(ORACLE_SUFFIX);
        if deep && protect {
            payload.push_str("\n\n");
            payload.push_str(DEEP_SAFETY_SENTENCE);
        }
        payload.push('\n');
        inv.stdin = Some(payload);
        inv
    }

    /// Write the embedded settings files, skipping files already current.
    pub async fn write_settings_files(&self) -> Result<()> {
        tokio::fs::create_dir_all(&self.settings_dir)
            .await
            .with_context(|| {
                format!(
                    "failed to create amp settings directory {}",
                    self.settings_dir.display()
                )
            })?;
        for (name, contents) in [
            (READONLY_SETTINGS_NAME, READONLY_SETTINGS),
            (DEEP_SETTINGS_NAME, DEEP_SETTINGS),
        ] {
            let path = self.settings_dir.join(name);
            if let Ok(existing) = tokio::fs::read_to_string(&path).await {
                if existing == contents {
                    continue;
                }
            }
            tokio::fs::write(&path, contents)
                .await
                .with_context(|| format!("failed to write {}", path.display()))?;
        }
        Ok(())
    }
}
