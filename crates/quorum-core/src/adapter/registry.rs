//! Adapter registry -- resolves tool ids to adapter families.
//!
//! A tool id may name a family directly (`codex`), alias one through its
//! config (`adapter = "claude"` on `claude-opus`), or carry the family as a
//! prefix (`gemini-pro`). Anything else is a configuration-driven custom
//! tool.

use std::path::{Path, PathBuf};

use super::{Adapter, AmpAdapter, ClaudeAdapter, CodexAdapter, CustomAdapter, GeminiAdapter};
use crate::config::{AdapterKind, ToolConfig};

/// Builds [`Adapter`] values for configured tools.
///
/// # Example
///
/// ```ignore
/// let registry = AdapterRegistry::new(support_dir);
/// let adapter = registry.resolve("claude-opus", &tool_config);
/// let invocation = adapter.build_invocation(&request)?;
/// ```
#[derive(Debug, Clone)]
pub struct AdapterRegistry {
    /// Where adapters materialise support files (amp settings).
    support_dir: PathBuf,
}

impl AdapterRegistry {
    pub fn new(support_dir: impl Into<PathBuf>) -> Self {
        Self {
            support_dir: support_dir.into(),
        }
    }

    pub fn support_dir(&self) -> &Path {
        &self.support_dir
    }

    /// Decide which family a tool id uses.
    pub fn kind_for(&self, tool_id: &str, tool: &ToolConfig) -> AdapterKind {
        if let Some(kind) = tool.adapter {
            return kind;
        }
        if let Some(kind) = AdapterKind::from_name(tool_id) {
            return kind;
        }
        let prefix = tool_id.split(['-', '.']).next().unwrap_or_default();
        match AdapterKind::from_name(prefix) {
            Some(kind) if kind != AdapterKind::Custom => kind,
            _ => AdapterKind::Custom,
        }
    }

    pub fn resolve(&self, tool_id: &str, tool: &ToolConfig) -> Adapter {
        match self.kind_for(tool_id, tool) {
            AdapterKind::Claude => Adapter::Claude(ClaudeAdapter),
            AdapterKind::Codex => Adapter::Codex(CodexAdapter),
            AdapterKind::Gemini => Adapter::Gemini(GeminiAdapter),
            AdapterKind::Amp => Adapter::Amp(AmpAdapter::new(self.support_dir.join("amp"))),
            AdapterKind::Custom => Adapter::Custom(CustomAdapter::from_config(tool)),
        }
    }

    /// Names of the built-in families.
    pub fn built_in(&self) -> Vec<&'static str> {
        AdapterKind::BUILT_IN.iter().map(|k| k.as_str()).collect()
    }
}
