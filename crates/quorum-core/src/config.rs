//! Tool configuration model and the trust-aware project merge.
//!
//! The global config file (user-owned) defines tools: binaries, flags and
//! read-only descriptors. A project config file (checked into a repository
//! somebody else may control) is lower trust: it may tune defaults and narrow
//! the tool selection, but it may never define tools or relax the read-only
//! policy.

use std::collections::BTreeMap;
use std::path::{Component, Path, PathBuf};

use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::policy::ReadOnlyLevel;

/// Errors raised while parsing or validating configuration.
#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("TOML parse error: {0}")]
    Toml(#[from] toml::de::Error),

    #[error("tool {tool:?}: {reason}")]
    InvalidTool { tool: String, reason: String },

    #[error("defaults.max_parallel must be at least 1")]
    ZeroParallelism,
}

/// Built-in adapter families plus the configuration-driven `custom` family.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum AdapterKind {
    Claude,
    Codex,
    Gemini,
    Amp,
    Custom,
}

impl AdapterKind {
    pub const BUILT_IN: [AdapterKind; 4] = [Self::Claude, Self::Codex, Self::Gemini, Self::Amp];

    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Claude => "claude",
            Self::Codex => "codex",
            Self::Gemini => "gemini",
            Self::Amp => "amp",
            Self::Custom => "custom",
        }
    }

    /// Parse a family name. Returns `None` for anything unrecognised.
    pub fn from_name(name: &str) -> Option<Self> {
        match name {
            "claude" => Some(Self::Claude),
            "codex" => Some(Self::Codex),
            "gemini" => Some(Self::Gemini),
            "amp" => Some(Self::Amp),
            "custom" => Some(Self::Custom),
            _ => None,
        }
    }
}

impl std::fmt::Display for AdapterKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// How the prompt reaches the tool.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum PromptDelivery {
    /// Final positional argument: an instruction to read the prompt file.
    #[default]
    Argument,
    /// The full prompt text written to the child's stdin.
    Stdin,
}

/// Read-only capability declared for a tool in configuration.
#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct ReadOnlyDescriptor {
    pub level: ReadOnlyLevel,
    /// Flags that request read-only behaviour. Only consulted by `custom`
    /// tools; built-in families carry their own fixed flag sets.
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub flags: Vec<String>,
}

/// Per-tool configuration, keyed by tool id in [`QuorumConfig::tools`].
#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct ToolConfig {
    /// Resolved binary path or bare command name. Built-in families fall back
    /// to their default command name when unset.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub binary: Option<String>,
    /// Adapter family for aliased ids (e.g. `claude-opus` -> `claude`).
    #[serde(skip_serializing_if = "Option::is_none")]
    pub adapter: Option<AdapterKind>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub read_only: Option<ReadOnlyDescriptor>,
    /// Flags placed before the prompt payload (model selection, effort...).
    #[serde(skip_serializing_if = "Vec::is_empty")]
    pub extra_flags: Vec<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub timeout_secs: Option<u64>,
    /// Prompt delivery for `custom` tools.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub prompt_mode: Option<PromptDelivery>,
}

/// Settings shared by every tool in a run.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct Defaults {
    pub timeout_secs: u64,
    pub max_parallel: usize,
    pub read_only: ReadOnlyLevel,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub output_dir: Option<PathBuf>,
    /// Tools used when a run does not name any. `None` means every
    /// configured tool.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub tools: Option<Vec<String>>,
}

impl Defaults {
    pub const DEFAULT_TIMEOUT_SECS: u64 = 540;
    pub const DEFAULT_MAX_PARALLEL: usize = 4;
}

impl Default for Defaults {
    fn default() -> Self {
        Self {
            timeout_secs: Self::DEFAULT_TIMEOUT_SECS,
            max_parallel: Self::DEFAULT_MAX_PARALLEL,
            read_only: ReadOnlyLevel::BestEffort,
            output_dir: None,
            tools: None,
        }
    }
}

/// The fully merged configuration consumed by the dispatcher.
#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct QuorumConfig {
    pub defaults: Defaults,
    pub tools: BTreeMap<String, ToolConfig>,
}

impl QuorumConfig {
    /// Parse and validate a global config file.
    pub fn from_toml_str(input: &str) -> Result<Self, ConfigError> {
        let config: Self = toml::from_str(input)?;
        config.validate()?;
        Ok(config)
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.defaults.max_parallel == 0 {
            return Err(ConfigError::ZeroParallelism);
        }
        for (id, tool) in &self.tools {
            if id.trim().is_empty() {
                return Err(ConfigError::InvalidTool {
                    tool: id.clone(),
                    reason: "tool id must not be empty".to_string(),
                });
            }
            if tool.timeout_secs == Some(0) {
                return Err(ConfigError::InvalidTool {
                    tool: id.clone(),
                    reason: "timeout_secs must be at least 1".to_string(),
                });
            }
        }
        Ok(())
    }

    pub fn tool(&self, id: &str) -> Option<&ToolConfig> {
        self.tools.get(id)
    }

    /// Timeout for one tool: its own override, else the shared default.
    pub fn timeout_for(&self, id: &str) -> u64 {
        self.tools
            .get(id)
            .and_then(|t| t.timeout_secs)
            .unwrap_or(self.defaults.timeout_secs)
    }

    /// Tool ids a run uses when the caller names none.
    pub fn default_tool_ids(&self) -> Vec<String> {
        match &self.defaults.tools {
            Some(ids) => ids.clone(),
            None => self.tools.keys().cloned().collect(),
        }
    }

    /// Default settings with one entry per built-in family, each using the
    /// family's default command name.
    pub fn with_builtin_tools() -> Self {
        let tools = AdapterKind::BUILT_IN
            .iter()
            .map(|kind| (kind.as_str().to_string(), ToolConfig::default()))
            .collect();
        Self {
            defaults: Defaults::default(),
            tools,
        }
    }

    /// Apply a lower-trust project config on top of this one.
    ///
    /// Returns the merged config and one warning per ignored setting.
    pub fn merge_project(&self, project: &ProjectConfig) -> (QuorumConfig, Vec<String>) {
        let mut merged = self.clone();
        let mut warnings = Vec::new();

        for id in project.tools.keys() {
            warnings.push(format!(
                "ignoring project definition of tool {id:?}: tools may only be defined in the global config"
            ));
        }

        let pd = &project.defaults;
        if let Some(secs) = pd.timeout_secs {
            if secs == 0 {
                warnings.push("ignoring project defaults.timeout_secs = 0".to_string());
            } else {
                merged.defaults.timeout_secs = secs;
            }
        }
        if let Some(n) = pd.max_parallel {
            if n == 0 || n > merged.defaults.max_parallel {
                warnings.push(format!(
                    "ignoring project defaults.max_parallel = {n}: may only lower the global value ({})",
                    merged.defaults.max_parallel
                ));
            } else {
                merged.defaults.max_parallel = n;
            }
        }
        if let Some(level) = pd.read_only {
            if level < merged.defaults.read_only {
                warnings.push(format!(
                    "ignoring project defaults.read_only = {level}: may not relax the global policy ({})",
                    merged.defaults.read_only
                ));
            } else {
                merged.defaults.read_only = level;
            }
        }
        if let Some(dir) = &pd.output_dir {
            if stays_below(dir) {
                merged.defaults.output_dir = Some(dir.clone());
            } else {
                warnings.push(format!(
                    "ignoring project defaults.output_dir = {}: must be a relative path inside the project",
                    dir.display()
                ));
            }
        }
        if let Some(ids) = &pd.tools {
            let allowed = merged.default_tool_ids();
            let mut narrowed = Vec::new();
            for id in ids {
                if allowed.contains(id) {
                    narrowed.push(id.clone());
                } else {
                    warnings.push(format!(
                        "ignoring project selection of tool {id:?}: not enabled in the global config"
                    ));
                }
            }
            merged.defaults.tools = Some(narrowed);
        }

        (merged, warnings)
    }
}

/// Defaults a project file may propose. Every field is optional.
#[derive(Debug, Clone, PartialEq, Eq, Default, Deserialize)]
#[serde(default)]
pub struct ProjectDefaults {
    pub timeout_secs: Option<u64>,
    pub max_parallel: Option<usize>,
    pub read_only: Option<ReadOnlyLevel>,
    pub output_dir: Option<PathBuf>,
    pub tools: Option<Vec<String>>,
}

/// True when `path` is relative and never climbs above its starting point.
fn stays_below(path: &Path) -> bool {
    path.components()
        .all(|c| matches!(c, Component::Normal(_) | Component::CurDir))
}

/// A project-level config file (`.quorum.toml`).
#[derive(Debug, Clone, Default, Deserialize)]
#[serde(default)]
pub struct ProjectConfig {
    pub defaults: ProjectDefaults,
    /// Parsed only so that it can be reported and ignored.
    pub tools: BTreeMap<String, toml::Value>,
}

impl ProjectConfig {
    pub fn from_toml_str(input: &str) -> Result<Self, ConfigError> {
        Ok(toml::from_str(input)?)
    }
}
