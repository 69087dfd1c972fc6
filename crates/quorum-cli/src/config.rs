//! Configuration file management for quorum.
//!
//! Global config lives at `~/.config/quorum/config.toml`; a project may add a
//! lower-trust `.quorum.toml` in its working directory. Resolution chain:
//! CLI flag > env var > config file > default.

use std::path::{Path, PathBuf};

use anyhow::{Context, Result};

use quorum_core::config::{ProjectConfig, QuorumConfig};

/// Env var naming an alternative global config file.
pub const CONFIG_ENV: &str = "QUORUM_CONFIG";

/// Env var overriding the runs output directory.
pub const OUTPUT_DIR_ENV: &str = "QUORUM_OUTPUT_DIR";

/// Project-level config file name, looked up in the working directory.
pub const PROJECT_FILE: &str = ".quorum.toml";

/// Where runs go when nothing else says.
pub const DEFAULT_OUTPUT_DIR: &str = "./agents/runs";

/// Written by `quorum init`.
pub const DEFAULT_CONFIG_TEMPLATE: &str = r#"# quorum configuration
#
# Precedence: CLI flags > QUORUM_* env vars > this file > built-in defaults.
# A project's .quorum.toml may tune [defaults] but can never define tools,
# raise max_parallel, or relax read_only.

[defaults]
timeout_secs = 540
max_parallel = 4
# none | bestEffort | enforced
read_only = "bestEffort"
# output_dir = "./agents/runs"
# tools = ["claude", "codex"]

[tools.claude]
# binary = "/usr/local/bin/claude"
# extra_flags = ["--model", "opus"]

[tools.codex]

[tools.gemini]

[tools.amp]
# Deep mode only provides best-effort read-only protection:
# extra_flags = ["-m", "deep"]

# A user-defined tool:
# [tools.aider]
# binary = "aider"
# prompt_mode = "argument"   # or "stdin"
# read_only = { level = "bestEffort", flags = ["--dry-run"] }
"#;

// -----------------------------------------------------------------------
// Paths
// -----------------------------------------------------------------------

/// Return the quorum config directory.
///
/// Always uses XDG layout: `$XDG_CONFIG_HOME/quorum` or `~/.config/quorum`,
/// also on macOS.
pub fn config_dir() -> PathBuf {
    if let Ok(xdg) = std::env::var("XDG_CONFIG_HOME") {
        return PathBuf::from(xdg).join("quorum");
    }
    dirs::home_dir()
        .unwrap_or_else(|| PathBuf::from("."))
        .join(".config")
        .join("quorum")
}

/// Return the default global config file path.
pub fn config_path() -> PathBuf {
    config_dir().join("config.toml")
}

/// Where adapters keep generated support files (amp settings).
pub fn support_dir() -> PathBuf {
    config_dir().join("support")
}

/// The global config file for this invocation, and whether it was named
/// explicitly (flag or env var).
pub fn config_file(cli_config: Option<&Path>) -> (PathBuf, bool) {
    if let Some(path) = cli_config {
        return (path.to_path_buf(), true);
    }
    if let Ok(path) = std::env::var(CONFIG_ENV) {
        if !path.is_empty() {
            return (PathBuf::from(path), true);
        }
    }
    (config_path(), false)
}

// -----------------------------------------------------------------------
// Read / write
// -----------------------------------------------------------------------

/// Load and validate a global config file.
pub fn load_config(path: &Path) -> Result<QuorumConfig> {
    let contents = std::fs::read_to_string(path)
        .with_context(|| format!("failed to read config file at {}", path.display()))?;
    QuorumConfig::from_toml_str(&contents)
        .with_context(|| format!("invalid config file {}", path.display()))
}

/// Write `contents` to `path`, creating parent dirs as needed.
/// Sets file permissions to 0600 on Unix.
pub fn save_config(path: &Path, contents: &str) -> Result<()> {
    if let Some(dir) = path.parent().filter(|d| !d.as_os_str().is_empty()) {
        std::fs::create_dir_all(dir)
            .with_context(|| format!("failed to create config directory {}", dir.display()))?;
    }
    std::fs::write(path, contents)
        .with_context(|| format!("failed to write config file at {}", path.display()))?;

    #[cfg(unix)]
    {
        use std::os::unix::fs::PermissionsExt;
        let perms = std::fs::Permissions::from_mode(0o600);
        std::fs::set_permissions(path, perms)
            .with_context(|| format!("failed to set permissions on {}", path.display()))?;
    }

    Ok(())
}

// -----------------------------------------------------------------------
// Resolved config
// -----------------------------------------------------------------------

/// Fully resolved configuration, ready for use.
#[derive(Debug)]
pub struct ResolvedConfig {
    pub config: QuorumConfig,
    /// Global config file in effect, if one was read.
    pub source: Option<PathBuf>,
    /// Project config file in effect, if one was read.
    pub project_source: Option<PathBuf>,
    /// Absolute runs directory.
    pub output_dir: PathBuf,
    /// Settings from the project file that were refused.
    pub warnings: Vec<String>,
}

impl ResolvedConfig {
    /// Resolve configuration using the chain: CLI flag > env var > config file > default.
    ///
    /// - Global file: `cli_config` > `QUORUM_CONFIG` > `~/.config/quorum/config.toml`.
    ///   A missing default file means the built-in tool set; a missing
    ///   explicitly named file is an error.
    /// - Project file: `<cwd>/.quorum.toml`, merged with lower trust.
    /// - Output dir: `cli_output_dir` > `QUORUM_OUTPUT_DIR` > `defaults.output_dir`
    ///   > `./agents/runs`, relative paths taken from `cwd`.
    pub fn resolve(cli_config: Option<&Path>, cli_output_dir: Option<&Path>, cwd: &Path) -> Result<Self> {
        let (path, explicit) = config_file(cli_config);
        let (global, source) = if explicit || path.exists() {
            (load_config(&path)?, Some(path))
        } else {
            tracing::debug!(path = %path.display(), "no config file, using built-in tools");
            (QuorumConfig::with_builtin_tools(), None)
        };

        let project_path = cwd.join(PROJECT_FILE);
        let (config, warnings, project_source) = if project_path.is_file() {
            let contents = std::fs::read_to_string(&project_path)
                .with_context(|| format!("failed to read {}", project_path.display()))?;
            let project = ProjectConfig::from_toml_str(&contents)
                .with_context(|| format!("invalid project config {}", project_path.display()))?;
            let (merged, warnings) = global.merge_project(&project);
            (merged, warnings, Some(project_path))
        } else {
            (global, Vec::new(), None)
        };

        let output_dir = if let Some(dir) = cli_output_dir {
            dir.to_path_buf()
        } else if let Some(dir) = std::env::var_os(OUTPUT_DIR_ENV).filter(|d| !d.is_empty()) {
            PathBuf::from(dir)
        } else if let Some(dir) = &config.defaults.output_dir {
            dir.clone()
        } else {
            PathBuf::from(DEFAULT_OUTPUT_DIR)
        };
        let output_dir = if output_dir.is_absolute() {
            output_dir
        } else {
            cwd.join(output_dir)
        };

        Ok(Self {
            config,
            source,
            project_source,
            output_dir,
            warnings,
        })
    }
}

// -----------------------------------------------------------------------
// Tests
// -----------------------------------------------------------------------
