//! `quorum tools` command: show the configured panel.

use std::path::Path;

use anyhow::{Context, Result};

use quorum_core::adapter::{Adapter, AdapterRegistry};
use quorum_core::config::{QuorumConfig, ToolConfig};
use quorum_core::policy::ReadOnlyLevel;

use crate::config::{self, ResolvedConfig};

/// One row of the listing.
#[derive(Debug, PartialEq, Eq)]
struct ToolRow {
    id: String,
    family: String,
    binary: String,
    read_only: ReadOnlyLevel,
    timeout_secs: u64,
    default: bool,
}

fn rows(config: &QuorumConfig, registry: &AdapterRegistry) -> Vec<ToolRow> {
    let defaults = config.default_tool_ids();
    config
        .tools
        .iter()
        .map(|(id, tool)| {
            let adapter = registry.resolve(id, tool);
            ToolRow {
                id: id.clone(),
                family: adapter.kind().to_string(),
                binary: binary_label(&adapter, tool),
                read_only: adapter.effective_read_only_level(tool),
                timeout_secs: config.timeout_for(id),
                default: defaults.contains(id),
            }
        })
        .collect()
}

fn binary_label(adapter: &Adapter, tool: &ToolConfig) -> String {
    match (&tool.binary, adapter.default_binary()) {
        (Some(binary), _) => binary.clone(),
        (None, Some(default)) => default.to_string(),
        (None, None) => "(missing)".to_string(),
    }
}

/// Run the tools command.
pub fn run_tools(cli_config: Option<&Path>) -> Result<()> {
    let cwd = std::env::current_dir().context("failed to determine working directory")?;
    let resolved = ResolvedConfig::resolve(cli_config, None, &cwd)?;
    for warning in &resolved.warnings {
        println!("warning: {warning}");
    }
    match &resolved.source {
        Some(path) => println!("Config: {}", path.display()),
        None => println!("Config: built-in defaults (run `quorum init` to customise)"),
    }
    if let Some(path) = &resolved.project_source {
        println!("Project config: {}", path.display());
    }

    let registry = AdapterRegistry::new(config::support_dir());
    let rows = rows(&resolved.config, &registry);
    if rows.is_empty() {
        println!("No tools configured.");
        return Ok(());
    }

    println!();
    println!(
        "{:<20} {:<8} {:<11} {:>8}  BINARY",
        "TOOL", "FAMILY", "READ-ONLY", "TIMEOUT"
    );
    for row in &rows {
        let marker = if row.default { "" } else { " (not in default set)" };
        println!(
            "{:<20} {:<8} {:<11} {:>7}s  {}{marker}",
            row.id, row.family, row.read_only, row.timeout_secs, row.binary
        );
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn rows_show_family_binary_and_effective_level() {
        let config = QuorumConfig::from_toml_str(
            r#"
[defaults]
tools = ["claude"]

[tools.claude]

[tools.amp-deep]
extra_flags = ["-m", "deep"]

[tools.aider]
timeout_secs = 30
"#,
        )
        .unwrap();
        let rows = rows(&config, &AdapterRegistry::new("/support"));

        let aider = &rows[0];
        assert_eq!(aider.family, "custom");
        assert_eq!(aider.binary, "(missing)");
        assert_eq!(aider.read_only, ReadOnlyLevel::None);
        assert_eq!(aider.timeout_secs, 30);
        assert!(!aider.default);

        let amp = &rows[1];
        assert_eq!(amp.family, "amp");
        assert_eq!(amp.binary, "amp");
        assert_eq!(amp.read_only, ReadOnlyLevel::BestEffort);

        let claude = &rows[2];
        assert_eq!(claude.read_only, ReadOnlyLevel::Enforced);
        assert!(claude.default);
    }
}
