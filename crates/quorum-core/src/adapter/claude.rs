//! Claude Code adapter.
//!
//! Runs `claude -p --output-format text` with the prompt delivered as an
//! instruction to read the persisted prompt file. Read-only mode restricts
//! the tool set to read and search tools and ignores user MCP servers.

use super::types::{Invocation, RunRequest};
use super::{begin, file_instruction};
use crate::policy::{ReadOnlyLevel, attaches_read_only_flags};

/// Adapter for [Claude Code](https://docs.anthropic.com/en/docs/claude-code).
#[derive(Debug, Clone, Copy, Default)]
pub struct ClaudeAdapter;

impl ClaudeAdapter {
    pub const DEFAULT_BINARY: &str = "claude";
    pub const CEILING: ReadOnlyLevel = ReadOnlyLevel::Enforced;

    /// `--allowedTools` is variadic; `--strict-mcp-config` closes it so the
    /// prompt argument is not swallowed as a tool name.
    pub const READ_ONLY_FLAGS: &[&str] = &[
        "--tools",
        "Read,Glob,Grep,WebFetch,WebSearch",
        "--allowedTools",
        "Read,Glob,Grep,WebFetch,WebSearch",
        "--strict-mcp-config",
    ];

    pub fn build_invocation(&self, req: &RunRequest) -> Invocation {
        let mut inv = begin(req, Self::DEFAULT_BINARY, &["-p", "--output-format", "text"]);
        if attaches_read_only_flags(req.read_only_policy) {
            inv.args.extend(Self::READ_ONLY_FLAGS.iter().map(|s| s.to_string()));
        }
        inv.args.push(file_instruction(&req.prompt_file));
        inv
    }
}
