//! OpenAI Codex CLI adapter.
//!
//! Runs `codex exec` non-interactively. Read-only mode uses the CLI's own
//! `read-only` sandbox, which refuses writes at the tool level.

use super::types::{Invocation, RunRequest};
use super::{begin, file_instruction};
use crate::policy::{ReadOnlyLevel, attaches_read_only_flags};

#[derive(Debug, Clone, Copy, Default)]
pub struct CodexAdapter;

impl CodexAdapter {
    pub const DEFAULT_BINARY: &str = "codex";
    pub const CEILING: ReadOnlyLevel = ReadOnlyLevel::Enforced;
    pub const READ_ONLY_FLAGS: &[&str] = &["--sandbox", "read-only"];

    pub fn build_invocation(&self, req: &RunRequest) -> Invocation {
        // Output directories are usually outside any git repo.
        let mut inv = begin(req, Self::DEFAULT_BINARY, &["exec", "--skip-git-repo-check"]);
        if attaches_read_only_flags(req.read_only_policy) {
            inv.args.extend(Self::READ_ONLY_FLAGS.iter().map(|s| s.to_string()));
        }
        inv.args.push(file_instruction(&req.prompt_file));
        inv
    }
}
