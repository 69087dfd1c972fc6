//! Google Gemini CLI adapter.
//!
//! Gemini has no sandbox that refuses writes outright; read-only mode keeps
//! approvals on and allowlists read and search tools, so its ceiling is
//! `bestEffort`.

use super::types::{Invocation, ParsedResult, RunRequest};
use super::{begin, count_words, file_instruction, status_for};
use crate::executor::ExecResult;
use crate::policy::{ReadOnlyLevel, attaches_read_only_flags};

/// Status lines Gemini prints on stdout before the answer.
const PREAMBLE_LINES: &[&str] = &["Loaded cached credentials."];

#[derive(Debug, Clone, Copy, Default)]
pub struct GeminiAdapter;

impl GeminiAdapter {
    pub const DEFAULT_BINARY: &str = "gemini";
    pub const CEILING: ReadOnlyLevel = ReadOnlyLevel::BestEffort;
    pub const READ_ONLY_FLAGS: &[&str] = &[
        "--approval-mode",
        "default",
        "--allowed-tools",
        "read_file,list_directory,search_file_content,glob,google_web_search,web_fetch",
    ];

    pub fn build_invocation(&self, req: &RunRequest) -> Invocation {
        let mut inv = begin(req, Self::DEFAULT_BINARY, &["--output-format", "text"]);
        if attaches_read_only_flags(req.read_only_policy) {
            inv.args.extend(Self::READ_ONLY_FLAGS.iter().map(|s| s.to_string()));
        }
        inv.args.push(file_instruction(&req.prompt_file));
        inv
    }

    /// Word count ignores the CLI's own preamble; status follows the shared
    /// rule.
    pub fn parse_result(&self, result: &ExecResult) -> ParsedResult {
        let body = result
            .stdout
            .lines()
            .skip_while(|line| {
                let trimmed = line.trim();
                trimmed.is_empty() || PREAMBLE_LINES.contains(&trimmed)
            })
            .collect::<Vec<_>>()
            .join("\n");
        ParsedResult {
            status: status_for(result),
            word_count: count_words(&body),
        }
    }
}
