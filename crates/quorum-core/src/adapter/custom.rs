//! Configuration-driven adapter for user-defined tools.
//!
//! Everything a built-in family hardcodes (binary, read-only flags, prompt
//! delivery, guarantee level) comes from the tool's config entry instead, so
//! new tools plug in without code changes.

use super::types::{Invocation, RunRequest};
use super::{AdapterError, file_instruction};
use crate::config::{PromptDelivery, ToolConfig};
use crate::policy::{ReadOnlyLevel, attaches_read_only_flags};

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CustomAdapter {
    level: ReadOnlyLevel,
    read_only_flags: Vec<String>,
    delivery: PromptDelivery,
}

impl CustomAdapter {
    pub fn new(level: ReadOnlyLevel, read_only_flags: Vec<String>, delivery: PromptDelivery) -> Self {
        Self {
            level,
            read_only_flags,
            delivery,
        }
    }

    /// Build from a tool config entry. A tool without a read-only descriptor
    /// is treated as providing no guarantee.
    pub fn from_config(tool: &ToolConfig) -> Self {
        let (level, flags) = match &tool.read_only {
            Some(d) => (d.level, d.flags.clone()),
            None => (ReadOnlyLevel::None, Vec::new()),
        };
        Self::new(level, flags, tool.prompt_mode.unwrap_or_default())
    }

    pub fn level(&self) -> ReadOnlyLevel {
        self.level
    }

    pub fn read_only_flags(&self) -> &[String] {
        &self.read_only_flags
    }

    pub fn delivery(&self) -> PromptDelivery {
        self.delivery
    }

    pub fn build_invocation(&self, req: &RunRequest) -> Result<Invocation, AdapterError> {
        let program = req
            .binary
            .as_deref()
            .map(str::trim)
            .filter(|b| !b.is_empty())
            .ok_or_else(|| AdapterError::MissingBinary {
                tool: req.tool_id.clone(),
            })?;

        let mut inv = Invocation::new(program, &req.cwd);
        inv.args.extend(req.extra_flags.iter().cloned());
        if attaches_read_only_flags(req.read_only_policy) {
            inv.args.extend(self.read_only_flags.iter().cloned());
        }
        match self.delivery {
            PromptDelivery::Argument => inv.args.push(file_instruction(&req.prompt_file)),
            PromptDelivery::Stdin => inv.stdin = Some(req.prompt.clone()),
        }
        Ok(inv)
    }
}
