//! Read-only guarantee levels and the policy resolver.
//!
//! Every adapter advertises a ceiling [`ReadOnlyLevel`]; every run carries a
//! requested policy. The resolver decides two things per tool:
//!
//! - whether the tool may run at all ([`is_eligible`]), and
//! - whether the adapter's read-only flag set is attached
//!   ([`attaches_read_only_flags`]).
//!
//! "Read-only" is a request made to each external tool via its own flags or
//! settings files. It is never enforced by this crate at the OS level.

use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};

/// Ordered strength of a tool's promise not to mutate the filesystem.
///
/// `None < BestEffort < Enforced`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum ReadOnlyLevel {
    /// No read-only request is made.
    None,
    /// The tool is asked to stay read-only but can be talked out of it.
    #[default]
    BestEffort,
    /// The tool's own sandbox refuses writes.
    Enforced,
}

impl ReadOnlyLevel {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::None => "none",
            Self::BestEffort => "bestEffort",
            Self::Enforced => "enforced",
        }
    }
}

impl fmt::Display for ReadOnlyLevel {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for ReadOnlyLevel {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "none" => Ok(Self::None),
            "bestEffort" | "best-effort" | "best_effort" => Ok(Self::BestEffort),
            "enforced" => Ok(Self::Enforced),
            other => Err(format!(
                "invalid read-only level {other:?} (expected none, bestEffort, or enforced)"
            )),
        }
    }
}

/// Decide whether a tool with `effective` guarantee may run under `requested`.
///
/// Only `Enforced` filters: it admits tools whose effective level is exactly
/// `Enforced`. `BestEffort` and `None` admit every tool.
pub fn is_eligible(requested: ReadOnlyLevel, effective: ReadOnlyLevel) -> bool {
    requested != ReadOnlyLevel::Enforced || effective == ReadOnlyLevel::Enforced
}

/// Decide whether an adapter attaches its read-only flag set.
///
/// Flags are attached for any policy other than `None`, independent of the
/// tool's own ceiling.
pub fn attaches_read_only_flags(requested: ReadOnlyLevel) -> bool {
    requested != ReadOnlyLevel::None
}
