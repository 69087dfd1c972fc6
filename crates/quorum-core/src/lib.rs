//! Core of quorum: send one prompt to a panel of coding-agent CLIs.
//!
//! - [`adapter`]: per-family invocation building and result parsing
//! - [`executor`]: isolated child-process execution with timeouts
//! - [`dispatch`]: bounded-parallel batch orchestration
//! - [`policy`]: read-only eligibility rules
//! - [`cost`]: best-effort vendor cost reconciliation
//! - [`config`]: tool configuration and trust-aware merging

pub mod adapter;
pub mod config;
pub mod cost;
pub mod dispatch;
pub mod executor;
pub mod policy;

pub use dispatch::{DispatchError, DispatchOptions, DispatchOutcome, Dispatcher};
pub use policy::ReadOnlyLevel;
