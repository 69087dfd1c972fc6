//! Vendor cost reconciliation for Amp.
//!
//! Amp reports account balances through `amp usage`. Cost of a run is the
//! decrease in those balances between a snapshot taken right before and one
//! taken right after the run.
//!
//! This is best-effort by construction: any other use of the same account
//! between the two snapshots (including another quorum tool running
//! concurrently on the same account) is attributed to this run. The delta is
//! reported as-is, never "corrected".

use std::path::PathBuf;
use std::sync::{Arc, LazyLock};
use std::time::Duration;

use async_trait::async_trait;
use regex::Regex;
use serde::{Deserialize, Serialize};
use tracing::{debug, warn};

use crate::adapter::Invocation;
use crate::executor::Executor;

static FREE_BALANCE: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"(?i)amp free:\s*\$([0-9]+(?:\.[0-9]+)?)\s*/\s*\$([0-9]+(?:\.[0-9]+)?)")
        .expect("free balance pattern is valid")
});

static CREDIT_BALANCE: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"(?i)individual credits:\s*\$([0-9]+(?:\.[0-9]+)?)")
        .expect("credit balance pattern is valid")
});

/// Balances parsed from one `amp usage` output.
#[derive(Debug, Clone, Copy, PartialEq, Default, Serialize, Deserialize)]
pub struct UsageSnapshot {
    pub free_remaining: f64,
    pub free_total: f64,
    pub credits_remaining: f64,
}

/// Parse `amp usage` output. Anything unrecognised reads as zero.
///
/// ```text
/// Amp Free: $8.42/$10.00 remaining (replenishes +$0.42/hour)
/// Individual credits: $25.00 remaining
/// ```
pub fn parse_usage(text: &str) -> UsageSnapshot {
    let mut snapshot = UsageSnapshot::default();
    if let Some(caps) = FREE_BALANCE.captures(text) {
        snapshot.free_remaining = parse_amount(caps.get(1).map(|m| m.as_str()));
        snapshot.free_total = parse_amount(caps.get(2).map(|m| m.as_str()));
    }
    if let Some(caps) = CREDIT_BALANCE.captures(text) {
        snapshot.credits_remaining = parse_amount(caps.get(1).map(|m| m.as_str()));
    }
    snapshot
}

fn parse_amount(s: Option<&str>) -> f64 {
    s.and_then(|s| s.parse().ok()).unwrap_or(0.0)
}

/// Which balance paid for a run.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum CostSource {
    Free,
    Credits,
}

/// Spend attributed to one run, in US dollars.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CostInfo {
    pub cost_usd: f64,
    pub free_used_usd: f64,
    pub credits_used_usd: f64,
    pub source: CostSource,
    pub free_remaining_usd: f64,
    pub free_total_usd: f64,
    pub credits_remaining_usd: f64,
}

/// Difference two snapshots. Balance increases (e.g. the free tier
/// replenishing mid-run) count as zero spend.
pub fn compute_cost(before: &UsageSnapshot, after: &UsageSnapshot) -> CostInfo {
    let free_used = round_cents((before.free_remaining - after.free_remaining).max(0.0));
    let credits_used = round_cents((before.credits_remaining - after.credits_remaining).max(0.0));
    CostInfo {
        cost_usd: round_cents(free_used + credits_used),
        free_used_usd: free_used,
        credits_used_usd: credits_used,
        source: if credits_used > 0.0 {
            CostSource::Credits
        } else {
            CostSource::Free
        },
        free_remaining_usd: after.free_remaining,
        free_total_usd: after.free_total,
        credits_remaining_usd: after.credits_remaining,
    }
}

fn round_cents(v: f64) -> f64 {
    (v * 100.0).round() / 100.0
}

/// Side channel for reading a vendor's account balance.
#[async_trait]
pub trait UsageProbe: Send + Sync {
    /// Take a snapshot using `binary`. `None` means the balance is unknown
    /// and no cost should be reported.
    async fn snapshot(&self, binary: &str) -> Option<UsageSnapshot>;
}

/// Runs `<binary> usage` through an [`Executor`].
#[derive(Clone)]
pub struct AmpUsageProbe {
    executor: Arc<dyn Executor>,
    cwd: PathBuf,
    timeout: Duration,
}

impl AmpUsageProbe {
    pub const DEFAULT_TIMEOUT: Duration = Duration::from_secs(30);

    pub fn new(executor: Arc<dyn Executor>, cwd: impl Into<PathBuf>) -> Self {
        Self {
            executor,
            cwd: cwd.into(),
            timeout: Self::DEFAULT_TIMEOUT,
        }
    }
}

impl std::fmt::Debug for AmpUsageProbe {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("AmpUsageProbe")
            .field("cwd", &self.cwd)
            .field("timeout", &self.timeout)
            .finish()
    }
}

#[async_trait]
impl UsageProbe for AmpUsageProbe {
    async fn snapshot(&self, binary: &str) -> Option<UsageSnapshot> {
        let mut inv = Invocation::new(binary, &self.cwd);
        inv.args.push("usage".to_string());
        let result = self.executor.execute(inv, self.timeout).await;
        if result.timed_out || result.exit_code != 0 {
            warn!(
                binary,
                exit_code = result.exit_code,
                timed_out = result.timed_out,
                "usage snapshot failed, cost will be omitted"
            );
            return None;
        }
        let snapshot = parse_usage(&result.stdout);
        debug!(?snapshot, "usage snapshot");
        Some(snapshot)
    }
}
