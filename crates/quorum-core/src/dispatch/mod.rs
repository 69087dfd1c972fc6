//! Dispatcher: runs one prompt against a set of tools.
//!
//! One call is one batch:
//!
//! ```text
//! filter ──(nothing eligible)──> Err(NoEligibleTools)
//!    │
//!    └──> N tasks behind a semaphore
//!            queued ──> started ──> executing ──> completed | errored
//!            queued ──(cancelled)──> skipped
//!    └──> settle: exactly one ToolReport per eligible tool
//! ```
//!
//! A failing tool never affects its siblings: every per-task error, including
//! a panic, is folded into that tool's report. Nothing is retried.

pub mod persist;
pub mod report;

use std::collections::HashSet;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use anyhow::{Context, Result};
use thiserror::Error;
use tokio::sync::Semaphore;
use tokio_util::sync::CancellationToken;

use crate::adapter::{Adapter, AdapterError, AdapterRegistry, Invocation, RunRequest};
use crate::config::{AdapterKind, QuorumConfig, ToolConfig};
use crate::cost::{UsageProbe, compute_cost};
use crate::executor::{ExecResult, Executor};
use crate::policy::{ReadOnlyLevel, is_eligible};

pub use persist::{OutputFiles, sanitize_tool_id};
pub use report::{ProgressEvent, ToolReport, ToolStatus};

/// Errors that make a whole batch meaningless.
#[derive(Debug, Error)]
pub enum DispatchError {
    #[error("no eligible tools to run (requested: {requested:?}, read-only policy: {policy})")]
    NoEligibleTools {
        requested: Vec<String>,
        policy: ReadOnlyLevel,
    },

    #[error("failed to create output directory {}", path.display())]
    OutputDir {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
}

/// Callback for [`ProgressEvent`]s. Runs inline on the task's thread and
/// should return quickly.
pub type Observer = Arc<dyn Fn(&ProgressEvent) + Send + Sync>;

/// What to run and where.
#[derive(Debug, Clone)]
pub struct DispatchOptions {
    pub tool_ids: Vec<String>,
    pub prompt: String,
    pub prompt_file: PathBuf,
    pub output_dir: PathBuf,
    pub read_only: ReadOnlyLevel,
    /// Working directory for every tool. Defaults to `output_dir`.
    pub cwd: Option<PathBuf>,
    /// Concurrency cap. Defaults to the config's `max_parallel`.
    pub max_parallel: Option<usize>,
}

impl DispatchOptions {
    pub fn new(
        tool_ids: Vec<String>,
        prompt: impl Into<String>,
        prompt_file: impl Into<PathBuf>,
        output_dir: impl Into<PathBuf>,
    ) -> Self {
        Self {
            tool_ids,
            prompt: prompt.into(),
            prompt_file: prompt_file.into(),
            output_dir: output_dir.into(),
            read_only: ReadOnlyLevel::default(),
            cwd: None,
            max_parallel: None,
        }
    }

    pub fn read_only(mut self, level: ReadOnlyLevel) -> Self {
        self.read_only = level;
        self
    }

    pub fn cwd(mut self, cwd: impl Into<PathBuf>) -> Self {
        self.cwd = Some(cwd.into());
        self
    }

    pub fn max_parallel(mut self, n: usize) -> Self {
        self.max_parallel = Some(n);
        self
    }
}

/// Result of a batch: one report per eligible tool, in the order the tools
/// were requested, plus the warnings for every dropped tool.
#[derive(Debug, Clone)]
pub struct DispatchOutcome {
    pub reports: Vec<ToolReport>,
    pub warnings: Vec<String>,
}

impl DispatchOutcome {
    /// A run had problems if any tool did not succeed.
    pub fn all_succeeded(&self) -> bool {
        self.reports.iter().all(ToolReport::is_success)
    }
}

/// One tool as a dry run would launch it.
#[derive(Debug)]
pub struct PlannedInvocation {
    pub tool_id: String,
    pub adapter: AdapterKind,
    pub read_only_level: ReadOnlyLevel,
    pub timeout: Duration,
    pub invocation: Result<Invocation, AdapterError>,
}

/// Output of [`Dispatcher::plan`].
#[derive(Debug)]
pub struct Plan {
    pub invocations: Vec<PlannedInvocation>,
    pub warnings: Vec<String>,
}

/// A tool that passed filtering.
#[derive(Debug, Clone)]
struct EligibleTool {
    id: String,
    config: ToolConfig,
    adapter: Adapter,
    level: ReadOnlyLevel,
}

/// Runs batches. Cheap to clone; every task holds its own clone.
#[derive(Clone)]
pub struct Dispatcher {
    config: Arc<QuorumConfig>,
    registry: AdapterRegistry,
    executor: Arc<dyn Executor>,
    usage: Option<Arc<dyn UsageProbe>>,
    observer: Option<Observer>,
    cancel: CancellationToken,
}

impl std::fmt::Debug for Dispatcher {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Dispatcher")
            .field("tools", &self.config.tools.keys().collect::<Vec<_>>())
            .field("registry", &self.registry)
            .field("usage_probe", &self.usage.is_some())
            .field("observer", &self.observer.is_some())
            .finish()
    }
}

impl Dispatcher {
    pub fn new(config: Arc<QuorumConfig>, registry: AdapterRegistry, executor: Arc<dyn Executor>) -> Self {
        Self {
            config,
            registry,
            executor,
            usage: None,
            observer: None,
            cancel: CancellationToken::new(),
        }
    }

    pub fn with_usage_probe(mut self, probe: Arc<dyn UsageProbe>) -> Self {
        self.usage = Some(probe);
        self
    }

    pub fn with_observer(mut self, observer: Observer) -> Self {
        self.observer = Some(observer);
        self
    }

    /// Tools still waiting for a slot when `cancel` fires are reported as
    /// skipped instead of started.
    pub fn with_cancellation(mut self, cancel: CancellationToken) -> Self {
        self.cancel = cancel;
        self
    }

    /// Build every eligible tool's invocation without running or writing
    /// anything.
    pub fn plan(&self, options: &DispatchOptions) -> Result<Plan, DispatchError> {
        let (eligible, warnings) = self.filter(options)?;
        let invocations = eligible
            .iter()
            .map(|tool| {
                let request = self.request_for(options, tool);
                PlannedInvocation {
                    tool_id: tool.id.clone(),
                    adapter: tool.adapter.kind(),
                    read_only_level: tool.level,
                    timeout: request.timeout,
                    invocation: tool.adapter.build_invocation(&request),
                }
            })
            .collect();
        Ok(Plan {
            invocations,
            warnings,
        })
    }

    /// Run every eligible tool and settle on one report each.
    pub async fn dispatch(&self, options: DispatchOptions) -> Result<DispatchOutcome, DispatchError> {
        let (eligible, warnings) = self.filter(&options)?;

        tokio::fs::create_dir_all(&options.output_dir)
            .await
            .map_err(|source| DispatchError::OutputDir {
                path: options.output_dir.clone(),
                source,
            })?;

        let max_parallel = options
            .max_parallel
            .unwrap_or(self.config.defaults.max_parallel)
            .max(1);
        tracing::info!(
            tools = eligible.len(),
            max_parallel,
            policy = %options.read_only,
            output_dir = %options.output_dir.display(),
            "dispatching"
        );

        let semaphore = Arc::new(Semaphore::new(max_parallel));
        let options = Arc::new(options);
        let mut ids = Vec::with_capacity(eligible.len());
        let mut handles = Vec::with_capacity(eligible.len());

        for tool in eligible {
            let id = tool.id.clone();
            let this = self.clone();
            let semaphore = Arc::clone(&semaphore);
            let options = Arc::clone(&options);
            let handle = tokio::spawn(async move {
                let permit = tokio::select! {
                    biased;
                    _ = this.cancel.cancelled() => {
                        tracing::info!(tool_id = %tool.id, "run cancelled before tool started");
                        let report = ToolReport::skipped(&tool.id, "run cancelled before the tool started");
                        this.notify(&ProgressEvent::Completed {
                            tool_id: tool.id.clone(),
                            report: report.clone(),
                        });
                        return report;
                    }
                    permit = semaphore.acquire_owned() => permit,
                };
                let _permit = match permit {
                    Ok(permit) => permit,
                    Err(e) => return ToolReport::failed(&tool.id, e),
                };

                this.notify(&ProgressEvent::Started {
                    tool_id: tool.id.clone(),
                });
                let report = match this.run_tool(&options, &tool).await {
                    Ok(report) => report,
                    Err(e) => {
                        tracing::error!(tool_id = %tool.id, error = %format!("{e:#}"), "tool task failed");
                        ToolReport::failed(&tool.id, format!("{e:#}"))
                    }
                };
                this.notify(&ProgressEvent::Completed {
                    tool_id: tool.id.clone(),
                    report: report.clone(),
                });
                report
            });
            ids.push(id);
            handles.push(handle);
        }

        let settled = futures::future::join_all(handles).await;
        let reports = ids
            .into_iter()
            .zip(settled)
            .map(|(id, joined)| match joined {
                Ok(report) => report,
                Err(e) => {
                    tracing::error!(tool_id = %id, error = %e, "tool task panicked");
                    let report = ToolReport::failed(&id, format!("tool task aborted: {e}"));
                    self.notify(&ProgressEvent::Completed {
                        tool_id: id.clone(),
                        report: report.clone(),
                    });
                    report
                }
            })
            .collect();

        Ok(DispatchOutcome { reports, warnings })
    }

    /// Resolve, de-duplicate and policy-check the requested tools.
    fn filter(&self, options: &DispatchOptions) -> Result<(Vec<EligibleTool>, Vec<String>), DispatchError> {
        let mut eligible = Vec::new();
        let mut warnings = Vec::new();
        let mut seen_files = HashSet::new();

        for id in &options.tool_ids {
            let Some(config) = self.config.tool(id) else {
                warnings.push(format!("tool {id:?} is not configured; skipping"));
                continue;
            };
            let adapter = self.registry.resolve(id, config);
            let level = adapter.effective_read_only_level(config);
            if !is_eligible(options.read_only, level) {
                warnings.push(format!(
                    "tool {id:?} only provides read-only level {level}, but {} was requested; skipping",
                    options.read_only
                ));
                continue;
            }
            // Case-folded: run directories may live on case-insensitive filesystems.
            let stem = sanitize_tool_id(id).to_ascii_lowercase();
            if persist::RESERVED_STEMS.contains(&stem.as_str()) {
                warnings.push(format!(
                    "tool {id:?} would overwrite the run's own {stem} file; skipping"
                ));
                continue;
            }
            if !seen_files.insert(stem) {
                warnings.push(format!(
                    "tool {id:?} is listed twice or its output files collide with another tool; skipping"
                ));
                continue;
            }
            eligible.push(EligibleTool {
                id: id.clone(),
                config: config.clone(),
                adapter,
                level,
            });
        }

        for warning in &warnings {
            tracing::warn!("{warning}");
        }

        if eligible.is_empty() {
            return Err(DispatchError::NoEligibleTools {
                requested: options.tool_ids.clone(),
                policy: options.read_only,
            });
        }
        Ok((eligible, warnings))
    }

    fn request_for(&self, options: &DispatchOptions, tool: &EligibleTool) -> RunRequest {
        let mut request = RunRequest::new(
            &tool.id,
            &options.prompt,
            &options.prompt_file,
            &options.output_dir,
        )
        .read_only_policy(options.read_only)
        .timeout(Duration::from_secs(self.config.timeout_for(&tool.id)))
        .extra_flags(tool.config.extra_flags.clone());
        if let Some(cwd) = &options.cwd {
            request = request.cwd(cwd);
        }
        if let Some(binary) = &tool.config.binary {
            request = request.binary(binary);
        }
        request
    }

    async fn run_tool(&self, options: &DispatchOptions, tool: &EligibleTool) -> Result<ToolReport> {
        let request = self.request_for(options, tool);
        let invocation = tool.adapter.build_invocation(&request)?;
        tool.adapter
            .prepare()
            .await
            .with_context(|| format!("failed to prepare {} adapter", tool.adapter.kind()))?;

        let probe = self.usage.as_ref().filter(|_| tool.adapter.supports_usage());
        let binary = invocation.program.clone();
        if self.cancel.is_cancelled() {
            return Ok(self.cancelled(&tool.id));
        }
        let before = match probe {
            Some(probe) => probe.snapshot(&binary).await,
            None => None,
        };

        // An interrupt may have landed while the snapshot ran, after
        // `terminate_all` already swept the active children.
        if self.cancel.is_cancelled() {
            return Ok(self.cancelled(&tool.id));
        }

        tracing::debug!(tool_id = %tool.id, command = %invocation.display_command(), "executing tool");
        let result = self.executor.execute(invocation, request.timeout).await;

        let cost = match (probe, before) {
            (Some(probe), Some(before)) => probe
                .snapshot(&binary)
                .await
                .map(|after| compute_cost(&before, &after)),
            _ => None,
        };

        let files = persist::write_outputs(&options.output_dir, &tool.id, &result, cost.as_ref()).await?;
        let parsed = tool.adapter.parse_result(&result);
        let error = match parsed.status {
            ToolStatus::Success => None,
            _ => Some(report::excerpt(&failure_text(&result, request.timeout))),
        };

        tracing::info!(
            tool_id = %tool.id,
            status = %parsed.status,
            exit_code = result.exit_code,
            duration_ms = result.duration_ms,
            words = parsed.word_count,
            "tool completed"
        );

        Ok(ToolReport {
            tool_id: tool.id.clone(),
            status: parsed.status,
            exit_code: Some(result.exit_code),
            duration_ms: result.duration_ms,
            word_count: parsed.word_count,
            output_file: Some(files.output),
            stderr_file: Some(files.stderr),
            stats_file: files.stats,
            cost,
            error,
        })
    }

    fn cancelled(&self, tool_id: &str) -> ToolReport {
        tracing::info!(tool_id = %tool_id, "run cancelled before tool was spawned");
        ToolReport::skipped(tool_id, "run cancelled before the tool started")
    }

    fn notify(&self, event: &ProgressEvent) {
        if let Some(observer) = &self.observer {
            observer(event);
        }
    }
}

fn failure_text(result: &ExecResult, timeout: Duration) -> String {
    if !result.stderr.trim().is_empty() {
        return result.stderr.clone();
    }
    if result.timed_out {
        format!("timed out after {}s", timeout.as_secs())
    } else {
        format!("exited with code {}", result.exit_code)
    }
}
