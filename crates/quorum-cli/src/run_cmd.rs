//! `quorum run` command: send one prompt to the configured panel of tools.

use std::io::{IsTerminal, Read};
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::Duration;

use anyhow::{Context, Result, bail};
use chrono::{DateTime, Local, Utc};
use serde::Serialize;
use tokio_util::sync::CancellationToken;

use quorum_core::adapter::AdapterRegistry;
use quorum_core::cost::AmpUsageProbe;
use quorum_core::dispatch::{
    DispatchOptions, DispatchOutcome, Dispatcher, Plan, ProgressEvent, ToolReport, ToolStatus,
};
use quorum_core::executor::{ProcessExecutor, terminate_all};
use quorum_core::policy::ReadOnlyLevel;

use crate::config::{self, ResolvedConfig};

/// How long children get to exit after the first Ctrl-C.
const INTERRUPT_GRACE: Duration = Duration::from_secs(5);

/// Exit code after an interrupt, as a shell would report SIGINT.
pub const EXIT_INTERRUPTED: i32 = 130;

/// Arguments of `quorum run`.
#[derive(Debug, clap::Args)]
pub struct RunArgs {
    /// Prompt text (omit to use --prompt-file or stdin)
    pub prompt: Option<String>,
    /// Read the prompt from a file
    #[arg(long, conflicts_with = "prompt")]
    pub prompt_file: Option<PathBuf>,
    /// Comma-separated tool ids (default: every configured tool)
    #[arg(long, value_delimiter = ',')]
    pub tools: Vec<String>,
    /// Read-only policy: none, bestEffort, or enforced
    #[arg(long)]
    pub read_only: Option<ReadOnlyLevel>,
    /// Timeout per tool in seconds (overrides every configured timeout)
    #[arg(long, value_parser = clap::value_parser!(u64).range(1..))]
    pub timeout: Option<u64>,
    /// Maximum number of tools running at once
    #[arg(long, value_parser = clap::value_parser!(u64).range(1..))]
    pub max_parallel: Option<u64>,
    /// Directory that receives the run directory
    #[arg(long)]
    pub output_dir: Option<PathBuf>,
    /// Print the planned invocations without running or writing anything
    #[arg(long)]
    pub dry_run: bool,
}

/// Everything recorded about one run in `run.json`.
#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
struct RunManifest<'a> {
    started_at: DateTime<Utc>,
    finished_at: DateTime<Utc>,
    prompt_file: &'a Path,
    output_dir: &'a Path,
    read_only: ReadOnlyLevel,
    tools: &'a [String],
    interrupted: bool,
    warnings: &'a [String],
    reports: &'a [ToolReport],
}

/// Run the run command. Returns the process exit code.
pub async fn run_run(args: RunArgs, cli_config: Option<&Path>) -> Result<i32> {
    let cwd = std::env::current_dir().context("failed to determine working directory")?;
    let resolved = ResolvedConfig::resolve(cli_config, args.output_dir.as_deref(), &cwd)?;
    for warning in &resolved.warnings {
        tracing::warn!("{warning}");
    }

    let prompt = read_prompt(&args)?;
    let mut quorum_config = resolved.config;
    if let Some(secs) = args.timeout {
        quorum_config.defaults.timeout_secs = secs;
        for tool in quorum_config.tools.values_mut() {
            tool.timeout_secs = None;
        }
    }
    let tool_ids = if args.tools.is_empty() {
        quorum_config.default_tool_ids()
    } else {
        args.tools.clone()
    };
    let read_only = args.read_only.unwrap_or(quorum_config.defaults.read_only);
    let max_parallel = match args.max_parallel {
        Some(n) => usize::try_from(n).unwrap_or(usize::MAX),
        None => quorum_config.defaults.max_parallel,
    };

    let run_dir = run_directory(&resolved.output_dir, Local::now());
    let prompt_file = run_dir.join("prompt.md");
    let options = DispatchOptions::new(tool_ids.clone(), prompt, &prompt_file, &run_dir)
        .read_only(read_only)
        .cwd(&cwd)
        .max_parallel(max_parallel);

    let executor = Arc::new(ProcessExecutor::new());
    let registry = AdapterRegistry::new(config::support_dir());
    let quorum_config = Arc::new(quorum_config);

    if args.dry_run {
        let dispatcher = Dispatcher::new(quorum_config, registry, executor);
        let plan = dispatcher.plan(&options)?;
        print_plan(&plan, &options);
        return Ok(0);
    }

    std::fs::create_dir_all(&run_dir)
        .with_context(|| format!("failed to create run directory {}", run_dir.display()))?;
    std::fs::write(&prompt_file, &options.prompt)
        .with_context(|| format!("failed to write {}", prompt_file.display()))?;

    println!("Run directory: {}", run_dir.display());
    println!("  Tools: {}", tool_ids.join(", "));
    println!("  Read-only policy: {read_only}");
    println!("  Max parallel: {max_parallel}");

    // Graceful shutdown: first signal cancels queued tools and terminates
    // running children, second force-exits.
    let cancel = CancellationToken::new();
    let cancel_clone = cancel.clone();
    let got_first_signal = Arc::new(AtomicBool::new(false));
    let got_first_clone = Arc::clone(&got_first_signal);

    tokio::spawn(async move {
        loop {
            tokio::signal::ctrl_c().await.ok();
            if got_first_clone.swap(true, Ordering::SeqCst) {
                eprintln!("\nForce exit.");
                std::process::exit(EXIT_INTERRUPTED);
            }
            eprintln!("\nStopping running tools (Ctrl+C again to force)...");
            cancel_clone.cancel();
            let count = terminate_all(INTERRUPT_GRACE).await;
            tracing::info!(count, "terminated running tools");
            // Children are gone; if settling still hangs, give up.
            tokio::spawn(async {
                tokio::time::sleep(INTERRUPT_GRACE).await;
                eprintln!("Tools did not settle in time, exiting.");
                std::process::exit(EXIT_INTERRUPTED);
            });
        }
    });

    let probe = Arc::new(AmpUsageProbe::new(executor.clone(), &cwd));
    let dispatcher = Dispatcher::new(quorum_config, registry, executor)
        .with_usage_probe(probe)
        .with_observer(Arc::new(print_progress))
        .with_cancellation(cancel);

    let started_at = Utc::now();
    let outcome = dispatcher.dispatch(options).await?;
    let interrupted = got_first_signal.load(Ordering::SeqCst);

    let manifest = RunManifest {
        started_at,
        finished_at: Utc::now(),
        prompt_file: &prompt_file,
        output_dir: &run_dir,
        read_only,
        tools: &tool_ids,
        interrupted,
        warnings: &outcome.warnings,
        reports: &outcome.reports,
    };
    let manifest_path = run_dir.join("run.json");
    let json = serde_json::to_string_pretty(&manifest).context("failed to serialize run manifest")?;
    std::fs::write(&manifest_path, json)
        .with_context(|| format!("failed to write {}", manifest_path.display()))?;

    print_summary(&outcome);
    println!("\nReports written to {}", run_dir.display());

    Ok(exit_code(&outcome, interrupted))
}

fn exit_code(outcome: &DispatchOutcome, interrupted: bool) -> i32 {
    if interrupted {
        EXIT_INTERRUPTED
    } else if outcome.all_succeeded() {
        0
    } else {
        1
    }
}

/// Prompt from the positional argument, `--prompt-file`, or piped stdin.
fn read_prompt(args: &RunArgs) -> Result<String> {
    let prompt = if let Some(text) = &args.prompt {
        text.clone()
    } else if let Some(path) = &args.prompt_file {
        std::fs::read_to_string(path)
            .with_context(|| format!("failed to read prompt file {}", path.display()))?
    } else if !std::io::stdin().is_terminal() {
        let mut text = String::new();
        std::io::stdin()
            .read_to_string(&mut text)
            .context("failed to read prompt from stdin")?;
        text
    } else {
        bail!("no prompt given; pass it as an argument, with --prompt-file, or on stdin");
    };
    if prompt.trim().is_empty() {
        bail!("prompt is empty");
    }
    Ok(prompt)
}

/// `<output_dir>/<YYYYmmdd-HHMMSS>`, suffixed when that already exists.
fn run_directory(output_dir: &Path, now: DateTime<Local>) -> PathBuf {
    let stamp = now.format("%Y%m%d-%H%M%S").to_string();
    let base = output_dir.join(&stamp);
    if !base.exists() {
        return base;
    }
    (2..)
        .map(|n| output_dir.join(format!("{stamp}-{n}")))
        .find(|p| !p.exists())
        .unwrap_or(base)
}

fn print_progress(event: &ProgressEvent) {
    match event {
        ProgressEvent::Started { tool_id } => eprintln!("  -> {tool_id} started"),
        ProgressEvent::Completed { tool_id, report } => eprintln!(
            "  <- {tool_id} {} ({:.1}s)",
            report.status,
            report.duration_ms as f64 / 1000.0
        ),
    }
}

fn print_plan(plan: &Plan, options: &DispatchOptions) {
    for warning in &plan.warnings {
        println!("warning: {warning}");
    }
    println!("Dry run: nothing will be executed or written.");
    println!("  Run directory: {}", options.output_dir.display());
    println!("  Read-only policy: {}", options.read_only);
    for planned in &plan.invocations {
        println!();
        println!(
            "{} [{}, read-only {}, timeout {}s]",
            planned.tool_id,
            planned.adapter,
            planned.read_only_level,
            planned.timeout.as_secs()
        );
        match &planned.invocation {
            Ok(inv) => {
                println!("  $ {}", inv.display_command());
                if inv.stdin.is_some() {
                    println!("  (prompt on stdin)");
                }
            }
            Err(e) => println!("  error: {e}"),
        }
    }
}

fn print_summary(outcome: &DispatchOutcome) {
    for warning in &outcome.warnings {
        println!("warning: {warning}");
    }
    println!();
    println!(
        "{:<20} {:<8} {:>5} {:>9} {:>7} {:>8}",
        "TOOL", "STATUS", "EXIT", "DURATION", "WORDS", "COST"
    );
    for r in &outcome.reports {
        let exit = r.exit_code.map(|c| c.to_string()).unwrap_or_else(|| "-".into());
        let cost = r
            .cost
            .as_ref()
            .map(|c| format!("${:.2}", c.cost_usd))
            .unwrap_or_else(|| "-".into());
        println!(
            "{:<20} {:<8} {:>5} {:>8.1}s {:>7} {:>8}",
            r.tool_id,
            r.status,
            exit,
            r.duration_ms as f64 / 1000.0,
            r.word_count,
            cost
        );
        if r.status != ToolStatus::Success {
            if let Some(line) = r.error.as_deref().and_then(|e| e.lines().next()) {
                println!("    {line}");
            }
        }
    }
}
