//! Integration tests for the dispatcher, driven by a scripted executor.

use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use quorum_core::adapter::AdapterRegistry;
use quorum_core::config::QuorumConfig;
use async_trait::async_trait;
use quorum_core::cost::{CostSource, UsageProbe, UsageSnapshot};
use quorum_core::dispatch::{
    DispatchError, DispatchOptions, Dispatcher, ProgressEvent, ToolReport, ToolStatus,
};
use quorum_core::policy::ReadOnlyLevel;
use quorum_test_utils::{FakeExecutor, FakeResponse, FakeUsageProbe, snapshot};
use tempfile::TempDir;
use tokio_util::sync::CancellationToken;

// ===========================================================================
// Helpers
// ===========================================================================

fn config(toml: &str) -> Arc<QuorumConfig> {
    Arc::new(QuorumConfig::from_toml_str(toml).expect("test config parses"))
}

fn dispatcher(config: Arc<QuorumConfig>, dir: &Path, executor: Arc<FakeExecutor>) -> Dispatcher {
    Dispatcher::new(config, AdapterRegistry::new(dir.join("support")), executor)
}

fn options(dir: &Path, ids: &[&str]) -> DispatchOptions {
    DispatchOptions::new(
        ids.iter().map(|s| s.to_string()).collect(),
        "Review the diff in this repository.",
        dir.join("prompt.md"),
        dir.join("out"),
    )
}

fn report<'a>(reports: &'a [ToolReport], id: &str) -> &'a ToolReport {
    reports
        .iter()
        .find(|r| r.tool_id == id)
        .unwrap_or_else(|| panic!("no report for {id}"))
}

const PANEL: &str = r#"
[tools.claude]
binary = "fake-claude"

[tools.gemini]
binary = "fake-gemini"

[tools.aider]
binary = "fake-aider"
read_only = { level = "bestEffort", flags = ["--read-only"] }
"#;

// ===========================================================================
// Filtering
// ===========================================================================

#[tokio::test]
async fn enforced_policy_runs_only_enforced_tools() {
    let dir = TempDir::new().unwrap();
    let executor = Arc::new(FakeExecutor::new());
    let d = dispatcher(config(PANEL), dir.path(), executor.clone());

    let outcome = d
        .dispatch(options(dir.path(), &["claude", "gemini", "aider"]).read_only(ReadOnlyLevel::Enforced))
        .await
        .unwrap();

    assert_eq!(outcome.reports.len(), 1);
    assert_eq!(outcome.reports[0].tool_id, "claude");
    assert_eq!(outcome.warnings.len(), 2);
    assert!(outcome.warnings.iter().any(|w| w.contains("gemini") && w.contains("bestEffort")));
    assert!(outcome.warnings.iter().any(|w| w.contains("aider") && w.contains("bestEffort")));
    assert_eq!(executor.invocations().len(), 1);
}

#[tokio::test]
async fn best_effort_policy_runs_everything() {
    let dir = TempDir::new().unwrap();
    let executor = Arc::new(FakeExecutor::new());
    let d = dispatcher(config(PANEL), dir.path(), executor.clone());

    let outcome = d
        .dispatch(options(dir.path(), &["claude", "gemini", "aider"]))
        .await
        .unwrap();

    assert_eq!(outcome.reports.len(), 3);
    assert!(outcome.warnings.is_empty());
    let aider = executor.invocations_of("fake-aider");
    assert!(aider[0].args.contains(&"--read-only".to_string()));
}

#[tokio::test]
async fn empty_eligible_set_rejects_the_batch() {
    let dir = TempDir::new().unwrap();
    let executor = Arc::new(FakeExecutor::new());
    let d = dispatcher(config(PANEL), dir.path(), executor.clone());

    let err = d
        .dispatch(options(dir.path(), &["gemini", "missing"]).read_only(ReadOnlyLevel::Enforced))
        .await
        .unwrap_err();

    match err {
        DispatchError::NoEligibleTools { requested, policy } => {
            assert_eq!(requested, vec!["gemini", "missing"]);
            assert_eq!(policy, ReadOnlyLevel::Enforced);
        }
        other => panic!("expected NoEligibleTools, got {other:?}"),
    }
    assert!(executor.invocations().is_empty());
    assert!(!dir.path().join("out").exists());
}

// ===========================================================================
// Reports and persisted files
// ===========================================================================

#[tokio::test]
async fn successful_run_yields_report_and_output_file() {
    let dir = TempDir::new().unwrap();
    let executor = Arc::new(FakeExecutor::new().on("fake-claude", FakeResponse::ok("OK")));
    let d = dispatcher(config(PANEL), dir.path(), executor);

    let outcome = d.dispatch(options(dir.path(), &["claude"])).await.unwrap();
    let r = &outcome.reports[0];

    assert_eq!(r.status, ToolStatus::Success);
    assert_eq!(r.word_count, 1);
    assert_eq!(r.exit_code, Some(0));
    assert!(r.error.is_none());
    let output = r.output_file.as_ref().unwrap();
    assert_eq!(std::fs::read_to_string(output).unwrap(), "OK");
    assert!(r.stderr_file.as_ref().unwrap().exists());
    assert!(outcome.all_succeeded());
}

#[tokio::test]
async fn failures_and_timeouts_are_reports_not_errors() {
    let dir = TempDir::new().unwrap();
    let executor = Arc::new(
        FakeExecutor::new()
            .on("fake-claude", FakeResponse::exit(2, "", "authentication required"))
            .on("fake-gemini", FakeResponse::timed_out()),
    );
    let d = dispatcher(config(PANEL), dir.path(), executor);

    let outcome = d
        .dispatch(options(dir.path(), &["claude", "gemini", "aider"]))
        .await
        .unwrap();

    let claude = report(&outcome.reports, "claude");
    assert_eq!(claude.status, ToolStatus::Error);
    assert_eq!(claude.error.as_deref(), Some("authentication required"));

    let gemini = report(&outcome.reports, "gemini");
    assert_eq!(gemini.status, ToolStatus::Timeout);
    assert!(gemini.error.as_deref().unwrap().starts_with("timed out after"));

    assert_eq!(report(&outcome.reports, "aider").status, ToolStatus::Success);
    assert!(!outcome.all_succeeded());
}

#[tokio::test]
async fn long_stderr_is_truncated_in_report() {
    let dir = TempDir::new().unwrap();
    let noise = "x".repeat(5_000);
    let executor = Arc::new(FakeExecutor::new().on("fake-claude", FakeResponse::exit(1, "", &noise)));
    let d = dispatcher(config(PANEL), dir.path(), executor);

    let outcome = d.dispatch(options(dir.path(), &["claude"])).await.unwrap();
    let r = &outcome.reports[0];
    assert_eq!(r.error.as_ref().unwrap().len(), 500);
    // The file keeps everything.
    let stderr = std::fs::read_to_string(r.stderr_file.as_ref().unwrap()).unwrap();
    assert_eq!(stderr.len(), 5_000);
}

#[tokio::test]
async fn adapter_error_becomes_error_report_for_that_tool_only() {
    let dir = TempDir::new().unwrap();
    // `broken` is a custom tool with no binary.
    let cfg = config(&format!("{PANEL}\n[tools.broken]\n"));
    let executor = Arc::new(FakeExecutor::new());
    let d = dispatcher(cfg, dir.path(), executor.clone());

    let outcome = d
        .dispatch(options(dir.path(), &["claude", "broken", "gemini"]))
        .await
        .unwrap();

    assert_eq!(outcome.reports.len(), 3);
    let ids: Vec<&str> = outcome.reports.iter().map(|r| r.tool_id.as_str()).collect();
    assert_eq!(ids, ["claude", "broken", "gemini"]);

    let broken = report(&outcome.reports, "broken");
    assert_eq!(broken.status, ToolStatus::Error);
    assert!(broken.error.as_deref().unwrap().contains("no binary configured"));
    assert!(broken.output_file.is_none());

    assert_eq!(report(&outcome.reports, "claude").status, ToolStatus::Success);
    assert_eq!(report(&outcome.reports, "gemini").status, ToolStatus::Success);
    assert_eq!(executor.invocations().len(), 2);
}

#[tokio::test]
async fn panicking_task_is_contained() {
    let dir = TempDir::new().unwrap();
    let executor = Arc::new(FakeExecutor::new().on("fake-gemini", FakeResponse::panics()));
    let d = dispatcher(config(PANEL), dir.path(), executor);

    let outcome = d
        .dispatch(options(dir.path(), &["claude", "gemini", "aider"]))
        .await
        .unwrap();

    assert_eq!(outcome.reports.len(), 3);
    assert_eq!(report(&outcome.reports, "gemini").status, ToolStatus::Error);
    assert_eq!(report(&outcome.reports, "claude").status, ToolStatus::Success);
    assert_eq!(report(&outcome.reports, "aider").status, ToolStatus::Success);
}

#[tokio::test]
async fn path_traversal_ids_stay_inside_output_dir() {
    let dir = TempDir::new().unwrap();
    let cfg = config("[tools.\"../evil\"]\nbinary = \"fake-evil\"\n");
    let d = dispatcher(cfg, dir.path(), Arc::new(FakeExecutor::new()));

    let outcome = d.dispatch(options(dir.path(), &["../evil"])).await.unwrap();
    let out_dir = dir.path().join("out");
    let output = outcome.reports[0].output_file.clone().unwrap();

    assert_eq!(output, out_dir.join("___evil.md"));
    assert_eq!(output.parent(), Some(out_dir.as_path()));
    assert!(!dir.path().join("evil.md").exists());
}

#[tokio::test]
async fn tool_named_prompt_cannot_clobber_the_prompt_file() {
    let dir = TempDir::new().unwrap();
    let out = dir.path().join("out");
    std::fs::create_dir_all(&out).unwrap();
    std::fs::write(out.join("prompt.md"), "Review.").unwrap();

    let cfg = config(&format!("{PANEL}\n[tools.prompt]\nbinary = \"fake-prompt\"\nread_only = {{ level = \"bestEffort\" }}\n"));
    let executor = Arc::new(FakeExecutor::new());
    let d = dispatcher(cfg, dir.path(), executor.clone());

    let mut opts = options(dir.path(), &["prompt", "claude"]);
    opts.prompt_file = out.join("prompt.md");
    let outcome = d.dispatch(opts).await.unwrap();

    assert_eq!(outcome.reports.len(), 1);
    assert_eq!(outcome.reports[0].tool_id, "claude");
    assert!(outcome.warnings[0].contains("would overwrite"));
    assert!(executor.invocations_of("fake-prompt").is_empty());
    assert_eq!(std::fs::read_to_string(out.join("prompt.md")).unwrap(), "Review.");
}

// ===========================================================================
// Concurrency and progress
// ===========================================================================

fn many_tools(n: usize) -> (Arc<QuorumConfig>, Vec<String>) {
    let mut toml = String::new();
    let mut ids = Vec::new();
    for i in 0..n {
        toml.push_str(&format!("[tools.agent{i}]\nbinary = \"fake-agent{i}\"\n"));
        ids.push(format!("agent{i}"));
    }
    (config(&toml), ids)
}

#[tokio::test]
async fn concurrency_never_exceeds_max_parallel() {
    let dir = TempDir::new().unwrap();
    let (cfg, ids) = many_tools(6);
    let mut executor = FakeExecutor::new();
    for i in 0..6 {
        executor = executor.on(
            &format!("fake-agent{i}"),
            FakeResponse::ok("done").with_delay(Duration::from_millis(40)),
        );
    }
    let executor = Arc::new(executor);
    let d = dispatcher(cfg, dir.path(), executor.clone());

    let ids: Vec<&str> = ids.iter().map(String::as_str).collect();
    let outcome = d
        .dispatch(options(dir.path(), &ids).max_parallel(2))
        .await
        .unwrap();

    assert_eq!(outcome.reports.len(), 6);
    assert!(executor.max_concurrency() <= 2, "peak was {}", executor.max_concurrency());
    assert_eq!(executor.invocations().len(), 6);
}

#[tokio::test]
async fn started_precedes_completed_for_every_tool() {
    let dir = TempDir::new().unwrap();
    let events: Arc<Mutex<Vec<(String, &'static str)>>> = Arc::default();
    let sink = Arc::clone(&events);
    let d = dispatcher(config(PANEL), dir.path(), Arc::new(FakeExecutor::new())).with_observer(Arc::new(
        move |event: &ProgressEvent| {
            let kind = match event {
                ProgressEvent::Started { .. } => "started",
                ProgressEvent::Completed { .. } => "completed",
            };
            sink.lock().unwrap().push((event.tool_id().to_string(), kind));
        },
    ));

    d.dispatch(options(dir.path(), &["claude", "gemini", "aider"]))
        .await
        .unwrap();

    let events = events.lock().unwrap();
    assert_eq!(events.len(), 6);
    for id in ["claude", "gemini", "aider"] {
        let started = events.iter().position(|(t, k)| t == id && *k == "started").unwrap();
        let completed = events.iter().position(|(t, k)| t == id && *k == "completed").unwrap();
        assert!(started < completed, "{id}: started at {started}, completed at {completed}");
    }
}

#[tokio::test]
async fn cancellation_skips_queued_tools() {
    let dir = TempDir::new().unwrap();
    let (cfg, ids) = many_tools(3);
    let executor = Arc::new(
        FakeExecutor::new().on("fake-agent0", FakeResponse::ok("first").with_delay(Duration::from_millis(200))),
    );
    let cancel = CancellationToken::new();
    let d = dispatcher(cfg, dir.path(), executor.clone()).with_cancellation(cancel.clone());

    let trigger = tokio::spawn(async move {
        tokio::time::sleep(Duration::from_millis(50)).await;
        cancel.cancel();
    });

    let ids: Vec<&str> = ids.iter().map(String::as_str).collect();
    let outcome = d
        .dispatch(options(dir.path(), &ids).max_parallel(1))
        .await
        .unwrap();
    trigger.await.unwrap();

    let skipped = outcome
        .reports
        .iter()
        .filter(|r| r.status == ToolStatus::Skipped)
        .count();
    assert_eq!(outcome.reports.len(), 3);
    assert_eq!(skipped, 2);
    assert_eq!(executor.invocations().len(), 1);
}

#[tokio::test]
async fn skipped_tools_complete_without_starting() {
    let dir = TempDir::new().unwrap();
    let (cfg, ids) = many_tools(2);
    let executor = Arc::new(
        FakeExecutor::new().on("fake-agent0", FakeResponse::ok("first").with_delay(Duration::from_millis(200))),
    );
    let cancel = CancellationToken::new();
    let events: Arc<Mutex<Vec<(String, &'static str)>>> = Arc::default();
    let sink = Arc::clone(&events);
    let d = dispatcher(cfg, dir.path(), executor)
        .with_cancellation(cancel.clone())
        .with_observer(Arc::new(move |event: &ProgressEvent| {
            let kind = match event {
                ProgressEvent::Started { .. } => "started",
                ProgressEvent::Completed { .. } => "completed",
            };
            sink.lock().unwrap().push((event.tool_id().to_string(), kind));
        }));

    let trigger = tokio::spawn(async move {
        tokio::time::sleep(Duration::from_millis(50)).await;
        cancel.cancel();
    });
    let ids: Vec<&str> = ids.iter().map(String::as_str).collect();
    d.dispatch(options(dir.path(), &ids).max_parallel(1))
        .await
        .unwrap();
    trigger.await.unwrap();

    let events = events.lock().unwrap();
    let mut sequences: Vec<Vec<&'static str>> = ids
        .iter()
        .map(|id| events.iter().filter(|(t, _)| t == *id).map(|(_, k)| *k).collect())
        .collect();
    sequences.sort();
    assert_eq!(sequences, vec![vec!["completed"], vec!["started", "completed"]]);
}

/// Cancels the run from inside the pre-run snapshot, the way an interrupt
/// that kills `amp usage` would.
struct CancelDuringSnapshot {
    cancel: CancellationToken,
}

#[async_trait]
impl UsageProbe for CancelDuringSnapshot {
    async fn snapshot(&self, _binary: &str) -> Option<UsageSnapshot> {
        self.cancel.cancel();
        None
    }
}

#[tokio::test]
async fn interrupt_during_usage_snapshot_prevents_spawn() {
    let dir = TempDir::new().unwrap();
    let cancel = CancellationToken::new();
    let executor = Arc::new(FakeExecutor::new());
    let d = dispatcher(config(AMP), dir.path(), executor.clone())
        .with_cancellation(cancel.clone())
        .with_usage_probe(Arc::new(CancelDuringSnapshot { cancel }));

    let outcome = d.dispatch(options(dir.path(), &["amp"])).await.unwrap();

    assert!(executor.invocations_of("fake-amp").is_empty());
    assert_eq!(outcome.reports.len(), 1);
    assert_eq!(outcome.reports[0].status, ToolStatus::Skipped);
}

// ===========================================================================
// Cost reconciliation
// ===========================================================================

const AMP: &str = "[tools.amp]\nbinary = \"fake-amp\"\n";

#[tokio::test]
async fn amp_run_records_free_cost() {
    let dir = TempDir::new().unwrap();
    let probe = Arc::new(FakeUsageProbe::pair(snapshot(10.0, 10.0, 5.0), snapshot(9.5, 10.0, 5.0)));
    let d = dispatcher(config(AMP), dir.path(), Arc::new(FakeExecutor::new())).with_usage_probe(probe.clone());

    let outcome = d.dispatch(options(dir.path(), &["amp"])).await.unwrap();
    let r = &outcome.reports[0];
    let cost = r.cost.as_ref().unwrap();

    assert_eq!(cost.source, CostSource::Free);
    assert_eq!(cost.cost_usd, 0.5);
    assert_eq!(probe.calls(), 2);
    let stats: PathBuf = r.stats_file.clone().unwrap();
    let json: serde_json::Value = serde_json::from_str(&std::fs::read_to_string(stats).unwrap()).unwrap();
    assert_eq!(json["source"], "free");
}

#[tokio::test]
async fn amp_run_records_credit_cost() {
    let dir = TempDir::new().unwrap();
    let probe = Arc::new(FakeUsageProbe::pair(snapshot(0.0, 10.0, 20.0), snapshot(0.0, 10.0, 19.25)));
    let d = dispatcher(config(AMP), dir.path(), Arc::new(FakeExecutor::new())).with_usage_probe(probe);

    let outcome = d.dispatch(options(dir.path(), &["amp"])).await.unwrap();
    let cost = outcome.reports[0].cost.as_ref().unwrap();
    assert_eq!(cost.source, CostSource::Credits);
    assert_eq!(cost.credits_used_usd, 0.75);
}

#[tokio::test]
async fn missing_snapshot_omits_cost() {
    let dir = TempDir::new().unwrap();
    let probe = Arc::new(FakeUsageProbe::new(vec![Some(snapshot(1.0, 10.0, 0.0)), None]));
    let d = dispatcher(config(AMP), dir.path(), Arc::new(FakeExecutor::new())).with_usage_probe(probe);

    let outcome = d.dispatch(options(dir.path(), &["amp"])).await.unwrap();
    let r = &outcome.reports[0];
    assert_eq!(r.status, ToolStatus::Success);
    assert!(r.cost.is_none());
    assert!(r.stats_file.is_none());
}

#[tokio::test]
async fn usage_probe_is_only_used_for_amp() {
    let dir = TempDir::new().unwrap();
    let probe = Arc::new(FakeUsageProbe::new(vec![]));
    let d = dispatcher(config(PANEL), dir.path(), Arc::new(FakeExecutor::new())).with_usage_probe(probe.clone());

    d.dispatch(options(dir.path(), &["claude", "gemini"])).await.unwrap();
    assert_eq!(probe.calls(), 0);
}

#[tokio::test]
async fn amp_settings_are_materialised_before_execution() {
    let dir = TempDir::new().unwrap();
    let executor = Arc::new(FakeExecutor::new());
    let d = dispatcher(config(AMP), dir.path(), executor.clone());

    d.dispatch(options(dir.path(), &["amp"])).await.unwrap();

    let inv = &executor.invocations_of("fake-amp")[0];
    let settings = inv
        .args
        .iter()
        .skip_while(|a| *a != "--settings-file")
        .nth(1)
        .expect("settings flag present under bestEffort");
    assert!(Path::new(settings).is_file());
    assert!(inv.stdin.as_deref().unwrap().starts_with("Review the diff"));
}

// ===========================================================================
// Dry run
// ===========================================================================

#[tokio::test]
async fn plan_writes_nothing() {
    let dir = TempDir::new().unwrap();
    let cfg = config(&format!("{PANEL}\n{AMP}"));
    let executor = Arc::new(FakeExecutor::new());
    let d = dispatcher(cfg, dir.path(), executor.clone());

    let plan = d
        .plan(&options(dir.path(), &["claude", "gemini", "aider", "amp"]))
        .unwrap();

    assert_eq!(plan.invocations.len(), 4);
    assert!(plan.invocations.iter().all(|p| p.invocation.is_ok()));
    assert!(executor.invocations().is_empty());
    assert_eq!(std::fs::read_dir(dir.path()).unwrap().count(), 0);
}
