//! Integration tests for the orchestrator with real child processes.

use ci_gate::fakes::MemoryReporter;
use ci_gate::workflow::{BranchFilter, ConcurrencyConfig, Triggers};
use ci_gate::{
    BuiltinStep, Event, Orchestrator, ProcessExecutor, RunHandle, RunStatus, Step, StepExecutor,
    WorkflowConfig,
};
use std::collections::BTreeMap;
use std::path::{Path, PathBuf};
use std::process::Command;
use std::sync::Arc;
use std::time::Duration;

fn workflow(steps: Vec<Step>) -> WorkflowConfig {
    let mut env = BTreeMap::new();
    env.insert("CARGO_TERM_COLOR".to_string(), "always".to_string());
    env.insert("CARGO_INCREMENTAL".to_string(), "0".to_string());

    WorkflowConfig {
        name: "CI".to_string(),
        triggers: Triggers {
            push: Some(BranchFilter::only(&["main"])),
            pull_request: Some(BranchFilter::only(&["main"])),
        },
        concurrency: ConcurrencyConfig::default(),
        env,
        steps,
    }
}

/// Orchestrator checking out from `dir`, with run directories in `dir/runs`.
fn orchestrator(steps: Vec<Step>, dir: &Path) -> (Orchestrator, Arc<MemoryReporter>) {
    let reporter = Arc::new(MemoryReporter::new());
    let executor: Arc<dyn StepExecutor> = Arc::new(ProcessExecutor::new());
    let orchestrator = Orchestrator::new(workflow(steps), executor, reporter.clone(), dir)
        .expect("valid workflow")
        .with_runs_root(dir.join("runs"));
    (orchestrator, reporter)
}

fn dispatch(orchestrator: &Orchestrator, event: Event) -> RunHandle {
    orchestrator
        .handle_event(event)
        .expect("run workspace created")
        .expect("event triggers the workflow")
}

fn run_git(dir: &Path, args: &[&str]) -> String {
    let output = Command::new("git")
        .args(args)
        .current_dir(dir)
        .output()
        .expect("git runs");
    assert!(
        output.status.success(),
        "git {:?} failed: {}",
        args,
        String::from_utf8_lossy(&output.stderr)
    );
    String::from_utf8_lossy(&output.stdout).trim().to_string()
}

fn fixture(name: &str) -> PathBuf {
    PathBuf::from(env!("CARGO_MANIFEST_DIR"))
        .join("tests")
        .join("fixtures")
        .join(name)
}

/// Test: successful pipeline execution (both steps pass)
#[tokio::test]
async fn test_successful_pipeline() {
    let dir = tempfile::tempdir().expect("tempdir");
    let (orchestrator, reporter) = orchestrator(
        vec![
            Step::custom("echo_test", "echo", &["hello"]),
            Step::custom("echo_test2", "echo", &["world"]),
        ],
        dir.path(),
    );

    let run = dispatch(&orchestrator, Event::push("main"))
        .wait()
        .await
        .expect("run completes");

    assert_eq!(run.status, RunStatus::Success);
    assert_eq!(run.steps.len(), 2);
    assert!(run.steps[0].stdout.contains("hello"));
    assert!(run.failure.is_none());

    let reports = reporter.reports();
    assert_eq!(reports.len(), 1, "exactly one terminal report per run");
    assert_eq!(reports[0].status, RunStatus::Success);
    assert_eq!(reports[0].run_id, run.id);
}

/// Test: failing step aborts the run and later steps never execute
#[tokio::test]
async fn test_failed_step_stops_pipeline() {
    let dir = tempfile::tempdir().expect("tempdir");
    let (orchestrator, reporter) = orchestrator(
        vec![
            Step::custom("ok", "true", &[]),
            Step::custom("lint", "sh", &["-c", "echo 'warning: unused' >&2; exit 101"]),
            Step::custom("after", "touch", &["${{ source }}/after"]),
        ],
        dir.path(),
    );

    let run = dispatch(&orchestrator, Event::pull_request("main", "topic"))
        .wait()
        .await
        .expect("run completes");

    assert_eq!(run.status, RunStatus::Failure);
    assert_eq!(run.failed_step(), Some("lint"));
    assert_eq!(run.steps.len(), 2);
    assert_eq!(run.steps[1].exit_code, 101);
    assert!(run.steps[1].stderr.contains("warning"));
    assert!(!dir.path().join("after").exists(), "step after failure must not run");

    let report = reporter.report_for(&run.id).expect("reported");
    assert!(report.verdict().blocks());
}

/// Test: each step sees the workspace state left by the previous one
#[tokio::test]
async fn test_steps_share_workspace_state() {
    let dir = tempfile::tempdir().expect("tempdir");
    let (orchestrator, _) = orchestrator(
        vec![
            Step::custom("write", "sh", &["-c", "echo built > artifact"]),
            Step::custom("read", "grep", &["-q", "built", "artifact"]),
        ],
        dir.path(),
    );

    let run = dispatch(&orchestrator, Event::push("main"))
        .wait()
        .await
        .expect("run completes");

    assert_eq!(run.status, RunStatus::Success);
}

/// Test: runs in different concurrency groups overlap without seeing each
/// other's files, and their directories are removed afterwards
#[tokio::test]
async fn test_concurrent_groups_have_isolated_workspaces() {
    let dir = tempfile::tempdir().expect("tempdir");
    let (orchestrator, reporter) = orchestrator(
        vec![
            Step::custom(
                "write",
                "sh",
                &["-c", "echo \"$1\" > state; sleep 0.3", "sh", "${{ event }}"],
            ),
            Step::custom("test", "sh", &["-c", "grep -qx \"$1\" state", "sh", "${{ event }}"]),
        ],
        dir.path(),
    );

    let push = dispatch(&orchestrator, Event::push("main"));
    tokio::time::sleep(Duration::from_millis(100)).await;
    let pr = dispatch(&orchestrator, Event::pull_request("main", "topic"));
    assert_ne!(push.key, pr.key);
    assert!(pr.superseded.is_none());

    let push_run = push.wait().await.expect("push run completes");
    let pr_run = pr.wait().await.expect("pr run completes");

    assert_eq!(
        push_run.status,
        RunStatus::Success,
        "push run saw foreign state: {:?}",
        push_run.failure
    );
    assert_eq!(pr_run.status, RunStatus::Success, "{:?}", pr_run.failure);
    assert_eq!(reporter.reports().len(), 2);

    assert!(!dir.path().join("state").exists(), "source is never a working directory");
    let leftover = std::fs::read_dir(dir.path().join("runs"))
        .expect("runs root exists")
        .count();
    assert_eq!(leftover, 0, "run directories are removed once terminal");
}

/// Test: the built-in checkout step fetches the event's commit from the
/// source repository into the empty run directory
#[tokio::test]
async fn test_builtin_checkout_populates_run_directory() {
    let repo = tempfile::tempdir().expect("tempdir");
    run_git(repo.path(), &["init", "--quiet"]);
    run_git(repo.path(), &["config", "user.name", "test-user"]);
    run_git(repo.path(), &["config", "user.email", "test@example.com"]);
    std::fs::write(repo.path().join("Cargo.toml"), "[package]\n").expect("write");
    run_git(repo.path(), &["add", "Cargo.toml"]);
    run_git(repo.path(), &["commit", "--quiet", "-m", "initial"]);
    let sha = run_git(repo.path(), &["rev-parse", "HEAD"]);

    let runs = tempfile::tempdir().expect("tempdir");
    let reporter = Arc::new(MemoryReporter::new());
    let executor: Arc<dyn StepExecutor> = Arc::new(ProcessExecutor::new());
    let orchestrator = Orchestrator::new(
        workflow(vec![
            Step::from_builtin(BuiltinStep::Checkout),
            Step::custom("head", "git", &["rev-parse", "HEAD"]),
            Step::custom("manifest", "test", &["-f", "Cargo.toml"]),
        ]),
        executor,
        reporter,
        repo.path(),
    )
    .expect("valid workflow")
    .with_runs_root(runs.path());

    let run = dispatch(&orchestrator, Event::push("main").with_sha(&sha))
        .wait()
        .await
        .expect("run completes");

    assert_eq!(run.status, RunStatus::Success, "{:?}", run.steps);
    assert_eq!(run.steps[1].stdout.trim(), sha);
}

/// Test: workflow env and expanded arguments reach the process
#[tokio::test]
async fn test_env_and_expressions_passed_through() {
    let dir = tempfile::tempdir().expect("tempdir");
    let (orchestrator, _) = orchestrator(
        vec![Step::custom(
            "env",
            "sh",
            &[
                "-c",
                "test \"$CARGO_TERM_COLOR\" = always && test \"$CARGO_INCREMENTAL\" = 0 && test \"$1\" = abc123",
                "sh",
                "${{ sha }}",
            ],
        )],
        dir.path(),
    );

    let run = dispatch(&orchestrator, Event::push("main").with_sha("abc123"))
        .wait()
        .await
        .expect("run completes");

    assert_eq!(run.status, RunStatus::Success, "stderr: {}", run.steps[0].stderr);
}

/// Test: a command that cannot be spawned fails the run at that step
#[tokio::test]
async fn test_missing_command_fails_run() {
    let dir = tempfile::tempdir().expect("tempdir");
    let (orchestrator, _) = orchestrator(
        vec![
            Step::custom("missing", "ci-gate-no-such-binary", &[]),
            Step::custom("after", "touch", &["${{ source }}/after"]),
        ],
        dir.path(),
    );

    let run = dispatch(&orchestrator, Event::push("main"))
        .wait()
        .await
        .expect("run completes");

    assert_eq!(run.status, RunStatus::Failure);
    let failure = run.failure.expect("failure recorded");
    assert_eq!(failure.step_name, "missing");
    assert_eq!(failure.exit_code, None);
    assert!(!dir.path().join("after").exists());
}

/// Test: unmatched events create no run and report nothing
#[tokio::test]
async fn test_unmatched_event_creates_no_run() {
    let dir = tempfile::tempdir().expect("tempdir");
    let (orchestrator, reporter) = orchestrator(
        vec![Step::custom("touch", "touch", &["${{ source }}/ran"])],
        dir.path(),
    );

    for event in [Event::push("develop"), Event::pull_request("develop", "main")] {
        let handle = orchestrator.handle_event(event).expect("no workspace needed");
        assert!(handle.is_none());
    }

    tokio::task::yield_now().await;
    assert!(reporter.reports().is_empty());
    assert_eq!(orchestrator.canceller().active_count(), 0);
    assert!(!dir.path().join("ran").exists());
    assert!(!dir.path().join("runs").exists(), "no run directory created");
}

/// Test: the YAML fixture describes the built-in Rust workflow
#[test]
fn test_fixture_matches_builtin_workflow() {
    let loaded = WorkflowConfig::from_file(&fixture("ci.yml")).expect("fixture loads");
    let builtin = WorkflowConfig::rust_default();

    assert_eq!(loaded, builtin);
    assert_eq!(loaded.digest(), builtin.digest());
}

/// Test: invalid workflows are rejected before any run
#[test]
fn test_invalid_workflow_rejected() {
    let dir = tempfile::tempdir().expect("tempdir");
    let executor: Arc<dyn StepExecutor> = Arc::new(ProcessExecutor::new());
    let result = Orchestrator::new(
        workflow(vec![]),
        executor,
        Arc::new(MemoryReporter::new()),
        dir.path(),
    );
    assert!(result.is_err());
}
