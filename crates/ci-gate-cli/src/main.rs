//! ci-gate - CI trigger & gate CLI
//!
//! ## Commands
//!
//! - `run`: dispatch a single event and wait for its run
//! - `dispatch`: feed a JSON-lines file of events, honouring concurrency groups;
//!   each line is dispatched as soon as it is read
//! - `match`: check whether an event triggers the workflow
//! - `show`: print the resolved workflow

use anyhow::{Context, Result};
use ci_gate::{
    init_tracing, Event, EventKind, JsonLinesReporter, LogFormat, Orchestrator, ProcessExecutor,
    Run, RunHandle, RunReport, RunStatus, StatusReporter, TracingReporter, WorkflowConfig,
};
use clap::{Args, Parser, Subcommand, ValueEnum};
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tokio::io::{AsyncBufReadExt, BufReader};
use tracing::{error, info, warn, Level};

#[derive(Parser)]
#[command(name = "ci-gate")]
#[command(author = "Stevedores Org")]
#[command(version = env!("CARGO_PKG_VERSION"))]
#[command(about = "CI trigger & gate: run workflow steps for repository events", long_about = None)]
struct Cli {
    /// Enable verbose output
    #[arg(short, long, global = true)]
    verbose: bool,

    /// Emit JSON-formatted log lines
    #[arg(long, global = true)]
    json: bool,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Args, Debug, Clone)]
struct WorkflowArgs {
    /// Workflow YAML file (default: built-in Rust workflow)
    #[arg(short, long, env = "CI_GATE_WORKFLOW")]
    workflow: Option<PathBuf>,
}

#[derive(Args, Debug, Clone)]
struct EventArgs {
    /// Event kind (push, pull_request)
    #[arg(short, long)]
    event: EventKind,

    /// Pushed branch, or target branch of a pull request
    #[arg(short, long)]
    branch: String,

    /// Source branch of a pull request
    #[arg(long)]
    head_ref: Option<String>,

    /// Commit to check out
    #[arg(long)]
    sha: Option<String>,
}

impl EventArgs {
    fn to_event(&self) -> Event {
        Event {
            kind: self.event,
            branch: self.branch.clone(),
            head_ref: self.head_ref.clone(),
            sha: self.sha.clone(),
        }
    }
}

#[derive(Args, Debug, Clone)]
struct ExecArgs {
    /// Repository the runs check out from
    #[arg(long, env = "CI_GATE_SOURCE", default_value = ".")]
    source: PathBuf,

    /// Parent directory for per-run working directories (default: system temp)
    #[arg(long, env = "CI_GATE_RUNS_DIR")]
    runs_dir: Option<PathBuf>,

    /// Report format for terminal statuses
    #[arg(long, value_enum, default_value_t = ReportFormat::Text)]
    report: ReportFormat,
}

#[derive(ValueEnum, Debug, Clone, Copy, PartialEq, Eq)]
enum ReportFormat {
    /// Human-readable summary
    Text,
    /// One JSON object per run on stdout
    Json,
}

#[derive(Subcommand)]
enum Commands {
    /// Dispatch one event and wait for its run
    Run {
        #[command(flatten)]
        event: EventArgs,

        #[command(flatten)]
        workflow: WorkflowArgs,

        #[command(flatten)]
        exec: ExecArgs,
    },

    /// Dispatch a JSON-lines file of events in order and wait for all runs
    Dispatch {
        /// File with one event per line, e.g. {"kind":"push","branch":"main"}
        #[arg(long)]
        events: PathBuf,

        #[command(flatten)]
        workflow: WorkflowArgs,

        #[command(flatten)]
        exec: ExecArgs,
    },

    /// Check whether an event triggers the workflow
    Match {
        #[command(flatten)]
        event: EventArgs,

        #[command(flatten)]
        workflow: WorkflowArgs,
    },

    /// Show the resolved workflow
    Show {
        #[command(flatten)]
        workflow: WorkflowArgs,
    },
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    // Setup logging
    let level = if cli.verbose {
        Level::DEBUG
    } else {
        Level::INFO
    };
    let format = if cli.json {
        LogFormat::Json
    } else {
        LogFormat::Text
    };
    init_tracing(format, level);

    match cli.command {
        Commands::Run {
            event,
            workflow,
            exec,
        } => cmd_run(&event.to_event(), workflow.workflow.as_deref(), &exec).await,
        Commands::Dispatch {
            events,
            workflow,
            exec,
        } => cmd_dispatch(&events, workflow.workflow.as_deref(), &exec).await,
        Commands::Match { event, workflow } => {
            cmd_match(&event.to_event(), workflow.workflow.as_deref())
        }
        Commands::Show { workflow } => cmd_show(workflow.workflow.as_deref()),
    }
}

/// Load the workflow file, or the built-in Rust workflow when none is given
fn load_workflow(path: Option<&Path>) -> Result<WorkflowConfig> {
    match path {
        Some(path) => WorkflowConfig::from_file(path)
            .with_context(|| format!("Failed to load workflow: {}", path.display())),
        None => Ok(WorkflowConfig::rust_default()),
    }
}

fn build_orchestrator(workflow: WorkflowConfig, exec: &ExecArgs) -> Result<Orchestrator> {
    let reporter: Arc<dyn StatusReporter> = match exec.report {
        ReportFormat::Text => Arc::new(TracingReporter),
        ReportFormat::Json => Arc::new(JsonLinesReporter::new(std::io::stdout())),
    };
    let orchestrator = Orchestrator::new(
        workflow,
        Arc::new(ProcessExecutor::new()),
        reporter,
        &exec.source,
    )
    .with_context(|| format!("Cannot build orchestrator for {}", exec.source.display()))?;

    Ok(match &exec.runs_dir {
        Some(dir) => orchestrator.with_runs_root(dir),
        None => orchestrator,
    })
}

/// Parse one line of a JSON-lines event file; blank lines and `#` comments
/// yield `None`
fn parse_event_line(line: &str, number: usize) -> Result<Option<Event>> {
    let line = line.trim();
    if line.is_empty() || line.starts_with('#') {
        return Ok(None);
    }
    serde_json::from_str(line)
        .map(Some)
        .with_context(|| format!("Invalid event on line {}", number))
}

fn status_mark(status: RunStatus) -> &'static str {
    match status {
        RunStatus::Success => "✓ PASSED",
        RunStatus::Failure => "✗ FAILED",
        RunStatus::Cancelled => "- CANCELLED",
        RunStatus::Pending | RunStatus::Running => "… UNFINISHED",
    }
}

fn print_run(run: &Run) {
    let report = RunReport::from_run(run);
    println!("Run ID: {}", run.id);
    println!("Event: {} {}", run.event.kind, run.event.branch);
    println!("Group: {}", run.concurrency_key);
    println!("Status: {}", status_mark(run.status));
    println!("Duration: {}ms", run.duration_ms());
    println!();

    for step in &run.steps {
        let status = if step.passed() { "✓" } else { "✗" };
        println!(
            "  {} {} ({}ms, exit code: {})",
            status, step.step_name, step.duration_ms, step.exit_code
        );
    }

    if let Some(failure) = &run.failure {
        println!();
        println!("Failed step: {} ({})", failure.step_name, failure.reason);
        if let Some(result) = run.steps.last() {
            let stderr = result.stderr.trim();
            if !stderr.is_empty() {
                println!("{}", stderr);
            }
        }
    }

    println!();
    println!(
        "Summary: {}/{} steps passed",
        report.passed_count(),
        run.steps.len()
    );
}

/// Dispatch a single event and wait for its run
async fn cmd_run(event: &Event, workflow_path: Option<&Path>, exec: &ExecArgs) -> Result<()> {
    let workflow = load_workflow(workflow_path)?;
    let orchestrator = build_orchestrator(workflow, exec)?;

    let handle = orchestrator
        .handle_event(event.clone())
        .context("Failed to create run workspace")?;
    let Some(handle) = handle else {
        if exec.report == ReportFormat::Text {
            println!(
                "Event {} on '{}' does not trigger workflow '{}'",
                event.kind,
                event.branch,
                orchestrator.workflow().name
            );
        }
        return Ok(());
    };

    let run = handle.wait().await.context("Run failed to execute")?;
    if exec.report == ReportFormat::Text {
        print_run(&run);
    }

    if run.status == RunStatus::Failure {
        anyhow::bail!("CI checks failed")
    }
    Ok(())
}

/// Outcome counts across the runs of one dispatch
#[derive(Debug, Default, PartialEq, Eq)]
struct DispatchTally {
    failed: usize,
    invalid_lines: usize,
    not_started: usize,
    not_completed: usize,
}

impl DispatchTally {
    /// Count and print run results; a run that errored does not hide the rest
    fn record_results(&mut self, results: Vec<ci_gate::Result<Run>>, print: bool) {
        for result in results {
            let run = match result {
                Ok(run) => run,
                Err(e) => {
                    error!(error = %e, "Run failed to execute");
                    self.not_completed += 1;
                    continue;
                }
            };

            if run.status == RunStatus::Failure {
                self.failed += 1;
            }
            if print {
                println!(
                    "{} {} {} [{}]{}",
                    status_mark(run.status),
                    run.id,
                    run.event.kind,
                    run.concurrency_key,
                    run.failed_step()
                        .map(|s| format!(" failed at '{}'", s))
                        .unwrap_or_default()
                );
            }
        }
    }

    fn into_result(self) -> Result<()> {
        let mut problems = Vec::new();
        if self.failed > 0 {
            problems.push(format!("{} run(s) failed", self.failed));
        }
        if self.invalid_lines > 0 {
            problems.push(format!("{} invalid event line(s)", self.invalid_lines));
        }
        if self.not_started > 0 {
            problems.push(format!("{} run(s) could not start", self.not_started));
        }
        if self.not_completed > 0 {
            problems.push(format!("{} run(s) did not complete", self.not_completed));
        }

        if problems.is_empty() {
            Ok(())
        } else {
            anyhow::bail!(problems.join(", "))
        }
    }
}

/// Dispatch each event of a file as soon as its line is read, then wait for
/// all runs. A malformed line is reported and skipped.
async fn cmd_dispatch(
    events_path: &Path,
    workflow_path: Option<&Path>,
    exec: &ExecArgs,
) -> Result<()> {
    let workflow = load_workflow(workflow_path)?;
    let orchestrator = build_orchestrator(workflow, exec)?;

    let file = tokio::fs::File::open(events_path)
        .await
        .with_context(|| format!("Failed to read events: {}", events_path.display()))?;
    let mut lines = BufReader::new(file).lines();

    let mut tally = DispatchTally::default();
    let mut handles: Vec<RunHandle> = Vec::new();
    let mut number = 0usize;

    while let Some(line) = lines
        .next_line()
        .await
        .with_context(|| format!("Failed to read events: {}", events_path.display()))?
    {
        number += 1;
        let event = match parse_event_line(&line, number) {
            Ok(Some(event)) => event,
            Ok(None) => continue,
            Err(e) => {
                warn!(line = number, error = %format!("{:#}", e), "Skipping event");
                tally.invalid_lines += 1;
                continue;
            }
        };

        match orchestrator.handle_event(event.clone()) {
            Ok(Some(handle)) => handles.push(handle),
            Ok(None) => info!(event = %event.kind, branch = %event.branch, "Event skipped"),
            Err(e) => {
                error!(line = number, error = %e, "Run could not start");
                tally.not_started += 1;
            }
        }
    }

    let results = futures::future::join_all(handles.into_iter().map(RunHandle::wait)).await;
    tally.record_results(results, exec.report == ReportFormat::Text);
    tally.into_result()
}

/// Check whether an event triggers the workflow
fn cmd_match(event: &Event, workflow_path: Option<&Path>) -> Result<()> {
    let workflow = load_workflow(workflow_path)?;
    let matcher = workflow.matcher()?;

    if matcher.matches(event) {
        let group = workflow
            .group_template()?
            .render(&ci_gate::expr::ExprContext::new(&workflow.name, event));
        println!("triggered (group: {})", group);
    } else {
        println!("not triggered");
    }
    Ok(())
}

/// Print the resolved workflow
fn cmd_show(workflow_path: Option<&Path>) -> Result<()> {
    let workflow = load_workflow(workflow_path)?;

    println!("Workflow: {}", workflow.name);
    println!("Digest: {}", workflow.digest());
    println!("Concurrency group: {}", workflow.concurrency.group);

    println!("\nTriggers:");
    for rule in workflow.triggers.rules() {
        let branches = if rule.branches.is_empty() {
            "*".to_string()
        } else {
            rule.branches.join(", ")
        };
        print!("  {} -> {}", rule.event, branches);
        if !rule.branches_ignore.is_empty() {
            print!(" (ignoring {})", rule.branches_ignore.join(", "));
        }
        println!();
    }

    if !workflow.env.is_empty() {
        println!("\nEnvironment:");
        for (key, value) in &workflow.env {
            println!("  {}={}", key, value);
        }
    }

    println!("\nSteps:");
    for (i, step) in workflow.steps.iter().enumerate() {
        println!("  {}. {}: {}", i + 1, step.name, step.command_line());
    }

    Ok(())
}
