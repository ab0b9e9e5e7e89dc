//! Terminal status reporting for finished runs.

use crate::concurrency::ConcurrencyGroupKey;
use crate::event::Event;
use crate::run::{Run, RunId, RunStatus};
use crate::Result;
use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::io::Write;
use std::sync::Mutex;
use tracing::{info, warn};

/// Per-step line of a report.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct StepSummary {
    pub name: String,
    pub passed: bool,
    pub exit_code: i32,
    pub duration_ms: u64,
}

/// The pass/fail signal for one run, as surfaced to the host.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RunReport {
    pub run_id: RunId,
    pub workflow: String,
    pub workflow_digest: String,
    pub event: Event,
    pub concurrency_key: ConcurrencyGroupKey,
    pub status: RunStatus,

    /// Step that failed the run, if any.
    pub failed_step: Option<String>,

    pub steps: Vec<StepSummary>,
    pub duration_ms: u64,
}

impl RunReport {
    pub fn from_run(run: &Run) -> Self {
        Self {
            run_id: run.id.clone(),
            workflow: run.workflow.clone(),
            workflow_digest: run.workflow_digest.clone(),
            event: run.event.clone(),
            concurrency_key: run.concurrency_key.clone(),
            status: run.status,
            failed_step: run.failed_step().map(str::to_string),
            steps: run
                .steps
                .iter()
                .map(|s| StepSummary {
                    name: s.step_name.clone(),
                    passed: s.passed(),
                    exit_code: s.exit_code,
                    duration_ms: s.duration_ms,
                })
                .collect(),
            duration_ms: run.duration_ms(),
        }
    }

    /// Number of steps that passed.
    pub fn passed_count(&self) -> usize {
        self.steps.iter().filter(|s| s.passed).count()
    }

    pub fn verdict(&self) -> GateVerdict {
        let (passed, message) = match self.status {
            RunStatus::Success => (true, "All steps passed".to_string()),
            RunStatus::Failure => (
                false,
                format!(
                    "Failed at step '{}'",
                    self.failed_step.as_deref().unwrap_or("unknown")
                ),
            ),
            RunStatus::Cancelled => (false, "Superseded by a newer run".to_string()),
            RunStatus::Pending | RunStatus::Running => {
                (false, format!("Run not finished ({})", self.status))
            }
        };
        GateVerdict {
            status: self.status,
            passed,
            message,
        }
    }
}

/// Gate evaluation verdict.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct GateVerdict {
    pub status: RunStatus,

    /// Whether the gate passed.
    pub passed: bool,

    /// Summary message.
    pub message: String,
}

impl GateVerdict {
    /// Whether this verdict should block a merge. Cancelled runs only stop
    /// existing; they are not failures.
    pub fn blocks(&self) -> bool {
        self.status == RunStatus::Failure
    }
}

/// Receives exactly one report per terminal run.
#[async_trait]
pub trait StatusReporter: Send + Sync {
    async fn report(&self, report: &RunReport) -> Result<()>;
}

/// Emits each report as a structured tracing event.
#[derive(Debug, Default, Clone)]
pub struct TracingReporter;

#[async_trait]
impl StatusReporter for TracingReporter {
    async fn report(&self, report: &RunReport) -> Result<()> {
        let verdict = report.verdict();
        if verdict.blocks() {
            warn!(
                run_id = %report.run_id,
                status = %report.status,
                failed_step = report.failed_step.as_deref().unwrap_or(""),
                "{}",
                verdict.message
            );
        } else {
            info!(
                run_id = %report.run_id,
                status = %report.status,
                passed = report.passed_count(),
                "{}",
                verdict.message
            );
        }
        Ok(())
    }
}

/// Writes each report as one JSON line.
pub struct JsonLinesReporter<W> {
    sink: Mutex<W>,
}

impl<W: Write + Send> JsonLinesReporter<W> {
    pub fn new(sink: W) -> Self {
        Self {
            sink: Mutex::new(sink),
        }
    }

    pub fn into_inner(self) -> W {
        self.sink
            .into_inner()
            .unwrap_or_else(std::sync::PoisonError::into_inner)
    }
}

#[async_trait]
impl<W: Write + Send> StatusReporter for JsonLinesReporter<W> {
    async fn report(&self, report: &RunReport) -> Result<()> {
        let line = serde_json::to_string(report)?;
        let mut sink = self
            .sink
            .lock()
            .unwrap_or_else(std::sync::PoisonError::into_inner);
        writeln!(sink, "{}", line)?;
        sink.flush()?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::run::StepFailure;
    use crate::step::StepResult;

    fn step(name: &str, exit_code: i32) -> StepResult {
        StepResult {
            step_name: name.to_string(),
            exit_code,
            stdout: String::new(),
            stderr: String::new(),
            duration_ms: 10,
            success: exit_code == 0,
        }
    }

    fn finished_run(fail_at: Option<&str>) -> Run {
        let mut run = Run::new(
            Event::push("main"),
            "CI",
            "digest",
            ConcurrencyGroupKey::new("CI-refs/heads/main"),
        );
        run.start().expect("start");
        run.record_step(step("fmt", 0));
        match fail_at {
            Some(name) => {
                run.record_step(step(name, 101));
                run.fail(StepFailure {
                    step_name: name.to_string(),
                    exit_code: Some(101),
                    reason: "exited with code 101".to_string(),
                })
                .expect("fail");
            }
            None => {
                run.record_step(step("test", 0));
                run.succeed().expect("succeed");
            }
        }
        run
    }

    #[test]
    fn test_success_verdict() {
        let report = RunReport::from_run(&finished_run(None));
        assert_eq!(report.passed_count(), 2);
        let verdict = report.verdict();
        assert!(verdict.passed);
        assert!(!verdict.blocks());
    }

    #[test]
    fn test_failure_verdict_names_step() {
        let report = RunReport::from_run(&finished_run(Some("clippy")));
        assert_eq!(report.failed_step.as_deref(), Some("clippy"));
        let verdict = report.verdict();
        assert!(!verdict.passed);
        assert!(verdict.blocks());
        assert!(verdict.message.contains("clippy"));
    }

    #[test]
    fn test_cancelled_does_not_block() {
        let mut run = Run::new(
            Event::push("main"),
            "CI",
            "digest",
            ConcurrencyGroupKey::new("k"),
        );
        run.cancel().expect("cancel");
        let verdict = RunReport::from_run(&run).verdict();
        assert!(!verdict.passed);
        assert!(!verdict.blocks());
    }

    #[tokio::test]
    async fn test_json_lines_reporter() {
        let reporter = JsonLinesReporter::new(Vec::new());
        reporter
            .report(&RunReport::from_run(&finished_run(None)))
            .await
            .expect("report");
        reporter
            .report(&RunReport::from_run(&finished_run(Some("test"))))
            .await
            .expect("report");

        let out = String::from_utf8(reporter.into_inner()).expect("utf8");
        let lines: Vec<serde_json::Value> = out
            .lines()
            .map(|l| serde_json::from_str(l).expect("json line"))
            .collect();
        assert_eq!(lines.len(), 2);
        assert_eq!(lines[0]["status"], "success");
        assert_eq!(lines[1]["status"], "failure");
        assert_eq!(lines[1]["failed_step"], "test");
        assert_eq!(lines[1]["concurrency_key"], "CI-refs/heads/main");
    }
}
