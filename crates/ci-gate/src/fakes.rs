//! In-memory fakes for the executor and reporter seams (testing only)
//!
//! `ScriptedExecutor` returns programmed outcomes without spawning
//! processes and can park a step until the test releases it.
//! `MemoryReporter` collects every report it receives.

use std::collections::{HashMap, HashSet};
use std::sync::{Mutex, MutexGuard, PoisonError};

use async_trait::async_trait;
use tokio::sync::oneshot;

use crate::executor::{StepContext, StepExecutor};
use crate::report::{RunReport, StatusReporter};
use crate::run::RunId;
use crate::step::{Step, StepResult};
use crate::{GateError, Result};

fn lock<T>(m: &Mutex<T>) -> MutexGuard<'_, T> {
    m.lock().unwrap_or_else(PoisonError::into_inner)
}

// ---------------------------------------------------------------------------
// ScriptedExecutor
// ---------------------------------------------------------------------------

/// A step invocation seen by [`ScriptedExecutor`].
#[derive(Debug, Clone)]
pub struct ExecutedStep {
    pub run_id: RunId,
    pub step: Step,
}

#[derive(Debug)]
struct PendingHold {
    entered: oneshot::Sender<RunId>,
    release: oneshot::Receiver<()>,
}

/// Test-side control of a parked step.
#[derive(Debug)]
pub struct StepHold {
    entered: oneshot::Receiver<RunId>,
    release: oneshot::Sender<()>,
}

impl StepHold {
    /// Wait until some run enters the held step; returns that run's id.
    pub async fn entered(&mut self) -> Option<RunId> {
        (&mut self.entered).await.ok()
    }

    /// Let the parked step finish.
    pub fn release(self) {
        let _ = self.release.send(());
    }
}

/// Executor with programmed outcomes. Unscripted steps succeed.
#[derive(Debug, Default)]
pub struct ScriptedExecutor {
    exit_codes: Mutex<HashMap<String, i32>>,
    spawn_failures: Mutex<HashSet<String>>,
    holds: Mutex<HashMap<String, PendingHold>>,
    calls: Mutex<Vec<ExecutedStep>>,
}

impl ScriptedExecutor {
    pub fn new() -> Self {
        Self::default()
    }

    /// Make every invocation of `step` exit with `exit_code`.
    pub fn fail_step(self, step: &str, exit_code: i32) -> Self {
        lock(&self.exit_codes).insert(step.to_string(), exit_code);
        self
    }

    /// Make every invocation of `step` fail to start.
    pub fn fail_to_spawn(self, step: &str) -> Self {
        lock(&self.spawn_failures).insert(step.to_string());
        self
    }

    /// Park the next invocation of `step` until the returned hold is
    /// released (or dropped).
    pub fn hold_step(&self, step: &str) -> StepHold {
        let (entered_tx, entered_rx) = oneshot::channel();
        let (release_tx, release_rx) = oneshot::channel();
        lock(&self.holds).insert(
            step.to_string(),
            PendingHold {
                entered: entered_tx,
                release: release_rx,
            },
        );
        StepHold {
            entered: entered_rx,
            release: release_tx,
        }
    }

    pub fn calls(&self) -> Vec<ExecutedStep> {
        lock(&self.calls).clone()
    }

    /// Names of the steps executed for `run_id`, in order.
    pub fn executed_steps(&self, run_id: &RunId) -> Vec<String> {
        lock(&self.calls)
            .iter()
            .filter(|c| &c.run_id == run_id)
            .map(|c| c.step.name.clone())
            .collect()
    }
}

#[async_trait]
impl StepExecutor for ScriptedExecutor {
    async fn execute(&self, step: &Step, ctx: &StepContext) -> Result<StepResult> {
        lock(&self.calls).push(ExecutedStep {
            run_id: ctx.run_id.clone(),
            step: step.clone(),
        });

        let hold = lock(&self.holds).remove(&step.name);
        if let Some(hold) = hold {
            let _ = hold.entered.send(ctx.run_id.clone());
            let _ = hold.release.await;
        }

        if lock(&self.spawn_failures).contains(&step.name) {
            return Err(GateError::Spawn {
                step: step.name.clone(),
                source: std::io::Error::new(std::io::ErrorKind::NotFound, "scripted spawn failure"),
            });
        }

        let exit_code = lock(&self.exit_codes).get(&step.name).copied().unwrap_or(0);
        Ok(StepResult {
            step_name: step.name.clone(),
            exit_code,
            stdout: String::new(),
            stderr: if exit_code == 0 {
                String::new()
            } else {
                format!("{} failed", step.name)
            },
            duration_ms: 0,
            success: exit_code == 0,
        })
    }
}

// ---------------------------------------------------------------------------
// MemoryReporter
// ---------------------------------------------------------------------------

/// Collects reports in arrival order.
#[derive(Debug, Default)]
pub struct MemoryReporter {
    reports: Mutex<Vec<RunReport>>,
}

impl MemoryReporter {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn reports(&self) -> Vec<RunReport> {
        lock(&self.reports).clone()
    }

    pub fn report_for(&self, run_id: &RunId) -> Option<RunReport> {
        lock(&self.reports)
            .iter()
            .find(|r| &r.run_id == run_id)
            .cloned()
    }
}

#[async_trait]
impl StatusReporter for MemoryReporter {
    async fn report(&self, report: &RunReport) -> Result<()> {
        lock(&self.reports).push(report.clone());
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::path::PathBuf;

    fn ctx() -> StepContext {
        StepContext {
            run_id: RunId::new(),
            workspace: PathBuf::from("."),
        }
    }

    #[tokio::test]
    async fn test_unscripted_steps_pass() {
        let exec = ScriptedExecutor::new();
        let ctx = ctx();
        let result = exec
            .execute(&Step::custom("fmt", "cargo", &["fmt"]), &ctx)
            .await
            .expect("execute");
        assert!(result.passed());
        assert_eq!(exec.executed_steps(&ctx.run_id), vec!["fmt".to_string()]);
    }

    #[tokio::test]
    async fn test_scripted_failure_and_spawn_error() {
        let exec = ScriptedExecutor::new()
            .fail_step("clippy", 101)
            .fail_to_spawn("missing");
        let ctx = ctx();

        let result = exec
            .execute(&Step::custom("clippy", "cargo", &["clippy"]), &ctx)
            .await
            .expect("execute");
        assert_eq!(result.exit_code, 101);
        assert!(!result.passed());

        let err = exec
            .execute(&Step::custom("missing", "nope", &[]), &ctx)
            .await
            .unwrap_err();
        assert!(matches!(err, GateError::Spawn { .. }));
    }

    #[tokio::test]
    async fn test_hold_parks_step_until_released() {
        let exec = std::sync::Arc::new(ScriptedExecutor::new());
        let mut hold = exec.hold_step("test");
        let ctx = ctx();
        let expected = ctx.run_id.clone();

        let task = {
            let exec = exec.clone();
            tokio::spawn(async move {
                exec.execute(&Step::custom("test", "cargo", &["test"]), &ctx)
                    .await
            })
        };

        assert_eq!(hold.entered().await, Some(expected));
        assert!(!task.is_finished());
        hold.release();

        let result = task.await.expect("join").expect("execute");
        assert!(result.passed());
    }
}
