//! Sequential, fail-fast step execution for a single run.

use crate::concurrency::CancelToken;
use crate::executor::{StepContext, StepExecutor};
use crate::expr::{expand, ExprContext};
use crate::run::{Run, StepFailure};
use crate::step::{Step, StepResult};
use crate::workflow::WorkflowConfig;
use crate::workspace::RunWorkspace;
use crate::Result;
use std::collections::BTreeMap;
use std::sync::Arc;
use tracing::{info, warn};

/// Drives a run through its steps.
///
/// Steps run strictly in declared order. The first failing step fails the
/// run and nothing after it executes. Cancellation is observed only at step
/// boundaries: before a step starts and once it has finished.
#[derive(Clone)]
pub struct StepRunner {
    executor: Arc<dyn StepExecutor>,
}

impl StepRunner {
    pub fn new(executor: Arc<dyn StepExecutor>) -> Self {
        Self { executor }
    }

    /// Execute `workflow`'s steps for `run` inside `workspace` and return
    /// the run in a terminal state.
    pub async fn run(
        &self,
        mut run: Run,
        workflow: &WorkflowConfig,
        workspace: &RunWorkspace,
        token: &CancelToken,
    ) -> Result<Run> {
        if token.is_cancelled() {
            info!(run_id = %run.id, "Run superseded before start");
            run.cancel()?;
            return Ok(run);
        }

        run.start()?;
        info!(
            run_id = %run.id,
            workflow = %run.workflow,
            event = %run.event.kind,
            branch = %run.event.branch,
            "Starting run"
        );

        let ctx = StepContext {
            run_id: run.id.clone(),
            workspace: workspace.path().to_path_buf(),
        };
        let event = run.event.clone();
        let exprs = ExprContext::new(&workflow.name, &event).with_source(workspace.source());

        for step in &workflow.steps {
            if token.is_cancelled() {
                info!(run_id = %run.id, next_step = %step.name, "Run cancelled");
                run.cancel()?;
                return Ok(run);
            }

            info!(run_id = %run.id, step = %step.name, "Executing step");

            let outcome = match resolve_step(step, &workflow.env, &exprs) {
                Ok(resolved) => self.executor.execute(&resolved, &ctx).await,
                Err(e) => Err(e),
            };

            let result = match outcome {
                Ok(result) => result,
                Err(e) => {
                    warn!(run_id = %run.id, step = %step.name, error = %e, "Step could not execute");
                    run.record_step(StepResult {
                        step_name: step.name.clone(),
                        exit_code: -1,
                        stdout: String::new(),
                        stderr: e.to_string(),
                        duration_ms: 0,
                        success: false,
                    });
                    if token.is_cancelled() {
                        run.cancel()?;
                        return Ok(run);
                    }
                    run.fail(StepFailure {
                        step_name: step.name.clone(),
                        exit_code: None,
                        reason: e.to_string(),
                    })?;
                    return Ok(run);
                }
            };

            let passed = result.passed();
            let exit_code = result.exit_code;
            run.record_step(result);

            if token.is_cancelled() {
                info!(run_id = %run.id, step = %step.name, "Run cancelled after step");
                run.cancel()?;
                return Ok(run);
            }

            if !passed {
                warn!(run_id = %run.id, step = %step.name, exit_code, "Step failed");
                run.fail(StepFailure {
                    step_name: step.name.clone(),
                    exit_code: Some(exit_code),
                    reason: format!("Step '{}' exited with code {}", step.name, exit_code),
                })?;
                return Ok(run);
            }
        }

        run.succeed()?;
        info!(run_id = %run.id, duration_ms = run.duration_ms(), "Run succeeded");
        Ok(run)
    }
}

/// Expand placeholders and merge the workflow env under the step env.
fn resolve_step(
    step: &Step,
    workflow_env: &BTreeMap<String, String>,
    exprs: &ExprContext<'_>,
) -> Result<Step> {
    let args = step
        .args
        .iter()
        .map(|arg| expand(arg, exprs))
        .collect::<Result<Vec<_>>>()?;

    let mut env = BTreeMap::new();
    for (key, value) in workflow_env.iter().chain(step.env.iter()) {
        env.insert(key.clone(), expand(value, exprs)?);
    }

    Ok(Step {
        name: step.name.clone(),
        command: step.command.clone(),
        args,
        env,
    })
}
