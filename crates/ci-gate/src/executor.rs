//! Step execution.

use crate::run::RunId;
use crate::step::{Step, StepResult};
use crate::{GateError, Result};
use async_trait::async_trait;
use std::path::PathBuf;
use std::process::Stdio;
use std::time::Instant;
use tokio::process::Command;
use tracing::debug;

/// Where and for which run a step executes.
#[derive(Debug, Clone)]
pub struct StepContext {
    pub run_id: RunId,

    /// The run's private directory. Shared by every step of that run only,
    /// so each step sees the state the previous one left behind.
    pub workspace: PathBuf,
}

/// Executes one step to completion.
///
/// `step` arrives fully resolved: placeholders expanded and the workflow
/// env merged into `step.env`.
#[async_trait]
pub trait StepExecutor: Send + Sync {
    async fn execute(&self, step: &Step, ctx: &StepContext) -> Result<StepResult>;
}

/// Runs steps as child processes in the run's workspace.
#[derive(Debug, Default, Clone)]
pub struct ProcessExecutor;

impl ProcessExecutor {
    pub fn new() -> Self {
        Self
    }
}

#[async_trait]
impl StepExecutor for ProcessExecutor {
    async fn execute(&self, step: &Step, ctx: &StepContext) -> Result<StepResult> {
        let start = Instant::now();

        debug!(run_id = %ctx.run_id, step = %step.name, command = %step.command_line(), "Spawning step");

        let child = Command::new(&step.command)
            .args(&step.args)
            .envs(&step.env)
            .current_dir(&ctx.workspace)
            .stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .kill_on_drop(true)
            .spawn()
            .map_err(|source| GateError::Spawn {
                step: step.name.clone(),
                source,
            })?;

        let output = child.wait_with_output().await?;

        let duration_ms = start.elapsed().as_millis() as u64;
        let exit_code = output.status.code().unwrap_or(-1);
        let stdout = String::from_utf8_lossy(&output.stdout).to_string();
        let stderr = String::from_utf8_lossy(&output.stderr).to_string();

        Ok(StepResult {
            step_name: step.name.clone(),
            exit_code,
            stdout,
            stderr,
            duration_ms,
            success: output.status.success(),
        })
    }
}
