//! Run records and their lifecycle.

use crate::concurrency::ConcurrencyGroupKey;
use crate::event::Event;
use crate::step::StepResult;
use crate::{GateError, Result};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// Unique identifier for a run
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct RunId(pub String);

impl RunId {
    /// Generate a new random RunId
    pub fn new() -> Self {
        RunId(Uuid::new_v4().to_string())
    }
}

impl Default for RunId {
    fn default() -> Self {
        Self::new()
    }
}

impl std::fmt::Display for RunId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Status of a run.
///
/// `pending -> running -> {success, failure, cancelled}`, plus
/// `pending -> cancelled` for a run superseded before it started.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash)]
#[serde(rename_all = "snake_case")]
pub enum RunStatus {
    Pending,
    Running,
    Success,
    Failure,
    Cancelled,
}

impl RunStatus {
    pub fn is_terminal(&self) -> bool {
        matches!(self, Self::Success | Self::Failure | Self::Cancelled)
    }

    fn can_transition_to(&self, next: RunStatus) -> bool {
        matches!(
            (self, next),
            (RunStatus::Pending, RunStatus::Running)
                | (RunStatus::Pending, RunStatus::Cancelled)
                | (RunStatus::Running, RunStatus::Success)
                | (RunStatus::Running, RunStatus::Failure)
                | (RunStatus::Running, RunStatus::Cancelled)
        )
    }
}

impl std::fmt::Display for RunStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            RunStatus::Pending => write!(f, "pending"),
            RunStatus::Running => write!(f, "running"),
            RunStatus::Success => write!(f, "success"),
            RunStatus::Failure => write!(f, "failure"),
            RunStatus::Cancelled => write!(f, "cancelled"),
        }
    }
}

/// Which step failed the run, and how.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct StepFailure {
    pub step_name: String,

    /// `None` when the command never started.
    pub exit_code: Option<i32>,

    pub reason: String,
}

/// One execution of a workflow triggered by an event.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Run {
    pub id: RunId,
    pub event: Event,
    pub workflow: String,
    pub workflow_digest: String,
    pub concurrency_key: ConcurrencyGroupKey,
    pub status: RunStatus,

    /// Results of the steps that executed, in order.
    pub steps: Vec<StepResult>,

    pub failure: Option<StepFailure>,

    pub created_at: DateTime<Utc>,
    pub started_at: Option<DateTime<Utc>>,
    pub finished_at: Option<DateTime<Utc>>,
}

impl Run {
    /// Create a new pending run
    pub fn new(
        event: Event,
        workflow: impl Into<String>,
        workflow_digest: impl Into<String>,
        concurrency_key: ConcurrencyGroupKey,
    ) -> Self {
        Run {
            id: RunId::new(),
            event,
            workflow: workflow.into(),
            workflow_digest: workflow_digest.into(),
            concurrency_key,
            status: RunStatus::Pending,
            steps: Vec::new(),
            failure: None,
            created_at: Utc::now(),
            started_at: None,
            finished_at: None,
        }
    }

    fn transition(&mut self, next: RunStatus) -> Result<()> {
        if !self.status.can_transition_to(next) {
            return Err(GateError::InvalidTransition {
                from: self.status.to_string(),
                to: next.to_string(),
            });
        }
        self.status = next;
        let now = Utc::now();
        if next == RunStatus::Running {
            self.started_at = Some(now);
        } else if next.is_terminal() {
            self.finished_at = Some(now);
        }
        Ok(())
    }

    /// Transition to running
    pub fn start(&mut self) -> Result<()> {
        self.transition(RunStatus::Running)
    }

    pub fn succeed(&mut self) -> Result<()> {
        self.transition(RunStatus::Success)
    }

    pub fn fail(&mut self, failure: StepFailure) -> Result<()> {
        self.transition(RunStatus::Failure)?;
        self.failure = Some(failure);
        Ok(())
    }

    pub fn cancel(&mut self) -> Result<()> {
        self.transition(RunStatus::Cancelled)
    }

    pub fn record_step(&mut self, result: StepResult) {
        self.steps.push(result);
    }

    pub fn failed_step(&self) -> Option<&str> {
        self.failure.as_ref().map(|f| f.step_name.as_str())
    }

    /// Wall-clock duration from start to finish, if both happened.
    pub fn duration_ms(&self) -> u64 {
        match (self.started_at, self.finished_at) {
            (Some(start), Some(end)) => (end - start).num_milliseconds().max(0) as u64,
            _ => 0,
        }
    }
}
