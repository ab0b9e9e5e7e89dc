//! Event intake: trigger matching, concurrency bookkeeping and run tasks.

use crate::concurrency::{ConcurrencyCanceller, ConcurrencyGroupKey};
use crate::event::Event;
use crate::executor::StepExecutor;
use crate::expr::{ExprContext, Template};
use crate::report::{RunReport, StatusReporter};
use crate::run::{Run, RunId};
use crate::runner::StepRunner;
use crate::trigger::TriggerMatcher;
use crate::workflow::WorkflowConfig;
use crate::workspace::{default_runs_root, RunWorkspace};
use crate::{GateError, Result};
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};

/// Handle to a spawned run.
#[derive(Debug)]
pub struct RunHandle {
    pub run_id: RunId,
    pub key: ConcurrencyGroupKey,

    /// Run this one cancelled when it registered, if any.
    pub superseded: Option<RunId>,

    task: JoinHandle<Result<Run>>,
}

impl RunHandle {
    /// Wait for the run to reach a terminal state.
    pub async fn wait(self) -> Result<Run> {
        self.task
            .await
            .map_err(|e| GateError::RunTask(e.to_string()))?
    }
}

/// Turns matching events into runs, one active run per concurrency group.
pub struct Orchestrator {
    workflow: Arc<WorkflowConfig>,
    matcher: TriggerMatcher,
    group: Template,
    digest: String,
    runner: StepRunner,
    reporter: Arc<dyn StatusReporter>,
    canceller: Arc<ConcurrencyCanceller>,
    source: PathBuf,
    runs_root: PathBuf,
}

impl Orchestrator {
    /// Validate `workflow` and build an orchestrator whose runs check out
    /// from the repository at `source`.
    ///
    /// Each run executes in its own directory under [`default_runs_root`]
    /// unless [`Orchestrator::with_runs_root`] says otherwise.
    pub fn new(
        workflow: WorkflowConfig,
        executor: Arc<dyn StepExecutor>,
        reporter: Arc<dyn StatusReporter>,
        source: impl AsRef<Path>,
    ) -> Result<Self> {
        workflow.validate()?;
        let matcher = workflow.matcher()?;
        let group = workflow.group_template()?;
        let digest = workflow.digest();
        // Steps run elsewhere, so a relative source would resolve wrongly.
        let source = std::fs::canonicalize(source.as_ref())?;

        Ok(Self {
            workflow: Arc::new(workflow),
            matcher,
            group,
            digest,
            runner: StepRunner::new(executor),
            reporter,
            canceller: Arc::new(ConcurrencyCanceller::new()),
            source,
            runs_root: default_runs_root(),
        })
    }

    /// Create run directories under `root` instead.
    pub fn with_runs_root(mut self, root: impl Into<PathBuf>) -> Self {
        self.runs_root = root.into();
        self
    }

    pub fn source(&self) -> &Path {
        &self.source
    }

    pub fn runs_root(&self) -> &Path {
        &self.runs_root
    }

    pub fn workflow(&self) -> &WorkflowConfig {
        &self.workflow
    }

    pub fn canceller(&self) -> &ConcurrencyCanceller {
        &self.canceller
    }

    pub fn matches(&self, event: &Event) -> bool {
        self.matcher.matches(event)
    }

    pub fn concurrency_key(&self, event: &Event) -> ConcurrencyGroupKey {
        ConcurrencyGroupKey::new(
            self.group
                .render(&ExprContext::new(&self.workflow.name, event)),
        )
    }

    /// Start a run for `event` if it matches a trigger.
    ///
    /// Returns `Ok(None)` for unmatched events. Otherwise exactly one run is
    /// created in a fresh working directory and spawned on the current tokio
    /// runtime; an active run in the same concurrency group is signalled to
    /// cancel first. Fails only if the working directory cannot be created,
    /// in which case no run exists and nothing is cancelled.
    pub fn handle_event(&self, event: Event) -> Result<Option<RunHandle>> {
        if !self.matches(&event) {
            debug!(event = %event.kind, branch = %event.branch, "Event does not match any trigger");
            return Ok(None);
        }

        let key = self.concurrency_key(&event);
        let run = Run::new(event, self.workflow.name.clone(), self.digest.clone(), key.clone());
        let run_id = run.id.clone();

        let workspace = RunWorkspace::create(&self.source, &self.runs_root, &run_id)?;
        let registration = self.canceller.register(&key, &run_id);

        info!(
            run_id = %run_id,
            group = %key,
            digest = %&self.digest[..12],
            workspace = %workspace.path().display(),
            "Created run"
        );

        let runner = self.runner.clone();
        let workflow = Arc::clone(&self.workflow);
        let reporter = Arc::clone(&self.reporter);
        let canceller = Arc::clone(&self.canceller);
        let task_key = key.clone();
        let token = registration.token;

        let task = tokio::spawn(async move {
            let run_id = run.id.clone();
            let outcome = runner.run(run, &workflow, &workspace, &token).await;
            canceller.release(&task_key, &run_id);
            workspace.cleanup().await;

            let run = outcome?;
            if let Err(e) = reporter.report(&RunReport::from_run(&run)).await {
                warn!(run_id = %run.id, error = %e, "Failed to report run status");
            }
            Ok(run)
        });

        Ok(Some(RunHandle {
            run_id,
            key,
            superseded: registration.superseded,
            task,
        }))
    }
}
