//! ci-gate - CI trigger & gate
//!
//! Reacts to repository events and runs a workflow's steps:
//! - Matches push / pull request events against the workflow's triggers
//! - Keeps at most one active run per concurrency group, cancelling the
//!   superseded run at its next step boundary
//! - Executes steps in declared order, in a working directory private to
//!   the run, and fails the run on the first failing step
//! - Reports one terminal status per run

pub mod concurrency;
pub mod error;
pub mod event;
pub mod executor;
pub mod expr;
pub mod fakes;
pub mod orchestrator;
pub mod report;
pub mod run;
pub mod runner;
pub mod step;
pub mod telemetry;
pub mod trigger;
pub mod workflow;
pub mod workspace;

// Re-export key types
pub use concurrency::{CancelToken, ConcurrencyCanceller, ConcurrencyGroupKey, Registration};
pub use error::{GateError, Result};
pub use event::{Event, EventKind};
pub use executor::{ProcessExecutor, StepContext, StepExecutor};
pub use orchestrator::{Orchestrator, RunHandle};
pub use report::{GateVerdict, JsonLinesReporter, RunReport, StatusReporter, TracingReporter};
pub use run::{Run, RunId, RunStatus, StepFailure};
pub use runner::StepRunner;
pub use step::{BuiltinStep, Step, StepResult};
pub use telemetry::{init_tracing, LogFormat};
pub use trigger::{TriggerMatcher, TriggerRule};
pub use workflow::WorkflowConfig;
pub use workspace::RunWorkspace;
