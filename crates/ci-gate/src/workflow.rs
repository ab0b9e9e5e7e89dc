//! Workflow configuration: triggers, concurrency group, env and steps.
//!
//! Workflows are defined in YAML:
//!
//! ```yaml
//! name: CI
//! on:
//!   push: { branches: [main] }
//!   pull_request: { branches: [main] }
//! concurrency:
//!   group: "${{ workflow }}-${{ ref }}"
//! env:
//!   CARGO_TERM_COLOR: always
//! steps:
//!   - name: test
//!     command: cargo
//!     args: [test]
//! ```

use crate::event::EventKind;
use crate::expr::Template;
use crate::step::{BuiltinStep, Step};
use crate::trigger::{TriggerMatcher, TriggerRule};
use crate::{GateError, Result};
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use std::collections::{BTreeMap, HashSet};
use std::path::Path;

/// Default concurrency group: one active run per workflow and ref.
pub const DEFAULT_GROUP: &str = "${{ workflow }}-${{ ref }}";

/// Branch filters for one event kind.
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq, Eq)]
pub struct BranchFilter {
    #[serde(default)]
    pub branches: Vec<String>,

    #[serde(default, rename = "branches-ignore", alias = "branches_ignore")]
    pub branches_ignore: Vec<String>,
}

impl BranchFilter {
    pub fn only(branches: &[&str]) -> Self {
        Self {
            branches: branches.iter().map(|b| b.to_string()).collect(),
            branches_ignore: Vec::new(),
        }
    }
}

/// The `on:` block.
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq, Eq)]
pub struct Triggers {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub push: Option<BranchFilter>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub pull_request: Option<BranchFilter>,
}

impl Triggers {
    pub fn rules(&self) -> Vec<TriggerRule> {
        [
            (EventKind::Push, &self.push),
            (EventKind::PullRequest, &self.pull_request),
        ]
        .into_iter()
        .filter_map(|(event, filter)| {
            filter.as_ref().map(|f| TriggerRule {
                event,
                branches: f.branches.clone(),
                branches_ignore: f.branches_ignore.clone(),
            })
        })
        .collect()
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct ConcurrencyConfig {
    pub group: String,
}

impl Default for ConcurrencyConfig {
    fn default() -> Self {
        Self {
            group: DEFAULT_GROUP.to_string(),
        }
    }
}

/// A complete workflow definition.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct WorkflowConfig {
    pub name: String,

    #[serde(rename = "on")]
    pub triggers: Triggers,

    #[serde(default)]
    pub concurrency: ConcurrencyConfig,

    /// Applied uniformly to every step.
    #[serde(default)]
    pub env: BTreeMap<String, String>,

    /// Executed in declared order.
    pub steps: Vec<Step>,
}

impl WorkflowConfig {
    /// Load and validate a workflow from a YAML file.
    pub fn from_file(path: &Path) -> Result<Self> {
        let content = std::fs::read_to_string(path)?;
        Self::from_yaml(&content)
    }

    /// Parse and validate a workflow from YAML content.
    pub fn from_yaml(content: &str) -> Result<Self> {
        let workflow: Self = serde_yaml::from_str(content)?;
        workflow.validate()?;
        Ok(workflow)
    }

    pub fn to_yaml(&self) -> Result<String> {
        Ok(serde_yaml::to_string(self)?)
    }

    /// The built-in Rust workflow: push or pull request to `main`, six steps.
    pub fn rust_default() -> Self {
        let env = [("CARGO_TERM_COLOR", "always"), ("CARGO_INCREMENTAL", "0")]
            .into_iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect();

        Self {
            name: "CI".to_string(),
            triggers: Triggers {
                push: Some(BranchFilter::only(&["main"])),
                pull_request: Some(BranchFilter::only(&["main"])),
            },
            concurrency: ConcurrencyConfig::default(),
            env,
            steps: BuiltinStep::ALL.iter().copied().map(Step::from_builtin).collect(),
        }
    }

    /// Validate the workflow definition
    pub fn validate(&self) -> Result<()> {
        if self.name.trim().is_empty() {
            return Err(invalid("workflow name cannot be empty"));
        }
        if self.steps.is_empty() {
            return Err(invalid("workflow must have at least one step"));
        }
        if self.triggers.rules().is_empty() {
            return Err(invalid("workflow must have at least one trigger"));
        }

        let mut seen = HashSet::new();
        for (i, step) in self.steps.iter().enumerate() {
            if step.name.trim().is_empty() {
                return Err(invalid(format!("step {} has an empty name", i)));
            }
            if !seen.insert(step.name.as_str()) {
                return Err(invalid(format!("duplicate step name '{}'", step.name)));
            }
            if step.command.trim().is_empty() {
                return Err(invalid(format!("step '{}' has an empty command", step.name)));
            }
            for value in step.args.iter().chain(step.env.values()) {
                Template::parse(value)?;
            }
        }

        for value in self.env.values() {
            Template::parse(value)?;
        }
        Template::parse(&self.concurrency.group)?;
        self.matcher()?;

        Ok(())
    }

    pub fn matcher(&self) -> Result<TriggerMatcher> {
        TriggerMatcher::new(&self.triggers.rules())
    }

    pub fn group_template(&self) -> Result<Template> {
        Template::parse(&self.concurrency.group)
    }

    /// Deterministic digest of the ordered step list.
    pub fn digest(&self) -> String {
        compute_steps_digest(&self.steps)
    }
}

fn invalid(msg: impl Into<String>) -> GateError {
    GateError::InvalidWorkflow(msg.into())
}

/// Compute deterministic digest of ordered steps (name, command, args).
pub fn compute_steps_digest(steps: &[Step]) -> String {
    let mut hasher = Sha256::new();
    for step in steps {
        hasher.update(step.name.as_bytes());
        hasher.update(b"\0");
        hasher.update(step.command.as_bytes());
        for arg in &step.args {
            hasher.update(b"\x1f");
            hasher.update(arg.as_bytes());
        }
        hasher.update(b"\n");
    }
    hex::encode(hasher.finalize())
}
