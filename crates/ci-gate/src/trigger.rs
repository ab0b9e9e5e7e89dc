//! Trigger matching: which events start a run.

use crate::event::{Event, EventKind};
use crate::{GateError, Result};
use glob::{MatchOptions, Pattern};
use serde::{Deserialize, Serialize};

/// A configured trigger rule: event kind plus branch filters.
///
/// For pull requests the filters apply to the target branch.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct TriggerRule {
    pub event: EventKind,

    /// Glob patterns; empty matches every branch.
    #[serde(default)]
    pub branches: Vec<String>,

    /// Glob patterns excluded even when `branches` matched.
    #[serde(default)]
    pub branches_ignore: Vec<String>,
}

impl TriggerRule {
    pub fn new(event: EventKind, branches: &[&str]) -> Self {
        Self {
            event,
            branches: branches.iter().map(|b| b.to_string()).collect(),
            branches_ignore: Vec::new(),
        }
    }

    pub fn ignoring(mut self, branches: &[&str]) -> Self {
        self.branches_ignore = branches.iter().map(|b| b.to_string()).collect();
        self
    }
}

const BRANCH_MATCH: MatchOptions = MatchOptions {
    case_sensitive: true,
    require_literal_separator: true,
    require_literal_leading_dot: false,
};

#[derive(Debug, Clone)]
struct CompiledRule {
    event: EventKind,
    include: Vec<Pattern>,
    exclude: Vec<Pattern>,
}

impl CompiledRule {
    fn matches(&self, event: &Event) -> bool {
        if self.event != event.kind {
            return false;
        }
        let included = self.include.is_empty()
            || self
                .include
                .iter()
                .any(|p| p.matches_with(&event.branch, BRANCH_MATCH));
        included
            && !self
                .exclude
                .iter()
                .any(|p| p.matches_with(&event.branch, BRANCH_MATCH))
    }
}

/// Decides whether an event starts a run. Pure: no side effects, no errors
/// once built.
#[derive(Debug, Clone)]
pub struct TriggerMatcher {
    rules: Vec<CompiledRule>,
}

impl TriggerMatcher {
    /// Compile trigger rules, rejecting malformed branch patterns.
    pub fn new(rules: &[TriggerRule]) -> Result<Self> {
        let rules = rules
            .iter()
            .map(|rule| {
                Ok(CompiledRule {
                    event: rule.event,
                    include: compile_patterns(&rule.branches)?,
                    exclude: compile_patterns(&rule.branches_ignore)?,
                })
            })
            .collect::<Result<Vec<_>>>()?;
        Ok(Self { rules })
    }

    /// True if any rule matches the event's kind and branch.
    pub fn matches(&self, event: &Event) -> bool {
        self.rules.iter().any(|rule| rule.matches(event))
    }
}

fn compile_patterns(patterns: &[String]) -> Result<Vec<Pattern>> {
    patterns
        .iter()
        .map(|p| {
            Pattern::new(p).map_err(|e| GateError::InvalidPattern {
                pattern: p.clone(),
                reason: e.msg.to_string(),
            })
        })
        .collect()
}
