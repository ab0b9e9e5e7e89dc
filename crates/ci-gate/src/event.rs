//! Repository events that may start a run.

use serde::{Deserialize, Serialize};

/// Kind of repository event.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash)]
#[serde(rename_all = "snake_case")]
pub enum EventKind {
    /// A push to a branch.
    Push,

    /// A pull request targeting a branch.
    PullRequest,
}

impl EventKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            EventKind::Push => "push",
            EventKind::PullRequest => "pull_request",
        }
    }
}

impl std::fmt::Display for EventKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

impl std::str::FromStr for EventKind {
    type Err = String;

    fn from_str(s: &str) -> std::result::Result<Self, Self::Err> {
        match s.trim().to_lowercase().as_str() {
            "push" => Ok(EventKind::Push),
            "pull_request" | "pull-request" | "pr" => Ok(EventKind::PullRequest),
            other => Err(format!("unknown event kind: {}", other)),
        }
    }
}

/// An immutable repository event.
///
/// For pushes `branch` is the pushed branch; for pull requests it is the
/// target branch and `head_ref` carries the source branch when known.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct Event {
    pub kind: EventKind,

    pub branch: String,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub head_ref: Option<String>,

    /// Commit to check out, if the host supplied one.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub sha: Option<String>,
}

impl Event {
    pub fn push(branch: impl Into<String>) -> Self {
        Self {
            kind: EventKind::Push,
            branch: branch.into(),
            head_ref: None,
            sha: None,
        }
    }

    pub fn pull_request(target: impl Into<String>, head_ref: impl Into<String>) -> Self {
        Self {
            kind: EventKind::PullRequest,
            branch: target.into(),
            head_ref: Some(head_ref.into()),
            sha: None,
        }
    }

    pub fn with_sha(mut self, sha: impl Into<String>) -> Self {
        self.sha = Some(sha.into());
        self
    }

    /// Git reference the event refers to.
    ///
    /// Pull requests resolve to their source branch so that two pull
    /// requests against the same target never share a concurrency group.
    pub fn git_ref(&self) -> String {
        match (self.kind, &self.head_ref) {
            (EventKind::PullRequest, Some(head)) => format!("refs/pull/{}", head),
            _ => format!("refs/heads/{}", self.branch),
        }
    }
}
