//! `${{ name }}` placeholder expansion for concurrency groups, step
//! arguments and environment values.

use crate::event::Event;
use crate::{GateError, Result};
use std::path::Path;

/// Variables an expression may reference.
pub const KNOWN_VARIABLES: &[&str] = &[
    "workflow", "event", "branch", "head_ref", "ref", "sha", "source",
];

const OPEN: &str = "${{";
const CLOSE: &str = "}}";

#[derive(Debug, Clone, PartialEq, Eq)]
enum Segment {
    Literal(String),
    Variable(String),
}

/// A parsed expression template.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Template {
    source: String,
    segments: Vec<Segment>,
}

impl Template {
    /// Parse a template, rejecting unterminated placeholders and unknown
    /// variable names.
    pub fn parse(source: &str) -> Result<Self> {
        let mut segments = Vec::new();
        let mut rest = source;

        while let Some(start) = rest.find(OPEN) {
            if start > 0 {
                segments.push(Segment::Literal(rest[..start].to_string()));
            }
            let after_open = &rest[start + OPEN.len()..];
            let end = after_open.find(CLOSE).ok_or_else(|| GateError::Expression {
                expression: source.to_string(),
                reason: "unterminated placeholder".to_string(),
            })?;

            let name = after_open[..end].trim();
            if !KNOWN_VARIABLES.contains(&name) {
                return Err(GateError::Expression {
                    expression: source.to_string(),
                    reason: format!("unknown variable '{}'", name),
                });
            }
            segments.push(Segment::Variable(name.to_string()));
            rest = &after_open[end + CLOSE.len()..];
        }

        if !rest.is_empty() {
            segments.push(Segment::Literal(rest.to_string()));
        }

        Ok(Self {
            source: source.to_string(),
            segments,
        })
    }

    pub fn source(&self) -> &str {
        &self.source
    }

    pub fn render(&self, ctx: &ExprContext<'_>) -> String {
        let mut out = String::with_capacity(self.source.len());
        for segment in &self.segments {
            match segment {
                Segment::Literal(text) => out.push_str(text),
                Segment::Variable(name) => out.push_str(&ctx.lookup(name)),
            }
        }
        out
    }
}

/// Values available while expanding a template for one run.
#[derive(Debug, Clone, Copy)]
pub struct ExprContext<'a> {
    pub workflow: &'a str,
    pub event: &'a Event,

    /// Repository the run checks out from. Empty when unset, as it is for
    /// concurrency group keys.
    pub source: Option<&'a Path>,
}

impl<'a> ExprContext<'a> {
    pub fn new(workflow: &'a str, event: &'a Event) -> Self {
        Self {
            workflow,
            event,
            source: None,
        }
    }

    pub fn with_source(mut self, source: &'a Path) -> Self {
        self.source = Some(source);
        self
    }

    fn lookup(&self, name: &str) -> String {
        match name {
            "workflow" => self.workflow.to_string(),
            "event" => self.event.kind.as_str().to_string(),
            "branch" => self.event.branch.clone(),
            "head_ref" => self.event.head_ref.clone().unwrap_or_default(),
            "ref" => self.event.git_ref(),
            "sha" => self
                .event
                .sha
                .clone()
                .unwrap_or_else(|| self.event.git_ref()),
            "source" => self
                .source
                .map(|p| p.display().to_string())
                .unwrap_or_default(),
            _ => String::new(),
        }
    }
}

/// Parse and render in one go.
pub fn expand(source: &str, ctx: &ExprContext<'_>) -> Result<String> {
    Ok(Template::parse(source)?.render(ctx))
}
