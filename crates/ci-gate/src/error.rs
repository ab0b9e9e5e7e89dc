//! Error types for gate operations

use thiserror::Error;

#[derive(Error, Debug)]
pub enum GateError {
    #[error("Invalid workflow: {0}")]
    InvalidWorkflow(String),

    #[error("Invalid expression '{expression}': {reason}")]
    Expression { expression: String, reason: String },

    #[error("Invalid branch pattern '{pattern}': {reason}")]
    InvalidPattern { pattern: String, reason: String },

    #[error("Step '{step}' could not be started: {source}")]
    Spawn {
        step: String,
        #[source]
        source: std::io::Error,
    },

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Workflow YAML error: {0}")]
    Yaml(#[from] serde_yaml::Error),

    #[error("Serialization error: {0}")]
    Json(#[from] serde_json::Error),

    #[error("Invalid run status transition: {from} -> {to}")]
    InvalidTransition { from: String, to: String },

    #[error("Run task failed: {0}")]
    RunTask(String),
}

/// Result type for gate operations
pub type Result<T> = std::result::Result<T, GateError>;
