//! Step definitions and results.

use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

/// Compilation target installed alongside the toolchain.
pub const WASM_TARGET: &str = "wasm32-unknown-unknown";

/// Populates the empty run directory with `$2` fetched from repository `$1`.
const CHECKOUT_SCRIPT: &str = concat!(
    "git init --quiet && git fetch --quiet \"$1\" \"$2\" ",
    "&& git checkout --quiet --detach FETCH_HEAD"
);

/// Builtin steps of the default Rust workflow, in declared order.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash)]
#[serde(rename_all = "snake_case")]
pub enum BuiltinStep {
    /// git init + fetch <sha> from the source repository + detached checkout
    Checkout,

    /// rustup toolchain install stable with targets and components
    InstallToolchain,

    /// rustup component add rust-src
    AddComponent,

    /// cargo fmt --all -- --check
    FormatCheck,

    /// cargo clippy --all-targets -- -D warnings
    LintCheck,

    /// cargo test
    Test,
}

impl BuiltinStep {
    pub const ALL: [BuiltinStep; 6] = [
        BuiltinStep::Checkout,
        BuiltinStep::InstallToolchain,
        BuiltinStep::AddComponent,
        BuiltinStep::FormatCheck,
        BuiltinStep::LintCheck,
        BuiltinStep::Test,
    ];

    /// Get the step name as a string.
    pub fn name(&self) -> &'static str {
        match self {
            BuiltinStep::Checkout => "checkout",
            BuiltinStep::InstallToolchain => "install_toolchain",
            BuiltinStep::AddComponent => "add_component",
            BuiltinStep::FormatCheck => "fmt",
            BuiltinStep::LintCheck => "clippy",
            BuiltinStep::Test => "test",
        }
    }

    pub fn command(&self) -> &'static str {
        match self {
            BuiltinStep::Checkout => "sh",
            BuiltinStep::InstallToolchain | BuiltinStep::AddComponent => "rustup",
            BuiltinStep::FormatCheck | BuiltinStep::LintCheck | BuiltinStep::Test => "cargo",
        }
    }

    pub fn args(&self) -> Vec<String> {
        let args: &[&str] = match self {
            BuiltinStep::Checkout => &[
                "-c",
                CHECKOUT_SCRIPT,
                "checkout",
                "${{ source }}",
                "${{ sha }}",
            ],
            BuiltinStep::InstallToolchain => &[
                "toolchain",
                "install",
                "stable",
                "--profile",
                "minimal",
                "--target",
                WASM_TARGET,
                "--component",
                "clippy",
                "--component",
                "rustfmt",
            ],
            BuiltinStep::AddComponent => &["component", "add", "rust-src"],
            BuiltinStep::FormatCheck => &["fmt", "--all", "--", "--check"],
            BuiltinStep::LintCheck => &["clippy", "--all-targets", "--", "-D", "warnings"],
            BuiltinStep::Test => &["test"],
        };
        args.iter().map(|a| a.to_string()).collect()
    }
}

/// A single configured step: command plus arguments.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct Step {
    /// Human-readable step name.
    pub name: String,

    /// Executable to run.
    pub command: String,

    /// Arguments; may contain `${{ name }}` placeholders.
    #[serde(default)]
    pub args: Vec<String>,

    /// Extra environment layered over the workflow env.
    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    pub env: BTreeMap<String, String>,
}

impl Step {
    pub fn from_builtin(step: BuiltinStep) -> Self {
        Self {
            name: step.name().to_string(),
            command: step.command().to_string(),
            args: step.args(),
            env: BTreeMap::new(),
        }
    }

    /// Create a custom step.
    pub fn custom(name: impl Into<String>, command: impl Into<String>, args: &[&str]) -> Self {
        Self {
            name: name.into(),
            command: command.into(),
            args: args.iter().map(|a| a.to_string()).collect(),
            env: BTreeMap::new(),
        }
    }

    pub fn with_env(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.env.insert(key.into(), value.into());
        self
    }

    /// Command line for display: command followed by arguments.
    pub fn command_line(&self) -> String {
        std::iter::once(self.command.as_str())
            .chain(self.args.iter().map(String::as_str))
            .collect::<Vec<_>>()
            .join(" ")
    }
}

/// Result of a step execution.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StepResult {
    /// Step name.
    pub step_name: String,

    /// Exit code (0 = success, -1 when terminated by a signal).
    pub exit_code: i32,

    /// Captured stdout.
    pub stdout: String,

    /// Captured stderr.
    pub stderr: String,

    /// Duration in milliseconds.
    pub duration_ms: u64,

    /// Whether execution succeeded.
    pub success: bool,
}

impl StepResult {
    /// Whether this step passed (exit code 0).
    pub fn passed(&self) -> bool {
        self.success && self.exit_code == 0
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_builtin_order_and_names() {
        let names: Vec<_> = BuiltinStep::ALL.iter().map(|s| s.name()).collect();
        assert_eq!(
            names,
            vec!["checkout", "install_toolchain", "add_component", "fmt", "clippy", "test"]
        );
    }

    #[test]
    fn test_lint_denies_warnings() {
        let args = BuiltinStep::LintCheck.args();
        assert_eq!(BuiltinStep::LintCheck.command(), "cargo");
        assert!(args.windows(2).any(|w| w[0] == "-D" && w[1] == "warnings"));
    }

    #[test]
    fn test_toolchain_installs_wasm_target_and_components() {
        let args = BuiltinStep::InstallToolchain.args();
        assert!(args.contains(&WASM_TARGET.to_string()));
        assert!(args.contains(&"clippy".to_string()));
        assert!(args.contains(&"rustfmt".to_string()));
    }

    #[test]
    fn test_format_check_uses_check_flag() {
        assert!(BuiltinStep::FormatCheck.args().contains(&"--check".to_string()));
    }

    #[test]
    fn test_custom_step() {
        let step = Step::custom("hello", "echo", &["hello", "world"]).with_env("FOO", "bar");
        assert_eq!(step.command_line(), "echo hello world");
        assert_eq!(step.env.get("FOO").map(String::as_str), Some("bar"));
    }

    #[test]
    fn test_checkout_fetches_sha_from_source() {
        let args = BuiltinStep::Checkout.args();
        assert_eq!(BuiltinStep::Checkout.command(), "sh");
        assert_eq!(&args[args.len() - 2..], ["${{ source }}", "${{ sha }}"]);
        assert!(args[1].contains("FETCH_HEAD"));
    }

    #[test]
    fn test_only_clean_zero_exit_passes() {
        let outcome = |exit_code, success| StepResult {
            step_name: "clippy".to_string(),
            exit_code,
            stdout: String::new(),
            stderr: String::new(),
            duration_ms: 0,
            success,
        };

        assert!(outcome(0, true).passed());
        assert!(!outcome(101, false).passed(), "clippy warnings fail the step");
        assert!(!outcome(-1, false).passed(), "killed by a signal");
        assert!(!outcome(0, false).passed());
    }
}
