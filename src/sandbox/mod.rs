//! Execution boundary for generated source.
//!
//! A sandbox never returns `Err` for a failure of the *executed* source: those are
//! reported as an unsuccessful [`ExecutionOutcome`]. `Err` is reserved for setup
//! problems of the sandbox itself, which the engine folds into a failed outcome.

pub mod process;
pub mod script;
pub mod sqlite;

pub use process::{run_with_timeout, ProcessOutput};
pub use script::ProcessSandbox;
pub use sqlite::SqliteQuerySandbox;

use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::collections::BTreeMap;
use std::path::Path;
use std::time::Duration;

/// Named values made available to executed source without explicit import.
pub type Bindings = BTreeMap<String, Value>;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum FailureKind {
    /// The source raised or exited unsuccessfully.
    Raised,
    /// The configured time limit elapsed and execution was interrupted.
    Timeout,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ExecutionFailure {
    pub kind: FailureKind,
    pub error_type: String,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ExecutionOutcome {
    pub success: bool,
    #[serde(default)]
    pub output: String,
    #[serde(default)]
    pub error: String,
    #[serde(default)]
    pub failure: Option<ExecutionFailure>,
}

impl ExecutionOutcome {
    pub fn succeeded(output: impl Into<String>) -> Self {
        Self {
            success: true,
            output: output.into(),
            error: String::new(),
            failure: None,
        }
    }

    /// `error` is prefixed with the type name: `"{error_type}: {detail}"`.
    pub fn raised(
        error_type: impl Into<String>,
        detail: impl AsRef<str>,
        output: impl Into<String>,
    ) -> Self {
        let error_type = error_type.into();
        Self {
            success: false,
            output: output.into(),
            error: format!("{error_type}: {}", detail.as_ref()),
            failure: Some(ExecutionFailure {
                kind: FailureKind::Raised,
                error_type,
            }),
        }
    }

    pub fn timed_out(timeout: Duration, output: impl Into<String>) -> Self {
        Self {
            success: false,
            output: output.into(),
            error: format!(
                "Timeout: execution exceeded {}ms and was interrupted",
                timeout.as_millis()
            ),
            failure: Some(ExecutionFailure {
                kind: FailureKind::Timeout,
                error_type: "Timeout".to_string(),
            }),
        }
    }

    pub fn is_timeout(&self) -> bool {
        matches!(
            self.failure,
            Some(ExecutionFailure {
                kind: FailureKind::Timeout,
                ..
            })
        )
    }
}

#[derive(Debug, thiserror::Error)]
pub enum SandboxError {
    #[error("invalid binding: {0}")]
    InvalidBinding(String),
    #[error("interpreter `{interpreter}` was not found")]
    MissingInterpreter { interpreter: String },
    #[error("failed to open query target {target}: {reason}")]
    Connection { target: String, reason: String },
    #[error("sandbox io error at {path}: {source}")]
    Io {
        path: String,
        #[source]
        source: std::io::Error,
    },
}

impl SandboxError {
    /// Setup failures still have to reach the recovery policy as a failed execution.
    pub fn into_outcome(self) -> ExecutionOutcome {
        ExecutionOutcome::raised("SandboxError", self.to_string(), String::new())
    }
}

pub trait ExecutionSandbox {
    fn execute(
        &self,
        source: &str,
        bindings: &Bindings,
        timeout: Duration,
    ) -> Result<ExecutionOutcome, SandboxError>;
}

pub(crate) fn io_error(path: &Path, source: std::io::Error) -> SandboxError {
    SandboxError::Io {
        path: path.display().to_string(),
        source,
    }
}
