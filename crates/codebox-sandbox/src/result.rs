//! The record every execution produces.

use std::time::Duration;

use serde::{Deserialize, Serialize};
use serde_json::Value;

/// Why an execution did not succeed.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum ErrorKind {
    /// The rewritten script is not valid executable script.
    SyntaxError,
    /// Uncaught exception during execution, including binding failures.
    RuntimeError,
    /// The execution budget elapsed.
    Timeout,
    /// The preprocessing pipeline rejected the script; nothing ran.
    PreprocessError,
}

impl ErrorKind {
    /// The wire name of this kind.
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::SyntaxError => "SyntaxError",
            Self::RuntimeError => "RuntimeError",
            Self::Timeout => "Timeout",
            Self::PreprocessError => "PreprocessError",
        }
    }
}

impl std::fmt::Display for ErrorKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Failure details of an execution.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ExecutionError {
    /// Failure category.
    pub kind: ErrorKind,
    /// Human-readable message, taken from the exception where there was one.
    pub message: String,
}

/// Outcome of one execution. Always well-formed, whatever happened.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ExecutionResult {
    /// `true` iff the script completed within budget without throwing.
    pub ok: bool,
    /// JSON value of the script's output slot, if it produced one.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub output: Option<Value>,
    /// Console lines in emission order, including those before a failure.
    #[serde(default)]
    pub logs: Vec<String>,
    /// Set iff `ok` is `false`.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<ExecutionError>,
    /// Wall-clock time spent, in milliseconds.
    pub duration_ms: u64,
}

impl ExecutionResult {
    /// A successful execution.
    pub fn completed(output: Option<Value>, logs: Vec<String>, duration: Duration) -> Self {
        Self {
            ok: true,
            output,
            logs,
            error: None,
            duration_ms: duration_ms(duration),
        }
    }

    /// A failed execution.
    pub fn failed(
        kind: ErrorKind,
        message: impl Into<String>,
        logs: Vec<String>,
        duration: Duration,
    ) -> Self {
        Self {
            ok: false,
            output: None,
            logs,
            error: Some(ExecutionError {
                kind,
                message: message.into(),
            }),
            duration_ms: duration_ms(duration),
        }
    }

    /// The failure kind, if the execution failed.
    pub fn error_kind(&self) -> Option<ErrorKind> {
        self.error.as_ref().map(|e| e.kind)
    }
}

fn duration_ms(duration: Duration) -> u64 {
    u64::try_from(duration.as_millis()).unwrap_or(u64::MAX)
}

/// Lifecycle of one execution.
///
/// `Pending → Running → {Completed | TimedOut | Errored}`. Only terminal
/// phases produce an [`ExecutionResult`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ExecutionPhase {
    /// Waiting for a concurrency permit and a fresh isolate.
    Pending,
    /// The script is running.
    Running,
    /// The script finished within budget.
    Completed,
    /// The budget elapsed and the script was terminated.
    TimedOut,
    /// The script threw, failed to parse, or hit a resource limit.
    Errored,
}

impl ExecutionPhase {
    /// Whether no further transition is possible.
    pub fn is_terminal(self) -> bool {
        matches!(self, Self::Completed | Self::TimedOut | Self::Errored)
    }

    /// Move to `next` if the transition is legal, otherwise stay put.
    pub fn advance(&mut self, next: ExecutionPhase) -> bool {
        let legal = matches!(
            (*self, next),
            (Self::Pending, Self::Running)
                | (Self::Pending, Self::Errored)
                | (Self::Running, Self::Completed)
                | (Self::Running, Self::TimedOut)
                | (Self::Running, Self::Errored)
        );
        if legal {
            *self = next;
        }
        legal
    }
}
