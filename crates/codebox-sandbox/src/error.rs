//! Error types for the codebox sandbox.

use thiserror::Error;

use crate::result::ErrorKind;

/// Errors that can occur while preparing or executing a script.
#[derive(Debug, Error)]
pub enum SandboxError {
    /// The submitted script is empty or whitespace only.
    #[error("script is empty")]
    EmptyScript,

    /// Script exceeds the configured maximum size.
    #[error("script exceeds maximum size of {max} bytes (got {actual})")]
    CodeTooLarge {
        /// Maximum allowed size.
        max: usize,
        /// Actual size.
        actual: usize,
    },

    /// The preprocessing pipeline violated one of its own invariants.
    #[error("preprocessing failed: {reason}")]
    Preprocess {
        /// What went wrong.
        reason: String,
    },

    /// Execution result exceeds the configured maximum size.
    #[error("output exceeds maximum size of {max} bytes")]
    OutputTooLarge {
        /// Maximum allowed size.
        max: usize,
    },

    /// Execution timed out (async event loop or CPU-bound watchdog).
    #[error("execution timed out after {timeout_ms}ms")]
    Timeout {
        /// Configured timeout in milliseconds.
        timeout_ms: u64,
    },

    /// Generic host-side execution failure.
    #[error("sandbox execution failed: {0}")]
    Execution(#[from] anyhow::Error),

    /// Result serialization failed.
    #[error("result serialization failed: {0}")]
    Serialization(#[from] serde_json::Error),

    /// Too many binding calls in a single execution.
    #[error("binding call limit exceeded (max {max} calls per execution)")]
    BindingCallLimit {
        /// Maximum allowed binding calls.
        max: usize,
    },

    /// Binding call arguments exceed the configured maximum size.
    #[error("binding call arguments too large (max {max} bytes, got {actual})")]
    BindingArgsTooLarge {
        /// Maximum allowed argument size.
        max: usize,
        /// Actual argument size.
        actual: usize,
    },

    /// V8 heap memory limit was exceeded.
    #[error("heap limit exceeded")]
    HeapLimitExceeded,
}

impl SandboxError {
    /// The result kind this error is reported as.
    pub fn kind(&self) -> ErrorKind {
        match self {
            Self::EmptyScript | Self::CodeTooLarge { .. } | Self::Preprocess { .. } => {
                ErrorKind::PreprocessError
            }
            Self::Timeout { .. } => ErrorKind::Timeout,
            Self::OutputTooLarge { .. }
            | Self::Execution(_)
            | Self::Serialization(_)
            | Self::BindingCallLimit { .. }
            | Self::BindingArgsTooLarge { .. }
            | Self::HeapLimitExceeded => ErrorKind::RuntimeError,
        }
    }
}
