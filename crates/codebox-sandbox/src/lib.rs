#![warn(missing_docs)]

//! # codebox-sandbox
//!
//! Preprocessing and sandboxed execution of short, untrusted scripts.
//!
//! A submitted script goes through four stages:
//!
//! 1. [`mask`]: string, comment, regex and template content is replaced by
//!    placeholders of the same byte length, so structural scans cannot be
//!    fooled by literal text.
//! 2. [`classify`]: the masked text is scanned for module syntax, a default
//!    export and TypeScript-only constructs, producing a [`SyntaxProfile`].
//! 3. [`rewrite`]: module syntax is erased, default-exported functions become
//!    self-invoking expressions and known TypeScript syntax is stripped,
//!    producing a [`TransformedScript`].
//! 4. [`ExecutionHost`]: the script runs in a fresh deno_core isolate whose
//!    globals are a console shim plus the [`CapabilityBindings`] of the call.
//!    The outcome is always an [`ExecutionResult`].
//!
//! ## Isolation
//!
//! - **V8 isolate**: Same process-level isolation as Chrome tabs
//! - **No ambient capabilities**: No fs, net, env, or child_process access
//! - **Fresh runtime per call**: No state leakage between executions
//! - **Timeout enforcement**: Execution killed after the call's budget
//! - **Resource limits**: heap, output size, binding calls, log entries

pub mod audit;
pub mod bindings;
pub mod classify;
pub mod console;
pub mod error;
pub mod executor;
pub mod mask;
pub mod ops;
pub mod preprocess;
pub mod result;
pub mod rewrite;
pub mod validator;

pub use bindings::{BindingName, Capability, CapabilityBindings};
pub use classify::{classify, SyntaxProfile, TsConstruct};
pub use console::{LogLevel, LogSink, NoopLogSink, TracingLogSink};
pub use error::SandboxError;
pub use executor::{EngineConfig, ExecutionHost};
pub use mask::{mask, MaskedSource};
pub use preprocess::{prepare, PreparedScript, PreprocessLimits};
pub use result::{ErrorKind, ExecutionError, ExecutionPhase, ExecutionResult};
pub use rewrite::{rewrite, TransformedScript};
