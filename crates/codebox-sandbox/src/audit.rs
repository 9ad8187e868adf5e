//! Audit logging for script executions.
//!
//! Every `run`/`execute` call emits an [`ExecutionAudit`] containing:
//! - Execution ID (UUID)
//! - SHA-256 hash of the submitted script (never the raw script)
//! - A preview of the first 500 bytes of the script
//! - The syntax profile, when preprocessing ran
//! - Binding calls made (with hashed args, not raw)
//! - Duration and outcome
//!
//! The [`AuditLogger`] trait allows pluggable backends.
//! [`JsonLinesAuditLogger`] writes newline-delimited JSON to any `AsyncWrite`.

use std::sync::Arc;
use std::time::Instant;

use chrono::{DateTime, Utc};
use codebox_error::BindingError;
use serde::Serialize;
use serde_json::Value;
use sha2::{Digest, Sha256};
use tokio::io::{AsyncWrite, AsyncWriteExt};
use tokio::sync::mpsc::UnboundedSender;
use tokio::sync::Mutex;
use uuid::Uuid;

use crate::bindings::{BindingName, Capability};
use crate::classify::SyntaxProfile;
use crate::result::{ErrorKind, ExecutionResult};

/// Maximum length of the code preview in audit entries.
const CODE_PREVIEW_MAX: usize = 500;

/// A complete audit record for a single execution.
#[derive(Debug, Clone, Serialize)]
pub struct ExecutionAudit {
    /// Unique execution identifier.
    pub execution_id: String,
    /// ISO-8601 timestamp of when execution started.
    pub timestamp: DateTime<Utc>,
    /// SHA-256 hash of the submitted script.
    pub code_hash: String,
    /// First bytes of the script (for human review).
    pub code_preview: String,
    /// What the classifier found, when the script went through preprocessing.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub profile: Option<SyntaxProfile>,
    /// Binding calls made during execution.
    pub binding_calls: Vec<BindingCallAudit>,
    /// Total execution duration in milliseconds.
    pub duration_ms: u64,
    /// Final outcome.
    pub outcome: AuditOutcome,
}

/// Audit record for a single binding call within an execution.
#[derive(Debug, Clone, Serialize)]
pub struct BindingCallAudit {
    /// Binding the call went to.
    pub binding: BindingName,
    /// Method name.
    pub method: String,
    /// SHA-256 hash of the serialized arguments (args never stored raw).
    pub args_hash: String,
    /// Duration of this call in milliseconds.
    pub duration_ms: u64,
    /// Whether the call succeeded.
    pub success: bool,
}

/// The outcome of an execution.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
#[non_exhaustive]
pub enum AuditOutcome {
    /// Execution completed successfully.
    Success,
    /// Execution failed with an error.
    Error {
        /// Failure category.
        kind: ErrorKind,
        /// The error message.
        message: String,
    },
    /// Execution was terminated due to timeout.
    Timeout,
}

impl AuditOutcome {
    /// Short label for log lines.
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Success => "success",
            Self::Error { .. } => "error",
            Self::Timeout => "timeout",
        }
    }
}

/// Trait for audit log backends.
#[async_trait::async_trait]
pub trait AuditLogger: Send + Sync {
    /// Write an audit entry.
    async fn log(&self, entry: &ExecutionAudit);
}

/// Writes audit entries as newline-delimited JSON to an `AsyncWrite` sink.
pub struct JsonLinesAuditLogger<W: AsyncWrite + Unpin + Send> {
    writer: Mutex<W>,
}

impl<W: AsyncWrite + Unpin + Send> JsonLinesAuditLogger<W> {
    /// Create a new JSON lines audit logger writing to the given sink.
    pub fn new(writer: W) -> Self {
        Self {
            writer: Mutex::new(writer),
        }
    }
}

#[async_trait::async_trait]
impl<W: AsyncWrite + Unpin + Send + 'static> AuditLogger for JsonLinesAuditLogger<W> {
    async fn log(&self, entry: &ExecutionAudit) {
        let mut line = match serde_json::to_string(entry) {
            Ok(json) => json,
            Err(e) => {
                tracing::warn!(error = %e, "failed to serialize audit entry");
                return;
            }
        };
        line.push('\n');

        let mut writer = self.writer.lock().await;
        if let Err(e) = writer.write_all(line.as_bytes()).await {
            tracing::warn!(error = %e, "failed to write audit entry");
        }
        let _ = writer.flush().await;
    }
}

/// Compute the SHA-256 hash of a string, returned as a hex string.
pub fn sha256_hex(data: &str) -> String {
    let digest = Sha256::digest(data.as_bytes());
    let mut s = String::with_capacity(digest.len() * 2);
    for b in digest {
        s.push_str(&format!("{b:02x}"));
    }
    s
}

/// Create a code preview (first N bytes, with ellipsis if truncated).
///
/// Truncates at a valid UTF-8 char boundary.
pub fn code_preview(code: &str) -> String {
    if code.len() <= CODE_PREVIEW_MAX {
        code.to_string()
    } else {
        let mut end = CODE_PREVIEW_MAX;
        while !code.is_char_boundary(end) {
            end -= 1;
        }
        let mut preview = code[..end].to_string();
        preview.push_str("...");
        preview
    }
}

/// Builder for constructing audit entries during execution.
pub struct ExecutionAuditBuilder {
    execution_id: String,
    timestamp: DateTime<Utc>,
    code_hash: String,
    code_preview: String,
    profile: Option<SyntaxProfile>,
    binding_calls: Vec<BindingCallAudit>,
    start: Instant,
}

impl ExecutionAuditBuilder {
    /// Start building an audit entry for the submitted script.
    pub fn new(code: &str) -> Self {
        Self {
            execution_id: Uuid::new_v4().to_string(),
            timestamp: Utc::now(),
            code_hash: sha256_hex(code),
            code_preview: code_preview(code),
            profile: None,
            binding_calls: Vec::new(),
            start: Instant::now(),
        }
    }

    /// The execution identifier this entry will carry.
    pub fn execution_id(&self) -> &str {
        &self.execution_id
    }

    /// Attach the classifier's findings.
    pub fn profile(&mut self, profile: SyntaxProfile) {
        self.profile = Some(profile);
    }

    /// Record a binding call.
    pub fn record_binding_call(&mut self, audit: BindingCallAudit) {
        self.binding_calls.push(audit);
    }

    /// Finalize the audit entry with the execution result.
    pub fn finish(self, result: &ExecutionResult) -> ExecutionAudit {
        let outcome = match &result.error {
            None => AuditOutcome::Success,
            Some(e) if e.kind == ErrorKind::Timeout => AuditOutcome::Timeout,
            Some(e) => AuditOutcome::Error {
                kind: e.kind,
                message: e.message.clone(),
            },
        };

        ExecutionAudit {
            execution_id: self.execution_id,
            timestamp: self.timestamp,
            code_hash: self.code_hash,
            code_preview: self.code_preview,
            profile: self.profile,
            binding_calls: self.binding_calls,
            duration_ms: u64::try_from(self.start.elapsed().as_millis()).unwrap_or(u64::MAX),
            outcome,
        }
    }
}

/// A no-op audit logger for when auditing is not needed.
pub struct NoopAuditLogger;

#[async_trait::async_trait]
impl AuditLogger for NoopAuditLogger {
    async fn log(&self, _entry: &ExecutionAudit) {}
}

/// An audit logger that emits structured events via the [`tracing`] framework.
///
/// Audit entries are logged at `INFO` level with `audit = true` for easy
/// filtering. Binding calls are summarised as a count.
pub struct TracingAuditLogger;

#[async_trait::async_trait]
impl AuditLogger for TracingAuditLogger {
    async fn log(&self, entry: &ExecutionAudit) {
        tracing::info!(
            audit = true,
            execution_id = %entry.execution_id,
            code_hash = %entry.code_hash,
            typescript = entry.profile.as_ref().map(|p| p.has_type_script),
            duration_ms = entry.duration_ms,
            binding_calls = entry.binding_calls.len(),
            outcome = entry.outcome.as_str(),
            "audit"
        );
    }
}

/// An audit-recording wrapper around a [`Capability`].
pub struct AuditingCapability {
    name: BindingName,
    inner: Arc<dyn Capability>,
    audit_tx: UnboundedSender<BindingCallAudit>,
}

impl AuditingCapability {
    /// Wrap a capability with audit recording.
    pub fn new(
        name: BindingName,
        inner: Arc<dyn Capability>,
        audit_tx: UnboundedSender<BindingCallAudit>,
    ) -> Self {
        Self {
            name,
            inner,
            audit_tx,
        }
    }
}

#[async_trait::async_trait]
impl Capability for AuditingCapability {
    fn methods(&self) -> Vec<String> {
        self.inner.methods()
    }

    async fn call(&self, method: &str, args: Vec<Value>) -> Result<Value, BindingError> {
        let args_hash = sha256_hex(&serde_json::to_string(&args).unwrap_or_default());
        let start = Instant::now();

        let result = self.inner.call(method, args).await;

        let audit = BindingCallAudit {
            binding: self.name,
            method: method.to_string(),
            args_hash,
            duration_ms: u64::try_from(start.elapsed().as_millis()).unwrap_or(u64::MAX),
            success: result.is_ok(),
        };
        let _ = self.audit_tx.send(audit);

        result
    }
}
