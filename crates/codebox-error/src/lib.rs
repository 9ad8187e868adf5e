//! Typed error types for codebox capability bindings.
//!
//! Provides [`BindingError`] — the canonical error type returned by every
//! `Capability` implementation that a script can reach through a host
//! binding (`filesystem`, `bestcase`, `guides`, `metadata`).

use thiserror::Error;

/// Canonical error type for capability binding calls.
///
/// All variants are `#[non_exhaustive]` to allow future additions without
/// breaking downstream code.
#[derive(Debug, Error)]
#[non_exhaustive]
pub enum BindingError {
    /// The requested binding is not registered for this execution.
    #[error("binding not available: {0}")]
    BindingNotFound(String),

    /// The binding exists but does not expose the requested method.
    #[error("method not found: '{method}' on binding '{binding}'")]
    MethodNotFound {
        /// The binding that was called.
        binding: String,
        /// The method name that was not found.
        method: String,
    },

    /// A module requested through `require()` is not provided by the sandbox.
    #[error("module '{0}' is not available in the sandbox")]
    ModuleNotFound(String),

    /// The arguments passed by the script were rejected by the binding.
    #[error("invalid arguments for '{binding}.{method}': {reason}")]
    InvalidArguments {
        /// The binding that was called.
        binding: String,
        /// The method that rejected its arguments.
        method: String,
        /// Why the arguments were rejected.
        reason: String,
    },

    /// The binding looked up something that does not exist.
    #[error("not found: {0}")]
    NotFound(String),

    /// The binding's backing service did not answer in time.
    #[error("timeout after {timeout_ms}ms in binding '{binding}'")]
    Timeout {
        /// The binding that timed out.
        binding: String,
        /// The timeout duration in milliseconds.
        timeout_ms: u64,
    },

    /// The backing service of a binding returned an error.
    #[error("upstream error from '{binding}': {message}")]
    Upstream {
        /// The binding whose backend failed.
        binding: String,
        /// The error message from the backend.
        message: String,
    },

    /// Per-execution call budget exhausted.
    #[error("rate limit exceeded: {0}")]
    RateLimit(String),

    /// An internal error (catch-all for unexpected failures).
    #[error(transparent)]
    Internal(#[from] anyhow::Error),
}

impl BindingError {
    /// Returns a static error code string for programmatic matching.
    pub fn code(&self) -> &'static str {
        match self {
            Self::BindingNotFound(_) => "BINDING_NOT_FOUND",
            Self::MethodNotFound { .. } => "METHOD_NOT_FOUND",
            Self::ModuleNotFound(_) => "MODULE_NOT_FOUND",
            Self::InvalidArguments { .. } => "INVALID_ARGUMENTS",
            Self::NotFound(_) => "NOT_FOUND",
            Self::Timeout { .. } => "TIMEOUT",
            Self::Upstream { .. } => "UPSTREAM_ERROR",
            Self::RateLimit(_) => "RATE_LIMIT",
            Self::Internal(_) => "INTERNAL",
        }
    }

    /// Returns whether the call that produced this error may succeed if retried.
    pub fn retryable(&self) -> bool {
        match self {
            Self::Timeout { .. } => true,
            Self::Upstream { .. } => true,
            Self::RateLimit(_) => false,
            Self::BindingNotFound(_) => false,
            Self::MethodNotFound { .. } => false,
            Self::ModuleNotFound(_) => false,
            Self::InvalidArguments { .. } => false,
            Self::NotFound(_) => false,
            Self::Internal(_) => false,
        }
    }

    /// Suggested fix for this error, if one can be derived.
    ///
    /// `known` lists the names the failing lookup could have matched: method
    /// names for [`BindingError::MethodNotFound`], binding names and module
    /// aliases for [`BindingError::BindingNotFound`] and
    /// [`BindingError::ModuleNotFound`].
    pub fn suggested_fix(&self, known: &[&str]) -> Option<String> {
        match self {
            Self::MethodNotFound { method, .. } => {
                closest_name(method, known).map(|m| format!("Did you mean '{m}'?"))
            }
            Self::BindingNotFound(name) | Self::ModuleNotFound(name) => {
                closest_name(name, known).map(|m| format!("Did you mean '{m}'?"))
            }
            Self::Timeout { .. } => Some("Retry with a smaller request".to_string()),
            Self::Upstream { .. } => Some("Retry after a delay".to_string()),
            _ => None,
        }
    }

    /// Convert to a structured JSON error object.
    ///
    /// Returns a JSON object with `error`, `code`, `message`, `retryable`,
    /// and optionally `suggested_fix`.
    pub fn to_structured_error(&self, known: &[&str]) -> serde_json::Value {
        let mut obj = serde_json::json!({
            "error": true,
            "code": self.code(),
            "message": self.to_string(),
            "retryable": self.retryable(),
        });

        if let Some(fix) = self.suggested_fix(known) {
            obj["suggested_fix"] = serde_json::Value::String(fix);
        }

        obj
    }
}

/// Find the closest candidate using Levenshtein distance.
///
/// Only candidates within edit distance 3 are considered.
pub fn closest_name<'a>(name: &str, candidates: &[&'a str]) -> Option<&'a str> {
    let mut best: Option<(usize, &'a str)> = None;

    for &candidate in candidates {
        let dist = strsim::levenshtein(name, candidate);
        if dist <= 3 && best.is_none_or(|(d, _)| dist < d) {
            best = Some((dist, candidate));
        }
    }

    best.map(|(_, candidate)| candidate)
}

// Compile-time assertion: BindingError must be Send + Sync + 'static
const _: fn() = || {
    fn assert_bounds<T: Send + Sync + 'static>() {}
    assert_bounds::<BindingError>();
};
