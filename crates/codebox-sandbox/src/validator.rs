//! Pre-processing checks on the submitted script.
//!
//! The V8 isolate is the security boundary; these checks only reject input
//! that cannot be worth masking and rewriting.

use crate::error::SandboxError;

/// Maximum script size in bytes (64 KB).
pub const DEFAULT_MAX_CODE_SIZE: usize = 64 * 1024;

/// Reject empty and oversized scripts.
pub fn validate_script(code: &str, max_size: Option<usize>) -> Result<(), SandboxError> {
    let max = max_size.unwrap_or(DEFAULT_MAX_CODE_SIZE);

    if code.len() > max {
        return Err(SandboxError::CodeTooLarge {
            max,
            actual: code.len(),
        });
    }

    if code.trim().is_empty() {
        return Err(SandboxError::EmptyScript);
    }

    Ok(())
}
