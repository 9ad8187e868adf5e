//! The preprocessing pipeline: validate, mask, classify, rewrite, verify.

use serde::Serialize;

use crate::classify::{classify, has_module_syntax, SyntaxProfile};
use crate::error::SandboxError;
use crate::mask::{brace_balance, mask, MaskedSource};
use crate::rewrite::{rewrite, TransformedScript};
use crate::validator::{validate_script, DEFAULT_MAX_CODE_SIZE};

/// Limits applied before any masking happens.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PreprocessLimits {
    /// Maximum script size in bytes.
    pub max_code_size: usize,
}

impl Default for PreprocessLimits {
    fn default() -> Self {
        Self {
            max_code_size: DEFAULT_MAX_CODE_SIZE,
        }
    }
}

/// A script that passed preprocessing, with the profile that drove it.
#[derive(Debug, Clone, Serialize)]
pub struct PreparedScript {
    /// What the classifier found in the submitted source.
    pub profile: SyntaxProfile,
    /// The rewritten, runnable script.
    #[serde(serialize_with = "serialize_script")]
    pub script: TransformedScript,
}

fn serialize_script<S: serde::Serializer>(
    script: &TransformedScript,
    serializer: S,
) -> Result<S::Ok, S::Error> {
    serializer.serialize_str(script.as_str())
}

/// Run the whole pipeline over `source`.
pub fn prepare(source: &str, limits: &PreprocessLimits) -> Result<PreparedScript, SandboxError> {
    validate_script(source, Some(limits.max_code_size))?;

    let masked = mask(source);
    let profile = classify(&masked);
    let script = rewrite(source, &profile);
    verify(&masked, &script)?;

    tracing::debug!(
        typescript = profile.has_type_script,
        es_module = profile.has_es_module,
        default_export = profile.has_default_export,
        source_bytes = source.len(),
        script_bytes = script.len(),
        "script preprocessed"
    );

    Ok(PreparedScript { profile, script })
}

/// Check the rewriter's output against the invariants it must keep.
fn verify(source_masked: &MaskedSource, script: &TransformedScript) -> Result<(), SandboxError> {
    let output_masked = mask(script);

    let before = brace_balance(source_masked);
    let after = brace_balance(&output_masked);
    if before != after {
        return Err(SandboxError::Preprocess {
            reason: format!("rewrite changed bracket balance from {before:?} to {after:?}"),
        });
    }

    if has_module_syntax(&output_masked) {
        return Err(SandboxError::Preprocess {
            reason: "module syntax remained after rewriting".into(),
        });
    }

    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn prepares_default_export() {
        let prepared = prepare(
            "export default function(){ return 2+2; }",
            &PreprocessLimits::default(),
        )
        .unwrap();
        assert!(prepared.profile.has_default_export);
        assert_eq!(prepared.script.as_str(), "(function(){ return 2+2; })()");
    }

    #[test]
    fn rejects_empty_source() {
        let err = prepare("   ", &PreprocessLimits::default()).unwrap_err();
        assert!(matches!(err, SandboxError::EmptyScript));
    }

    #[test]
    fn rejects_oversized_source() {
        let limits = PreprocessLimits { max_code_size: 8 };
        let err = prepare("console.log('too long');", &limits).unwrap_err();
        assert!(matches!(err, SandboxError::CodeTooLarge { max: 8, .. }));
    }

    #[test]
    fn unbalanced_input_passes_through_unchanged() {
        // The rewriter does not repair scripts; the host reports the
        // SyntaxError.
        let prepared = prepare("function f() {", &PreprocessLimits::default()).unwrap();
        assert_eq!(prepared.script.as_str(), "function f() {");
    }

    #[test]
    fn verify_rejects_balance_change() {
        let masked = mask("f(1);");
        let err = verify(&masked, &TransformedScript::new("f(1;")).unwrap_err();
        assert!(matches!(err, SandboxError::Preprocess { .. }));
        assert!(err.to_string().contains("bracket balance"));
    }

    #[test]
    fn verify_rejects_leftover_module_syntax() {
        let masked = mask("export { a };");
        let err = verify(&masked, &TransformedScript::new("export { a };")).unwrap_err();
        assert!(err.to_string().contains("module syntax"));
    }

    #[test]
    fn prepared_script_serializes_profile_and_script() {
        let prepared = prepare("let a: number = 1;", &PreprocessLimits::default()).unwrap();
        let json = serde_json::to_value(&prepared).unwrap();
        assert_eq!(json["profile"]["hasTypeScript"], true);
        assert_eq!(json["script"], "let a = 1;");
    }
}
