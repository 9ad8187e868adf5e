//! deno_core op definitions for the codebox sandbox.
//!
//! The `#[op2]` macro generates additional public items (v8 function pointers,
//! metadata structs) that cannot carry doc comments. We suppress `missing_docs`
//! at the module level; all actual functions and types are documented below.
#![allow(missing_docs)]

use std::cell::RefCell;
use std::rc::Rc;
use std::sync::Arc;

use deno_core::op2;
use deno_core::OpState;
use deno_error::JsErrorBox;
use serde_json::Value;

use crate::bindings::{describe_binding_error, BindingName, CapabilityBindings};
use crate::console::{LogBuffer, LogLevel, LogSink};
use crate::error::SandboxError;

/// Per-execution limits on binding calls.
pub struct BindingCallLimits {
    /// Maximum number of binding calls allowed.
    pub max_calls: usize,
    /// Maximum size of serialized arguments per call.
    pub max_args_size: usize,
    /// Number of binding calls made so far.
    pub calls_made: usize,
}

impl BindingCallLimits {
    /// Count one call of `args_len` serialized bytes against the limits.
    pub fn admit(&mut self, args_len: usize) -> Result<(), SandboxError> {
        if self.calls_made >= self.max_calls {
            return Err(SandboxError::BindingCallLimit {
                max: self.max_calls,
            });
        }
        if args_len > self.max_args_size {
            return Err(SandboxError::BindingArgsTooLarge {
                max: self.max_args_size,
                actual: args_len,
            });
        }
        self.calls_made += 1;
        Ok(())
    }
}

/// Settlement envelope written by the bootstrap's finish function.
pub struct ScriptOutcome(pub String);

/// Capture one console line.
#[op2(fast)]
pub fn op_codebox_log(state: &mut OpState, #[string] level: &str, #[string] msg: &str) {
    let level = LogLevel::parse(level);
    if let Some(sink) = state.try_borrow::<Arc<dyn LogSink>>() {
        sink.emit(level, msg);
    }
    if let Some(buffer) = state.try_borrow_mut::<LogBuffer>() {
        buffer.push(msg);
    }
}

/// Store the settlement envelope in OpState.
#[op2(fast)]
pub fn op_codebox_set_result(state: &mut OpState, #[string] json: &str) {
    state.put(ScriptOutcome(json.to_string()));
}

/// Resolve a `require()` specifier to the name of a registered binding.
#[op2]
#[string]
pub fn op_codebox_require(
    state: &mut OpState,
    #[string] specifier: &str,
) -> Result<String, JsErrorBox> {
    let bindings = state.borrow::<CapabilityBindings>();
    bindings
        .resolve_module(specifier)
        .map(|name| name.as_str().to_string())
        .map_err(|e| {
            JsErrorBox::generic(describe_binding_error(&e, &bindings.module_candidates()))
        })
}

/// Call a method on one of the execution's bindings.
///
/// Enforces per-execution call count and argument size limits via
/// [`BindingCallLimits`] stored in OpState.
#[op2]
#[string]
pub async fn op_codebox_call_binding(
    op_state: Rc<RefCell<OpState>>,
    #[string] binding: String,
    #[string] method: String,
    #[string] args_json: String,
) -> Result<String, JsErrorBox> {
    tracing::debug!(
        binding = %binding,
        method = %method,
        args_len = args_json.len(),
        "binding call dispatched"
    );

    {
        let mut st = op_state.borrow_mut();
        st.borrow_mut::<BindingCallLimits>()
            .admit(args_json.len())
            .map_err(|e| JsErrorBox::generic(e.to_string()))?;
    }

    let bindings = {
        let st = op_state.borrow();
        st.borrow::<CapabilityBindings>().clone()
    };

    let args: Vec<Value> = serde_json::from_str(&args_json)
        .map_err(|e| JsErrorBox::generic(format!("invalid JSON args: {e}")))?;

    let result = bindings
        .call(&binding, &method, args)
        .await
        .map_err(|e| {
            let known = known_methods(&bindings, &binding);
            let known: Vec<&str> = known.iter().map(String::as_str).collect();
            JsErrorBox::generic(describe_binding_error(&e, &known))
        })?;

    serde_json::to_string(&result)
        .map_err(|e| JsErrorBox::generic(format!("result serialization failed: {e}")))
}

/// Method names of `binding`, or the registered binding names when it is
/// unknown.
fn known_methods(bindings: &CapabilityBindings, binding: &str) -> Vec<String> {
    match binding.parse::<BindingName>().ok().and_then(|n| bindings.get(n)) {
        Some(capability) => capability.methods(),
        None => bindings.names().map(|n| n.as_str().to_string()).collect(),
    }
}

deno_core::extension!(
    codebox_ext,
    ops = [
        op_codebox_log,
        op_codebox_set_result,
        op_codebox_require,
        op_codebox_call_binding
    ],
);

#[cfg(test)]
mod tests {
    use super::*;

    fn limits(max_calls: usize, max_args_size: usize) -> BindingCallLimits {
        BindingCallLimits {
            max_calls,
            max_args_size,
            calls_made: 0,
        }
    }

    #[test]
    fn limits_admit_up_to_max_calls() {
        let mut limits = limits(2, 100);
        assert!(limits.admit(10).is_ok());
        assert!(limits.admit(10).is_ok());
        let err = limits.admit(10).unwrap_err();
        assert!(matches!(err, SandboxError::BindingCallLimit { max: 2 }));
        assert_eq!(limits.calls_made, 2);
    }

    #[test]
    fn limits_reject_oversized_args_without_counting() {
        let mut limits = limits(5, 8);
        let err = limits.admit(9).unwrap_err();
        assert!(matches!(
            err,
            SandboxError::BindingArgsTooLarge { max: 8, actual: 9 }
        ));
        assert_eq!(limits.calls_made, 0);
    }

    #[test]
    fn known_methods_falls_back_to_binding_names() {
        let bindings = CapabilityBindings::new();
        assert!(known_methods(&bindings, "filesystem").is_empty());
        assert!(known_methods(&bindings, "nope").is_empty());
    }
}
