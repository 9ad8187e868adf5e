//! Capability bindings: the closed set of host objects a script can reach.
//!
//! Each binding is injected into the script's global scope under its fixed
//! name. The sandbox never inspects a binding's shape beyond the method names
//! it reports; arguments and results cross the isolate boundary as JSON.

use std::collections::BTreeMap;
use std::fmt;
use std::str::FromStr;
use std::sync::Arc;

use codebox_error::BindingError;
use serde::{Deserialize, Serialize};
use serde_json::Value;

/// Fixed, documented binding names.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum BindingName {
    /// File access.
    Filesystem,
    /// Best-case search.
    Bestcase,
    /// Guide lookup.
    Guides,
    /// Key/value metadata.
    Metadata,
}

impl BindingName {
    /// Every binding name, in registry order.
    pub const ALL: [BindingName; 4] = [
        BindingName::Filesystem,
        BindingName::Bestcase,
        BindingName::Guides,
        BindingName::Metadata,
    ];

    /// The global name the binding is injected under.
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Filesystem => "filesystem",
            Self::Bestcase => "bestcase",
            Self::Guides => "guides",
            Self::Metadata => "metadata",
        }
    }
}

impl fmt::Display for BindingName {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for BindingName {
    type Err = BindingError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::ALL
            .into_iter()
            .find(|name| name.as_str() == s)
            .ok_or_else(|| BindingError::BindingNotFound(s.to_string()))
    }
}

/// `require()` specifiers that resolve to a binding other than by its own name.
const MODULE_ALIASES: &[(&str, BindingName)] = &[
    ("fs", BindingName::Filesystem),
    ("node:fs", BindingName::Filesystem),
    ("fs/promises", BindingName::Filesystem),
    ("node:fs/promises", BindingName::Filesystem),
];

/// A host capability reachable from scripts through one binding.
///
/// Implementations own whatever state and credentials they need and are
/// responsible for their own concurrency discipline: calls from concurrent
/// executions may overlap.
#[async_trait::async_trait]
pub trait Capability: Send + Sync {
    /// Method names exposed to scripts. Each becomes an async function on the
    /// binding object.
    fn methods(&self) -> Vec<String>;

    /// Invoke `method` with the script's positional arguments.
    async fn call(&self, method: &str, args: Vec<Value>) -> Result<Value, BindingError>;
}

/// The bindings made available to one execution.
#[derive(Clone, Default)]
pub struct CapabilityBindings {
    entries: BTreeMap<BindingName, Arc<dyn Capability>>,
}

impl fmt::Debug for CapabilityBindings {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_set().entries(self.entries.keys()).finish()
    }
}

impl CapabilityBindings {
    /// An empty registry.
    pub fn new() -> Self {
        Self::default()
    }

    /// Builder-style registration.
    pub fn with(mut self, name: BindingName, capability: impl Capability + 'static) -> Self {
        self.entries.insert(name, Arc::new(capability));
        self
    }

    /// Register a shared capability, returning the one it replaces.
    pub fn insert(
        &mut self,
        name: BindingName,
        capability: Arc<dyn Capability>,
    ) -> Option<Arc<dyn Capability>> {
        self.entries.insert(name, capability)
    }

    /// The capability registered under `name`.
    pub fn get(&self, name: BindingName) -> Option<&Arc<dyn Capability>> {
        self.entries.get(&name)
    }

    /// Registered binding names, in registry order.
    pub fn names(&self) -> impl Iterator<Item = BindingName> + '_ {
        self.entries.keys().copied()
    }

    /// Number of registered bindings.
    pub fn len(&self) -> usize {
        self.entries.len()
    }

    /// Whether no binding is registered.
    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Apply `wrap` to every registered capability.
    pub(crate) fn map(
        self,
        mut wrap: impl FnMut(BindingName, Arc<dyn Capability>) -> Arc<dyn Capability>,
    ) -> Self {
        Self {
            entries: self
                .entries
                .into_iter()
                .map(|(name, capability)| (name, wrap(name, capability)))
                .collect(),
        }
    }

    /// Binding name → method names, as injected into the isolate.
    pub(crate) fn method_table(&self) -> BTreeMap<&'static str, Vec<String>> {
        self.entries
            .iter()
            .map(|(name, capability)| (name.as_str(), capability.methods()))
            .collect()
    }

    /// Resolve a `require()` specifier to a registered binding.
    pub fn resolve_module(&self, specifier: &str) -> Result<BindingName, BindingError> {
        let name = match specifier.parse::<BindingName>() {
            Ok(name) => name,
            Err(_) => MODULE_ALIASES
                .iter()
                .find(|(alias, _)| *alias == specifier)
                .map(|(_, name)| *name)
                .ok_or_else(|| BindingError::ModuleNotFound(specifier.to_string()))?,
        };
        if self.entries.contains_key(&name) {
            Ok(name)
        } else {
            Err(BindingError::BindingNotFound(name.as_str().to_string()))
        }
    }

    /// Names a failed `require()` could have meant.
    pub fn module_candidates(&self) -> Vec<&'static str> {
        let mut candidates: Vec<&'static str> = self.names().map(|n| n.as_str()).collect();
        for (alias, target) in MODULE_ALIASES {
            if self.entries.contains_key(target) {
                candidates.push(*alias);
            }
        }
        candidates
    }

    /// Dispatch a call from a script.
    pub async fn call(
        &self,
        binding: &str,
        method: &str,
        args: Vec<Value>,
    ) -> Result<Value, BindingError> {
        let name: BindingName = binding.parse()?;
        let capability = self
            .entries
            .get(&name)
            .ok_or_else(|| BindingError::BindingNotFound(binding.to_string()))?;
        if !capability.methods().iter().any(|m| m == method) {
            return Err(BindingError::MethodNotFound {
                binding: binding.to_string(),
                method: method.to_string(),
            });
        }
        capability.call(method, args).await
    }
}

/// Render a binding failure for the script, with a suggestion when one fits.
pub(crate) fn describe_binding_error(err: &BindingError, known: &[&str]) -> String {
    match err.suggested_fix(known) {
        Some(fix) if !err.retryable() => format!("{err}. {fix}"),
        _ => err.to_string(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    struct Echo;

    #[async_trait::async_trait]
    impl Capability for Echo {
        fn methods(&self) -> Vec<String> {
            vec!["echo".into(), "fail".into()]
        }

        async fn call(&self, method: &str, args: Vec<Value>) -> Result<Value, BindingError> {
            match method {
                "echo" => Ok(Value::Array(args)),
                _ => Err(BindingError::NotFound("nothing here".into())),
            }
        }
    }

    #[test]
    fn binding_names_round_trip_through_strings() {
        for name in BindingName::ALL {
            assert_eq!(name.as_str().parse::<BindingName>().unwrap(), name);
        }
        assert!("console".parse::<BindingName>().is_err());
    }

    #[test]
    fn registry_reports_registered_names() {
        let bindings = CapabilityBindings::new()
            .with(BindingName::Metadata, Echo)
            .with(BindingName::Filesystem, Echo);
        let names: Vec<_> = bindings.names().collect();
        assert_eq!(names, vec![BindingName::Filesystem, BindingName::Metadata]);
        assert_eq!(bindings.len(), 2);
        assert!(!bindings.is_empty());
        assert!(bindings.get(BindingName::Guides).is_none());
    }

    #[test]
    fn require_resolves_names_and_aliases() {
        let bindings = CapabilityBindings::new().with(BindingName::Filesystem, Echo);
        for spec in ["filesystem", "fs", "node:fs", "fs/promises", "node:fs/promises"] {
            assert_eq!(
                bindings.resolve_module(spec).unwrap(),
                BindingName::Filesystem,
                "{spec}"
            );
        }
    }

    #[test]
    fn require_rejects_unknown_and_unregistered_modules() {
        let bindings = CapabilityBindings::new().with(BindingName::Filesystem, Echo);
        assert!(matches!(
            bindings.resolve_module("child_process"),
            Err(BindingError::ModuleNotFound(_))
        ));
        assert!(matches!(
            bindings.resolve_module("guides"),
            Err(BindingError::BindingNotFound(_))
        ));
    }

    #[test]
    fn failed_require_suggests_close_module() {
        let bindings = CapabilityBindings::new().with(BindingName::Filesystem, Echo);
        let err = bindings.resolve_module("filesytem").unwrap_err();
        let message = describe_binding_error(&err, &bindings.module_candidates());
        assert_eq!(
            message,
            "module 'filesytem' is not available in the sandbox. Did you mean 'filesystem'?"
        );
    }

    #[tokio::test]
    async fn call_dispatches_to_capability() {
        let bindings = CapabilityBindings::new().with(BindingName::Guides, Echo);
        let result = bindings
            .call("guides", "echo", vec![Value::from(1), Value::from("a")])
            .await
            .unwrap();
        assert_eq!(result, serde_json::json!([1, "a"]));
    }

    #[tokio::test]
    async fn call_rejects_unknown_method() {
        let bindings = CapabilityBindings::new().with(BindingName::Guides, Echo);
        let err = bindings.call("guides", "ech", vec![]).await.unwrap_err();
        assert!(matches!(err, BindingError::MethodNotFound { .. }));
        let message = describe_binding_error(&err, &["echo", "fail"]);
        assert!(message.ends_with("Did you mean 'echo'?"), "{message}");
    }

    #[tokio::test]
    async fn call_propagates_capability_errors() {
        let bindings = CapabilityBindings::new().with(BindingName::Guides, Echo);
        let err = bindings.call("guides", "fail", vec![]).await.unwrap_err();
        assert_eq!(err.to_string(), "not found: nothing here");
    }

    #[test]
    fn debug_lists_binding_names() {
        let bindings = CapabilityBindings::new().with(BindingName::Bestcase, Echo);
        assert_eq!(format!("{bindings:?}"), "{Bestcase}");
    }
}
