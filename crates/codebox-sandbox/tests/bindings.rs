//! Capability bindings through the full execution pipeline.

use std::collections::HashMap;
use std::sync::{Arc, Mutex};
use std::time::Duration;

use codebox_error::BindingError;
use codebox_sandbox::audit::{AuditLogger, AuditOutcome, ExecutionAudit};
use codebox_sandbox::{
    BindingName, Capability, CapabilityBindings, EngineConfig, ErrorKind, ExecutionHost,
};
use serde_json::{json, Value};

/// In-memory key/value store standing in for the metadata binding.
#[derive(Default)]
struct MemoryMetadata {
    entries: Mutex<HashMap<String, Value>>,
}

#[async_trait::async_trait]
impl Capability for MemoryMetadata {
    fn methods(&self) -> Vec<String> {
        vec!["get".into(), "set".into()]
    }

    async fn call(&self, method: &str, args: Vec<Value>) -> Result<Value, BindingError> {
        let key = args
            .first()
            .and_then(Value::as_str)
            .ok_or_else(|| BindingError::InvalidArguments {
                binding: "metadata".into(),
                method: method.into(),
                reason: "key must be a string".into(),
            })?
            .to_string();
        let mut entries = self.entries.lock().map_err(|_| {
            BindingError::Internal(anyhow::anyhow!("metadata store poisoned"))
        })?;
        match method {
            "get" => entries
                .get(&key)
                .cloned()
                .ok_or(BindingError::NotFound(key)),
            "set" => {
                let value = args.get(1).cloned().unwrap_or(Value::Null);
                entries.insert(key, value);
                Ok(json!({ "stored": true }))
            }
            other => Err(BindingError::MethodNotFound {
                binding: "metadata".into(),
                method: other.into(),
            }),
        }
    }
}

/// File access stand-in that serves fixed contents.
struct FixedFiles;

#[async_trait::async_trait]
impl Capability for FixedFiles {
    fn methods(&self) -> Vec<String> {
        vec!["readFile".into()]
    }

    async fn call(&self, method: &str, args: Vec<Value>) -> Result<Value, BindingError> {
        match args.first().and_then(Value::as_str) {
            Some("notes.txt") => Ok(json!("remember the milk")),
            Some(other) => Err(BindingError::NotFound(other.to_string())),
            None => Err(BindingError::InvalidArguments {
                binding: "filesystem".into(),
                method: method.into(),
                reason: "path required".into(),
            }),
        }
    }
}

/// Never answers within any reasonable budget.
struct Stalled;

#[async_trait::async_trait]
impl Capability for Stalled {
    fn methods(&self) -> Vec<String> {
        vec!["search".into()]
    }

    async fn call(&self, _method: &str, _args: Vec<Value>) -> Result<Value, BindingError> {
        tokio::time::sleep(Duration::from_secs(30)).await;
        Ok(Value::Null)
    }
}

#[derive(Default)]
struct CollectingAuditLogger {
    entries: Mutex<Vec<ExecutionAudit>>,
}

#[async_trait::async_trait]
impl AuditLogger for CollectingAuditLogger {
    async fn log(&self, entry: &ExecutionAudit) {
        self.entries.lock().unwrap().push(entry.clone());
    }
}

fn host() -> ExecutionHost {
    ExecutionHost::new(EngineConfig {
        timeout: Duration::from_secs(2),
        ..Default::default()
    })
}

fn bindings() -> CapabilityBindings {
    CapabilityBindings::new()
        .with(BindingName::Metadata, MemoryMetadata::default())
        .with(BindingName::Filesystem, FixedFiles)
}

#[tokio::test]
async fn binding_methods_are_async_globals() {
    let source = r#"
export default async function() {
    await metadata.set('answer', { value: 42 });
    const stored = await metadata.get('answer');
    return stored.value;
}
"#;
    let result = host().run(source, bindings()).await;
    assert!(result.ok, "{result:?}");
    assert_eq!(result.output, Some(json!(42)));
}

#[tokio::test]
async fn require_resolves_aliases_to_bindings() {
    let source = r#"
const fs = require('node:fs/promises');
const direct = require('filesystem');
export default async () => [fs === direct, await fs.readFile('notes.txt')];
"#;
    let result = host().run(source, bindings()).await;
    assert!(result.ok, "{result:?}");
    assert_eq!(result.output, Some(json!([true, "remember the milk"])));
}

#[tokio::test]
async fn require_of_unknown_module_suggests_alternative() {
    let result = host().run("require('filesytem')", bindings()).await;
    assert_eq!(result.error_kind(), Some(ErrorKind::RuntimeError));
    let message = result.error.unwrap().message;
    assert!(message.contains("filesytem"), "{message}");
    assert!(message.contains("Did you mean 'filesystem'?"), "{message}");
}

#[tokio::test]
async fn unbound_names_are_absent() {
    let result = host()
        .run("[typeof guides, typeof metadata]", bindings())
        .await;
    assert_eq!(result.output, Some(json!(["undefined", "object"])));
}

#[tokio::test]
async fn binding_objects_are_frozen() {
    let result = host()
        .run(
            "metadata.get = () => 'hijacked'; [Object.isFrozen(metadata), String(metadata.get).includes('hijacked')]",
            bindings(),
        )
        .await;
    assert_eq!(result.output, Some(json!([true, false])));
}

#[tokio::test]
async fn binding_failure_is_runtime_error() {
    let source =
        "console.log('reading');\nexport default () => filesystem.readFile('missing.txt');";
    let result = host().run(source, bindings()).await;
    assert!(!result.ok);
    assert_eq!(result.error_kind(), Some(ErrorKind::RuntimeError));
    assert_eq!(result.error.unwrap().message, "not found: missing.txt");
    assert_eq!(result.logs, vec!["reading"]);
}

#[tokio::test]
async fn binding_failure_can_be_caught_by_script() {
    let source = r#"
export default async function() {
    try {
        await filesystem.readFile('missing.txt');
        return 'unreachable';
    } catch (e) {
        return e.message;
    }
}
"#;
    let result = host().run(source, bindings()).await;
    assert_eq!(result.output, Some(json!("not found: missing.txt")));
}

#[tokio::test]
async fn binding_call_limit_is_enforced() {
    let host = ExecutionHost::new(EngineConfig {
        max_binding_calls: 2,
        ..Default::default()
    });
    let source = r#"
export default async function() {
    for (let i = 0; i < 5; i++) {
        await metadata.set('k' + i, i);
    }
}
"#;
    let result = host.run(source, bindings()).await;
    assert_eq!(result.error_kind(), Some(ErrorKind::RuntimeError));
    let message = result.error.unwrap().message;
    assert!(message.contains("binding call limit exceeded"), "{message}");
}

#[tokio::test]
async fn binding_args_size_is_enforced() {
    let host = ExecutionHost::new(EngineConfig {
        max_binding_args_size: 32,
        ..Default::default()
    });
    let result = host
        .run(
            "export default () => metadata.set('k', 'x'.repeat(100));",
            bindings(),
        )
        .await;
    assert!(result.error.unwrap().message.contains("too large"));
}

#[tokio::test]
async fn slow_binding_hits_timeout() {
    let bindings = CapabilityBindings::new().with(BindingName::Bestcase, Stalled);
    let result = host()
        .execute(
            &codebox_sandbox::TransformedScript::new("bestcase.search('q')"),
            bindings,
            Duration::from_millis(150),
        )
        .await;
    assert_eq!(result.error_kind(), Some(ErrorKind::Timeout));
}

#[tokio::test]
async fn settled_result_survives_pending_binding_at_timeout() {
    let bindings = CapabilityBindings::new().with(BindingName::Bestcase, Stalled);
    let result = host()
        .execute(
            &codebox_sandbox::TransformedScript::new("bestcase.search('late');\n'settled'"),
            bindings,
            Duration::from_millis(150),
        )
        .await;
    assert!(result.ok, "{result:?}");
    assert_eq!(result.output, Some(json!("settled")));
}

#[tokio::test]
async fn audit_records_binding_calls() {
    let logger = Arc::new(CollectingAuditLogger::default());
    let host = ExecutionHost::with_audit_logger(EngineConfig::default(), logger.clone());

    let source = "export default async () => { await metadata.set('a', 1); return metadata.get('zzz'); }";
    let result = host.run(source, bindings()).await;
    assert!(!result.ok);

    let entries = logger.entries.lock().unwrap();
    assert_eq!(entries.len(), 1);
    let entry = &entries[0];
    assert_eq!(entry.binding_calls.len(), 2);
    assert_eq!(entry.binding_calls[0].binding, BindingName::Metadata);
    assert_eq!(entry.binding_calls[0].method, "set");
    assert!(entry.binding_calls[0].success);
    assert!(!entry.binding_calls[1].success);
    assert!(entry.profile.as_ref().is_some_and(|p| p.has_default_export));
    assert!(matches!(
        entry.outcome,
        AuditOutcome::Error {
            kind: ErrorKind::RuntimeError,
            ..
        }
    ));
}

#[tokio::test]
async fn audit_records_preprocess_failures() {
    let logger = Arc::new(CollectingAuditLogger::default());
    let host = ExecutionHost::with_audit_logger(EngineConfig::default(), logger.clone());

    host.run("", CapabilityBindings::new()).await;

    let entries = logger.entries.lock().unwrap();
    assert_eq!(entries.len(), 1);
    assert!(entries[0].profile.is_none());
    assert!(entries[0].binding_calls.is_empty());
}
