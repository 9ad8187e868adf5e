//! Execution host: runs a transformed script in a fresh V8 isolate.
//!
//! Each execution gets a brand new runtime. No state leaks between calls.
//!
//! V8 isolates are `!Send`, so all JsRuntime operations run on a dedicated
//! thread with its own single-threaded tokio runtime. The public API is
//! fully async and `Send`-safe.

use std::fmt;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, LazyLock};
use std::time::{Duration, Instant};

use deno_core::{v8, JsRuntime, PollEventLoopOptions, RuntimeOptions};
use regex::Regex;
use serde_json::Value;
use tokio::sync::Semaphore;

use crate::audit::{
    AuditLogger, AuditingCapability, BindingCallAudit, ExecutionAuditBuilder, NoopAuditLogger,
};
use crate::bindings::{Capability, CapabilityBindings};
use crate::classify::compile;
use crate::console::{LogBuffer, LogSink, TracingLogSink};
use crate::error::SandboxError;
use crate::ops::{codebox_ext, BindingCallLimits, ScriptOutcome};
use crate::preprocess::{prepare, PreprocessLimits};
use crate::result::{ErrorKind, ExecutionError, ExecutionPhase, ExecutionResult};
use crate::rewrite::TransformedScript;
use crate::validator::DEFAULT_MAX_CODE_SIZE;

/// Configuration for the execution host.
#[derive(Clone)]
pub struct EngineConfig {
    /// Default execution budget, used by [`ExecutionHost::run`].
    pub timeout: Duration,
    /// Maximum size of a submitted script in bytes.
    pub max_code_size: usize,
    /// Maximum size of the JSON-encoded output in bytes.
    pub max_output_size: usize,
    /// V8 heap limit in bytes.
    pub max_heap_size: usize,
    /// Maximum concurrent isolates.
    pub max_concurrent: usize,
    /// Maximum binding calls per execution.
    pub max_binding_calls: usize,
    /// Maximum size of one binding call's arguments in bytes.
    pub max_binding_args_size: usize,
    /// Maximum console lines kept per execution.
    pub max_log_entries: usize,
    /// Receives every console line as it is emitted.
    pub log_sink: Arc<dyn LogSink>,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            timeout: Duration::from_secs(5),
            max_code_size: DEFAULT_MAX_CODE_SIZE,
            max_output_size: 1024 * 1024,    // 1 MB
            max_heap_size: 64 * 1024 * 1024, // 64 MB
            max_concurrent: 8,
            max_binding_calls: 50,
            max_binding_args_size: 1024 * 1024, // 1 MB
            max_log_entries: 1000,
            log_sink: Arc::new(TracingLogSink),
        }
    }
}

impl fmt::Debug for EngineConfig {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("EngineConfig")
            .field("timeout", &self.timeout)
            .field("max_code_size", &self.max_code_size)
            .field("max_output_size", &self.max_output_size)
            .field("max_heap_size", &self.max_heap_size)
            .field("max_concurrent", &self.max_concurrent)
            .field("max_binding_calls", &self.max_binding_calls)
            .field("max_binding_args_size", &self.max_binding_args_size)
            .field("max_log_entries", &self.max_log_entries)
            .finish_non_exhaustive()
    }
}

/// The execution host. Creates a fresh V8 isolate for each execution.
///
/// This is `Send + Sync` safe: all V8 operations are dispatched to a
/// dedicated thread internally. A concurrency semaphore limits the number
/// of simultaneous isolates; callers beyond the limit wait for a permit.
pub struct ExecutionHost {
    config: EngineConfig,
    semaphore: Arc<Semaphore>,
    audit_logger: Arc<dyn AuditLogger>,
}

impl ExecutionHost {
    /// Create a new host with the given configuration.
    pub fn new(config: EngineConfig) -> Self {
        Self::with_audit_logger(config, Arc::new(NoopAuditLogger))
    }

    /// Create a new host with an audit logger.
    pub fn with_audit_logger(config: EngineConfig, logger: Arc<dyn AuditLogger>) -> Self {
        let semaphore = Arc::new(Semaphore::new(config.max_concurrent.max(1)));
        Self {
            config,
            semaphore,
            audit_logger: logger,
        }
    }

    /// The configuration this host was built with.
    pub fn config(&self) -> &EngineConfig {
        &self.config
    }

    /// Preprocess `source` and execute it within the configured timeout.
    ///
    /// A script the pipeline rejects never runs; it is reported with
    /// `error.kind = "PreprocessError"`.
    pub async fn run(&self, source: &str, bindings: CapabilityBindings) -> ExecutionResult {
        let started = Instant::now();
        let mut audit = ExecutionAuditBuilder::new(source);

        let limits = PreprocessLimits {
            max_code_size: self.config.max_code_size,
        };
        let prepared = match prepare(source, &limits) {
            Ok(prepared) => prepared,
            Err(e) => {
                tracing::warn!(
                    execution_id = audit.execution_id(),
                    error = %e,
                    "run: preprocessing failed"
                );
                let result =
                    ExecutionResult::failed(e.kind(), e.to_string(), Vec::new(), started.elapsed());
                self.audit_logger.log(&audit.finish(&result)).await;
                return result;
            }
        };

        audit.profile(prepared.profile);
        self.execute_audited(
            audit,
            &prepared.script,
            bindings,
            self.config.timeout,
            started,
        )
        .await
    }

    /// Execute an already transformed script. Never fails: every outcome,
    /// including host-side faults, is reported in the returned result.
    pub async fn execute(
        &self,
        script: &TransformedScript,
        bindings: CapabilityBindings,
        timeout: Duration,
    ) -> ExecutionResult {
        let audit = ExecutionAuditBuilder::new(script.as_str());
        self.execute_audited(audit, script, bindings, timeout, Instant::now())
            .await
    }

    async fn execute_audited(
        &self,
        mut audit: ExecutionAuditBuilder,
        script: &TransformedScript,
        bindings: CapabilityBindings,
        timeout: Duration,
        started: Instant,
    ) -> ExecutionResult {
        tracing::info!(
            execution_id = audit.execution_id(),
            script_len = script.len(),
            timeout_ms = millis(timeout),
            bindings = bindings.len(),
            "execute: starting"
        );

        let mut phase = ExecutionPhase::Pending;

        // Wrap every capability with audit tracking
        let (audit_tx, mut audit_rx) = tokio::sync::mpsc::unbounded_channel::<BindingCallAudit>();
        let bindings = bindings.map(|name, capability| {
            Arc::new(AuditingCapability::new(name, capability, audit_tx.clone()))
                as Arc<dyn Capability>
        });
        drop(audit_tx);

        let run = match self.semaphore.clone().acquire_owned().await {
            Ok(_permit) => {
                phase.advance(ExecutionPhase::Running);
                self.execute_in_thread(script, bindings, timeout).await
            }
            Err(_) => IsolateRun::failed(SandboxError::Execution(anyhow::anyhow!(
                "execution host is closed"
            ))),
        };

        let result = match run.outcome {
            Ok(output) => {
                phase.advance(ExecutionPhase::Completed);
                ExecutionResult::completed(output, run.logs, started.elapsed())
            }
            Err(error) => {
                phase.advance(if error.kind == ErrorKind::Timeout {
                    ExecutionPhase::TimedOut
                } else {
                    ExecutionPhase::Errored
                });
                ExecutionResult::failed(error.kind, error.message, run.logs, started.elapsed())
            }
        };
        debug_assert!(phase.is_terminal(), "execution ended in {phase:?}");

        // Collect binding call audits
        while let Ok(call) = audit_rx.try_recv() {
            audit.record_binding_call(call);
        }
        self.audit_logger.log(&audit.finish(&result)).await;

        match &result.error {
            None => tracing::info!(
                phase = ?phase,
                duration_ms = result.duration_ms,
                "execute: complete"
            ),
            Some(e) => tracing::warn!(
                phase = ?phase,
                kind = %e.kind,
                error = %e.message,
                "execute: failed"
            ),
        }

        result
    }

    /// Spawn a dedicated thread with its own V8 isolate and wait for it.
    async fn execute_in_thread(
        &self,
        script: &TransformedScript,
        bindings: CapabilityBindings,
        timeout: Duration,
    ) -> IsolateRun {
        let script = script.as_str().to_string();
        let config = self.config.clone();

        let (tx, rx) = tokio::sync::oneshot::channel();
        std::thread::spawn(move || {
            let run = match tokio::runtime::Builder::new_current_thread()
                .enable_all()
                .build()
            {
                Ok(rt) => rt.block_on(run_script(&config, &script, bindings, timeout)),
                Err(e) => IsolateRun::failed(SandboxError::Execution(e.into())),
            };
            if tx.send(run).is_err() {
                tracing::warn!("sandbox result receiver dropped before result was sent");
            }
        });

        rx.await.unwrap_or_else(|_| {
            IsolateRun::failed(SandboxError::Execution(anyhow::anyhow!(
                "sandbox thread panicked"
            )))
        })
    }
}

/// What one isolate produced: its logs and how it settled.
struct IsolateRun {
    logs: Vec<String>,
    outcome: Result<Option<Value>, ExecutionError>,
}

impl IsolateRun {
    fn failed(err: SandboxError) -> Self {
        Self {
            logs: Vec::new(),
            outcome: Err(execution_error(err)),
        }
    }
}

fn execution_error(err: SandboxError) -> ExecutionError {
    ExecutionError {
        kind: err.kind(),
        message: err.to_string(),
    }
}

fn millis(duration: Duration) -> u64 {
    u64::try_from(duration.as_millis()).unwrap_or(u64::MAX)
}

/// State for the near-heap-limit callback.
struct HeapLimitState {
    handle: v8::IsolateHandle,
    /// Whether the heap limit has been triggered. AtomicBool lets the callback
    /// use a shared `&` reference instead of `&mut`.
    triggered: AtomicBool,
}

/// V8 near-heap-limit callback. Terminates execution and grants 1MB grace
/// for the termination to propagate cleanly.
extern "C" fn near_heap_limit_callback(
    data: *mut std::ffi::c_void,
    current_heap_limit: usize,
    _initial_heap_limit: usize,
) -> usize {
    // SAFETY: `data` points to the `HeapLimitState` boxed in `run_script`,
    // which drops the runtime before the box. V8 only invokes this callback
    // while the isolate is alive.
    let state = unsafe { &*(data as *const HeapLimitState) };
    if !state.triggered.swap(true, Ordering::SeqCst) {
        state.handle.terminate_execution();
    }
    current_heap_limit + 1024 * 1024
}

/// Bootstrap run before the script. Receives the op table and the binding
/// method table, installs `console`, the binding globals and `require`, then
/// removes `Deno` and the code generation primitives. The script itself is
/// evaluated once through `__codebox_run`, which removes itself first.
const BOOTSTRAP: &str = r#"(ops, methods) => {
    const indirectEval = globalThis.eval;
    const logOp = ops.op_codebox_log;
    const setResult = (json) => ops.op_codebox_set_result(json);
    const requireOp = ops.op_codebox_require;
    const callBindingOp = ops.op_codebox_call_binding;

    const formatValue = (value) => {
        if (typeof value === 'string') return value;
        if (value instanceof Error) return `${value.name}: ${value.message}`;
        if (typeof value === 'function') return `[Function ${value.name || 'anonymous'}]`;
        if (typeof value === 'bigint') return `${value}n`;
        if (typeof value === 'symbol' || value === undefined) return String(value);
        try {
            const json = JSON.stringify(value);
            return json === undefined ? String(value) : json;
        } catch (_) {
            return String(value);
        }
    };

    const console = {};
    for (const level of ['log', 'info', 'warn', 'error', 'debug', 'trace']) {
        console[level] = (...args) => logOp(level, args.map(formatValue).join(' '));
    }
    Object.defineProperty(globalThis, 'console', {
        value: Object.freeze(console), writable: true, configurable: true
    });

    const bindings = {};
    for (const [name, names] of Object.entries(methods)) {
        const binding = {};
        for (const method of names) {
            binding[method] = async (...args) => {
                const resultJson = await callBindingOp(name, method, JSON.stringify(args));
                return JSON.parse(resultJson);
            };
        }
        bindings[name] = Object.freeze(binding);
        Object.defineProperty(globalThis, name, {
            value: bindings[name], enumerable: true, writable: false, configurable: false
        });
    }
    Object.defineProperty(globalThis, 'require', {
        value: (specifier) => bindings[requireOp(String(specifier))],
        writable: true, configurable: true
    });

    const report = (e) => {
        const name = (e !== null && typeof e === 'object' && typeof e.name === 'string')
            ? e.name : 'Error';
        const message = (e !== null && typeof e === 'object' && typeof e.message === 'string')
            ? e.message : String(e);
        setResult(JSON.stringify({ error: { name, message } }));
    };

    const settle = async (value) => {
        try {
            if (typeof value === 'function') value = value();
            value = await value;
        } catch (e) {
            report(e);
            return;
        }
        let json;
        try {
            json = JSON.stringify({ output: value });
        } catch (e) {
            report(new TypeError(`output is not JSON-serializable: ${e.message}`));
            return;
        }
        setResult(json);
    };

    Object.defineProperty(globalThis, '__codebox_run', {
        configurable: true,
        value: (source) => {
            delete globalThis.__codebox_run;
            let value;
            try {
                value = indirectEval(source);
            } catch (e) {
                report(e);
                return;
            }
            settle(value);
        }
    });

    delete globalThis.Deno;
    delete globalThis.eval;
    const constructors = [
        Function,
        (async function(){}).constructor,
        (function*(){}).constructor,
        (async function*(){}).constructor,
    ];
    for (const ctor of constructors) {
        Object.defineProperty(ctor.prototype, 'constructor', {
            value: undefined, configurable: false, writable: false
        });
    }
    delete globalThis.Function;
}"#;

fn build_bootstrap(bindings: &CapabilityBindings) -> Result<String, SandboxError> {
    let methods = serde_json::to_string(&bindings.method_table())?;
    Ok(format!("({})(Deno.core.ops, {});", BOOTSTRAP, methods))
}

/// Create a fresh JsRuntime with the codebox extension loaded, per-execution
/// state in OpState, V8 heap limits set and the bootstrap applied.
fn create_runtime(
    config: &EngineConfig,
    bindings: CapabilityBindings,
) -> Result<JsRuntime, SandboxError> {
    let bootstrap = build_bootstrap(&bindings)?;
    let create_params = v8::CreateParams::default().heap_limits(0, config.max_heap_size);

    let mut runtime = JsRuntime::new(RuntimeOptions {
        extensions: vec![codebox_ext::init()],
        create_params: Some(create_params),
        ..Default::default()
    });

    {
        let op_state = runtime.op_state();
        let mut state = op_state.borrow_mut();
        state.put(bindings);
        state.put(BindingCallLimits {
            max_calls: config.max_binding_calls,
            max_args_size: config.max_binding_args_size,
            calls_made: 0,
        });
        state.put(LogBuffer::new(config.max_log_entries));
        state.put(config.log_sink.clone());
    }

    runtime
        .execute_script("[codebox:bootstrap]", bootstrap)
        .map_err(|e| SandboxError::Execution(anyhow::anyhow!("bootstrap failed: {e}")))?;

    Ok(runtime)
}

/// Run one script on the current thread (must be a dedicated thread, not the
/// caller's tokio runtime).
///
/// Sets up a CPU watchdog thread and near-heap-limit callback before running
/// the script. The watchdog terminates V8 execution if the budget elapses
/// (CPU-bound loops); the event loop is bounded by the remaining budget
/// (slow bindings). The heap callback terminates execution if V8 approaches
/// the heap limit.
async fn run_script(
    config: &EngineConfig,
    script: &str,
    bindings: CapabilityBindings,
    timeout: Duration,
) -> IsolateRun {
    let mut runtime = match create_runtime(config, bindings) {
        Ok(runtime) => runtime,
        Err(e) => return IsolateRun::failed(e),
    };
    let invoke = match serde_json::to_string(script) {
        Ok(source) => format!("globalThis.__codebox_run({source});"),
        Err(e) => return IsolateRun::failed(e.into()),
    };

    // --- Set up heap limit callback ---
    let heap_state = Box::new(HeapLimitState {
        handle: runtime.v8_isolate().thread_safe_handle(),
        triggered: AtomicBool::new(false),
    });
    runtime.v8_isolate().add_near_heap_limit_callback(
        near_heap_limit_callback,
        &*heap_state as *const HeapLimitState as *mut std::ffi::c_void,
    );

    // --- Set up CPU watchdog ---
    let started = Instant::now();
    let watchdog_handle = runtime.v8_isolate().thread_safe_handle();
    let timed_out = Arc::new(AtomicBool::new(false));
    let watchdog_timed_out = timed_out.clone();
    let (cancel_tx, cancel_rx) = std::sync::mpsc::channel::<()>();

    let watchdog = std::thread::spawn(move || {
        if let Err(std::sync::mpsc::RecvTimeoutError::Timeout) = cancel_rx.recv_timeout(timeout) {
            watchdog_timed_out.store(true, Ordering::SeqCst);
            watchdog_handle.terminate_execution();
        }
    });

    // --- Execute the script ---
    let mut event_loop_timed_out = false;
    let exec_error = match runtime.execute_script("[codebox:script]", invoke) {
        Ok(_) => {
            let remaining = timeout.saturating_sub(started.elapsed());
            match tokio::time::timeout(
                remaining,
                runtime.run_event_loop(PollEventLoopOptions::default()),
            )
            .await
            {
                Ok(Ok(())) => None,
                Ok(Err(e)) => Some(e.to_string()),
                Err(_) => {
                    event_loop_timed_out = true;
                    None
                }
            }
        }
        Err(e) => Some(e.to_string()),
    };

    // --- Cleanup: cancel watchdog and wait for it to exit ---
    // The watchdog must be gone before the runtime drops its isolate.
    let _ = cancel_tx.send(());
    let _ = watchdog.join();

    let logs = runtime
        .op_state()
        .borrow_mut()
        .try_take::<LogBuffer>()
        .map(LogBuffer::into_lines)
        .unwrap_or_default();

    let settled = runtime.op_state().borrow().has::<ScriptOutcome>();

    // --- Check error causes in priority order ---
    // A result recorded before the budget ran out wins over the timeout.
    let outcome = if heap_state.triggered.load(Ordering::SeqCst) {
        Err(execution_error(SandboxError::HeapLimitExceeded))
    } else if settled && exec_error.is_none() {
        read_outcome(&mut runtime, config.max_output_size)
    } else if timed_out.load(Ordering::SeqCst) || event_loop_timed_out {
        Err(execution_error(SandboxError::Timeout {
            timeout_ms: millis(timeout),
        }))
    } else if let Some(text) = exec_error {
        Err(exception_error(&text))
    } else {
        read_outcome(&mut runtime, config.max_output_size)
    };

    drop(runtime);
    drop(heap_state);

    IsolateRun { logs, outcome }
}

/// Decode the settlement envelope written by the bootstrap.
fn read_outcome(
    runtime: &mut JsRuntime,
    max_output_size: usize,
) -> Result<Option<Value>, ExecutionError> {
    let json = {
        let state = runtime.op_state();
        let state = state.borrow();
        state.try_borrow::<ScriptOutcome>().map(|o| o.0.clone())
    };
    let Some(json) = json else {
        return Err(ExecutionError {
            kind: ErrorKind::RuntimeError,
            message: "script never settled its result".into(),
        });
    };

    if json.len() > max_output_size {
        return Err(execution_error(SandboxError::OutputTooLarge {
            max: max_output_size,
        }));
    }

    let envelope: Value =
        serde_json::from_str(&json).map_err(|e| execution_error(SandboxError::from(e)))?;

    if let Some(thrown) = envelope.get("error") {
        let name = thrown.get("name").and_then(Value::as_str).unwrap_or("Error");
        let message = thrown
            .get("message")
            .and_then(Value::as_str)
            .filter(|m| !m.is_empty())
            .unwrap_or(name);
        return Err(ExecutionError {
            kind: kind_for(name),
            message: message.to_string(),
        });
    }

    Ok(envelope.get("output").cloned())
}

static EXCEPTION_HEAD: LazyLock<Regex> =
    LazyLock::new(|| compile(r"^((?:[A-Z][A-Za-z]*)?Error): ?(.*)$"));

/// Classify an exception that escaped the bootstrap's own handlers, from
/// its rendered text (`Uncaught SyntaxError: ...` and stack frames).
fn exception_error(text: &str) -> ExecutionError {
    let head = text.lines().next().unwrap_or_default().trim();
    let head = head
        .strip_prefix("Uncaught (in promise) ")
        .or_else(|| head.strip_prefix("Uncaught "))
        .unwrap_or(head);
    match EXCEPTION_HEAD.captures(head) {
        Some(caps) => ExecutionError {
            kind: kind_for(&caps[1]),
            message: caps[2].to_string(),
        },
        None => ExecutionError {
            kind: ErrorKind::RuntimeError,
            message: head.to_string(),
        },
    }
}

fn kind_for(name: &str) -> ErrorKind {
    if name == "SyntaxError" {
        ErrorKind::SyntaxError
    } else {
        ErrorKind::RuntimeError
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::bindings::BindingName;
    use codebox_error::BindingError;

    fn host() -> ExecutionHost {
        ExecutionHost::new(EngineConfig {
            timeout: Duration::from_secs(2),
            ..Default::default()
        })
    }

    async fn run(code: &str) -> ExecutionResult {
        host()
            .execute(
                &TransformedScript::new(code),
                CapabilityBindings::new(),
                Duration::from_secs(2),
            )
            .await
    }

    #[test]
    fn uncaught_exception_text_is_classified() {
        let err = exception_error(
            "Uncaught SyntaxError: Unexpected token '}'\n    at [codebox:script]:1:5",
        );
        assert_eq!(err.kind, ErrorKind::SyntaxError);
        assert_eq!(err.message, "Unexpected token '}'");

        let err = exception_error("Uncaught (in promise) TypeError: x is not a function");
        assert_eq!(err.kind, ErrorKind::RuntimeError);
        assert_eq!(err.message, "x is not a function");

        let err = exception_error("Uncaught Error: boom");
        assert_eq!(err.kind, ErrorKind::RuntimeError);
        assert_eq!(err.message, "boom");

        let err = exception_error("Uncaught 42");
        assert_eq!(err.kind, ErrorKind::RuntimeError);
        assert_eq!(err.message, "42");
    }

    #[test]
    fn bootstrap_embeds_method_table() {
        struct Lookup;

        #[async_trait::async_trait]
        impl Capability for Lookup {
            fn methods(&self) -> Vec<String> {
                vec!["get".into(), "set".into()]
            }

            async fn call(&self, _method: &str, _args: Vec<Value>) -> Result<Value, BindingError> {
                Ok(Value::Null)
            }
        }

        let bindings = CapabilityBindings::new().with(BindingName::Metadata, Lookup);
        let bootstrap = build_bootstrap(&bindings).unwrap();
        assert!(bootstrap.ends_with(r#"(Deno.core.ops, {"metadata":["get","set"]});"#));
    }

    #[test]
    fn default_config_matches_documented_limits() {
        let config = EngineConfig::default();
        assert_eq!(config.timeout, Duration::from_secs(5));
        assert_eq!(config.max_code_size, 64 * 1024);
        assert_eq!(config.max_concurrent, 8);
        assert_eq!(config.max_binding_calls, 50);
        assert_eq!(config.max_log_entries, 1000);
        let debug = format!("{config:?}");
        assert!(debug.contains("max_heap_size"));
    }

    #[tokio::test]
    async fn completion_value_becomes_output() {
        let result = run("const a = 20; a + 22").await;
        assert!(result.ok, "{result:?}");
        assert_eq!(result.output, Some(serde_json::json!(42)));
    }

    #[tokio::test]
    async fn function_completion_is_called_and_awaited() {
        let result = run("async () => ({ done: true })").await;
        assert_eq!(result.output, Some(serde_json::json!({ "done": true })));
    }

    #[tokio::test]
    async fn undefined_completion_has_no_output() {
        let result = run("let unused = 1;").await;
        assert!(result.ok);
        assert_eq!(result.output, None);
    }

    #[tokio::test]
    async fn null_completion_is_kept() {
        let result = run("null").await;
        assert!(result.ok);
        assert_eq!(result.output, Some(Value::Null));
    }

    #[tokio::test]
    async fn thrown_error_is_runtime_error() {
        let result = run("throw new RangeError('out of range')").await;
        assert!(!result.ok);
        assert_eq!(result.error_kind(), Some(ErrorKind::RuntimeError));
        assert_eq!(result.error.unwrap().message, "out of range");
    }

    #[tokio::test]
    async fn thrown_non_error_is_stringified() {
        let result = run("throw 'plain'").await;
        assert_eq!(result.error.unwrap().message, "plain");
    }

    #[tokio::test]
    async fn rejected_promise_is_runtime_error() {
        let result = run("(async () => { throw new Error('later'); })()").await;
        assert_eq!(result.error_kind(), Some(ErrorKind::RuntimeError));
        assert_eq!(result.error.unwrap().message, "later");
    }

    #[tokio::test]
    async fn malformed_script_is_syntax_error() {
        let result = run("function f( {").await;
        assert_eq!(result.error_kind(), Some(ErrorKind::SyntaxError));
    }

    #[tokio::test]
    async fn unserializable_output_is_reported() {
        let result = run("const o = {}; o.self = o; o").await;
        assert_eq!(result.error_kind(), Some(ErrorKind::RuntimeError));
        assert!(result
            .error
            .unwrap()
            .message
            .starts_with("output is not JSON-serializable"));
    }

    #[tokio::test]
    async fn large_output_is_rejected() {
        let host = ExecutionHost::new(EngineConfig {
            max_output_size: 64,
            ..Default::default()
        });
        let result = host
            .execute(
                &TransformedScript::new("'x'.repeat(1000)"),
                CapabilityBindings::new(),
                Duration::from_secs(2),
            )
            .await;
        assert_eq!(result.error_kind(), Some(ErrorKind::RuntimeError));
        assert!(result.error.unwrap().message.contains("output exceeds"));
    }

    #[tokio::test]
    async fn cpu_bound_loop_is_terminated() {
        let start = Instant::now();
        let result = host()
            .execute(
                &TransformedScript::new("while (true) {}"),
                CapabilityBindings::new(),
                Duration::from_millis(100),
            )
            .await;
        assert_eq!(result.error_kind(), Some(ErrorKind::Timeout));
        assert!(start.elapsed() < Duration::from_secs(2));
    }

    #[tokio::test]
    async fn heap_limit_prevents_oom() {
        let host = ExecutionHost::new(EngineConfig {
            max_heap_size: 10 * 1024 * 1024,
            ..Default::default()
        });
        let result = host
            .execute(
                &TransformedScript::new(
                    "const a = []; while (true) { a.push('x'.repeat(1024)); }",
                ),
                CapabilityBindings::new(),
                Duration::from_secs(10),
            )
            .await;
        assert!(!result.ok);
        let error = result.error.unwrap();
        assert!(
            error.message == "heap limit exceeded" || error.kind == ErrorKind::Timeout,
            "{error:?}"
        );
    }

    #[tokio::test]
    async fn deno_and_eval_are_not_accessible() {
        let result = run("[typeof Deno, typeof eval, typeof __codebox_run]").await;
        assert_eq!(
            result.output,
            Some(serde_json::json!(["undefined", "undefined", "undefined"]))
        );
    }

    #[tokio::test]
    async fn function_constructor_is_blocked() {
        let result = run("(function(){}).constructor").await;
        assert!(result.ok);
        assert_eq!(result.output, None);
        let result = run("(async function(){}).constructor('return 1')").await;
        assert_eq!(result.error_kind(), Some(ErrorKind::RuntimeError));
    }

    #[tokio::test]
    async fn code_generation_from_strings_is_unavailable() {
        let result = run("[typeof Function, typeof globalThis.Function]").await;
        assert_eq!(
            result.output,
            Some(serde_json::json!(["undefined", "undefined"]))
        );

        let result = run("Function('return 7')()").await;
        assert_eq!(result.error_kind(), Some(ErrorKind::RuntimeError));
        assert!(result.error.unwrap().message.contains("Function"));

        let result = run("(async function*(){}).constructor").await;
        assert!(result.ok);
        assert_eq!(result.output, None);
    }

    #[tokio::test]
    async fn console_formats_values() {
        let result = run(
            "console.log('a', 1, {b: 2}); console.warn(new TypeError('bad')); \
             console.info(undefined, null, [1]); console.error(function named(){})",
        )
        .await;
        assert_eq!(
            result.logs,
            vec![
                "a 1 {\"b\":2}",
                "TypeError: bad",
                "undefined null [1]",
                "[Function named]"
            ]
        );
    }
}
