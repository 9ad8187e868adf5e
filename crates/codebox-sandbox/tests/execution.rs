//! End-to-end tests for the execution host: preprocessing, execution,
//! timeouts, log capture and isolation between concurrent executions.

use std::sync::Arc;
use std::time::{Duration, Instant};

use codebox_sandbox::{
    CapabilityBindings, EngineConfig, ErrorKind, ExecutionHost, NoopLogSink, TransformedScript,
};
use serde_json::json;

fn host() -> ExecutionHost {
    ExecutionHost::new(EngineConfig {
        timeout: Duration::from_secs(1),
        log_sink: Arc::new(NoopLogSink),
        ..Default::default()
    })
}

#[tokio::test]
async fn default_function_export_returns_output() {
    let result = host()
        .run(
            "export default function(){ return 2+2; }",
            CapabilityBindings::new(),
        )
        .await;
    assert!(result.ok, "{result:?}");
    assert_eq!(result.output, Some(json!(4)));
    assert!(result.logs.is_empty());
    assert!(result.error.is_none());
}

#[tokio::test]
async fn default_async_function_export_is_awaited() {
    let result = host()
        .run(
            "export default async function run(){ return 1; }",
            CapabilityBindings::new(),
        )
        .await;
    assert!(result.ok, "{result:?}");
    assert_eq!(result.output, Some(json!(1)));
}

#[tokio::test]
async fn logs_before_throw_are_kept() {
    let result = host()
        .run(
            "console.log('hi'); throw new Error('boom');",
            CapabilityBindings::new(),
        )
        .await;
    assert!(!result.ok);
    assert_eq!(result.logs, vec!["hi"]);
    let error = result.error.unwrap();
    assert_eq!(error.kind, ErrorKind::RuntimeError);
    assert_eq!(error.message, "boom");
}

#[tokio::test]
async fn infinite_loop_times_out() {
    let start = Instant::now();
    let result = host()
        .execute(
            &TransformedScript::new("console.log('spinning'); for (;;) {}"),
            CapabilityBindings::new(),
            Duration::from_millis(100),
        )
        .await;
    let elapsed = start.elapsed();

    assert!(!result.ok);
    assert_eq!(result.error_kind(), Some(ErrorKind::Timeout));
    assert_eq!(result.logs, vec!["spinning"]);
    assert!(elapsed < Duration::from_secs(1), "took {elapsed:?}");
    assert!(result.duration_ms >= 100);
}

#[tokio::test]
async fn async_loop_times_out() {
    let result = host()
        .execute(
            &TransformedScript::new("(async () => { while (true) { await null; } })()"),
            CapabilityBindings::new(),
            Duration::from_millis(100),
        )
        .await;
    assert_eq!(result.error_kind(), Some(ErrorKind::Timeout));
}

#[tokio::test]
async fn concurrent_executions_are_isolated() {
    let host = Arc::new(host());

    let failing = {
        let host = host.clone();
        tokio::spawn(async move {
            host.run(
                "console.log('from failing'); globalThis.leak = 1; throw new Error('fail');",
                CapabilityBindings::new(),
            )
            .await
        })
    };
    let passing = {
        let host = host.clone();
        tokio::spawn(async move {
            host.run(
                "console.log('from passing'); export default function(){ return typeof globalThis.leak; }",
                CapabilityBindings::new(),
            )
            .await
        })
    };

    let failing = failing.await.unwrap();
    let passing = passing.await.unwrap();

    assert!(!failing.ok);
    assert_eq!(failing.logs, vec!["from failing"]);
    assert_eq!(failing.error.unwrap().message, "fail");

    assert!(passing.ok, "{passing:?}");
    assert_eq!(passing.logs, vec!["from passing"]);
    assert_eq!(passing.output, Some(json!("undefined")));
}

#[tokio::test]
async fn timeout_does_not_affect_sibling_execution() {
    let host = Arc::new(host());

    let slow = {
        let host = host.clone();
        tokio::spawn(async move {
            host.execute(
                &TransformedScript::new("while (true) {}"),
                CapabilityBindings::new(),
                Duration::from_millis(100),
            )
            .await
        })
    };
    let quick = host
        .execute(
            &TransformedScript::new("'done'"),
            CapabilityBindings::new(),
            Duration::from_secs(1),
        )
        .await;

    assert_eq!(quick.output, Some(json!("done")));
    assert_eq!(slow.await.unwrap().error_kind(), Some(ErrorKind::Timeout));
}

#[tokio::test]
async fn typescript_is_stripped_before_execution() {
    let source = r#"
interface Point { x: number; y: number }
type Pair = [number, number];
function add(a: number, b: number): number { return a + b; }
const p = { x: 1, y: 2 } as Point;
export default function(): number { return add(p.x, p.y); }
"#;
    let result = host().run(source, CapabilityBindings::new()).await;
    assert!(result.ok, "{result:?}");
    assert_eq!(result.output, Some(json!(3)));
}

#[tokio::test]
async fn module_syntax_is_erased_before_execution() {
    let source = "import fs from 'fs';\nexport const base = 40;\nexport function inc(n) { return n + 2; }\nexport default () => inc(base);";
    let result = host().run(source, CapabilityBindings::new()).await;
    assert!(result.ok, "{result:?}");
    assert_eq!(result.output, Some(json!(42)));
}

#[tokio::test]
async fn self_invoking_script_runs_once() {
    let source = "(async function(){ console.log('once'); return 'ok'; })();";
    let result = host().run(source, CapabilityBindings::new()).await;
    assert_eq!(result.logs, vec!["once"]);
    assert_eq!(result.output, Some(json!("ok")));
}

#[tokio::test]
async fn malformed_script_reports_syntax_error() {
    let result = host()
        .run("const = 5;", CapabilityBindings::new())
        .await;
    assert!(!result.ok);
    assert_eq!(result.error_kind(), Some(ErrorKind::SyntaxError));
}

#[tokio::test]
async fn empty_script_is_preprocess_error() {
    let result = host().run("  \n ", CapabilityBindings::new()).await;
    assert!(!result.ok);
    assert_eq!(result.error_kind(), Some(ErrorKind::PreprocessError));
    assert_eq!(result.error.unwrap().message, "script is empty");
}

#[tokio::test]
async fn oversized_script_is_preprocess_error() {
    let host = ExecutionHost::new(EngineConfig {
        max_code_size: 16,
        ..Default::default()
    });
    let result = host
        .run("console.log('this is too long');", CapabilityBindings::new())
        .await;
    assert_eq!(result.error_kind(), Some(ErrorKind::PreprocessError));
}

#[tokio::test]
async fn log_entries_are_capped() {
    let host = ExecutionHost::new(EngineConfig {
        max_log_entries: 3,
        log_sink: Arc::new(NoopLogSink),
        ..Default::default()
    });
    let result = host
        .run(
            "for (let i = 0; i < 10; i++) console.log(`line ${i}`);",
            CapabilityBindings::new(),
        )
        .await;
    assert!(result.ok, "{result:?}");
    assert_eq!(
        result.logs,
        vec![
            "line 0",
            "line 1",
            "line 2",
            "[7 more log entries truncated]"
        ]
    );
}

#[tokio::test]
async fn every_console_method_is_captured_in_order() {
    let result = host()
        .run(
            "console.log(1); console.info(2); console.warn(3); console.error(4); console.debug(5); console.trace(6);",
            CapabilityBindings::new(),
        )
        .await;
    assert_eq!(result.logs, vec!["1", "2", "3", "4", "5", "6"]);
}

#[tokio::test]
async fn result_serializes_to_wire_shape() {
    let result = host()
        .run("console.log('x'); 'y'", CapabilityBindings::new())
        .await;
    let wire = serde_json::to_value(&result).unwrap();
    assert_eq!(wire["ok"], true);
    assert_eq!(wire["output"], "y");
    assert_eq!(wire["logs"], json!(["x"]));
    assert!(wire.get("error").is_none());
    assert!(wire["durationMs"].is_u64());
}

#[tokio::test]
async fn concurrency_limit_queues_excess_executions() {
    let host = Arc::new(ExecutionHost::new(EngineConfig {
        max_concurrent: 1,
        ..Default::default()
    }));
    let mut handles = Vec::new();
    for i in 0..3 {
        let host = host.clone();
        handles.push(tokio::spawn(async move {
            host.execute(
                &TransformedScript::new(format!("{i} * 2")),
                CapabilityBindings::new(),
                Duration::from_secs(1),
            )
            .await
        }));
    }
    for (i, handle) in handles.into_iter().enumerate() {
        let result = handle.await.unwrap();
        assert_eq!(result.output, Some(json!(i * 2)));
    }
}
