#![warn(missing_docs)]

//! codebox: run, transform or classify an agent script from the command line.

use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;

use anyhow::{bail, Context, Result};
use codebox_config::{AuditOverrides, CodeboxConfig, EngineOverrides};
use codebox_sandbox::audit::{AuditLogger, NoopAuditLogger, TracingAuditLogger};
use codebox_sandbox::{
    classify, mask, prepare, CapabilityBindings, EngineConfig, ExecutionHost, ExecutionResult,
    PreprocessLimits,
};
use tracing_subscriber::EnvFilter;

const USAGE: &str = "usage: codebox <run|transform|classify> <file> [--timeout-ms N]\n       codebox --version";

/// A parsed command line.
#[derive(Debug, PartialEq, Eq)]
enum Command {
    /// Preprocess and execute the script, printing the result.
    Run {
        path: PathBuf,
        timeout_ms: Option<u64>,
    },
    /// Print the transformed script.
    Transform { path: PathBuf },
    /// Print the syntax profile.
    Classify { path: PathBuf },
    /// Print the version.
    Version,
}

fn parse_args(args: &[String]) -> Result<Command> {
    if args.iter().any(|a| a == "--version" || a == "-V") {
        return Ok(Command::Version);
    }

    let mut positional = Vec::new();
    let mut timeout_ms = None;
    let mut iter = args.iter();
    while let Some(arg) = iter.next() {
        match arg.as_str() {
            "--timeout-ms" => {
                let value = iter.next().context("--timeout-ms needs a value")?;
                let ms: u64 = value
                    .parse()
                    .with_context(|| format!("invalid --timeout-ms value '{value}'"))?;
                if ms == 0 {
                    bail!("--timeout-ms must be greater than 0");
                }
                timeout_ms = Some(ms);
            }
            flag if flag.starts_with("--") => bail!("unknown option '{flag}'\n{USAGE}"),
            _ => positional.push(arg.as_str()),
        }
    }

    match positional.as_slice() {
        ["run", path] => Ok(Command::Run {
            path: PathBuf::from(path),
            timeout_ms,
        }),
        ["transform", path] if timeout_ms.is_none() => Ok(Command::Transform {
            path: PathBuf::from(path),
        }),
        ["classify", path] if timeout_ms.is_none() => Ok(Command::Classify {
            path: PathBuf::from(path),
        }),
        _ => bail!("{USAGE}"),
    }
}

/// Build EngineConfig from config overrides.
fn build_engine_config(overrides: &EngineOverrides) -> EngineConfig {
    let mut config = EngineConfig::default();
    if let Some(ms) = overrides.timeout_ms {
        config.timeout = Duration::from_millis(ms);
    }
    if let Some(kb) = overrides.max_code_size_kb {
        config.max_code_size = kb * 1024;
    }
    if let Some(kb) = overrides.max_output_size_kb {
        config.max_output_size = kb * 1024;
    }
    if let Some(heap) = overrides.max_heap_mb {
        config.max_heap_size = heap * 1024 * 1024;
    }
    if let Some(concurrent) = overrides.max_concurrent {
        config.max_concurrent = concurrent;
    }
    if let Some(calls) = overrides.max_binding_calls {
        config.max_binding_calls = calls;
    }
    if let Some(entries) = overrides.max_log_entries {
        config.max_log_entries = entries;
    }
    config
}

fn audit_logger(overrides: &AuditOverrides) -> Arc<dyn AuditLogger> {
    if overrides.enabled.unwrap_or(false) {
        Arc::new(TracingAuditLogger)
    } else {
        Arc::new(NoopAuditLogger)
    }
}

/// Locate the config file.
///
/// Search order:
/// 1. `CODEBOX_CONFIG` environment variable
/// 2. `./codebox.toml` in the current directory
/// 3. None (no config file found, not an error)
fn find_config_file() -> Option<PathBuf> {
    if let Ok(path) = std::env::var("CODEBOX_CONFIG") {
        let p = PathBuf::from(path);
        if p.exists() {
            return Some(p);
        }
    }

    let cwd = PathBuf::from("codebox.toml");
    if cwd.exists() {
        return Some(cwd);
    }

    None
}

fn load_config() -> Result<CodeboxConfig> {
    match find_config_file() {
        Some(path) => {
            tracing::info!(path = %path.display(), "loading config");
            CodeboxConfig::from_file_with_env(&path)
                .with_context(|| format!("failed to load config from {}", path.display()))
        }
        None => {
            tracing::debug!("no config file found, using defaults");
            Ok(CodeboxConfig::default())
        }
    }
}

fn read_script(path: &Path) -> Result<String> {
    std::fs::read_to_string(path)
        .with_context(|| format!("failed to read script {}", path.display()))
}

async fn run_file(
    path: &Path,
    engine: EngineConfig,
    audit: &AuditOverrides,
) -> Result<ExecutionResult> {
    let source = read_script(path)?;
    let host = ExecutionHost::with_audit_logger(engine, audit_logger(audit));
    Ok(host.run(&source, CapabilityBindings::new()).await)
}

fn transform_file(path: &Path, engine: &EngineConfig) -> Result<String> {
    let source = read_script(path)?;
    let limits = PreprocessLimits {
        max_code_size: engine.max_code_size,
    };
    let prepared = prepare(&source, &limits)
        .with_context(|| format!("failed to transform {}", path.display()))?;
    Ok(prepared.script.into_string())
}

fn classify_file(path: &Path) -> Result<String> {
    let source = read_script(path)?;
    let profile = classify(&mask(&source));
    Ok(serde_json::to_string_pretty(&profile)?)
}

#[tokio::main]
async fn main() -> Result<()> {
    let args: Vec<String> = std::env::args().skip(1).collect();
    let command = parse_args(&args)?;

    // Handle --version / -V before anything else
    if command == Command::Version {
        println!("codebox {}", env!("CARGO_PKG_VERSION"));
        return Ok(());
    }

    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .with_writer(std::io::stderr)
        .init();

    let config = load_config()?;
    let mut engine = build_engine_config(&config.engine);

    match command {
        Command::Run { path, timeout_ms } => {
            if let Some(ms) = timeout_ms {
                engine.timeout = Duration::from_millis(ms);
            }
            let result = run_file(&path, engine, &config.audit).await?;
            println!("{}", serde_json::to_string_pretty(&result)?);
            if !result.ok {
                std::process::exit(1);
            }
        }
        Command::Transform { path } => println!("{}", transform_file(&path, &engine)?),
        Command::Classify { path } => println!("{}", classify_file(&path)?),
        Command::Version => {}
    }

    Ok(())
}
