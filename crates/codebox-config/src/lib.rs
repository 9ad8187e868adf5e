#![warn(missing_docs)]

//! # codebox-config
//!
//! Configuration loading for the codebox script engine.
//!
//! Supports TOML configuration files with environment variable expansion.
//!
//! ## Example
//!
//! ```toml
//! [engine]
//! timeout_ms = 5000
//! max_heap_mb = 64
//! max_concurrent = 8
//! max_binding_calls = 50
//!
//! [audit]
//! enabled = true
//! ```

use std::path::Path;

use serde::Deserialize;
use thiserror::Error;

/// Errors from config parsing.
#[derive(Debug, Error)]
pub enum ConfigError {
    /// Failed to read config file.
    #[error("failed to read config file: {0}")]
    Io(#[from] std::io::Error),

    /// Failed to parse TOML.
    #[error("failed to parse config: {0}")]
    Parse(#[from] toml::de::Error),

    /// Invalid configuration value.
    #[error("invalid config: {0}")]
    Invalid(String),
}

/// Top-level codebox configuration.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct CodeboxConfig {
    /// Execution engine settings.
    #[serde(default)]
    pub engine: EngineOverrides,

    /// Audit trail settings.
    #[serde(default)]
    pub audit: AuditOverrides,
}

/// Engine configuration overrides. Unset fields keep the engine defaults.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct EngineOverrides {
    /// Wall-clock budget per execution in milliseconds.
    #[serde(default)]
    pub timeout_ms: Option<u64>,

    /// Maximum script size in kilobytes.
    #[serde(default)]
    pub max_code_size_kb: Option<usize>,

    /// Maximum JSON-encoded output size in kilobytes.
    #[serde(default)]
    pub max_output_size_kb: Option<usize>,

    /// Maximum V8 heap size in megabytes.
    #[serde(default)]
    pub max_heap_mb: Option<usize>,

    /// Maximum concurrent executions.
    #[serde(default)]
    pub max_concurrent: Option<usize>,

    /// Maximum capability binding calls per execution.
    #[serde(default)]
    pub max_binding_calls: Option<usize>,

    /// Maximum captured console lines per execution.
    #[serde(default)]
    pub max_log_entries: Option<usize>,
}

/// Audit trail overrides.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct AuditOverrides {
    /// Emit one audit event per execution through `tracing`.
    #[serde(default)]
    pub enabled: Option<bool>,
}

impl CodeboxConfig {
    /// Parse a config from a TOML string.
    pub fn from_toml(toml_str: &str) -> Result<Self, ConfigError> {
        let config: CodeboxConfig = toml::from_str(toml_str)?;
        config.validate()?;
        Ok(config)
    }

    /// Load config from a file path.
    pub fn from_file(path: &Path) -> Result<Self, ConfigError> {
        let content = std::fs::read_to_string(path)?;
        Self::from_toml(&content)
    }

    /// Parse a config from a TOML string, expanding `${ENV_VAR}` references.
    pub fn from_toml_with_env(toml_str: &str) -> Result<Self, ConfigError> {
        let expanded = expand_env_vars(toml_str);
        Self::from_toml(&expanded)
    }

    /// Load config from a file path, expanding environment variables.
    pub fn from_file_with_env(path: &Path) -> Result<Self, ConfigError> {
        let content = std::fs::read_to_string(path)?;
        Self::from_toml_with_env(&content)
    }

    fn validate(&self) -> Result<(), ConfigError> {
        let engine = &self.engine;
        if engine.timeout_ms == Some(0) {
            return Err(ConfigError::Invalid(
                "engine.timeout_ms must be greater than 0".into(),
            ));
        }
        if engine.max_concurrent == Some(0) {
            return Err(ConfigError::Invalid(
                "engine.max_concurrent must be greater than 0".into(),
            ));
        }
        if engine.max_code_size_kb == Some(0) {
            return Err(ConfigError::Invalid(
                "engine.max_code_size_kb must be greater than 0".into(),
            ));
        }
        Ok(())
    }
}

/// Expand `${ENV_VAR}` patterns in a string using environment variables.
fn expand_env_vars(input: &str) -> String {
    let mut result = String::with_capacity(input.len());
    let mut chars = input.chars().peekable();

    while let Some(ch) = chars.next() {
        if ch == '$' && chars.peek() == Some(&'{') {
            chars.next(); // consume '{'
            let mut var_name = String::new();
            for c in chars.by_ref() {
                if c == '}' {
                    break;
                }
                var_name.push(c);
            }
            match std::env::var(&var_name) {
                Ok(value) => result.push_str(&value),
                // Leave the placeholder if env var not found
                Err(_) => result.push_str(&format!("${{{}}}", var_name)),
            }
        } else {
            result.push(ch);
        }
    }

    result
}
