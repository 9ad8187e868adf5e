//! Console capture.
//!
//! Scripts see a `console` object whose methods append formatted lines to a
//! per-execution [`LogBuffer`] instead of writing to the host's streams. Each
//! line is also mirrored to the engine's [`LogSink`].

use serde::Serialize;

/// Console method a line was emitted through.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum LogLevel {
    /// `console.log`
    Log,
    /// `console.info`
    Info,
    /// `console.warn`
    Warn,
    /// `console.error`
    Error,
    /// `console.debug`
    Debug,
    /// `console.trace`
    Trace,
}

impl LogLevel {
    /// Parse the level name passed by the console shim. Unknown names are
    /// treated as `log`.
    pub fn parse(name: &str) -> Self {
        match name {
            "info" => Self::Info,
            "warn" => Self::Warn,
            "error" => Self::Error,
            "debug" => Self::Debug,
            "trace" => Self::Trace,
            _ => Self::Log,
        }
    }

    /// The console method name.
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Log => "log",
            Self::Info => "info",
            Self::Warn => "warn",
            Self::Error => "error",
            Self::Debug => "debug",
            Self::Trace => "trace",
        }
    }
}

/// Receives every console line as it is emitted.
pub trait LogSink: Send + Sync {
    /// Handle one line.
    fn emit(&self, level: LogLevel, line: &str);
}

/// Mirrors console lines into `tracing` under the `codebox::sandbox::js`
/// target.
#[derive(Debug, Clone, Copy, Default)]
pub struct TracingLogSink;

impl LogSink for TracingLogSink {
    fn emit(&self, level: LogLevel, line: &str) {
        match level {
            LogLevel::Error | LogLevel::Warn => {
                tracing::warn!(target: "codebox::sandbox::js", level = level.as_str(), "{}", line)
            }
            LogLevel::Log | LogLevel::Info => {
                tracing::info!(target: "codebox::sandbox::js", level = level.as_str(), "{}", line)
            }
            LogLevel::Debug => tracing::debug!(target: "codebox::sandbox::js", "{}", line),
            LogLevel::Trace => tracing::trace!(target: "codebox::sandbox::js", "{}", line),
        }
    }
}

/// Discards console lines.
#[derive(Debug, Clone, Copy, Default)]
pub struct NoopLogSink;

impl LogSink for NoopLogSink {
    fn emit(&self, _level: LogLevel, _line: &str) {}
}

/// Ordered console lines of one execution, capped at a fixed count.
#[derive(Debug)]
pub struct LogBuffer {
    lines: Vec<String>,
    max_entries: usize,
    dropped: usize,
}

impl LogBuffer {
    /// An empty buffer keeping at most `max_entries` lines.
    pub fn new(max_entries: usize) -> Self {
        Self {
            lines: Vec::new(),
            max_entries,
            dropped: 0,
        }
    }

    /// Append a line, or count it as dropped when the buffer is full.
    pub fn push(&mut self, line: &str) {
        if self.lines.len() < self.max_entries {
            self.lines.push(line.to_string());
        } else {
            self.dropped += 1;
        }
    }

    /// Number of lines dropped so far.
    pub fn dropped(&self) -> usize {
        self.dropped
    }

    /// The captured lines, followed by one truncation marker if any were
    /// dropped.
    pub fn into_lines(mut self) -> Vec<String> {
        if self.dropped > 0 {
            self.lines
                .push(format!("[{} more log entries truncated]", self.dropped));
        }
        self.lines
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Mutex;

    #[test]
    fn buffer_keeps_order() {
        let mut buffer = LogBuffer::new(10);
        buffer.push("first");
        buffer.push("second");
        assert_eq!(buffer.into_lines(), vec!["first", "second"]);
    }

    #[test]
    fn buffer_truncates_with_single_marker() {
        let mut buffer = LogBuffer::new(2);
        for i in 0..5 {
            buffer.push(&format!("line {i}"));
        }
        assert_eq!(buffer.dropped(), 3);
        assert_eq!(
            buffer.into_lines(),
            vec!["line 0", "line 1", "[3 more log entries truncated]"]
        );
    }

    #[test]
    fn level_names_parse() {
        assert_eq!(LogLevel::parse("warn"), LogLevel::Warn);
        assert_eq!(LogLevel::parse("error"), LogLevel::Error);
        assert_eq!(LogLevel::parse("table"), LogLevel::Log);
        assert_eq!(LogLevel::Trace.as_str(), "trace");
    }

    #[derive(Default)]
    struct Collect(Mutex<Vec<(LogLevel, String)>>);

    impl LogSink for Collect {
        fn emit(&self, level: LogLevel, line: &str) {
            self.0.lock().unwrap().push((level, line.to_string()));
        }
    }

    #[test]
    fn custom_sink_receives_lines() {
        let sink = Collect::default();
        sink.emit(LogLevel::Info, "ready");
        TracingLogSink.emit(LogLevel::Error, "ignored by test");
        NoopLogSink.emit(LogLevel::Log, "dropped");
        assert_eq!(
            sink.0.lock().unwrap().as_slice(),
            &[(LogLevel::Info, "ready".to_string())]
        );
    }
}
