//! Parse diagnostics and where they end up.
//!
//! Every diagnostic is rendered the same way regardless of its source:
//!
//! ```text
//! Fatal error at (file doc.xml, line 3, column 7): ...
//! Warning at (unknown location, line 1, column 1): ...
//! ```
//!
//! Rendered messages go to the bound [`ExecutionContext`] when there is one and to a
//! [`DiagnosticSink`] otherwise. The sink is injected into the liaison; [`ConsoleSink`]
//! is only the default.
use core::fmt;

use parking_lot::Mutex;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum Severity {
    Warning,
    Error,
    Fatal,
}

impl Severity {
    pub fn label(&self) -> &'static str {
        match self {
            Severity::Warning => "Warning",
            Severity::Error => "Error",
            Severity::Fatal => "Fatal error",
        }
    }
}

impl fmt::Display for Severity {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.label())
    }
}

/// A diagnostic raised while parsing, with its source position (1-based).
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SaxParseError {
    pub severity: Severity,
    pub message: String,
    pub system_id: Option<String>,
    pub line: u64,
    pub column: u64,
}

impl SaxParseError {
    pub fn new(severity: Severity, message: impl Into<String>) -> Self {
        Self { severity, message: message.into(), system_id: None, line: 0, column: 0 }
    }

    pub fn at(mut self, system_id: Option<&str>, line: u64, column: u64) -> Self {
        self.system_id = system_id.filter(|s| !s.is_empty()).map(str::to_string);
        self.line = line;
        self.column = column;
        self
    }

    /// `"<Severity> at (file <id>, line L, column C): msg"`.
    pub fn format_message(&self) -> String {
        self.to_string()
    }
}

impl fmt::Display for SaxParseError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match &self.system_id {
            Some(id) => write!(
                f,
                "{} at (file {}, line {}, column {}): {}",
                self.severity, id, self.line, self.column, self.message
            ),
            None => write!(
                f,
                "{} at (unknown location, line {}, column {}): {}",
                self.severity, self.line, self.column, self.message
            ),
        }
    }
}

impl std::error::Error for SaxParseError {}

/// Receives escalated diagnostics during a transformation. Must not fail.
pub trait ExecutionContext: Send + Sync {
    fn warn(&self, message: &str);
}

pub trait DiagnosticSink: Send + Sync {
    fn emit(&self, severity: Severity, message: &str);
}

/// Writes to standard error.
#[derive(Debug, Default, Clone, Copy)]
pub struct ConsoleSink;

impl DiagnosticSink for ConsoleSink {
    fn emit(&self, _severity: Severity, message: &str) {
        eprintln!("\n{message}");
    }
}

/// Forwards into `tracing`, keyed by severity.
#[derive(Debug, Default, Clone, Copy)]
pub struct TracingSink;

impl DiagnosticSink for TracingSink {
    fn emit(&self, severity: Severity, message: &str) {
        match severity {
            Severity::Warning => tracing::warn!(target: "sylva::parse", "{message}"),
            Severity::Error | Severity::Fatal => tracing::error!(target: "sylva::parse", "{message}"),
        }
    }
}

#[derive(Debug, Default, Clone, Copy)]
pub struct NullSink;

impl DiagnosticSink for NullSink {
    fn emit(&self, _severity: Severity, _message: &str) {}
}

/// Keeps every message; also usable as an [`ExecutionContext`].
#[derive(Debug, Default)]
pub struct CollectingSink {
    messages: Mutex<Vec<(Severity, String)>>,
}

impl CollectingSink {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn messages(&self) -> Vec<(Severity, String)> {
        self.messages.lock().clone()
    }

    pub fn take(&self) -> Vec<(Severity, String)> {
        std::mem::take(&mut *self.messages.lock())
    }

    pub fn len(&self) -> usize {
        self.messages.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.messages.lock().is_empty()
    }
}

impl DiagnosticSink for CollectingSink {
    fn emit(&self, severity: Severity, message: &str) {
        self.messages.lock().push((severity, message.to_string()));
    }
}

impl ExecutionContext for CollectingSink {
    fn warn(&self, message: &str) {
        // The context sees only the rendered text, which carries the severity label.
        self.messages.lock().push((Severity::Warning, message.to_string()));
    }
}
