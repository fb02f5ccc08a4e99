//! Where a session reports what happens to it.
//!
//! The session never writes output itself.  Every notable event (a dropped
//! packet, a rejected echo, a renamed rigid body) goes to the
//! [`DiagnosticSink`] it was constructed with.
//!
//! # Choosing a sink (for beginners)
//!
//! - [`TracingSink`] forwards everything to the `tracing` macros under the
//!   `natnet` target.  Install a `tracing-subscriber` (the demo binary does)
//!   and filter with `RUST_LOG=natnet=debug`.
//! - [`RecordingSink`] keeps every message in memory so tests can assert on
//!   exactly what was reported.
//! - Anything else (a GUI status bar, a metrics counter) only needs the five
//!   trait methods.

use std::sync::Mutex;

/// Receiver for session diagnostics, one method per severity.
#[cfg_attr(test, mockall::automock)]
pub trait DiagnosticSink {
    fn debug(&self, message: &str);
    fn info(&self, message: &str);
    fn warning(&self, message: &str);
    fn error(&self, message: &str);
    /// The session is about to stop because of this condition.
    fn fatal(&self, message: &str);
}

/// Forwards diagnostics to `tracing`.
#[derive(Debug, Default, Clone, Copy)]
pub struct TracingSink;

impl DiagnosticSink for TracingSink {
    fn debug(&self, message: &str) {
        tracing::debug!(target: "natnet", "{message}");
    }

    fn info(&self, message: &str) {
        tracing::info!(target: "natnet", "{message}");
    }

    fn warning(&self, message: &str) {
        tracing::warn!(target: "natnet", "{message}");
    }

    fn error(&self, message: &str) {
        tracing::error!(target: "natnet", "{message}");
    }

    fn fatal(&self, message: &str) {
        tracing::error!(target: "natnet", fatal = true, "{message}");
    }
}

/// Severity of a recorded diagnostic.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
pub enum Severity {
    Debug,
    Info,
    Warning,
    Error,
    Fatal,
}

/// Keeps every diagnostic in memory, in order.
#[derive(Debug, Default)]
pub struct RecordingSink {
    records: Mutex<Vec<(Severity, String)>>,
}

impl RecordingSink {
    pub fn new() -> Self {
        Self::default()
    }

    fn push(&self, severity: Severity, message: &str) {
        // A poisoned lock only means another recorder panicked mid-push.
        let mut records = self.records.lock().unwrap_or_else(|e| e.into_inner());
        records.push((severity, message.to_string()));
    }

    /// All recorded diagnostics.
    pub fn records(&self) -> Vec<(Severity, String)> {
        self.records
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .clone()
    }

    /// Messages recorded at exactly `severity`.
    pub fn messages(&self, severity: Severity) -> Vec<String> {
        self.records()
            .into_iter()
            .filter(|(s, _)| *s == severity)
            .map(|(_, m)| m)
            .collect()
    }

    /// Whether any message at `severity` contains `needle`.
    pub fn contains(&self, severity: Severity, needle: &str) -> bool {
        self.messages(severity).iter().any(|m| m.contains(needle))
    }

    pub fn clear(&self) {
        self.records
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .clear();
    }
}

impl DiagnosticSink for RecordingSink {
    fn debug(&self, message: &str) {
        self.push(Severity::Debug, message);
    }

    fn info(&self, message: &str) {
        self.push(Severity::Info, message);
    }

    fn warning(&self, message: &str) {
        self.push(Severity::Warning, message);
    }

    fn error(&self, message: &str) {
        self.push(Severity::Error, message);
    }

    fn fatal(&self, message: &str) {
        self.push(Severity::Fatal, message);
    }
}
