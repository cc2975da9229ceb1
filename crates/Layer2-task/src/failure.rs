//! Captured task failures
//!
//! A failure is a plain-string snapshot of the error that aborted a task, so
//! it can be moved across threads and reported back from a worker process.

use serde::{Deserialize, Serialize};
use std::any::Any;
use taskline_foundation::CommandError;

/// Snapshot of the error that aborted a task
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Failure {
    /// Error kind name, e.g. `UsageError` or `KeyError`
    pub kind: String,

    /// Error message
    pub message: String,

    /// Formatted trace text (may be empty)
    #[serde(default)]
    pub trace: String,

    /// Exit status surfaced to one-shot callers
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub exit_code: Option<i32>,
}

impl Failure {
    pub fn new(kind: impl Into<String>, message: impl Into<String>) -> Self {
        Self {
            kind: kind.into(),
            message: message.into(),
            trace: String::new(),
            exit_code: None,
        }
    }

    pub fn with_trace(mut self, trace: impl Into<String>) -> Self {
        self.trace = trace.into();
        self
    }

    pub fn with_exit_code(mut self, exit_code: i32) -> Self {
        self.exit_code = Some(exit_code);
        self
    }

    /// Failure for a command body that panicked
    pub fn from_panic(payload: Box<dyn Any + Send>) -> Self {
        let message = if let Some(s) = payload.downcast_ref::<&str>() {
            s.to_string()
        } else if let Some(s) = payload.downcast_ref::<String>() {
            s.clone()
        } else {
            "command panicked".to_string()
        };
        Self::new("Panic", message).with_exit_code(101)
    }

    /// `<kind>: <message>`
    pub fn render(&self) -> String {
        format!("{}: {}", self.kind, self.message)
    }

    /// Trace text, falling back to the rendering when no trace was captured
    pub fn formatted_trace(&self) -> String {
        if self.trace.is_empty() {
            self.render()
        } else {
            format!("{}\n{}", self.trace, self.render())
        }
    }
}

impl From<&CommandError> for Failure {
    fn from(err: &CommandError) -> Self {
        let failure = Failure::new(err.kind(), err.to_string()).with_exit_code(err.exit_code());
        match err.trace() {
            Some(trace) => failure.with_trace(trace),
            None => failure,
        }
    }
}

impl std::fmt::Display for Failure {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}: {}", self.kind, self.message)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use taskline_foundation::UsageError;

    #[test]
    fn test_from_usage_error() {
        let err = CommandError::Usage(UsageError::new("unrecognized arguments: -z"));
        let failure = Failure::from(&err);
        assert_eq!(failure.render(), "UsageError: unrecognized arguments: -z");
        assert_eq!(failure.exit_code, Some(2));
        assert_eq!(failure.formatted_trace(), failure.render());
    }

    #[test]
    fn test_trace_is_kept() {
        let err = CommandError::failed("KeyError", "'a'").with_trace("in show a");
        let failure = Failure::from(&err);
        assert_eq!(failure.formatted_trace(), "in show a\nKeyError: 'a'");
    }

    #[test]
    fn test_panic_payloads() {
        let failure = Failure::from_panic(Box::new("boom"));
        assert_eq!(failure.render(), "Panic: boom");
        let failure = Failure::from_panic(Box::new(String::from("bang")));
        assert_eq!(failure.message, "bang");
    }
}
