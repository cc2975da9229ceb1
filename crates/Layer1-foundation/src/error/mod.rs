//! Error types for taskline
//!
//! Two families live here:
//! - [`Error`]: failures of the runtime itself (configuration, session
//!   misuse, worker plumbing, I/O).
//! - [`CommandError`]: failures produced while resolving or draining a single
//!   command. These never escape a task; they are captured into it.

use thiserror::Error;

/// Result type alias
pub type Result<T> = std::result::Result<T, Error>;

/// Exit status used for malformed command lines
pub const USAGE_EXIT_CODE: i32 = 2;

/// taskline runtime error
#[derive(Error, Debug)]
pub enum Error {
    // ========================================================================
    // Configuration
    // ========================================================================
    #[error("Configuration file error: {0}")]
    Config(String),

    /// A command container misdeclares its commands
    #[error("Configuration error: {0}")]
    Configuration(String),

    // ========================================================================
    // Session
    // ========================================================================
    #[error("Interpreter not entered: call enter() before submitting commands")]
    NotEntered,

    #[error("input: {input}\noutput: {output}\nexpected: {expected}")]
    Mismatch {
        input: String,
        output: String,
        expected: String,
    },

    /// A task ended in the ABORTED state while running a script
    #[error("{kind}: {message}")]
    Aborted {
        kind: String,
        message: String,
        exit_code: Option<i32>,
    },

    // ========================================================================
    // Isolated workers
    // ========================================================================
    #[error("Worker error: {0}")]
    Worker(String),

    // ========================================================================
    // External conversions
    // ========================================================================
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    #[error("TOML error: {0}")]
    Toml(#[from] toml::de::Error),

    #[error("Internal error: {0}")]
    Internal(String),
}

impl Error {
    /// Helper for container misdeclarations
    pub fn configuration(message: impl Into<String>) -> Self {
        Error::Configuration(message.into())
    }

    /// Process exit status matching this error
    pub fn exit_code(&self) -> i32 {
        match self {
            Error::Aborted {
                exit_code: Some(code),
                ..
            } => *code,
            _ => 1,
        }
    }
}

impl From<String> for Error {
    fn from(s: String) -> Self {
        Error::Internal(s)
    }
}

impl From<&str> for Error {
    fn from(s: &str) -> Self {
        Error::Internal(s.to_string())
    }
}

// ============================================================================
// Command errors
// ============================================================================

/// Malformed or unrecognized arguments. Never reaches a command body.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
#[error("{message}")]
pub struct UsageError {
    pub message: String,
    pub exit_code: i32,
}

impl UsageError {
    pub fn new(message: impl Into<String>) -> Self {
        Self {
            message: message.into(),
            exit_code: USAGE_EXIT_CODE,
        }
    }

    pub fn with_exit_code(mut self, exit_code: i32) -> Self {
        // zero would read as success to the caller
        self.exit_code = if exit_code == 0 {
            USAGE_EXIT_CODE
        } else {
            exit_code
        };
        self
    }
}

/// Error raised by a command, either while resolving it or while draining
/// its output sequence.
#[derive(Error, Debug)]
pub enum CommandError {
    #[error("{0}")]
    Usage(#[from] UsageError),

    /// Cooperative interruption, raised by a body that noticed its
    /// cancellation token.
    #[error("interrupted")]
    Interrupted,

    #[error("{message}")]
    Failed {
        kind: String,
        message: String,
        trace: Option<String>,
    },
}

impl CommandError {
    /// Build a failure with an explicit kind, e.g. `KeyError`
    pub fn failed(kind: impl Into<String>, message: impl Into<String>) -> Self {
        CommandError::Failed {
            kind: kind.into(),
            message: message.into(),
            trace: None,
        }
    }

    /// Attach a formatted trace to a failure
    pub fn with_trace(self, trace: impl Into<String>) -> Self {
        match self {
            CommandError::Failed { kind, message, .. } => CommandError::Failed {
                kind,
                message,
                trace: Some(trace.into()),
            },
            other => other,
        }
    }

    /// Name of the error kind, as shown in `<kind>: <message>` renderings
    pub fn kind(&self) -> &str {
        match self {
            CommandError::Usage(_) => "UsageError",
            CommandError::Interrupted => "Interrupted",
            CommandError::Failed { kind, .. } => kind,
        }
    }

    pub fn is_interruption(&self) -> bool {
        matches!(self, CommandError::Interrupted)
    }

    /// Formatted trace text, if any was captured
    pub fn trace(&self) -> Option<&str> {
        match self {
            CommandError::Failed { trace, .. } => trace.as_deref(),
            _ => None,
        }
    }

    /// Exit status surfaced to a one-shot caller
    pub fn exit_code(&self) -> i32 {
        match self {
            CommandError::Usage(usage) => usage.exit_code,
            CommandError::Interrupted => 130,
            CommandError::Failed { .. } => 1,
        }
    }
}

impl From<anyhow::Error> for CommandError {
    fn from(err: anyhow::Error) -> Self {
        let trace = err
            .chain()
            .skip(1)
            .map(|cause| format!("Caused by: {}", cause))
            .collect::<Vec<_>>()
            .join("\n");
        CommandError::Failed {
            kind: "Error".to_string(),
            message: err.to_string(),
            trace: (!trace.is_empty()).then_some(trace),
        }
    }
}

impl From<std::io::Error> for CommandError {
    fn from(err: std::io::Error) -> Self {
        CommandError::failed("IoError", err.to_string())
    }
}

impl From<std::num::ParseIntError> for CommandError {
    fn from(err: std::num::ParseIntError) -> Self {
        CommandError::failed("ValueError", err.to_string())
    }
}

impl From<std::num::ParseFloatError> for CommandError {
    fn from(err: std::num::ParseFloatError) -> Self {
        CommandError::failed("ValueError", err.to_string())
    }
}
