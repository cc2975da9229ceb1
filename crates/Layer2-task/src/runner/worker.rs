//! Worker process protocol
//!
//! An isolated task runs in a child process that reports lifecycle events
//! as JSON lines on its stdout:
//!
//! ```text
//! {"event":"started"}
//! {"event":"output","value":"1"}
//! {"event":"finished"}
//! ```

use crate::failure::Failure;
use crate::sequence::{CancelToken, TaskSink};
use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use std::io::Write;
use taskline_foundation::Result;
use tracing::warn;

/// One lifecycle event sent from a worker to its parent
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "event", rename_all = "snake_case")]
pub enum WorkerEvent {
    Started,
    Output { value: String },
    Finished,
    Killed,
    Aborted { failure: Failure },
}

impl WorkerEvent {
    pub fn parse(line: &str) -> Result<Self> {
        Ok(serde_json::from_str(line.trim())?)
    }

    pub fn to_line(&self) -> Result<String> {
        Ok(serde_json::to_string(self)?)
    }

    /// Replay this event onto a sink
    pub fn apply(self, sink: &dyn TaskSink) {
        match self {
            WorkerEvent::Started => sink.begin(),
            WorkerEvent::Output { value } => sink.emit(value),
            WorkerEvent::Finished => sink.finish(),
            WorkerEvent::Killed => sink.killed(),
            WorkerEvent::Aborted { failure } => sink.abort(failure),
        }
    }

    pub fn is_terminal(&self) -> bool {
        matches!(
            self,
            WorkerEvent::Finished | WorkerEvent::Killed | WorkerEvent::Aborted { .. }
        )
    }
}

/// Sink that serializes events to a writer, one line each
pub struct WorkerEmitter<W: Write + Send> {
    out: Mutex<W>,
}

impl<W: Write + Send> WorkerEmitter<W> {
    pub fn new(out: W) -> Self {
        Self {
            out: Mutex::new(out),
        }
    }

    pub fn into_inner(self) -> W {
        self.out.into_inner()
    }

    fn send(&self, event: WorkerEvent) {
        let line = match event.to_line() {
            Ok(line) => line,
            Err(e) => {
                warn!("Failed to encode worker event: {}", e);
                return;
            }
        };
        let mut out = self.out.lock();
        if let Err(e) = writeln!(out, "{}", line).and_then(|_| out.flush()) {
            warn!("Failed to report worker event: {}", e);
        }
    }
}

impl<W: Write + Send> TaskSink for WorkerEmitter<W> {
    fn begin(&self) {
        self.send(WorkerEvent::Started);
    }

    fn emit(&self, value: String) {
        self.send(WorkerEvent::Output { value });
    }

    fn finish(&self) {
        self.send(WorkerEvent::Finished);
    }

    fn killed(&self) {
        self.send(WorkerEvent::Killed);
    }

    fn abort(&self, failure: Failure) {
        self.send(WorkerEvent::Aborted { failure });
    }
}

/// Bind SIGTERM to `cancel`, so a parent kill interrupts the drain loop at
/// the next advancement. A body blocked without polling the token is only
/// stopped by the parent's SIGKILL, and its cleanup does not run.
#[cfg(unix)]
pub fn install_termination_handler(cancel: &CancelToken) -> Result<()> {
    signal_hook::flag::register(signal_hook::consts::SIGTERM, cancel.flag())?;
    Ok(())
}

#[cfg(not(unix))]
pub fn install_termination_handler(_cancel: &CancelToken) -> Result<()> {
    Ok(())
}
