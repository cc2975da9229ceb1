//! Inline runner

use super::Runner;
use crate::sequence::{drain, CancelToken, OutputSequence};
use crate::task::{ExecutionMode, TaskRecord};
use parking_lot::Mutex;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

/// Drains the sequence on the thread calling `start`
#[derive(Debug)]
pub struct SyncRunner {
    sequence: Mutex<Option<OutputSequence>>,
    started: AtomicBool,
}

impl SyncRunner {
    pub fn new(sequence: OutputSequence) -> Self {
        Self {
            sequence: Mutex::new(Some(sequence)),
            started: AtomicBool::new(false),
        }
    }
}

impl Runner for SyncRunner {
    fn mode(&self) -> ExecutionMode {
        ExecutionMode::Sync
    }

    fn start(&self, record: &Arc<TaskRecord>, cancel: &CancelToken) {
        let sequence = self.sequence.lock().take();
        if let Some(sequence) = sequence {
            self.started.store(true, Ordering::SeqCst);
            drain(sequence, cancel, record.as_ref());
        }
    }

    fn wait(&self, record: &Arc<TaskRecord>) {
        if self.started.load(Ordering::SeqCst) {
            record.wait_terminal();
        }
    }

    fn kill(&self, record: &Arc<TaskRecord>, cancel: &CancelToken) {
        cancel.cancel();
        record.request_kill();
    }
}
