//! Background-thread runner

use super::Runner;
use crate::failure::Failure;
use crate::sequence::{drain, CancelToken, OutputSequence, TaskSink};
use crate::task::{ExecutionMode, TaskRecord};
use parking_lot::Mutex;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::thread::{self, JoinHandle};
use tracing::{debug, error};

/// Drains the sequence on a dedicated thread; `start` returns immediately
#[derive(Debug)]
pub struct ThreadedRunner {
    sequence: Mutex<Option<OutputSequence>>,
    handle: Mutex<Option<JoinHandle<()>>>,
    started: AtomicBool,
}

impl ThreadedRunner {
    pub fn new(sequence: OutputSequence) -> Self {
        Self {
            sequence: Mutex::new(Some(sequence)),
            handle: Mutex::new(None),
            started: AtomicBool::new(false),
        }
    }
}

impl Runner for ThreadedRunner {
    fn mode(&self) -> ExecutionMode {
        ExecutionMode::Threaded
    }

    fn start(&self, record: &Arc<TaskRecord>, cancel: &CancelToken) {
        let Some(sequence) = self.sequence.lock().take() else {
            return;
        };
        self.started.store(true, Ordering::SeqCst);

        let number = record.number();
        let thread_record = Arc::clone(record);
        let thread_cancel = cancel.clone();
        let spawned = thread::Builder::new()
            .name(format!("task-{}", number))
            .spawn(move || {
                drain(sequence, &thread_cancel, thread_record.as_ref());
                debug!("Task {} thread done: {}", number, thread_record.status());
            });

        match spawned {
            Ok(handle) => *self.handle.lock() = Some(handle),
            Err(e) => {
                error!("Failed to spawn thread for task {}: {}", number, e);
                record.abort(Failure::new("SpawnError", e.to_string()));
            }
        }
    }

    fn wait(&self, record: &Arc<TaskRecord>) {
        if !self.started.load(Ordering::SeqCst) {
            return;
        }
        let handle = self.handle.lock().take();
        if let Some(handle) = handle {
            if handle.join().is_err() {
                error!("Task {} thread panicked outside its body", record.number());
            }
        }
        record.wait_terminal();
    }

    fn kill(&self, record: &Arc<TaskRecord>, cancel: &CancelToken) {
        cancel.cancel();
        record.request_kill();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::state::TaskStatus;
    use std::time::{Duration, Instant};
    use taskline_foundation::CommandError;

    fn wait_for_output(record: &TaskRecord, len: usize) {
        let deadline = Instant::now() + Duration::from_secs(5);
        while record.output_len() < len && Instant::now() < deadline {
            thread::sleep(Duration::from_millis(5));
        }
    }

    #[test]
    fn test_start_returns_before_completion() {
        let cancel = CancelToken::new();
        let body_cancel = cancel.clone();
        let mut n = 0;
        let seq = OutputSequence::from_fn(move || {
            if let Err(e) = body_cancel.sleep(Duration::from_millis(20)) {
                return Some(Err(e));
            }
            n += 1;
            Some(Ok(Some(n.to_string())))
        });
        let record = Arc::new(TaskRecord::new(1));
        let runner = ThreadedRunner::new(seq);

        runner.start(&record, &cancel);
        wait_for_output(&record, 2);
        assert_eq!(record.status(), TaskStatus::Running);

        runner.kill(&record, &cancel);
        runner.wait(&record);
        assert_eq!(record.status(), TaskStatus::Killed);
        assert!(record.output().len() >= 2);
        assert_eq!(record.output()[..2], ["1".to_string(), "2".to_string()]);
    }

    #[test]
    fn test_failure_in_thread_aborts() {
        let seq = OutputSequence::new(vec![
            Ok(Some("a".to_string())),
            Err(CommandError::failed("KeyError", "'missing'")),
        ]);
        let record = Arc::new(TaskRecord::new(1));
        let cancel = CancelToken::new();
        let runner = ThreadedRunner::new(seq);
        runner.start(&record, &cancel);
        runner.wait(&record);
        assert_eq!(record.status(), TaskStatus::Aborted);
        assert_eq!(record.render(), "KeyError: 'missing'");
    }

    #[test]
    fn test_wait_without_start_returns() {
        let record = Arc::new(TaskRecord::new(1));
        let runner = ThreadedRunner::new(OutputSequence::empty());
        runner.wait(&record);
        assert_eq!(record.status(), TaskStatus::Submitted);
    }
}
