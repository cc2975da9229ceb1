//! Output sequences and cooperative cancellation
//!
//! A command produces a lazy, non-restartable sequence of emissions. Each
//! emission is either a value to append to the task output, a bare tick
//! (`Ok(None)`, gives the runtime a chance to notice a kill), or a failure.

use crate::failure::Failure;
use std::fmt;
use std::panic::{self, AssertUnwindSafe};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};
use taskline_foundation::CommandError;
use tracing::debug;

/// One step of an output sequence
pub type Emission = Result<Option<String>, CommandError>;

/// Granularity of [`CancelToken::sleep`]
const SLEEP_SLICE: Duration = Duration::from_millis(10);

// ============================================================================
// CancelToken
// ============================================================================

/// Cooperative cancellation flag shared by a task, its runner and the
/// command body.
#[derive(Debug, Clone, Default)]
pub struct CancelToken {
    flag: Arc<AtomicBool>,
}

impl CancelToken {
    pub fn new() -> Self {
        Self::default()
    }

    /// Request cancellation
    pub fn cancel(&self) {
        self.flag.store(true, Ordering::SeqCst);
    }

    pub fn is_cancelled(&self) -> bool {
        self.flag.load(Ordering::SeqCst)
    }

    /// `Err(Interrupted)` once cancellation was requested
    pub fn check(&self) -> Result<(), CommandError> {
        if self.is_cancelled() {
            Err(CommandError::Interrupted)
        } else {
            Ok(())
        }
    }

    /// Sleep that wakes up early when cancelled
    pub fn sleep(&self, duration: Duration) -> Result<(), CommandError> {
        let deadline = Instant::now() + duration;
        loop {
            self.check()?;
            let now = Instant::now();
            if now >= deadline {
                return Ok(());
            }
            std::thread::sleep(SLEEP_SLICE.min(deadline - now));
        }
    }

    /// Underlying flag, for binding to a signal handler
    pub fn flag(&self) -> Arc<AtomicBool> {
        Arc::clone(&self.flag)
    }
}

// ============================================================================
// OutputSequence
// ============================================================================

/// Lazy sequence of emissions produced by a command
pub struct OutputSequence {
    inner: Box<dyn Iterator<Item = Emission> + Send>,
}

impl OutputSequence {
    pub fn new<I>(iter: I) -> Self
    where
        I: IntoIterator<Item = Emission>,
        I::IntoIter: Send + 'static,
    {
        Self {
            inner: Box::new(iter.into_iter()),
        }
    }

    /// Sequence of plain values that cannot fail
    pub fn values<I, T>(values: I) -> Self
    where
        I: IntoIterator<Item = T>,
        I::IntoIter: Send + 'static,
        T: ToString,
    {
        Self::new(values.into_iter().map(|v| Ok(Some(v.to_string()))))
    }

    /// Sequence driven by a closure, ended by `None`
    pub fn from_fn<F>(f: F) -> Self
    where
        F: FnMut() -> Option<Emission> + Send + 'static,
    {
        Self::new(std::iter::from_fn(f))
    }

    pub fn single(value: impl ToString) -> Self {
        Self::values(std::iter::once(value.to_string()))
    }

    pub fn empty() -> Self {
        Self::new(std::iter::empty())
    }

    /// Sequence that fails on its first advancement
    pub fn failing(err: CommandError) -> Self {
        Self::new(std::iter::once(Err(err)))
    }

    /// Run `cleanup` when the sequence is dropped, whether it was exhausted,
    /// failed, or interrupted.
    pub fn with_cleanup<F>(self, cleanup: F) -> Self
    where
        F: FnOnce() + Send + 'static,
    {
        Self {
            inner: Box::new(Guarded {
                inner: self.inner,
                cleanup: Some(Box::new(cleanup)),
            }),
        }
    }
}

impl Iterator for OutputSequence {
    type Item = Emission;

    fn next(&mut self) -> Option<Emission> {
        self.inner.next()
    }
}

impl fmt::Debug for OutputSequence {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("OutputSequence").finish_non_exhaustive()
    }
}

struct Guarded {
    inner: Box<dyn Iterator<Item = Emission> + Send>,
    cleanup: Option<Box<dyn FnOnce() + Send>>,
}

impl Iterator for Guarded {
    type Item = Emission;

    fn next(&mut self) -> Option<Emission> {
        self.inner.next()
    }
}

impl Drop for Guarded {
    fn drop(&mut self) {
        if let Some(cleanup) = self.cleanup.take() {
            cleanup();
        }
    }
}

// ============================================================================
// Draining
// ============================================================================

/// Receiver of the lifecycle events produced while draining a sequence.
///
/// Implemented by the in-memory task record and by the worker-process
/// emitter, so the same drain loop backs every runner.
pub trait TaskSink {
    /// First advancement is about to happen
    fn begin(&self);

    /// A value was produced
    fn emit(&self, value: String);

    /// Sequence exhausted normally
    fn finish(&self);

    /// Sequence interrupted by a kill
    fn killed(&self);

    /// Sequence raised a failure
    fn abort(&self, failure: Failure);
}

/// Drain `sequence` to a terminal event, checking `cancel` before every
/// advancement. The sequence is dropped, running its cleanup, before the
/// terminal event is reported.
pub fn drain(sequence: OutputSequence, cancel: &CancelToken, sink: &dyn TaskSink) {
    let mut sequence = sequence;
    sink.begin();

    loop {
        if cancel.is_cancelled() {
            drop(sequence);
            sink.killed();
            return;
        }

        match panic::catch_unwind(AssertUnwindSafe(|| sequence.next())) {
            Ok(None) => {
                drop(sequence);
                sink.finish();
                return;
            }
            Ok(Some(Ok(Some(value)))) => sink.emit(value),
            Ok(Some(Ok(None))) => {}
            Ok(Some(Err(err))) if err.is_interruption() => {
                drop(sequence);
                sink.killed();
                return;
            }
            Ok(Some(Err(err))) => {
                debug!("Sequence failed: {}: {}", err.kind(), err);
                drop(sequence);
                sink.abort(Failure::from(&err));
                return;
            }
            Err(payload) => {
                drop(sequence);
                sink.abort(Failure::from_panic(payload));
                return;
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use parking_lot::Mutex;
    use std::sync::atomic::AtomicUsize;

    #[derive(Default)]
    struct Recorder {
        events: Mutex<Vec<String>>,
    }

    impl TaskSink for Recorder {
        fn begin(&self) {
            self.events.lock().push("begin".into());
        }
        fn emit(&self, value: String) {
            self.events.lock().push(format!("emit {}", value));
        }
        fn finish(&self) {
            self.events.lock().push("finish".into());
        }
        fn killed(&self) {
            self.events.lock().push("killed".into());
        }
        fn abort(&self, failure: Failure) {
            self.events.lock().push(format!("abort {}", failure));
        }
    }

    #[test]
    fn test_ticks_are_not_emitted() {
        let sink = Recorder::default();
        let seq = OutputSequence::new(vec![Ok(Some("a".to_string())), Ok(None), Ok(Some("b".into()))]);
        drain(seq, &CancelToken::new(), &sink);
        assert_eq!(*sink.events.lock(), vec!["begin", "emit a", "emit b", "finish"]);
    }

    #[test]
    fn test_cleanup_runs_before_terminal_event() {
        let cleaned = Arc::new(AtomicUsize::new(0));
        let seen_at_kill = Arc::new(AtomicUsize::new(usize::MAX));

        struct KillProbe {
            cleaned: Arc<AtomicUsize>,
            seen: Arc<AtomicUsize>,
        }
        impl TaskSink for KillProbe {
            fn begin(&self) {}
            fn emit(&self, _: String) {}
            fn finish(&self) {}
            fn killed(&self) {
                self.seen.store(self.cleaned.load(Ordering::SeqCst), Ordering::SeqCst);
            }
            fn abort(&self, _: Failure) {}
        }

        let cancel = CancelToken::new();
        let c = Arc::clone(&cleaned);
        let token = cancel.clone();
        let seq = OutputSequence::from_fn(move || {
            token.cancel();
            Some(Ok(Some("x".to_string())))
        })
        .with_cleanup(move || {
            c.fetch_add(1, Ordering::SeqCst);
        });

        drain(
            seq,
            &cancel,
            &KillProbe {
                cleaned: Arc::clone(&cleaned),
                seen: Arc::clone(&seen_at_kill),
            },
        );
        assert_eq!(cleaned.load(Ordering::SeqCst), 1);
        assert_eq!(seen_at_kill.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn test_failure_and_panic_abort() {
        let sink = Recorder::default();
        drain(
            OutputSequence::failing(CommandError::failed("ZeroDivisionError", "division by zero")),
            &CancelToken::new(),
            &sink,
        );
        assert_eq!(
            sink.events.lock().last().unwrap(),
            "abort ZeroDivisionError: division by zero"
        );

        let sink = Recorder::default();
        let seq = OutputSequence::from_fn(|| panic!("boom"));
        drain(seq, &CancelToken::new(), &sink);
        assert_eq!(sink.events.lock().last().unwrap(), "abort Panic: boom");
    }

    #[test]
    fn test_interrupted_body_counts_as_killed() {
        let sink = Recorder::default();
        let seq = OutputSequence::new(vec![Ok(Some("1".to_string())), Err(CommandError::Interrupted)]);
        drain(seq, &CancelToken::new(), &sink);
        assert_eq!(*sink.events.lock(), vec!["begin", "emit 1", "killed"]);
    }

    #[test]
    fn test_sleep_wakes_on_cancel() {
        let token = CancelToken::new();
        token.cancel();
        let started = Instant::now();
        assert!(token.sleep(Duration::from_secs(5)).is_err());
        assert!(started.elapsed() < Duration::from_secs(1));
    }
}
