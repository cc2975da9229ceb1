//! Task definition and shared task record

use crate::failure::Failure;
use crate::log::OutputLog;
use crate::runner::{IsolatedRunner, Runner, SyncRunner, ThreadedRunner, WorkerCommand};
use crate::sequence::{CancelToken, OutputSequence, TaskSink};
use crate::state::TaskStatus;
use chrono::{DateTime, Utc};
use parking_lot::{Condvar, Mutex};
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use std::time::Duration;
use taskline_foundation::CommandError;
use tracing::{debug, info, warn};

/// Session-unique task number, assigned in submission order
pub type TaskNumber = u64;

/// Execution strategy of a task
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ExecutionMode {
    /// Drained inline by the caller
    #[default]
    Sync,

    /// Drained by a background thread
    Threaded,

    /// Drained by a separate worker process
    Isolated,
}

impl ExecutionMode {
    /// Class name used in task summaries
    pub fn class_name(&self) -> &'static str {
        match self {
            ExecutionMode::Sync => "SyncTask",
            ExecutionMode::Threaded => "ThreadedTask",
            ExecutionMode::Isolated => "IsolatedTask",
        }
    }

    /// Check if tasks of this mode keep running after `start` returns
    pub fn is_background(&self) -> bool {
        !matches!(self, ExecutionMode::Sync)
    }
}

impl std::fmt::Display for ExecutionMode {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            ExecutionMode::Sync => write!(f, "sync"),
            ExecutionMode::Threaded => write!(f, "threaded"),
            ExecutionMode::Isolated => write!(f, "isolated"),
        }
    }
}

// ============================================================================
// TaskRecord
// ============================================================================

#[derive(Debug, Default)]
struct RecordState {
    status: Option<TaskStatus>,
    output: OutputLog,
    failure: Option<Failure>,
    started_at: Option<DateTime<Utc>>,
    ended_at: Option<DateTime<Utc>>,
}

impl RecordState {
    fn status(&self) -> TaskStatus {
        self.status.unwrap_or(TaskStatus::Submitted)
    }
}

/// State of a task visible to both the caller and whoever drains it
///
/// Every mutation goes through the state machine edges of [`TaskStatus`];
/// illegal transitions are dropped.
#[derive(Debug)]
pub struct TaskRecord {
    number: TaskNumber,
    state: Mutex<RecordState>,
    changed: Condvar,
}

impl TaskRecord {
    pub fn new(number: TaskNumber) -> Self {
        Self {
            number,
            state: Mutex::new(RecordState::default()),
            changed: Condvar::new(),
        }
    }

    pub fn number(&self) -> TaskNumber {
        self.number
    }

    pub fn status(&self) -> TaskStatus {
        self.state.lock().status()
    }

    pub fn output(&self) -> Vec<String> {
        self.state.lock().output.lines()
    }

    pub fn output_len(&self) -> usize {
        self.state.lock().output.len()
    }

    pub fn output_since(&self, offset: usize) -> Vec<String> {
        self.state.lock().output.since(offset)
    }

    pub fn failure(&self) -> Option<Failure> {
        self.state.lock().failure.clone()
    }

    pub fn started_at(&self) -> Option<DateTime<Utc>> {
        self.state.lock().started_at
    }

    pub fn ended_at(&self) -> Option<DateTime<Utc>> {
        self.state.lock().ended_at
    }

    /// `<kind>: <message>` when aborted, otherwise the joined output
    pub fn render(&self) -> String {
        let state = self.state.lock();
        match (&state.failure, state.status()) {
            (Some(failure), TaskStatus::Aborted) => failure.render(),
            _ => state.output.joined(),
        }
    }

    /// RUNNING -> TOBEKILLED. Returns whether the status changed.
    pub fn request_kill(&self) -> bool {
        let mut state = self.state.lock();
        self.transition(&mut state, TaskStatus::ToBeKilled)
    }

    /// Block until the task reaches a terminal state
    pub fn wait_terminal(&self) {
        let mut state = self.state.lock();
        while !state.status().is_terminal() {
            self.changed.wait(&mut state);
        }
    }

    /// Like [`wait_terminal`](Self::wait_terminal) with a deadline. Returns
    /// whether the task is terminal.
    pub fn wait_terminal_timeout(&self, timeout: Duration) -> bool {
        let mut state = self.state.lock();
        if !state.status().is_terminal() {
            // spurious wakeups only shorten the wait
            let _ = self
                .changed
                .wait_while_for(&mut state, |s| !s.status().is_terminal(), timeout);
        }
        state.status().is_terminal()
    }

    fn transition(&self, state: &mut RecordState, next: TaskStatus) -> bool {
        let current = state.status();
        if !current.can_transition_to(next) {
            if current != next {
                debug!(
                    "Task {}: ignoring transition {} -> {}",
                    self.number, current, next
                );
            }
            return false;
        }
        state.status = Some(next);
        match next {
            TaskStatus::Running if state.started_at.is_none() => {
                state.started_at = Some(Utc::now());
            }
            status if status.is_terminal() => {
                state.ended_at = Some(Utc::now());
            }
            _ => {}
        }
        self.changed.notify_all();
        true
    }

    /// Walk the shortest legal path to KILLED
    fn walk_to_killed(&self, state: &mut RecordState) {
        if state.status() == TaskStatus::Submitted {
            self.transition(state, TaskStatus::Running);
        }
        if state.status() == TaskStatus::Running {
            self.transition(state, TaskStatus::ToBeKilled);
        }
        self.transition(state, TaskStatus::Killed);
    }
}

impl TaskSink for TaskRecord {
    fn begin(&self) {
        let mut state = self.state.lock();
        self.transition(&mut state, TaskStatus::Running);
    }

    fn emit(&self, value: String) {
        let mut state = self.state.lock();
        match state.status() {
            TaskStatus::Running | TaskStatus::ToBeKilled => state.output.push(value),
            status => warn!(
                "Task {}: dropping output produced while {}",
                self.number, status
            ),
        }
    }

    fn finish(&self) {
        let mut state = self.state.lock();
        if state.status() == TaskStatus::ToBeKilled {
            // the kill request raced with exhaustion
            self.transition(&mut state, TaskStatus::Killed);
        } else {
            self.transition(&mut state, TaskStatus::Finished);
        }
    }

    fn killed(&self) {
        let mut state = self.state.lock();
        self.walk_to_killed(&mut state);
    }

    fn abort(&self, failure: Failure) {
        let mut state = self.state.lock();
        if state.status() == TaskStatus::Submitted {
            self.transition(&mut state, TaskStatus::Running);
        }
        if state.status().can_transition_to(TaskStatus::Aborted) {
            state.failure = Some(failure);
            self.transition(&mut state, TaskStatus::Aborted);
        }
    }
}

// ============================================================================
// Task
// ============================================================================

/// Outcome of [`Task::kill`]
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum KillOutcome {
    /// Interruption requested
    Requested,

    /// Task already in a terminal state, nothing changed
    AlreadyFinished,
}

/// Runtime wrapper around one command invocation
pub struct Task {
    arglist: Vec<String>,
    mode: ExecutionMode,
    record: Arc<TaskRecord>,
    cancel: CancelToken,
    runner: Box<dyn Runner>,
    submitted_at: DateTime<Utc>,
}

impl Task {
    /// Create a task over an explicit runner
    pub fn new(
        number: TaskNumber,
        arglist: Vec<String>,
        runner: Box<dyn Runner>,
        cancel: CancelToken,
    ) -> Self {
        Self {
            arglist,
            mode: runner.mode(),
            record: Arc::new(TaskRecord::new(number)),
            cancel,
            runner,
            submitted_at: Utc::now(),
        }
    }

    /// Task drained inline by [`start`](Self::start)
    pub fn sync(
        number: TaskNumber,
        arglist: Vec<String>,
        sequence: OutputSequence,
        cancel: CancelToken,
    ) -> Self {
        Self::new(number, arglist, Box::new(SyncRunner::new(sequence)), cancel)
    }

    /// Task drained on a background thread
    pub fn threaded(
        number: TaskNumber,
        arglist: Vec<String>,
        sequence: OutputSequence,
        cancel: CancelToken,
    ) -> Self {
        Self::new(number, arglist, Box::new(ThreadedRunner::new(sequence)), cancel)
    }

    /// Task drained by a worker process running `arglist`
    pub fn isolated(
        number: TaskNumber,
        arglist: Vec<String>,
        worker: WorkerCommand,
        kill_grace: Duration,
    ) -> Self {
        let runner = IsolatedRunner::new(worker, arglist.clone()).with_kill_grace(kill_grace);
        Self::new(number, arglist, Box::new(runner), CancelToken::new())
    }

    /// Sentinel returned for empty input lines
    pub fn null() -> Self {
        Self::sync(0, Vec::new(), OutputSequence::empty(), CancelToken::new())
    }

    /// Task that fails with `err` as soon as it runs
    pub fn failed(number: TaskNumber, arglist: Vec<String>, err: CommandError) -> Self {
        Self::sync(number, arglist, OutputSequence::failing(err), CancelToken::new())
    }

    // ========== Execution ==========

    /// Begin draining. Blocks until done for sync tasks only.
    pub fn start(&self) {
        debug!("Starting task {} ({})", self.number(), self.mode);
        self.runner.start(&self.record, &self.cancel);
    }

    /// Block until the task reaches a terminal state
    pub fn wait(&self) {
        self.runner.wait(&self.record);
    }

    /// `start` followed by `wait`
    pub fn run(&self) {
        self.start();
        self.wait();
    }

    /// Request interruption; a no-op on terminal tasks
    pub fn kill(&self) -> KillOutcome {
        if self.status().is_terminal() {
            return KillOutcome::AlreadyFinished;
        }
        info!("Killing task {}", self.number());
        self.runner.kill(&self.record, &self.cancel);
        KillOutcome::Requested
    }

    /// Last produced value once the task is over, or its failure
    pub fn result(&self) -> Result<Option<String>, Failure> {
        self.wait();
        match self.record.failure() {
            Some(failure) => Err(failure),
            None => Ok(self.record.output().pop()),
        }
    }

    // ========== Accessors ==========

    pub fn number(&self) -> TaskNumber {
        self.record.number()
    }

    pub fn arglist(&self) -> &[String] {
        &self.arglist
    }

    pub fn mode(&self) -> ExecutionMode {
        self.mode
    }

    pub fn status(&self) -> TaskStatus {
        self.record.status()
    }

    pub fn is_terminal(&self) -> bool {
        self.status().is_terminal()
    }

    pub fn output(&self) -> Vec<String> {
        self.record.output()
    }

    pub fn output_since(&self, offset: usize) -> Vec<String> {
        self.record.output_since(offset)
    }

    pub fn failure(&self) -> Option<Failure> {
        self.record.failure()
    }

    /// Formatted trace of the failure, empty when there is none
    pub fn traceback(&self) -> String {
        self.failure()
            .map(|f| f.formatted_trace())
            .unwrap_or_default()
    }

    pub fn submitted_at(&self) -> DateTime<Utc> {
        self.submitted_at
    }

    pub fn started_at(&self) -> Option<DateTime<Utc>> {
        self.record.started_at()
    }

    pub fn ended_at(&self) -> Option<DateTime<Utc>> {
        self.record.ended_at()
    }

    /// Elapsed run time, if the task has started
    pub fn duration(&self) -> Option<Duration> {
        let start = self.started_at()?;
        let end = self.ended_at().unwrap_or_else(Utc::now);
        Some((end - start).to_std().unwrap_or_default())
    }

    /// `<kind>: <message>` when aborted, otherwise the newline-joined output
    pub fn render(&self) -> String {
        self.record.render()
    }

    /// `<SyncTask 3 [set a 1] FINISHED>`
    pub fn summary(&self) -> String {
        format!(
            "<{} {} [{}] {}>",
            self.mode.class_name(),
            self.number(),
            self.arglist.join(" "),
            self.status()
        )
    }
}

impl std::fmt::Display for Task {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(&self.summary())
    }
}

impl std::fmt::Debug for Task {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Task")
            .field("number", &self.number())
            .field("arglist", &self.arglist)
            .field("mode", &self.mode)
            .field("status", &self.status())
            .finish()
    }
}
