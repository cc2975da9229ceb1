//! Task Manager - session-scoped task registry
//!
//! Features:
//! - Task numbering in strict submission order
//! - Lookup by number, or "nth latest" with negative numbers
//! - Bookkeeping operations backing the kill/list/output/last_failure
//!   pseudo-commands
//! - Forced kill of every running task on close

use crate::state::TaskStatus;
use crate::task::{KillOutcome, Task, TaskNumber};
use parking_lot::RwLock;
use std::collections::BTreeMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use tracing::{debug, info};

/// Message for lookups that match nothing
pub const NOTHING_TO_SHOW: &str = "Nothing to show";

/// Message for a kill with no running task
pub const NOTHING_TO_KILL: &str = "Nothing to kill";

/// Registry of the tasks submitted in one interpreter session
#[derive(Debug)]
pub struct TaskManager {
    /// All registered tasks by number
    tasks: RwLock<BTreeMap<TaskNumber, Arc<Task>>>,

    /// Last number handed out
    counter: AtomicU64,
}

impl Default for TaskManager {
    fn default() -> Self {
        Self::new()
    }
}

impl TaskManager {
    pub fn new() -> Self {
        Self {
            tasks: RwLock::new(BTreeMap::new()),
            counter: AtomicU64::new(0),
        }
    }

    /// Reserve the next task number. Numbers are never reused, even for
    /// tasks that end up unregistered.
    pub fn next_number(&self) -> TaskNumber {
        self.counter.fetch_add(1, Ordering::SeqCst) + 1
    }

    /// Track a submitted task
    pub fn register(&self, task: Arc<Task>) {
        debug!("Registering task {}", task.summary());
        self.tasks.write().insert(task.number(), task);
    }

    pub fn get(&self, number: TaskNumber) -> Option<Arc<Task>> {
        self.tasks.read().get(&number).cloned()
    }

    /// Every registered task in submission order
    pub fn tasks(&self) -> Vec<Arc<Task>> {
        self.tasks.read().values().cloned().collect()
    }

    pub fn len(&self) -> usize {
        self.tasks.read().len()
    }

    pub fn is_empty(&self) -> bool {
        self.tasks.read().is_empty()
    }

    /// Registered tasks currently in `status`, in submission order
    pub fn with_status(&self, status: TaskStatus) -> Vec<Arc<Task>> {
        self.tasks
            .read()
            .values()
            .filter(|t| t.status() == status)
            .cloned()
            .collect()
    }

    /// The nth latest task (`-1` is the latest), optionally restricted to
    /// one status
    pub fn latest(&self, nth: i64, status: Option<TaskStatus>) -> Option<Arc<Task>> {
        if nth >= 0 {
            return None;
        }
        let skip = usize::try_from(nth.unsigned_abs() - 1).ok()?;
        self.tasks
            .read()
            .values()
            .rev()
            .filter(|t| status.map_or(true, |s| t.status() == s))
            .nth(skip)
            .cloned()
    }

    /// Resolve a task number as typed by a user: negative numbers count
    /// back from the latest task matching `status`.
    pub fn resolve(
        &self,
        taskno: i64,
        status: Option<TaskStatus>,
        not_found: &str,
    ) -> Result<Arc<Task>, String> {
        if taskno < 0 {
            return self.latest(taskno, status).ok_or_else(|| not_found.to_string());
        }
        u64::try_from(taskno)
            .ok()
            .and_then(|n| self.get(n))
            .ok_or_else(|| format!("Unknown task {}", taskno))
    }

    // ========== Pseudo-command bodies ==========

    /// Kill a task; negative numbers count back over running tasks.
    /// Never fails, the outcome is always described by the message.
    pub fn kill(&self, taskno: i64) -> String {
        let task = match self.resolve(taskno, Some(TaskStatus::Running), NOTHING_TO_KILL) {
            Ok(task) => task,
            Err(message) => return message,
        };
        match task.kill() {
            KillOutcome::AlreadyFinished => format!("Already finished {}", task.summary()),
            KillOutcome::Requested => task.summary(),
        }
    }

    /// Summaries of the tasks in `status`
    pub fn list(&self, status: TaskStatus) -> Vec<String> {
        self.with_status(status).iter().map(|t| t.summary()).collect()
    }

    /// Task whose output should be shown; negative numbers count back over
    /// all tasks
    pub fn output(&self, taskno: i64) -> Result<Arc<Task>, String> {
        self.resolve(taskno, None, NOTHING_TO_SHOW)
    }

    /// Formatted trace of an aborted task; negative numbers count back over
    /// aborted tasks
    pub fn last_failure(&self, taskno: i64) -> String {
        match self.resolve(taskno, Some(TaskStatus::Aborted), NOTHING_TO_SHOW) {
            Ok(task) => match task.failure() {
                Some(failure) => failure.formatted_trace(),
                None => NOTHING_TO_SHOW.to_string(),
            },
            Err(message) => message,
        }
    }

    /// Kill and wait on every running task
    pub fn close(&self) {
        let running: Vec<Arc<Task>> = self
            .tasks
            .read()
            .values()
            .filter(|t| !t.is_terminal())
            .cloned()
            .collect();
        if running.is_empty() {
            return;
        }

        info!("Killing {} unfinished task(s)", running.len());
        for task in &running {
            task.kill();
        }
        for task in &running {
            task.wait();
        }
    }
}
