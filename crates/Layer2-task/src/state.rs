//! Task state machine

use serde::{Deserialize, Serialize};
use std::str::FromStr;

/// Possible states of a task
///
/// ```text
/// SUBMITTED ──> RUNNING ──> FINISHED
///                 │  │
///                 │  └────> ABORTED <──┐
///                 v                    │
///             TOBEKILLED ──> KILLED    │
///                 └────────────────────┘
/// ```
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum TaskStatus {
    /// Created, sequence not advanced yet
    Submitted,

    /// Sequence is being drained
    Running,

    /// Kill requested, takes effect on the next advancement
    #[serde(rename = "TOBEKILLED")]
    ToBeKilled,

    /// Interrupted by a kill
    Killed,

    /// Sequence exhausted normally
    Finished,

    /// Sequence raised a failure
    Aborted,
}

impl TaskStatus {
    /// Every status, in lifecycle order
    pub const ALL: [TaskStatus; 6] = [
        TaskStatus::Submitted,
        TaskStatus::Running,
        TaskStatus::ToBeKilled,
        TaskStatus::Killed,
        TaskStatus::Finished,
        TaskStatus::Aborted,
    ];

    /// Check if this is a terminal state (cannot transition further)
    pub fn is_terminal(&self) -> bool {
        matches!(
            self,
            TaskStatus::Killed | TaskStatus::Finished | TaskStatus::Aborted
        )
    }

    /// Check if the task is draining its sequence
    pub fn is_running(&self) -> bool {
        matches!(self, TaskStatus::Running)
    }

    /// Legal edges of the state machine
    pub fn can_transition_to(&self, next: TaskStatus) -> bool {
        use TaskStatus::*;
        matches!(
            (self, next),
            (Submitted, Running)
                | (Running, Running)
                | (Running, ToBeKilled)
                | (Running, Finished)
                | (Running, Aborted)
                | (ToBeKilled, Killed)
                | (ToBeKilled, Aborted)
        )
    }

    /// Wire and display name
    pub fn as_str(&self) -> &'static str {
        match self {
            TaskStatus::Submitted => "SUBMITTED",
            TaskStatus::Running => "RUNNING",
            TaskStatus::ToBeKilled => "TOBEKILLED",
            TaskStatus::Killed => "KILLED",
            TaskStatus::Finished => "FINISHED",
            TaskStatus::Aborted => "ABORTED",
        }
    }
}

impl std::fmt::Display for TaskStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for TaskStatus {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        TaskStatus::ALL
            .into_iter()
            .find(|status| status.as_str() == s)
            .ok_or_else(|| format!("unknown task status '{}'", s))
    }
}
