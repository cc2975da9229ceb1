//! # taskline-task
//!
//! Task runtime for taskline.
//! Wraps a command's output sequence in a Task with an explicit state
//! machine, and drains it through one of three runners.
//!
//! ## Features
//!
//! - Task state machine with append-only output log
//! - Sync, threaded and isolated (worker process) runners
//! - Cooperative cancellation with guaranteed cleanup
//! - Session-scoped task registry

pub mod failure;
pub mod log;
pub mod manager;
pub mod runner;
pub mod sequence;
pub mod state;
pub mod task;

// Task system
pub use failure::Failure;
pub use manager::{TaskManager, NOTHING_TO_KILL, NOTHING_TO_SHOW};
pub use state::TaskStatus;
pub use task::{ExecutionMode, KillOutcome, Task, TaskNumber, TaskRecord};

// Sequences
pub use sequence::{drain, CancelToken, Emission, OutputSequence, TaskSink};

// Runners
pub use runner::{
    install_termination_handler, IsolatedRunner, Runner, SyncRunner, ThreadedRunner,
    WorkerCommand, WorkerEmitter, WorkerEvent, DEFAULT_KILL_GRACE,
};

// Log system
pub use log::{LogEntry, OutputLog};
