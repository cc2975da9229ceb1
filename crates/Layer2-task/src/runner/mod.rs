//! Runner strategies
//!
//! A runner decides where a task's output sequence is drained:
//! - [`SyncRunner`]: inline, on the caller's thread
//! - [`ThreadedRunner`]: on a dedicated background thread
//! - [`IsolatedRunner`]: in a separate worker process

mod isolated;
mod sync;
mod threaded;
mod r#trait;
pub mod worker;

pub use isolated::{IsolatedRunner, WorkerCommand, DEFAULT_KILL_GRACE};
pub use r#trait::Runner;
pub use sync::SyncRunner;
pub use threaded::ThreadedRunner;
pub use worker::{install_termination_handler, WorkerEmitter, WorkerEvent};
