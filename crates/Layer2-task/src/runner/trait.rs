//! Runner trait

use crate::sequence::CancelToken;
use crate::task::{ExecutionMode, TaskRecord};
use std::sync::Arc;

/// Runner trait - implement to add new execution strategies
///
/// Every method takes the shared record so runners stay free of task
/// bookkeeping; `start` is only honored once.
pub trait Runner: Send + Sync {
    /// Strategy implemented by this runner
    fn mode(&self) -> ExecutionMode;

    /// Begin draining into `record`
    fn start(&self, record: &Arc<TaskRecord>, cancel: &CancelToken);

    /// Block until `record` is terminal; returns at once if never started
    fn wait(&self, record: &Arc<TaskRecord>);

    /// Request interruption
    fn kill(&self, record: &Arc<TaskRecord>, cancel: &CancelToken);
}
