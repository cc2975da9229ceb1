//! Parallel fan-out over output sequences

use std::sync::Arc;
use taskline_task::{CancelToken, OutputSequence, Task};
use tracing::debug;

/// Wrap each sequence in a threaded task, numbered from 1 in input order.
/// Tasks are started when `start` is set; callers wait on them.
pub fn runp<I>(sequences: I, start: bool) -> Vec<Arc<Task>>
where
    I: IntoIterator<Item = OutputSequence>,
{
    let tasks: Vec<Arc<Task>> = sequences
        .into_iter()
        .zip(1..)
        .map(|(sequence, number)| {
            let arglist = vec![format!("runp-{}", number)];
            Arc::new(Task::threaded(number, arglist, sequence, CancelToken::new()))
        })
        .collect();

    if start {
        debug!("Starting {} parallel tasks", tasks.len());
        for task in &tasks {
            task.start();
        }
    }
    tasks
}

/// Block until every task is terminal
pub fn wait_all(tasks: &[Arc<Task>]) {
    for task in tasks {
        task.wait();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;
    use taskline_foundation::CommandError;
    use taskline_task::TaskStatus;

    #[test]
    fn test_runp_runs_every_sequence() {
        let sequences = (1..=4).map(|n| {
            let mut i = 0;
            OutputSequence::from_fn(move || {
                std::thread::sleep(Duration::from_millis(10));
                i += 1;
                (i <= n).then(|| Ok(Some(i.to_string())))
            })
        });
        let tasks = runp(sequences, true);
        wait_all(&tasks);

        assert_eq!(tasks.len(), 4);
        for (task, n) in tasks.iter().zip(1..) {
            assert_eq!(task.status(), TaskStatus::Finished);
            assert_eq!(task.output().len(), n);
        }
    }

    #[test]
    fn test_runp_isolates_failures() {
        let sequences = vec![
            OutputSequence::values(["a"]),
            OutputSequence::failing(CommandError::failed("ValueError", "bad")),
        ];
        let tasks = runp(sequences, true);
        wait_all(&tasks);
        assert_eq!(tasks[0].render(), "a");
        assert_eq!(tasks[1].status(), TaskStatus::Aborted);
        assert_eq!(tasks[1].render(), "ValueError: bad");
    }

    #[test]
    fn test_runp_without_start() {
        let tasks = runp(vec![OutputSequence::empty()], false);
        assert_eq!(tasks[0].status(), TaskStatus::Submitted);
        tasks[0].run();
        assert_eq!(tasks[0].status(), TaskStatus::Finished);
    }
}
