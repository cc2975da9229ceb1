//! Isolated runner tests against shell scripts speaking the worker protocol

#![cfg(unix)]

use std::sync::Arc;
use std::thread;
use std::time::{Duration, Instant};
use taskline_task::{Task, TaskStatus, WorkerCommand};

fn script(body: &str) -> WorkerCommand {
    WorkerCommand::new("sh").arg("-c").arg(body)
}

fn isolated(number: u64, args: &str, body: &str, grace: Duration) -> Arc<Task> {
    let arglist = args.split_whitespace().map(String::from).collect();
    Arc::new(Task::isolated(number, arglist, script(body), grace))
}

fn wait_until_running(task: &Task) {
    let deadline = Instant::now() + Duration::from_secs(5);
    while task.status() != TaskStatus::Running && Instant::now() < deadline {
        thread::sleep(Duration::from_millis(5));
    }
    assert_eq!(task.status(), TaskStatus::Running);
}

const LOOPING: &str = r#"
trap 'echo "{\"event\":\"killed\"}"; exit 0' TERM
echo '{"event":"started"}'
i=0
while true; do
  i=$((i+1))
  echo "{\"event\":\"output\",\"value\":\"$i\"}"
  sleep 0.05
done
"#;

#[test]
fn test_worker_output_reaches_parent() {
    let task = isolated(
        1,
        "calc_pi 10",
        r#"echo '{"event":"started"}'
echo 'stray line'
echo '{"event":"output","value":"3.14"}'
echo '{"event":"finished"}'"#,
        Duration::from_secs(2),
    );
    task.run();
    assert_eq!(task.status(), TaskStatus::Finished);
    assert_eq!(task.render(), "3.14");
    assert_eq!(task.summary(), "<IsolatedTask 1 [calc_pi 10] FINISHED>");
}

#[test]
fn test_worker_failure_is_captured() {
    let task = isolated(
        1,
        "import_file missing.txt",
        r#"echo '{"event":"started"}'
echo '{"event":"aborted","failure":{"kind":"IoError","message":"no such file","trace":""}}'"#,
        Duration::from_secs(2),
    );
    task.run();
    assert_eq!(task.status(), TaskStatus::Aborted);
    assert_eq!(task.render(), "IoError: no such file");
}

#[test]
fn test_worker_exit_without_result_aborts() {
    let task = isolated(
        1,
        "crash",
        r#"echo '{"event":"started"}'; exit 3"#,
        Duration::from_secs(2),
    );
    task.run();
    assert_eq!(task.status(), TaskStatus::Aborted);
    assert_eq!(task.failure().unwrap().kind, "WorkerExited");
}

#[test]
fn test_spawn_failure_aborts() {
    let worker = WorkerCommand::new("/nonexistent/taskline-worker");
    let task = Task::isolated(1, vec!["x".into()], worker, Duration::from_secs(1));
    task.run();
    assert_eq!(task.status(), TaskStatus::Aborted);
    let failure = task.failure().unwrap();
    assert_eq!(failure.kind, "WorkerError");
    assert!(failure.message.starts_with("cannot spawn /nonexistent/taskline-worker"));
}

#[test]
fn test_sigterm_runs_worker_cleanup() {
    let task = isolated(1, "loop", LOOPING, Duration::from_secs(5));
    task.start();
    wait_until_running(&task);
    task.kill();
    task.wait();
    assert_eq!(task.status(), TaskStatus::Killed);
}

#[test]
fn test_sigkill_after_grace() {
    let task = isolated(
        1,
        "stubborn",
        r#"trap '' TERM
echo '{"event":"started"}'
while true; do sleep 0.05; done"#,
        Duration::from_millis(200),
    );
    task.start();
    wait_until_running(&task);
    task.kill();
    task.wait();
    assert_eq!(task.status(), TaskStatus::Killed);
}

#[test]
fn test_killing_one_worker_leaves_the_other_alone() {
    let doomed = isolated(1, "loop", LOOPING, Duration::from_secs(5));
    let survivor = isolated(
        2,
        "count 3",
        r#"echo '{"event":"started"}'
for i in 1 2 3; do
  echo "{\"event\":\"output\",\"value\":\"$i\"}"
  sleep 0.1
done
echo '{"event":"finished"}'"#,
        Duration::from_secs(5),
    );

    doomed.start();
    survivor.start();
    wait_until_running(&doomed);
    doomed.kill();

    doomed.wait();
    survivor.wait();
    assert_eq!(doomed.status(), TaskStatus::Killed);
    assert_eq!(survivor.status(), TaskStatus::Finished);
    assert_eq!(survivor.render(), "1\n2\n3");
}

#[test]
fn test_kill_before_start() {
    let task = isolated(1, "loop", LOOPING, Duration::from_secs(1));
    task.kill();
    assert_eq!(task.status(), TaskStatus::Submitted);
    task.run();
    assert_eq!(task.status(), TaskStatus::Killed);
    assert!(task.output().is_empty());
}
