//! Session-level tests of the interpreter

use parking_lot::Mutex;
use std::collections::BTreeMap;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};
use taskline_foundation::{CommandError, Error};
use taskline_shell::{
    CommandContainer, CommandDef, CommandOutput, CommandSpec, Interpreter, InterpreterConfig, Param,
};
use taskline_task::{OutputSequence, Task, TaskStatus};

#[derive(Default)]
struct Shelf {
    store: Arc<Mutex<BTreeMap<String, String>>>,
    setups: Arc<AtomicUsize>,
    teardowns: Arc<AtomicUsize>,
}

impl CommandContainer for Shelf {
    fn commands() -> Vec<CommandDef<Self>> {
        vec![
            CommandDef::new(
                CommandSpec::new("set")
                    .about("store a value")
                    .param(Param::positional("key"))
                    .param(Param::positional("value")),
                |shelf: &Shelf, args, _| {
                    let key = args.str("key")?.to_string();
                    let value = args.str("value")?.to_string();
                    shelf.store.lock().insert(key.clone(), value.clone());
                    Ok(CommandOutput::value(format!("setting {}={}", key, value)))
                },
            ),
            CommandDef::new(
                CommandSpec::new("show").param(Param::varargs("keys")),
                |shelf: &Shelf, args, _| {
                    let store = shelf.store.lock();
                    let lines: Vec<String> = args
                        .list("keys")
                        .into_iter()
                        .map(|key| match store.get(&key) {
                            Some(value) => format!("{}={}", key, value),
                            None => format!("{}: not found", key),
                        })
                        .collect();
                    Ok(OutputSequence::values(lines).into())
                },
            ),
            CommandDef::new(CommandSpec::new("delete").param(Param::positional("key")), |shelf: &Shelf, args, _| {
                let key = args.str("key")?;
                match shelf.store.lock().remove(key) {
                    Some(_) => Ok(CommandOutput::value(format!("deleted {}", key))),
                    None => Err(CommandError::failed("KeyError", key)),
                }
            }),
            CommandDef::new(
                CommandSpec::new("count").threaded().param(Param::positional("n").int()),
                |_: &Shelf, args, cancel| {
                    let n = args.int("n")?;
                    let cancel = cancel.clone();
                    let mut i = 0;
                    Ok(OutputSequence::from_fn(move || {
                        if let Err(e) = cancel.sleep(Duration::from_millis(20)) {
                            return Some(Err(e));
                        }
                        i += 1;
                        (i <= n).then(|| Ok(Some(i.to_string())))
                    })
                    .into())
                },
            ),
        ]
    }

    fn setup(&mut self) -> taskline_foundation::Result<()> {
        self.setups.fetch_add(1, Ordering::SeqCst);
        Ok(())
    }

    fn teardown(&mut self) -> taskline_foundation::Result<()> {
        self.teardowns.fetch_add(1, Ordering::SeqCst);
        Ok(())
    }

    fn missing(
        &self,
        name: &str,
        _args: &[String],
    ) -> Option<Result<CommandOutput, CommandError>> {
        name.strip_prefix("echo_").map(|word| Ok(CommandOutput::value(word)))
    }
}

fn session() -> Interpreter<Shelf> {
    let mut interpreter = Interpreter::new(Shelf::default(), InterpreterConfig::default()).unwrap();
    interpreter.enter().unwrap();
    interpreter
}

fn wait_for_output(task: &Task, len: usize) {
    let deadline = Instant::now() + Duration::from_secs(5);
    while task.output().len() < len && Instant::now() < deadline {
        std::thread::sleep(Duration::from_millis(5));
    }
}

#[test]
fn test_submit_requires_enter() {
    let interpreter = Interpreter::new(Shelf::default(), InterpreterConfig::default()).unwrap();
    assert!(matches!(interpreter.submit("set a 1"), Err(Error::NotEntered)));
}

#[test]
fn test_numbering_and_registration() {
    let interpreter = session();

    let set = interpreter.send("set a 1").unwrap();
    assert_eq!(set.number(), 1);
    assert_eq!(set.render(), "setting a=1");

    let listing = interpreter.send(".list FINISHED").unwrap();
    assert_eq!(listing.number(), 2);
    assert_eq!(listing.render(), "<SyncTask 1 [set a 1] FINISHED>");

    let show = interpreter.send("show a b").unwrap();
    assert_eq!(show.number(), 3);
    assert_eq!(show.render(), "a=1\nb: not found");

    let numbers: Vec<u64> = interpreter.tasks().iter().map(|t| t.number()).collect();
    assert_eq!(numbers, vec![1, 3]);
}

#[test]
fn test_atomic_results_finish_at_submit() {
    let interpreter = session();
    let task = interpreter.submit("set a 1").unwrap();
    assert_eq!(task.status(), TaskStatus::Finished);

    let lazy = interpreter.submit("show a").unwrap();
    assert_eq!(lazy.status(), TaskStatus::Submitted);
    lazy.run();
    assert_eq!(lazy.render(), "a=1");
}

#[test]
fn test_empty_line_is_a_noop() {
    let interpreter = session();
    let task = interpreter.send("   # just a comment").unwrap();
    assert_eq!(task.number(), 0);
    assert_eq!(task.render(), "");
    assert!(interpreter.tasks().is_empty());
}

#[test]
fn test_usage_errors_become_aborted_tasks() {
    let interpreter = session();

    let missing_arg = interpreter.send("set a").unwrap();
    assert_eq!(missing_arg.status(), TaskStatus::Aborted);
    assert!(missing_arg.render().starts_with("UsageError: "));
    assert_eq!(missing_arg.failure().and_then(|f| f.exit_code), Some(2));

    let unknown = interpreter.send("nope").unwrap();
    assert_eq!(unknown.render(), "UsageError: unknown command: nope");

    let ambiguous = interpreter.send("s x").unwrap();
    assert_eq!(
        ambiguous.render(),
        r#"UsageError: Ambiguous command 's': matching ["set", "show"]"#
    );

    assert_eq!(interpreter.tasks().len(), 3);
    assert_eq!(
        interpreter.send(".last_failure").unwrap().render(),
        ambiguous.render()
    );
}

#[test]
fn test_prefix_and_missing_hook() {
    let interpreter = session();
    assert_eq!(interpreter.send("sh a").unwrap().render(), "a: not found");
    assert_eq!(interpreter.send("echo_hi").unwrap().render(), "hi");
}

#[test]
fn test_handler_errors_are_captured() {
    let interpreter = session();
    let task = interpreter.send("delete a").unwrap();
    assert_eq!(task.status(), TaskStatus::Aborted);
    assert_eq!(task.render(), "KeyError: a");
    assert_eq!(interpreter.send(".last_error").unwrap().render(), "KeyError: a");
}

#[test]
fn test_help() {
    let interpreter = session();

    let summary = interpreter.send(".help").unwrap().render();
    assert!(summary.starts_with("special commands\n================"));
    assert!(summary.contains("custom commands"));
    assert!(summary.contains("threaded commands\n=================\ncount"));
    assert!(!summary.contains("commands run in external processes"));

    let help = interpreter.send("set -h").unwrap();
    assert_eq!(help.status(), TaskStatus::Finished);
    assert!(help.render().contains("store a value"));
    assert!(interpreter.send(".help set").unwrap().render().contains("<key>"));
}

#[test]
fn test_kill_list_output_on_threaded_tasks() {
    let interpreter = session();
    assert_eq!(interpreter.send(".kill").unwrap().render(), "Nothing to kill");
    assert_eq!(interpreter.send(".output").unwrap().render(), "Nothing to show");

    let task = interpreter.submit("count 1000").unwrap();
    assert_eq!(task.summary(), "<ThreadedTask 3 [count 1000] SUBMITTED>");
    task.start();
    wait_for_output(&task, 2);

    assert_eq!(
        interpreter.send(".list").unwrap().render(),
        "<ThreadedTask 3 [count 1000] RUNNING>"
    );
    assert!(interpreter.send(".kill 3").unwrap().render().starts_with("<ThreadedTask 3"));
    task.wait();
    assert_eq!(task.status(), TaskStatus::Killed);

    let output = interpreter.send(".output 3").unwrap().render();
    assert!(output.starts_with("<ThreadedTask 3 [count 1000] KILLED>\n1\n2"));
    assert_eq!(
        interpreter.send(".kill 3").unwrap().render(),
        "Already finished <ThreadedTask 3 [count 1000] KILLED>"
    );
    assert_eq!(interpreter.send(".kill 42").unwrap().render(), "Unknown task 42");
}

#[test]
fn test_output_saved_to_file() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("out.txt");
    let interpreter = session();
    interpreter.send("show a b").unwrap();

    let line = format!(".output 1 {}", path.display());
    let saved = interpreter.send(&line).unwrap();
    assert_eq!(saved.render(), format!("saved output of 1 into {}", path.display()));
    assert_eq!(std::fs::read_to_string(&path).unwrap(), "a: not found\nb: not found");
}

#[test]
fn test_exit_kills_running_tasks_then_tears_down() {
    let shelf = Shelf::default();
    let teardowns = Arc::clone(&shelf.teardowns);
    let setups = Arc::clone(&shelf.setups);
    let mut interpreter = Interpreter::new(shelf, InterpreterConfig::default()).unwrap();
    interpreter.enter().unwrap();
    assert_eq!(setups.load(Ordering::SeqCst), 1);

    let task = interpreter.submit("count 1000").unwrap();
    task.start();
    interpreter.exit().unwrap();

    assert_eq!(task.status(), TaskStatus::Killed);
    assert_eq!(teardowns.load(Ordering::SeqCst), 1);
    assert!(!interpreter.is_entered());
}

#[test]
fn test_drop_exits_session() {
    let shelf = Shelf::default();
    let teardowns = Arc::clone(&shelf.teardowns);
    {
        let mut interpreter = Interpreter::new(shelf, InterpreterConfig::default()).unwrap();
        interpreter.enter().unwrap();
    }
    assert_eq!(teardowns.load(Ordering::SeqCst), 1);
}

#[test]
fn test_check() {
    let interpreter = session();
    interpreter.check("set a 1", "setting a=1").unwrap();
    match interpreter.check("show a", "a=2") {
        Err(Error::Mismatch { output, expected, .. }) => {
            assert_eq!(output, "a=1");
            assert_eq!(expected, "a=2");
        }
        other => panic!("unexpected {:?}", other),
    }
}

#[test]
fn test_execute() {
    let mut interpreter = Interpreter::new(Shelf::default(), InterpreterConfig::default()).unwrap();
    let mut out = Vec::new();
    interpreter.execute(["set a 1", "show a"], &mut out).unwrap();
    assert_eq!(String::from_utf8(out).unwrap(), "setting a=1\na=1\n");

    let mut out = Vec::new();
    let err = interpreter
        .execute(["set b 2", "delete c", "show b"], &mut out)
        .unwrap_err();
    assert_eq!(err.to_string(), "KeyError: c");
    assert_eq!(String::from_utf8(out).unwrap(), "setting b=2\n");
}

#[test]
fn test_doctest() {
    let mut interpreter = Interpreter::new(Shelf::default(), InterpreterConfig::default()).unwrap();
    interpreter
        .doctest(
            "
            i> set a 1
            setting a=1
            i> show a b
            a=1
            b: not found
            ",
        )
        .unwrap();

    let err = interpreter.doctest("i> show a\na=2").unwrap_err();
    assert!(matches!(err, Error::Mismatch { .. }));
}

#[test]
fn test_interact() {
    let mut interpreter = Interpreter::new(Shelf::default(), InterpreterConfig::default()).unwrap();
    let input = b"set a 1\n\nshow a\nnope\n";
    let mut out = Vec::new();
    interpreter.interact(&input[..], &mut out).unwrap();
    assert_eq!(
        String::from_utf8(out).unwrap(),
        "i> setting a=1\ni> i> a=1\ni> UsageError: unknown command: nope\ni> \n"
    );
}

#[test]
fn test_multiline() {
    let mut interpreter = Interpreter::new(Shelf::default(), InterpreterConfig::default()).unwrap();
    let input = b"set a\n1;\nshow a;\n";
    let mut out = Vec::new();
    interpreter.multiline(&input[..], &mut out, ';').unwrap();
    assert_eq!(String::from_utf8(out).unwrap(), "setting a=1\na=1\n");
}

struct Heavy;

impl CommandContainer for Heavy {
    fn commands() -> Vec<CommandDef<Self>> {
        vec![CommandDef::new(CommandSpec::new("crunch").isolated(), |_: &Heavy, _, _| {
            Ok(CommandOutput::nothing())
        })]
    }
}

#[test]
fn test_isolated_commands_need_a_worker() {
    let err = Interpreter::new(Heavy, InterpreterConfig::default()).err().unwrap();
    assert!(matches!(err, Error::Configuration(_)));
}
