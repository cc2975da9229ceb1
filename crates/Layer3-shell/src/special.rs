//! Pseudo-commands backed by the task registry
//!
//! `help`, `kill`, `list`, `output` and `last_failure` (plus the
//! `last_error` alias), each behind the configured command prefix. They run
//! as lazy sync tasks and are never registered themselves.

use crate::command::{BoundArgs, CommandSpec, Param};
use crate::container::CommandTable;
use crate::pager::Pager;
use crate::tokenizer::match_name;
use std::collections::BTreeMap;
use std::str::FromStr;
use std::sync::Arc;
use taskline_foundation::{CommandError, UsageError};
use taskline_task::{Emission, ExecutionMode, OutputSequence, TaskManager, TaskStatus};
use tracing::warn;

const HELP: &str = "help";
const KILL: &str = "kill";
const LIST: &str = "list";
const OUTPUT: &str = "output";
const LAST_FAILURE: &str = "last_failure";
const LAST_ERROR: &str = "last_error";

const BASE_NAMES: [&str; 6] = [HELP, KILL, LIST, OUTPUT, LAST_FAILURE, LAST_ERROR];

/// Width used when laying out the help summary
const SUMMARY_WIDTH: usize = 80;

fn base_specs(prefix: &str) -> Vec<CommandSpec> {
    let taskno = |help: &str| Param::optional("taskno", -1).int().help(help);
    let named = |base: &str| CommandSpec::new(format!("{}{}", prefix, base));
    vec![
        named(HELP)
            .about("show help about a given command")
            .param(Param::maybe("cmd")),
        named(KILL)
            .about("kill the given task (-1 to kill the latest running task)")
            .param(taskno("task to kill")),
        named(LIST).about("list tasks with a given status").param(
            Param::optional("status", TaskStatus::Running)
                .choices(TaskStatus::ALL.iter().map(|s| s.as_str())),
        ),
        named(OUTPUT)
            .about("show the output of a given task (and optionally save it to a file)")
            .param(taskno("task number"))
            .param(Param::maybe("fname")),
        named(LAST_FAILURE)
            .about("show the trace of the latest failed task")
            .param(taskno("task number")),
        named(LAST_ERROR)
            .about("alias of last_failure")
            .param(taskno("task number")),
    ]
}

/// Evaluate `f` on first advancement and emit what it returns
fn lazy<F>(f: F) -> OutputSequence
where
    F: FnOnce() -> Vec<Emission> + Send + 'static,
{
    OutputSequence::new(std::iter::once_with(f).flatten())
}

fn value(text: impl Into<String>) -> Emission {
    Ok(Some(text.into()))
}

/// The pseudo-commands of one session
pub struct SpecialCommands {
    prefix: String,
    specs: BTreeMap<String, CommandSpec>,
    manager: Arc<TaskManager>,
    pager: Option<Arc<dyn Pager>>,
    threshold: usize,
    helps: Arc<BTreeMap<String, String>>,
    summary: Arc<String>,
}

impl SpecialCommands {
    /// Prefixed names a container must not use
    pub fn reserved_names(prefix: &str) -> Vec<String> {
        BASE_NAMES.iter().map(|n| format!("{}{}", prefix, n)).collect()
    }

    pub fn new<C>(
        prefix: &str,
        manager: Arc<TaskManager>,
        table: &CommandTable<C>,
        pager: Option<Arc<dyn Pager>>,
        threshold: usize,
    ) -> Self {
        let specs: BTreeMap<String, CommandSpec> = base_specs(prefix)
            .into_iter()
            .map(|spec| (spec.name().to_string(), spec))
            .collect();

        let mut helps: BTreeMap<String, String> = specs
            .iter()
            .map(|(name, spec)| (name.clone(), spec.help()))
            .collect();
        for name in table.names() {
            if let Some(def) = table.get(name) {
                helps.insert(name.to_string(), def.spec().help());
            }
        }

        let special: Vec<&str> = specs
            .keys()
            .map(String::as_str)
            .filter(|n| !n.ends_with(LAST_ERROR))
            .collect();
        let summary = help_summary(&[
            ("special commands", special),
            ("custom commands", table.names_in(ExecutionMode::Sync)),
            (
                "commands run in external processes",
                table.names_in(ExecutionMode::Isolated),
            ),
            ("threaded commands", table.names_in(ExecutionMode::Threaded)),
        ]);

        Self {
            prefix: prefix.to_string(),
            specs,
            manager,
            pager,
            threshold,
            helps: Arc::new(helps),
            summary: Arc::new(summary),
        }
    }

    pub fn names(&self) -> impl Iterator<Item = &str> {
        self.specs.keys().map(String::as_str)
    }

    pub fn spec(&self, name: &str) -> Option<&CommandSpec> {
        self.specs.get(name)
    }

    pub fn summary(&self) -> &str {
        &self.summary
    }

    /// Output sequence for a resolved pseudo-command
    pub fn sequence(&self, name: &str, args: BoundArgs) -> OutputSequence {
        let manager = Arc::clone(&self.manager);
        let taskno = args.int("taskno").unwrap_or(-1);

        match name.strip_prefix(self.prefix.as_str()).unwrap_or(name) {
            HELP => {
                let helps = Arc::clone(&self.helps);
                let summary = Arc::clone(&self.summary);
                let cmd = args.opt_str("cmd").map(str::to_string);
                lazy(move || vec![help(&helps, &summary, cmd.as_deref())])
            }
            KILL => lazy(move || vec![value(manager.kill(taskno))]),
            LIST => {
                let status = args.str("status").map(str::to_string);
                lazy(move || match status.and_then(|s| {
                    TaskStatus::from_str(&s).map_err(|e| CommandError::failed("ValueError", e))
                }) {
                    Ok(status) => manager.list(status).into_iter().map(value).collect(),
                    Err(e) => vec![Err(e)],
                })
            }
            OUTPUT => {
                let fname = args.opt_str("fname").map(str::to_string);
                let pager = self.pager.clone();
                let threshold = self.threshold;
                lazy(move || output(&manager, taskno, fname, pager.as_deref(), threshold))
            }
            LAST_FAILURE | LAST_ERROR => lazy(move || vec![value(manager.last_failure(taskno))]),
            other => OutputSequence::failing(
                UsageError::new(format!("unknown special command {}", other)).into(),
            ),
        }
    }
}

impl std::fmt::Debug for SpecialCommands {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SpecialCommands")
            .field("prefix", &self.prefix)
            .field("threshold", &self.threshold)
            .finish_non_exhaustive()
    }
}

fn help(helps: &BTreeMap<String, String>, summary: &str, cmd: Option<&str>) -> Emission {
    let Some(cmd) = cmd else {
        return value(summary);
    };
    match match_name(cmd, helps.keys().map(String::as_str))? {
        Some(name) => Ok(helps.get(&name).cloned()),
        None => Err(UsageError::new(format!("unknown command {}", cmd)).into()),
    }
}

fn output(
    manager: &TaskManager,
    taskno: i64,
    fname: Option<String>,
    pager: Option<&dyn Pager>,
    threshold: usize,
) -> Vec<Emission> {
    let task = match manager.output(taskno) {
        Ok(task) => task,
        Err(message) => return vec![value(message)],
    };
    let lines = task.output();
    let text = lines.join("\n");

    if let Some(fname) = fname {
        return match std::fs::write(&fname, &text) {
            Ok(()) => vec![value(format!("saved output of {} into {}", task.number(), fname))],
            Err(e) => vec![Err(e.into())],
        };
    }

    let mut emissions = vec![value(task.summary())];
    match pager {
        Some(pager) if lines.len() > threshold => {
            if let Err(e) = pager.page(&text) {
                warn!("Pager failed, showing output inline: {}", e);
                emissions.push(value(text));
            }
        }
        _ => emissions.push(value(text)),
    }
    emissions
}

/// Titled sections of names, as shown by a bare `help`
fn help_summary(sections: &[(&str, Vec<&str>)]) -> String {
    let mut out = String::new();
    for (title, names) in sections {
        if names.is_empty() {
            continue;
        }
        let mut sorted = names.clone();
        sorted.sort_unstable();
        out.push('\n');
        out.push_str(title);
        out.push('\n');
        out.push_str(&"=".repeat(title.len()));
        out.push('\n');
        out.push_str(&columnize(&sorted, SUMMARY_WIDTH));
        out.push('\n');
    }
    out.trim().to_string()
}

/// Lay out names left to right, two spaces apart, wrapping at `width`
fn columnize(names: &[&str], width: usize) -> String {
    let mut lines: Vec<String> = Vec::new();
    let mut line = String::new();
    for name in names {
        if !line.is_empty() && line.len() + 2 + name.len() > width {
            lines.push(std::mem::take(&mut line));
        }
        if !line.is_empty() {
            line.push_str("  ");
        }
        line.push_str(name);
    }
    if !line.is_empty() {
        lines.push(line);
    }
    lines.join("\n")
}
