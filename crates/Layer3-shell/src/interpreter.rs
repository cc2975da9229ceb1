//! Interpreter - the command loop of one session
//!
//! Turns lines of text into tasks:
//! 1. split the line (comment aware)
//! 2. resolve the command name and bind its arguments
//! 3. build a task with the runner matching the command's class
//! 4. register it, unless it is a pseudo-command
//!
//! Resolution errors never escape: they become ABORTED tasks.

use crate::command::Parsed;
use crate::container::{CommandContainer, CommandOutput, CommandTable};
use crate::pager::{CommandPager, Pager};
use crate::special::SpecialCommands;
use crate::tokenizer::{match_name, split};
use std::io::{BufRead, Write};
use std::sync::Arc;
use std::time::Duration;
use taskline_foundation::{CommandError, Error, Result, TasklineConfig, UsageError};
use taskline_task::{
    CancelToken, ExecutionMode, IsolatedRunner, Task, TaskManager, TaskNumber, TaskStatus,
    WorkerCommand, DEFAULT_KILL_GRACE,
};
use tracing::{debug, info, warn};

/// Session options
#[derive(Clone)]
pub struct InterpreterConfig {
    /// Prompt written before each interactive line, also marks doctest input
    pub prompt: String,

    /// Everything after this character is ignored
    pub comment_char: char,

    /// Prefix of the pseudo-command names
    pub command_prefix: String,

    /// Delay before a killed worker process gets SIGKILL
    pub kill_grace: Duration,

    /// Pager for long `output` listings
    pub pager: Option<Arc<dyn Pager>>,

    /// Output length from which the pager is used
    pub pager_threshold: usize,

    /// How to launch worker processes for isolated commands
    pub worker: Option<WorkerCommand>,

    /// Echo failure traces in interactive modes
    pub verbose: bool,
}

impl Default for InterpreterConfig {
    fn default() -> Self {
        Self {
            prompt: "i> ".to_string(),
            comment_char: '#',
            command_prefix: ".".to_string(),
            kill_grace: DEFAULT_KILL_GRACE,
            pager: None,
            pager_threshold: 20,
            worker: None,
            verbose: false,
        }
    }
}

impl InterpreterConfig {
    pub fn from_config(config: &TasklineConfig) -> Self {
        let pager = CommandPager::from_settings(&config.pager).map(|p| Arc::new(p) as Arc<dyn Pager>);
        Self {
            prompt: config.interpreter.prompt.clone(),
            comment_char: config.interpreter.comment_char,
            command_prefix: config.interpreter.command_prefix.clone(),
            kill_grace: config.interpreter.kill_grace(),
            pager,
            pager_threshold: config.pager.threshold,
            worker: None,
            verbose: false,
        }
    }

    pub fn with_worker(mut self, worker: WorkerCommand) -> Self {
        self.worker = Some(worker);
        self
    }

    pub fn with_pager(mut self, pager: Option<Arc<dyn Pager>>) -> Self {
        self.pager = pager;
        self
    }

    pub fn verbose(mut self, verbose: bool) -> Self {
        self.verbose = verbose;
        self
    }
}

impl std::fmt::Debug for InterpreterConfig {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("InterpreterConfig")
            .field("prompt", &self.prompt)
            .field("comment_char", &self.comment_char)
            .field("command_prefix", &self.command_prefix)
            .field("kill_grace", &self.kill_grace)
            .field("pager", &self.pager.is_some())
            .field("pager_threshold", &self.pager_threshold)
            .field("worker", &self.worker)
            .field("verbose", &self.verbose)
            .finish()
    }
}

/// A task ready to be handed out by `submit`
struct Prepared {
    task: Task,
    special: bool,
    /// Atomic results are finished before `submit` returns
    run_now: bool,
}

impl Prepared {
    fn command(task: Task) -> Self {
        Self {
            task,
            special: false,
            run_now: false,
        }
    }

    fn atomic(task: Task) -> Self {
        Self {
            task,
            special: false,
            run_now: true,
        }
    }

    fn special(self) -> Self {
        Self {
            special: true,
            ..self
        }
    }
}

/// One session: a container, its command table and its task registry
pub struct Interpreter<C: CommandContainer> {
    container: C,
    table: CommandTable<C>,
    special: SpecialCommands,
    manager: Arc<TaskManager>,
    config: InterpreterConfig,
    entered: bool,
}

impl<C: CommandContainer> Interpreter<C> {
    /// Build a session. Fails on container misdeclarations.
    pub fn new(container: C, config: InterpreterConfig) -> Result<Self> {
        let reserved = SpecialCommands::reserved_names(&config.command_prefix);
        let table = CommandTable::<C>::of(&reserved)?;
        if table.has_isolated() && config.worker.is_none() {
            return Err(Error::configuration(format!(
                "isolated commands {:?} need a worker command",
                table.names_in(ExecutionMode::Isolated)
            )));
        }

        let manager = Arc::new(TaskManager::new());
        let special = SpecialCommands::new(
            &config.command_prefix,
            Arc::clone(&manager),
            &table,
            config.pager.clone(),
            config.pager_threshold,
        );

        Ok(Self {
            container,
            table,
            special,
            manager,
            config,
            entered: false,
        })
    }

    pub fn container(&self) -> &C {
        &self.container
    }

    pub fn manager(&self) -> &Arc<TaskManager> {
        &self.manager
    }

    pub fn config(&self) -> &InterpreterConfig {
        &self.config
    }

    pub fn is_entered(&self) -> bool {
        self.entered
    }

    /// Every command name the session understands, pseudo-commands first
    pub fn command_names(&self) -> Vec<&str> {
        self.special.names().chain(self.table.names()).collect()
    }

    // ========== Session lifecycle ==========

    /// Run the container's setup hook; required before submitting
    pub fn enter(&mut self) -> Result<()> {
        if self.entered {
            return Ok(());
        }
        self.container.setup()?;
        self.entered = true;
        debug!("Session entered");
        Ok(())
    }

    /// Kill and wait on unfinished tasks, then run the teardown hook
    pub fn exit(&mut self) -> Result<()> {
        if !self.entered {
            return Ok(());
        }
        self.entered = false;
        self.manager.close();
        self.container.teardown()?;
        debug!("Session exited");
        Ok(())
    }

    fn with_session<T>(&mut self, f: impl FnOnce(&Self) -> Result<T>) -> Result<T> {
        let entered_here = !self.entered;
        if entered_here {
            self.enter()?;
        }
        let result = f(self);
        if entered_here {
            let closed = self.exit();
            return result.and_then(|value| closed.map(|_| value));
        }
        result
    }

    // ========== Submission ==========

    /// Turn a line into a task without running it. Atomic results come back
    /// already finished.
    pub fn submit(&self, line: &str) -> Result<Arc<Task>> {
        if !self.entered {
            return Err(Error::NotEntered);
        }
        match split(line, self.config.comment_char) {
            Ok(tokens) => self.submit_tokens(tokens),
            Err(usage) => {
                let number = self.manager.next_number();
                let task = Arc::new(Task::failed(number, vec![line.to_string()], usage.into()));
                self.manager.register(Arc::clone(&task));
                Ok(task)
            }
        }
    }

    /// Like [`submit`](Self::submit) for an already split line
    pub fn submit_tokens(&self, tokens: Vec<String>) -> Result<Arc<Task>> {
        if !self.entered {
            return Err(Error::NotEntered);
        }
        if tokens.is_empty() {
            return Ok(Arc::new(Task::null()));
        }

        let number = self.manager.next_number();
        debug!("Submitting task {}: {:?}", number, tokens);
        let prepared = self.prepare(number, tokens);
        let task = Arc::new(prepared.task);
        if !prepared.special {
            self.manager.register(Arc::clone(&task));
        }
        if prepared.run_now {
            task.run();
        }
        Ok(task)
    }

    /// Submit and run to completion
    pub fn send(&self, line: &str) -> Result<Arc<Task>> {
        let task = self.submit(line)?;
        task.run();
        Ok(task)
    }

    /// Every registered task in submission order
    pub fn tasks(&self) -> Vec<Arc<Task>> {
        self.manager.tasks()
    }

    fn prepare(&self, number: TaskNumber, tokens: Vec<String>) -> Prepared {
        let names = self.special.names().chain(self.table.names());
        let name = match match_name(&tokens[0], names) {
            Ok(Some(name)) => name,
            Ok(None) => return self.prepare_missing(number, tokens),
            Err(usage) => return Prepared::command(Task::failed(number, tokens, usage.into())),
        };
        let rest = &tokens[1..];

        if let Some(spec) = self.special.spec(&name) {
            let task = match spec.parse(rest) {
                Ok(Parsed::Args(args)) => {
                    let sequence = self.special.sequence(&name, args);
                    Task::sync(number, tokens, sequence, CancelToken::new())
                }
                Ok(Parsed::Help(help)) => return Prepared::atomic(atomic(number, tokens, help)).special(),
                Err(usage) => Task::failed(number, tokens, usage.into()),
            };
            return Prepared::command(task).special();
        }

        let Some(def) = self.table.get(&name) else {
            let usage = UsageError::new(format!("unknown command: {}", name));
            return Prepared::command(Task::failed(number, tokens, usage.into()));
        };
        let args = match def.spec().parse(rest) {
            Ok(Parsed::Args(args)) => args,
            Ok(Parsed::Help(help)) => return Prepared::atomic(atomic(number, tokens, help)),
            Err(usage) => return Prepared::command(Task::failed(number, tokens, usage.into())),
        };

        let mode = def.spec().execution_mode();
        if mode == ExecutionMode::Isolated {
            return Prepared::command(self.isolated(number, &name, tokens));
        }

        let cancel = CancelToken::new();
        match def.call(&self.container, args, &cancel) {
            Ok(CommandOutput::Atomic(value)) => {
                let sequence = CommandOutput::Atomic(value).into_sequence();
                Prepared::atomic(Task::sync(number, tokens, sequence, cancel))
            }
            Ok(CommandOutput::Sequence(sequence)) if mode == ExecutionMode::Threaded => {
                Prepared::command(Task::threaded(number, tokens, sequence, cancel))
            }
            Ok(CommandOutput::Sequence(sequence)) => {
                Prepared::command(Task::sync(number, tokens, sequence, cancel))
            }
            Err(err) => Prepared::command(Task::failed(number, tokens, err)),
        }
    }

    fn prepare_missing(&self, number: TaskNumber, tokens: Vec<String>) -> Prepared {
        match self.container.missing(&tokens[0], &tokens[1..]) {
            Some(Ok(CommandOutput::Atomic(value))) => {
                let sequence = CommandOutput::Atomic(value).into_sequence();
                Prepared::atomic(Task::sync(number, tokens, sequence, CancelToken::new()))
            }
            Some(Ok(CommandOutput::Sequence(sequence))) => {
                Prepared::command(Task::sync(number, tokens, sequence, CancelToken::new()))
            }
            Some(Err(err)) => Prepared::command(Task::failed(number, tokens, err)),
            None => {
                let usage = UsageError::new(format!("unknown command: {}", tokens[0]));
                Prepared::command(Task::failed(number, tokens, usage.into()))
            }
        }
    }

    /// Worker-backed task; the worker gets the resolved command name
    fn isolated(&self, number: TaskNumber, name: &str, tokens: Vec<String>) -> Task {
        let Some(worker) = &self.config.worker else {
            let err = CommandError::failed("WorkerError", "no worker command configured");
            return Task::failed(number, tokens, err);
        };
        let mut worker_args = vec![name.to_string()];
        worker_args.extend_from_slice(&tokens[1..]);
        let runner = IsolatedRunner::new(worker.clone(), worker_args).with_kill_grace(self.config.kill_grace);
        Task::new(number, tokens, Box::new(runner), CancelToken::new())
    }

    // ========== Scripted modes ==========

    /// Run `input` and compare its rendering with `expected`
    pub fn check(&self, input: &str, expected: &str) -> Result<()> {
        let output = self.send(input)?.render();
        if output != expected {
            return Err(Error::Mismatch {
                input: input.to_string(),
                output,
                expected: expected.to_string(),
            });
        }
        Ok(())
    }

    /// Run lines in order, writing each rendering to `out`. Stops at the
    /// first aborted task and returns its failure.
    pub fn execute<I, S, W>(&mut self, lines: I, out: &mut W) -> Result<()>
    where
        I: IntoIterator<Item = S>,
        S: AsRef<str>,
        W: Write,
    {
        self.with_session(|session| {
            for line in lines {
                let line = line.as_ref();
                if session.config.verbose {
                    writeln!(out, "{}{}", session.config.prompt, line)?;
                }
                let task = session.send(line)?;
                if let (TaskStatus::Aborted, Some(failure)) = (task.status(), task.failure()) {
                    return Err(Error::Aborted {
                        kind: failure.kind,
                        message: failure.message,
                        exit_code: failure.exit_code,
                    });
                }
                writeln!(out, "{}", task.render())?;
            }
            Ok(())
        })
    }

    /// Check every prompt line of `text` against the lines that follow it
    pub fn doctest(&mut self, text: &str) -> Result<()> {
        let cases = parse_doctest(text, &self.config.prompt);
        self.with_session(|session| {
            for case in cases {
                debug!("doctest line {}: {}", case.line_number, case.input);
                if let Err(err) = session.check(&case.input, &case.expected) {
                    warn!("doctest failed at line {}", case.line_number);
                    return Err(err);
                }
            }
            Ok(())
        })
    }

    /// Interactive loop: prompt, read, submit, echo. Sync tasks echo their
    /// rendering, background tasks their summary.
    pub fn interact<R, W>(&mut self, input: R, mut out: W) -> Result<()>
    where
        R: BufRead,
        W: Write,
    {
        self.with_session(|session| {
            if let Some(intro) = session.container.intro() {
                writeln!(out, "{}", intro)?;
            }
            let mut lines = input.lines();
            loop {
                write!(out, "{}", session.config.prompt)?;
                out.flush()?;
                let Some(line) = lines.next() else {
                    writeln!(out)?;
                    break;
                };
                let line = line?;
                let line = line.trim();
                if line.is_empty() {
                    continue;
                }

                let task = session.submit(line)?;
                task.start();
                if task.mode().is_background() {
                    writeln!(out, "{}", task.summary())?;
                } else {
                    writeln!(out, "{}", task.render())?;
                }
                session.echo_trace(&task, &mut out)?;
            }
            info!("Input closed, leaving session");
            Ok(())
        })
    }

    /// Join physical lines until one ends with `terminator`, then run the
    /// joined line
    pub fn multiline<R, W>(&mut self, input: R, mut out: W, terminator: char) -> Result<()>
    where
        R: BufRead,
        W: Write,
    {
        self.with_session(|session| {
            let mut pending: Vec<String> = Vec::new();
            for line in input.lines() {
                let line = line?;
                let line = line.trim();
                if line.is_empty() {
                    continue;
                }
                match line.strip_suffix(terminator) {
                    Some(last) => {
                        pending.push(last.to_string());
                        let joined = std::mem::take(&mut pending).join(" ");
                        let task = session.send(&joined)?;
                        writeln!(out, "{}", task.render())?;
                        session.echo_trace(&task, &mut out)?;
                    }
                    None => pending.push(line.to_string()),
                }
            }
            Ok(())
        })
    }

    fn echo_trace<W: Write>(&self, task: &Task, out: &mut W) -> Result<()> {
        if self.config.verbose && task.status() == TaskStatus::Aborted {
            writeln!(out, "{}", task.traceback())?;
        }
        Ok(())
    }
}

impl<C: CommandContainer> Drop for Interpreter<C> {
    fn drop(&mut self) {
        if let Err(e) = self.exit() {
            warn!("Session teardown failed: {}", e);
        }
    }
}

fn atomic(number: TaskNumber, tokens: Vec<String>, value: String) -> Task {
    Task::sync(number, tokens, CommandOutput::value(value).into_sequence(), CancelToken::new())
}

/// One `prompt input` line with the output expected after it
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DoctestCase {
    pub input: String,
    pub expected: String,
    /// 1-based line of the input in the source text
    pub line_number: usize,
}

/// Split doctest text into cases. Trailing blank lines of an expected output
/// are ignored.
pub fn parse_doctest(text: &str, prompt: &str) -> Vec<DoctestCase> {
    let lines: Vec<&str> = text.lines().map(str::trim).collect();
    let starts: Vec<usize> = lines
        .iter()
        .enumerate()
        .filter(|(_, line)| line.starts_with(prompt))
        .map(|(i, _)| i)
        .collect();

    starts
        .iter()
        .enumerate()
        .map(|(n, &start)| {
            let end = starts.get(n + 1).copied().unwrap_or(lines.len());
            let mut expected: Vec<&str> = lines[start + 1..end].to_vec();
            while expected.last().is_some_and(|l| l.is_empty()) {
                expected.pop();
            }
            DoctestCase {
                input: lines[start][prompt.len()..].to_string(),
                expected: expected.join("\n"),
                line_number: start + 1,
            }
        })
        .collect()
}
