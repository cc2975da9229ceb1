//! Worker-process runner
//!
//! Features:
//! - Spawns a worker process per task, arguments after `--`
//! - Replays the worker's JSON-line events onto the task record
//! - Graceful kill with SIGTERM -> SIGKILL escalation

use super::worker::WorkerEvent;
use super::Runner;
use crate::failure::Failure;
use crate::sequence::{CancelToken, TaskSink};
use crate::task::{ExecutionMode, TaskRecord};
use parking_lot::Mutex;
use std::io::{BufRead, BufReader};
use std::path::PathBuf;
use std::process::{Child, ChildStdout, Command, ExitStatus, Stdio};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::thread::{self, JoinHandle};
use std::time::Duration;
use taskline_foundation::{Error, Result};
use tracing::{debug, error, info, warn};

/// Default time a worker gets between SIGTERM and SIGKILL
pub const DEFAULT_KILL_GRACE: Duration = Duration::from_secs(2);

/// Poll interval while waiting for a worker to exit
const EXIT_POLL: Duration = Duration::from_millis(10);

/// How to launch a worker process
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct WorkerCommand {
    program: PathBuf,
    args: Vec<String>,
    envs: Vec<(String, String)>,
}

impl WorkerCommand {
    pub fn new(program: impl Into<PathBuf>) -> Self {
        Self {
            program: program.into(),
            args: Vec::new(),
            envs: Vec::new(),
        }
    }

    /// The running executable, for re-exec style workers
    pub fn current_exe() -> std::io::Result<Self> {
        Ok(Self::new(std::env::current_exe()?))
    }

    pub fn arg(mut self, arg: impl Into<String>) -> Self {
        self.args.push(arg.into());
        self
    }

    pub fn args<I, S>(mut self, args: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.args.extend(args.into_iter().map(Into::into));
        self
    }

    pub fn env(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.envs.push((key.into(), value.into()));
        self
    }

    pub fn program(&self) -> &PathBuf {
        &self.program
    }

    /// Process invocation for one command line
    pub fn build(&self, arglist: &[String]) -> Command {
        let mut cmd = Command::new(&self.program);
        cmd.args(&self.args)
            .arg("--")
            .args(arglist)
            .envs(self.envs.iter().map(|(k, v)| (k, v)))
            .stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::inherit());
        cmd
    }
}

/// Drains the command in a separate worker process
pub struct IsolatedRunner {
    worker: WorkerCommand,
    arglist: Vec<String>,
    kill_grace: Duration,
    child: Arc<Mutex<Option<Child>>>,
    reader: Mutex<Option<JoinHandle<()>>>,
    kill_requested: Arc<AtomicBool>,
    started: AtomicBool,
}

impl IsolatedRunner {
    pub fn new(worker: WorkerCommand, arglist: Vec<String>) -> Self {
        Self {
            worker,
            arglist,
            kill_grace: DEFAULT_KILL_GRACE,
            child: Arc::new(Mutex::new(None)),
            reader: Mutex::new(None),
            kill_requested: Arc::new(AtomicBool::new(false)),
            started: AtomicBool::new(false),
        }
    }

    pub fn with_kill_grace(mut self, grace: Duration) -> Self {
        self.kill_grace = grace;
        self
    }

    /// Send SIGTERM if the worker has not exited yet
    #[cfg(unix)]
    fn send_sigterm(child: &mut Child) {
        use nix::sys::signal::{kill, Signal};
        use nix::unistd::Pid;

        if matches!(child.try_wait(), Ok(None)) {
            if let Err(e) = kill(Pid::from_raw(child.id() as i32), Signal::SIGTERM) {
                warn!("Failed to send SIGTERM to worker {}: {}", child.id(), e);
            }
        }
    }

    #[cfg(not(unix))]
    fn send_sigterm(child: &mut Child) {
        // no graceful signal available, go straight to kill
        if let Err(e) = child.kill() {
            warn!("Failed to kill worker {}: {}", child.id(), e);
        }
    }

    fn spawn(&self) -> Result<(Child, ChildStdout)> {
        let program = self.worker.program.display();
        let mut child = self
            .worker
            .build(&self.arglist)
            .spawn()
            .map_err(|e| Error::Worker(format!("cannot spawn {}: {}", program, e)))?;
        match child.stdout.take() {
            Some(stdout) => Ok((child, stdout)),
            None => {
                let _ = child.kill();
                let _ = child.wait();
                Err(Error::Worker("worker stdout not captured".to_string()))
            }
        }
    }

    /// SIGTERM the worker if one is running. Returns whether one was.
    fn signal_child(&self) -> bool {
        let mut guard = self.child.lock();
        match guard.as_mut() {
            Some(child) => {
                debug!("Sending SIGTERM to worker {}", child.id());
                Self::send_sigterm(child);
                true
            }
            None => false,
        }
    }

    /// SIGKILL the worker if it has not reached a terminal state in time
    fn schedule_force_kill(&self, record: &Arc<TaskRecord>) {
        let number = record.number();
        let record = Arc::clone(record);
        let child = Arc::clone(&self.child);
        let grace = self.kill_grace;
        let spawned = thread::Builder::new()
            .name(format!("task-{}-reaper", number))
            .spawn(move || {
                if record.wait_terminal_timeout(grace) {
                    return;
                }
                if let Some(child) = child.lock().as_mut() {
                    warn!(
                        "Worker {} ignored SIGTERM for {:?}, sending SIGKILL",
                        child.id(),
                        grace
                    );
                    if let Err(e) = child.kill() {
                        error!("Failed to force kill worker {}: {}", child.id(), e);
                    }
                }
            });
        if let Err(e) = spawned {
            error!("Failed to spawn reaper for task {}: {}", number, e);
        }
    }
}

impl Runner for IsolatedRunner {
    fn mode(&self) -> ExecutionMode {
        ExecutionMode::Isolated
    }

    fn start(&self, record: &Arc<TaskRecord>, cancel: &CancelToken) {
        if self.started.swap(true, Ordering::SeqCst) {
            return;
        }
        if cancel.is_cancelled() {
            record.killed();
            return;
        }

        let (child, stdout) = match self.spawn() {
            Ok(spawned) => spawned,
            Err(e) => {
                error!("Task {}: {}", record.number(), e);
                record.abort(worker_failure(e));
                return;
            }
        };
        info!("Task {} running in worker {}", record.number(), child.id());
        *self.child.lock() = Some(child);
        if self.kill_requested.load(Ordering::SeqCst) && self.signal_child() {
            self.schedule_force_kill(record);
        }

        let reader = WorkerReader {
            record: Arc::clone(record),
            child: Arc::clone(&self.child),
            kill_requested: Arc::clone(&self.kill_requested),
        };
        let spawned = thread::Builder::new()
            .name(format!("task-{}-worker", record.number()))
            .spawn(move || reader.run(stdout));
        match spawned {
            Ok(handle) => *self.reader.lock() = Some(handle),
            Err(e) => {
                error!("Failed to spawn worker reader: {}", e);
                if let Some(child) = self.child.lock().as_mut() {
                    let _ = child.kill();
                    let _ = child.wait();
                }
                record.abort(worker_failure(Error::Worker(format!(
                    "cannot start reader thread: {}",
                    e
                ))));
            }
        }
    }

    fn wait(&self, record: &Arc<TaskRecord>) {
        if !self.started.load(Ordering::SeqCst) {
            return;
        }
        let handle = self.reader.lock().take();
        if let Some(handle) = handle {
            if handle.join().is_err() {
                error!("Worker reader for task {} panicked", record.number());
            }
        }
        record.wait_terminal();
    }

    fn kill(&self, record: &Arc<TaskRecord>, cancel: &CancelToken) {
        cancel.cancel();
        self.kill_requested.store(true, Ordering::SeqCst);
        record.request_kill();

        if self.signal_child() {
            self.schedule_force_kill(record);
        }
    }
}

impl std::fmt::Debug for IsolatedRunner {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("IsolatedRunner")
            .field("worker", &self.worker)
            .field("arglist", &self.arglist)
            .field("kill_grace", &self.kill_grace)
            .finish_non_exhaustive()
    }
}

fn worker_failure(err: Error) -> Failure {
    match err {
        Error::Worker(message) => Failure::new("WorkerError", message),
        other => Failure::new("WorkerError", other.to_string()),
    }
}

/// Background half of an isolated task: reads events, then reaps the child
struct WorkerReader {
    record: Arc<TaskRecord>,
    child: Arc<Mutex<Option<Child>>>,
    kill_requested: Arc<AtomicBool>,
}

impl WorkerReader {
    fn run(self, stdout: ChildStdout) {
        let number = self.record.number();
        let mut terminal = false;

        for line in BufReader::new(stdout).lines() {
            let line = match line {
                Ok(line) => line,
                Err(e) => {
                    warn!("Task {}: worker stream error: {}", number, e);
                    break;
                }
            };
            if line.trim().is_empty() {
                continue;
            }
            match WorkerEvent::parse(&line) {
                Ok(event) => {
                    terminal |= event.is_terminal();
                    event.apply(self.record.as_ref());
                }
                Err(_) => debug!("Task {}: ignoring worker output {:?}", number, line),
            }
        }

        let status = self.reap();
        debug!("Task {}: worker exited with {:?}", number, status);
        if terminal {
            return;
        }

        if self.kill_requested.load(Ordering::SeqCst) {
            self.record.killed();
        } else {
            let detail = status
                .map(|s| s.to_string())
                .unwrap_or_else(|| "unknown status".to_string());
            self.record.abort(Failure::new(
                "WorkerExited",
                format!("worker exited ({}) before reporting a result", detail),
            ));
        }
    }

    /// Wait for the child without holding the lock, so kills stay possible
    fn reap(&self) -> Option<ExitStatus> {
        loop {
            {
                let mut guard = self.child.lock();
                let child = guard.as_mut()?;
                match child.try_wait() {
                    Ok(Some(status)) => return Some(status),
                    Ok(None) => {}
                    Err(e) => {
                        warn!("Failed to wait for worker {}: {}", child.id(), e);
                        return None;
                    }
                }
            }
            thread::sleep(EXIT_POLL);
        }
    }
}
