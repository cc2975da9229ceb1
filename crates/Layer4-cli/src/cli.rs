//! Subcommand bodies, generic over the container type

use anyhow::Context;
use std::io;
use std::path::Path;
use std::process::ExitCode;
use std::sync::Arc;
use taskline_foundation::{Error, ServerSettings, TasklineConfig};
use taskline_shell::{
    run_worker, CommandContainer, ContainerFactory, Interpreter, InterpreterConfig, LineServer,
};
use taskline_task::{Task, TaskStatus, WorkerCommand};
use tracing::warn;

/// Exit status of a killed one-shot command
const KILLED_EXIT_CODE: u8 = 130;

/// Session options for `container`, with workers re-executing this binary
pub fn interpreter_config(
    config: &TasklineConfig,
    container: &str,
    debug: bool,
) -> anyhow::Result<InterpreterConfig> {
    let mut worker = WorkerCommand::current_exe().context("Failed to locate the taskline binary")?;
    if debug {
        worker = worker.arg("--debug");
    }
    let worker = worker.args(["worker", container]);
    Ok(InterpreterConfig::from_config(config).with_worker(worker))
}

/// Failure status as a process exit byte, never 0
fn failure_status(code: Option<i32>) -> u8 {
    code.and_then(|c| u8::try_from(c).ok())
        .filter(|c| *c != 0)
        .unwrap_or(1)
}

fn exit_code(code: Option<i32>) -> ExitCode {
    ExitCode::from(failure_status(code))
}

/// Print a finished one-shot task the way a shell command would
fn report(task: &Task) -> ExitCode {
    match (task.status(), task.failure()) {
        (TaskStatus::Aborted, Some(failure)) if failure.kind == "UsageError" => {
            eprintln!("{}", failure.message);
            exit_code(failure.exit_code)
        }
        (TaskStatus::Aborted, Some(failure)) => {
            println!("{}", failure.render());
            exit_code(failure.exit_code)
        }
        (TaskStatus::Killed, _) => {
            eprintln!("{}", task.summary());
            ExitCode::from(KILLED_EXIT_CODE)
        }
        (TaskStatus::Finished, _) => {
            let output = task.render();
            if !output.is_empty() {
                println!("{}", output);
            }
            ExitCode::SUCCESS
        }
        (status, _) => {
            warn!("Task {} ended in state {}", task.number(), status);
            ExitCode::FAILURE
        }
    }
}

/// `taskline run`: one command, its rendering and its exit status
pub fn run_once<C>(config: InterpreterConfig, tokens: Vec<String>) -> anyhow::Result<ExitCode>
where
    C: CommandContainer + Default,
{
    let help = format!("{}help", config.command_prefix);
    let mut interpreter = Interpreter::new(C::default(), config)?;
    interpreter.enter()?;

    let task = if tokens.is_empty() {
        interpreter.submit(&help)?
    } else {
        interpreter.submit_tokens(tokens)?
    };
    task.run();
    let code = report(&task);

    interpreter.exit()?;
    Ok(code)
}

/// `taskline shell`: interactive session on stdin/stdout
pub fn shell<C>(config: InterpreterConfig, multiline: bool) -> anyhow::Result<ExitCode>
where
    C: CommandContainer + Default,
{
    let mut interpreter = Interpreter::new(C::default(), config)?;
    let stdin = io::stdin().lock();
    let stdout = io::stdout().lock();
    if multiline {
        interpreter.multiline(stdin, stdout, ';')?;
    } else {
        interpreter.interact(stdin, stdout)?;
    }
    Ok(ExitCode::SUCCESS)
}

/// `taskline exec`: run a script, or check it as a doctest
pub fn exec<C>(config: InterpreterConfig, file: &Path, doctest: bool) -> anyhow::Result<ExitCode>
where
    C: CommandContainer + Default,
{
    let text = std::fs::read_to_string(file)
        .with_context(|| format!("Failed to read {}", file.display()))?;
    let comment_char = config.comment_char;
    let mut interpreter = Interpreter::new(C::default(), config)?;

    let result = if doctest {
        interpreter.doctest(&text)
    } else {
        let lines = text
            .lines()
            .map(str::trim)
            .filter(|line| !line.is_empty() && !line.starts_with(comment_char));
        interpreter.execute(lines, &mut io::stdout().lock())
    };

    match result {
        Ok(()) => Ok(ExitCode::SUCCESS),
        Err(Error::Aborted {
            kind,
            message,
            exit_code: code,
        }) => {
            println!("{}: {}", kind, message);
            Ok(exit_code(code))
        }
        Err(err @ Error::Mismatch { .. }) => {
            eprintln!("{}", err);
            Ok(ExitCode::FAILURE)
        }
        Err(err) => Err(err.into()),
    }
}

/// `taskline serve`: line server until Ctrl-C
pub fn serve<C>(config: InterpreterConfig, settings: &ServerSettings) -> anyhow::Result<ExitCode>
where
    C: CommandContainer + Default,
{
    let runtime = tokio::runtime::Builder::new_multi_thread()
        .enable_all()
        .build()
        .context("Failed to start the async runtime")?;

    runtime.block_on(async {
        let factory: ContainerFactory<C> = Arc::new(C::default);
        let server = LineServer::bind(&settings.address(), factory, config, settings.terminator.clone())
            .await?
            .with_max_line_length(settings.max_line_length);
        println!("taskline serving on {}", server.local_addr()?);

        server
            .serve(async {
                if let Err(e) = tokio::signal::ctrl_c().await {
                    warn!("Failed to listen for Ctrl-C: {}", e);
                    std::future::pending::<()>().await;
                }
            })
            .await?;
        Ok::<_, anyhow::Error>(ExitCode::SUCCESS)
    })
}

/// `taskline worker`: the child side of an isolated command
pub fn worker<C>(tokens: Vec<String>) -> anyhow::Result<ExitCode>
where
    C: CommandContainer + Default,
{
    run_worker(C::default(), &tokens, io::stdout())?;
    Ok(ExitCode::SUCCESS)
}
