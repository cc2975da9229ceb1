//! Worker side of isolated commands
//!
//! The parent re-executes its own binary with the resolved command line.
//! The worker builds a fresh container, runs the command and reports each
//! lifecycle event as a JSON line on stdout.

use crate::command::Parsed;
use crate::container::{CommandContainer, CommandTable};
use std::io::Write;
use taskline_foundation::{CommandError, Result, UsageError};
use taskline_task::{
    drain, install_termination_handler, CancelToken, Failure, OutputSequence, TaskSink,
    WorkerEmitter,
};
use tracing::{debug, warn};

/// Run `tokens` (command name first) against `container`, reporting on `out`
///
/// Command failures travel through the protocol; only setup of the
/// termination handler and teardown errors are returned.
pub fn run_worker<C, W>(mut container: C, tokens: &[String], out: W) -> Result<()>
where
    C: CommandContainer,
    W: Write + Send,
{
    let cancel = CancelToken::new();
    install_termination_handler(&cancel)?;
    let emitter = WorkerEmitter::new(out);

    if let Err(e) = container.setup() {
        emitter.begin();
        emitter.abort(Failure::new("SetupError", e.to_string()));
        return Ok(());
    }

    let sequence = match resolve(&container, tokens, &cancel) {
        Ok(sequence) => sequence,
        Err(err) => OutputSequence::failing(err),
    };
    debug!("Worker draining {:?}", tokens);
    drain(sequence, &cancel, &emitter);

    if let Err(e) = container.teardown() {
        warn!("Worker teardown failed: {}", e);
        return Err(e);
    }
    Ok(())
}

fn resolve<C: CommandContainer>(
    container: &C,
    tokens: &[String],
    cancel: &CancelToken,
) -> std::result::Result<OutputSequence, CommandError> {
    let table = CommandTable::<C>::of(&[]).map_err(|e| CommandError::failed("ConfigurationError", e.to_string()))?;
    let Some((name, rest)) = tokens.split_first() else {
        return Err(UsageError::new("worker started without a command").into());
    };
    let Some(def) = table.get(name) else {
        return Err(UsageError::new(format!("unknown command: {}", name)).into());
    };
    match def.spec().parse(rest)? {
        Parsed::Args(args) => Ok(def.call(container, args, cancel)?.into_sequence()),
        Parsed::Help(help) => Ok(OutputSequence::single(help)),
    }
}
