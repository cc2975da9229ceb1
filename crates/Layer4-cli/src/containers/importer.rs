//! Fake importer with long-running commands

use std::time::Duration;
use taskline_foundation::CommandError;
use taskline_shell::{BoundArgs, CommandContainer, CommandDef, CommandOutput, CommandSpec, Param};
use taskline_task::{CancelToken, OutputSequence};
use tracing::info;

const DEFAULT_LINES: i64 = 10_000;
const DEFAULT_DELAY_MS: i64 = 20;

/// Report progress every this many lines
const REPORT_EVERY: i64 = 100;

#[derive(Debug, Default)]
pub struct Importer;

fn import_spec(name: &str) -> CommandSpec {
    CommandSpec::new(name)
        .param(Param::positional("fname").help("file to import"))
        .param(
            Param::option("lines")
                .short('n')
                .int()
                .default(DEFAULT_LINES)
                .help("number of lines to import"),
        )
        .param(
            Param::option("delay")
                .short('d')
                .int()
                .default(DEFAULT_DELAY_MS)
                .metavar("MS")
                .help("time spent on each line"),
        )
}

/// Import `fname` line by line, checking `cancel` between lines
fn import_file(args: BoundArgs, cancel: &CancelToken) -> Result<CommandOutput, CommandError> {
    let fname = args.str("fname")?.to_string();
    let lines = args.int("lines")?;
    let delay = Duration::from_millis(u64::try_from(args.int("delay")?).unwrap_or_default());
    let cancel = cancel.clone();

    let mut n = 0;
    let sequence = OutputSequence::from_fn(move || {
        if n >= lines {
            return None;
        }
        if let Err(e) = cancel.sleep(delay) {
            return Some(Err(e));
        }
        n += 1;
        if n % REPORT_EVERY == 0 {
            Some(Ok(Some(format!("Imported {} lines", n))))
        } else {
            Some(Ok(None))
        }
    });

    let closing = fname.clone();
    Ok(sequence
        .with_cleanup(move || info!("closing the file {}", closing))
        .into())
}

impl CommandContainer for Importer {
    fn commands() -> Vec<CommandDef<Self>> {
        vec![
            CommandDef::new(
                import_spec("import_file")
                    .about("Import a file into the database, in a worker process")
                    .isolated(),
                |_: &Importer, args, cancel| import_file(args, cancel),
            ),
            CommandDef::new(
                import_spec("import_lines")
                    .about("Import a file into the database, in a background thread")
                    .threaded(),
                |_: &Importer, args, cancel| import_file(args, cancel),
            ),
        ]
    }

    fn intro(&self) -> Option<String> {
        Some("A fake importer. Use .help to see the available commands.".to_string())
    }
}
