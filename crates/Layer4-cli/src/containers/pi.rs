//! Pi by numeric integration, in every execution class

use std::ops::Range;
use taskline_foundation::CommandError;
use taskline_shell::{runp, wait_all, BoundArgs, CommandContainer, CommandDef, CommandOutput, CommandSpec, Param};
use taskline_task::{ExecutionMode, OutputSequence};

const MILLION: u64 = 1_000_000;

/// Iterations done per advancement, so kills are noticed quickly
const CHUNK: u64 = 100_000;

#[derive(Debug, Default)]
pub struct PiCalculator;

/// Midpoint rule over `4 / (1 + x^2)` on `[0, 1]`, restricted to the
/// subintervals in `range`. Emits progress every million iterations and the
/// partial integral last.
struct Integration {
    npoints: u64,
    next: u64,
    end: u64,
    sum: f64,
    done: bool,
}

impl Integration {
    fn new(npoints: u64, range: Range<u64>) -> Self {
        Self {
            npoints,
            next: range.start,
            end: range.end,
            sum: 0.0,
            done: false,
        }
    }
}

impl Iterator for Integration {
    type Item = Result<Option<String>, CommandError>;

    fn next(&mut self) -> Option<Self::Item> {
        if self.done {
            return None;
        }
        if self.next >= self.end {
            self.done = true;
            return Some(Ok(Some(self.sum.to_string())));
        }

        let start = self.next;
        let stop = (start + CHUNK).min(self.end);
        let width = 1.0 / self.npoints as f64;
        for j in start..stop {
            let x = (j as f64 + 0.5) * width;
            self.sum += 4.0 / (1.0 + x * x) * width;
        }
        self.next = stop;

        if start % MILLION == 0 {
            Some(Ok(Some(format!("{}M iterations", start / MILLION))))
        } else {
            Some(Ok(None))
        }
    }
}

fn npoints(args: &BoundArgs) -> Result<u64, CommandError> {
    let n = args.int("npoints")?;
    match u64::try_from(n) {
        Ok(n) if n > 0 => Ok(n),
        _ => Err(CommandError::failed("ValueError", "npoints must be positive")),
    }
}

fn calc_pi(args: BoundArgs) -> Result<CommandOutput, CommandError> {
    let n = npoints(&args)?;
    Ok(OutputSequence::new(Integration::new(n, 0..n)).into())
}

/// Split the integration over `jobs` threaded tasks and add up the parts
fn calc_pi_parallel(args: BoundArgs) -> Result<CommandOutput, CommandError> {
    let n = npoints(&args)?;
    let jobs = u64::try_from(args.int("jobs")?)
        .ok()
        .filter(|j| *j > 0)
        .ok_or_else(|| CommandError::failed("ValueError", "jobs must be positive"))?;

    let bounds: Vec<u64> = (0..=jobs).map(|k| n * k / jobs).collect();
    let parts = bounds
        .windows(2)
        .map(|w| OutputSequence::new(Integration::new(n, w[0]..w[1])));
    let tasks = runp(parts, true);
    wait_all(&tasks);

    let mut total = 0.0;
    for task in &tasks {
        let part = task
            .result()
            .map_err(|failure| CommandError::failed(failure.kind, failure.message))?
            .unwrap_or_default();
        total += part
            .parse::<f64>()
            .map_err(|e| CommandError::failed("ValueError", format!("bad partial result {:?}: {}", part, e)))?;
    }
    Ok(CommandOutput::value(total))
}

fn calc_spec(name: &str, mode: ExecutionMode) -> CommandSpec {
    CommandSpec::new(name)
        .about(format!("compute pi with the midpoint rule ({})", mode))
        .mode(mode)
        .param(Param::positional("npoints").int().help("number of integration points"))
}

impl CommandContainer for PiCalculator {
    fn commands() -> Vec<CommandDef<Self>> {
        vec![
            CommandDef::new(calc_spec("calc_pi", ExecutionMode::Sync), |_: &PiCalculator, args, _| calc_pi(args)),
            CommandDef::new(calc_spec("calc_pi_threaded", ExecutionMode::Threaded), |_: &PiCalculator, args, _| {
                calc_pi(args)
            }),
            CommandDef::new(calc_spec("calc_pi_isolated", ExecutionMode::Isolated), |_: &PiCalculator, args, _| {
                calc_pi(args)
            }),
            CommandDef::new(
                CommandSpec::new("calc_pi_parallel")
                    .about("compute pi splitting the work over threads")
                    .param(Param::positional("npoints").int().help("number of integration points"))
                    .param(Param::option("jobs").short('j').int().default(4).help("number of threads")),
                |_: &PiCalculator, args, _| calc_pi_parallel(args),
            ),
        ]
    }

    fn intro(&self) -> Option<String> {
        Some("Compute pi in parallel with threads or processes".to_string())
    }
}
