//! taskline CLI - Main entry point

mod cli;
mod containers;

use clap::{Parser, Subcommand};
use containers::with_container;
use std::path::{Path, PathBuf};
use std::process::ExitCode;
use taskline_foundation::{ConfigLoader, TasklineConfig};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

/// taskline - run commands as observable, killable tasks
#[derive(Parser, Debug)]
#[command(name = "taskline")]
#[command(author, version, about, long_about = None)]
struct Args {
    #[command(subcommand)]
    command: Command,

    /// Enable debug logging
    #[arg(short, long, global = true)]
    debug: bool,

    /// Read this configuration file instead of the layered lookup
    #[arg(long, global = true)]
    config: Option<PathBuf>,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Start an interactive session
    Shell {
        /// Command container (shelve, importer, pi)
        container: String,

        /// Prompt shown before each line
        #[arg(long)]
        prompt: Option<String>,

        /// Show failure traces
        #[arg(short, long)]
        verbose: bool,

        /// Join lines until one ends with ';'
        #[arg(short, long)]
        multiline: bool,
    },
    /// Run one command and exit with its status
    Run {
        /// Command container (shelve, importer, pi)
        container: String,

        /// Command name and arguments
        #[arg(trailing_var_arg = true, allow_hyphen_values = true)]
        tokens: Vec<String>,
    },
    /// Run every line of a script
    Exec {
        /// Command container (shelve, importer, pi)
        container: String,

        /// Script to run
        file: PathBuf,

        /// Check `i> ` lines against the output that follows them
        #[arg(long)]
        doctest: bool,

        /// Echo each line before its output
        #[arg(short, long)]
        verbose: bool,
    },
    /// Serve sessions over TCP, one per connection
    Serve {
        /// Command container (shelve, importer, pi)
        container: String,

        /// Address to bind
        #[arg(long)]
        host: Option<String>,

        /// Port to bind
        #[arg(short, long)]
        port: Option<u16>,
    },
    /// Worker process of an isolated command
    #[command(hide = true)]
    Worker {
        container: String,

        #[arg(last = true)]
        tokens: Vec<String>,
    },
}

fn main() -> ExitCode {
    let args = Args::parse();
    init_logging(args.debug);

    match run(args) {
        Ok(code) => code,
        Err(e) => {
            eprintln!("Error: {:#}", e);
            ExitCode::FAILURE
        }
    }
}

/// Logs go to stderr; stdout carries command output and the worker protocol
fn init_logging(debug: bool) {
    let log_level = if debug { "debug" } else { "info" };
    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new(log_level)),
        )
        .with(
            tracing_subscriber::fmt::layer()
                .with_target(false)
                .with_writer(std::io::stderr),
        )
        .init();
}

fn load_config(path: Option<&Path>) -> anyhow::Result<TasklineConfig> {
    if let Some(path) = path {
        return Ok(ConfigLoader::with_paths(Vec::new()).load_from(path)?);
    }
    let cwd = std::env::current_dir()?;
    Ok(ConfigLoader::new(&cwd).load_all()?)
}

fn run(args: Args) -> anyhow::Result<ExitCode> {
    let debug = args.debug;
    let config_path = args.config.as_deref();

    match args.command {
        Command::Shell {
            container,
            prompt,
            verbose,
            multiline,
        } => {
            let mut config = load_config(config_path)?;
            if let Some(prompt) = prompt {
                config.interpreter.prompt = prompt;
            }
            let session = cli::interpreter_config(&config, &container, debug)?.verbose(verbose);
            with_container!(container.as_str(), C => cli::shell::<C>(session, multiline))
        }
        Command::Run { container, tokens } => {
            let config = load_config(config_path)?;
            let session = cli::interpreter_config(&config, &container, debug)?;
            with_container!(container.as_str(), C => cli::run_once::<C>(session, tokens))
        }
        Command::Exec {
            container,
            file,
            doctest,
            verbose,
        } => {
            let config = load_config(config_path)?;
            let session = cli::interpreter_config(&config, &container, debug)?.verbose(verbose);
            with_container!(container.as_str(), C => cli::exec::<C>(session, &file, doctest))
        }
        Command::Serve {
            container,
            host,
            port,
        } => {
            let mut config = load_config(config_path)?;
            if let Some(host) = host {
                config.server.host = host;
            }
            if let Some(port) = port {
                config.server.port = port;
            }
            let session = cli::interpreter_config(&config, &container, debug)?;
            with_container!(container.as_str(), C => cli::serve::<C>(session, &config.server))
        }
        Command::Worker { container, tokens } => {
            with_container!(container.as_str(), C => cli::worker::<C>(tokens))
        }
    }
}
