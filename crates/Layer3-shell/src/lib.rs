//! # taskline-shell
//!
//! Command shell for taskline.
//! Turns lines of text into tasks over a command container.
//!
//! ## Features
//!
//! - Declarative command descriptors parsed with clap
//! - Command containers with setup/teardown hooks
//! - Interpreter with pseudo-commands (`.kill`, `.list`, `.output`, ...)
//! - Interactive, scripted and doctest modes
//! - Line-oriented TCP server, one session per connection
//! - Worker entry point for isolated commands

pub mod command;
pub mod container;
pub mod interpreter;
pub mod pager;
pub mod parallel;
pub mod server;
pub mod special;
pub mod tokenizer;
pub mod worker;

// Commands
pub use command::{BoundArgs, CommandSpec, Param, ParamKind, Parsed, Value, ValueType};
pub use container::{CommandContainer, CommandDef, CommandOutput, CommandTable, Handler};

// Sessions
pub use interpreter::{parse_doctest, DoctestCase, Interpreter, InterpreterConfig};
pub use pager::{CommandPager, Pager};
pub use special::SpecialCommands;

// Entry points
pub use parallel::{runp, wait_all};
pub use server::{ContainerFactory, LineServer, DEFAULT_MAX_LINE_LENGTH, EOF_LINE};
pub use worker::run_worker;
