//! Command containers and their command table

use crate::command::{BoundArgs, CommandSpec};
use std::collections::BTreeMap;
use std::panic::{self, AssertUnwindSafe};
use std::sync::Arc;
use taskline_foundation::{CommandError, Error, Result};
use taskline_task::{CancelToken, ExecutionMode, Failure, OutputSequence};
use tracing::debug;

/// What a command handler hands back
pub enum CommandOutput {
    /// Already computed value; `None` renders as an empty string
    Atomic(Option<String>),

    /// Lazy output, drained by the task runner
    Sequence(OutputSequence),
}

impl CommandOutput {
    pub fn value(value: impl ToString) -> Self {
        CommandOutput::Atomic(Some(value.to_string()))
    }

    pub fn nothing() -> Self {
        CommandOutput::Atomic(None)
    }

    pub fn is_atomic(&self) -> bool {
        matches!(self, CommandOutput::Atomic(_))
    }

    pub fn into_sequence(self) -> OutputSequence {
        match self {
            CommandOutput::Atomic(Some(value)) => OutputSequence::single(value),
            CommandOutput::Atomic(None) => OutputSequence::empty(),
            CommandOutput::Sequence(sequence) => sequence,
        }
    }
}

impl From<OutputSequence> for CommandOutput {
    fn from(sequence: OutputSequence) -> Self {
        CommandOutput::Sequence(sequence)
    }
}

impl std::fmt::Debug for CommandOutput {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            CommandOutput::Atomic(value) => f.debug_tuple("Atomic").field(value).finish(),
            CommandOutput::Sequence(_) => f.write_str("Sequence(..)"),
        }
    }
}

/// Handler bound to a command name
pub type Handler<C> =
    Arc<dyn Fn(&C, BoundArgs, &CancelToken) -> std::result::Result<CommandOutput, CommandError> + Send + Sync>;

/// Command declaration plus its handler
pub struct CommandDef<C> {
    spec: CommandSpec,
    handler: Handler<C>,
}

impl<C> CommandDef<C> {
    pub fn new<F>(spec: CommandSpec, handler: F) -> Self
    where
        F: Fn(&C, BoundArgs, &CancelToken) -> std::result::Result<CommandOutput, CommandError>
            + Send
            + Sync
            + 'static,
    {
        Self {
            spec,
            handler: Arc::new(handler),
        }
    }

    pub fn spec(&self) -> &CommandSpec {
        &self.spec
    }

    pub fn name(&self) -> &str {
        self.spec.name()
    }

    /// Invoke the handler; a panic becomes a `Panic` failure
    pub fn call(
        &self,
        container: &C,
        args: BoundArgs,
        cancel: &CancelToken,
    ) -> std::result::Result<CommandOutput, CommandError> {
        match panic::catch_unwind(AssertUnwindSafe(|| (self.handler)(container, args, cancel))) {
            Ok(result) => result,
            Err(payload) => {
                let failure = Failure::from_panic(payload);
                Err(CommandError::failed(failure.kind, failure.message))
            }
        }
    }
}

impl<C> Clone for CommandDef<C> {
    fn clone(&self) -> Self {
        Self {
            spec: self.spec.clone(),
            handler: Arc::clone(&self.handler),
        }
    }
}

impl<C> std::fmt::Debug for CommandDef<C> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("CommandDef").field("spec", &self.spec).finish_non_exhaustive()
    }
}

/// An object grouping named commands
///
/// Every session gets its own instance. Isolated commands run against a
/// fresh instance built in the worker process.
pub trait CommandContainer: Send + 'static {
    /// Commands exposed by this container
    fn commands() -> Vec<CommandDef<Self>>
    where
        Self: Sized;

    /// Banner shown by interactive sessions
    fn intro(&self) -> Option<String> {
        None
    }

    /// Runs when a session is entered
    fn setup(&mut self) -> Result<()> {
        Ok(())
    }

    /// Runs when a session is exited, after running tasks were killed
    fn teardown(&mut self) -> Result<()> {
        Ok(())
    }

    /// Fallback for unknown command names
    fn missing(
        &self,
        _name: &str,
        _args: &[String],
    ) -> Option<std::result::Result<CommandOutput, CommandError>> {
        None
    }
}

/// Validated name -> command mapping of one container
pub struct CommandTable<C> {
    commands: BTreeMap<String, CommandDef<C>>,
}

impl<C> CommandTable<C> {
    /// Build the table, rejecting duplicate names, names colliding with
    /// `reserved` and malformed parameter declarations
    pub fn new(defs: Vec<CommandDef<C>>, reserved: &[String]) -> Result<Self> {
        let mut commands: BTreeMap<String, CommandDef<C>> = BTreeMap::new();

        for def in defs {
            def.spec().validate()?;
            let name = def.name().to_string();
            if reserved.contains(&name) {
                return Err(Error::configuration(format!(
                    "command {} collides with a special command",
                    name
                )));
            }
            if let Some(previous) = commands.get(&name) {
                return Err(Error::configuration(format!(
                    "command {} declared twice ({} and {})",
                    name,
                    previous.spec().execution_mode(),
                    def.spec().execution_mode()
                )));
            }
            debug!("Registered {} command {}", def.spec().execution_mode(), name);
            commands.insert(name, def);
        }

        Ok(Self { commands })
    }

    pub fn get(&self, name: &str) -> Option<&CommandDef<C>> {
        self.commands.get(name)
    }

    /// Execution class of a command
    pub fn classify(&self, name: &str) -> Option<ExecutionMode> {
        self.get(name).map(|def| def.spec().execution_mode())
    }

    /// Every command name, sorted
    pub fn names(&self) -> impl Iterator<Item = &str> {
        self.commands.keys().map(String::as_str)
    }

    /// Sorted names of the commands in one execution class
    pub fn names_in(&self, mode: ExecutionMode) -> Vec<&str> {
        self.commands
            .values()
            .filter(|def| def.spec().execution_mode() == mode)
            .map(|def| def.name())
            .collect()
    }

    pub fn has_isolated(&self) -> bool {
        !self.names_in(ExecutionMode::Isolated).is_empty()
    }

    pub fn len(&self) -> usize {
        self.commands.len()
    }

    pub fn is_empty(&self) -> bool {
        self.commands.is_empty()
    }
}

impl<C: CommandContainer> CommandTable<C> {
    /// Table of a container type's own commands
    pub fn of(reserved: &[String]) -> Result<Self> {
        Self::new(C::commands(), reserved)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::command::Param;

    struct Echo;

    impl CommandContainer for Echo {
        fn commands() -> Vec<CommandDef<Self>> {
            vec![
                CommandDef::new(
                    CommandSpec::new("say").param(Param::positional("word")),
                    |_: &Echo, args, _| Ok(CommandOutput::value(args.str("word")?)),
                ),
                CommandDef::new(CommandSpec::new("loop").threaded(), |_: &Echo, _, _| {
                    Ok(OutputSequence::values(1..=3).into())
                }),
                CommandDef::new(CommandSpec::new("boom"), |_: &Echo, _, _| panic!("kaboom")),
            ]
        }
    }

    #[test]
    fn test_classification() {
        let table = CommandTable::<Echo>::of(&[]).unwrap();
        assert_eq!(table.classify("say"), Some(ExecutionMode::Sync));
        assert_eq!(table.classify("loop"), Some(ExecutionMode::Threaded));
        assert_eq!(table.classify("nope"), None);
        assert_eq!(table.names_in(ExecutionMode::Sync), vec!["boom", "say"]);
        assert!(!table.has_isolated());
    }

    #[test]
    fn test_duplicate_across_classes_is_rejected() {
        let defs: Vec<CommandDef<Echo>> = vec![
            CommandDef::new(CommandSpec::new("run"), |_, _, _| Ok(CommandOutput::nothing())),
            CommandDef::new(CommandSpec::new("run").isolated(), |_, _, _| {
                Ok(CommandOutput::nothing())
            }),
        ];
        let err = CommandTable::new(defs, &[]).err().unwrap();
        assert_eq!(
            err.to_string(),
            "Configuration error: command run declared twice (sync and isolated)"
        );
    }

    #[test]
    fn test_reserved_names_are_rejected() {
        let defs: Vec<CommandDef<Echo>> = vec![CommandDef::new(CommandSpec::new(".kill"), |_, _, _| {
            Ok(CommandOutput::nothing())
        })];
        assert!(CommandTable::new(defs, &[".kill".to_string()]).is_err());
    }

    #[test]
    fn test_handler_panic_becomes_failure() {
        let table = CommandTable::<Echo>::of(&[]).unwrap();
        let err = table
            .get("boom")
            .unwrap()
            .call(&Echo, BoundArgs::new(), &CancelToken::new())
            .unwrap_err();
        assert_eq!(err.kind(), "Panic");
        assert_eq!(err.to_string(), "kaboom");
    }
}
