//! Key/value store persisted as JSON between sessions

use parking_lot::Mutex;
use std::collections::BTreeMap;
use std::path::PathBuf;
use taskline_foundation::{Result, CONFIG_DIR_NAME};
use taskline_shell::{CommandContainer, CommandDef, CommandOutput, CommandSpec, Param};
use taskline_task::OutputSequence;
use tracing::debug;

/// Overrides the store location
pub const SHELVE_ENV: &str = "TASKLINE_SHELVE";

pub struct Shelve {
    path: PathBuf,
    values: Mutex<BTreeMap<String, String>>,
}

impl Shelve {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self {
            path: path.into(),
            values: Mutex::new(BTreeMap::new()),
        }
    }

    pub fn default_path() -> PathBuf {
        if let Some(path) = std::env::var_os(SHELVE_ENV) {
            return PathBuf::from(path);
        }
        dirs::home_dir()
            .unwrap_or_else(|| PathBuf::from("."))
            .join(CONFIG_DIR_NAME)
            .join("shelve.json")
    }

    fn set(&self, key: &str, value: &str) -> String {
        self.values.lock().insert(key.to_string(), value.to_string());
        format!("setting {}={}", key, value)
    }

    fn delete(&self, key: &str) -> String {
        match self.values.lock().remove(key) {
            Some(_) => format!("deleted {}", key),
            None => format!("{}: not found", key),
        }
    }
}

impl Default for Shelve {
    fn default() -> Self {
        Self::new(Self::default_path())
    }
}

impl CommandContainer for Shelve {
    fn commands() -> Vec<CommandDef<Self>> {
        vec![
            CommandDef::new(
                CommandSpec::new("set")
                    .about("set a parameter")
                    .param(Param::positional("key").help("parameter name"))
                    .param(Param::positional("value").help("parameter value")),
                |shelve: &Shelve, args, _| Ok(CommandOutput::value(shelve.set(args.str("key")?, args.str("value")?))),
            ),
            CommandDef::new(
                CommandSpec::new("show")
                    .about("show the given parameters")
                    .param(Param::varargs("keys").help("names of the parameters")),
                |shelve: &Shelve, args, _| {
                    let values = shelve.values.lock();
                    let lines: Vec<String> = args
                        .list("keys")
                        .into_iter()
                        .map(|key| values.get(&key).cloned().unwrap_or_else(|| format!("{}: not found", key)))
                        .collect();
                    Ok(OutputSequence::values(lines).into())
                },
            ),
            CommandDef::new(
                CommandSpec::new("showall").about("show all parameters in the shelve"),
                |shelve: &Shelve, _, _| {
                    let lines: Vec<String> = shelve
                        .values
                        .lock()
                        .iter()
                        .map(|(key, value)| format!("{}={}", key, value))
                        .collect();
                    Ok(OutputSequence::values(lines).into())
                },
            ),
            CommandDef::new(
                CommandSpec::new("delete")
                    .about("delete an element")
                    .param(Param::positional("key")),
                |shelve: &Shelve, args, _| Ok(CommandOutput::value(shelve.delete(args.str("key")?))),
            ),
            CommandDef::new(CommandSpec::new("clear").about("clear the shelve"), |shelve: &Shelve, _, _| {
                shelve.values.lock().clear();
                Ok(CommandOutput::value("cleared the shelve"))
            }),
        ]
    }

    fn intro(&self) -> Option<String> {
        Some("A simple interface to a shelve. Use .help to see the available commands.".to_string())
    }

    fn setup(&mut self) -> Result<()> {
        if !self.path.exists() {
            return Ok(());
        }
        let content = std::fs::read_to_string(&self.path)?;
        let values: BTreeMap<String, String> = serde_json::from_str(&content)?;
        debug!("Loaded {} entries from {}", values.len(), self.path.display());
        *self.values.lock() = values;
        Ok(())
    }

    fn teardown(&mut self) -> Result<()> {
        if let Some(parent) = self.path.parent() {
            std::fs::create_dir_all(parent)?;
        }
        let content = serde_json::to_string_pretty(&*self.values.lock())?;
        std::fs::write(&self.path, content)?;
        debug!("Saved shelve to {}", self.path.display());
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use taskline_shell::{Interpreter, InterpreterConfig};

    fn session(path: &std::path::Path) -> Interpreter<Shelve> {
        let mut interpreter = Interpreter::new(Shelve::new(path), InterpreterConfig::default()).unwrap();
        interpreter.enter().unwrap();
        interpreter
    }

    #[test]
    fn test_commands() {
        let dir = tempfile::tempdir().unwrap();
        let interpreter = session(&dir.path().join("shelve.json"));
        interpreter.check("set a 1", "setting a=1").unwrap();
        interpreter.check("set b 2", "setting b=2").unwrap();
        interpreter.check("show a c", "1\nc: not found").unwrap();
        interpreter.check("showall", "a=1\nb=2").unwrap();
        interpreter.check("del a", "deleted a").unwrap();
        interpreter.check("delete a", "a: not found").unwrap();
        interpreter.check("clear", "cleared the shelve").unwrap();
        interpreter.check("showall", "").unwrap();
    }

    #[test]
    fn test_values_survive_sessions() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("nested").join("shelve.json");
        {
            let mut interpreter = session(&path);
            interpreter.check("set a 1", "setting a=1").unwrap();
            interpreter.exit().unwrap();
        }
        let interpreter = session(&path);
        interpreter.check("show a", "1").unwrap();
    }
}
