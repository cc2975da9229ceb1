//! taskline settings

use serde::{Deserialize, Serialize};
use std::time::Duration;

/// Config file name
pub const CONFIG_FILE: &str = "config.toml";

/// Local (uncommitted) config file name
pub const LOCAL_CONFIG_FILE: &str = "config.local.toml";

// ============================================================================
// TasklineConfig
// ============================================================================

/// Merged taskline configuration
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct TasklineConfig {
    pub interpreter: InterpreterSettings,
    pub pager: PagerSettings,
    pub server: ServerSettings,
}

impl TasklineConfig {
    pub fn new() -> Self {
        Self::default()
    }

    /// Parse a TOML document; absent keys keep their defaults
    pub fn from_toml_str(content: &str) -> crate::Result<Self> {
        Ok(toml::from_str(content)?)
    }
}

/// Interpreter session settings
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct InterpreterSettings {
    /// Prompt written before each line is read
    pub prompt: String,
    /// Character starting a comment that runs to end of line
    pub comment_char: char,
    /// Prefix of the pseudo-commands (`.kill`, `.list`, ...)
    pub command_prefix: String,
    /// Delay between SIGTERM and SIGKILL for isolated tasks
    pub kill_grace_ms: u64,
}

impl Default for InterpreterSettings {
    fn default() -> Self {
        Self {
            prompt: "i> ".to_string(),
            comment_char: '#',
            command_prefix: ".".to_string(),
            kill_grace_ms: 2000,
        }
    }
}

impl InterpreterSettings {
    pub fn kill_grace(&self) -> Duration {
        Duration::from_millis(self.kill_grace_ms)
    }
}

/// Pager used by `output` for long task output
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct PagerSettings {
    /// Shell-style pager command line; `None` disables paging
    pub command: Option<String>,
    /// Output longer than this many lines goes through the pager
    pub threshold: usize,
}

impl Default for PagerSettings {
    fn default() -> Self {
        Self {
            command: cfg!(unix).then(|| "less -c".to_string()),
            threshold: 20,
        }
    }
}

/// Line server settings
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ServerSettings {
    pub host: String,
    pub port: u16,
    /// Line terminator written back to clients
    pub terminator: String,
    /// Longest request line in bytes; longer lines close the session
    pub max_line_length: usize,
}

impl Default for ServerSettings {
    fn default() -> Self {
        Self {
            host: "127.0.0.1".to_string(),
            port: 2199,
            terminator: "\r\n".to_string(),
            max_line_length: 64 * 1024,
        }
    }
}

impl ServerSettings {
    pub fn address(&self) -> String {
        format!("{}:{}", self.host, self.port)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_partial_document_keeps_defaults() {
        let config = TasklineConfig::from_toml_str(
            r#"
            [interpreter]
            prompt = "shelve> "

            [server]
            port = 4000
            max_line_length = 1024
            "#,
        )
        .unwrap();

        assert_eq!(config.interpreter.prompt, "shelve> ");
        assert_eq!(config.interpreter.comment_char, '#');
        assert_eq!(config.server.port, 4000);
        assert_eq!(config.server.terminator, "\r\n");
        assert_eq!(config.server.max_line_length, 1024);
        assert_eq!(ServerSettings::default().max_line_length, 65536);
        assert_eq!(config.pager.threshold, 20);
    }

    #[test]
    fn test_invalid_document() {
        let err = TasklineConfig::from_toml_str("[server]\nport = \"x\"").unwrap_err();
        assert!(matches!(err, crate::Error::Toml(_)));
    }
}
