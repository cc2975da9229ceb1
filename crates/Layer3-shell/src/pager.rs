//! External pager for long task output

use std::io::{self, Write};
use std::process::{Command, Stdio};
use taskline_foundation::config::PagerSettings;
use tracing::debug;

/// Shows long text to the user out of band
pub trait Pager: Send + Sync {
    fn page(&self, text: &str) -> io::Result<()>;
}

/// Pipes text into an external program such as `less -c`
#[derive(Debug, Clone)]
pub struct CommandPager {
    argv: Vec<String>,
}

impl CommandPager {
    /// Parse a shell-like command line; `None` when it is empty or malformed
    pub fn parse(command: &str) -> Option<Self> {
        let argv = shlex::split(command)?;
        if argv.is_empty() {
            return None;
        }
        Some(Self { argv })
    }

    /// Pager from configuration, if one is configured
    pub fn from_settings(settings: &PagerSettings) -> Option<Self> {
        settings.command.as_deref().and_then(Self::parse)
    }
}

impl Pager for CommandPager {
    fn page(&self, text: &str) -> io::Result<()> {
        debug!("Paging {} bytes through {:?}", text.len(), self.argv);
        let mut child = Command::new(&self.argv[0])
            .args(&self.argv[1..])
            .stdin(Stdio::piped())
            .spawn()?;
        if let Some(mut stdin) = child.stdin.take() {
            // the pager may quit before reading everything
            match stdin.write_all(text.as_bytes()) {
                Err(e) if e.kind() != io::ErrorKind::BrokenPipe => return Err(e),
                _ => {}
            }
        }
        child.wait()?;
        Ok(())
    }
}
