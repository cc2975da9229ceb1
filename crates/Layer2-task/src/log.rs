//! Task output log
//!
//! Append-only record of the values a task produced, in production order.
//! Readers can poll it incrementally with [`OutputLog::since`] while the task
//! is still running.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// A single produced value
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct LogEntry {
    /// When the value reached the log
    pub timestamp: DateTime<Utc>,

    /// 1-based position in the task output
    pub line_number: usize,

    /// String-rendered value
    pub content: String,
}

impl LogEntry {
    pub fn new(content: impl Into<String>, line_number: usize) -> Self {
        Self {
            timestamp: Utc::now(),
            line_number,
            content: content.into(),
        }
    }
}

/// Append-only output log of one task
#[derive(Debug, Clone, Default)]
pub struct OutputLog {
    entries: Vec<LogEntry>,
}

impl OutputLog {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn push(&mut self, content: impl Into<String>) {
        let line_number = self.entries.len() + 1;
        self.entries.push(LogEntry::new(content, line_number));
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn entries(&self) -> &[LogEntry] {
        &self.entries
    }

    /// All values, oldest first
    pub fn lines(&self) -> Vec<String> {
        self.entries.iter().map(|e| e.content.clone()).collect()
    }

    /// Values appended after the first `offset` ones
    pub fn since(&self, offset: usize) -> Vec<String> {
        self.entries
            .iter()
            .skip(offset)
            .map(|e| e.content.clone())
            .collect()
    }

    /// Last `n` values
    pub fn tail(&self, n: usize) -> Vec<String> {
        let start = self.entries.len().saturating_sub(n);
        self.since(start)
    }

    /// Newline-joined values
    pub fn joined(&self) -> String {
        self.entries
            .iter()
            .map(|e| e.content.as_str())
            .collect::<Vec<_>>()
            .join("\n")
    }
}
