//! Operator-facing log output.
//!
//! Components never print directly; they receive an `Arc<dyn Logger>` so the
//! binary can write colored console lines while tests capture every message.

use colored::*;
use std::fmt;
use std::sync::Mutex;

/// Severity of a log line.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Level {
    Debug,
    Info,
    Success,
    Warning,
    Error,
}

impl fmt::Display for Level {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let tag = match self {
            Level::Debug => "DEBUG",
            Level::Info => "INFO",
            Level::Success => "SUCCESS",
            Level::Warning => "WARNING",
            Level::Error => "ERROR",
        };
        write!(f, "{}", tag)
    }
}

/// Sink for operator-facing messages.
pub trait Logger: Send + Sync {
    fn log(&self, level: Level, message: &str);

    fn debug(&self, message: &str) {
        self.log(Level::Debug, message);
    }

    fn info(&self, message: &str) {
        self.log(Level::Info, message);
    }

    fn success(&self, message: &str) {
        self.log(Level::Success, message);
    }

    fn warning(&self, message: &str) {
        self.log(Level::Warning, message);
    }

    fn error(&self, message: &str) {
        self.log(Level::Error, message);
    }
}

/// Timestamped, colored console output. Errors go to stderr.
pub struct ConsoleLogger {
    verbose: bool,
}

impl ConsoleLogger {
    pub fn new(verbose: bool) -> Self {
        Self { verbose }
    }
}

impl Logger for ConsoleLogger {
    fn log(&self, level: Level, message: &str) {
        if level == Level::Debug && !self.verbose {
            return;
        }

        let timestamp = chrono::Local::now().format("%Y/%m/%d %H:%M:%S");
        let tag = format!("[{}]", level);
        let tag = match level {
            Level::Debug => tag.dimmed(),
            Level::Info => tag.cyan(),
            Level::Success => tag.green().bold(),
            Level::Warning => tag.yellow().bold(),
            Level::Error => tag.red().bold(),
        };

        if level == Level::Error {
            eprintln!("{} {} {}", timestamp.to_string().dimmed(), tag, message);
        } else {
            println!("{} {} {}", timestamp.to_string().dimmed(), tag, message);
        }
    }
}

/// Captures every message in memory.
#[derive(Default)]
pub struct MemoryLogger {
    entries: Mutex<Vec<(Level, String)>>,
}

impl MemoryLogger {
    pub fn new() -> Self {
        Self::default()
    }

    /// All captured lines, oldest first.
    pub fn entries(&self) -> Vec<(Level, String)> {
        self.entries
            .lock()
            .map(|entries| entries.clone())
            .unwrap_or_default()
    }

    /// Whether a line at `level` contains `needle`.
    pub fn contains(&self, level: Level, needle: &str) -> bool {
        self.entries()
            .iter()
            .any(|(l, message)| *l == level && message.contains(needle))
    }
}

impl Logger for MemoryLogger {
    fn log(&self, level: Level, message: &str) {
        if let Ok(mut entries) = self.entries.lock() {
            entries.push((level, message.to_string()));
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_memory_logger_captures_levels() {
        let logger = MemoryLogger::new();
        logger.info("exporting schema");
        logger.warning("backup failed");

        assert_eq!(logger.entries().len(), 2);
        assert!(logger.contains(Level::Warning, "backup"));
        assert!(!logger.contains(Level::Error, "backup"));
    }

    #[test]
    fn test_level_tags() {
        assert_eq!(Level::Warning.to_string(), "WARNING");
        assert_eq!(Level::Success.to_string(), "SUCCESS");
    }
}
