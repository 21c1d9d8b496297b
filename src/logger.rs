//! Log records and the logger collaborator.
//!
//! The store never decides where logs go. It hands every [`LogRecord`] to an
//! injected [`Logger`] through a per-store [`Journal`], which applies the
//! configured level and console mirroring.

use parking_lot::{Mutex, RwLock};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::sync::Arc;

/// Severity of a [`LogRecord`].
///
/// Ordered from most to least severe.
#[derive(
    Debug, Clone, Copy, Default, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize,
)]
#[serde(rename_all = "lowercase")]
pub enum LogLevel {
    Error,
    #[default]
    Info,
    Debug,
}

impl LogLevel {
    /// Returns `true` if a record at `level` passes a threshold of `self`.
    ///
    /// `Error` keeps only errors, `Info` keeps errors and info, `Debug`
    /// keeps everything.
    pub fn permits(self, level: LogLevel) -> bool {
        level <= self
    }

    fn as_log(self) -> log::Level {
        match self {
            LogLevel::Error => log::Level::Error,
            LogLevel::Info => log::Level::Info,
            LogLevel::Debug => log::Level::Debug,
        }
    }
}

impl fmt::Display for LogLevel {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            LogLevel::Error => "error",
            LogLevel::Info => "info",
            LogLevel::Debug => "debug",
        };
        f.write_str(s)
    }
}

/// A single event reported by the store.
///
/// `name` identifies the originating component and operation, e.g.
/// `"store ActionDispatched"` or `"persist Write"`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct LogRecord {
    pub level: LogLevel,
    pub name: String,
    pub message: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub stack: Option<String>,
}

impl LogRecord {
    pub fn new(level: LogLevel, name: impl Into<String>, message: impl Into<String>) -> Self {
        LogRecord {
            level,
            name: name.into(),
            message: message.into(),
            stack: None,
        }
    }

    /// Build an error record, keeping the error's source chain as `stack`.
    pub fn error(name: impl Into<String>, err: &dyn std::error::Error) -> Self {
        let mut chain = Vec::new();
        let mut source = err.source();
        while let Some(cause) = source {
            chain.push(cause.to_string());
            source = cause.source();
        }
        LogRecord {
            level: LogLevel::Error,
            name: name.into(),
            message: err.to_string(),
            stack: (!chain.is_empty()).then(|| chain.join("\ncaused by: ")),
        }
    }
}

impl fmt::Display for LogRecord {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "[{}] {}: {}", self.level, self.name, self.message)?;
        if let Some(stack) = &self.stack {
            write!(f, "\n{stack}")?;
        }
        Ok(())
    }
}

/// Sink for log records.
pub trait Logger: Send + Sync {
    fn log(&self, record: &LogRecord);
}

/// Forwards records to the [`log`] facade under the `statefold` target.
#[derive(Debug, Default, Clone, Copy)]
pub struct FacadeLogger;

impl Logger for FacadeLogger {
    fn log(&self, record: &LogRecord) {
        log::log!(
            target: "statefold",
            record.level.as_log(),
            "{}: {}",
            record.name,
            record.message
        );
        if let Some(stack) = &record.stack {
            log::log!(target: "statefold", record.level.as_log(), "{stack}");
        }
    }
}

/// Keeps every record in memory.
///
/// Clones share the same buffer, so a test can hand one clone to a store
/// and inspect another.
#[derive(Debug, Default, Clone)]
pub struct MemoryLogger {
    records: Arc<Mutex<Vec<LogRecord>>>,
}

impl MemoryLogger {
    pub fn new() -> Self {
        Self::default()
    }

    /// Snapshot of all records received so far.
    pub fn records(&self) -> Vec<LogRecord> {
        self.records.lock().clone()
    }

    /// Records at exactly `level`.
    pub fn at(&self, level: LogLevel) -> Vec<LogRecord> {
        self.records
            .lock()
            .iter()
            .filter(|r| r.level == level)
            .cloned()
            .collect()
    }

    pub fn clear(&self) {
        self.records.lock().clear();
    }
}

impl Logger for MemoryLogger {
    fn log(&self, record: &LogRecord) {
        self.records.lock().push(record.clone());
    }
}

#[derive(Debug, Clone, Copy)]
struct JournalSettings {
    level: LogLevel,
    to_console: bool,
}

/// A store's handle on its logger.
///
/// Filters records below the configured [`LogLevel`] and mirrors the rest
/// to stderr when console logging is on. Cheap to clone; clones share the
/// settings.
#[derive(Clone)]
pub struct Journal {
    sink: Arc<dyn Logger>,
    settings: Arc<RwLock<JournalSettings>>,
}

impl Journal {
    pub fn new(sink: Arc<dyn Logger>) -> Self {
        Journal {
            sink,
            settings: Arc::new(RwLock::new(JournalSettings {
                level: LogLevel::default(),
                to_console: false,
            })),
        }
    }

    pub fn set_level(&self, level: LogLevel) {
        self.settings.write().level = level;
    }

    pub fn set_console(&self, to_console: bool) {
        self.settings.write().to_console = to_console;
    }

    /// Returns `true` if a record at `level` would be kept.
    pub fn enabled(&self, level: LogLevel) -> bool {
        self.settings.read().level.permits(level)
    }

    pub fn record(&self, record: LogRecord) {
        let settings = *self.settings.read();
        if !settings.level.permits(record.level) {
            return;
        }
        if settings.to_console {
            eprintln!("statefold: {record}");
        }
        self.sink.log(&record);
    }

    pub fn debug(&self, name: &str, message: impl FnOnce() -> String) {
        if self.enabled(LogLevel::Debug) {
            self.record(LogRecord::new(LogLevel::Debug, name, message()));
        }
    }

    pub fn info(&self, name: &str, message: impl Into<String>) {
        self.record(LogRecord::new(LogLevel::Info, name, message));
    }

    pub fn error(&self, name: &str, err: &dyn std::error::Error) {
        self.record(LogRecord::error(name, err));
    }
}

impl fmt::Debug for Journal {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let settings = *self.settings.read();
        f.debug_struct("Journal")
            .field("level", &settings.level)
            .field("to_console", &settings.to_console)
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::Error;
    use std::io;
    use std::path::PathBuf;

    #[test]
    fn test_level_thresholds() {
        assert!(LogLevel::Error.permits(LogLevel::Error));
        assert!(!LogLevel::Error.permits(LogLevel::Info));
        assert!(LogLevel::Info.permits(LogLevel::Error));
        assert!(LogLevel::Info.permits(LogLevel::Info));
        assert!(!LogLevel::Info.permits(LogLevel::Debug));
        assert!(LogLevel::Debug.permits(LogLevel::Debug));
    }

    #[test]
    fn test_journal_filters_by_level() {
        let memory = MemoryLogger::new();
        let journal = Journal::new(Arc::new(memory.clone()));

        journal.debug("test Debug", || "hidden".to_string());
        journal.info("test Info", "shown");
        assert_eq!(memory.records().len(), 1);

        journal.set_level(LogLevel::Debug);
        journal.debug("test Debug", || "shown".to_string());
        assert_eq!(memory.at(LogLevel::Debug).len(), 1);

        journal.set_level(LogLevel::Error);
        journal.info("test Info", "hidden");
        assert_eq!(memory.records().len(), 2);
    }

    #[test]
    fn test_error_record_keeps_source_chain() {
        let err = Error::Write {
            path: PathBuf::from("db.json"),
            source: io::Error::other("disk full"),
        };
        let record = LogRecord::error("persist Write", &err);
        assert_eq!(record.level, LogLevel::Error);
        assert!(record.message.contains("db.json"));
        assert_eq!(record.stack.as_deref(), Some("disk full"));
    }

    #[test]
    fn test_level_serializes_lowercase() {
        assert_eq!(serde_json::to_string(&LogLevel::Debug).unwrap(), "\"debug\"");
        let level: LogLevel = serde_json::from_str("\"error\"").unwrap();
        assert_eq!(level, LogLevel::Error);
    }
}
