//! Options for pointing a store at its state file.

use crate::file;
use crate::logger::LogLevel;
use crate::migration::Migration;
use std::io;
use std::path::PathBuf;
use std::time::Duration;

/// Minimum spacing between two disk writes unless configured otherwise.
pub const DEFAULT_WRITE_INTERVAL: Duration = Duration::from_millis(1000);

/// Whether the persistence engine takes an advisory lock on the state file.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum LockMode {
    /// Hold an exclusive lock on `<file>.lock` while configured. A second
    /// engine on the same file fails to configure.
    #[default]
    Exclusive,
    /// No locking.
    None,
}

/// Options accepted by [`Store::configure`](crate::Store::configure).
///
/// Every field has a default, so `Config::default()` stores `db.json` in the
/// current working directory with no migration.
///
/// # Examples
///
/// ```
/// use statefold::{Config, LogLevel, Migration};
/// use std::time::Duration;
///
/// let config = Config::default()
///     .path("/tmp/app")
///     .file_name("state.json")
///     .migration(Migration::new(2).step(1, |s| s))
///     .log_level(LogLevel::Debug)
///     .write_interval(Duration::ZERO);
/// assert_eq!(config.file_name.as_deref(), Some("state.json"));
/// ```
#[derive(Debug, Clone)]
pub struct Config {
    /// State file name. Defaults to `db.json`.
    pub file_name: Option<String>,
    /// Directory holding the state file. Defaults to the working directory.
    pub path: Option<PathBuf>,
    /// Upgrade chain applied to the file on load.
    pub migration: Option<Migration>,
    /// Lowest severity that reaches the logger.
    pub log_level: LogLevel,
    /// Mirror kept records to stderr.
    pub log_to_console: bool,
    /// Minimum spacing between disk writes. Bursts in between coalesce.
    pub write_interval: Duration,
    pub lock: LockMode,
}

impl Default for Config {
    fn default() -> Self {
        Config {
            file_name: None,
            path: None,
            migration: None,
            log_level: LogLevel::default(),
            log_to_console: false,
            write_interval: DEFAULT_WRITE_INTERVAL,
            lock: LockMode::default(),
        }
    }
}

impl Config {
    pub fn file_name(mut self, file_name: impl Into<String>) -> Self {
        self.file_name = Some(file_name.into());
        self
    }

    pub fn path(mut self, path: impl Into<PathBuf>) -> Self {
        self.path = Some(path.into());
        self
    }

    pub fn migration(mut self, migration: Migration) -> Self {
        self.migration = Some(migration);
        self
    }

    pub fn log_level(mut self, level: LogLevel) -> Self {
        self.log_level = level;
        self
    }

    pub fn log_to_console(mut self, enabled: bool) -> Self {
        self.log_to_console = enabled;
        self
    }

    pub fn write_interval(mut self, interval: Duration) -> Self {
        self.write_interval = interval;
        self
    }

    pub fn lock(mut self, mode: LockMode) -> Self {
        self.lock = mode;
        self
    }

    /// Absolute path of the state file these options point at.
    pub fn file_path(&self) -> io::Result<PathBuf> {
        file::resolve_path(self.path.as_deref(), self.file_name.as_deref())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults() {
        let config = Config::default();
        assert_eq!(config.log_level, LogLevel::Info);
        assert!(!config.log_to_console);
        assert!(config.migration.is_none());
        assert_eq!(config.write_interval, DEFAULT_WRITE_INTERVAL);
        assert_eq!(config.lock, LockMode::Exclusive);
        assert!(config.file_path().unwrap().ends_with("db.json"));
    }

    #[test]
    fn test_file_path_joins_dir_and_name() {
        let config = Config::default().path("/srv/data").file_name("app.json");
        assert_eq!(config.file_path().unwrap(), PathBuf::from("/srv/data/app.json"));
    }
}
