//! The crate's error type and its four-way classification.

use std::any::Any;
use std::io;
use std::path::PathBuf;
use thiserror::Error;

/// Errors produced by the store, the persistence engine and migrations.
///
/// None of these are fatal to a [`Store`](crate::Store): they are reported
/// through its journal and the store keeps serving subscribers. They surface
/// as return values only from the lower-level building blocks
/// ([`migrate`](crate::migrate), [`Persistence`](crate::Persistence),
/// [`file`](crate::file)).
#[derive(Debug, Error)]
#[non_exhaustive]
pub enum Error {
    /// The migration chain did not end at the declared target version.
    #[error(
        "migration mismatch: expected target version {expected} but migrated state has version {actual}; \
         make sure every reachable version has an upgrade function that sets the next version"
    )]
    Migration { expected: u64, actual: u64 },

    /// A state handed to the migration engine has no integer `version` field.
    #[error("state has no integer `version` field")]
    MissingVersion,

    /// An upgrade function returned something other than a JSON object.
    #[error("upgrade function for version {from} did not return a JSON object")]
    InvalidMigrationOutput { from: u64 },

    /// An upgrade function panicked.
    #[error("upgrade function for version {from} panicked: {message}")]
    MigrationPanicked { from: u64, message: String },

    /// The state file exists but could not be read.
    #[error("failed to read {}: {source}", path.display())]
    Read {
        path: PathBuf,
        #[source]
        source: io::Error,
    },

    /// The state file was read but is not valid JSON.
    #[error("failed to parse {}: {source}", path.display())]
    Parse {
        path: PathBuf,
        #[source]
        source: serde_json::Error,
    },

    /// Another store holds the lock on the state file.
    #[error("{} is locked: another store owns this file", path.display())]
    Locked { path: PathBuf },

    /// The loaded JSON does not match the state type.
    #[error("loaded state does not match the state type: {source}")]
    Decode {
        #[source]
        source: serde_json::Error,
    },

    /// Writing or renaming the state file failed.
    #[error("failed to write {}: {source}", path.display())]
    Write {
        path: PathBuf,
        #[source]
        source: io::Error,
    },

    /// A state was accepted while the last load had failed, so it stays in
    /// memory only.
    #[error("state not persisted: loading {} failed, reconfigure to resume writes", path.display())]
    Detached { path: PathBuf },

    /// The state could not be serialized.
    #[error("failed to serialize state: {source}")]
    Encode {
        #[source]
        source: serde_json::Error,
    },

    /// The reducer panicked or produced a state that could not be built.
    #[error("reducer failed on action `{action}`: {message}")]
    Reducer { action: String, message: String },

    /// A selector or comparator panicked; its selection was closed.
    #[error("selector panicked: {message}")]
    Selector { message: String },

    /// The reducer returned a state with a lower version than the current one.
    #[error("reducer for action `{action}` lowered the state version from {from} to {to}")]
    VersionRegressed { action: String, from: u64, to: u64 },
}

/// Coarse classification of an [`Error`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorKind {
    /// Malformed migration; fatal to that `configure` call only.
    Configuration,
    /// The state file exists but cannot be used.
    Load,
    /// A write or rename failed.
    Persist,
    /// The reducer rejected a dispatch.
    Reducer,
}

impl Error {
    /// Returns the category this error belongs to.
    pub fn kind(&self) -> ErrorKind {
        match self {
            Error::Migration { .. }
            | Error::MissingVersion
            | Error::InvalidMigrationOutput { .. }
            | Error::MigrationPanicked { .. } => ErrorKind::Configuration,
            Error::Read { .. } | Error::Parse { .. } | Error::Locked { .. } | Error::Decode { .. } => {
                ErrorKind::Load
            }
            Error::Write { .. } | Error::Encode { .. } | Error::Detached { .. } => {
                ErrorKind::Persist
            }
            Error::Reducer { .. } | Error::VersionRegressed { .. } | Error::Selector { .. } => {
                ErrorKind::Reducer
            }
        }
    }
}

/// Result alias used throughout the crate.
pub type Result<T> = std::result::Result<T, Error>;

/// Text of a caught panic payload.
pub(crate) fn panic_message(payload: &(dyn Any + Send)) -> String {
    if let Some(s) = payload.downcast_ref::<&str>() {
        (*s).to_string()
    } else if let Some(s) = payload.downcast_ref::<String>() {
        s.clone()
    } else {
        "panicked".to_string()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_kind_classification() {
        assert_eq!(
            Error::Migration { expected: 3, actual: 2 }.kind(),
            ErrorKind::Configuration
        );
        assert_eq!(
            Error::Locked { path: PathBuf::from("db.json") }.kind(),
            ErrorKind::Load
        );
        let write = Error::Write {
            path: PathBuf::from("db.json"),
            source: io::Error::new(io::ErrorKind::PermissionDenied, "denied"),
        };
        assert_eq!(write.kind(), ErrorKind::Persist);
        assert_eq!(
            Error::Detached { path: PathBuf::from("db.json") }.kind(),
            ErrorKind::Persist
        );
        assert_eq!(
            Error::MigrationPanicked { from: 1, message: "boom".into() }.kind(),
            ErrorKind::Configuration
        );
        assert_eq!(
            Error::VersionRegressed { action: "a".into(), from: 2, to: 1 }.kind(),
            ErrorKind::Reducer
        );
        assert_eq!(
            Error::Selector { message: "boom".into() }.kind(),
            ErrorKind::Reducer
        );
    }

    #[test]
    fn test_migration_message_names_versions() {
        let msg = Error::Migration { expected: 100, actual: 28 }.to_string();
        assert!(msg.contains("100"), "{msg}");
        assert!(msg.contains("28"), "{msg}");
    }
}
