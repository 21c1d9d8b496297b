//! Schema-version upgrades for persisted state.

use crate::error::{Error, Result, panic_message};
use serde_json::Value;
use std::collections::BTreeMap;
use std::fmt;
use std::panic::{self, AssertUnwindSafe};
use std::sync::Arc;

/// Upgrades a state found at one version into the shape of a later version.
pub type UpgradeFn = Arc<dyn Fn(Value) -> Value + Send + Sync>;

/// A sparse chain of upgrade functions ending at `target_version`.
///
/// Keys are *source* versions. The chain may skip versions (1 -> 28 -> 94)
/// and may contain keys that are never reached; only the keys that match
/// the working state's version at the time they are visited are applied.
///
/// # Examples
///
/// ```
/// use statefold::{migrate, Migration};
/// use serde_json::json;
///
/// let migration = Migration::new(3)
///     .step(1, |mut s| {
///         let old = s["old"].take();
///         s["renamed"] = old;
///         s
///     })
///     .step(2, |s| s);
///
/// let migrated = migrate(json!({"version": 1, "old": "x"}), Some(&migration)).unwrap();
/// assert_eq!(migrated["version"], 3);
/// assert_eq!(migrated["renamed"], "x");
/// ```
#[derive(Clone)]
pub struct Migration {
    target_version: u64,
    steps: BTreeMap<u64, UpgradeFn>,
}

impl Migration {
    /// Create an empty chain that must end at `target_version`.
    pub fn new(target_version: u64) -> Self {
        Migration {
            target_version,
            steps: BTreeMap::new(),
        }
    }

    /// Register the upgrade applied to states found at `from`.
    ///
    /// Registering the same source version twice keeps the later function.
    pub fn step<F>(mut self, from: u64, upgrade: F) -> Self
    where
        F: Fn(Value) -> Value + Send + Sync + 'static,
    {
        self.steps.insert(from, Arc::new(upgrade));
        self
    }

    /// The version every migrated state must end at.
    pub fn target_version(&self) -> u64 {
        self.target_version
    }

    /// Source versions with a registered upgrade, ascending.
    pub fn source_versions(&self) -> impl Iterator<Item = u64> + '_ {
        self.steps.keys().copied()
    }
}

impl fmt::Debug for Migration {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Migration")
            .field("target_version", &self.target_version)
            .field("steps", &self.source_versions().collect::<Vec<_>>())
            .finish()
    }
}

/// Read the integer `version` field of a state.
pub fn version_of(state: &Value) -> Option<u64> {
    state.get("version").and_then(Value::as_u64)
}

/// Run `migration` over `state`.
///
/// With no migration the state is returned untouched. Otherwise every
/// matching step is applied in ascending key order, and a step whose
/// output forgets to move the version forward is bumped to `key + 1`.
///
/// # Errors
///
/// - [`Error::MissingVersion`] if `state` has no integer `version`.
/// - [`Error::InvalidMigrationOutput`] if a step returns a non-object, or
///   is keyed at `u64::MAX` and so has no next version.
/// - [`Error::MigrationPanicked`] if a step panics.
/// - [`Error::Migration`] if the walk does not end exactly at the target.
pub fn migrate(state: Value, migration: Option<&Migration>) -> Result<Value> {
    let Some(migration) = migration else {
        return Ok(state);
    };

    let mut version = version_of(&state).ok_or(Error::MissingVersion)?;
    let mut state = state;

    for (&from, upgrade) in &migration.steps {
        if version != from {
            continue;
        }
        let mut next = panic::catch_unwind(AssertUnwindSafe(|| upgrade(state))).map_err(
            |payload| Error::MigrationPanicked {
                from,
                message: panic_message(payload.as_ref()),
            },
        )?;
        let floor = from
            .checked_add(1)
            .ok_or(Error::InvalidMigrationOutput { from })?;
        let bumped = version_of(&next).unwrap_or(0).max(floor);
        match next.as_object_mut() {
            Some(obj) => {
                obj.insert("version".to_string(), Value::from(bumped));
            }
            None => return Err(Error::InvalidMigrationOutput { from }),
        }
        state = next;
        version = bumped;
    }

    if version != migration.target_version {
        return Err(Error::Migration {
            expected: migration.target_version,
            actual: version,
        });
    }
    Ok(state)
}
