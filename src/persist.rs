//! The persistence engine: load, migrate and rewrite the state file.
//!
//! A [`Persistence`] owns one background writer thread. [`Persistence::persist`]
//! never touches the disk itself; it parks the state in a single pending slot
//! and wakes the writer. While a write is in flight, newer states replace the
//! pending one, so only the latest state is guaranteed to reach disk and at
//! most one write per engine is ever in flight.

use crate::config::{Config, LockMode};
use crate::error::{Error, Result};
use crate::file;
use crate::logger::Journal;
use crate::migration::{self, Migration};
use fs2::FileExt;
use parking_lot::{Condvar, Mutex};
use serde_json::Value;
use std::fs::{File, OpenOptions};
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::thread::{self, JoinHandle};
use std::time::{Duration, Instant};

/// Compute the xxh64 hash of encoded state bytes.
pub fn content_hash(bytes: &[u8]) -> u64 {
    xxhash_rust::xxh64::xxh64(bytes, 0)
}

/// Lifecycle of the engine.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Phase {
    /// No file configured; persisted states are dropped.
    Unconfigured,
    /// A configure call is reading (and possibly migrating) the file.
    Loading,
    /// Writes go to the configured file.
    Ready,
    /// The writer has stopped.
    Disposed,
}

struct Target {
    path: PathBuf,
    // Held only for its advisory lock; dropping it releases the lock.
    _lock: Option<File>,
}

struct Pending {
    path: PathBuf,
    state: Value,
}

struct Slot {
    phase: Phase,
    target: Option<Target>,
    pending: Option<Pending>,
    writing: bool,
    urgent: bool,
    shutdown: bool,
    interval: Duration,
    last_write: Option<Instant>,
    last_content: Option<(PathBuf, u64)>,
    /// File whose load failed; states persisted meanwhile are reported lost.
    detached: Option<PathBuf>,
}

struct Shared {
    slot: Mutex<Slot>,
    /// Signals the writer: new pending state, flush request or shutdown.
    wake: Condvar,
    /// Signals flushers: nothing pending and nothing in flight.
    idle: Condvar,
}

/// Owns the state file of one store.
pub struct Persistence {
    shared: Arc<Shared>,
    configure_gate: Mutex<()>,
    worker: Mutex<Option<JoinHandle<()>>>,
    journal: Journal,
}

impl Persistence {
    /// Create an unconfigured engine and start its writer thread.
    pub fn new(journal: Journal) -> Self {
        let shared = Arc::new(Shared {
            slot: Mutex::new(Slot {
                phase: Phase::Unconfigured,
                target: None,
                pending: None,
                writing: false,
                urgent: false,
                shutdown: false,
                interval: Duration::ZERO,
                last_write: None,
                last_content: None,
                detached: None,
            }),
            wake: Condvar::new(),
            idle: Condvar::new(),
        });

        let worker = {
            let shared = Arc::clone(&shared);
            let journal = journal.clone();
            thread::spawn(move || write_loop(&shared, &journal))
        };

        Persistence {
            shared,
            configure_gate: Mutex::new(()),
            worker: Mutex::new(Some(worker)),
            journal,
        }
    }

    /// Point the engine at the file described by `config` and load it.
    ///
    /// Pending writes for the previous file are flushed first. Returns
    /// `Ok(None)` when the file does not exist yet. When a migration is
    /// configured and changes the version, the migrated state is written
    /// back before it is returned.
    ///
    /// # Errors
    ///
    /// Load errors ([`Error::Read`], [`Error::Parse`], [`Error::Locked`]),
    /// configuration errors from the migration, or [`Error::Write`] if the
    /// migrated state cannot be written back. On error the engine is left
    /// unconfigured and the file is untouched; every state persisted until
    /// the next successful configure is logged as [`Error::Detached`].
    pub fn configure(&self, config: &Config) -> Result<Option<Value>> {
        let _gate = self.configure_gate.lock();
        self.flush();

        {
            let mut slot = self.shared.slot.lock();
            if slot.phase == Phase::Disposed {
                return Ok(None);
            }
            slot.phase = Phase::Loading;
            slot.target = None;
            slot.last_content = None;
            slot.detached = None;
            slot.interval = config.write_interval;
        }

        let _unwind = LoadingGuard {
            shared: &self.shared,
        };
        let outcome = self.load(config);

        let mut slot = self.shared.slot.lock();
        if slot.phase == Phase::Disposed {
            return outcome.map(|(_, state)| state);
        }
        match outcome {
            Ok((target, state)) => {
                self.journal
                    .info("persist Configure", format!("using {}", target.path.display()));
                slot.target = Some(target);
                slot.phase = Phase::Ready;
                Ok(state)
            }
            Err(err) => {
                slot.phase = Phase::Unconfigured;
                slot.detached = Some(
                    config
                        .file_path()
                        .unwrap_or_else(|_| config.path.clone().unwrap_or_default()),
                );
                Err(err)
            }
        }
    }

    fn load(&self, config: &Config) -> Result<(Target, Option<Value>)> {
        let path = config.file_path().map_err(|source| Error::Read {
            path: config.path.clone().unwrap_or_default(),
            source,
        })?;

        let lock = match config.lock {
            LockMode::Exclusive => Some(acquire_lock(&path)?),
            LockMode::None => None,
        };

        let exists = file::exists(&path).map_err(|source| Error::Read {
            path: path.clone(),
            source,
        })?;
        if !exists {
            self.journal.debug("persist Load", || {
                format!("{} does not exist yet", path.display())
            });
            return Ok((Target { path, _lock: lock }, None));
        }

        let Some(loaded) = file::load(&path)? else {
            return Ok((Target { path, _lock: lock }, None));
        };
        self.journal
            .debug("persist Load", || format!("{} | {loaded}", path.display()));

        let state = match &config.migration {
            Some(migration) => self.migrate(&path, loaded, migration)?,
            None => loaded,
        };
        Ok((Target { path, _lock: lock }, Some(state)))
    }

    fn migrate(&self, path: &Path, loaded: Value, migration: &Migration) -> Result<Value> {
        let before = migration::version_of(&loaded);
        self.journal.info(
            "persist Migration (before)",
            format!(
                "migrating from version {} to {}",
                before.map_or_else(|| "?".to_string(), |v| v.to_string()),
                migration.target_version()
            ),
        );

        let migrated = migration::migrate(loaded, Some(migration))?;
        let after = migration::version_of(&migrated);
        if before != after {
            file::save(path, &migrated)?;
            self.journal.info(
                "persist Migration (after)",
                format!("rewrote {} at version {}", path.display(), migration.target_version()),
            );
        }
        Ok(migrated)
    }

    /// Schedule `state` to be written to the configured file.
    ///
    /// Replaces any state still waiting to be written. Ignored while the
    /// engine is not ready; after a failed load that is reported as an error.
    pub fn persist(&self, state: Value) {
        let mut slot = self.shared.slot.lock();
        let ready = match slot.phase {
            Phase::Ready => slot.target.as_ref().map(|t| t.path.clone()),
            _ => None,
        };
        let Some(path) = ready else {
            let phase = slot.phase;
            let detached = slot.detached.clone();
            drop(slot);
            match detached {
                Some(path) => self
                    .journal
                    .error("persist Schedule", &Error::Detached { path }),
                None => self
                    .journal
                    .debug("persist Schedule", || format!("dropped state while {phase:?}")),
            }
            return;
        };
        if slot.pending.replace(Pending { path, state }).is_some() {
            self.journal
                .debug("persist Schedule", || "superseded a pending write".to_string());
        }
        self.shared.wake.notify_one();
    }

    /// Block until every scheduled state has been written (or has failed).
    ///
    /// Pending writes skip the remaining write interval.
    pub fn flush(&self) {
        let mut slot = self.shared.slot.lock();
        if slot.pending.is_some() || slot.writing {
            slot.urgent = true;
            self.shared.wake.notify_one();
        }
        while (slot.pending.is_some() || slot.writing) && !slot.shutdown {
            self.shared.idle.wait(&mut slot);
        }
    }

    /// Current lifecycle phase.
    pub fn phase(&self) -> Phase {
        self.shared.slot.lock().phase
    }

    /// Path of the configured file, if any.
    pub fn file_path(&self) -> Option<PathBuf> {
        self.shared
            .slot
            .lock()
            .target
            .as_ref()
            .map(|t| t.path.clone())
    }

    /// Flush, stop the writer and release the file lock.
    ///
    /// Idempotent.
    pub fn dispose(&self) {
        let Some(worker) = self.worker.lock().take() else {
            return;
        };
        {
            let mut slot = self.shared.slot.lock();
            slot.shutdown = true;
            slot.urgent = true;
            self.shared.wake.notify_all();
        }
        if worker.join().is_err() {
            self.journal
                .info("persist Dispose", "writer thread panicked before shutdown");
        }
        let mut slot = self.shared.slot.lock();
        slot.phase = Phase::Disposed;
        slot.target = None;
        slot.pending = None;
        slot.detached = None;
        self.shared.idle.notify_all();
    }
}

impl Drop for Persistence {
    fn drop(&mut self) {
        self.dispose();
    }
}

/// Puts an engine left in `Loading` by an unwinding load back to
/// `Unconfigured`.
struct LoadingGuard<'a> {
    shared: &'a Shared,
}

impl Drop for LoadingGuard<'_> {
    fn drop(&mut self) {
        let mut slot = self.shared.slot.lock();
        if slot.phase == Phase::Loading {
            slot.phase = Phase::Unconfigured;
        }
    }
}

fn acquire_lock(path: &Path) -> Result<File> {
    let lock_path = file::lock_path(path);
    let lock = OpenOptions::new()
        .create(true)
        .truncate(false)
        .write(true)
        .open(&lock_path)
        .map_err(|source| Error::Read {
            path: lock_path.clone(),
            source,
        })?;
    lock.try_lock_exclusive().map_err(|_| Error::Locked {
        path: path.to_path_buf(),
    })?;
    Ok(lock)
}

fn write_loop(shared: &Shared, journal: &Journal) {
    loop {
        let Some(Pending { path, state }) = next_pending(shared) else {
            return;
        };

        let written = encode_and_write(shared, &path, &state);
        match &written {
            Ok(true) => journal.debug("persist Write", || format!("wrote {}", path.display())),
            Ok(false) => journal.debug("persist Write", || {
                format!("{} already holds this state", path.display())
            }),
            Err(err) => journal.error("persist Write", err),
        }

        let mut slot = shared.slot.lock();
        slot.writing = false;
        if let Ok(true) = written {
            slot.last_write = Some(Instant::now());
        }
        if slot.pending.is_none() {
            slot.urgent = false;
            shared.idle.notify_all();
        }
    }
}

/// Wait for the next state to write, honouring the write interval.
///
/// Returns `None` once shut down with nothing left to write.
fn next_pending(shared: &Shared) -> Option<Pending> {
    let mut slot = shared.slot.lock();
    loop {
        if slot.pending.is_none() {
            if slot.shutdown {
                return None;
            }
            shared.wake.wait(&mut slot);
            continue;
        }

        let due = slot.last_write.map(|at| at + slot.interval);
        match due {
            Some(due) if !slot.urgent && !slot.shutdown && Instant::now() < due => {
                shared.wake.wait_until(&mut slot, due);
            }
            _ => {
                let pending = slot.pending.take();
                slot.writing = pending.is_some();
                return pending;
            }
        }
    }
}

/// Returns `Ok(false)` when the file already holds exactly these bytes.
fn encode_and_write(shared: &Shared, path: &Path, state: &Value) -> Result<bool> {
    let bytes = file::encode(state)?;
    let hash = content_hash(&bytes);
    let unchanged = matches!(
        &shared.slot.lock().last_content,
        Some((last_path, last_hash)) if last_path == path && *last_hash == hash
    );
    if unchanged {
        return Ok(false);
    }

    file::write_atomic(path, &bytes).map_err(|source| Error::Write {
        path: path.to_path_buf(),
        source,
    })?;
    shared.slot.lock().last_content = Some((path.to_path_buf(), hash));
    Ok(true)
}
