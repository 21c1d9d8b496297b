//! The reactive store: dispatch, selections and the load barrier.

use crate::action::Action;
use crate::bridge::DebugBridge;
use crate::broadcast::{Broadcast, Observer, Selection};
use crate::config::Config;
use crate::error::{Error, panic_message};
use crate::latch::Latch;
use crate::logger::{FacadeLogger, Journal, Logger};
use crate::persist::Persistence;
use crate::reducer::{Reducer, ReducerSpec, State};
use parking_lot::{Condvar, Mutex};
use std::fmt;
use std::panic::{self, AssertUnwindSafe};
use std::sync::Arc;
use std::sync::mpsc;
use std::thread;

/// Work held back by the load barrier, replayed in arrival order.
enum Deferred<S> {
    Dispatch(Action),
    Select(Observer<S>),
    Observe(Observer<Action>),
    Effect(Observer<Effect<S>>),
}

/// An accepted dispatch: the action together with the state it produced.
///
/// Delivered by [`Store::effect`] after the action itself has been
/// published. `state` is `None` only when no reducer is registered and no
/// state exists yet.
#[derive(Debug, Clone, PartialEq)]
pub struct Effect<S> {
    pub action: Action,
    pub state: Option<S>,
}

struct Core<S> {
    state: Broadcast<S>,
    actions: Broadcast<Action>,
    effects: Broadcast<Effect<S>>,
    reducer: Option<Reducer<S>>,
    latch: Latch<Deferred<S>>,
    generation: u64,
    bridge: Option<Arc<dyn DebugBridge<S>>>,
    disposed: bool,
}

struct Inner<S> {
    core: Mutex<Core<S>>,
    loaded: Condvar,
    /// Loads run one at a time, oldest configure first.
    loading: Mutex<()>,
    persistence: Persistence,
    journal: Journal,
}

/// A reducer-driven state container persisted to a JSON file.
///
/// `Store` is a handle: clones share the same state. All state changes are
/// serialized through one internal lock, so dispatches apply in the order
/// they were issued. For each dispatch the new state is published first,
/// then the action, then the state is handed to the persistence engine.
///
/// # Examples
///
/// ```
/// use statefold::{Action, Config, ReducerSpec, Store, Versioned};
/// use serde::{Deserialize, Serialize};
/// use std::time::Duration;
///
/// #[derive(Clone, PartialEq, Serialize, Deserialize)]
/// struct Counter { version: u64, count: u64 }
///
/// impl Versioned for Counter {
///     fn version(&self) -> u64 { self.version }
/// }
///
/// let dir = tempfile::tempdir().unwrap();
/// let store: Store<Counter> = Store::new();
/// store.reduce(ReducerSpec::function(|state: Option<&Counter>, action: &Action| {
///     let mut next = state.cloned().unwrap_or(Counter { version: 1, count: 0 });
///     if action.action_type == "increment" {
///         next.count += 1;
///     }
///     next
/// }));
/// store.configure(Config::default().path(dir.path()).write_interval(Duration::ZERO));
///
/// let counts = store.select(|s: &Counter| Some(s.count));
/// store.dispatch(Action::new("increment"));
/// store.dispatch(Action::new("increment"));
/// store.flush();
///
/// assert_eq!(counts.drain(), vec![1, 2]);
/// store.dispose();
/// ```
pub struct Store<S: State> {
    inner: Arc<Inner<S>>,
}

impl<S: State> Clone for Store<S> {
    fn clone(&self) -> Self {
        Store {
            inner: Arc::clone(&self.inner),
        }
    }
}

impl<S: State> Default for Store<S> {
    fn default() -> Self {
        Self::new()
    }
}

impl<S: State> fmt::Debug for Store<S> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let core = self.inner.core.lock();
        f.debug_struct("Store")
            .field("has_state", &core.state.latest().is_some())
            .field("loading", &!core.latch.is_open())
            .field("disposed", &core.disposed)
            .field("file", &self.inner.persistence.file_path())
            .finish()
    }
}

impl<S: State> Store<S> {
    /// Create an unconfigured store that logs through the [`log`] facade.
    pub fn new() -> Self {
        Self::with_logger(Arc::new(FacadeLogger))
    }

    /// Create an unconfigured store that reports to `logger`.
    pub fn with_logger(logger: Arc<dyn Logger>) -> Self {
        let journal = Journal::new(logger);
        let persistence = Persistence::new(journal.clone());
        Store {
            inner: Arc::new(Inner {
                core: Mutex::new(Core {
                    state: Broadcast::new(),
                    actions: Broadcast::new(),
                    effects: Broadcast::new(),
                    reducer: None,
                    latch: Latch::new(),
                    generation: 0,
                    bridge: None,
                    disposed: false,
                }),
                loaded: Condvar::new(),
                loading: Mutex::new(()),
                persistence,
                journal,
            }),
        }
    }

    /// Start building a store with its collaborators wired up.
    pub fn builder() -> StoreBuilder<S> {
        StoreBuilder::new()
    }

    /// Point the store at a state file and load it in the background.
    ///
    /// Until the load (and any migration) completes, dispatches and new
    /// selections are held and then replayed in issue order. A loaded state
    /// replaces the current one. If loading fails the error is logged and
    /// the store keeps whatever state it had. A later `configure` supersedes
    /// a load that is still running.
    pub fn configure(&self, config: Config) {
        let journal = &self.inner.journal;
        journal.set_level(config.log_level);
        journal.set_console(config.log_to_console);
        journal.debug("store ConfigChanged", || format!("{config:?}"));

        let generation = {
            let mut core = self.inner.core.lock();
            if core.disposed {
                return;
            }
            core.generation += 1;
            core.latch.close();
            core.generation
        };

        let inner = Arc::clone(&self.inner);
        thread::spawn(move || inner.load(generation, &config));
    }

    /// Block until no load is in progress.
    pub fn wait_loaded(&self) {
        let mut core = self.inner.core.lock();
        while !core.latch.is_open() && !core.disposed {
            self.inner.loaded.wait(&mut core);
        }
    }

    /// Replace the active reducer. The current state is left untouched.
    pub fn reduce(&self, reducer: impl Into<ReducerSpec<S>>) {
        let reducer = reducer.into();
        self.inner
            .journal
            .debug("store ReducerChanged", || format!("{reducer:?}"));
        self.inner.core.lock().reducer = Some(reducer.normalize());
    }

    /// Run `action` through the reducer.
    ///
    /// Never blocks on I/O. Errors raised by the reducer are logged and the
    /// dispatch is dropped: nothing is published or persisted.
    pub fn dispatch(&self, action: Action) {
        let mut core = self.inner.core.lock();
        if core.disposed {
            drop(core);
            self.inner.journal.debug("store ActionDispatched", || {
                format!("ignored `{}` after dispose", action.action_type)
            });
            return;
        }
        if !core.latch.is_open() {
            core.latch.defer(Deferred::Dispatch(action));
            return;
        }
        let effect = self.inner.apply(&mut core, action);
        let bridge = core.bridge.clone();
        drop(core);
        Inner::notify(bridge, effect.into_iter());
    }

    /// Observe the state through `selector`.
    ///
    /// The current state, if any, is delivered right away. After that a
    /// value is delivered whenever the projection changes. A selector
    /// returning `None` delivers nothing for that state.
    pub fn select<T, F>(&self, selector: F) -> Selection<T>
    where
        T: PartialEq + Clone + Send + 'static,
        F: Fn(&S) -> Option<T> + Send + 'static,
    {
        self.select_with(selector, |a: &T, b: &T| a == b)
    }

    /// Like [`select`](Store::select), with `compare` deciding whether two
    /// projections are equal (`true` suppresses delivery).
    ///
    /// A selector or comparator that panics is logged and ends this
    /// selection only.
    pub fn select_with<T, F, C>(&self, selector: F, compare: C) -> Selection<T>
    where
        T: Clone + Send + 'static,
        F: Fn(&S) -> Option<T> + Send + 'static,
        C: Fn(&T, &T) -> bool + Send + 'static,
    {
        self.inner
            .journal
            .debug("store StateSelected", || "new selection".to_string());
        let (tx, rx) = mpsc::channel();
        let journal = self.inner.journal.clone();
        let mut last: Option<T> = None;
        let observer: Observer<S> = Box::new(move |state: &S| {
            let outcome = panic::catch_unwind(AssertUnwindSafe(|| {
                let projected = selector(state)?;
                match &last {
                    Some(prev) if compare(prev, &projected) => None,
                    _ => Some(projected),
                }
            }));
            let projected = match outcome {
                Ok(Some(projected)) => projected,
                Ok(None) => return true,
                Err(payload) => {
                    let message = panic_message(payload.as_ref());
                    journal.error("store StateSelected", &Error::Selector { message });
                    return false;
                }
            };
            let delivered = tx.send(projected.clone()).is_ok();
            last = Some(projected);
            delivered
        });
        self.attach(Deferred::Select(observer));
        Selection::new(rx)
    }

    /// Observe the whole state.
    pub fn select_state(&self) -> Selection<S> {
        self.select(|state: &S| Some(state.clone()))
    }

    /// Observe dispatched actions whose type is in `types`.
    ///
    /// Each action arrives after the state it produced has been published.
    /// The most recent action is replayed to a new observer if it matches.
    pub fn observe<T: AsRef<str>>(&self, types: &[T]) -> Selection<Action> {
        let types: Vec<String> = types.iter().map(|t| t.as_ref().to_string()).collect();
        self.inner
            .journal
            .debug("store ActionsObserved", || format!("{types:?}"));
        let (tx, rx) = mpsc::channel();
        let observer: Observer<Action> = Box::new(move |action: &Action| {
            if !action.is_any(&types) {
                return true;
            }
            tx.send(action.clone()).is_ok()
        });
        self.attach(Deferred::Observe(observer));
        Selection::new(rx)
    }

    /// Observe accepted dispatches of the given types together with the
    /// state each one produced.
    ///
    /// Each effect arrives after its action has been published to
    /// [`observe`](Store::observe) subscribers. Like actions, the most
    /// recent effect is replayed to a new subscriber if it matches.
    pub fn effect<T: AsRef<str>>(&self, types: &[T]) -> Selection<Effect<S>> {
        let types: Vec<String> = types.iter().map(|t| t.as_ref().to_string()).collect();
        self.inner
            .journal
            .debug("store EffectsObserved", || format!("{types:?}"));
        let (tx, rx) = mpsc::channel();
        let observer: Observer<Effect<S>> = Box::new(move |effect: &Effect<S>| {
            if !effect.action.is_any(&types) {
                return true;
            }
            tx.send(effect.clone()).is_ok()
        });
        self.attach(Deferred::Effect(observer));
        Selection::new(rx)
    }

    /// Snapshot of the current state. Does not wait for a pending load.
    pub fn state(&self) -> Option<S> {
        self.inner.core.lock().state.latest().cloned()
    }

    /// Overwrite the current state, bypassing the reducer.
    ///
    /// This is the update path for a [`DebugBridge`]: `None` resets the store
    /// to having no state; `Some` is published and persisted like the result
    /// of a dispatch.
    pub fn replace_state(&self, state: Option<S>) {
        let mut core = self.inner.core.lock();
        if core.disposed {
            return;
        }
        match state {
            Some(state) => {
                self.inner
                    .journal
                    .debug("store StateChanged (replace)", || describe(&state));
                core.state.publish(state.clone());
                self.inner.persist(&state);
            }
            None => {
                self.inner
                    .journal
                    .debug("store StateChanged (replace)", || "reset".to_string());
                core.state.clear();
            }
        }
    }

    /// Install the debug bridge notified after every accepted dispatch.
    pub fn attach_bridge(&self, bridge: Arc<dyn DebugBridge<S>>) {
        self.inner.core.lock().bridge = Some(bridge);
    }

    /// Wait for any pending load, then for every scheduled write to finish.
    pub fn flush(&self) {
        self.wait_loaded();
        self.inner.persistence.flush();
    }

    /// End every selection, drop held work and shut down persistence.
    ///
    /// Pending writes are flushed before the engine stops. Idempotent.
    pub fn dispose(&self) {
        {
            let mut core = self.inner.core.lock();
            if core.disposed {
                return;
            }
            core.disposed = true;
            core.state.close();
            core.actions.close();
            core.effects.close();
            core.latch.open();
            core.bridge = None;
            self.inner.loaded.notify_all();
        }
        self.inner.persistence.dispose();
        self.inner.journal.debug("store Disposed", String::new);
    }

    fn attach(&self, deferred: Deferred<S>) {
        let mut core = self.inner.core.lock();
        if core.disposed {
            return;
        }
        if !core.latch.is_open() {
            core.latch.defer(deferred);
            return;
        }
        Inner::run_attach(&mut core, deferred);
    }
}

impl<S: State> Inner<S> {
    fn load(&self, generation: u64, config: &Config) {
        let _loading = self.loading.lock();
        if self.is_superseded(generation) {
            return;
        }

        let mut barrier = Barrier {
            inner: self,
            generation,
            loaded: None,
        };
        barrier.loaded = self.read(config);
    }

    fn read(&self, config: &Config) -> Option<S> {
        match self.persistence.configure(config) {
            Ok(Some(value)) => match serde_json::from_value::<S>(value) {
                Ok(state) => Some(state),
                Err(source) => {
                    self.journal.error("store StateLoaded", &Error::Decode { source });
                    None
                }
            },
            Ok(None) => None,
            Err(err) => {
                self.journal.error("store StateLoaded", &err);
                None
            }
        }
    }

    /// Publish the loaded state, if any, and replay everything held.
    fn open_barrier(&self, generation: u64, loaded: Option<S>) {
        let mut core = self.core.lock();
        if core.disposed || core.generation != generation {
            return;
        }
        if let Some(state) = loaded {
            self.journal
                .debug("store StateChanged (configure)", || describe(&state));
            core.state.publish(state);
        }

        let held = core.latch.open();
        let mut effects = Vec::new();
        for deferred in held {
            match deferred {
                Deferred::Dispatch(action) => effects.extend(self.apply(&mut core, action)),
                attach => Self::run_attach(&mut core, attach),
            }
        }
        self.loaded.notify_all();
        let bridge = core.bridge.clone();
        drop(core);
        Self::notify(bridge, effects.into_iter());
    }

    fn is_superseded(&self, generation: u64) -> bool {
        let core = self.core.lock();
        core.disposed || core.generation != generation
    }

    fn apply(&self, core: &mut Core<S>, action: Action) -> Option<Effect<S>> {
        self.journal
            .debug("store ActionDispatched", || describe(&action));

        let current = core.state.latest();
        let next = match &core.reducer {
            Some(reducer) => match reducer.reduce(current, &action) {
                Ok(next) => Some(next),
                Err(err) => {
                    self.journal.error("store ActionDispatched", &err);
                    return None;
                }
            },
            None => current.cloned(),
        };

        if let (Some(current), Some(next)) = (current, &next) {
            if next.version() < current.version() {
                let err = Error::VersionRegressed {
                    action: action.action_type.clone(),
                    from: current.version(),
                    to: next.version(),
                };
                self.journal.error("store ActionDispatched", &err);
                return None;
            }
        }

        if let Some(next) = &next {
            self.journal
                .debug("store StateChanged (dispatch)", || describe(next));
            core.state.publish(next.clone());
        }
        core.actions.publish(action.clone());
        let effect = Effect {
            action,
            state: next,
        };
        core.effects.publish(effect.clone());
        if let Some(next) = &effect.state {
            self.persist(next);
        }

        Some(effect)
    }

    fn persist(&self, state: &S) {
        match serde_json::to_value(state) {
            Ok(value) => self.persistence.persist(value),
            Err(source) => self.journal.error("store StateChanged", &Error::Encode { source }),
        }
    }

    fn run_attach(core: &mut Core<S>, deferred: Deferred<S>) {
        match deferred {
            Deferred::Select(observer) => core.state.subscribe(observer),
            Deferred::Observe(observer) => core.actions.subscribe(observer),
            Deferred::Effect(observer) => core.effects.subscribe(observer),
            Deferred::Dispatch(_) => {}
        }
    }

    fn notify(bridge: Option<Arc<dyn DebugBridge<S>>>, effects: impl Iterator<Item = Effect<S>>) {
        let Some(bridge) = bridge else {
            return;
        };
        for effect in effects {
            bridge.send(&effect.action, effect.state.as_ref());
        }
    }
}

/// Opens the load barrier when dropped, so a load that unwinds still
/// releases the work held behind it.
struct Barrier<'a, S: State> {
    inner: &'a Inner<S>,
    generation: u64,
    loaded: Option<S>,
}

impl<S: State> Drop for Barrier<'_, S> {
    fn drop(&mut self) {
        self.inner.open_barrier(self.generation, self.loaded.take());
    }
}

fn describe<T: serde::Serialize>(value: &T) -> String {
    serde_json::to_string(value).unwrap_or_else(|e| format!("<unserializable: {e}>"))
}

/// Builds a [`Store`] with its collaborators.
///
/// # Examples
///
/// ```
/// use statefold::{Action, Config, Document, MemoryLogger, ReducerMap, Store};
/// use std::sync::Arc;
///
/// let dir = tempfile::tempdir().unwrap();
/// let store: Store<Document> = Store::builder()
///     .logger(Arc::new(MemoryLogger::new()))
///     .reducer(ReducerMap::new(1).field("hits", |n: Option<u64>, _: &Action| n.unwrap_or(0) + 1))
///     .config(Config::default().path(dir.path()))
///     .open();
///
/// store.dispatch(Action::new("hit"));
/// assert_eq!(store.state().unwrap().fields["hits"], 1);
/// store.dispose();
/// ```
pub struct StoreBuilder<S: State> {
    logger: Option<Arc<dyn Logger>>,
    reducer: Option<ReducerSpec<S>>,
    bridge: Option<Arc<dyn DebugBridge<S>>>,
    config: Option<Config>,
}

impl<S: State> StoreBuilder<S> {
    fn new() -> Self {
        StoreBuilder {
            logger: None,
            reducer: None,
            bridge: None,
            config: None,
        }
    }

    pub fn logger(mut self, logger: Arc<dyn Logger>) -> Self {
        self.logger = Some(logger);
        self
    }

    pub fn reducer(mut self, reducer: impl Into<ReducerSpec<S>>) -> Self {
        self.reducer = Some(reducer.into());
        self
    }

    pub fn bridge(mut self, bridge: Arc<dyn DebugBridge<S>>) -> Self {
        self.bridge = Some(bridge);
        self
    }

    pub fn config(mut self, config: Config) -> Self {
        self.config = Some(config);
        self
    }

    /// Create the store, configure it and wait for the initial load.
    pub fn open(self) -> Store<S> {
        let store = match self.logger {
            Some(logger) => Store::with_logger(logger),
            None => Store::new(),
        };
        if let Some(reducer) = self.reducer {
            store.reduce(reducer);
        }
        if let Some(bridge) = self.bridge {
            store.attach_bridge(bridge);
        }
        if let Some(config) = self.config {
            store.configure(config);
            store.wait_loaded();
        }
        store
    }
}
