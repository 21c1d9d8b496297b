//! Reducer shapes and their normalization into one callable.

use crate::action::Action;
use crate::error::{Error, Result, panic_message};
use crate::migration;
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use std::fmt;
use std::panic::{self, AssertUnwindSafe};
use std::sync::Arc;

/// State that carries a schema version.
pub trait Versioned {
    fn version(&self) -> u64;
}

impl Versioned for Value {
    /// The integer `version` field, or 0 when absent.
    fn version(&self) -> u64 {
        migration::version_of(self).unwrap_or(0)
    }
}

/// Everything a store needs from its state type.
pub trait State:
    Versioned + Serialize + DeserializeOwned + Clone + PartialEq + Send + Sync + 'static
{
}

impl<S> State for S where
    S: Versioned + Serialize + DeserializeOwned + Clone + PartialEq + Send + Sync + 'static
{
}

/// A caller-supplied reducer: current state (absent on first call) and an
/// action in, next state out.
///
/// Reducers should be pure and must return a fully initialized default state,
/// version included, when called with `None`.
pub type ReduceFn<S> = Arc<dyn Fn(Option<&S>, &Action) -> S + Send + Sync>;

type NormalizedFn<S> = Arc<dyn Fn(Option<&S>, &Action) -> Result<S> + Send + Sync>;

type OnFn<T> = Arc<dyn Fn(T, &Action) -> T + Send + Sync>;

type FieldFn = Arc<dyn Fn(Option<&Value>, &Action) -> std::result::Result<Value, String> + Send + Sync>;

/// The two shapes a reducer can be registered in.
///
/// [`Store::reduce`](crate::Store::reduce) resolves either into a single
/// [`Reducer`] once, at registration.
pub enum ReducerSpec<S> {
    /// One function over the whole state.
    Function(ReduceFn<S>),
    /// One reducer per top-level field.
    FieldMap(ReducerMap),
}

impl<S: State> ReducerSpec<S> {
    /// Wrap a whole-state reducer.
    ///
    /// # Examples
    ///
    /// ```
    /// use statefold::{Action, ReducerSpec, Versioned};
    /// use serde::{Deserialize, Serialize};
    ///
    /// #[derive(Clone, PartialEq, Serialize, Deserialize)]
    /// struct Counter { version: u64, count: u64 }
    ///
    /// impl Versioned for Counter {
    ///     fn version(&self) -> u64 { self.version }
    /// }
    ///
    /// let spec = ReducerSpec::function(|state: Option<&Counter>, action: &Action| {
    ///     let mut next = state.cloned().unwrap_or(Counter { version: 1, count: 0 });
    ///     if action.action_type == "increment" {
    ///         next.count += 1;
    ///     }
    ///     next
    /// });
    /// let reducer = spec.normalize();
    /// let state = reducer.reduce(None, &Action::new("increment")).unwrap();
    /// assert_eq!(state.count, 1);
    /// ```
    pub fn function<F>(reducer: F) -> Self
    where
        F: Fn(Option<&S>, &Action) -> S + Send + Sync + 'static,
    {
        ReducerSpec::Function(Arc::new(reducer))
    }

    /// Wrap an owned fold `fn(S, &Action) -> S`, starting from `S::default()`.
    pub fn fold(reducer: fn(S, &Action) -> S) -> Self
    where
        S: Default,
    {
        ReducerSpec::function(move |state: Option<&S>, action: &Action| {
            reducer(state.cloned().unwrap_or_default(), action)
        })
    }

    /// Start a reducer that begins at `initial` and runs only the handlers
    /// registered for the dispatched action's type.
    ///
    /// # Examples
    ///
    /// ```
    /// use statefold::{Action, ReducerSpec, Versioned};
    /// use serde::{Deserialize, Serialize};
    ///
    /// #[derive(Clone, PartialEq, Serialize, Deserialize)]
    /// struct Counter { version: u64, count: i64 }
    ///
    /// impl Versioned for Counter {
    ///     fn version(&self) -> u64 { self.version }
    /// }
    ///
    /// let spec: ReducerSpec<Counter> = ReducerSpec::create(Counter { version: 1, count: 0 })
    ///     .on(&["increment"], |mut s, _| { s.count += 1; s })
    ///     .on(&["reset"], |mut s, _| { s.count = 0; s })
    ///     .into();
    /// let reducer = spec.normalize();
    /// let state = reducer.reduce(None, &Action::new("increment")).unwrap();
    /// assert_eq!(state.count, 1);
    /// ```
    pub fn create(initial: S) -> OnReducer<S> {
        OnReducer::new(initial)
    }

    /// Resolve into the single reducer the store calls on every dispatch.
    pub fn normalize(self) -> Reducer<S> {
        let reduce: NormalizedFn<S> = match self {
            ReducerSpec::Function(f) => {
                Arc::new(move |state: Option<&S>, action: &Action| Ok(f(state, action)))
            }
            ReducerSpec::FieldMap(map) => map.combine(),
        };
        Reducer { reduce }
    }
}

impl<S> From<ReducerMap> for ReducerSpec<S> {
    fn from(map: ReducerMap) -> Self {
        ReducerSpec::FieldMap(map)
    }
}

impl<S: State> From<OnReducer<S>> for ReducerSpec<S> {
    fn from(reducer: OnReducer<S>) -> Self {
        ReducerSpec::function(move |state: Option<&S>, action: &Action| {
            reducer.apply(state.cloned(), action)
        })
    }
}

impl<S> fmt::Debug for ReducerSpec<S> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ReducerSpec::Function(_) => f.write_str("ReducerSpec::Function"),
            ReducerSpec::FieldMap(map) => f.debug_tuple("ReducerSpec::FieldMap").field(map).finish(),
        }
    }
}

/// A normalized reducer.
///
/// Panics raised by the wrapped function are caught and reported as
/// [`Error::Reducer`].
pub struct Reducer<S> {
    reduce: NormalizedFn<S>,
}

impl<S> Clone for Reducer<S> {
    fn clone(&self) -> Self {
        Reducer {
            reduce: Arc::clone(&self.reduce),
        }
    }
}

impl<S> Reducer<S> {
    /// Compute the next state.
    ///
    /// # Errors
    ///
    /// [`Error::Reducer`] if the reducer panics or its result cannot be
    /// built into `S`.
    pub fn reduce(&self, state: Option<&S>, action: &Action) -> Result<S> {
        match panic::catch_unwind(AssertUnwindSafe(|| (self.reduce)(state, action))) {
            Ok(result) => result,
            Err(payload) => Err(Error::Reducer {
                action: action.action_type.clone(),
                message: panic_message(payload.as_ref()),
            }),
        }
    }
}

impl<S> fmt::Debug for Reducer<S> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str("Reducer")
    }
}

/// A reducer built from an initial value and handlers keyed by action type.
///
/// Starts from the current value, or a clone of `initial` when there is
/// none, and threads it through every handler registered for the action's
/// type, in registration order. Other actions return the value unchanged.
/// Use it whole through [`ReducerSpec::create`] or for one field through
/// [`ReducerMap::on_field`].
#[derive(Clone)]
pub struct OnReducer<T> {
    initial: T,
    handlers: Vec<(Vec<String>, OnFn<T>)>,
}

impl<T: Clone> OnReducer<T> {
    pub fn new(initial: T) -> Self {
        OnReducer {
            initial,
            handlers: Vec::new(),
        }
    }

    /// Run `handler` for actions whose type is in `types`.
    pub fn on<A, F>(mut self, types: &[A], handler: F) -> Self
    where
        A: AsRef<str>,
        F: Fn(T, &Action) -> T + Send + Sync + 'static,
    {
        let types = types.iter().map(|t| t.as_ref().to_string()).collect();
        self.handlers.push((types, Arc::new(handler)));
        self
    }

    /// Compute the next value.
    pub fn apply(&self, state: Option<T>, action: &Action) -> T {
        let start = state.unwrap_or_else(|| self.initial.clone());
        self.handlers
            .iter()
            .filter(|(types, _)| action.is_any(types.as_slice()))
            .fold(start, |state, (_, handler)| handler(state, action))
    }
}

impl<T> fmt::Debug for OnReducer<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let types: Vec<&Vec<String>> = self.handlers.iter().map(|(types, _)| types).collect();
        f.debug_struct("OnReducer").field("on", &types).finish()
    }
}

/// Per-field reducers combined into a whole-state reducer.
///
/// Each field reducer sees only its own field's value. The combined reducer
/// keeps fields it has no reducer for, and takes `version` from the current
/// state, falling back to `default_version` when there is no state yet.
///
/// # Examples
///
/// ```
/// use statefold::{Action, ReducerMap, ReducerSpec};
/// use serde_json::{json, Value};
///
/// let map = ReducerMap::new(1)
///     .field("count", |count: Option<u64>, action: &Action| {
///         let count = count.unwrap_or(0);
///         if action.action_type == "increment" { count + 1 } else { count }
///     });
/// let reducer = ReducerSpec::<Value>::from(map).normalize();
///
/// let state = reducer.reduce(None, &Action::new("increment")).unwrap();
/// assert_eq!(state, json!({"version": 1, "count": 1}));
/// ```
#[derive(Clone)]
pub struct ReducerMap {
    default_version: u64,
    fields: Vec<(String, FieldFn)>,
}

impl ReducerMap {
    /// An empty map whose combined reducer starts new states at
    /// `default_version`.
    pub fn new(default_version: u64) -> Self {
        ReducerMap {
            default_version,
            fields: Vec::new(),
        }
    }

    /// Register a typed reducer for the field `name`.
    ///
    /// The field reducer receives `None` when the state, or the field, does
    /// not exist yet. Registering `version` is ignored; registering the same
    /// name twice keeps the later reducer.
    pub fn field<T, F>(self, name: impl Into<String>, reducer: F) -> Self
    where
        T: Serialize + DeserializeOwned + 'static,
        F: Fn(Option<T>, &Action) -> T + Send + Sync + 'static,
    {
        self.insert(
            name.into(),
            Arc::new(move |value: Option<&Value>, action: &Action| {
                let current = match value {
                    Some(Value::Null) | None => None,
                    Some(value) => Some(T::deserialize(value).map_err(|e| e.to_string())?),
                };
                serde_json::to_value(reducer(current, action)).map_err(|e| e.to_string())
            }),
        )
    }

    /// Register an untyped reducer for the field `name`.
    pub fn json_field<F>(self, name: impl Into<String>, reducer: F) -> Self
    where
        F: Fn(Option<&Value>, &Action) -> Value + Send + Sync + 'static,
    {
        self.insert(
            name.into(),
            Arc::new(move |value: Option<&Value>, action: &Action| Ok(reducer(value, action))),
        )
    }

    /// Register an [`OnReducer`] for the field `name`.
    pub fn on_field<T>(self, name: impl Into<String>, reducer: OnReducer<T>) -> Self
    where
        T: Serialize + DeserializeOwned + Clone + Send + Sync + 'static,
    {
        self.field(name, move |value: Option<T>, action: &Action| {
            reducer.apply(value, action)
        })
    }

    fn insert(mut self, name: String, reducer: FieldFn) -> Self {
        if name == "version" {
            return self;
        }
        self.fields.retain(|(existing, _)| *existing != name);
        self.fields.push((name, reducer));
        self
    }

    /// Registered field names, in registration order.
    pub fn field_names(&self) -> impl Iterator<Item = &str> {
        self.fields.iter().map(|(name, _)| name.as_str())
    }

    fn combine<S: State>(self) -> NormalizedFn<S> {
        Arc::new(move |state: Option<&S>, action: &Action| {
            let fail = |message: String| Error::Reducer {
                action: action.action_type.clone(),
                message,
            };

            let (mut fields, version) = match state {
                Some(state) => match serde_json::to_value(state) {
                    Ok(Value::Object(fields)) => (fields, state.version()),
                    Ok(_) => return Err(fail("state is not a JSON object".to_string())),
                    Err(e) => return Err(fail(e.to_string())),
                },
                None => (Map::new(), self.default_version),
            };

            for (name, reducer) in &self.fields {
                let next = reducer(fields.get(name), action)
                    .map_err(|e| fail(format!("field `{name}`: {e}")))?;
                fields.insert(name.clone(), next);
            }
            fields.insert("version".to_string(), Value::from(version));

            S::deserialize(Value::Object(fields)).map_err(|e| fail(e.to_string()))
        })
    }
}

impl fmt::Debug for ReducerMap {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ReducerMap")
            .field("default_version", &self.default_version)
            .field("fields", &self.field_names().collect::<Vec<_>>())
            .finish()
    }
}

/// A versioned envelope for states that are just a bag of JSON fields.
///
/// Handy with [`ReducerMap`] when the application has no state struct.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct Document {
    pub version: u64,
    #[serde(flatten)]
    pub fields: Map<String, Value>,
}

impl Versioned for Document {
    fn version(&self) -> u64 {
        self.version
    }
}
