mod action;
mod bridge;
mod broadcast;
mod config;
mod error;
pub mod file;
mod latch;
mod logger;
mod migration;
mod persist;
mod reducer;
mod store;

pub use action::Action;
pub use bridge::DebugBridge;
pub use broadcast::{Broadcast, Observer, Selection};
pub use config::{Config, DEFAULT_WRITE_INTERVAL, LockMode};
pub use error::{Error, ErrorKind, Result};
pub use latch::Latch;
pub use logger::{FacadeLogger, Journal, LogLevel, LogRecord, Logger, MemoryLogger};
pub use migration::{Migration, UpgradeFn, migrate, version_of};
pub use persist::{Persistence, Phase, content_hash};
pub use reducer::{
    Document, OnReducer, ReduceFn, Reducer, ReducerMap, ReducerSpec, State, Versioned,
};
pub use store::{Effect, Store, StoreBuilder};
