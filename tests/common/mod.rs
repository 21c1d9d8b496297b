#![allow(dead_code)]

use serde::{Deserialize, Serialize};
use statefold::{Action, Config, LogLevel, MemoryLogger, ReducerSpec, Store, Versioned};
use std::path::Path;
use std::sync::Arc;
use std::time::Duration;

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct Counter {
    pub version: u64,
    pub count: i64,
}

impl Default for Counter {
    fn default() -> Self {
        Counter {
            version: 1,
            count: 0,
        }
    }
}

impl Versioned for Counter {
    fn version(&self) -> u64 {
        self.version
    }
}

pub fn counter_reducer(mut state: Counter, action: &Action) -> Counter {
    match action.action_type.as_str() {
        "increment" => state.count += 1,
        "decrement" => state.count -= 1,
        "add" => state.count += action.get("by").and_then(|v| v.as_i64()).unwrap_or(0),
        "downgrade" => state.version = 0,
        "explode" => panic!("counter exploded"),
        _ => {}
    }
    state
}

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct TodoState {
    pub version: u64,
    pub items: Vec<TodoItem>,
    pub next_id: u64,
}

impl Default for TodoState {
    fn default() -> Self {
        TodoState {
            version: 1,
            items: Vec::new(),
            next_id: 0,
        }
    }
}

impl Versioned for TodoState {
    fn version(&self) -> u64 {
        self.version
    }
}

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct TodoItem {
    pub id: u64,
    pub text: String,
    pub done: bool,
}

pub fn todo_reducer(mut state: TodoState, action: &Action) -> TodoState {
    match action.action_type.as_str() {
        "todo_added" => {
            state.items.push(TodoItem {
                id: state.next_id,
                text: action
                    .get("text")
                    .and_then(|v| v.as_str())
                    .unwrap_or("")
                    .to_string(),
                done: false,
            });
            state.next_id += 1;
        }
        "todo_completed" => {
            let id = action.get("id").and_then(|v| v.as_u64()).unwrap_or(0);
            if let Some(item) = state.items.iter_mut().find(|i| i.id == id) {
                item.done = true;
            }
        }
        "todo_deleted" => {
            let id = action.get("id").and_then(|v| v.as_u64()).unwrap_or(0);
            state.items.retain(|i| i.id != id);
        }
        _ => {}
    }
    state
}

pub fn add_todo(text: &str) -> Action {
    Action::new("todo_added").with("text", text)
}

/// Config for `dir` that writes immediately and logs everything.
pub fn config(dir: &Path) -> Config {
    Config::default()
        .path(dir)
        .write_interval(Duration::ZERO)
        .log_level(LogLevel::Debug)
}

/// A counter store with an in-memory log, configured on `dir` and loaded.
pub fn counter_store(dir: &Path) -> (Store<Counter>, MemoryLogger) {
    let memory = MemoryLogger::new();
    let store = Store::builder()
        .logger(Arc::new(memory.clone()))
        .reducer(ReducerSpec::fold(counter_reducer))
        .config(config(dir))
        .open();
    (store, memory)
}

pub fn todo_store(dir: &Path) -> (Store<TodoState>, MemoryLogger) {
    let memory = MemoryLogger::new();
    let store = Store::builder()
        .logger(Arc::new(memory.clone()))
        .reducer(ReducerSpec::fold(todo_reducer))
        .config(config(dir))
        .open();
    (store, memory)
}

pub fn read_json(path: &Path) -> serde_json::Value {
    let text = std::fs::read_to_string(path).unwrap();
    serde_json::from_str(&text).unwrap()
}

pub const WAIT: Duration = Duration::from_secs(5);
