//! Minimal CLI todo app: dispatch a few actions, watch the state, reopen
//! the file.

use serde::{Deserialize, Serialize};
use statefold::{Action, Config, LogLevel, ReducerSpec, Store, Versioned};

#[derive(Clone, PartialEq, Serialize, Deserialize)]
struct TodoState {
    version: u64,
    items: Vec<TodoItem>,
    next_id: u64,
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

#[derive(Clone, PartialEq, Serialize, Deserialize)]
struct TodoItem {
    id: u64,
    text: String,
    done: bool,
}

fn todo_reducer(mut state: TodoState, action: &Action) -> TodoState {
    match action.action_type.as_str() {
        "todo_added" => {
            let text = action
                .get("text")
                .and_then(|v| v.as_str())
                .unwrap_or("")
                .to_string();
            state.items.push(TodoItem {
                id: state.next_id,
                text,
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
        _ => {}
    }
    state
}

fn open(dir: &std::path::Path) -> Store<TodoState> {
    Store::builder()
        .reducer(ReducerSpec::fold(todo_reducer))
        .config(
            Config::default()
                .path(dir)
                .log_level(LogLevel::Info)
                .log_to_console(true),
        )
        .open()
}

fn main() -> Result<(), Box<dyn std::error::Error>> {
    let dir = tempfile::tempdir()?;

    {
        let store = open(dir.path());
        let counts = store.select(|s: &TodoState| Some(s.items.len()));
        let completions = store.observe(&["todo_completed"]);

        store.dispatch(Action::new("todo_added").with("text", "buy milk"));
        println!("Added: buy milk");

        store.dispatch(Action::new("todo_added").with("text", "write docs"));
        println!("Added: write docs");

        store.dispatch(Action::new("todo_completed").with("id", 0));
        println!("Completed: buy milk");

        println!("\nItem counts seen: {:?}", counts.drain());
        println!("Completions seen: {}", completions.drain().len());

        // Writes the last state before returning.
        store.dispose();
    }

    println!("\nOn disk:\n{}", std::fs::read_to_string(dir.path().join("db.json"))?);

    // Reopening loads the file back.
    let store = open(dir.path());
    if let Some(todos) = store.state() {
        println!("\nTodos:");
        for item in &todos.items {
            let check = if item.done { "x" } else { " " };
            println!("  [{}] {}", check, item.text);
        }
    }
    store.dispose();

    Ok(())
}
