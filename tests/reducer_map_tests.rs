mod common;

use common::config;
use serde::{Deserialize, Serialize};
use serde_json::{Value, json};
use statefold::{Action, Document, MemoryLogger, OnReducer, ReducerMap, Store, Versioned};
use std::fs;
use std::sync::Arc;
use tempfile::tempdir;

#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
struct SubState1 {
    value1: Option<String>,
}

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
struct SubState2 {
    value2: u32,
}

impl Default for SubState2 {
    fn default() -> Self {
        SubState2 { value2: 7 }
    }
}

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
struct AppState {
    version: u64,
    sub_state1: SubState1,
    sub_state2: SubState2,
}

impl Versioned for AppState {
    fn version(&self) -> u64 {
        self.version
    }
}

fn app_reducers() -> ReducerMap {
    ReducerMap::new(1)
        .field("subState1", |state: Option<SubState1>, action: &Action| {
            if action.action_type == "test" {
                SubState1 {
                    value1: Some("test1".to_string()),
                }
            } else {
                state.unwrap_or_default()
            }
        })
        .field("subState2", |state: Option<SubState2>, _: &Action| {
            state.unwrap_or_default()
        })
}

#[test]
fn test_field_reducers_build_the_state() {
    let dir = tempdir().unwrap();
    let store: Store<AppState> = Store::builder()
        .logger(Arc::new(MemoryLogger::new()))
        .reducer(app_reducers())
        .config(config(dir.path()))
        .open();

    store.dispatch(Action::new("test"));
    let state = store.select_state().try_recv().unwrap();
    assert_eq!(
        state,
        AppState {
            version: 1,
            sub_state1: SubState1 {
                value1: Some("test1".to_string()),
            },
            sub_state2: SubState2 { value2: 7 },
        }
    );
    store.dispose();
}

#[test]
fn test_loaded_version_and_unknown_fields_survive() {
    let dir = tempdir().unwrap();
    let path = dir.path().join("db.json");
    fs::write(
        &path,
        r#"{"version":4,"hits":2,"legacy":{"keep":true}}"#,
    )
    .unwrap();

    let store: Store<Document> = Store::builder()
        .logger(Arc::new(MemoryLogger::new()))
        .reducer(ReducerMap::new(1).field("hits", |n: Option<u64>, _: &Action| {
            n.unwrap_or(0) + 1
        }))
        .config(config(dir.path()))
        .open();

    store.dispatch(Action::new("hit"));
    store.flush();

    let on_disk: Value = serde_json::from_str(&fs::read_to_string(&path).unwrap()).unwrap();
    assert_eq!(on_disk, json!({"version": 4, "hits": 3, "legacy": {"keep": true}}));
    store.dispose();
}

#[test]
fn test_field_reducers_see_only_their_field() {
    let dir = tempdir().unwrap();
    let store: Store<Document> = Store::builder()
        .logger(Arc::new(MemoryLogger::new()))
        .reducer(
            ReducerMap::new(1)
                .json_field("left", |v: Option<&Value>, action: &Action| {
                    match action.action_type.as_str() {
                        "left" => json!(v.and_then(Value::as_u64).unwrap_or(0) + 1),
                        _ => v.cloned().unwrap_or(json!(0)),
                    }
                })
                .json_field("right", |v: Option<&Value>, action: &Action| {
                    match action.action_type.as_str() {
                        "right" => json!(v.and_then(Value::as_u64).unwrap_or(0) + 1),
                        _ => v.cloned().unwrap_or(json!(0)),
                    }
                }),
        )
        .config(config(dir.path()))
        .open();

    store.dispatch(Action::new("left"));
    store.dispatch(Action::new("left"));
    store.dispatch(Action::new("right"));

    let doc = store.state().unwrap();
    assert_eq!(doc.version, 1);
    assert_eq!(doc.fields["left"], json!(2));
    assert_eq!(doc.fields["right"], json!(1));
    store.dispose();
}

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
struct Person {
    name: String,
}

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
struct Pet {
    kind: String,
    name: String,
}

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
struct Household {
    version: u64,
    person: Person,
    pet: Pet,
}

impl Versioned for Household {
    fn version(&self) -> u64 {
        self.version
    }
}

fn household_reducers() -> ReducerMap {
    ReducerMap::new(1)
        .on_field(
            "person",
            OnReducer::new(Person {
                name: "Ann".to_string(),
            })
            .on(&["ChangePersonNameAction"], |mut person: Person, action: &Action| {
                if let Some(name) = action.get("name").and_then(Value::as_str) {
                    person.name = name.to_string();
                }
                person
            }),
        )
        .on_field(
            "pet",
            OnReducer::new(Pet {
                kind: "cat".to_string(),
                name: "Tom".to_string(),
            })
            .on(&["ChangePetNameAction"], |mut pet: Pet, action: &Action| {
                if let Some(name) = action.get("name").and_then(Value::as_str) {
                    pet.name = name.to_string();
                }
                pet
            })
            .on(&["AdoptDogAction"], |_: Pet, _: &Action| Pet {
                kind: "dog".to_string(),
                name: "Rex".to_string(),
            }),
        )
}

#[test]
fn test_on_field_handlers_update_their_slice() {
    let dir = tempdir().unwrap();
    let store: Store<Household> = Store::builder()
        .logger(Arc::new(MemoryLogger::new()))
        .reducer(household_reducers())
        .config(config(dir.path()))
        .open();

    store.dispatch(Action::new("init"));
    assert_eq!(store.state().unwrap().person.name, "Ann");
    assert_eq!(store.state().unwrap().pet.name, "Tom");

    store.dispatch(Action::new("ChangePersonNameAction").with("name", "Bob"));
    store.dispatch(Action::new("ChangePetNameAction").with("name", "Felix"));
    assert_eq!(
        store.state(),
        Some(Household {
            version: 1,
            person: Person {
                name: "Bob".to_string()
            },
            pet: Pet {
                kind: "cat".to_string(),
                name: "Felix".to_string()
            },
        })
    );

    store.dispatch(Action::new("AdoptDogAction"));
    let state = store.state().unwrap();
    assert_eq!(state.person.name, "Bob");
    assert_eq!(state.pet.kind, "dog");
    store.dispose();
}
