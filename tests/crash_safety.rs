mod common;

use common::{Counter, counter_store, read_json};
use serde_json::json;
use statefold::{Action, file};
use std::fs;
use std::io::Write;
use tempfile::tempdir;

/// Crash after the temp file was written but before the rename.
/// The target keeps its previous content and the orphan is ignored.
#[test]
fn test_crash_before_rename_keeps_target() {
    let dir = tempdir().unwrap();
    let path = dir.path().join("db.json");
    {
        let (store, _) = counter_store(dir.path());
        store.dispatch(Action::new("add").with("by", 7));
        store.dispose();
    }
    let before = fs::read(&path).unwrap();

    // The next state made it to the temp file, then the process died.
    fs::write(file::temp_path(&path), r#"{"version":1,"count":999}"#).unwrap();

    assert_eq!(fs::read(&path).unwrap(), before);
    let (store, _) = counter_store(dir.path());
    assert_eq!(
        store.state(),
        Some(Counter {
            version: 1,
            count: 7
        })
    );
    store.dispose();
}

/// Crash midway through writing the temp file leaves it truncated.
/// The next successful write replaces it and the target is never partial.
#[test]
fn test_partial_temp_file_is_overwritten() {
    let dir = tempdir().unwrap();
    let path = dir.path().join("db.json");
    fs::write(&path, r#"{"version":1,"count":3}"#).unwrap();
    {
        let mut tmp = fs::File::create(file::temp_path(&path)).unwrap();
        write!(tmp, r#"{{"version":1,"cou"#).unwrap();
    }

    let (store, memory) = counter_store(dir.path());
    assert!(memory.at(statefold::LogLevel::Error).is_empty());
    assert_eq!(store.state().unwrap().count, 3);

    store.dispatch(Action::new("increment"));
    store.flush();
    assert_eq!(read_json(&path), json!({"version": 1, "count": 4}));
    assert!(!file::temp_path(&path).exists());
    store.dispose();
}

/// A target truncated by something other than this store is a load error,
/// not an empty state.
#[test]
fn test_truncated_target_is_not_treated_as_missing() {
    let dir = tempdir().unwrap();
    let path = dir.path().join("db.json");
    fs::write(&path, "").unwrap();

    let (store, memory) = counter_store(dir.path());
    assert_eq!(memory.at(statefold::LogLevel::Error).len(), 1);
    assert_eq!(store.state(), None);
    assert_eq!(fs::read(&path).unwrap(), b"");
    store.dispose();
}

/// Every write either lands whole or not at all: a reader polling the
/// target during a burst never sees a partial document.
#[test]
fn test_concurrent_reader_never_sees_partial_file() {
    let dir = tempdir().unwrap();
    let path = dir.path().join("db.json");
    let (store, _) = counter_store(dir.path());
    store.dispatch(Action::new("increment"));
    store.flush();

    let reader = {
        let path = path.clone();
        std::thread::spawn(move || {
            for _ in 0..200 {
                let text = fs::read_to_string(&path).unwrap();
                let parsed: Counter = serde_json::from_str(&text).unwrap();
                assert!(parsed.count >= 1);
            }
        })
    };
    for _ in 0..200 {
        store.dispatch(Action::new("increment"));
    }
    reader.join().unwrap();
    store.flush();
    assert_eq!(read_json(&path)["count"], json!(201));
    store.dispose();
}
