//! On-disk primitives for the state file.
//!
//! The state file is a single JSON document holding the latest state:
//!
//! ```text
//! $ cat db.json | jq .
//! {
//!   "version": 3,
//!   "todos": { "items": [...], "next_id": 3 }
//! }
//! ```
//!
//! Rewrites go through [`write_atomic`]: the new content lands in a temp
//! sibling (`db.temp.json`), is synced, then renamed over the target. If the
//! process dies mid-write the target still holds the previous complete
//! content; the orphaned temp file is never read.

use crate::error::{Error, Result};
use serde_json::Value;
use std::env;
use std::ffi::OsString;
use std::fs;
use std::io::{self, Write};
use std::path::{Path, PathBuf};

/// Default state file name.
pub const DEFAULT_FILE_NAME: &str = "db.json";

/// Resolve the state file path from an optional directory and file name.
///
/// A missing directory means the current working directory; relative
/// directories are resolved against it.
pub fn resolve_path(dir: Option<&Path>, file_name: Option<&str>) -> io::Result<PathBuf> {
    let base = match dir {
        Some(dir) if dir.is_absolute() => dir.to_path_buf(),
        Some(dir) => env::current_dir()?.join(dir),
        None => env::current_dir()?,
    };
    Ok(base.join(file_name.unwrap_or(DEFAULT_FILE_NAME)))
}

/// Temp sibling used by [`write_atomic`].
///
/// `.temp` goes before the extension: `db.json` becomes `db.temp.json`,
/// `state` becomes `state.temp`.
pub fn temp_path(path: &Path) -> PathBuf {
    let stem = path.file_stem().map(OsString::from).unwrap_or_default();
    let mut name = stem;
    name.push(".temp");
    if let Some(ext) = path.extension() {
        name.push(".");
        name.push(ext);
    }
    path.with_file_name(name)
}

/// Lock file guarding a state file against a second owner.
pub fn lock_path(path: &Path) -> PathBuf {
    let mut name = path.file_name().map(OsString::from).unwrap_or_default();
    name.push(".lock");
    path.with_file_name(name)
}

/// Returns `true` if the state file exists.
pub fn exists(path: &Path) -> io::Result<bool> {
    match fs::metadata(path) {
        Ok(_) => Ok(true),
        Err(e) if e.kind() == io::ErrorKind::NotFound => Ok(false),
        Err(e) => Err(e),
    }
}

/// Write `bytes` to `path` atomically.
///
/// Writes to the temp sibling first, syncs, then renames to the final path.
pub fn write_atomic(path: &Path, bytes: &[u8]) -> io::Result<()> {
    let tmp_path = temp_path(path);

    let mut file = fs::File::create(&tmp_path)?;
    file.write_all(bytes)?;
    file.sync_data()?;
    drop(file);

    fs::rename(&tmp_path, path)
}

/// Serialize `state` and write it atomically to `path`.
pub fn save(path: &Path, state: &Value) -> Result<()> {
    let bytes = encode(state)?;
    write_atomic(path, &bytes).map_err(|source| Error::Write {
        path: path.to_path_buf(),
        source,
    })
}

/// Serialize a state the way it is stored on disk.
pub fn encode(state: &Value) -> Result<Vec<u8>> {
    serde_json::to_vec(state).map_err(|source| Error::Encode { source })
}

/// Load the state file.
///
/// Returns `Ok(None)` if the file doesn't exist. An unreadable or malformed
/// file is an error, never treated as missing.
pub fn load(path: &Path) -> Result<Option<Value>> {
    let contents = match fs::read_to_string(path) {
        Ok(c) => c,
        Err(e) if e.kind() == io::ErrorKind::NotFound => return Ok(None),
        Err(source) => {
            return Err(Error::Read {
                path: path.to_path_buf(),
                source,
            });
        }
    };

    serde_json::from_str(&contents)
        .map(Some)
        .map_err(|source| Error::Parse {
            path: path.to_path_buf(),
            source,
        })
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;
    use tempfile::tempdir;

    #[test]
    fn test_temp_path_inserts_before_extension() {
        assert_eq!(temp_path(Path::new("/a/db.json")), PathBuf::from("/a/db.temp.json"));
        assert_eq!(temp_path(Path::new("/a/state")), PathBuf::from("/a/state.temp"));
        assert_eq!(
            temp_path(Path::new("/a/my.db.json")),
            PathBuf::from("/a/my.db.temp.json")
        );
    }

    #[test]
    fn test_lock_path() {
        assert_eq!(lock_path(Path::new("/a/db.json")), PathBuf::from("/a/db.json.lock"));
    }

    #[test]
    fn test_resolve_defaults_to_cwd() {
        let path = resolve_path(None, None).unwrap();
        assert_eq!(path, env::current_dir().unwrap().join("db.json"));

        let path = resolve_path(Some(Path::new("data")), Some("s.json")).unwrap();
        assert_eq!(path, env::current_dir().unwrap().join("data").join("s.json"));
    }

    #[test]
    fn test_save_then_load() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("db.json");
        save(&path, &json!({"version": 1, "n": 3})).unwrap();
        assert_eq!(load(&path).unwrap(), Some(json!({"version": 1, "n": 3})));
        assert!(!temp_path(&path).exists());
    }

    #[test]
    fn test_load_missing_is_none() {
        let dir = tempdir().unwrap();
        assert_eq!(load(&dir.path().join("db.json")).unwrap(), None);
    }

    #[test]
    fn test_load_corrupt_is_parse_error() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("db.json");
        fs::write(&path, "{\"version\": 1,").unwrap();
        assert!(matches!(load(&path), Err(Error::Parse { .. })));
    }

    #[test]
    fn test_save_into_missing_dir_fails() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("missing").join("db.json");
        assert!(matches!(save(&path, &json!({})), Err(Error::Write { .. })));
    }
}
