//! Atomic JSON persistence.
//!
//! Writes go to a temp file named with the process and thread id, are
//! flushed and synced, then renamed over the target, so a crash mid-write
//! leaves the previous file intact.

use crate::{NetError, Result};
use serde::{de::DeserializeOwned, Serialize};
use std::collections::hash_map::DefaultHasher;
use std::fs::{self, OpenOptions};
use std::hash::{Hash, Hasher};
use std::io::Write;
use std::path::Path;
use tracing::debug;

/// Read and parse a JSON file. `Ok(None)` if the file does not exist.
pub fn atomic_read_json<T: DeserializeOwned>(path: &Path) -> Result<Option<T>> {
    let contents = match fs::read_to_string(path) {
        Ok(contents) => contents,
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(None),
        Err(e) => return Err(NetError::io_with_path(e, path)),
    };

    let data = serde_json::from_str(&contents).map_err(|e| NetError::Json {
        message: format!("Failed to parse {}: {}", path.display(), e),
        source: Some(e),
    })?;
    Ok(Some(data))
}

/// Serialize `data` and atomically replace `path` with it.
pub fn atomic_write_json<T: Serialize>(path: &Path, data: &T) -> Result<()> {
    if let Some(parent) = path.parent() {
        if !parent.as_os_str().is_empty() && !parent.exists() {
            fs::create_dir_all(parent).map_err(|e| NetError::io_with_path(e, parent))?;
        }
    }

    let serialized = serde_json::to_string_pretty(data)?;
    let temp_path = path.with_extension(format!("json.{}.{}.tmp", std::process::id(), thread_id()));

    let written = (|| -> std::io::Result<()> {
        let mut file = OpenOptions::new()
            .write(true)
            .create(true)
            .truncate(true)
            .open(&temp_path)?;
        file.write_all(serialized.as_bytes())?;
        file.flush()?;
        file.sync_all()
    })();
    if let Err(e) = written {
        let _ = fs::remove_file(&temp_path);
        return Err(NetError::io_with_path(e, &temp_path));
    }

    fs::rename(&temp_path, path).map_err(|e| {
        let _ = fs::remove_file(&temp_path);
        NetError::io_with_path(e, path)
    })?;

    debug!("Atomically wrote {}", path.display());
    Ok(())
}

fn thread_id() -> u64 {
    let mut hasher = DefaultHasher::new();
    std::thread::current().id().hash(&mut hasher);
    hasher.finish()
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde::Deserialize;
    use tempfile::TempDir;

    #[derive(Debug, Serialize, Deserialize, PartialEq)]
    struct Record {
        id: String,
        count: u32,
    }

    #[test]
    fn test_write_then_read() {
        let temp_dir = TempDir::new().unwrap();
        let path = temp_dir.path().join("record.json");
        let record = Record {
            id: "a".into(),
            count: 2,
        };

        atomic_write_json(&path, &record).unwrap();
        let read: Option<Record> = atomic_read_json(&path).unwrap();
        assert_eq!(read, Some(record));
    }

    #[test]
    fn test_read_missing_is_none() {
        let temp_dir = TempDir::new().unwrap();
        let read: Option<Record> = atomic_read_json(&temp_dir.path().join("missing.json")).unwrap();
        assert!(read.is_none());
    }

    #[test]
    fn test_read_corrupt_is_json_error() {
        let temp_dir = TempDir::new().unwrap();
        let path = temp_dir.path().join("corrupt.json");
        fs::write(&path, "{ not json").unwrap();

        let result: Result<Option<Record>> = atomic_read_json(&path);
        assert!(matches!(result, Err(NetError::Json { .. })));
    }

    #[test]
    fn test_write_creates_parent_and_leaves_no_temp_files() {
        let temp_dir = TempDir::new().unwrap();
        let path = temp_dir.path().join("nested").join("record.json");
        atomic_write_json(&path, &Record { id: "b".into(), count: 0 }).unwrap();

        let entries: Vec<_> = fs::read_dir(path.parent().unwrap())
            .unwrap()
            .map(|e| e.unwrap().file_name())
            .collect();
        assert_eq!(entries, vec![std::ffi::OsString::from("record.json")]);
    }
}
