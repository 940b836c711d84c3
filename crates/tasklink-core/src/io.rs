use crate::error::Result;
use serde::de::DeserializeOwned;
use serde::Serialize;
use std::io::Write;
use std::path::Path;
use tempfile::NamedTempFile;

/// Atomically write `data` to `path` using a tempfile in the same directory.
/// A crash before the rename leaves the previous contents in place.
pub fn atomic_write(path: &Path, data: &[u8]) -> Result<()> {
    if let Some(parent) = path.parent() {
        std::fs::create_dir_all(parent)?;
    }
    let dir = path.parent().unwrap_or(Path::new("."));
    let mut tmp = NamedTempFile::new_in(dir)?;
    tmp.write_all(data)?;
    tmp.as_file().sync_all()?;
    tmp.persist(path).map_err(|e| e.error)?;
    Ok(())
}

/// Serialize `value` as pretty JSON and write it atomically.
pub fn write_json<T: Serialize>(path: &Path, value: &T) -> Result<()> {
    let mut data = serde_json::to_vec_pretty(value)?;
    data.push(b'\n');
    atomic_write(path, &data)
}

/// Read a JSON file, falling back to `T::default()` when the file is
/// missing, unreadable, or not valid JSON for `T`.
pub fn read_json_or_default<T: DeserializeOwned + Default>(path: &Path) -> T {
    read_json(path).unwrap_or_default()
}

/// Read a JSON file. `None` when missing or corrupt.
pub fn read_json<T: DeserializeOwned>(path: &Path) -> Option<T> {
    let data = std::fs::read(path).ok()?;
    match serde_json::from_slice(&data) {
        Ok(v) => Some(v),
        Err(e) => {
            tracing::debug!("ignoring unreadable {}: {e}", path.display());
            None
        }
    }
}

/// Remove a file. Silently succeeds if the file is gone.
pub fn remove_if_exists(path: &Path) -> Result<()> {
    match std::fs::remove_file(path) {
        Ok(()) => Ok(()),
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(()),
        Err(e) => Err(e.into()),
    }
}

/// Append text to a file, creating it (and its parents) if needed.
pub fn append_text(path: &Path, text: &str) -> Result<()> {
    if let Some(parent) = path.parent() {
        std::fs::create_dir_all(parent)?;
    }
    let mut f = std::fs::OpenOptions::new()
        .create(true)
        .append(true)
        .open(path)?;
    f.write_all(text.as_bytes())?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::BTreeMap;
    use tempfile::TempDir;

    #[test]
    fn atomic_write_creates_file() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("test.json");
        atomic_write(&path, b"{}").unwrap();
        assert_eq!(std::fs::read_to_string(&path).unwrap(), "{}");
    }

    #[test]
    fn atomic_write_creates_parents() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("a/b/c/test.json");
        atomic_write(&path, b"data").unwrap();
        assert!(path.exists());
    }

    #[test]
    fn abandoned_tempfile_leaves_previous_value() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("task-map.json");
        let mut map = BTreeMap::new();
        map.insert("1".to_string(), "remote-1".to_string());
        write_json(&path, &map).unwrap();

        // Simulate a crash after writing the temp file but before the rename.
        {
            let mut tmp = NamedTempFile::new_in(dir.path()).unwrap();
            tmp.write_all(b"{\"1\": \"rem").unwrap();
        }

        let read: BTreeMap<String, String> = read_json_or_default(&path);
        assert_eq!(read, map);
    }

    #[test]
    fn corrupt_json_reads_as_default() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("projects.json");
        std::fs::write(&path, b"{ not json").unwrap();
        let read: BTreeMap<String, String> = read_json_or_default(&path);
        assert!(read.is_empty());
    }

    #[test]
    fn missing_json_reads_as_default() {
        let dir = TempDir::new().unwrap();
        let read: Vec<String> = read_json_or_default(&dir.path().join("nope.json"));
        assert!(read.is_empty());
    }

    #[test]
    fn remove_if_exists_is_idempotent() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("active-plan.json");
        std::fs::write(&path, b"{}").unwrap();
        remove_if_exists(&path).unwrap();
        remove_if_exists(&path).unwrap();
        assert!(!path.exists());
    }

    #[test]
    fn append_text_appends() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("logs/sync.log");
        append_text(&path, "one\n").unwrap();
        append_text(&path, "two\n").unwrap();
        assert_eq!(std::fs::read_to_string(&path).unwrap(), "one\ntwo\n");
    }
}
