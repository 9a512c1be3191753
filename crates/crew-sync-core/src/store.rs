//! Local key-value persistence for queued writes.

use std::collections::HashMap;
use std::fs;
use std::io::{self, Write};
use std::path::{Path, PathBuf};
use std::sync::{Mutex, PoisonError};

use tempfile::NamedTempFile;

/// Synchronous string store, one value per key.
///
/// Reads and writes never suspend; callers treat them as fast local I/O.
pub trait KeyValueStore: Send + Sync {
    fn load(&self, key: &str) -> io::Result<Option<String>>;
    fn save(&self, key: &str, value: &str) -> io::Result<()>;
}

/// Store that lives only as long as the process.
#[derive(Debug, Default)]
pub struct MemoryStore {
    entries: Mutex<HashMap<String, String>>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }
}

impl KeyValueStore for MemoryStore {
    fn load(&self, key: &str) -> io::Result<Option<String>> {
        let entries = self.entries.lock().unwrap_or_else(PoisonError::into_inner);
        Ok(entries.get(key).cloned())
    }

    fn save(&self, key: &str, value: &str) -> io::Result<()> {
        let mut entries = self.entries.lock().unwrap_or_else(PoisonError::into_inner);
        entries.insert(key.to_string(), value.to_string());
        Ok(())
    }
}

/// One JSON file per key under a directory.
///
/// Writes go through a temp file in the same directory and are renamed into
/// place, so a crash mid-write leaves the previous value intact.
#[derive(Debug, Clone)]
pub struct FileStore {
    dir: PathBuf,
}

impl FileStore {
    /// Open a store rooted at `dir`, creating the directory if needed.
    pub fn open(dir: impl Into<PathBuf>) -> io::Result<Self> {
        let dir = dir.into();
        fs::create_dir_all(&dir)?;
        Ok(Self { dir })
    }

    pub fn dir(&self) -> &Path {
        &self.dir
    }

    /// Keys map to file names one-to-one: ASCII alphanumerics, `-` and `_`
    /// are kept, every other byte is percent-escaped.
    fn path_for(&self, key: &str) -> PathBuf {
        let mut file_name = String::with_capacity(key.len());
        for byte in key.bytes() {
            if byte.is_ascii_alphanumeric() || matches!(byte, b'-' | b'_') {
                file_name.push(char::from(byte));
            } else {
                file_name.push_str(&format!("%{:02X}", byte));
            }
        }
        self.dir.join(format!("{}.json", file_name))
    }
}

impl KeyValueStore for FileStore {
    fn load(&self, key: &str) -> io::Result<Option<String>> {
        match fs::read_to_string(self.path_for(key)) {
            Ok(contents) => Ok(Some(contents)),
            Err(err) if err.kind() == io::ErrorKind::NotFound => Ok(None),
            Err(err) => Err(err),
        }
    }

    fn save(&self, key: &str, value: &str) -> io::Result<()> {
        let mut tmp = NamedTempFile::new_in(&self.dir)?;
        tmp.write_all(value.as_bytes())?;
        tmp.as_file().sync_all()?;
        tmp.persist(self.path_for(key)).map_err(|err| err.error)?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    #[test]
    fn test_memory_store_round_trip() {
        let store = MemoryStore::new();
        assert_eq!(store.load("a").unwrap(), None);

        store.save("a", "[1]").unwrap();
        store.save("a", "[2]").unwrap();
        assert_eq!(store.load("a").unwrap().as_deref(), Some("[2]"));
    }

    #[test]
    fn test_file_store_persists_across_instances() {
        let temp = TempDir::new().unwrap();
        let store = FileStore::open(temp.path().join("queues")).unwrap();

        store.save("crew-notes-sync-queue", "[]").unwrap();
        assert!(temp.path().join("queues/crew-notes-sync-queue.json").exists());

        let reopened = FileStore::open(temp.path().join("queues")).unwrap();
        assert_eq!(
            reopened.load("crew-notes-sync-queue").unwrap().as_deref(),
            Some("[]")
        );
        assert_eq!(reopened.load("missing").unwrap(), None);
    }

    #[test]
    fn test_file_store_escapes_keys() {
        let temp = TempDir::new().unwrap();
        let store = FileStore::open(temp.path()).unwrap();

        store.save("../escape/key", "x").unwrap();
        assert!(temp.path().join("%2E%2E%2Fescape%2Fkey.json").exists());
        assert_eq!(store.load("../escape/key").unwrap().as_deref(), Some("x"));
    }

    #[test]
    fn test_file_store_keeps_similar_keys_apart() {
        let temp = TempDir::new().unwrap();
        let store = FileStore::open(temp.path()).unwrap();

        store.save("a/b", "slash").unwrap();
        store.save("a_b", "underscore").unwrap();
        store.save("a%2Fb", "literal").unwrap();

        assert_eq!(store.load("a/b").unwrap().as_deref(), Some("slash"));
        assert_eq!(store.load("a_b").unwrap().as_deref(), Some("underscore"));
        assert_eq!(store.load("a%2Fb").unwrap().as_deref(), Some("literal"));
    }
}
