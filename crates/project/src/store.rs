//! Durable key-value byte stores the persistence layer writes through.

use std::collections::BTreeMap;
use std::fs;
use std::io;
use std::path::{Path, PathBuf};

#[derive(Debug, thiserror::Error)]
pub enum StoreError {
    #[error("storage quota exceeded: {needed} bytes needed, {quota} allowed")]
    QuotaExceeded { needed: u64, quota: u64 },

    #[error("IO error: {0}")]
    Io(#[from] io::Error),
}

pub trait KeyValueStore {
    fn get(&self, key: &str) -> Result<Option<Vec<u8>>, StoreError>;

    /// Replace the value under `key`. Fails with [`StoreError::QuotaExceeded`]
    /// when the store would grow past its quota; the old value is kept.
    fn set(&mut self, key: &str, value: &[u8]) -> Result<(), StoreError>;

    /// Remove every key in the store's namespace.
    fn clear_all(&mut self) -> Result<(), StoreError>;
}

/// In-memory store with an optional byte quota over keys and values.
#[derive(Debug, Default, Clone)]
pub struct MemoryStore {
    entries: BTreeMap<String, Vec<u8>>,
    quota: Option<u64>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_quota(quota: u64) -> Self {
        Self {
            entries: BTreeMap::new(),
            quota: Some(quota),
        }
    }

    pub fn usage(&self) -> u64 {
        self.entries
            .iter()
            .map(|(k, v)| (k.len() + v.len()) as u64)
            .sum()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}

impl KeyValueStore for MemoryStore {
    fn get(&self, key: &str) -> Result<Option<Vec<u8>>, StoreError> {
        Ok(self.entries.get(key).cloned())
    }

    fn set(&mut self, key: &str, value: &[u8]) -> Result<(), StoreError> {
        if let Some(quota) = self.quota {
            let replaced = self
                .entries
                .get(key)
                .map_or(0, |old| (key.len() + old.len()) as u64);
            let needed = self.usage() - replaced + (key.len() + value.len()) as u64;
            if needed > quota {
                return Err(StoreError::QuotaExceeded { needed, quota });
            }
        }

        self.entries.insert(key.to_string(), value.to_vec());
        Ok(())
    }

    fn clear_all(&mut self) -> Result<(), StoreError> {
        self.entries.clear();
        Ok(())
    }
}

/// Store that keeps one file per key inside a directory.
///
/// The directory is the store's namespace: `clear_all` removes every file in
/// it. Writes go to a temporary file first and are renamed into place.
#[derive(Debug, Clone)]
pub struct FileStore {
    root: PathBuf,
    quota: Option<u64>,
}

impl FileStore {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self {
            root: root.into(),
            quota: None,
        }
    }

    pub fn with_quota(mut self, quota: Option<u64>) -> Self {
        self.quota = quota;
        self
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    fn path_for(&self, key: &str) -> PathBuf {
        let file_name: String = key
            .chars()
            .map(|c| {
                if c.is_ascii_alphanumeric() || c == '-' || c == '_' || c == '.' {
                    c
                } else {
                    '_'
                }
            })
            .collect();
        self.root.join(format!("{file_name}.json"))
    }

    /// Total size of every file in the namespace except `exclude`.
    fn usage_excluding(&self, exclude: &Path) -> io::Result<u64> {
        let entries = match fs::read_dir(&self.root) {
            Ok(entries) => entries,
            Err(e) if e.kind() == io::ErrorKind::NotFound => return Ok(0),
            Err(e) => return Err(e),
        };

        let mut total = 0;
        for entry in entries {
            let entry = entry?;
            let path = entry.path();
            // Leftovers from an interrupted write are not part of the namespace
            if path == exclude || path.extension().is_some_and(|ext| ext == "tmp") {
                continue;
            }
            let metadata = entry.metadata()?;
            if metadata.is_file() {
                total += metadata.len();
            }
        }
        Ok(total)
    }
}

impl KeyValueStore for FileStore {
    fn get(&self, key: &str) -> Result<Option<Vec<u8>>, StoreError> {
        match fs::read(self.path_for(key)) {
            Ok(bytes) => Ok(Some(bytes)),
            Err(e) if e.kind() == io::ErrorKind::NotFound => Ok(None),
            Err(e) => Err(e.into()),
        }
    }

    fn set(&mut self, key: &str, value: &[u8]) -> Result<(), StoreError> {
        let path = self.path_for(key);

        if let Some(quota) = self.quota {
            let needed = self.usage_excluding(&path)? + value.len() as u64;
            if needed > quota {
                return Err(StoreError::QuotaExceeded { needed, quota });
            }
        }

        fs::create_dir_all(&self.root)?;
        let tmp = path.with_extension("json.tmp");
        fs::write(&tmp, value)?;
        fs::rename(&tmp, &path)?;
        Ok(())
    }

    fn clear_all(&mut self) -> Result<(), StoreError> {
        let entries = match fs::read_dir(&self.root) {
            Ok(entries) => entries,
            Err(e) if e.kind() == io::ErrorKind::NotFound => return Ok(()),
            Err(e) => return Err(e.into()),
        };

        for entry in entries {
            let entry = entry?;
            if entry.file_type()?.is_file() {
                fs::remove_file(entry.path())?;
            }
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::tempdir;

    #[test]
    fn test_memory_store_roundtrip() {
        let mut store = MemoryStore::new();
        assert_eq!(store.get("k").unwrap(), None);

        store.set("k", b"value").unwrap();
        assert_eq!(store.get("k").unwrap(), Some(b"value".to_vec()));
        assert_eq!(store.usage(), 6);
    }

    #[test]
    fn test_memory_store_quota_counts_replacement() {
        let mut store = MemoryStore::with_quota(10);
        store.set("k", b"123456789").unwrap();

        // Replacing the same key only needs room for the new value
        store.set("k", b"abcdefghi").unwrap();

        let err = store.set("k", b"0123456789").unwrap_err();
        assert!(matches!(err, StoreError::QuotaExceeded { needed: 11, quota: 10 }));
        assert_eq!(store.get("k").unwrap(), Some(b"abcdefghi".to_vec()));
    }

    #[test]
    fn test_memory_store_clear_all() {
        let mut store = MemoryStore::new();
        store.set("a", b"1").unwrap();
        store.set("b", b"2").unwrap();

        store.clear_all().unwrap();

        assert!(store.is_empty());
    }

    #[test]
    fn test_file_store_roundtrip() {
        let dir = tempdir().expect("tempdir");
        let mut store = FileStore::new(dir.path().join("storage"));

        assert_eq!(store.get("sampler-storage").unwrap(), None);
        store.set("sampler-storage", b"{}").unwrap();
        assert_eq!(store.get("sampler-storage").unwrap(), Some(b"{}".to_vec()));
        assert!(dir.path().join("storage/sampler-storage.json").exists());
    }

    #[test]
    fn test_file_store_sanitizes_keys() {
        let dir = tempdir().expect("tempdir");
        let mut store = FileStore::new(dir.path());

        store.set("../escape/key", b"x").unwrap();

        assert!(dir.path().join(".._escape_key.json").exists());
        assert_eq!(store.get("../escape/key").unwrap(), Some(b"x".to_vec()));
    }

    #[test]
    fn test_file_store_quota() {
        let dir = tempdir().expect("tempdir");
        let mut store = FileStore::new(dir.path()).with_quota(Some(8));

        store.set("a", b"1234").unwrap();
        store.set("a", b"12345678").unwrap();
        store.set("a", b"1234").unwrap();
        store.set("b", b"1234").unwrap();

        let err = store.set("c", b"1").unwrap_err();
        assert!(matches!(err, StoreError::QuotaExceeded { needed: 9, quota: 8 }));
        assert_eq!(store.get("c").unwrap(), None);
    }

    #[test]
    fn test_file_store_quota_ignores_stale_temp_files() {
        let dir = tempdir().expect("tempdir");
        std::fs::write(dir.path().join("sampler-storage.json.tmp"), [0u8; 64]).unwrap();
        let mut store = FileStore::new(dir.path()).with_quota(Some(8));

        store.set("sampler-storage", b"12345678").unwrap();

        assert_eq!(
            store.get("sampler-storage").unwrap(),
            Some(b"12345678".to_vec())
        );
    }

    #[test]
    fn test_file_store_clear_all() {
        let dir = tempdir().expect("tempdir");
        let mut store = FileStore::new(dir.path().join("ns"));
        store.set("a", b"1").unwrap();
        store.set("b", b"2").unwrap();

        store.clear_all().unwrap();

        assert_eq!(store.get("a").unwrap(), None);
        assert_eq!(store.get("b").unwrap(), None);
    }

    #[test]
    fn test_file_store_clear_missing_dir() {
        let dir = tempdir().expect("tempdir");
        let mut store = FileStore::new(dir.path().join("never-created"));
        store.clear_all().unwrap();
    }
}
