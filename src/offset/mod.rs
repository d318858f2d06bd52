use serde_json;
use std::collections::HashMap;
use std::fs;
use std::path::{Path, PathBuf};
use std::sync::Mutex;
use thiserror::Error;
use tracing::warn;

#[derive(Debug, Error)]
pub enum StoreError {
    #[error("io error: {0}")]
    Io(#[from] std::io::Error),

    #[error("serialization error: {0}")]
    Serialize(#[from] serde_json::Error),
}

/// Durable, thread-safe map from a source key to a resumption cursor.
///
/// One store file is shared by every monitor of a given kind, so each
/// open/read/write/close cycle runs under a mutex. Writes go through a
/// temp-file-then-rename commit: a crash mid-write leaves the previously
/// committed map intact.
///
/// Read failures degrade to the caller's default rather than blocking
/// startup; write failures surface as `StoreError` so the caller can treat
/// the triggering batch as not yet committed.
pub struct OffsetStore {
    path: PathBuf,
    lock: Mutex<()>,
}

impl OffsetStore {
    /// Open (or create) a store backed by `offsets.json` under `dir`.
    pub fn open(dir: &Path) -> Result<Self, StoreError> {
        fs::create_dir_all(dir)?;
        Ok(Self {
            path: dir.join("offsets.json"),
            lock: Mutex::new(()),
        })
    }

    /// Read the cursor for `key`, falling back to `default` when the key is
    /// missing or the backing file is absent or unreadable.
    pub fn read_or(&self, key: &str, default: u64) -> u64 {
        let _guard = self.lock.lock().unwrap_or_else(|poisoned| poisoned.into_inner());
        self.load_map().get(key).copied().unwrap_or(default)
    }

    /// Persist the cursor for `key`. The whole map is rewritten atomically.
    pub fn write(&self, key: &str, value: u64) -> Result<(), StoreError> {
        let _guard = self.lock.lock().unwrap_or_else(|poisoned| poisoned.into_inner());

        let mut map = self.load_map();
        map.insert(key.to_string(), value);

        let tmp_path = self.path.with_extension("json.tmp");
        fs::write(&tmp_path, serde_json::to_vec_pretty(&map)?)?;
        fs::rename(&tmp_path, &self.path)?;
        Ok(())
    }

    // Missing file means no cursors committed yet; a corrupt file is logged
    // and treated the same so one bad write can never wedge every monitor
    // sharing this store.
    fn load_map(&self) -> HashMap<String, u64> {
        let bytes = match fs::read(&self.path) {
            Ok(bytes) => bytes,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => return HashMap::new(),
            Err(e) => {
                warn!(path = %self.path.display(), error = %e, "Failed to read offset store");
                return HashMap::new();
            }
        };

        match serde_json::from_slice(&bytes) {
            Ok(map) => map,
            Err(e) => {
                warn!(path = %self.path.display(), error = %e, "Offset store unreadable, starting fresh");
                HashMap::new()
            }
        }
    }
}

/// Key under which a single source's cursor is stored. Distinct sources must
/// never collide, so the key combines the application identity with a
/// source-specific discriminator (file name or container name).
pub fn source_key(safe_app_name: &str, discriminator: &str) -> String {
    format!("{}_{}", safe_app_name, discriminator)
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;
    use tempfile::TempDir;

    #[test]
    fn test_read_missing_key_returns_default() {
        let dir = TempDir::new().unwrap();
        let store = OffsetStore::open(dir.path()).unwrap();
        assert_eq!(store.read_or("myapp_web.log", 0), 0);
        assert_eq!(store.read_or("myapp_api", 1_700_000_000), 1_700_000_000);
    }

    #[test]
    fn test_write_then_read() {
        let dir = TempDir::new().unwrap();
        let store = OffsetStore::open(dir.path()).unwrap();

        store.write("myapp_web.log", 42).unwrap();
        assert_eq!(store.read_or("myapp_web.log", 0), 42);

        store.write("myapp_web.log", 1024).unwrap();
        assert_eq!(store.read_or("myapp_web.log", 0), 1024);
    }

    #[test]
    fn test_read_is_idempotent() {
        let dir = TempDir::new().unwrap();
        let store = OffsetStore::open(dir.path()).unwrap();
        store.write("key", 7).unwrap();

        assert_eq!(store.read_or("key", 0), store.read_or("key", 0));
    }

    #[test]
    fn test_cursors_survive_reopen() {
        let dir = TempDir::new().unwrap();
        {
            let store = OffsetStore::open(dir.path()).unwrap();
            store.write("myapp_web.log", 512).unwrap();
        }
        let store = OffsetStore::open(dir.path()).unwrap();
        assert_eq!(store.read_or("myapp_web.log", 0), 512);
    }

    #[test]
    fn test_corrupt_file_degrades_to_default() {
        let dir = TempDir::new().unwrap();
        let store = OffsetStore::open(dir.path()).unwrap();
        fs::write(dir.path().join("offsets.json"), b"{not json").unwrap();

        assert_eq!(store.read_or("key", 99), 99);
        // Writes recover by starting a fresh map.
        store.write("key", 5).unwrap();
        assert_eq!(store.read_or("key", 99), 5);
    }

    #[test]
    fn test_concurrent_writers_do_not_corrupt_each_other() {
        let dir = TempDir::new().unwrap();
        let store = Arc::new(OffsetStore::open(dir.path()).unwrap());

        let mut handles = Vec::new();
        for source in 0..4u64 {
            let store = Arc::clone(&store);
            handles.push(std::thread::spawn(move || {
                let key = format!("app_{}", source);
                for value in 1..=50u64 {
                    store.write(&key, value).unwrap();
                }
            }));
        }
        for handle in handles {
            handle.join().unwrap();
        }

        for source in 0..4u64 {
            assert_eq!(store.read_or(&format!("app_{}", source), 0), 50);
        }
    }

    #[test]
    fn test_source_key_namespacing() {
        assert_eq!(source_key("my_app", "web.log"), "my_app_web.log");
        assert_ne!(source_key("a", "b.log"), source_key("a", "c.log"));
    }
}
