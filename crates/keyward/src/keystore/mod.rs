pub mod cipher;

use crate::{errors::KeywardError, paths::KeywardPaths};
use async_trait::async_trait;
use eyre::Context as _;
use fs2::FileExt as _;
use parking_lot::Mutex;
use std::{
    collections::BTreeMap,
    fs::{self, File, OpenOptions},
    path::PathBuf,
};

/// Platform-backed persistent store for opaque encrypted blobs, addressed by
/// composite string keys.
///
/// Keyward treats this as an ordinary get/set/remove-by-key contract; the
/// durability and at-rest protection guarantees belong to the implementation.
#[async_trait]
pub trait SecretStore: Send + Sync {
    async fn get(&self, key: &str) -> eyre::Result<Option<String>>;
    async fn set(&self, key: &str, value: &str) -> eyre::Result<()>;
    async fn remove(&self, key: &str) -> eyre::Result<bool>;
    async fn list_keys(&self) -> eyre::Result<Vec<String>>;
}

/// File-backed store: one private JSON map, written atomically, with an
/// advisory exclusive lock serializing writers across processes.
#[derive(Debug, Clone)]
pub struct FileSecretStore {
    path: PathBuf,
    lock_path: PathBuf,
}

impl FileSecretStore {
    pub fn open(paths: &KeywardPaths) -> eyre::Result<Self> {
        paths.ensure_private_dirs()?;
        Ok(Self {
            path: paths.secrets_path(),
            lock_path: paths.store_lock_path(),
        })
    }

    fn load_map(&self) -> eyre::Result<BTreeMap<String, String>> {
        if !self.path.exists() {
            return Ok(BTreeMap::new());
        }
        let s = fs::read_to_string(&self.path).context("read secret store")?;
        let map: BTreeMap<String, String> =
            serde_json::from_str(&s).context("parse secret store")?;
        Ok(map)
    }

    fn save_map(&self, map: &BTreeMap<String, String>) -> eyre::Result<()> {
        let s = serde_json::to_string_pretty(map).context("serialize secret store")?;
        crate::fsutil::write_string_atomic_private(&self.path, &s)
            .context("write secret store")?;
        Ok(())
    }

    /// Exclusive lock for write operations across competing processes.
    ///
    /// If another process is actively writing, fail fast and let the caller
    /// retry rather than blocking inside an interactive flow.
    fn acquire_write_lock(&self) -> eyre::Result<File> {
        if let Some(parent) = self.lock_path.parent() {
            crate::fsutil::ensure_private_dir(parent)?;
        }
        let f = {
            #[cfg(unix)]
            {
                use std::os::unix::fs::OpenOptionsExt as _;
                OpenOptions::new()
                    .create(true)
                    .read(true)
                    .write(true)
                    .truncate(false)
                    .mode(crate::fsutil::MODE_FILE_PRIVATE)
                    .open(&self.lock_path)
                    .context("open lock file")?
            }
            #[cfg(not(unix))]
            {
                OpenOptions::new()
                    .create(true)
                    .read(true)
                    .write(true)
                    .truncate(false)
                    .open(&self.lock_path)
                    .context("open lock file")?
            }
        };
        match f.try_lock_exclusive() {
            Ok(()) => {}
            Err(e) if e.kind() == std::io::ErrorKind::WouldBlock => {
                return Err(KeywardError::StoreBusy.into());
            }
            Err(e) => return Err(eyre::Report::new(e).wrap_err("lock exclusive")),
        }
        Ok(f)
    }

    fn release_lock(f: File) -> eyre::Result<()> {
        fs2::FileExt::unlock(&f).context("unlock")?;
        Ok(())
    }
}

#[async_trait]
impl SecretStore for FileSecretStore {
    async fn get(&self, key: &str) -> eyre::Result<Option<String>> {
        Ok(self.load_map()?.remove(key))
    }

    async fn set(&self, key: &str, value: &str) -> eyre::Result<()> {
        let lock = self.acquire_write_lock()?;
        let result = (|| -> eyre::Result<()> {
            let mut map = self.load_map()?;
            map.insert(key.to_owned(), value.to_owned());
            self.save_map(&map)
        })();
        Self::release_lock(lock)?;
        result
    }

    async fn remove(&self, key: &str) -> eyre::Result<bool> {
        let lock = self.acquire_write_lock()?;
        let result = (|| -> eyre::Result<bool> {
            let mut map = self.load_map()?;
            let removed = map.remove(key).is_some();
            if removed {
                self.save_map(&map)?;
            }
            Ok(removed)
        })();
        Self::release_lock(lock)?;
        result
    }

    async fn list_keys(&self) -> eyre::Result<Vec<String>> {
        Ok(self.load_map()?.into_keys().collect())
    }
}

/// In-memory store for tests and embedders that bring their own persistence.
#[derive(Default)]
pub struct MemorySecretStore {
    entries: Mutex<BTreeMap<String, String>>,
}

impl MemorySecretStore {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl SecretStore for MemorySecretStore {
    async fn get(&self, key: &str) -> eyre::Result<Option<String>> {
        Ok(self.entries.lock().get(key).cloned())
    }

    async fn set(&self, key: &str, value: &str) -> eyre::Result<()> {
        self.entries.lock().insert(key.to_owned(), value.to_owned());
        Ok(())
    }

    async fn remove(&self, key: &str) -> eyre::Result<bool> {
        Ok(self.entries.lock().remove(key).is_some())
    }

    async fn list_keys(&self) -> eyre::Result<Vec<String>> {
        Ok(self.entries.lock().keys().cloned().collect())
    }
}
