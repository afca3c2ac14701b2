//! Flat key/value configuration store shared by the logon side, the
//! recognizer and the admin CLI.

use std::collections::BTreeMap;
use std::path::{Path, PathBuf};
use std::sync::Mutex;

use thiserror::Error;

/// Well-known store entries.
pub mod keys {
    /// Install directory of the recognizer.
    pub const PATH: &str = "path";
    /// Start recognition as soon as the logon tile is shown.
    pub const AUTO_START: &str = "auto_start";
    /// Run a warm-up pass before full recognition.
    pub const WARMUP: &str = "warmup";
    /// Hex ciphertext of the logon password.
    pub const PASSWORD: &str = "password";
    pub const KEY: &str = "key";
    pub const IV: &str = "iv";
}

#[derive(Debug, Error)]
pub enum StoreError {
    #[error("store I/O failed on {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("store file {path} is malformed: {message}")]
    Parse { path: PathBuf, message: String },
}

pub type StoreResult<T> = Result<T, StoreError>;

/// String entries keyed by name. Implementations synchronize internally.
pub trait ConfigStore: Send + Sync {
    fn get(&self, key: &str) -> StoreResult<Option<String>>;
    fn set(&self, key: &str, value: &str) -> StoreResult<()>;
    fn remove(&self, key: &str) -> StoreResult<()>;

    /// Read a boolean toggle. Accepts `true/false`, `1/0`, `yes/no`, `on/off`;
    /// anything else (or absence) yields `default`.
    fn get_bool(&self, key: &str, default: bool) -> StoreResult<bool> {
        Ok(self
            .get(key)?
            .and_then(|v| parse_bool(&v))
            .unwrap_or(default))
    }
}

pub fn parse_bool(value: &str) -> Option<bool> {
    match value.trim().to_ascii_lowercase().as_str() {
        "true" | "1" | "yes" | "on" => Some(true),
        "false" | "0" | "no" | "off" => Some(false),
        _ => None,
    }
}

/// Store persisted as a flat TOML table of strings.
///
/// Every write rewrites the whole file through a sibling temp file and a
/// rename, so readers never see a half-written table.
#[derive(Debug)]
pub struct FileStore {
    path: PathBuf,
    lock: Mutex<()>,
}

impl FileStore {
    pub fn open(path: impl Into<PathBuf>) -> Self {
        Self {
            path: path.into(),
            lock: Mutex::new(()),
        }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    fn read_table(&self) -> StoreResult<BTreeMap<String, String>> {
        let content = match std::fs::read_to_string(&self.path) {
            Ok(c) => c,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(BTreeMap::new()),
            Err(source) => {
                return Err(StoreError::Io {
                    path: self.path.clone(),
                    source,
                })
            }
        };
        toml::from_str(&content).map_err(|e| StoreError::Parse {
            path: self.path.clone(),
            message: e.to_string(),
        })
    }

    fn write_table(&self, table: &BTreeMap<String, String>) -> StoreResult<()> {
        let io_err = |source| StoreError::Io {
            path: self.path.clone(),
            source,
        };
        let content = toml::to_string(table).map_err(|e| StoreError::Parse {
            path: self.path.clone(),
            message: e.to_string(),
        })?;
        if let Some(parent) = self.path.parent().filter(|p| !p.as_os_str().is_empty()) {
            std::fs::create_dir_all(parent).map_err(io_err)?;
        }
        let mut tmp = self.path.clone().into_os_string();
        tmp.push(".tmp");
        let tmp = PathBuf::from(tmp);
        std::fs::write(&tmp, content).map_err(io_err)?;
        std::fs::rename(&tmp, &self.path).map_err(io_err)
    }

    fn update(&self, f: impl FnOnce(&mut BTreeMap<String, String>)) -> StoreResult<()> {
        let _guard = self.lock.lock().unwrap_or_else(|e| e.into_inner());
        let mut table = self.read_table()?;
        f(&mut table);
        self.write_table(&table)
    }
}

impl ConfigStore for FileStore {
    fn get(&self, key: &str) -> StoreResult<Option<String>> {
        let _guard = self.lock.lock().unwrap_or_else(|e| e.into_inner());
        Ok(self.read_table()?.remove(key))
    }

    fn set(&self, key: &str, value: &str) -> StoreResult<()> {
        tracing::debug!(key, path = %self.path.display(), "store set");
        self.update(|t| {
            t.insert(key.to_string(), value.to_string());
        })
    }

    fn remove(&self, key: &str) -> StoreResult<()> {
        self.update(|t| {
            t.remove(key);
        })
    }
}

/// In-memory store for tests and one-shot tools.
#[derive(Debug, Default)]
pub struct MemoryStore {
    entries: Mutex<BTreeMap<String, String>>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_entries<'a>(entries: impl IntoIterator<Item = (&'a str, &'a str)>) -> Self {
        let store = Self::new();
        {
            let mut map = store.entries.lock().unwrap_or_else(|e| e.into_inner());
            for (k, v) in entries {
                map.insert(k.to_string(), v.to_string());
            }
        }
        store
    }
}

impl ConfigStore for MemoryStore {
    fn get(&self, key: &str) -> StoreResult<Option<String>> {
        let map = self.entries.lock().unwrap_or_else(|e| e.into_inner());
        Ok(map.get(key).cloned())
    }

    fn set(&self, key: &str, value: &str) -> StoreResult<()> {
        let mut map = self.entries.lock().unwrap_or_else(|e| e.into_inner());
        map.insert(key.to_string(), value.to_string());
        Ok(())
    }

    fn remove(&self, key: &str) -> StoreResult<()> {
        let mut map = self.entries.lock().unwrap_or_else(|e| e.into_inner());
        map.remove(key);
        Ok(())
    }
}
