//! Client-side persistence for the thread id.

use std::collections::HashMap;
use std::fs;
use std::io::ErrorKind;
use std::path::{Path, PathBuf};
use std::sync::Mutex;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use super::ThreadId;
use crate::error::{RelayError, Result};

/// Storage abstraction for a client's persisted thread id.
pub trait ThreadIdStorage: Send + Sync {
    fn get(&self, key: &str) -> Result<Option<ThreadId>>;

    /// Store `candidate` unless a value already exists; return whichever value won.
    fn get_or_insert(&self, key: &str, candidate: ThreadId) -> Result<ThreadId>;

    fn clear(&self, key: &str) -> Result<()>;
}

/// Process-local storage, shared by every client holding the same instance.
#[derive(Debug, Default)]
pub struct InMemoryThreadIdStorage {
    values: Mutex<HashMap<String, ThreadId>>,
}

impl InMemoryThreadIdStorage {
    fn lock(&self) -> Result<std::sync::MutexGuard<'_, HashMap<String, ThreadId>>> {
        self.values
            .lock()
            .map_err(|_| RelayError::Memory("thread id storage lock poisoned".into()))
    }
}

impl ThreadIdStorage for InMemoryThreadIdStorage {
    fn get(&self, key: &str) -> Result<Option<ThreadId>> {
        Ok(self.lock()?.get(key).cloned())
    }

    fn get_or_insert(&self, key: &str, candidate: ThreadId) -> Result<ThreadId> {
        Ok(self
            .lock()?
            .entry(key.to_string())
            .or_insert(candidate)
            .clone())
    }

    fn clear(&self, key: &str) -> Result<()> {
        self.lock()?.remove(key);
        Ok(())
    }
}

/// File-backed storage using one TOML file per key.
///
/// The first write is published with an atomic hard link, so concurrent
/// processes sharing the directory agree on a single id.
#[derive(Debug, Clone)]
pub struct FileThreadIdStorage {
    base_dir: PathBuf,
}

impl FileThreadIdStorage {
    pub fn new(base_dir: impl Into<PathBuf>) -> Self {
        Self {
            base_dir: base_dir.into(),
        }
    }

    /// Storage under the user's home directory (`~/.threadrelay/client`).
    pub fn new_default() -> Self {
        Self::new(default_threadrelay_dir().join("client"))
    }

    fn path_for(&self, key: &str) -> PathBuf {
        let stem: String = key
            .chars()
            .map(|c| if c.is_ascii_alphanumeric() || c == '-' { c } else { '_' })
            .collect();
        self.base_dir.join(format!("{stem}.toml"))
    }

    fn read(path: &Path) -> Result<Option<ThreadId>> {
        let raw = match fs::read_to_string(path) {
            Ok(data) => data,
            Err(err) if err.kind() == ErrorKind::NotFound => return Ok(None),
            Err(err) => return Err(err.into()),
        };
        let file: ThreadIdFile = toml::from_str(&raw)
            .map_err(|e| RelayError::Memory(format!("corrupt thread id file: {e}")))?;
        Ok(Some(file.thread_id))
    }
}

impl ThreadIdStorage for FileThreadIdStorage {
    fn get(&self, key: &str) -> Result<Option<ThreadId>> {
        Self::read(&self.path_for(key))
    }

    fn get_or_insert(&self, key: &str, candidate: ThreadId) -> Result<ThreadId> {
        let path = self.path_for(key);
        if let Some(existing) = Self::read(&path)? {
            return Ok(existing);
        }
        fs::create_dir_all(&self.base_dir)?;

        let file = ThreadIdFile {
            version: 1,
            thread_id: candidate.clone(),
            saved_at: Utc::now(),
        };
        let serialized = toml::to_string(&file)
            .map_err(|e| RelayError::Memory(format!("serialize thread id: {e}")))?;
        let staging = self
            .base_dir
            .join(format!(".{}.tmp", uuid::Uuid::new_v4().simple()));
        fs::write(&staging, serialized)?;

        let linked = fs::hard_link(&staging, &path);
        let _ = fs::remove_file(&staging);
        match linked {
            Ok(()) => Ok(candidate),
            Err(err) if err.kind() == ErrorKind::AlreadyExists => Self::read(&path)?
                .ok_or_else(|| RelayError::Memory("thread id vanished during insert".into())),
            Err(err) => Err(err.into()),
        }
    }

    fn clear(&self, key: &str) -> Result<()> {
        match fs::remove_file(self.path_for(key)) {
            Ok(()) => Ok(()),
            Err(err) if err.kind() == ErrorKind::NotFound => Ok(()),
            Err(err) => Err(err.into()),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
struct ThreadIdFile {
    version: u32,
    thread_id: ThreadId,
    saved_at: DateTime<Utc>,
}

pub(crate) fn default_threadrelay_dir() -> PathBuf {
    directories::UserDirs::new()
        .map(|dirs| dirs.home_dir().join(".threadrelay"))
        .unwrap_or_else(|| PathBuf::from(".threadrelay"))
}
