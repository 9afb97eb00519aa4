//! Thread ownership: which principal a thread belongs to.
//!
//! Authenticated principals claim a thread the first time they write to it
//! and own their principal-derived thread outright. Threads only ever used
//! anonymously stay unowned; their random id is the only credential.

use std::collections::HashMap;
use std::io::ErrorKind;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tokio::sync::{Mutex, RwLock};
use tracing::{debug, warn};

use super::{Principal, ThreadId};
use crate::error::{RelayError, Result};

/// Storage for thread owners.
#[async_trait]
pub trait ThreadOwnerStore: Send + Sync {
    async fn owner(&self, thread_id: &ThreadId) -> Result<Option<String>>;

    /// Record `principal_id` unless an owner exists; return whichever owner is recorded.
    async fn claim(&self, thread_id: &ThreadId, principal_id: &str) -> Result<String>;

    /// Record `principal_id`, replacing any previous owner.
    async fn assign(&self, thread_id: &ThreadId, principal_id: &str) -> Result<()>;
}

/// What a caller wants to do with a thread.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ThreadAccess {
    /// Read persisted history.
    Read,
    /// Run a turn, which appends to history.
    Write,
}

/// Check that `principal` may access `thread_id`, claiming it on first write.
///
/// Fails with [`RelayError::ThreadAccessDenied`] when another principal owns
/// the thread.
pub async fn authorize(
    owners: &dyn ThreadOwnerStore,
    thread_id: &ThreadId,
    principal: &Principal,
    access: ThreadAccess,
) -> Result<()> {
    let owner = owners.owner(thread_id).await?;

    if let Principal::Authenticated(id) = principal {
        if *thread_id == ThreadId::for_principal(id) {
            if access == ThreadAccess::Write && owner.as_deref() != Some(id.as_str()) {
                if let Some(previous) = &owner {
                    warn!(thread_id = %thread_id, previous = %previous, "reclaiming principal-derived thread");
                }
                owners.assign(thread_id, id).await?;
            }
            return Ok(());
        }
    }

    match (owner, principal) {
        (Some(owner), principal) if owner == principal.id() => Ok(()),
        (Some(_), _) => Err(denied(thread_id)),
        (None, Principal::Authenticated(id)) if access == ThreadAccess::Write => {
            let recorded = owners.claim(thread_id, id).await?;
            if recorded == *id {
                debug!(thread_id = %thread_id, "thread claimed");
                Ok(())
            } else {
                Err(denied(thread_id))
            }
        }
        (None, _) => Ok(()),
    }
}

fn denied(thread_id: &ThreadId) -> RelayError {
    RelayError::ThreadAccessDenied(thread_id.to_string())
}

/// Process-local owner table.
#[derive(Debug, Default, Clone)]
pub struct InMemoryThreadOwnerStore {
    owners: Arc<RwLock<HashMap<ThreadId, String>>>,
}

impl InMemoryThreadOwnerStore {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl ThreadOwnerStore for InMemoryThreadOwnerStore {
    async fn owner(&self, thread_id: &ThreadId) -> Result<Option<String>> {
        Ok(self.owners.read().await.get(thread_id).cloned())
    }

    async fn claim(&self, thread_id: &ThreadId, principal_id: &str) -> Result<String> {
        Ok(self
            .owners
            .write()
            .await
            .entry(thread_id.clone())
            .or_insert_with(|| principal_id.to_string())
            .clone())
    }

    async fn assign(&self, thread_id: &ThreadId, principal_id: &str) -> Result<()> {
        self.owners
            .write()
            .await
            .insert(thread_id.clone(), principal_id.to_string());
        Ok(())
    }
}

/// One TOML file per owned thread.
#[derive(Debug, Clone)]
pub struct FileThreadOwnerStore {
    base_dir: PathBuf,
    write_lock: Arc<Mutex<()>>,
}

impl FileThreadOwnerStore {
    pub fn new(base_dir: impl Into<PathBuf>) -> Self {
        Self {
            base_dir: base_dir.into(),
            write_lock: Arc::default(),
        }
    }

    fn path_for(&self, thread_id: &ThreadId) -> PathBuf {
        self.base_dir.join(format!("{}.toml", thread_id.file_stem()))
    }

    async fn read(path: &Path) -> Result<Option<String>> {
        let raw = match tokio::fs::read_to_string(path).await {
            Ok(raw) => raw,
            Err(err) if err.kind() == ErrorKind::NotFound => return Ok(None),
            Err(err) => return Err(err.into()),
        };
        let file: OwnerFile = toml::from_str(&raw)
            .map_err(|e| RelayError::Memory(format!("corrupt owner file: {e}")))?;
        Ok(Some(file.owner))
    }

    /// Write the record to a staging file in the base directory.
    async fn stage(&self, principal_id: &str) -> Result<PathBuf> {
        let file = OwnerFile {
            owner: principal_id.to_string(),
            claimed_at: Utc::now(),
        };
        let serialized = toml::to_string(&file)
            .map_err(|e| RelayError::Memory(format!("serialize owner: {e}")))?;
        tokio::fs::create_dir_all(&self.base_dir).await?;
        let staging = self
            .base_dir
            .join(format!(".{}.tmp", uuid::Uuid::new_v4().simple()));
        tokio::fs::write(&staging, serialized).await?;
        Ok(staging)
    }
}

#[async_trait]
impl ThreadOwnerStore for FileThreadOwnerStore {
    async fn owner(&self, thread_id: &ThreadId) -> Result<Option<String>> {
        Self::read(&self.path_for(thread_id)).await
    }

    async fn claim(&self, thread_id: &ThreadId, principal_id: &str) -> Result<String> {
        let path = self.path_for(thread_id);
        if let Some(existing) = Self::read(&path).await? {
            return Ok(existing);
        }
        let _guard = self.write_lock.lock().await;
        let staging = self.stage(principal_id).await?;
        let linked = tokio::fs::hard_link(&staging, &path).await;
        let _ = tokio::fs::remove_file(&staging).await;
        match linked {
            Ok(()) => Ok(principal_id.to_string()),
            Err(err) if err.kind() == ErrorKind::AlreadyExists => Self::read(&path)
                .await?
                .ok_or_else(|| RelayError::Memory("owner vanished during claim".into())),
            Err(err) => Err(err.into()),
        }
    }

    async fn assign(&self, thread_id: &ThreadId, principal_id: &str) -> Result<()> {
        let _guard = self.write_lock.lock().await;
        let staging = self.stage(principal_id).await?;
        tokio::fs::rename(&staging, self.path_for(thread_id)).await?;
        Ok(())
    }
}

#[derive(Debug, Serialize, Deserialize)]
struct OwnerFile {
    owner: String,
    claimed_at: DateTime<Utc>,
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    fn user(id: &str) -> Principal {
        Principal::Authenticated(id.into())
    }

    fn thread(id: &str) -> ThreadId {
        ThreadId::parse(id).unwrap()
    }

    #[tokio::test]
    async fn first_writer_owns_a_client_held_thread() {
        let owners = InMemoryThreadOwnerStore::new();
        let t = thread("thread-shared");

        authorize(&owners, &t, &user("bob"), ThreadAccess::Write).await.unwrap();
        authorize(&owners, &t, &user("bob"), ThreadAccess::Read).await.unwrap();

        for access in [ThreadAccess::Read, ThreadAccess::Write] {
            let err = authorize(&owners, &t, &user("carol"), access).await.unwrap_err();
            assert!(matches!(err, RelayError::ThreadAccessDenied(_)));
        }
        let err = authorize(&owners, &t, &Principal::Anonymous, ThreadAccess::Read)
            .await
            .unwrap_err();
        assert!(matches!(err, RelayError::ThreadAccessDenied(_)));
    }

    #[tokio::test]
    async fn reads_do_not_claim() {
        let owners = InMemoryThreadOwnerStore::new();
        let t = thread("thread-unused");
        authorize(&owners, &t, &user("carol"), ThreadAccess::Read).await.unwrap();
        assert_eq!(owners.owner(&t).await.unwrap(), None);
    }

    #[tokio::test]
    async fn anonymous_threads_stay_unowned() {
        let owners = InMemoryThreadOwnerStore::new();
        let t = ThreadId::random();
        authorize(&owners, &t, &Principal::Anonymous, ThreadAccess::Write).await.unwrap();
        assert_eq!(owners.owner(&t).await.unwrap(), None);
        authorize(&owners, &t, &Principal::Anonymous, ThreadAccess::Read).await.unwrap();
    }

    #[tokio::test]
    async fn principal_derived_thread_belongs_to_its_principal() {
        let owners = InMemoryThreadOwnerStore::new();
        let alice = ThreadId::for_principal("alice");

        authorize(&owners, &alice, &user("mallory"), ThreadAccess::Write).await.unwrap();
        authorize(&owners, &alice, &user("alice"), ThreadAccess::Write).await.unwrap();
        assert_eq!(owners.owner(&alice).await.unwrap().as_deref(), Some("alice"));

        let err = authorize(&owners, &alice, &user("mallory"), ThreadAccess::Read)
            .await
            .unwrap_err();
        assert!(matches!(err, RelayError::ThreadAccessDenied(_)));
    }

    #[tokio::test]
    async fn file_owners_survive_a_new_store_instance() {
        let dir = TempDir::new().unwrap();
        let t = thread("thread-file");

        let store = FileThreadOwnerStore::new(dir.path());
        assert_eq!(store.claim(&t, "bob").await.unwrap(), "bob");
        assert_eq!(store.claim(&t, "carol").await.unwrap(), "bob");

        let reopened = FileThreadOwnerStore::new(dir.path());
        assert_eq!(reopened.owner(&t).await.unwrap().as_deref(), Some("bob"));
        reopened.assign(&t, "carol").await.unwrap();
        assert_eq!(store.owner(&t).await.unwrap().as_deref(), Some("carol"));
    }
}
