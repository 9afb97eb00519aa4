//! Thread identity: which conversation a turn belongs to.
//!
//! A [`ThreadId`] is the only key used to find prior turns. It is either held
//! by the client already, derived deterministically from an authenticated
//! principal, or minted at random for anonymous use. Client-side storage makes
//! the choice sticky (see [`storage`]).

pub mod owners;
pub mod storage;

use std::fmt;

use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};

use crate::error::Result;

pub use owners::{
    authorize, FileThreadOwnerStore, InMemoryThreadOwnerStore, ThreadAccess, ThreadOwnerStore,
};
pub use storage::{FileThreadIdStorage, InMemoryThreadIdStorage, ThreadIdStorage};

/// Principal id used when no identity is attached to a request.
pub const ANONYMOUS_PRINCIPAL: &str = "anonymous";

/// Storage key under which clients persist their thread id.
pub const THREAD_ID_STORAGE_KEY: &str = "chat-thread-id";

/// Opaque, stable conversation identifier.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct ThreadId(String);

impl ThreadId {
    /// Wrap a client-supplied id. Blank ids are rejected.
    pub fn parse(raw: &str) -> Option<Self> {
        let trimmed = raw.trim();
        (!trimmed.is_empty()).then(|| Self(trimmed.to_string()))
    }

    /// Deterministic id for an authenticated principal.
    pub fn for_principal(principal_id: &str) -> Self {
        let digest = Sha256::digest(principal_id.as_bytes());
        let hex: String = digest[..8].iter().map(|b| format!("{b:02x}")).collect();
        Self(format!("thread-{hex}"))
    }

    /// Fresh random id for anonymous use.
    pub fn random() -> Self {
        Self(format!("thread-{}", uuid::Uuid::new_v4().simple()))
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }

    /// File-system safe rendering of the id.
    pub fn file_stem(&self) -> String {
        self.0
            .chars()
            .map(|c| {
                if c.is_ascii_alphanumeric() || c == '-' || c == '_' {
                    c
                } else {
                    '_'
                }
            })
            .collect()
    }
}

impl fmt::Display for ThreadId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// The resolved caller of a request.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum Principal {
    Authenticated(String),
    Anonymous,
}

impl Principal {
    /// Principal id as forwarded to the agent runtime.
    pub fn id(&self) -> &str {
        match self {
            Self::Authenticated(id) => id,
            Self::Anonymous => ANONYMOUS_PRINCIPAL,
        }
    }

    pub fn is_anonymous(&self) -> bool {
        matches!(self, Self::Anonymous)
    }
}

/// Resolves the thread a request belongs to.
#[derive(Debug, Clone, Copy, Default)]
pub struct ThreadIdResolver;

impl ThreadIdResolver {
    /// Server-side resolution: reuse the client-held id when present.
    pub fn resolve(client_held: Option<&str>, principal: &Principal) -> ThreadId {
        client_held
            .and_then(ThreadId::parse)
            .unwrap_or_else(|| Self::synthesize(principal))
    }

    /// Synthesize a new id for a principal that holds none.
    pub fn synthesize(principal: &Principal) -> ThreadId {
        match principal {
            Principal::Authenticated(id) => ThreadId::for_principal(id),
            Principal::Anonymous => ThreadId::random(),
        }
    }

    /// Client-side resolution backed by persistent storage.
    ///
    /// Once an id is stored every later call returns it, even when several
    /// clients share the storage and race on the first write.
    pub fn resolve_persisted(
        storage: &dyn ThreadIdStorage,
        principal: &Principal,
    ) -> Result<ThreadId> {
        if let Some(existing) = storage.get(THREAD_ID_STORAGE_KEY)? {
            return Ok(existing);
        }
        storage.get_or_insert(THREAD_ID_STORAGE_KEY, Self::synthesize(principal))
    }
}
