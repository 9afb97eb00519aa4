use std::collections::HashMap;
use std::sync::Arc;

use async_trait::async_trait;
use tokio::sync::{Mutex, RwLock};

use super::{window_start, MemoryStore};
use crate::error::Result;
use crate::thread::ThreadId;
use crate::types::ModelMessage;

type ThreadLog = Arc<Mutex<Vec<ModelMessage>>>;

/// Process-local memory store with one lock per thread.
#[derive(Debug, Default, Clone)]
pub struct InMemoryMemoryStore {
    threads: Arc<RwLock<HashMap<ThreadId, ThreadLog>>>,
}

impl InMemoryMemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    async fn log(&self, thread_id: &ThreadId) -> Option<ThreadLog> {
        self.threads.read().await.get(thread_id).cloned()
    }

    async fn log_or_create(&self, thread_id: &ThreadId) -> ThreadLog {
        if let Some(log) = self.log(thread_id).await {
            return log;
        }
        self.threads
            .write()
            .await
            .entry(thread_id.clone())
            .or_default()
            .clone()
    }

    /// Ids of every thread with stored history.
    pub async fn thread_ids(&self) -> Vec<ThreadId> {
        let mut ids: Vec<ThreadId> = self.threads.read().await.keys().cloned().collect();
        ids.sort();
        ids
    }
}

#[async_trait]
impl MemoryStore for InMemoryMemoryStore {
    async fn recent(&self, thread_id: &ThreadId, window: usize) -> Result<Vec<ModelMessage>> {
        let Some(log) = self.log(thread_id).await else {
            return Ok(Vec::new());
        };
        let messages = log.lock().await;
        Ok(messages[window_start(messages.len(), window)..].to_vec())
    }

    async fn append(&self, thread_id: &ThreadId, messages: Vec<ModelMessage>) -> Result<()> {
        if messages.is_empty() {
            return Ok(());
        }
        let log = self.log_or_create(thread_id).await;
        log.lock().await.extend(messages);
        Ok(())
    }

    async fn len(&self, thread_id: &ThreadId) -> Result<usize> {
        match self.log(thread_id).await {
            Some(log) => Ok(log.lock().await.len()),
            None => Ok(0),
        }
    }
}
