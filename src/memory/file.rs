use std::collections::HashMap;
use std::io::ErrorKind;
use std::path::PathBuf;
use std::sync::{Arc, Weak};

use async_trait::async_trait;
use tokio::io::AsyncWriteExt;
use tokio::sync::Mutex;

use super::{window_start, MemoryStore};
use crate::error::{RelayError, Result};
use crate::thread::storage::default_threadrelay_dir;
use crate::thread::ThreadId;
use crate::types::ModelMessage;

/// File-backed memory: one JSON-lines file per thread.
#[derive(Debug, Clone)]
pub struct FileMemoryStore {
    base_dir: PathBuf,
    /// Locks of threads with an operation in flight; dead entries are pruned.
    locks: Arc<Mutex<HashMap<ThreadId, Weak<Mutex<()>>>>>,
}

impl FileMemoryStore {
    pub fn new(base_dir: impl Into<PathBuf>) -> Self {
        Self {
            base_dir: base_dir.into(),
            locks: Arc::default(),
        }
    }

    /// Store under `~/.threadrelay/threads`.
    pub fn new_default() -> Self {
        Self::new(default_threadrelay_dir().join("threads"))
    }

    fn path_for(&self, thread_id: &ThreadId) -> PathBuf {
        self.base_dir.join(format!("{}.jsonl", thread_id.file_stem()))
    }

    async fn thread_lock(&self, thread_id: &ThreadId) -> Arc<Mutex<()>> {
        let mut locks = self.locks.lock().await;
        if let Some(lock) = locks.get(thread_id).and_then(Weak::upgrade) {
            return lock;
        }
        locks.retain(|_, lock| lock.strong_count() > 0);
        let lock = Arc::new(Mutex::new(()));
        locks.insert(thread_id.clone(), Arc::downgrade(&lock));
        lock
    }

    async fn read_all(&self, thread_id: &ThreadId) -> Result<Vec<ModelMessage>> {
        let raw = match tokio::fs::read_to_string(self.path_for(thread_id)).await {
            Ok(raw) => raw,
            Err(err) if err.kind() == ErrorKind::NotFound => return Ok(Vec::new()),
            Err(err) => return Err(err.into()),
        };
        raw.lines()
            .filter(|line| !line.trim().is_empty())
            .enumerate()
            .map(|(n, line)| {
                serde_json::from_str(line).map_err(|e| {
                    RelayError::Memory(format!("thread {thread_id} line {}: {e}", n + 1))
                })
            })
            .collect()
    }
}

#[async_trait]
impl MemoryStore for FileMemoryStore {
    async fn recent(&self, thread_id: &ThreadId, window: usize) -> Result<Vec<ModelMessage>> {
        let lock = self.thread_lock(thread_id).await;
        let _guard = lock.lock().await;
        let mut messages = self.read_all(thread_id).await?;
        let start = window_start(messages.len(), window);
        Ok(messages.split_off(start))
    }

    async fn append(&self, thread_id: &ThreadId, messages: Vec<ModelMessage>) -> Result<()> {
        if messages.is_empty() {
            return Ok(());
        }
        let mut batch = String::new();
        for message in &messages {
            batch.push_str(&serde_json::to_string(message)?);
            batch.push('\n');
        }

        let lock = self.thread_lock(thread_id).await;
        let _guard = lock.lock().await;
        tokio::fs::create_dir_all(&self.base_dir).await?;
        let mut file = tokio::fs::OpenOptions::new()
            .create(true)
            .append(true)
            .open(self.path_for(thread_id))
            .await?;
        file.write_all(batch.as_bytes()).await?;
        file.flush().await?;
        tracing::debug!(thread_id = %thread_id, count = messages.len(), "appended to thread memory");
        Ok(())
    }

    async fn len(&self, thread_id: &ThreadId) -> Result<usize> {
        let lock = self.thread_lock(thread_id).await;
        let _guard = lock.lock().await;
        Ok(self.read_all(thread_id).await?.len())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    #[tokio::test]
    async fn history_survives_a_new_store_instance() {
        let dir = TempDir::new().unwrap();
        let thread = ThreadId::parse("thread-file").unwrap();

        let store = FileMemoryStore::new(dir.path());
        store
            .append(
                &thread,
                vec![ModelMessage::user("hi"), ModelMessage::assistant("hello")],
            )
            .await
            .unwrap();

        let reopened = FileMemoryStore::new(dir.path());
        let window = reopened.recent(&thread, 10).await.unwrap();
        assert_eq!(window.len(), 2);
        assert_eq!(window[1].text(), "hello");
    }

    #[tokio::test]
    async fn window_limits_returned_history() {
        let dir = TempDir::new().unwrap();
        let thread = ThreadId::parse("thread-window").unwrap();
        let store = FileMemoryStore::new(dir.path());
        for i in 0..4 {
            store
                .append(&thread, vec![ModelMessage::user(format!("m{i}"))])
                .await
                .unwrap();
        }
        let window = store.recent(&thread, 3).await.unwrap();
        assert_eq!(window.first().map(|m| m.text()), Some("m1".to_string()));
        assert_eq!(store.len(&thread).await.unwrap(), 4);
    }

    #[tokio::test]
    async fn idle_thread_locks_are_pruned() {
        let dir = TempDir::new().unwrap();
        let store = FileMemoryStore::new(dir.path());
        for i in 0..5 {
            let thread = ThreadId::parse(&format!("thread-{i}")).unwrap();
            store
                .append(&thread, vec![ModelMessage::user("hi")])
                .await
                .unwrap();
        }
        assert_eq!(store.locks.lock().await.len(), 1);

        let held = store.thread_lock(&ThreadId::parse("thread-0").unwrap()).await;
        let again = store.thread_lock(&ThreadId::parse("thread-0").unwrap()).await;
        assert!(Arc::ptr_eq(&held, &again));
    }

    #[tokio::test]
    async fn corrupt_line_reports_memory_error() {
        let dir = TempDir::new().unwrap();
        let thread = ThreadId::parse("thread-bad").unwrap();
        std::fs::write(dir.path().join("thread-bad.jsonl"), "{not json}\n").unwrap();
        let store = FileMemoryStore::new(dir.path());
        let err = store.recent(&thread, 10).await.unwrap_err();
        assert!(matches!(err, RelayError::Memory(_)));
    }
}
