//! Persisted client state.
//!
//! The session lives as a single JSON blob under a fixed key. Hosts supply
//! a [`SessionStore`]; the SDK ships an in-memory store for tests and
//! short-lived processes and a file-backed store for everything else.
//!
//! Known limitation: concurrent processes sharing one file store are not
//! coordinated; last write wins. Acceptable for best-effort telemetry.

use std::collections::HashMap;
use std::path::PathBuf;

use anyhow::{Context, Result};
use async_trait::async_trait;
use tokio::sync::Mutex;

/// Fixed key the current session snapshot is stored under.
pub const SESSION_STORAGE_KEY: &str = "growthstack_session";

#[async_trait]
pub trait SessionStore: Send + Sync + 'static {
    async fn load(&self, key: &str) -> Result<Option<String>>;
    async fn save(&self, key: &str, value: &str) -> Result<()>;
    async fn remove(&self, key: &str) -> Result<()>;
}

/// Process-local store; state dies with the process.
#[derive(Debug, Default)]
pub struct MemoryStore {
    entries: Mutex<HashMap<String, String>>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl SessionStore for MemoryStore {
    async fn load(&self, key: &str) -> Result<Option<String>> {
        Ok(self.entries.lock().await.get(key).cloned())
    }

    async fn save(&self, key: &str, value: &str) -> Result<()> {
        self.entries
            .lock()
            .await
            .insert(key.to_string(), value.to_string());
        Ok(())
    }

    async fn remove(&self, key: &str) -> Result<()> {
        self.entries.lock().await.remove(key);
        Ok(())
    }
}

/// One JSON file per key inside a data directory.
#[derive(Debug, Clone)]
pub struct FileStore {
    dir: PathBuf,
}

impl FileStore {
    pub fn new(dir: impl Into<PathBuf>) -> Self {
        Self { dir: dir.into() }
    }

    fn path_for(&self, key: &str) -> PathBuf {
        self.dir.join(format!("{key}.json"))
    }
}

#[async_trait]
impl SessionStore for FileStore {
    async fn load(&self, key: &str) -> Result<Option<String>> {
        match tokio::fs::read_to_string(self.path_for(key)).await {
            Ok(contents) => Ok(Some(contents)),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(None),
            Err(e) => Err(e).with_context(|| format!("read stored entry {key}")),
        }
    }

    async fn save(&self, key: &str, value: &str) -> Result<()> {
        tokio::fs::create_dir_all(&self.dir)
            .await
            .context("create storage dir")?;
        tokio::fs::write(self.path_for(key), value)
            .await
            .with_context(|| format!("write stored entry {key}"))
    }

    async fn remove(&self, key: &str) -> Result<()> {
        match tokio::fs::remove_file(self.path_for(key)).await {
            Ok(()) => Ok(()),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(()),
            Err(e) => Err(e).with_context(|| format!("remove stored entry {key}")),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn memory_store_round_trip() {
        let store = MemoryStore::new();
        assert_eq!(store.load("k").await.unwrap(), None);
        store.save("k", "v").await.unwrap();
        assert_eq!(store.load("k").await.unwrap().as_deref(), Some("v"));
        store.remove("k").await.unwrap();
        assert_eq!(store.load("k").await.unwrap(), None);
    }

    #[tokio::test]
    async fn file_store_round_trip() {
        let dir = std::env::temp_dir().join(format!(
            "growthstack-store-{}",
            std::process::id()
        ));
        let store = FileStore::new(&dir);
        store.save(SESSION_STORAGE_KEY, "{}").await.unwrap();
        assert_eq!(
            store.load(SESSION_STORAGE_KEY).await.unwrap().as_deref(),
            Some("{}")
        );
        store.remove(SESSION_STORAGE_KEY).await.unwrap();
        assert_eq!(store.load(SESSION_STORAGE_KEY).await.unwrap(), None);
        // Removing a missing key is not an error.
        store.remove(SESSION_STORAGE_KEY).await.unwrap();
        let _ = tokio::fs::remove_dir_all(&dir).await;
    }
}
