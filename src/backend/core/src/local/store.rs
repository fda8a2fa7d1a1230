//! Durable key-value storage for the client: outbox and cached log.

use std::collections::HashMap;
use std::path::{Path, PathBuf};

use async_trait::async_trait;
use parking_lot::RwLock;
use serde::{de::DeserializeOwned, Serialize};
use tracing::debug;

use crate::error::Result;

/// Key-value store holding JSON documents. Must survive restarts when
/// backed by disk.
#[async_trait]
pub trait LocalStore: Send + Sync {
    async fn get(&self, key: &str) -> Result<Option<serde_json::Value>>;
    async fn put(&self, key: &str, value: serde_json::Value) -> Result<()>;
    async fn delete(&self, key: &str) -> Result<()>;
}

/// Typed read.
pub async fn load_json<T: DeserializeOwned>(store: &dyn LocalStore, key: &str) -> Result<Option<T>> {
    match store.get(key).await? {
        Some(value) => Ok(Some(serde_json::from_value(value)?)),
        None => Ok(None),
    }
}

/// Typed write.
pub async fn save_json<T: Serialize + Sync>(store: &dyn LocalStore, key: &str, value: &T) -> Result<()> {
    store.put(key, serde_json::to_value(value)?).await
}

// ═══════════════════════════════════════════════════════════════════════════════
// In-Memory
// ═══════════════════════════════════════════════════════════════════════════════

#[derive(Debug, Default)]
pub struct InMemoryLocalStore {
    values: RwLock<HashMap<String, serde_json::Value>>,
}

impl InMemoryLocalStore {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl LocalStore for InMemoryLocalStore {
    async fn get(&self, key: &str) -> Result<Option<serde_json::Value>> {
        Ok(self.values.read().get(key).cloned())
    }

    async fn put(&self, key: &str, value: serde_json::Value) -> Result<()> {
        self.values.write().insert(key.to_string(), value);
        Ok(())
    }

    async fn delete(&self, key: &str) -> Result<()> {
        self.values.write().remove(key);
        Ok(())
    }
}

// ═══════════════════════════════════════════════════════════════════════════════
// File-Backed
// ═══════════════════════════════════════════════════════════════════════════════

/// One file per key under a directory. Writes go to a temp file that is
/// then renamed over the target, so readers never see a torn document.
#[derive(Debug, Clone)]
pub struct FileLocalStore {
    dir: PathBuf,
}

impl FileLocalStore {
    pub async fn open(dir: impl AsRef<Path>) -> Result<Self> {
        let dir = dir.as_ref().to_path_buf();
        tokio::fs::create_dir_all(&dir).await?;
        Ok(Self { dir })
    }

    fn path_for(&self, key: &str) -> PathBuf {
        self.dir.join(format!("{}.json", hex::encode(key.as_bytes())))
    }
}

#[async_trait]
impl LocalStore for FileLocalStore {
    async fn get(&self, key: &str) -> Result<Option<serde_json::Value>> {
        match tokio::fs::read(self.path_for(key)).await {
            Ok(bytes) => Ok(Some(serde_json::from_slice(&bytes)?)),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(None),
            Err(e) => Err(e.into()),
        }
    }

    async fn put(&self, key: &str, value: serde_json::Value) -> Result<()> {
        let path = self.path_for(key);
        let tmp = path.with_extension("json.tmp");
        tokio::fs::write(&tmp, serde_json::to_vec(&value)?).await?;
        tokio::fs::rename(&tmp, &path).await?;
        debug!(key, path = %path.display(), "Local document written");
        Ok(())
    }

    async fn delete(&self, key: &str) -> Result<()> {
        match tokio::fs::remove_file(self.path_for(key)).await {
            Ok(()) => Ok(()),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(()),
            Err(e) => Err(e.into()),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[tokio::test]
    async fn test_in_memory_roundtrip() {
        let store = InMemoryLocalStore::new();
        store.put("a", json!([1, 2])).await.unwrap();
        assert_eq!(store.get("a").await.unwrap(), Some(json!([1, 2])));
        store.delete("a").await.unwrap();
        assert_eq!(store.get("a").await.unwrap(), None);
    }

    #[tokio::test]
    async fn test_file_store_survives_reopen() {
        let dir = tempfile::tempdir().unwrap();
        {
            let store = FileLocalStore::open(dir.path()).await.unwrap();
            save_json(&store, "outbox/u1", &vec!["x".to_string()]).await.unwrap();
        }

        let reopened = FileLocalStore::open(dir.path()).await.unwrap();
        let value: Option<Vec<String>> = load_json(&reopened, "outbox/u1").await.unwrap();
        assert_eq!(value, Some(vec!["x".to_string()]));
        assert_eq!(reopened.get("missing").await.unwrap(), None);
        reopened.delete("missing").await.unwrap();
    }
}
