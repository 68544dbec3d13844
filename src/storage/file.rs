/// Store backed by a single JSON document on disk.
///
/// The whole map is rewritten on every mutation through a temp file and a
/// rename, so a crash leaves either the old or the new document.
use std::collections::BTreeMap;
use std::path::{Path, PathBuf};

use async_trait::async_trait;
use serde_json::Value;
use tokio::sync::Mutex;
use tracing::{info, warn};

use super::KeyValueStore;
use crate::error::{Result, WalletError};

pub const STORE_FILE_NAME: &str = "wallet-store.json";

pub struct FileStore {
    path: PathBuf,
    entries: Mutex<BTreeMap<String, Value>>,
}

impl FileStore {
    /// Opens (or lazily creates) the store inside `data_dir`.
    pub async fn open(data_dir: &Path) -> Result<Self> {
        tokio::fs::create_dir_all(data_dir).await?;
        let path = data_dir.join(STORE_FILE_NAME);

        let entries = match tokio::fs::read(&path).await {
            Ok(bytes) if bytes.is_empty() => BTreeMap::new(),
            Ok(bytes) => serde_json::from_slice(&bytes).map_err(|e| {
                WalletError::Storage(format!("corrupt store {}: {e}", path.display()))
            })?,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => BTreeMap::new(),
            Err(e) => return Err(e.into()),
        };

        info!(path = %path.display(), keys = entries.len(), "Opened wallet store");
        Ok(Self {
            path,
            entries: Mutex::new(entries),
        })
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    async fn persist(&self, entries: &BTreeMap<String, Value>) -> Result<()> {
        let bytes = serde_json::to_vec_pretty(entries)?;
        let tmp = self.path.with_extension("json.tmp");
        tokio::fs::write(&tmp, &bytes).await?;
        if let Err(e) = tokio::fs::rename(&tmp, &self.path).await {
            warn!(error = %e, "Store rename failed");
            return Err(e.into());
        }
        Ok(())
    }
}

#[async_trait]
impl KeyValueStore for FileStore {
    fn name(&self) -> &str {
        "file"
    }

    async fn get(&self, key: &str) -> Result<Option<Value>> {
        Ok(self.entries.lock().await.get(key).cloned())
    }

    async fn set(&self, entries: Vec<(String, Value)>) -> Result<()> {
        let mut map = self.entries.lock().await;
        let mut next = map.clone();
        next.extend(entries);
        self.persist(&next).await?;
        *map = next;
        Ok(())
    }

    async fn remove(&self, keys: &[&str]) -> Result<()> {
        let mut map = self.entries.lock().await;
        if !keys.iter().any(|k| map.contains_key(*k)) {
            return Ok(());
        }
        let mut next = map.clone();
        for key in keys {
            next.remove(*key);
        }
        self.persist(&next).await?;
        *map = next;
        Ok(())
    }

    async fn keys(&self, prefix: &str) -> Result<Vec<String>> {
        Ok(self
            .entries
            .lock()
            .await
            .keys()
            .filter(|k| k.starts_with(prefix))
            .cloned()
            .collect())
    }
}
