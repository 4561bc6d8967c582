//! Chain persistence
//!
//! The node saves its full chain after every change and loads it once at
//! startup. Saving is best effort: failures are logged and never reach the
//! coordinator.

use crate::chain::Chain;
use crate::{Error, Result};
use async_trait::async_trait;
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex};
use tokio::sync::watch;
use tracing::{debug, warn};

/// Load/save primitive for the full ordered block sequence
#[async_trait]
pub trait ChainStore: Send + Sync {
    /// Load the stored chain, `None` if nothing has been stored yet
    async fn load(&self) -> Result<Option<Chain>>;

    /// Replace the stored chain
    async fn save(&self, chain: &Chain) -> Result<()>;
}

/// JSON file store
#[derive(Debug, Clone)]
pub struct FileStore {
    path: PathBuf,
}

impl FileStore {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    fn temp_path(&self) -> PathBuf {
        let mut name = self.path.file_name().unwrap_or_default().to_os_string();
        name.push(".tmp");
        self.path.with_file_name(name)
    }
}

#[async_trait]
impl ChainStore for FileStore {
    async fn load(&self) -> Result<Option<Chain>> {
        let content = match tokio::fs::read(&self.path).await {
            Ok(content) => content,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(None),
            Err(e) => return Err(e.into()),
        };
        let chain = serde_json::from_slice(&content).map_err(|e| {
            Error::storage(format!("corrupt chain file {}: {}", self.path.display(), e))
        })?;
        Ok(Some(chain))
    }

    async fn save(&self, chain: &Chain) -> Result<()> {
        let content = serde_json::to_vec(chain)?;
        let temp = self.temp_path();
        tokio::fs::write(&temp, content).await?;
        tokio::fs::rename(&temp, &self.path).await?;
        debug!("Saved {} blocks to {}", chain.len(), self.path.display());
        Ok(())
    }
}

/// In-memory store for ephemeral nodes
#[derive(Debug, Default)]
pub struct MemoryStore {
    chain: Mutex<Option<Chain>>,
}

#[async_trait]
impl ChainStore for MemoryStore {
    async fn load(&self) -> Result<Option<Chain>> {
        let chain = self
            .chain
            .lock()
            .map_err(|_| Error::storage("memory store lock poisoned"))?;
        Ok(chain.clone())
    }

    async fn save(&self, chain: &Chain) -> Result<()> {
        let mut stored = self
            .chain
            .lock()
            .map_err(|_| Error::storage("memory store lock poisoned"))?;
        *stored = Some(chain.clone());
        Ok(())
    }
}

/// Save every snapshot published on `snapshots` until the sender is dropped.
///
/// Intermediate snapshots may be skipped when changes arrive faster than the
/// store can write; the latest one is always saved.
pub async fn persist_snapshots(
    store: Arc<dyn ChainStore>,
    mut snapshots: watch::Receiver<Arc<Chain>>,
) {
    // The value the receiver was created with counts as seen. A value
    // published right before the sender is dropped is still reported as
    // changed, so the last snapshot is always written.
    while snapshots.changed().await.is_ok() {
        let chain = snapshots.borrow_and_update().clone();
        if let Err(e) = store.save(&chain).await {
            warn!(category = e.category(), "Failed to save chain: {}", e);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::block::Block;
    use crate::types::Nonce;
    use assert_matches::assert_matches;
    use tempfile::TempDir;

    fn two_block_chain() -> Chain {
        let genesis = Block::genesis();
        let mut child = Block::extend(&genesis).unwrap();
        child.seal(Nonce::new(1), 1_700_000_000_000);
        Chain::new(vec![genesis, child])
    }

    #[tokio::test]
    async fn test_file_store_missing_file() {
        let dir = TempDir::new().unwrap();
        let store = FileStore::new(dir.path().join("chain.json"));
        assert!(store.load().await.unwrap().is_none());
    }

    #[tokio::test]
    async fn test_file_store_save_and_load() {
        let dir = TempDir::new().unwrap();
        let store = FileStore::new(dir.path().join("chain.json"));
        let chain = two_block_chain();

        store.save(&chain).await.unwrap();
        assert_eq!(store.load().await.unwrap(), Some(chain));
        assert!(!store.temp_path().exists());
    }

    #[tokio::test]
    async fn test_file_store_corrupt_file() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("chain.json");
        tokio::fs::write(&path, b"{not json").await.unwrap();

        let store = FileStore::new(&path);
        assert_matches!(store.load().await, Err(Error::Storage { .. }));
    }

    #[tokio::test]
    async fn test_memory_store() {
        let store = MemoryStore::default();
        assert!(store.load().await.unwrap().is_none());
        store.save(&two_block_chain()).await.unwrap();
        assert_eq!(store.load().await.unwrap().unwrap().len(), 2);
    }

    #[tokio::test]
    async fn test_persist_snapshots() {
        let store = Arc::new(MemoryStore::default());
        let (tx, rx) = watch::channel(Arc::new(Chain::genesis()));
        let task = tokio::spawn(persist_snapshots(store.clone(), rx));

        tx.send_replace(Arc::new(two_block_chain()));
        drop(tx);
        task.await.unwrap();

        assert_eq!(store.load().await.unwrap(), Some(two_block_chain()));
    }

    #[tokio::test]
    async fn test_persist_skips_initial_value() {
        let store = Arc::new(MemoryStore::default());
        let (tx, rx) = watch::channel(Arc::new(Chain::genesis()));
        let task = tokio::spawn(persist_snapshots(store.clone(), rx));
        drop(tx);
        task.await.unwrap();

        assert!(store.load().await.unwrap().is_none());
    }
}
