use std::path::PathBuf;

use tokio::sync::RwLock;
use tracing::{info, warn};

use crate::{api::UsageItem, fs::operations};

/// Disk-backed buffer of intervals that could not be delivered. The in-memory
/// list is authoritative while the process lives; every mutation rewrites the
/// backing file so a restart picks up where delivery stopped.
pub struct RetryCache {
    path: PathBuf,
    items: RwLock<Vec<UsageItem>>,
}

impl RetryCache {
    /// Opens the cache at `path`. A missing or unreadable file starts an
    /// empty cache instead of failing the client.
    pub async fn open(path: PathBuf) -> Self {
        let items = match Self::read_file(&path).await {
            Ok(items) => {
                if !items.is_empty() {
                    info!("Loaded {} cached usage records from {path:?}", items.len());
                }
                items
            }
            Err(e) => {
                warn!("Couldn't read usage cache at {path:?}, starting empty: {e:?}");
                vec![]
            }
        };
        Self {
            path,
            items: RwLock::new(items),
        }
    }

    async fn read_file(path: &PathBuf) -> anyhow::Result<Vec<UsageItem>> {
        match operations::read_locked(path).await? {
            Some(bytes) => Ok(serde_json::from_slice(&bytes)?),
            None => Ok(vec![]),
        }
    }

    /// Appends `items` and persists immediately. Persist failures are logged,
    /// never raised: the records stay queued in memory.
    pub async fn add(&self, items: Vec<UsageItem>) {
        if items.is_empty() {
            return;
        }
        let mut guard = self.items.write().await;
        guard.extend(items);
        self.persist(&guard).await;
    }

    /// Returns a copy of everything still undelivered.
    pub async fn load_all(&self) -> Vec<UsageItem> {
        self.items.read().await.clone()
    }

    pub async fn is_empty(&self) -> bool {
        self.items.read().await.is_empty()
    }

    /// Empties the cache after a confirmed delivery.
    pub async fn clear(&self) {
        let mut guard = self.items.write().await;
        guard.clear();
        self.persist(&guard).await;
    }

    async fn persist(&self, items: &[UsageItem]) {
        let json = match serde_json::to_vec_pretty(items) {
            Ok(v) => v,
            Err(e) => {
                warn!("Couldn't serialize usage cache: {e:?}");
                return;
            }
        };
        if let Err(e) = operations::atomic_overwrite(&self.path, &json).await {
            warn!("Couldn't persist usage cache to {:?}: {e:?}", self.path);
        }
    }
}
