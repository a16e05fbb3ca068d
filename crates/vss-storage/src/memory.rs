//! In-memory storage backend.
//!
//! State lives for the life of the process. Callers that want it to outlive
//! one run copy it out with [`MemoryBackend::snapshot`] and rebuild a backend
//! with [`MemoryBackend::from_snapshot`].

use std::collections::BTreeMap;
use std::collections::btree_map::Entry;
use std::ops::Bound;
use std::sync::Arc;

use tokio::sync::RwLock;
use tracing::trace;

use crate::{StorageBackend, StorageError};

type Entries = BTreeMap<String, Vec<u8>>;

/// Sorted map of keys to bytes, shared by every clone.
///
/// ```
/// # use vss_storage::{MemoryBackend, StorageBackend};
/// # #[tokio::main]
/// # async fn main() -> Result<(), vss_storage::StorageError> {
/// let store = MemoryBackend::new();
/// assert!(store.put_if_absent("idx/domains/blog.vss.io", b"d3").await?);
/// assert!(!store.put_if_absent("idx/domains/blog.vss.io", b"d9").await?);
/// assert_eq!(store.get("idx/domains/blog.vss.io").await?, Some(b"d3".to_vec()));
/// # Ok(())
/// # }
/// ```
#[derive(Debug, Clone, Default)]
pub struct MemoryBackend {
    entries: Arc<RwLock<Entries>>,
}

impl MemoryBackend {
    /// An empty store.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// A store pre-filled with `entries`.
    #[must_use]
    pub fn from_snapshot(entries: BTreeMap<String, Vec<u8>>) -> Self {
        Self {
            entries: Arc::new(RwLock::new(entries)),
        }
    }

    /// A copy of every entry.
    pub async fn snapshot(&self) -> BTreeMap<String, Vec<u8>> {
        self.entries.read().await.clone()
    }
}

fn validate_key(key: &str) -> Result<(), StorageError> {
    let reason = if key.is_empty() {
        "key is empty"
    } else if key.ends_with('/') {
        "key ends with a separator"
    } else {
        return Ok(());
    };
    Err(StorageError::InvalidKey {
        key: key.to_owned(),
        reason,
    })
}

#[async_trait::async_trait]
impl StorageBackend for MemoryBackend {
    async fn get(&self, key: &str) -> Result<Option<Vec<u8>>, StorageError> {
        Ok(self.entries.read().await.get(key).cloned())
    }

    async fn put(&self, key: &str, value: &[u8]) -> Result<(), StorageError> {
        validate_key(key)?;
        self.entries
            .write()
            .await
            .insert(key.to_owned(), value.to_vec());
        Ok(())
    }

    async fn put_if_absent(&self, key: &str, value: &[u8]) -> Result<bool, StorageError> {
        validate_key(key)?;
        match self.entries.write().await.entry(key.to_owned()) {
            Entry::Vacant(slot) => {
                slot.insert(value.to_vec());
                Ok(true)
            }
            Entry::Occupied(_) => {
                trace!(key = %key, "key already held");
                Ok(false)
            }
        }
    }

    async fn delete(&self, key: &str) -> Result<(), StorageError> {
        self.entries.write().await.remove(key);
        Ok(())
    }

    async fn list(&self, prefix: &str) -> Result<Vec<String>, StorageError> {
        let entries = self.entries.read().await;
        let from: (Bound<&str>, Bound<&str>) = (Bound::Included(prefix), Bound::Unbounded);
        Ok(entries
            .range::<str, _>(from)
            .map(|(k, _)| k)
            .take_while(|k| k.starts_with(prefix))
            .cloned()
            .collect())
    }

    async fn exists(&self, key: &str) -> Result<bool, StorageError> {
        Ok(self.entries.read().await.contains_key(key))
    }
}
