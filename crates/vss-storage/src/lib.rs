//! Key-value storage for the VSS engine.
//!
//! `vss-core` keeps every record as JSON under a prefixed key (`users/u1`,
//! `deployments/d3`, `idx/domains/blog.vss.io`). This crate only moves those
//! bytes around: [`StorageBackend`] is the seam a database would plug into,
//! and [`MemoryBackend`] is the implementation the CLI and tests use.

mod error;
mod memory;

pub use error::StorageError;
pub use memory::MemoryBackend;

/// Async key-value store used by the record tables.
///
/// Keys are `/`-separated UTF-8 paths whose first segment names the record
/// type. Values are opaque bytes. Every method may be called concurrently
/// from many tasks.
///
/// All methods return [`StorageError::Backend`] when the store itself fails;
/// writes also return [`StorageError::InvalidKey`] for malformed keys.
#[async_trait::async_trait]
pub trait StorageBackend: Send + Sync + 'static {
    /// The value under `key`, or `None`.
    async fn get(&self, key: &str) -> Result<Option<Vec<u8>>, StorageError>;

    /// Write `value` under `key`, replacing what was there.
    async fn put(&self, key: &str, value: &[u8]) -> Result<(), StorageError>;

    /// Write `value` only if `key` is unused. Returns whether it was written.
    ///
    /// Check and write are one atomic step; domain ownership and record
    /// inserts rely on this to reject duplicates under concurrency.
    async fn put_if_absent(&self, key: &str, value: &[u8]) -> Result<bool, StorageError>;

    /// Remove `key`. Removing a missing key succeeds.
    async fn delete(&self, key: &str) -> Result<(), StorageError>;

    /// Every key starting with `prefix`, sorted.
    async fn list(&self, prefix: &str) -> Result<Vec<String>, StorageError>;

    /// Whether `key` holds a value.
    async fn exists(&self, key: &str) -> Result<bool, StorageError> {
        Ok(self.get(key).await?.is_some())
    }
}
