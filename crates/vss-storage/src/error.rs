//! Storage error type.

/// Errors a [`crate::StorageBackend`] can report.
///
/// The in-memory backend can only reject malformed keys; the `Backend`
/// variant is what a persistent implementation reports for I/O failures.
#[derive(Debug, thiserror::Error)]
pub enum StorageError {
    /// The key is empty or ends in the `/` separator.
    #[error("invalid storage key '{key}': {reason}")]
    InvalidKey { key: String, reason: &'static str },

    /// The backend could not complete the operation.
    #[error("storage backend failed to {op} '{key}': {reason}")]
    Backend {
        op: &'static str,
        key: String,
        reason: String,
    },
}
